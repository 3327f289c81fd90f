use super::detection::DiskRecord;
use super::hotplug::DeviceAction;
use crate::lock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Names touched by one `apply_scan`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanDelta {
    pub added: Vec<DiskRecord>,
    pub updated: Vec<DiskRecord>,
}

#[derive(Debug, Clone, Copy)]
struct LastEvent {
    action: DeviceAction,
    at: Instant,
}

#[derive(Debug, Default)]
struct RegistryState {
    disks: BTreeMap<String, DiskRecord>,
    last_events: HashMap<String, LastEvent>,
}

/// Authoritative name -> disk mapping.
///
/// Written only by the hotplug monitor (and the startup bootstrap); every
/// reader gets copies. The lock is never held across I/O.
#[derive(Debug)]
pub struct DiskRegistry {
    state: Mutex<RegistryState>,
    dedup_window: Duration,
}

impl DiskRegistry {
    pub fn new(dedup_window: Duration) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            dedup_window,
        }
    }

    /// Merge scanned records in, reporting which names are new
    pub fn apply_scan(&self, scan: BTreeMap<String, DiskRecord>) -> ScanDelta {
        let mut delta = ScanDelta::default();
        let mut state = lock(&self.state);

        for (name, record) in scan {
            match state.disks.insert(name, record.clone()) {
                None => delta.added.push(record),
                Some(_) => delta.updated.push(record),
            }
        }

        delta
    }

    /// Drop a disk and forget its event history
    pub fn remove(&self, name: &str) -> Option<DiskRecord> {
        let mut state = lock(&self.state);
        state.last_events.remove(name);
        state.disks.remove(name)
    }

    /// Replace the whole inventory (startup bootstrap).
    ///
    /// Clears the dedup table so bootstrapped disks are not throttled.
    pub fn replace_all(&self, scan: BTreeMap<String, DiskRecord>) {
        let mut state = lock(&self.state);
        state.disks = scan;
        state.last_events.clear();
    }

    pub fn get(&self, name: &str) -> Option<DiskRecord> {
        lock(&self.state).disks.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.state).disks.contains_key(name)
    }

    pub fn snapshot(&self) -> Vec<DiskRecord> {
        lock(&self.state).disks.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).disks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn should_publish(&self, name: &str, action: DeviceAction) -> bool {
        self.should_publish_at(name, action, Instant::now())
    }

    /// Debounce: drop an event repeating the previous accepted kind for the
    /// same disk within the dedup window. Accepted events become the new
    /// reference point.
    pub fn should_publish_at(&self, name: &str, action: DeviceAction, now: Instant) -> bool {
        let mut state = lock(&self.state);

        if let Some(last) = state.last_events.get(name) {
            if last.action == action && now.saturating_duration_since(last.at) < self.dedup_window {
                return false;
            }
        }

        state
            .last_events
            .insert(name.to_string(), LastEvent { action, at: now });
        true
    }
}
