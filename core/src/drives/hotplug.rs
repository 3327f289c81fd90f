// Hotplug monitor
//
// A single task consumes block-device notifications in arrival order,
// debounces bursts, reconciles against the registry and publishes disk
// events. When the notification stream ends the task logs and exits; the
// rest of the daemon keeps serving the last known inventory.

use super::detection::{DiskRecord, InventorySource};
use super::filter::DeviceFilter;
use super::probe::UDEVADM_BINARIES;
use super::registry::DiskRegistry;
use crate::events::{EventBroker, EventPayload};
use crate::{StationError, StationResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceAction {
    Add,
    Change,
    Remove,
}

impl FromStr for DeviceAction {
    type Err = StationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(DeviceAction::Add),
            "change" => Ok(DeviceAction::Change),
            "remove" => Ok(DeviceAction::Remove),
            other => Err(StationError::Parse(format!("unhandled udev action {:?}", other))),
        }
    }
}

/// One kernel/udev block-device notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub action: DeviceAction,
    /// `disk`, `partition`, ...
    pub devtype: String,
    /// Kernel name, e.g. `sdb`
    pub sys_name: String,
}

impl DeviceEvent {
    pub fn new(action: DeviceAction, devtype: impl Into<String>, sys_name: impl Into<String>) -> Self {
        Self {
            action,
            devtype: devtype.into(),
            sys_name: sys_name.into(),
        }
    }

    pub fn disk(action: DeviceAction, sys_name: impl Into<String>) -> Self {
        Self::new(action, "disk", sys_name)
    }
}

pub struct HotplugMonitor {
    registry: Arc<DiskRegistry>,
    inventory: Arc<dyn InventorySource>,
    broker: Arc<EventBroker>,
    filter: DeviceFilter,
}

impl HotplugMonitor {
    pub fn new(
        registry: Arc<DiskRegistry>,
        inventory: Arc<dyn InventorySource>,
        broker: Arc<EventBroker>,
        filter: DeviceFilter,
    ) -> Self {
        Self {
            registry,
            inventory,
            broker,
            filter,
        }
    }

    /// Consume notifications until the stream ends
    pub async fn run(self, mut events: mpsc::Receiver<DeviceEvent>) {
        tracing::info!("hotplug monitor started");

        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }

        tracing::warn!("device event stream ended, hotplug monitor exiting; inventory is now static");
    }

    /// Apply one notification; returns the payload published, if any
    pub async fn handle_event(&self, event: DeviceEvent) -> Option<EventPayload> {
        let name = event.sys_name.as_str();

        if event.devtype != "disk" || !self.filter.admits(name) {
            return None;
        }

        if !self.registry.should_publish(name, event.action) {
            tracing::debug!(disk = %name, action = ?event.action, "duplicate notification suppressed");
            return None;
        }

        let payload = match event.action {
            DeviceAction::Add | DeviceAction::Change => self.refresh(name).await?,
            DeviceAction::Remove => {
                let disk = self.registry.remove(name)?;
                EventPayload::DiskRemoved { disk }
            }
        };

        tracing::info!(disk = %name, event = payload.kind(), "inventory changed");
        self.broker.publish(payload.clone());
        Some(payload)
    }

    /// Rescan and merge one disk. Unknown disks become an `add`, known
    /// ones a `change`, whichever notification kind triggered the rescan.
    async fn refresh(&self, name: &str) -> Option<EventPayload> {
        let record = self.scan_one(name).await;
        let Some(record) = record else {
            tracing::debug!(disk = %name, "notified disk absent from inventory scan");
            return None;
        };

        let delta = self
            .registry
            .apply_scan(BTreeMap::from([(name.to_string(), record)]));

        if let Some(disk) = delta.added.into_iter().next() {
            Some(EventPayload::DiskAdded { disk })
        } else {
            delta
                .updated
                .into_iter()
                .next()
                .map(|disk| EventPayload::DiskChanged { disk })
        }
    }

    async fn scan_one(&self, name: &str) -> Option<DiskRecord> {
        let inventory = Arc::clone(&self.inventory);
        match tokio::task::spawn_blocking(move || inventory.scan()).await {
            Ok(mut scan) => scan.remove(name),
            Err(e) => {
                tracing::error!(disk = %name, error = %e, "inventory scan task failed");
                None
            }
        }
    }
}

/// Accumulates `udevadm monitor --property` output into events.
///
/// Each event is a block of `KEY=VALUE` lines closed by a blank line.
#[derive(Debug, Default)]
pub struct UdevEventParser {
    properties: HashMap<String, String>,
}

impl UdevEventParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed_line(&mut self, line: &str) -> Option<DeviceEvent> {
        let line = line.trim();

        if line.is_empty() {
            return self.finish();
        }
        if let Some((key, value)) = line.split_once('=') {
            self.properties.insert(key.to_string(), value.to_string());
        }
        None
    }

    /// Close the pending block
    pub fn finish(&mut self) -> Option<DeviceEvent> {
        let properties = std::mem::take(&mut self.properties);

        let action = properties.get("ACTION")?.parse().ok()?;
        let sys_name = properties
            .get("DEVPATH")
            .or_else(|| properties.get("DEVNAME"))
            .and_then(|path| path.rsplit('/').next())
            .filter(|name| !name.is_empty())?
            .to_string();
        let devtype = properties.get("DEVTYPE").cloned().unwrap_or_default();

        Some(DeviceEvent {
            action,
            devtype,
            sys_name,
        })
    }
}

/// Live block-device notifications from `udevadm monitor`
pub struct UdevadmEventSource;

impl UdevadmEventSource {
    /// Start the monitor process and forward its events into a channel.
    ///
    /// The channel closes when the process exits or its output breaks.
    pub fn spawn(buffer: usize) -> StationResult<(mpsc::Receiver<DeviceEvent>, JoinHandle<()>)> {
        let mut last_error = None;

        for binary in UDEVADM_BINARIES {
            let spawned = Command::new(binary)
                .args(["monitor", "--udev", "--subsystem-match=block", "--property"])
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn();

            match spawned {
                Ok(mut child) => {
                    let stdout = child.stdout.take().ok_or_else(|| {
                        StationError::Command("udevadm monitor has no stdout".to_string())
                    })?;
                    let (sender, receiver) = mpsc::channel(buffer.max(1));

                    let handle = tokio::spawn(async move {
                        let mut lines = BufReader::new(stdout).lines();
                        let mut parser = UdevEventParser::new();

                        loop {
                            match lines.next_line().await {
                                Ok(Some(line)) => {
                                    if let Some(event) = parser.feed_line(&line) {
                                        if sender.send(event).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                                Ok(None) => {
                                    tracing::error!("udevadm monitor exited");
                                    break;
                                }
                                Err(e) => {
                                    tracing::error!(error = %e, "udevadm monitor output unreadable");
                                    break;
                                }
                            }
                        }

                        let _ = child.kill().await;
                    });

                    tracing::info!(binary = %binary, "listening for block device events");
                    return Ok((receiver, handle));
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(StationError::Command(format!(
            "could not start udevadm monitor: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}
