use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use wipe_station::drives::{DeviceProbe, DiskRecord, InventorySource};
use wipe_station::io::{parse_bytes_token, OutputObserver};
use wipe_station::wipe_orchestrator::{HelperCommand, WipeHelper};
use wipe_station::{StationError, StationResult};

pub const GIB: u64 = 1024 * 1024 * 1024;

/// dd-style progress lines
pub fn dd_lines(bytes: &[u64]) -> Vec<String> {
    bytes
        .iter()
        .map(|b| format!("{} bytes copied, 2 s, 250 MB/s", b))
        .collect()
}

pub fn disk(name: &str, size: u64, model: &str, serial: &str, transport: &str) -> DiskRecord {
    let mut record = DiskRecord::new(name);
    record.size = size;
    record.model = model.to_string();
    record.serial = serial.to_string();
    record.transport = transport.to_string();
    record.state = "running".to_string();
    record
}

/// Inventory whose contents the test changes between scans
#[derive(Default)]
pub struct FakeInventory {
    disks: Mutex<BTreeMap<String, DiskRecord>>,
    scans: Mutex<usize>,
}

impl FakeInventory {
    pub fn with(disks: Vec<DiskRecord>) -> Self {
        let inventory = Self::default();
        for disk in disks {
            inventory.plug(disk);
        }
        inventory
    }

    pub fn plug(&self, disk: DiskRecord) {
        self.disks.lock().unwrap().insert(disk.name.clone(), disk);
    }

    pub fn unplug(&self, name: &str) {
        self.disks.lock().unwrap().remove(name);
    }

    pub fn scan_count(&self) -> usize {
        *self.scans.lock().unwrap()
    }
}

impl InventorySource for FakeInventory {
    fn scan(&self) -> BTreeMap<String, DiskRecord> {
        *self.scans.lock().unwrap() += 1;
        self.disks.lock().unwrap().clone()
    }
}

/// Same answer for every device
pub struct FixedProbe {
    pub rotational: bool,
    pub size: u64,
}

impl DeviceProbe for FixedProbe {
    fn is_rotational(&self, _name: &str) -> bool {
        self.rotational
    }

    fn size_bytes(&self, _device_path: &str) -> u64 {
        self.size
    }

    fn property_serial(&self, _device_path: &str) -> String {
        String::new()
    }
}

#[derive(Debug, Clone)]
struct Script {
    lines: Vec<String>,
    code: i32,
}

/// Replays canned stderr and an exit code per helper command.
///
/// A gated helper parks every invocation until the test calls `release`.
#[derive(Default)]
pub struct ScriptedHelper {
    scripts: Mutex<HashMap<HelperCommand, Script>>,
    calls: Mutex<Vec<(HelperCommand, String)>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedHelper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Notify::new())),
            ..Self::default()
        }
    }

    pub fn on(self, command: HelperCommand, lines: Vec<String>, code: i32) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(command, Script { lines, code });
        self
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn calls(&self) -> Vec<HelperCommand> {
        self.calls.lock().unwrap().iter().map(|(c, _)| *c).collect()
    }

    pub fn devices(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(_, d)| d.clone()).collect()
    }
}

#[async_trait]
impl WipeHelper for ScriptedHelper {
    async fn run(
        &self,
        command: HelperCommand,
        device: &str,
        observer: &mut (dyn OutputObserver + Send),
    ) -> StationResult<i32> {
        self.calls.lock().unwrap().push((command, device.to_string()));
        let script = self.scripts.lock().unwrap().get(&command).cloned();
        let script = script.ok_or_else(|| StationError::Command(format!("{}: no such operation", command)))?;

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        observer.on_spawn(31337);
        for line in &script.lines {
            observer.on_line(line);
            if let Some(bytes) = parse_bytes_token(line) {
                observer.on_progress(bytes);
            }
        }
        Ok(script.code)
    }
}
