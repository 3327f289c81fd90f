use super::filter::DeviceFilter;
use super::probe::DeviceProbe;
use crate::{StationError, StationResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::process::Command;
use std::sync::Arc;

/// Columns requested from lsblk, in output order
const LSBLK_COLUMNS: &str = "NAME,TYPE,SIZE,MODEL,SERIAL,VENDOR,WWN,TRAN,STATE";

/// One physical disk as seen by the station
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskRecord {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub model: String,
    pub serial: String,
    pub vendor: String,
    pub wwn: String,
    pub transport: String,
    pub state: String,
    pub protected: bool,
}

impl DiskRecord {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            path: format!("/dev/{}", name),
            name,
            size: 0,
            model: String::new(),
            serial: String::new(),
            vendor: String::new(),
            wwn: String::new(),
            transport: String::new(),
            state: String::new(),
            protected: false,
        }
    }
}

/// Source of full inventory snapshots.
///
/// Implementations never fail: an unreadable inventory is an empty one.
#[cfg_attr(test, mockall::automock)]
pub trait InventorySource: Send + Sync {
    fn scan(&self) -> BTreeMap<String, DiskRecord>;
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    size: Option<serde_json::Value>,
    model: Option<String>,
    serial: Option<String>,
    vendor: Option<String>,
    wwn: Option<String>,
    tran: Option<String>,
    state: Option<String>,
}

/// Inventory read from `lsblk -J -b`
pub struct LsblkInventory {
    filter: DeviceFilter,
    probe: Arc<dyn DeviceProbe>,
}

impl LsblkInventory {
    pub fn new(filter: DeviceFilter, probe: Arc<dyn DeviceProbe>) -> Self {
        Self { filter, probe }
    }

    fn try_scan(&self) -> StationResult<BTreeMap<String, DiskRecord>> {
        let output = Command::new("lsblk")
            .args(["-J", "-b", "-o", LSBLK_COLUMNS])
            .output()
            .map_err(|e| StationError::Command(format!("lsblk: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(StationError::Command(format!("lsblk failed: {}", stderr)));
        }

        let mut disks = parse_lsblk(&output.stdout, &self.filter)?;
        enrich_serials(&mut disks, self.probe.as_ref());
        Ok(disks)
    }
}

impl InventorySource for LsblkInventory {
    fn scan(&self) -> BTreeMap<String, DiskRecord> {
        match self.try_scan() {
            Ok(disks) => disks,
            Err(e) => {
                tracing::error!(error = %e, "inventory scan failed");
                BTreeMap::new()
            }
        }
    }
}

/// Parse `lsblk -J -b` output into admitted whole-disk records.
///
/// Only a malformed document is an error; a malformed entry is skipped.
pub fn parse_lsblk(json: &[u8], filter: &DeviceFilter) -> StationResult<BTreeMap<String, DiskRecord>> {
    let output: LsblkOutput = serde_json::from_slice(json)?;
    let mut disks = BTreeMap::new();

    for entry in output.blockdevices {
        let device: LsblkDevice = match serde_json::from_value(entry) {
            Ok(device) => device,
            Err(e) => {
                tracing::debug!(error = %e, "skipping malformed lsblk entry");
                continue;
            }
        };

        if device.kind.as_deref() != Some("disk") {
            continue;
        }
        let name = match device.name {
            Some(name) if filter.admits(&name) => name,
            _ => continue,
        };

        let record = DiskRecord {
            path: format!("/dev/{}", name),
            size: parse_size(device.size.as_ref()),
            model: clean(device.model),
            serial: clean(device.serial),
            vendor: clean(device.vendor),
            wwn: clean(device.wwn),
            transport: clean(device.tran),
            state: clean(device.state),
            protected: filter.is_protected(&name),
            name: name.clone(),
        };
        disks.insert(name, record);
    }

    Ok(disks)
}

/// Fill empty serials from the udev property database
pub(crate) fn enrich_serials(disks: &mut BTreeMap<String, DiskRecord>, probe: &dyn DeviceProbe) {
    for disk in disks.values_mut() {
        if disk.serial.is_empty() {
            disk.serial = probe.property_serial(&disk.path);
        }
    }
}

/// lsblk reports sizes as numbers, or as strings on older util-linux
fn parse_size(value: Option<&serde_json::Value>) -> u64 {
    match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn clean(field: Option<String>) -> String {
    field.map(|s| s.trim().to_string()).unwrap_or_default()
}
