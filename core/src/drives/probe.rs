// Per-device probes: rotational flag, capacity, udev properties.
//
// Every probe is best effort. Failures fall back to the conservative
// answer (rotational, size 0, empty serial) instead of an error.

use crate::StationConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Install locations tried for `blockdev`
pub(crate) const BLOCKDEV_BINARIES: &[&str] = &["blockdev", "/sbin/blockdev", "/usr/sbin/blockdev"];

/// Install locations tried for `udevadm`
pub(crate) const UDEVADM_BINARIES: &[&str] = &[
    "udevadm",
    "/sbin/udevadm",
    "/usr/sbin/udevadm",
    "/usr/bin/udevadm",
];

/// udev properties holding a serial number, most specific first
const SERIAL_PROPERTIES: [&str; 2] = ["ID_SERIAL_SHORT", "ID_SERIAL"];

const DEFAULT_LOGICAL_BLOCK_SIZE: u64 = 512;

#[cfg_attr(test, mockall::automock)]
pub trait DeviceProbe: Send + Sync {
    /// Spinning media? Unknown devices count as rotational.
    fn is_rotational(&self, name: &str) -> bool;

    /// Capacity in bytes, 0 when every source fails
    fn size_bytes(&self, device_path: &str) -> u64;

    /// Serial number from the udev property database, empty if unknown
    fn property_serial(&self, device_path: &str) -> String;
}

/// Where a device capacity can come from, in the order tried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSource {
    /// `lsblk -nb -o SIZE <dev>`
    Lsblk,
    /// `blockdev --getsize64 <dev>`
    Blockdev,
    /// `/sys/block/<name>/size` x `queue/logical_block_size`
    Sysfs,
}

/// Probes backed by sysfs and the usual util-linux / udev tools
#[derive(Debug, Clone)]
pub struct SystemProbe {
    sysfs_root: PathBuf,
    size_sources: Vec<SizeSource>,
}

impl SystemProbe {
    pub fn new(sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            size_sources: vec![SizeSource::Lsblk, SizeSource::Blockdev, SizeSource::Sysfs],
        }
    }

    pub fn from_config(config: &StationConfig) -> Self {
        Self::new(&config.sysfs_root)
    }

    /// Restrict the capacity fallback chain
    pub fn with_size_sources(mut self, sources: Vec<SizeSource>) -> Self {
        self.size_sources = sources;
        self
    }

    fn block_dir(&self, name: &str) -> PathBuf {
        self.sysfs_root.join("block").join(name)
    }

    fn size_from(&self, source: SizeSource, device_path: &str) -> Option<u64> {
        match source {
            SizeSource::Lsblk => {
                let output = Command::new("lsblk")
                    .args(["-nb", "-o", "SIZE", device_path])
                    .output()
                    .ok()?;
                parse_digits(&String::from_utf8_lossy(&output.stdout))
            }
            SizeSource::Blockdev => BLOCKDEV_BINARIES.iter().find_map(|binary| {
                let output = Command::new(binary)
                    .args(["--getsize64", device_path])
                    .output()
                    .ok()?;
                parse_digits(&String::from_utf8_lossy(&output.stdout))
            }),
            SizeSource::Sysfs => {
                let name = device_name(device_path)?;
                let dir = self.block_dir(name);
                let sectors = read_u64(&dir.join("size"))?;
                let block_size = read_u64(&dir.join("queue").join("logical_block_size"))
                    .unwrap_or(DEFAULT_LOGICAL_BLOCK_SIZE);
                Some(sectors * block_size)
            }
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new("/sys")
    }
}

impl DeviceProbe for SystemProbe {
    fn is_rotational(&self, name: &str) -> bool {
        match fs::read_to_string(self.block_dir(name).join("queue").join("rotational")) {
            Ok(flag) => flag.trim() == "1",
            Err(e) => {
                tracing::debug!(disk = %name, error = %e, "rotational flag unreadable, assuming HDD");
                true
            }
        }
    }

    fn size_bytes(&self, device_path: &str) -> u64 {
        for source in &self.size_sources {
            if let Some(size) = self.size_from(*source, device_path) {
                tracing::debug!(device = %device_path, ?source, size, "device size resolved");
                return size;
            }
        }
        tracing::warn!(device = %device_path, "could not determine device size");
        0
    }

    fn property_serial(&self, device_path: &str) -> String {
        for binary in UDEVADM_BINARIES {
            let output = match Command::new(binary)
                .args(["info", "--query=property", "--name", device_path])
                .output()
            {
                Ok(output) if output.status.success() => output,
                _ => continue,
            };
            let properties = String::from_utf8_lossy(&output.stdout);
            return first_property(&properties, &SERIAL_PROPERTIES).unwrap_or_default();
        }
        String::new()
    }
}

/// First non-empty value among `keys` in `KEY=VALUE` property output
pub fn first_property(properties: &str, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        properties.lines().find_map(|line| {
            let (k, v) = line.split_once('=')?;
            let v = v.trim();
            (k.trim() == *key && !v.is_empty()).then(|| v.to_string())
        })
    })
}

fn device_name(device_path: &str) -> Option<&str> {
    Path::new(device_path).file_name()?.to_str()
}

fn parse_digits(output: &str) -> Option<u64> {
    let trimmed = output.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

fn read_u64(path: &Path) -> Option<u64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}
