// Station configuration
//
// Layered as: built-in defaults, then an optional TOML file, then
// `WIPE_STATION__*` environment variables.
use crate::{StationError, StationResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/wipe-station/config.toml";

/// Environment variable prefix
const ENV_PREFIX: &str = "WIPE_STATION";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// HTTP listen address
    pub bind_addr: SocketAddr,

    /// Disks that must never be listed or wiped (e.g. the system disk)
    pub protected_disks: Vec<String>,

    /// Name prefixes of virtual / non-physical block devices
    pub ignore_prefixes: Vec<String>,

    /// Pattern a disk name must fully match before a wipe is admitted
    pub device_name_pattern: String,

    /// Window in which a repeated udev event of the same kind is dropped
    pub dedup_window_ms: u64,

    /// Queue depth of each event subscriber
    pub subscriber_buffer: usize,

    /// Root-only wipe helper
    pub helper_path: PathBuf,

    /// Privilege escalation prepended to every helper invocation
    pub helper_prefix: Vec<String>,

    /// Directory receiving the monthly audit logs
    pub audit_dir: PathBuf,

    /// Mount point of sysfs (overridable for tests and containers)
    pub sysfs_root: PathBuf,

    /// Optional directory for daily rolling daemon logs
    pub log_dir: Option<PathBuf>,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            protected_disks: vec!["sda".to_string()],
            ignore_prefixes: ["loop", "md", "dm-", "zram", "sr", "ram"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            device_name_pattern: r"^sd[a-z]$".to_string(),
            dedup_window_ms: 2000,
            subscriber_buffer: 256,
            helper_path: PathBuf::from("/usr/local/bin/wipectl"),
            helper_prefix: vec!["sudo".to_string(), "-n".to_string()],
            audit_dir: PathBuf::from("/var/log/TCS-wiper"),
            sysfs_root: PathBuf::from("/sys"),
            log_dir: None,
        }
    }
}

impl StationConfig {
    /// Load configuration from an optional file plus the environment.
    ///
    /// A missing file is not an error; the daemon runs on defaults.
    pub fn load(path: Option<&Path>) -> StationResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("protected_disks")
                .with_list_parse_key("ignore_prefixes")
                .with_list_parse_key("helper_prefix"),
        );

        let config: StationConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the daemon cannot run with
    pub fn validate(&self) -> StationResult<()> {
        self.name_pattern()?;

        if self.subscriber_buffer == 0 {
            return Err(StationError::Config(
                "subscriber_buffer must be at least 1".to_string(),
            ));
        }

        if self.helper_path.as_os_str().is_empty() {
            return Err(StationError::Config("helper_path is empty".to_string()));
        }

        Ok(())
    }

    /// Compiled `device_name_pattern`
    pub fn name_pattern(&self) -> StationResult<Regex> {
        Regex::new(&self.device_name_pattern).map_err(|e| {
            StationError::Config(format!(
                "invalid device_name_pattern {:?}: {}",
                self.device_name_pattern, e
            ))
        })
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }
}
