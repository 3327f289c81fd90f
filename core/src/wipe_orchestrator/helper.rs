use super::method::HelperCommand;
use crate::io::{OutputObserver, ProgressRunner};
use crate::{StationConfig, StationResult};
use async_trait::async_trait;
use std::path::PathBuf;

/// The only way the engine touches a disk.
///
/// An implementation performs exactly the named operation on `device`,
/// streaming its diagnostics to `observer`, and returns the exit code
/// (0 is success).
#[async_trait]
pub trait WipeHelper: Send + Sync {
    async fn run(
        &self,
        command: HelperCommand,
        device: &str,
        observer: &mut (dyn OutputObserver + Send),
    ) -> StationResult<i32>;
}

/// Root-only helper executable reached through a non-interactive
/// privilege prefix (`sudo -n` by default)
#[derive(Debug, Clone)]
pub struct PrivilegedHelper {
    prefix: Vec<String>,
    helper_path: PathBuf,
}

impl PrivilegedHelper {
    pub fn new(prefix: Vec<String>, helper_path: impl Into<PathBuf>) -> Self {
        Self {
            prefix,
            helper_path: helper_path.into(),
        }
    }

    pub fn from_config(config: &StationConfig) -> Self {
        Self::new(config.helper_prefix.clone(), &config.helper_path)
    }

    pub fn command_line(&self, command: HelperCommand, device: &str) -> Vec<String> {
        let mut argv = self.prefix.clone();
        argv.push(self.helper_path.to_string_lossy().into_owned());
        argv.push(command.as_str().to_string());
        argv.push(device.to_string());
        argv
    }
}

#[async_trait]
impl WipeHelper for PrivilegedHelper {
    async fn run(
        &self,
        command: HelperCommand,
        device: &str,
        observer: &mut (dyn OutputObserver + Send),
    ) -> StationResult<i32> {
        let argv = self.command_line(command, device);
        tracing::debug!(argv = ?argv, "invoking wipe helper");
        ProgressRunner::run(&argv, observer).await
    }
}
