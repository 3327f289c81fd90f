// Wipe station core
//
// Hotplug disk inventory, event fan-out to observers, and the wipe job engine
// that drives the privileged wipe helper.

pub mod config;
pub mod drives;
pub mod events;
pub mod io;
pub mod server;
pub mod station;
pub mod wipe_orchestrator;

pub use config::StationConfig;
pub use drives::{DeviceFilter, DiskRecord, DiskRegistry, HotplugMonitor};
pub use events::{Event, EventBroker, EventPayload, Subscription};
pub use station::{Feed, FeedKind, WipeStation};
pub use wipe_orchestrator::{AssuranceLevel, JobStatus, WipeJob, WipeOrchestrator};

use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command failed: {0}")]
    Command(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("invalid device name: {0}")]
    InvalidDeviceName(String),

    #[error("protected disk: {0}")]
    ProtectedDisk(String),

    #[error("level must be one of: low, medium, high (got {0:?})")]
    InvalidLevel(String),

    #[error("disk {disk} already has running job {job_id}")]
    AlreadyRunning { disk: String, job_id: Uuid },

    #[error("Wipe step failed: {0}")]
    StepFailed(String),

    #[error("Audit log write failed: {0}")]
    Audit(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StationError {
    /// Errors a wipe request is rejected with before any job exists.
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            StationError::InvalidDeviceName(_)
                | StationError::ProtectedDisk(_)
                | StationError::InvalidLevel(_)
                | StationError::AlreadyRunning { .. }
        )
    }
}

impl From<serde_json::Error> for StationError {
    fn from(err: serde_json::Error) -> Self {
        StationError::Parse(err.to_string())
    }
}

impl From<::config::ConfigError> for StationError {
    fn from(err: ::config::ConfigError) -> Self {
        StationError::Config(err.to_string())
    }
}

pub type StationResult<T> = Result<T, StationError>;

/// Every mutex in the crate guards plain in-memory maps, so a panic while
/// holding one leaves nothing half-written worth refusing.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
