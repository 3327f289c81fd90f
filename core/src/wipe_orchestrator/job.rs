use crate::StationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Ordinal wipe strength; selects a method together with the media type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssuranceLevel {
    Low,
    #[serde(alias = "med")]
    Medium,
    High,
}

impl AssuranceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssuranceLevel::Low => "low",
            AssuranceLevel::Medium => "medium",
            AssuranceLevel::High => "high",
        }
    }
}

impl FromStr for AssuranceLevel {
    type Err = StationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(AssuranceLevel::Low),
            "med" | "medium" => Ok(AssuranceLevel::Medium),
            "high" => Ok(AssuranceLevel::High),
            _ => Err(StationError::InvalidLevel(s.to_string())),
        }
    }
}

impl fmt::Display for AssuranceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl JobStatus {
    /// `done` and `error` are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

/// One wipe attempt.
///
/// Only the job's own worker mutates it; everyone else sees clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WipeJob {
    pub id: Uuid,
    pub disk: String,
    pub device: String,
    pub level: AssuranceLevel,
    pub rotational: bool,
    /// Device capacity at admission, 0 if unknown
    pub size: u64,
    pub started: DateTime<Utc>,
    pub bytes: u64,
    pub percent: f64,
    /// MiB/s since start
    pub mbps: f64,
    pub eta_sec: Option<u64>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub log: Vec<String>,
    pub method: Option<String>,
    /// Helper process while a step runs
    pub pid: Option<u32>,

    // Captured at admission so removal of the disk keeps the audit context
    pub model: String,
    pub serial: String,
    pub transport: String,
}

impl WipeJob {
    pub fn new(disk: impl Into<String>, level: AssuranceLevel, rotational: bool, size: u64) -> Self {
        let disk = disk.into();
        Self {
            id: Uuid::new_v4(),
            device: format!("/dev/{}", disk),
            disk,
            level,
            rotational,
            size,
            started: Utc::now(),
            bytes: 0,
            percent: 0.0,
            mbps: 0.0,
            eta_sec: None,
            status: JobStatus::Pending,
            error: None,
            log: Vec::new(),
            method: None,
            pid: None,
            model: String::new(),
            serial: String::new(),
            transport: String::new(),
        }
    }

    pub fn last_log(&self) -> &str {
        self.log.last().map(String::as_str).unwrap_or("")
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn view(&self) -> JobView {
        JobView::from(self.clone())
    }

    /// Copy of the job without its log history
    pub fn summary(&mut self) -> WipeJob {
        let log = std::mem::take(&mut self.log);
        let summary = self.clone();
        self.log = log;
        summary
    }

    /// Progress update for the job feed: an empty `log` with the newest
    /// line in `last_log`
    pub fn summary_view(&mut self) -> JobView {
        let last_log = self.last_log().to_string();
        JobView {
            job: self.summary(),
            last_log,
        }
    }
}

/// Job as published on the job feed.
///
/// Updates for an active job leave `log` empty; the terminal update and the
/// job listing carry the whole history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: WipeJob,
    pub last_log: String,
}

impl From<WipeJob> for JobView {
    fn from(job: WipeJob) -> Self {
        let last_log = job.last_log().to_string();
        Self { job, last_log }
    }
}
