use super::job::WipeJob;
use crate::{StationError, StationResult};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

#[derive(Serialize)]
struct AuditRecord<'a> {
    #[serde(flatten)]
    job: &'a WipeJob,
    finished: DateTime<Utc>,
}

/// Append-only JSONL audit trail, one file per calendar month
#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `jobs-YYYY-MM.log`, month in local time
    pub fn file_for(&self, finished: DateTime<Utc>) -> PathBuf {
        let month = finished.with_timezone(&Local).format("%Y-%m");
        self.dir.join(format!("jobs-{}.log", month))
    }

    /// Append one record for a finished job; returns the file written
    pub async fn append(&self, job: &WipeJob, finished: DateTime<Utc>) -> StationResult<PathBuf> {
        let mut line = serde_json::to_string(&AuditRecord { job, finished })?;
        line.push('\n');

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StationError::Audit(format!("{}: {}", self.dir.display(), e)))?;

        let path = self.file_for(finished);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StationError::Audit(format!("{}: {}", path.display(), e)))?;

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StationError::Audit(format!("{}: {}", path.display(), e)))?;
        file.flush().await?;

        Ok(path)
    }
}
