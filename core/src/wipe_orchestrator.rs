// Wipe Orchestrator - per-disk wipe jobs driven through the privileged helper
//
// Admission validates the target, probes the device and atomically claims
// the disk. Each admitted job then runs in its own task, which alone mutates
// the job until it reaches `done` or `error`, appends the audit record and
// releases the disk.

pub mod audit;
pub mod helper;
pub mod job;
pub mod method;
pub mod progress;

pub use audit::AuditLog;
pub use helper::{PrivilegedHelper, WipeHelper};
pub use job::{AssuranceLevel, JobStatus, JobView, WipeJob};
pub use method::{HelperCommand, MethodStep, WipeMethod};

use crate::drives::{DeviceFilter, DeviceProbe, DiskRegistry};
use crate::events::{EventBroker, EventPayload};
use crate::io::OutputObserver;
use crate::{lock, StationConfig, StationError, StationResult};
use chrono::Utc;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Fraction of the device a fill pass must have covered for a non-zero exit
/// to count as running off the end of the device
pub const END_OF_DEVICE_RATIO: f64 = 0.999;

/// A fill pass that exits non-zero after covering the whole device only hit
/// ENOSPC on the short final write.
pub fn reached_end_of_device(pass_bytes: u64, size: u64) -> bool {
    size > 0 && pass_bytes > 0 && pass_bytes as f64 >= size as f64 * END_OF_DEVICE_RATIO
}

#[derive(Debug, Default)]
struct JobTable {
    jobs: HashMap<Uuid, WipeJob>,
    /// disk name -> active job; the only guard against wiping a disk twice
    running: HashMap<String, Uuid>,
}

/// Result of a successful admission
#[derive(Debug)]
pub struct AdmittedJob {
    /// Job as admitted (`pending`)
    pub job: WipeJob,
    /// Resolves to the terminal job once the worker finishes
    pub task: JoinHandle<WipeJob>,
}

/// Main wipe job engine
pub struct WipeOrchestrator {
    jobs: Mutex<JobTable>,
    registry: Arc<DiskRegistry>,
    broker: Arc<EventBroker>,
    probe: Arc<dyn DeviceProbe>,
    helper: Arc<dyn WipeHelper>,
    audit: AuditLog,
    filter: DeviceFilter,
    name_pattern: Regex,
}

impl WipeOrchestrator {
    pub fn new(
        config: &StationConfig,
        registry: Arc<DiskRegistry>,
        broker: Arc<EventBroker>,
        probe: Arc<dyn DeviceProbe>,
        helper: Arc<dyn WipeHelper>,
    ) -> StationResult<Self> {
        Ok(Self {
            jobs: Mutex::new(JobTable::default()),
            registry,
            broker,
            probe,
            helper,
            audit: AuditLog::new(&config.audit_dir),
            filter: DeviceFilter::from_config(config),
            name_pattern: config.name_pattern()?,
        })
    }

    /// Reject names that may never be wiped
    pub fn validate_target(&self, name: &str) -> StationResult<()> {
        if !self.name_pattern.is_match(name) {
            return Err(StationError::InvalidDeviceName(name.to_string()));
        }
        if self.filter.is_protected(name) {
            return Err(StationError::ProtectedDisk(name.to_string()));
        }
        if self.filter.is_ignored(name) {
            return Err(StationError::InvalidDeviceName(name.to_string()));
        }
        Ok(())
    }

    /// Admission from raw request parameters
    pub async fn request_wipe(self: &Arc<Self>, name: &str, level: &str) -> StationResult<AdmittedJob> {
        self.validate_target(name)?;
        let level: AssuranceLevel = level.parse()?;
        self.start_wipe(name, level).await
    }

    /// Admit a wipe and hand it to its own task.
    ///
    /// Returns as soon as the job exists; the wipe itself runs in the
    /// background.
    pub async fn start_wipe(self: &Arc<Self>, name: &str, level: AssuranceLevel) -> StationResult<AdmittedJob> {
        self.validate_target(name)?;

        // Cheap early rejection; the authoritative check is below
        if let Some(job_id) = self.running_job(name) {
            return Err(StationError::AlreadyRunning {
                disk: name.to_string(),
                job_id,
            });
        }

        let probe = Arc::clone(&self.probe);
        let disk = name.to_string();
        let (rotational, size) = tokio::task::spawn_blocking(move || {
            let device = format!("/dev/{}", disk);
            (probe.is_rotational(&disk), probe.size_bytes(&device))
        })
        .await
        .map_err(|e| StationError::Command(format!("device probe task failed: {}", e)))?;

        let mut job = WipeJob::new(name, level, rotational, size);
        job.method = Some(WipeMethod::select(rotational, level).label().to_string());
        if let Some(disk) = self.registry.get(name) {
            job.model = disk.model;
            job.serial = disk.serial;
            job.transport = disk.transport;
        }

        {
            let mut table = lock(&self.jobs);
            if let Some(&job_id) = table.running.get(name) {
                return Err(StationError::AlreadyRunning {
                    disk: name.to_string(),
                    job_id,
                });
            }
            table.running.insert(name.to_string(), job.id);
            table.jobs.insert(job.id, job.clone());
        }

        tracing::info!(
            disk = %name,
            job_id = %job.id,
            level = %level,
            rotational,
            size,
            "wipe job admitted"
        );
        self.broker.publish(EventPayload::JobUpdate { job: job.view() });

        let worker = JobWorker::new(Arc::clone(self), job.clone());
        let task = tokio::spawn(worker.run());

        Ok(AdmittedJob { job, task })
    }

    /// All jobs ever admitted, oldest first
    pub fn jobs(&self) -> Vec<WipeJob> {
        let mut jobs: Vec<WipeJob> = lock(&self.jobs).jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.started.cmp(&b.started).then(a.id.cmp(&b.id)));
        jobs
    }

    pub fn job(&self, id: Uuid) -> Option<WipeJob> {
        lock(&self.jobs).jobs.get(&id).cloned()
    }

    /// Active (pending or running) job holding `disk`
    pub fn running_job(&self, disk: &str) -> Option<Uuid> {
        lock(&self.jobs).running.get(disk).copied()
    }

    /// Overwrite the stored job except its log, which only grows through
    /// `append_log`
    fn store(&self, job: &WipeJob) {
        let mut table = lock(&self.jobs);
        if let Some(stored) = table.jobs.get_mut(&job.id) {
            let log = std::mem::take(&mut stored.log);
            *stored = job.clone();
            stored.log = log;
        }
    }

    fn append_log(&self, job_id: Uuid, line: &str) {
        if let Some(stored) = lock(&self.jobs).jobs.get_mut(&job_id) {
            stored.log.push(line.to_string());
        }
    }

    fn release(&self, disk: &str, job_id: Uuid) {
        let mut table = lock(&self.jobs);
        if table.running.get(disk) == Some(&job_id) {
            table.running.remove(disk);
        }
    }
}

/// Owns one job from admission to its terminal state
struct JobWorker {
    engine: Arc<WipeOrchestrator>,
    job: WipeJob,
    started: Instant,
    /// Bytes reported during the current helper invocation
    pass_bytes: u64,
    track_progress: bool,
}

impl JobWorker {
    fn new(engine: Arc<WipeOrchestrator>, job: WipeJob) -> Self {
        Self {
            engine,
            job,
            started: Instant::now(),
            pass_bytes: 0,
            track_progress: false,
        }
    }

    async fn run(mut self) -> WipeJob {
        let method = WipeMethod::select(self.job.rotational, self.job.level);

        self.job.status = JobStatus::Running;
        self.log(format!(
            "{} on {} ({})",
            method.label(),
            self.job.device,
            progress::human_bytes(self.job.size)
        ));

        let outcome = self.execute(method).await;
        self.finish(outcome).await
    }

    async fn execute(&mut self, method: WipeMethod) -> StationResult<()> {
        for step in method.steps() {
            if let Err(e) = self.run_step(step.command).await {
                let Some(fallback) = step.fallback else {
                    return Err(e);
                };
                self.log(format!("{}; falling back to {}", e, fallback));
                self.run_step(fallback).await?;
            }
        }
        Ok(())
    }

    /// One helper invocation, with the end-of-device normalisation applied
    async fn run_step(&mut self, command: HelperCommand) -> StationResult<()> {
        self.pass_bytes = 0;
        self.track_progress = command.reports_progress();

        if self.track_progress {
            self.log(format!("running {}", command));
        } else {
            self.log(format!("running {} (no incremental progress)", command));
        }

        let helper = Arc::clone(&self.engine.helper);
        let device = self.job.device.clone();
        let result = helper.run(command, &device, &mut *self).await;
        self.job.pid = None;
        let code = result?;

        if code != 0 {
            if command.is_fill_pass() && reached_end_of_device(self.pass_bytes, self.job.size) {
                self.log(format!(
                    "{} ended with ENOSPC at end-of-device; treating pass as success",
                    command
                ));
            } else {
                return Err(StationError::StepFailed(format!(
                    "{} exited with status {}",
                    command, code
                )));
            }
        }

        if !self.track_progress {
            let size = self.job.size;
            self.set_progress(size);
        }
        Ok(())
    }

    async fn finish(mut self, outcome: StationResult<()>) -> WipeJob {
        self.job.pid = None;

        match outcome {
            Ok(()) => {
                self.job.status = JobStatus::Done;
                if self.job.size > 0 {
                    self.job.bytes = self.job.size;
                }
                self.job.percent = 100.0;
                self.job.eta_sec = Some(0);
                self.log("wipe completed".to_string());
            }
            Err(e) => {
                self.job.status = JobStatus::Error;
                self.job.error = Some(e.to_string());
                self.log(format!("wipe failed: {}", e));
            }
        }

        if let Err(e) = self.engine.audit.append(&self.job, Utc::now()).await {
            tracing::error!(disk = %self.job.disk, job_id = %self.job.id, error = %e, "failed to write audit log");
        }

        self.engine.release(&self.job.disk, self.job.id);
        tracing::info!(
            disk = %self.job.disk,
            job_id = %self.job.id,
            status = ?self.job.status,
            "wipe job finished"
        );

        self.job
    }

    fn log(&mut self, line: String) {
        tracing::info!(disk = %self.job.disk, job_id = %self.job.id, "{}", line);
        self.engine.append_log(self.job.id, &line);
        self.job.log.push(line);
        self.publish();
    }

    fn set_progress(&mut self, bytes: u64) {
        let snapshot = progress::compute(bytes, self.job.size, self.started.elapsed());

        self.job.bytes = bytes;
        self.job.percent = snapshot.percent;
        self.job.mbps = snapshot.mbps;
        self.job.eta_sec = snapshot.eta_sec;

        tracing::debug!(
            disk = %self.job.disk,
            "{}",
            progress::describe(bytes, self.job.size, &snapshot)
        );
        self.publish();
    }

    /// Store and broadcast the job. Only the terminal update clones the log.
    fn publish(&mut self) {
        let view = if self.job.status.is_terminal() {
            self.job.view()
        } else {
            self.job.summary_view()
        };
        self.engine.store(&view.job);
        self.engine.broker.publish(EventPayload::JobUpdate { job: view });
    }
}

impl OutputObserver for JobWorker {
    fn on_spawn(&mut self, pid: u32) {
        self.job.pid = Some(pid);
        self.publish();
    }

    fn on_line(&mut self, line: &str) {
        self.log(line.to_string());
    }

    fn on_progress(&mut self, bytes: u64) {
        if self.track_progress {
            self.pass_bytes = bytes;
            self.set_progress(bytes);
        }
    }
}


#[cfg(test)]
mod wipe_orchestrator_tests;
