// Tests for the wipe job engine
//
// The privileged helper is replaced by a scripted fake that replays canned
// stderr lines and an exit code per helper command.

use super::*;
use crate::drives::DiskRecord;
use crate::events::Subscription;
use crate::io::parse_bytes_token;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Notify;

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
struct Script {
    lines: Vec<String>,
    code: i32,
}

#[derive(Default)]
struct ScriptedHelper {
    scripts: Mutex<HashMap<HelperCommand, Script>>,
    calls: Mutex<Vec<HelperCommand>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedHelper {
    fn new() -> Self {
        Self::default()
    }

    fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    fn script(self, command: HelperCommand, lines: &[String], code: i32) -> Self {
        self.scripts.lock().unwrap().insert(
            command,
            Script {
                lines: lines.to_vec(),
                code,
            },
        );
        self
    }

    fn calls(&self) -> Vec<HelperCommand> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WipeHelper for ScriptedHelper {
    async fn run(
        &self,
        command: HelperCommand,
        _device: &str,
        observer: &mut (dyn OutputObserver + Send),
    ) -> StationResult<i32> {
        self.calls.lock().unwrap().push(command);
        let script = self.scripts.lock().unwrap().get(&command).cloned();
        let Some(script) = script else {
            return Err(StationError::Command(format!("{}: not found", command)));
        };

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        observer.on_spawn(4242);
        for line in &script.lines {
            observer.on_line(line);
            if let Some(bytes) = parse_bytes_token(line) {
                observer.on_progress(bytes);
            }
        }
        Ok(script.code)
    }
}

struct FixedProbe {
    rotational: bool,
    size: u64,
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

struct Fixture {
    engine: Arc<WipeOrchestrator>,
    registry: Arc<DiskRegistry>,
    broker: Arc<EventBroker>,
    helper: Arc<ScriptedHelper>,
    audit_dir: tempfile::TempDir,
}

fn fixture(rotational: bool, size: u64, helper: ScriptedHelper) -> Fixture {
    let audit_dir = tempfile::tempdir().unwrap();
    let config = StationConfig {
        audit_dir: audit_dir.path().to_path_buf(),
        ..StationConfig::default()
    };
    fixture_with(config, rotational, size, helper, audit_dir)
}

fn fixture_with(
    config: StationConfig,
    rotational: bool,
    size: u64,
    helper: ScriptedHelper,
    audit_dir: tempfile::TempDir,
) -> Fixture {
    let registry = Arc::new(DiskRegistry::new(config.dedup_window()));
    let broker = Arc::new(EventBroker::new(1024));
    let helper = Arc::new(helper);

    let mut sdb = DiskRecord::new("sdb");
    sdb.size = size;
    sdb.model = "WDC WD5000AAKX".to_string();
    sdb.serial = "WD-WCC2EKE12345".to_string();
    sdb.transport = "sata".to_string();
    registry.apply_scan(BTreeMap::from([("sdb".to_string(), sdb)]));

    let engine = Arc::new(
        WipeOrchestrator::new(
            &config,
            Arc::clone(&registry),
            Arc::clone(&broker),
            Arc::new(FixedProbe { rotational, size }),
            Arc::clone(&helper) as Arc<dyn WipeHelper>,
        )
        .unwrap(),
    );

    Fixture {
        engine,
        registry,
        broker,
        helper,
        audit_dir,
    }
}

fn dd_progress(bytes: &[u64]) -> Vec<String> {
    bytes
        .iter()
        .map(|b| format!("{} bytes ({} B) copied, 1 s, 100 MB/s", b, b))
        .collect()
}

fn drain_jobs(subscription: &mut Subscription) -> Vec<WipeJob> {
    let mut jobs = Vec::new();
    while let Some(event) = subscription.try_recv() {
        if let EventPayload::JobUpdate { job } = event.payload {
            jobs.push(job.job);
        }
    }
    jobs
}

// ==================== METHOD EXECUTION ====================

#[tokio::test]
async fn test_ssd_low_discard_jumps_to_complete() {
    let size = 64 * GIB;
    let f = fixture(false, size, ScriptedHelper::new().script(HelperCommand::SsdDiscard, &[], 0));
    let mut sub = f.broker.subscribe();

    let admitted = f.engine.start_wipe("sdb", AssuranceLevel::Low).await.unwrap();
    assert_eq!(admitted.job.status, JobStatus::Pending);
    assert_eq!(admitted.job.method.as_deref(), Some("full-device discard"));

    let job = admitted.task.await.unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.bytes, size);
    assert_eq!(job.percent, 100.0);
    assert_eq!(f.helper.calls(), vec![HelperCommand::SsdDiscard]);

    let updates = drain_jobs(&mut sub);
    let mut statuses: Vec<JobStatus> = updates.iter().map(|j| j.status).collect();
    statuses.dedup();
    assert_eq!(statuses, vec![JobStatus::Pending, JobStatus::Running, JobStatus::Done]);

    let percents: Vec<f64> = updates.iter().map(|j| j.percent).filter(|p| *p > 0.0).collect();
    assert!(!percents.is_empty());
    assert!(percents.iter().all(|p| *p == 100.0));
}

#[tokio::test]
async fn test_hdd_low_zero_fill_tracks_progress() {
    let size = 4 * GIB;
    let lines = dd_progress(&[GIB, 2 * GIB, 3 * GIB]);
    let f = fixture(true, size, ScriptedHelper::new().script(HelperCommand::HddZero, &lines, 0));
    let mut sub = f.broker.subscribe();

    let job = f.engine.start_wipe("sdb", AssuranceLevel::Low).await.unwrap().task.await.unwrap();

    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.bytes, size);
    assert_eq!(job.percent, 100.0);
    assert!(job.pid.is_none());

    let percents: Vec<f64> = drain_jobs(&mut sub).iter().map(|j| j.percent).collect();
    assert!(percents.contains(&25.0));
    assert!(percents.contains(&75.0));
    // progress is published in stream order
    let first_25 = percents.iter().position(|p| *p == 25.0).unwrap();
    let first_75 = percents.iter().position(|p| *p == 75.0).unwrap();
    assert!(first_25 < first_75);
}

#[tokio::test]
async fn test_hdd_medium_zero_pass_end_of_device_is_success() {
    let size = 500 * GIB;
    let mut zero = dd_progress(&[100 * GIB, size]);
    zero.push("dd: error writing '/dev/sdb': No space left on device".to_string());
    let random = dd_progress(&[250 * GIB, size]);

    let helper = ScriptedHelper::new()
        .script(HelperCommand::HddZero, &zero, 1)
        .script(HelperCommand::HddRandom, &random, 0);
    let f = fixture(true, size, helper);

    let job = f.engine.start_wipe("sdb", AssuranceLevel::Medium).await.unwrap().task.await.unwrap();

    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(f.helper.calls(), vec![HelperCommand::HddZero, HelperCommand::HddRandom]);
    assert!(job
        .log
        .iter()
        .any(|l| l.contains("ENOSPC at end-of-device") && l.starts_with("hdd-zero")));
    assert_eq!(job.method.as_deref(), Some("zero + random (2 passes)"));
}

#[tokio::test]
async fn test_hdd_medium_failed_zero_pass_fails_fast() {
    let size = 500 * GIB;
    let zero = dd_progress(&[50 * GIB]);
    let helper = ScriptedHelper::new()
        .script(HelperCommand::HddZero, &zero, 1)
        .script(HelperCommand::HddRandom, &[], 0);
    let f = fixture(true, size, helper);

    let job = f.engine.start_wipe("sdb", AssuranceLevel::Medium).await.unwrap().task.await.unwrap();

    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(f.helper.calls(), vec![HelperCommand::HddZero]);
    let error = job.error.as_deref().unwrap();
    assert!(error.contains("hdd-zero exited with status 1"), "{}", error);
    assert!(job.log.last().unwrap().contains("hdd-zero exited with status 1"));
}

#[tokio::test]
async fn test_later_pass_does_not_inherit_end_of_device() {
    let size = 500 * GIB;
    let helper = ScriptedHelper::new()
        .script(HelperCommand::HddZero, &dd_progress(&[size]), 0)
        .script(HelperCommand::HddRandom, &dd_progress(&[GIB]), 1);
    let f = fixture(true, size, helper);

    let job = f.engine.start_wipe("sdb", AssuranceLevel::Medium).await.unwrap().task.await.unwrap();

    assert_eq!(job.status, JobStatus::Error);
    assert!(!job.log.iter().any(|l| l.contains("ENOSPC")));
}

#[tokio::test]
async fn test_ssd_medium_discard_zero_end_of_device() {
    let size = 64 * GIB;
    let helper = ScriptedHelper::new().script(HelperCommand::SsdDiscardZero, &dd_progress(&[size - 1024]), 1);
    let f = fixture(false, size, helper);

    let job = f.engine.start_wipe("sdb", AssuranceLevel::Medium).await.unwrap().task.await.unwrap();

    assert_eq!(job.status, JobStatus::Done);
    assert!(job.log.iter().any(|l| l.contains("ENOSPC")));
}

#[tokio::test]
async fn test_multi_pass_never_normalises_exit_code() {
    let size = GIB;
    let helper = ScriptedHelper::new().script(HelperCommand::HddDod, &dd_progress(&[size]), 1);
    let f = fixture(true, size, helper);

    let job = f.engine.start_wipe("sdb", AssuranceLevel::High).await.unwrap().task.await.unwrap();
    assert_eq!(job.status, JobStatus::Error);
}

#[tokio::test]
async fn test_ssd_high_secure_erase_falls_back_to_discard() {
    let helper = ScriptedHelper::new()
        .script(
            HelperCommand::SsdSecureErase,
            &["security state: frozen".to_string()],
            2,
        )
        .script(HelperCommand::SsdDiscard, &[], 0);
    let f = fixture(false, 64 * GIB, helper);

    let job = f.engine.start_wipe("sdb", AssuranceLevel::High).await.unwrap().task.await.unwrap();

    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(
        f.helper.calls(),
        vec![HelperCommand::SsdSecureErase, HelperCommand::SsdDiscard]
    );
    assert!(job.log.iter().any(|l| l.contains("falling back to ssd-discard")));
    assert_eq!(job.percent, 100.0);
}

#[tokio::test]
async fn test_ssd_high_fallback_failure_is_error() {
    let helper = ScriptedHelper::new()
        .script(HelperCommand::SsdSecureErase, &[], 1)
        .script(HelperCommand::SsdDiscard, &[], 1);
    let f = fixture(false, 64 * GIB, helper);

    let job = f.engine.start_wipe("sdb", AssuranceLevel::High).await.unwrap().task.await.unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error.unwrap().contains("ssd-discard exited with status 1"));
}

#[tokio::test]
async fn test_missing_helper_is_job_error() {
    let f = fixture(true, GIB, ScriptedHelper::new());

    let job = f.engine.start_wipe("sdb", AssuranceLevel::Low).await.unwrap().task.await.unwrap();

    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error.unwrap().contains("not found"));
    assert!(f.engine.running_job("sdb").is_none());
}

#[tokio::test]
async fn test_unknown_size_done_still_reports_complete() {
    let f = fixture(true, 0, ScriptedHelper::new().script(HelperCommand::HddZero, &dd_progress(&[4096]), 0));

    let job = f.engine.start_wipe("sdb", AssuranceLevel::Low).await.unwrap().task.await.unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.percent, 100.0);
    assert_eq!(job.bytes, 4096);
}

// ==================== ADMISSION ====================

#[tokio::test]
async fn test_admission_rejects_bad_targets() {
    let f = fixture(true, GIB, ScriptedHelper::new());

    for name in ["sdb1", "nvme0n1", "../sdb", "", "sdaa"] {
        let err = f.engine.start_wipe(name, AssuranceLevel::Low).await.unwrap_err();
        assert!(matches!(err, StationError::InvalidDeviceName(_)), "{}: {:?}", name, err);
    }

    let err = f.engine.start_wipe("sda", AssuranceLevel::Low).await.unwrap_err();
    assert!(matches!(err, StationError::ProtectedDisk(_)));

    let err = f.engine.request_wipe("sdb", "paranoid").await.unwrap_err();
    assert!(matches!(err, StationError::InvalidLevel(_)));

    assert!(f.engine.jobs().is_empty());
    assert!(f.helper.calls().is_empty());
}

#[tokio::test]
async fn test_ignored_prefix_matching_pattern_is_rejected() {
    let audit_dir = tempfile::tempdir().unwrap();
    let config = StationConfig {
        audit_dir: audit_dir.path().to_path_buf(),
        device_name_pattern: r"^[a-z]+[0-9]*$".to_string(),
        ..StationConfig::default()
    };
    let f = fixture_with(config, true, GIB, ScriptedHelper::new(), audit_dir);

    let err = f.engine.start_wipe("loop0", AssuranceLevel::Low).await.unwrap_err();
    assert!(matches!(err, StationError::InvalidDeviceName(_)));
}

#[tokio::test]
async fn test_request_wipe_accepts_med_alias() {
    let f = fixture(true, GIB, ScriptedHelper::new().script(HelperCommand::HddZero, &[], 0).script(HelperCommand::HddRandom, &[], 0));

    let admitted = f.engine.request_wipe("sdb", "med").await.unwrap();
    assert_eq!(admitted.job.level, AssuranceLevel::Medium);
    admitted.task.await.unwrap();
}

#[tokio::test]
async fn test_one_active_job_per_disk() {
    let gate = Arc::new(Notify::new());
    let helper = ScriptedHelper::gated(Arc::clone(&gate)).script(HelperCommand::HddZero, &dd_progress(&[GIB]), 0);
    let f = fixture(true, GIB, helper);

    let (a, b) = tokio::join!(
        f.engine.start_wipe("sdb", AssuranceLevel::Low),
        f.engine.start_wipe("sdb", AssuranceLevel::Low)
    );

    let (admitted, rejected) = match (a, b) {
        (Ok(admitted), Err(rejected)) | (Err(rejected), Ok(admitted)) => (admitted, rejected),
        (a, b) => panic!("expected exactly one admission, got {:?} / {:?}", a.is_ok(), b.is_ok()),
    };

    match rejected {
        StationError::AlreadyRunning { disk, job_id } => {
            assert_eq!(disk, "sdb");
            assert_eq!(job_id, admitted.job.id);
        }
        other => panic!("unexpected rejection {:?}", other),
    }
    assert_eq!(f.engine.jobs().len(), 1);
    assert_eq!(f.engine.running_job("sdb"), Some(admitted.job.id));

    gate.notify_one();
    let job = admitted.task.await.unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert!(f.engine.running_job("sdb").is_none());

    // the disk is free again
    gate.notify_one();
    let second = f.engine.start_wipe("sdb", AssuranceLevel::Low).await.unwrap();
    assert_ne!(second.job.id, admitted.job.id);
    second.task.await.unwrap();
    assert_eq!(f.engine.jobs().len(), 2);
}

// ==================== SNAPSHOTS AND AUDIT ====================

#[tokio::test]
async fn test_removal_does_not_touch_job_snapshot() {
    let gate = Arc::new(Notify::new());
    let helper = ScriptedHelper::gated(Arc::clone(&gate)).script(HelperCommand::HddZero, &[], 0);
    let f = fixture(true, GIB, helper);

    let admitted = f.engine.start_wipe("sdb", AssuranceLevel::Low).await.unwrap();
    assert_eq!(admitted.job.model, "WDC WD5000AAKX");

    assert!(f.registry.remove("sdb").is_some());

    let live = f.engine.job(admitted.job.id).unwrap();
    assert_eq!(live.model, "WDC WD5000AAKX");
    assert_eq!(live.serial, "WD-WCC2EKE12345");
    assert_eq!(live.transport, "sata");

    gate.notify_one();
    let job = admitted.task.await.unwrap();
    assert_eq!(job.serial, "WD-WCC2EKE12345");
}

#[tokio::test]
async fn test_finished_job_is_audited() {
    let f = fixture(false, GIB, ScriptedHelper::new().script(HelperCommand::SsdDiscard, &[], 0));

    let job = f.engine.start_wipe("sdb", AssuranceLevel::Low).await.unwrap().task.await.unwrap();

    let logs: Vec<_> = std::fs::read_dir(f.audit_dir.path()).unwrap().collect();
    assert_eq!(logs.len(), 1);
    let text = std::fs::read_to_string(logs[0].as_ref().unwrap().path()).unwrap();
    let record: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
    assert_eq!(record["id"], job.id.to_string());
    assert_eq!(record["status"], "done");
    assert!(record.get("finished").is_some());
}

#[tokio::test]
async fn test_audit_failure_does_not_change_status() {
    let root = tempfile::tempdir().unwrap();
    let blocker = root.path().join("file");
    std::fs::write(&blocker, b"").unwrap();
    let config = StationConfig {
        audit_dir: blocker.join("audit"),
        ..StationConfig::default()
    };
    let f = fixture_with(
        config,
        false,
        GIB,
        ScriptedHelper::new().script(HelperCommand::SsdDiscard, &[], 0),
        root,
    );

    let job = f.engine.start_wipe("sdb", AssuranceLevel::Low).await.unwrap().task.await.unwrap();

    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(f.engine.job(job.id).unwrap().status, JobStatus::Done);
    assert!(f.engine.running_job("sdb").is_none());
}

#[tokio::test]
async fn test_job_table_matches_terminal_job() {
    let f = fixture(true, GIB, ScriptedHelper::new().script(HelperCommand::HddZero, &dd_progress(&[GIB / 2]), 0));

    let job = f.engine.start_wipe("sdb", AssuranceLevel::Low).await.unwrap().task.await.unwrap();
    let stored = f.engine.job(job.id).unwrap();

    assert_eq!(stored, job);
    assert_eq!(stored.bytes, stored.size);
    assert!(stored.log.iter().any(|l| l.contains("bytes")));
    assert_eq!(f.engine.jobs(), vec![job]);
}

#[tokio::test]
async fn test_feed_updates_carry_history_only_when_terminal() {
    let lines = dd_progress(&[GIB / 4, GIB / 2]);
    let f = fixture(true, GIB, ScriptedHelper::new().script(HelperCommand::HddZero, &lines, 0));
    let mut sub = f.broker.subscribe();

    let job = f.engine.start_wipe("sdb", AssuranceLevel::Low).await.unwrap().task.await.unwrap();

    let mut views = Vec::new();
    while let Some(event) = sub.try_recv() {
        if let EventPayload::JobUpdate { job } = event.payload {
            views.push(job);
        }
    }
    let (terminal, progress) = views.split_last().unwrap();

    assert!(progress.iter().all(|v| v.job.log.is_empty()));
    assert!(progress.iter().any(|v| v.last_log == lines[0]));
    assert_eq!(terminal.job.status, JobStatus::Done);
    assert_eq!(terminal.job.log, job.log);
    assert_eq!(terminal.last_log, "wipe completed");
    assert_eq!(f.engine.job(job.id).unwrap().log, job.log);
}
