use super::fakes::{FakeInventory, FixedProbe, ScriptedHelper};
use std::sync::Arc;
use std::time::Duration;
use wipe_station::events::{Event, EventPayload};
use wipe_station::station::Feed;
use wipe_station::wipe_orchestrator::{JobView, WipeJob};
use wipe_station::{StationConfig, WipeStation};

/// Upper bound for any single await in the tests
pub const TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestStation {
    pub station: Arc<WipeStation>,
    pub inventory: Arc<FakeInventory>,
    pub helper: Arc<ScriptedHelper>,
    pub audit_dir: tempfile::TempDir,
}

pub fn config_in(audit_dir: &tempfile::TempDir) -> StationConfig {
    StationConfig {
        audit_dir: audit_dir.path().to_path_buf(),
        ..StationConfig::default()
    }
}

pub async fn station(inventory: FakeInventory, probe: FixedProbe, helper: ScriptedHelper) -> TestStation {
    let audit_dir = tempfile::tempdir().expect("audit tempdir");
    let inventory = Arc::new(inventory);
    let helper = Arc::new(helper);

    let station = WipeStation::with_components(
        config_in(&audit_dir),
        Arc::clone(&inventory) as _,
        Arc::new(probe),
        Arc::clone(&helper) as _,
    )
    .expect("station");
    station.bootstrap().await;

    TestStation {
        station: Arc::new(station),
        inventory,
        helper,
        audit_dir,
    }
}

pub async fn next_event(feed: &mut Feed) -> Event {
    tokio::time::timeout(TIMEOUT, feed.next())
        .await
        .expect("timed out waiting for event")
        .expect("feed closed")
}

/// Job updates from the feed until the job reaches a terminal state
pub async fn job_updates_until_terminal(feed: &mut Feed) -> Vec<JobView> {
    let mut updates = Vec::new();
    loop {
        if let EventPayload::JobUpdate { job } = next_event(feed).await.payload {
            let terminal = job.job.status.is_terminal();
            updates.push(job);
            if terminal {
                return updates;
            }
        }
    }
}

pub async fn wait_for(task: tokio::task::JoinHandle<WipeJob>) -> WipeJob {
    tokio::time::timeout(TIMEOUT, task)
        .await
        .expect("job did not finish")
        .expect("job task panicked")
}
