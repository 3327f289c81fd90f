// Observer API surface
//
// Wires the registry, broker, hotplug monitor and job engine together and
// exposes the five operations observers use: list disks, request a wipe,
// list jobs, and the live disk and job feeds.

use crate::drives::{
    DeviceEvent, DeviceFilter, DeviceProbe, DiskRecord, DiskRegistry, HotplugMonitor, InventorySource,
    LsblkInventory, SystemProbe,
};
use crate::events::{Event, EventBroker, EventPayload, Subscription};
use crate::wipe_orchestrator::{AdmittedJob, PrivilegedHelper, WipeHelper, WipeJob, WipeOrchestrator};
use crate::{StationConfig, StationResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub struct WipeStation {
    config: StationConfig,
    filter: DeviceFilter,
    registry: Arc<DiskRegistry>,
    broker: Arc<EventBroker>,
    inventory: Arc<dyn InventorySource>,
    orchestrator: Arc<WipeOrchestrator>,
}

impl WipeStation {
    /// Station backed by lsblk, sysfs and the privileged helper
    pub fn new(config: StationConfig) -> StationResult<Self> {
        let probe: Arc<dyn DeviceProbe> = Arc::new(SystemProbe::from_config(&config));
        let inventory = Arc::new(LsblkInventory::new(
            DeviceFilter::from_config(&config),
            Arc::clone(&probe),
        ));
        let helper = Arc::new(PrivilegedHelper::from_config(&config));

        Self::with_components(config, inventory, probe, helper)
    }

    pub fn with_components(
        config: StationConfig,
        inventory: Arc<dyn InventorySource>,
        probe: Arc<dyn DeviceProbe>,
        helper: Arc<dyn WipeHelper>,
    ) -> StationResult<Self> {
        config.validate()?;

        let registry = Arc::new(DiskRegistry::new(config.dedup_window()));
        let broker = Arc::new(EventBroker::new(config.subscriber_buffer));
        let orchestrator = Arc::new(WipeOrchestrator::new(
            &config,
            Arc::clone(&registry),
            Arc::clone(&broker),
            probe,
            helper,
        )?);

        Ok(Self {
            filter: DeviceFilter::from_config(&config),
            config,
            registry,
            broker,
            inventory,
            orchestrator,
        })
    }

    /// Populate the registry from one full scan; returns the disk count
    pub async fn bootstrap(&self) -> usize {
        let inventory = Arc::clone(&self.inventory);
        let mut scan = match tokio::task::spawn_blocking(move || inventory.scan()).await {
            Ok(scan) => scan,
            Err(e) => {
                tracing::error!(error = %e, "bootstrap scan task failed");
                Default::default()
            }
        };
        scan.retain(|name, _| self.filter.admits(name));

        let count = scan.len();
        self.registry.replace_all(scan);
        tracing::info!(disks = count, "initial inventory loaded");
        count
    }

    pub fn hotplug_monitor(&self) -> HotplugMonitor {
        HotplugMonitor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.inventory),
            Arc::clone(&self.broker),
            self.filter.clone(),
        )
    }

    /// Run the hotplug monitor on `events` in its own task
    pub fn spawn_hotplug(&self, events: mpsc::Receiver<DeviceEvent>) -> JoinHandle<()> {
        tokio::spawn(self.hotplug_monitor().run(events))
    }

    pub fn disks(&self) -> Vec<DiskRecord> {
        self.registry.snapshot()
    }

    /// Disks excluded from listing and wiping
    pub fn protected(&self) -> Vec<String> {
        self.filter.protected_disks()
    }

    pub async fn request_wipe(&self, name: &str, level: &str) -> StationResult<AdmittedJob> {
        self.orchestrator.request_wipe(name, level).await
    }

    pub fn jobs(&self) -> Vec<WipeJob> {
        self.orchestrator.jobs()
    }

    pub fn job(&self, id: Uuid) -> Option<WipeJob> {
        self.orchestrator.job(id)
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DiskRegistry> {
        &self.registry
    }

    pub fn broker(&self) -> &Arc<EventBroker> {
        &self.broker
    }

    pub fn orchestrator(&self) -> &Arc<WipeOrchestrator> {
        &self.orchestrator
    }

    /// Live disk feed, opening with a full snapshot
    pub fn subscribe_disks(&self) -> Feed {
        // subscribe before snapshotting: a change may repeat, never go missing
        let subscription = self.broker.subscribe();
        let initial = Event::now(EventPayload::DiskSnapshot { disks: self.disks() });
        Feed::new(FeedKind::Disks, initial, subscription)
    }

    /// Live job feed, opening with every known job
    pub fn subscribe_jobs(&self) -> Feed {
        let subscription = self.broker.subscribe();
        let initial = Event::now(EventPayload::JobSnapshot { jobs: self.jobs() });
        Feed::new(FeedKind::Jobs, initial, subscription)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Disks,
    Jobs,
}

impl FeedKind {
    fn accepts(&self, payload: &EventPayload) -> bool {
        match self {
            FeedKind::Disks => payload.is_disk_event(),
            FeedKind::Jobs => payload.is_job_event(),
        }
    }
}

/// One observer's view: a snapshot, then matching incremental events
pub struct Feed {
    kind: FeedKind,
    initial: Option<Event>,
    subscription: Subscription,
}

impl Feed {
    fn new(kind: FeedKind, initial: Event, subscription: Subscription) -> Self {
        Self {
            kind,
            initial: Some(initial),
            subscription,
        }
    }

    pub fn kind(&self) -> FeedKind {
        self.kind
    }

    /// Next event for this feed; `None` once the station is gone
    pub async fn next(&mut self) -> Option<Event> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }

        loop {
            let event = self.subscription.recv().await?;
            if self.kind.accepts(&event.payload) {
                return Some(event);
            }
        }
    }
}
