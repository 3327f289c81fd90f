// Event model and fan-out broker
//
// Each subscriber owns a bounded queue. Publishing never blocks: when a
// subscriber's queue is full the event is dropped for that subscriber only,
// so a slow observer can never stall the hotplug monitor or a job worker.
// Delivery is lossy.

use crate::drives::DiskRecord;
use crate::lock;
use crate::wipe_orchestrator::{JobView, WipeJob};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};

pub type SubscriberId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    #[serde(rename = "snapshot")]
    DiskSnapshot { disks: Vec<DiskRecord> },

    #[serde(rename = "add")]
    DiskAdded { disk: DiskRecord },

    #[serde(rename = "change")]
    DiskChanged { disk: DiskRecord },

    #[serde(rename = "remove")]
    DiskRemoved { disk: DiskRecord },

    #[serde(rename = "job")]
    JobUpdate { job: JobView },

    #[serde(rename = "jobs_snapshot")]
    JobSnapshot { jobs: Vec<WipeJob> },
}

impl EventPayload {
    pub fn is_disk_event(&self) -> bool {
        matches!(
            self,
            EventPayload::DiskSnapshot { .. }
                | EventPayload::DiskAdded { .. }
                | EventPayload::DiskChanged { .. }
                | EventPayload::DiskRemoved { .. }
        )
    }

    pub fn is_job_event(&self) -> bool {
        matches!(
            self,
            EventPayload::JobUpdate { .. } | EventPayload::JobSnapshot { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::DiskSnapshot { .. } => "snapshot",
            EventPayload::DiskAdded { .. } => "add",
            EventPayload::DiskChanged { .. } => "change",
            EventPayload::DiskRemoved { .. } => "remove",
            EventPayload::JobUpdate { .. } => "job",
            EventPayload::JobSnapshot { .. } => "jobs_snapshot",
        }
    }
}

/// Immutable envelope delivered to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub ts: DateTime<Utc>,
}

impl Event {
    pub fn now(payload: EventPayload) -> Self {
        Self {
            payload,
            ts: Utc::now(),
        }
    }
}

struct Subscriber {
    id: SubscriberId,
    sender: mpsc::Sender<Event>,
}

pub struct EventBroker {
    subscribers: Mutex<Vec<Subscriber>>,
    buffer: usize,
    next_id: AtomicU64,
}

impl EventBroker {
    /// `buffer` is the queue depth of every subscriber
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            buffer: buffer.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new observer. Dropping the subscription unregisters it.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        lock(&self.subscribers).push(Subscriber { id, sender });
        tracing::debug!(subscriber = id, "observer subscribed");

        Subscription {
            id,
            receiver,
            broker: Arc::downgrade(self),
        }
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        before != subscribers.len()
    }

    pub fn publish(&self, payload: EventPayload) -> usize {
        self.publish_event(Event::now(payload))
    }

    /// Offer the event to every subscriber; returns how many accepted it
    pub fn publish_event(&self, event: Event) -> usize {
        let mut delivered = 0;
        let mut subscribers = lock(&self.subscribers);

        subscribers.retain(|subscriber| match subscriber.sender.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::debug!(
                    subscriber = subscriber.id,
                    kind = event.payload.kind(),
                    "subscriber queue full, event dropped"
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

/// Receiving end of one observer channel
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Event>,
    broker: Weak<EventBroker>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event, or `None` once the broker is gone
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(broker) = self.broker.upgrade() {
            broker.unsubscribe(self.id);
        }
    }
}
