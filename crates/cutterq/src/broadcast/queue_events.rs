//! Queue event broadcaster for dashboards and operator tools.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::{CutterJob, JobId, JobPriority, JobStatus};
use crate::wal::WalActionKind;

/// A committed job transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEvent {
    pub job_id: JobId,
    pub order_id: String,
    /// The WAL action that was committed.
    pub kind: WalActionKind,
    /// Job status after the transition.
    pub status: JobStatus,
    pub priority: JobPriority,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl QueueEvent {
    pub fn for_job(job: &CutterJob, kind: WalActionKind, message: impl Into<String>) -> Self {
        Self {
            job_id: job.job_id.clone(),
            order_id: job.order_id.clone(),
            kind,
            status: job.status,
            priority: job.priority,
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// Fans queue events out to any number of subscribers.
#[derive(Clone)]
pub struct QueueEventBroadcaster {
    sender: Arc<broadcast::Sender<QueueEvent>>,
}

impl QueueEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publishes an event. Having no subscribers is fine.
    pub fn send(&self, event: QueueEvent) {
        let _ = self.sender.send(event);
    }

    pub fn publish(&self, job: &CutterJob, kind: WalActionKind, message: impl Into<String>) {
        self.send(QueueEvent::for_job(job, kind, message));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for QueueEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
