use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use crate::job::{CutterJob, JobId, JobPriority};

/// Heap key for a queued job. The greatest entry is claimed first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueuedEntry {
    pub priority: JobPriority,
    pub queued_at: DateTime<Utc>,
    /// WAL sequence of the job's first JOB_QUEUED entry; 0 if unknown.
    pub sequence: u64,
    pub job_id: JobId,
}

impl QueuedEntry {
    pub fn for_job(job: &CutterJob, sequence: u64) -> Self {
        Self {
            priority: job.priority,
            queued_at: job.queued_at.unwrap_or(job.created_at),
            sequence,
            job_id: job.job_id.clone(),
        }
    }
}

impl Ord for QueuedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.queued_at.cmp(&self.queued_at))
            .then_with(|| other.sequence.cmp(&self.sequence))
            .then_with(|| other.job_id.cmp(&self.job_id))
    }
}

impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Max-heap of queued jobs in claim order.
#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    heap: BinaryHeap<QueuedEntry>,
}

impl ReadyQueue {
    pub fn push(&mut self, entry: QueuedEntry) {
        self.heap.push(entry);
    }

    pub fn peek(&self) -> Option<&QueuedEntry> {
        self.heap.peek()
    }

    pub fn pop(&mut self) -> Option<QueuedEntry> {
        self.heap.pop()
    }

    /// Entries in the order `pop` would return them.
    pub fn sorted(&self) -> Vec<QueuedEntry> {
        let mut entries: Vec<QueuedEntry> = self.heap.iter().cloned().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries
    }
}
