use std::collections::HashMap;

use super::heap::{QueuedEntry, ReadyQueue};
use crate::job::{CutterJob, JobId, JobStatus};

/// An active job plus its position key within its priority class.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TrackedJob {
    pub job: CutterJob,
    pub queue_sequence: u64,
}

impl TrackedJob {
    pub fn new(job: CutterJob, queue_sequence: u64) -> Self {
        Self {
            job,
            queue_sequence,
        }
    }
}

/// In-memory view of the active (QUEUED or CUTTING) jobs.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    jobs: HashMap<JobId, TrackedJob>,
    ready: ReadyQueue,
}

impl QueueState {
    pub fn rebuild(active: HashMap<JobId, TrackedJob>) -> Self {
        let mut ready = ReadyQueue::default();
        for tracked in active.values() {
            if tracked.job.status == JobStatus::Queued {
                ready.push(QueuedEntry::for_job(&tracked.job, tracked.queue_sequence));
            }
        }
        Self {
            jobs: active,
            ready,
        }
    }

    /// Replaces the state with `active`, keeping known queue positions.
    pub fn resync(&mut self, mut active: HashMap<JobId, TrackedJob>) {
        for (id, tracked) in active.iter_mut() {
            if tracked.queue_sequence == 0 {
                if let Some(known) = self.jobs.get(id) {
                    tracked.queue_sequence = known.queue_sequence;
                }
            }
        }
        *self = Self::rebuild(active);
    }

    pub fn get(&self, job_id: &str) -> Option<&CutterJob> {
        self.jobs.get(job_id).map(|t| &t.job)
    }

    pub fn enqueue(&mut self, job: CutterJob, queue_sequence: u64) {
        self.ready.push(QueuedEntry::for_job(&job, queue_sequence));
        self.jobs
            .insert(job.job_id.clone(), TrackedJob::new(job, queue_sequence));
    }

    /// The job `get_next_job` would claim, dropping stale heap entries.
    pub fn peek_next(&mut self) -> Option<CutterJob> {
        while let Some(top) = self.ready.peek() {
            match self.jobs.get(&top.job_id) {
                Some(t) if t.job.status == JobStatus::Queued => return Some(t.job.clone()),
                _ => {
                    self.ready.pop();
                }
            }
        }
        None
    }

    /// Stores a committed transition. Terminal jobs leave the state.
    pub fn apply(&mut self, job: CutterJob) {
        if job.status.is_terminal() {
            self.jobs.remove(&job.job_id);
            return;
        }
        if job.status == JobStatus::Cutting {
            if let Some(top) = self.ready.peek() {
                if top.job_id == job.job_id {
                    self.ready.pop();
                }
            }
        }
        match self.jobs.get_mut(&job.job_id) {
            Some(tracked) => tracked.job = job,
            None => {
                self.jobs
                    .insert(job.job_id.clone(), TrackedJob::new(job, 0));
            }
        }
    }

    /// QUEUED jobs in claim order.
    pub fn queued(&self) -> Vec<CutterJob> {
        self.ready
            .sorted()
            .into_iter()
            .filter_map(|e| self.jobs.get(&e.job_id))
            .filter(|t| t.job.status == JobStatus::Queued)
            .map(|t| t.job.clone())
            .collect()
    }

    /// CUTTING jobs, earliest started first.
    pub fn cutting(&self) -> Vec<CutterJob> {
        let mut jobs: Vec<CutterJob> = self
            .jobs
            .values()
            .filter(|t| t.job.status == JobStatus::Cutting)
            .map(|t| t.job.clone())
            .collect();
        jobs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        jobs
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.values().filter(|t| t.job.status == status).count()
    }

    pub fn active_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn total_fabric_cm(&self) -> f64 {
        self.jobs.values().map(|t| t.job.fabric_length_cm).sum()
    }
}
