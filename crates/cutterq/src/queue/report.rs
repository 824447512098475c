//! Recovery report types.

use crate::job::JobId;

/// What startup recovery did to bring the queue back.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RecoveryReport {
    /// Interrupted cuts put back in line.
    pub requeued: Vec<JobId>,
    /// Interrupted cuts finalized as ERROR because their retries ran out.
    pub exhausted: Vec<JobId>,
    /// Archive records rewritten from WAL state.
    pub repaired: Vec<JobId>,
    /// WAL entries replayed past the last checkpoint.
    pub replayed_entries: usize,
}

impl RecoveryReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_requeued(&mut self, job_id: JobId) {
        self.requeued.push(job_id);
    }

    pub fn add_exhausted(&mut self, job_id: JobId) {
        self.exhausted.push(job_id);
    }

    pub fn add_repaired(&mut self, job_id: JobId) {
        self.repaired.push(job_id);
    }

    /// True when the previous run shut down with nothing in flight.
    pub fn is_clean(&self) -> bool {
        self.requeued.is_empty() && self.exhausted.is_empty() && self.repaired.is_empty()
    }
}

impl std::fmt::Display for RecoveryReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RecoveryReport {{ replayed: {}, requeued: {}, exhausted: {}, repaired: {} }}",
            self.replayed_entries,
            self.requeued.len(),
            self.exhausted.len(),
            self.repaired.len()
        )
    }
}
