//! Reprints of archived jobs.

use log::info;

use super::ResilientCutterQueue;
use crate::error::QueueError;
use crate::job::{CutterJob, JobPriority, JobStatus};
use crate::wal::WalAction;

impl ResilientCutterQueue {
    /// Queues a new cut of an archived job.
    ///
    /// Fails with `NotFound` when the job was never archived and with
    /// `PlotUnavailable` when no plot matching its checksum can be found.
    /// `priority` falls back to the configured reprint priority.
    pub fn reprint_job(
        &self,
        job_id: &str,
        reason: &str,
        requested_by: &str,
        priority: Option<JobPriority>,
    ) -> Result<CutterJob, QueueError> {
        let mut state = self.write_state()?;
        let original = self
            .archive
            .get_job(job_id)?
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
        let (job, created) = self.prepare_reprint(&original, reason, requested_by, priority)?;
        let job = self.enqueue_new(&mut state, job, created)?;

        info!(
            "Reprint {} of job {} queued at {} priority",
            job.job_id, original.job_id, job.priority
        );
        Ok(job)
    }

    /// Reprints every COMPLETE job of `order_id`, oldest first. An order
    /// with no completed jobs yields an empty list.
    ///
    /// All or nothing: if any job's plot is unavailable, or a write fails,
    /// no reprint is queued.
    pub fn reprint_order(
        &self,
        order_id: &str,
        reason: &str,
        requested_by: &str,
    ) -> Result<Vec<CutterJob>, QueueError> {
        let mut state = self.write_state()?;
        let originals = self.archive.jobs_for_order(order_id, JobStatus::Complete)?;

        let batch = originals
            .iter()
            .map(|original| self.prepare_reprint(original, reason, requested_by, None))
            .collect::<Result<Vec<_>, _>>()?;
        let reprints = self.enqueue_all(&mut state, batch)?;

        for (reprint, original) in reprints.iter().zip(&originals) {
            info!(
                "Reprint {} of job {} queued at {} priority",
                reprint.job_id, original.job_id, reprint.priority
            );
        }
        info!(
            "Reprinted {} completed job(s) of order {}",
            reprints.len(),
            order_id
        );
        Ok(reprints)
    }

    /// Builds the reprint job and its REPRINT_CREATED entry. Fails with
    /// `PlotUnavailable` before anything is written.
    fn prepare_reprint(
        &self,
        original: &CutterJob,
        reason: &str,
        requested_by: &str,
        priority: Option<JobPriority>,
    ) -> Result<(CutterJob, WalAction), QueueError> {
        let plt_file =
            self.archive
                .locate_plot(original)
                .map_err(|e| QueueError::PlotUnavailable {
                    job_id: original.job_id.clone(),
                    reason: e.to_string(),
                })?;

        let job = CutterJob::reprint_of(
            original,
            plt_file,
            priority.unwrap_or(self.config.reprint_priority),
            reason,
            requested_by,
            self.config.max_retries,
        );
        let created = WalAction::ReprintCreated {
            job: job.clone(),
            original_job_id: original.job_id.clone(),
            reason: reason.to_string(),
            requested_by: requested_by.to_string(),
        };
        Ok((job, created))
    }
}
