//! The resilient cutter queue.
//!
//! Every mutation follows the same order: compute the new job state on a
//! copy, append it to the WAL, write it to the archive, then commit it to
//! memory and publish an event. If the archive write fails, the entries
//! just appended are cut from the WAL again and the caller gets the error,
//! so a failed operation leaves no trace. Only a crash between the two
//! writes leaves an entry the archive lacks; it is reconciled at the next
//! checkpoint or restart.

mod heap;
mod recovery;
mod report;
mod reprint;
mod state;
mod status;

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::broadcast;

use crate::archive::{JobArchive, JobSearch};
use crate::broadcast::{QueueEvent, QueueEventBroadcaster};
use crate::config::{validate_config, QueueConfig};
use crate::error::{CutterQueueError, QueueError};
use crate::job::{CutterJob, JobStatus, NewJob};
use crate::wal::{WalAction, WalActionKind, WalConfig, WriteAheadLog};

pub use report::RecoveryReport;
pub use status::QueueStatus;

use state::QueueState;

/// Durable, crash-recoverable priority queue in front of a single cutter.
pub struct ResilientCutterQueue {
    config: QueueConfig,
    wal: WriteAheadLog,
    archive: JobArchive,
    state: RwLock<QueueState>,
    events: QueueEventBroadcaster,
    recovery: RecoveryReport,
}

impl ResilientCutterQueue {
    /// Opens the queue under `config.data_dir` and runs crash recovery.
    /// The returned queue already reflects every recovered job.
    pub fn open(config: QueueConfig) -> Result<Self, CutterQueueError> {
        validate_config(&config)?;

        let wal = WriteAheadLog::open(
            WalConfig::new(config.wal_dir()).with_sync(config.sync_on_append),
        )?;
        let archive = JobArchive::open(&config.archive_dir(), config.search_limit)?;

        let (active, recovery) = recovery::recover(&wal, &archive)?;
        let state = QueueState::rebuild(active);

        info!(
            "Cutter queue opened at {} ({} queued, {} recovered)",
            config.data_dir.display(),
            state.count(JobStatus::Queued),
            recovery.requeued.len()
        );

        Ok(Self {
            config,
            wal,
            archive,
            state: RwLock::new(state),
            events: QueueEventBroadcaster::default(),
            recovery,
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// What startup recovery did.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn wal(&self) -> &WriteAheadLog {
        &self.wal
    }

    pub fn archive(&self) -> &JobArchive {
        &self.archive
    }

    /// Stream of committed transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Creates, archives and enqueues a job.
    pub fn add_job(&self, request: NewJob) -> Result<CutterJob, QueueError> {
        let mut state = self.write_state()?;

        let mut job = CutterJob::new(request, self.config.max_retries);
        match self.archive.preserve_plot(&job.plt_file) {
            Ok(checksum) => job.checksum_sha256 = Some(checksum),
            Err(e) => warn!("Job {} has no preserved plot: {}", job.job_id, e),
        }

        let created = WalAction::JobCreated { job: job.clone() };
        let job = self.enqueue_new(&mut state, job, created)?;

        info!(
            "Queued job {} for order {} ({}, {} cm)",
            job.job_id, job.order_id, job.priority, job.fabric_length_cm
        );
        Ok(job)
    }

    /// Claims the highest-priority, longest-waiting job. Returns `None`
    /// immediately when nothing is queued.
    pub fn get_next_job(&self) -> Result<Option<CutterJob>, QueueError> {
        let mut state = self.write_state()?;
        let Some(mut job) = state.peek_next() else {
            return Ok(None);
        };

        let now = Utc::now();
        job.mark_cutting(now);
        self.wal.with_rollback(|| -> Result<(), QueueError> {
            self.wal
                .append(&job.job_id, WalAction::JobCutting { started_at: now })?;
            self.archive.archive_job(&job)?;
            Ok(())
        })?;
        state.apply(job.clone());

        self.events.publish(
            &job,
            WalActionKind::JobCutting,
            "Job claimed for cutting",
        );
        info!("Cutting job {} ({})", job.job_id, job.priority);
        Ok(Some(job))
    }

    /// CUTTING → COMPLETE.
    pub fn mark_complete(&self, job_id: &str) -> Result<CutterJob, QueueError> {
        let job = self.finish(job_id, "complete", |job, now| {
            job.mark_complete(now);
            WalAction::JobCompleted { completed_at: now }
        })?;
        info!("Job {} complete", job_id);
        Ok(job)
    }

    /// CUTTING → ERROR. Terminal: the job is never retried automatically.
    pub fn mark_failed(&self, job_id: &str, reason: &str) -> Result<CutterJob, QueueError> {
        let job = self.finish(job_id, "fail", |job, now| {
            job.mark_error(reason, now);
            WalAction::JobFailed {
                failed_at: now,
                reason: reason.to_string(),
                retry_count: job.retry_count,
                retries_exhausted: false,
            }
        })?;
        warn!("Job {} failed: {}", job_id, reason);
        Ok(job)
    }

    /// Active jobs: CUTTING first, then QUEUED in claim order.
    pub fn list_queue(&self) -> Result<Vec<CutterJob>, QueueError> {
        let state = self.read_state()?;
        let mut jobs = state.cutting();
        jobs.extend(state.queued());
        Ok(jobs)
    }

    /// Looks a job up in the live queue, then in the archive.
    pub fn get_job(&self, job_id: &str) -> Result<CutterJob, QueueError> {
        let state = self.read_state()?;
        self.current_job(&state, job_id)
    }

    pub fn search_jobs(&self, search: &JobSearch) -> Result<Vec<CutterJob>, QueueError> {
        let _state = self.read_state()?;
        Ok(self.archive.search_jobs(search)?)
    }

    pub fn get_status(&self) -> Result<QueueStatus, QueueError> {
        let state = self.read_state()?;
        let breakdown = self.archive.count_by_status()?;
        Ok(QueueStatus::new(
            state.count(JobStatus::Queued),
            state.active_count(),
            state.total_fabric_cm(),
            self.config.cutting_speed_cm_per_min,
            breakdown,
        ))
    }

    /// Makes sure the archive reflects every WAL entry, then checkpoints
    /// the WAL through its last sequence (compacting it if configured).
    /// Returns the checkpointed sequence.
    pub fn checkpoint(&self) -> Result<u64, QueueError> {
        let mut state = self.write_state()?;

        let entries = self.wal.replay()?;
        let reconciled = recovery::reconcile(&self.archive, &entries)?;
        if !reconciled.repaired.is_empty() {
            warn!(
                "Checkpoint repaired {} archive record(s) behind the WAL",
                reconciled.repaired.len()
            );
            state.resync(reconciled.active);
        }

        let through = self.wal.last_sequence()?;
        self.wal.checkpoint(through)?;
        if self.config.compact_on_checkpoint {
            self.wal.compact()?;
        }

        info!("Checkpointed WAL through sequence {}", through);
        Ok(through)
    }

    /// Logs creation plus JOB_QUEUED for a new job, archives it and puts
    /// it in line. `created` is the creation entry for `job`.
    fn enqueue_new(
        &self,
        state: &mut QueueState,
        mut job: CutterJob,
        created: WalAction,
    ) -> Result<CutterJob, QueueError> {
        let kind = created.kind();
        let sequence = self.wal.with_rollback(|| -> Result<u64, QueueError> {
            let sequence = self.log_new(&mut job, created, Utc::now())?;
            self.archive.archive_job(&job)?;
            Ok(sequence)
        })?;
        self.commit_new(state, &job, sequence, kind);
        Ok(job)
    }

    /// Like [`Self::enqueue_new`] for several jobs at once. The archive
    /// write is a single transaction, so either every job is queued or
    /// none is.
    fn enqueue_all(
        &self,
        state: &mut QueueState,
        batch: Vec<(CutterJob, WalAction)>,
    ) -> Result<Vec<CutterJob>, QueueError> {
        let now = Utc::now();
        let mut logged: Vec<(CutterJob, u64, WalActionKind)> = Vec::with_capacity(batch.len());
        self.wal.with_rollback(|| -> Result<(), QueueError> {
            for (mut job, created) in batch {
                let kind = created.kind();
                let sequence = self.log_new(&mut job, created, now)?;
                logged.push((job, sequence, kind));
            }
            self.archive
                .archive_jobs(logged.iter().map(|(job, _, _)| job))?;
            Ok(())
        })?;

        Ok(logged
            .into_iter()
            .map(|(job, sequence, kind)| {
                self.commit_new(state, &job, sequence, kind);
                job
            })
            .collect())
    }

    /// Appends `created` and JOB_QUEUED for `job`, marking it queued.
    /// Returns the JOB_QUEUED sequence.
    fn log_new(
        &self,
        job: &mut CutterJob,
        created: WalAction,
        now: DateTime<Utc>,
    ) -> Result<u64, QueueError> {
        self.wal.append(&job.job_id, created)?;
        job.mark_queued(now);
        Ok(self.wal.append(
            &job.job_id,
            WalAction::JobQueued {
                queued_at: now,
                retry_count: job.retry_count,
            },
        )?)
    }

    fn commit_new(
        &self,
        state: &mut QueueState,
        job: &CutterJob,
        sequence: u64,
        created: WalActionKind,
    ) {
        state.enqueue(job.clone(), sequence);
        self.events.publish(job, created, "Job created");
        self.events
            .publish(job, WalActionKind::JobQueued, "Job queued");
    }

    /// Moves a CUTTING job to a terminal state.
    fn finish<F>(&self, job_id: &str, action: &'static str, f: F) -> Result<CutterJob, QueueError>
    where
        F: FnOnce(&mut CutterJob, DateTime<Utc>) -> WalAction,
    {
        let mut state = self.write_state()?;
        let mut job = self.current_job(&state, job_id)?;
        job.ensure_status(JobStatus::Cutting, action)?;

        let wal_action = f(&mut job, Utc::now());
        let kind = wal_action.kind();
        let message = match &wal_action {
            WalAction::JobFailed { reason, .. } => format!("Job failed: {}", reason),
            _ => "Job complete".to_string(),
        };
        self.wal.with_rollback(|| -> Result<(), QueueError> {
            self.wal.append(job_id, wal_action)?;
            self.archive.archive_job(&job)?;
            Ok(())
        })?;
        state.apply(job.clone());

        self.events.publish(&job, kind, message);
        Ok(job)
    }

    fn current_job(&self, state: &QueueState, job_id: &str) -> Result<CutterJob, QueueError> {
        if let Some(job) = state.get(job_id) {
            return Ok(job.clone());
        }
        self.archive
            .get_job(job_id)?
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, QueueState>, QueueError> {
        self.state.read().map_err(|_| QueueError::LockPoisoned)
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, QueueState>, QueueError> {
        self.state.write().map_err(|_| QueueError::LockPoisoned)
    }
}
