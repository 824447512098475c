//! Startup recovery and WAL/archive reconciliation.
//!
//! The WAL is authoritative. Replay starts from the archive's active
//! records, folds every entry past the checkpoint on top of them in
//! sequence order, and rewrites archive records that fell behind. Every
//! entry carries absolute values, so folding an entry onto a record that
//! already reflects it changes nothing. Recovery then re-queues (or gives
//! up on) every job left CUTTING.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use log::{info, warn};

use super::report::RecoveryReport;
use super::state::TrackedJob;
use crate::archive::JobArchive;
use crate::error::QueueError;
use crate::job::{CutterJob, JobId, JobStatus};
use crate::wal::{WalAction, WalEntry, WriteAheadLog};

/// Outcome of folding WAL entries onto the archive.
pub(crate) struct Reconciled {
    /// QUEUED and CUTTING jobs after replay.
    pub active: HashMap<JobId, TrackedJob>,
    /// Archive records rewritten to match the WAL.
    pub repaired: Vec<JobId>,
}

/// Rebuilds the active job set from the archive plus `entries`, repairing
/// archive records that disagree with the WAL.
pub(crate) fn reconcile(
    archive: &JobArchive,
    entries: &[WalEntry],
) -> Result<Reconciled, QueueError> {
    let mut jobs: HashMap<JobId, TrackedJob> = archive
        .active_jobs()?
        .into_iter()
        .map(|job| (job.job_id.clone(), TrackedJob::new(job, 0)))
        .collect();

    // Archive view of each job before the first entry touching it.
    let mut before: Vec<(JobId, Option<CutterJob>)> = Vec::new();
    let mut seen: HashSet<JobId> = HashSet::new();

    for entry in entries {
        if !jobs.contains_key(&entry.job_id) {
            if let Some(job) = archive.get_job(&entry.job_id)? {
                jobs.insert(entry.job_id.clone(), TrackedJob::new(job, 0));
            }
        }
        if seen.insert(entry.job_id.clone()) {
            before.push((
                entry.job_id.clone(),
                jobs.get(&entry.job_id).map(|t| t.job.clone()),
            ));
        }
        apply_entry(&mut jobs, entry);
    }

    let mut repaired = Vec::new();
    for (job_id, archived) in before {
        let Some(tracked) = jobs.get(&job_id) else {
            continue;
        };
        let stale = archived
            .as_ref()
            .map_or(true, |a| !same_progress(a, &tracked.job));
        if stale {
            archive.archive_job(&tracked.job)?;
            repaired.push(job_id);
        }
    }

    jobs.retain(|_, t| t.job.status.is_active());

    Ok(Reconciled {
        active: jobs,
        repaired,
    })
}

/// Applies one WAL entry to the job map.
fn apply_entry(jobs: &mut HashMap<JobId, TrackedJob>, entry: &WalEntry) {
    match &entry.action {
        WalAction::JobCreated { job } | WalAction::ReprintCreated { job, .. } => {
            jobs.insert(entry.job_id.clone(), TrackedJob::new(job.clone(), 0));
            return;
        }
        _ => {}
    }

    let Some(tracked) = jobs.get_mut(&entry.job_id) else {
        warn!(
            "WAL entry {} ({}) references unknown job {}; skipping",
            entry.sequence,
            entry.kind(),
            entry.job_id
        );
        return;
    };
    let job = &mut tracked.job;

    match &entry.action {
        WalAction::JobQueued {
            queued_at,
            retry_count,
        } => {
            job.status = JobStatus::Queued;
            job.queued_at = Some(*queued_at);
            job.started_at = None;
            job.retry_count = *retry_count;
            if tracked.queue_sequence == 0 {
                tracked.queue_sequence = entry.sequence;
            }
        }
        WalAction::JobCutting { started_at } => job.mark_cutting(*started_at),
        WalAction::JobCompleted { completed_at } => job.mark_complete(*completed_at),
        WalAction::JobFailed {
            failed_at,
            reason,
            retry_count,
            retries_exhausted,
        } => {
            job.retry_count = *retry_count;
            if *retries_exhausted {
                job.started_at = None;
            }
            job.mark_error(reason, *failed_at);
        }
        WalAction::JobCreated { .. } | WalAction::ReprintCreated { .. } => {}
    }
}

/// Compares the fields WAL entries change.
fn same_progress(a: &CutterJob, b: &CutterJob) -> bool {
    a.status == b.status
        && a.queued_at == b.queued_at
        && a.started_at == b.started_at
        && a.completed_at == b.completed_at
        && a.error_message == b.error_message
        && a.retry_count == b.retry_count
}

/// Runs crash recovery. Returns the active jobs the queue should start with.
pub(crate) fn recover(
    wal: &WriteAheadLog,
    archive: &JobArchive,
) -> Result<(HashMap<JobId, TrackedJob>, RecoveryReport), QueueError> {
    let _span = tracing::info_span!("recovery").entered();

    let entries = wal.replay()?;
    let Reconciled {
        mut active,
        repaired,
    } = reconcile(archive, &entries)?;

    let mut report = RecoveryReport::new();
    report.replayed_entries = entries.len();
    for job_id in repaired {
        report.add_repaired(job_id);
    }

    let mut interrupted: Vec<&TrackedJob> = active
        .values()
        .filter(|t| t.job.status == JobStatus::Cutting)
        .collect();
    interrupted.sort_by(|a, b| a.job.started_at.cmp(&b.job.started_at));
    let interrupted: Vec<JobId> = interrupted.iter().map(|t| t.job.job_id.clone()).collect();

    for job_id in interrupted {
        let Some(tracked) = active.get_mut(&job_id) else {
            continue;
        };
        let mut job = tracked.job.clone();
        job.requeue_interrupted();

        if job.retries_exhausted() {
            let now = Utc::now();
            let reason = format!(
                "retries exhausted after {} interrupted cuts",
                job.retry_count
            );
            let failed = WalAction::JobFailed {
                failed_at: now,
                reason: reason.clone(),
                retry_count: job.retry_count,
                retries_exhausted: true,
            };
            job.mark_error(&reason, now);
            log_and_archive(wal, archive, &job, failed)?;
            warn!("Job {} finalized as ERROR: {}", job_id, reason);
            active.remove(&job_id);
            report.add_exhausted(job_id);
        } else {
            let queued_at = *job.queued_at.get_or_insert(job.created_at);
            let queued = WalAction::JobQueued {
                queued_at,
                retry_count: job.retry_count,
            };
            log_and_archive(wal, archive, &job, queued)?;
            info!(
                "Re-queued interrupted job {} (retry {}/{})",
                job_id, job.retry_count, job.max_retries
            );
            tracked.job = job;
            report.add_requeued(job_id);
        }
    }

    info!("Recovery finished: {}", report);
    Ok((active, report))
}

/// Appends `action` and archives `job`, removing the entry again if the
/// archive write fails.
fn log_and_archive(
    wal: &WriteAheadLog,
    archive: &JobArchive,
    job: &CutterJob,
    action: WalAction,
) -> Result<(), QueueError> {
    wal.with_rollback(|| -> Result<(), QueueError> {
        wal.append(&job.job_id, action)?;
        archive.archive_job(job)?;
        Ok(())
    })
}
