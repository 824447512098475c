//! Permanent job archive.
//!
//! Every job ever created is kept in `archive/archive.db`, keyed by
//! `job_id`, independently of queue membership. Plot files are copied into
//! a content-addressed store next to the database so that a job can be
//! reprinted after its original plot has been moved or deleted.

mod plot_store;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::db::job_repo::{self, JobFilter, JobRow};
use crate::db::Database;
use crate::error::ArchiveError;
use crate::job::{CutterJob, JobPriority, JobStatus, Measurements};

pub use plot_store::{checksum_file, sha256_hex, PlotStore};

const DATABASE_FILE: &str = "archive.db";
const PLOTS_DIR: &str = "plots";

/// Search criteria for [`JobArchive::search_jobs`]. Set fields are ANDed.
#[derive(Debug, Default, Clone)]
pub struct JobSearch {
    pub order_id: Option<String>,
    pub status: Option<JobStatus>,
    /// Inclusive lower bound on `created_at`.
    pub start_date: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub end_date: Option<DateTime<Utc>>,
    /// Falls back to the archive's default search limit.
    pub limit: Option<u64>,
}

impl JobSearch {
    pub fn order(order_id: impl Into<String>) -> Self {
        Self {
            order_id: Some(order_id.into()),
            ..Default::default()
        }
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Queryable store of every job plus preserved plot copies.
pub struct JobArchive {
    db: Database,
    plots: PlotStore,
    default_limit: u64,
}

impl JobArchive {
    /// Opens the archive rooted at `directory` (database and plot store).
    pub fn open(directory: &Path, default_limit: u64) -> Result<Self, ArchiveError> {
        let db = Database::open(&directory.join(DATABASE_FILE))?;
        Ok(Self::new(db, PlotStore::new(directory.join(PLOTS_DIR)), default_limit))
    }

    pub fn new(db: Database, plots: PlotStore, default_limit: u64) -> Self {
        Self {
            db,
            plots,
            default_limit,
        }
    }

    pub fn plot_store(&self) -> &PlotStore {
        &self.plots
    }

    /// Copies `path` into the plot store and returns its checksum.
    pub fn preserve_plot(&self, path: &Path) -> Result<String, ArchiveError> {
        let _span = tracing::info_span!("preserve_plot", path = %path.display()).entered();
        let (checksum, _) = self.plots.preserve(path)?;
        Ok(checksum)
    }

    /// Upserts the full job record. Returns `true` when the record is new.
    ///
    /// A job without a checksum gets its plot preserved first; if the plot
    /// cannot be read the record is still written, without a checksum.
    pub fn archive_job(&self, job: &CutterJob) -> Result<bool, ArchiveError> {
        let created = job_repo::upsert(&self.db, &self.row_for(job))?;
        log::debug!(
            "Archived job {} ({}, {})",
            job.job_id,
            job.status,
            if created { "new" } else { "updated" }
        );
        Ok(created)
    }

    /// Upserts several records in one database transaction: all of them
    /// are written or none is. Returns how many were new.
    pub fn archive_jobs<'a, I>(&self, jobs: I) -> Result<usize, ArchiveError>
    where
        I: IntoIterator<Item = &'a CutterJob>,
    {
        let rows: Vec<JobRow> = jobs.into_iter().map(|job| self.row_for(job)).collect();
        let created = job_repo::upsert_all(&self.db, &rows)?;
        log::debug!("Archived {} jobs ({} new)", rows.len(), created);
        Ok(created)
    }

    fn row_for(&self, job: &CutterJob) -> JobRow {
        let mut checksum = job.checksum_sha256.clone();
        if checksum.is_none() {
            match self.plots.preserve(&job.plt_file) {
                Ok((sum, _)) => checksum = Some(sum),
                Err(e) => log::warn!("Archiving job {} without plot copy: {}", job.job_id, e),
            }
        }

        let preserved = checksum
            .as_deref()
            .map(|sum| self.plots.path_for(sum))
            .filter(|p| p.exists());

        job_to_row(job, checksum, preserved)
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<CutterJob>, ArchiveError> {
        job_repo::find_by_id(&self.db, job_id)?
            .map(row_to_job)
            .transpose()
    }

    /// Archived jobs matching `search`, newest first.
    pub fn search_jobs(&self, search: &JobSearch) -> Result<Vec<CutterJob>, ArchiveError> {
        let filter = JobFilter {
            order_id: search.order_id.clone(),
            status: search.status.map(|s| s.as_str().to_string()),
            from_date: search.start_date.as_ref().map(format_timestamp),
            to_date: search.end_date.as_ref().map(format_timestamp),
            limit: Some(search.limit.unwrap_or(self.default_limit)),
        };
        job_repo::query(&self.db, &filter)?
            .into_iter()
            .map(row_to_job)
            .collect()
    }

    /// Every job of `order_id` in `status`, oldest first.
    pub fn jobs_for_order(
        &self,
        order_id: &str,
        status: JobStatus,
    ) -> Result<Vec<CutterJob>, ArchiveError> {
        job_repo::find_by_order(&self.db, order_id, status.as_str())?
            .into_iter()
            .map(row_to_job)
            .collect()
    }

    /// Records still QUEUED or CUTTING.
    pub fn active_jobs(&self) -> Result<Vec<CutterJob>, ArchiveError> {
        let statuses = [JobStatus::Queued.as_str(), JobStatus::Cutting.as_str()];
        job_repo::find_by_statuses(&self.db, &statuses)?
            .into_iter()
            .map(row_to_job)
            .collect()
    }

    /// Archived job count per status; every status is present.
    pub fn count_by_status(&self) -> Result<BTreeMap<JobStatus, u64>, ArchiveError> {
        let mut counts: BTreeMap<JobStatus, u64> =
            JobStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for (status, count) in job_repo::count_by_status(&self.db)? {
            let status: JobStatus = status.parse().map_err(|e: crate::job::ParseEnumError| {
                ArchiveError::Corrupt {
                    job_id: "*".to_string(),
                    reason: e.to_string(),
                }
            })?;
            counts.insert(status, count);
        }
        Ok(counts)
    }

    /// Returns a plot path whose content matches the job's checksum: the
    /// original file if unchanged, otherwise the preserved copy.
    pub fn locate_plot(&self, job: &CutterJob) -> Result<PathBuf, ArchiveError> {
        let Some(expected) = job.checksum_sha256.as_deref() else {
            // Nothing to verify against.
            checksum_file(&job.plt_file)?;
            return Ok(job.plt_file.clone());
        };

        match self.plots.verify(&job.plt_file, expected) {
            Ok(()) => return Ok(job.plt_file.clone()),
            Err(e) => log::debug!(
                "Original plot for job {} not usable ({}), trying preserved copy",
                job.job_id,
                e
            ),
        }

        let preserved = self.plots.path_for(expected);
        self.plots.verify(&preserved, expected)?;
        Ok(preserved)
    }
}

/// Fixed-width UTC timestamp so stored values sort lexically.
pub(crate) fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(s: &str, job_id: &str) -> Result<DateTime<Utc>, ArchiveError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ArchiveError::Corrupt {
            job_id: job_id.to_string(),
            reason: format!("invalid timestamp '{}': {}", s, e),
        })
}

fn parse_optional_timestamp(
    s: Option<&str>,
    job_id: &str,
) -> Result<Option<DateTime<Utc>>, ArchiveError> {
    s.map(|s| parse_timestamp(s, job_id)).transpose()
}

fn job_to_row(job: &CutterJob, checksum: Option<String>, preserved: Option<PathBuf>) -> JobRow {
    let now = format_timestamp(&Utc::now());
    JobRow {
        job_id: job.job_id.clone(),
        order_id: job.order_id.clone(),
        plt_file: job.plt_file.to_string_lossy().into_owned(),
        preserved_plt: preserved.map(|p| p.to_string_lossy().into_owned()),
        priority: job.priority.as_str().to_string(),
        status: job.status.as_str().to_string(),
        piece_count: job.piece_count,
        fabric_length_cm: job.fabric_length_cm,
        created_at: format_timestamp(&job.created_at),
        queued_at: job.queued_at.as_ref().map(format_timestamp),
        started_at: job.started_at.as_ref().map(format_timestamp),
        completed_at: job.completed_at.as_ref().map(format_timestamp),
        error_message: job.error_message.clone(),
        retry_count: job.retry_count,
        max_retries: job.max_retries,
        checksum_sha256: checksum,
        is_reprint: job.is_reprint,
        original_job_id: job.original_job_id.clone(),
        reprint_reason: job.reprint_reason.clone(),
        requested_by: job.requested_by.clone(),
        measurements: job
            .measurements
            .as_ref()
            .and_then(|m| serde_json::to_string(m).ok()),
        archived_at: now.clone(),
        updated_at: now,
    }
}

fn row_to_job(row: JobRow) -> Result<CutterJob, ArchiveError> {
    let id = row.job_id.as_str();
    let corrupt = |reason: String| ArchiveError::Corrupt {
        job_id: row.job_id.clone(),
        reason,
    };

    let measurements = row
        .measurements
        .as_deref()
        .map(serde_json::from_str::<Measurements>)
        .transpose()
        .map_err(|e| corrupt(format!("invalid measurements: {}", e)))?;

    Ok(CutterJob {
        priority: row
            .priority
            .parse::<JobPriority>()
            .map_err(|e| corrupt(format!("{}", e)))?,
        status: row
            .status
            .parse::<JobStatus>()
            .map_err(|e| corrupt(format!("{}", e)))?,
        created_at: parse_timestamp(&row.created_at, id)?,
        queued_at: parse_optional_timestamp(row.queued_at.as_deref(), id)?,
        started_at: parse_optional_timestamp(row.started_at.as_deref(), id)?,
        completed_at: parse_optional_timestamp(row.completed_at.as_deref(), id)?,
        job_id: row.job_id.clone(),
        order_id: row.order_id,
        plt_file: PathBuf::from(row.plt_file),
        piece_count: row.piece_count,
        fabric_length_cm: row.fabric_length_cm,
        error_message: row.error_message,
        retry_count: row.retry_count,
        max_retries: row.max_retries,
        checksum_sha256: row.checksum_sha256,
        is_reprint: row.is_reprint,
        original_job_id: row.original_job_id,
        reprint_reason: row.reprint_reason,
        requested_by: row.requested_by,
        measurements,
    })
}
