//! Job repository: upsert and query operations on the `cutter_jobs` table.

use rusqlite::{params, Row, Transaction};

use super::{Database, DatabaseError};

/// A raw archived job row. Timestamps are fixed-width RFC 3339 strings so
/// they compare correctly as text.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub job_id: String,
    pub order_id: String,
    pub plt_file: String,
    pub preserved_plt: Option<String>,
    pub priority: String,
    pub status: String,
    pub piece_count: u32,
    pub fabric_length_cm: f64,
    pub created_at: String,
    pub queued_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub checksum_sha256: Option<String>,
    pub is_reprint: bool,
    pub original_job_id: Option<String>,
    pub reprint_reason: Option<String>,
    pub requested_by: Option<String>,
    /// JSON object of named measurements.
    pub measurements: Option<String>,
    pub archived_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            order_id: row.get("order_id")?,
            plt_file: row.get("plt_file")?,
            preserved_plt: row.get("preserved_plt")?,
            priority: row.get("priority")?,
            status: row.get("status")?,
            piece_count: row.get("piece_count")?,
            fabric_length_cm: row.get("fabric_length_cm")?,
            created_at: row.get("created_at")?,
            queued_at: row.get("queued_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            error_message: row.get("error_message")?,
            retry_count: row.get("retry_count")?,
            max_retries: row.get("max_retries")?,
            checksum_sha256: row.get("checksum_sha256")?,
            is_reprint: row.get("is_reprint")?,
            original_job_id: row.get("original_job_id")?,
            reprint_reason: row.get("reprint_reason")?,
            requested_by: row.get("requested_by")?,
            measurements: row.get("measurements")?,
            archived_at: row.get("archived_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Query filter for archive searches. All set fields are ANDed.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub order_id: Option<String>,
    pub status: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub from_date: Option<String>,
    /// Inclusive upper bound on `created_at`.
    pub to_date: Option<String>,
    pub limit: Option<u64>,
}

/// Inserts the row, or overwrites every column except `job_id`,
/// `created_at` and `archived_at` if it already exists.
/// Returns `true` when a new row was created.
pub fn upsert(db: &Database, job: &JobRow) -> Result<bool, DatabaseError> {
    db.with_tx(|tx| upsert_in(tx, job))
}

/// Upserts every row in one transaction; either all are written or none.
/// Returns how many rows were new.
pub fn upsert_all(db: &Database, jobs: &[JobRow]) -> Result<usize, DatabaseError> {
    db.with_tx(|tx| {
        let mut created = 0;
        for job in jobs {
            if upsert_in(tx, job)? {
                created += 1;
            }
        }
        Ok(created)
    })
}

fn upsert_in(tx: &Transaction<'_>, job: &JobRow) -> Result<bool, DatabaseError> {
    let existed: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM cutter_jobs WHERE job_id = ?1)",
        params![job.job_id],
        |r| r.get(0),
    )?;

    tx.execute(
        "INSERT INTO cutter_jobs (job_id, order_id, plt_file, preserved_plt, priority, status,
         piece_count, fabric_length_cm, created_at, queued_at, started_at, completed_at,
         error_message, retry_count, max_retries, checksum_sha256, is_reprint,
         original_job_id, reprint_reason, requested_by, measurements, archived_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                 ?18, ?19, ?20, ?21, ?22, ?23)
         ON CONFLICT(job_id) DO UPDATE SET
            order_id=excluded.order_id, plt_file=excluded.plt_file,
            preserved_plt=COALESCE(excluded.preserved_plt, cutter_jobs.preserved_plt),
            priority=excluded.priority, status=excluded.status,
            piece_count=excluded.piece_count, fabric_length_cm=excluded.fabric_length_cm,
            queued_at=excluded.queued_at, started_at=excluded.started_at,
            completed_at=excluded.completed_at, error_message=excluded.error_message,
            retry_count=excluded.retry_count, max_retries=excluded.max_retries,
            checksum_sha256=COALESCE(excluded.checksum_sha256, cutter_jobs.checksum_sha256),
            is_reprint=excluded.is_reprint, original_job_id=excluded.original_job_id,
            reprint_reason=excluded.reprint_reason, requested_by=excluded.requested_by,
            measurements=excluded.measurements, updated_at=excluded.updated_at",
        params![
            job.job_id,
            job.order_id,
            job.plt_file,
            job.preserved_plt,
            job.priority,
            job.status,
            job.piece_count,
            job.fabric_length_cm,
            job.created_at,
            job.queued_at,
            job.started_at,
            job.completed_at,
            job.error_message,
            job.retry_count,
            job.max_retries,
            job.checksum_sha256,
            job.is_reprint,
            job.original_job_id,
            job.reprint_reason,
            job.requested_by,
            job.measurements,
            job.archived_at,
            job.updated_at,
        ],
    )?;

    Ok(!existed)
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, job_id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM cutter_jobs WHERE job_id = ?1")?;
        let mut rows = stmt.query_map(params![job_id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Queries jobs with filters, newest first, bounded by `filter.limit`
/// (100 when unset).
pub fn query(db: &Database, filter: &JobFilter) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref order_id) = filter.order_id {
            conditions.push(format!("order_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(order_id.clone()));
        }
        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }
        if let Some(ref from_date) = filter.from_date {
            conditions.push(format!("created_at >= ?{}", param_values.len() + 1));
            param_values.push(Box::new(from_date.clone()));
        }
        if let Some(ref to_date) = filter.to_date {
            conditions.push(format!("created_at <= ?{}", param_values.len() + 1));
            param_values.push(Box::new(to_date.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        // SQLite reads a negative LIMIT as unbounded.
        let limit = i64::try_from(filter.limit.unwrap_or(100)).unwrap_or(i64::MAX);
        param_values.push(Box::new(limit));
        let sql = format!(
            "SELECT * FROM cutter_jobs {} ORDER BY created_at DESC, job_id LIMIT ?{}",
            where_clause,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// All jobs of an order with the given status, oldest first. Unbounded.
pub fn find_by_order(
    db: &Database,
    order_id: &str,
    status: &str,
) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM cutter_jobs WHERE order_id = ?1 AND status = ?2
             ORDER BY created_at ASC, job_id",
        )?;
        let rows = stmt
            .query_map(params![order_id, status], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// All jobs whose status is one of `statuses`, in creation order.
pub fn find_by_statuses(db: &Database, statuses: &[&str]) -> Result<Vec<JobRow>, DatabaseError> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }
    db.with_conn(|conn| {
        let placeholders: Vec<String> = (1..=statuses.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT * FROM cutter_jobs WHERE status IN ({}) ORDER BY created_at ASC, job_id",
            placeholders.join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(statuses.iter()), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Number of archived jobs per status string.
pub fn count_by_status(db: &Database) -> Result<Vec<(String, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM cutter_jobs GROUP BY status ORDER BY status")?;
        let counts = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    })
}
