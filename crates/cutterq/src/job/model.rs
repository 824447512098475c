use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{JobId, JobPriority, JobStatus};
use crate::error::QueueError;

/// Named body measurements (cm) carried through from the producer.
pub type Measurements = BTreeMap<String, f64>;

/// Producer-side request for a new cutting job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub order_id: String,
    pub plt_file: PathBuf,
    pub priority: JobPriority,
    pub piece_count: u32,
    pub fabric_length_cm: f64,
    pub measurements: Option<Measurements>,
}

impl NewJob {
    pub fn new(order_id: impl Into<String>, plt_file: impl Into<PathBuf>) -> Self {
        Self {
            order_id: order_id.into(),
            plt_file: plt_file.into(),
            priority: JobPriority::Normal,
            piece_count: 0,
            fabric_length_cm: 0.0,
            measurements: None,
        }
    }

    pub fn priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn piece_count(mut self, piece_count: u32) -> Self {
        self.piece_count = piece_count;
        self
    }

    pub fn fabric_length_cm(mut self, fabric_length_cm: f64) -> Self {
        self.fabric_length_cm = fabric_length_cm;
        self
    }

    pub fn measurements(mut self, measurements: Measurements) -> Self {
        self.measurements = Some(measurements);
        self
    }
}

/// A unit of cutting work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutterJob {
    /// Unique job identifier (UUID v4).
    pub job_id: JobId,
    /// Originating production order. Shared by multi-piece and reprinted jobs.
    pub order_id: String,
    /// Cut-ready plot file.
    pub plt_file: PathBuf,
    pub priority: JobPriority,
    pub status: JobStatus,
    #[serde(default)]
    pub piece_count: u32,
    #[serde(default)]
    pub fabric_length_cm: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Set only when the job ends in `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Interrupted cuts re-queued by crash recovery.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub max_retries: u32,
    /// Hex SHA-256 of the plot content, recorded at archival time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_sha256: Option<String>,
    #[serde(default)]
    pub is_reprint: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reprint_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurements: Option<Measurements>,
}

impl CutterJob {
    /// Builds a fresh job in `Queued` state. `queued_at` is stamped by the
    /// queue when the job is actually enqueued.
    pub fn new(request: NewJob, max_retries: u32) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            order_id: request.order_id,
            plt_file: request.plt_file,
            priority: request.priority,
            status: JobStatus::Queued,
            piece_count: request.piece_count,
            fabric_length_cm: request.fabric_length_cm,
            created_at: Utc::now(),
            queued_at: None,
            started_at: None,
            completed_at: None,
            error_message: None,
            retry_count: 0,
            max_retries,
            checksum_sha256: None,
            is_reprint: false,
            original_job_id: None,
            reprint_reason: None,
            requested_by: None,
            measurements: request.measurements,
        }
    }

    /// Builds a new job that re-cuts `original` from `plt_file`.
    pub fn reprint_of(
        original: &CutterJob,
        plt_file: PathBuf,
        priority: JobPriority,
        reason: &str,
        requested_by: &str,
        max_retries: u32,
    ) -> Self {
        let request = NewJob {
            order_id: original.order_id.clone(),
            plt_file,
            priority,
            piece_count: original.piece_count,
            fabric_length_cm: original.fabric_length_cm,
            measurements: original.measurements.clone(),
        };

        Self {
            checksum_sha256: original.checksum_sha256.clone(),
            is_reprint: true,
            original_job_id: Some(original.job_id.clone()),
            reprint_reason: Some(reason.to_string()),
            requested_by: Some(requested_by.to_string()),
            ..Self::new(request, max_retries)
        }
    }

    /// Serializes the job into a JSON object.
    pub fn to_dict(&self) -> serde_json::Value {
        // Every field is a plain string, number, bool or map, so this cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Rebuilds a job from a JSON object produced by [`CutterJob::to_dict`].
    pub fn from_dict(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Returns `InvalidTransition` unless the job is in `expected` state.
    pub fn ensure_status(
        &self,
        expected: JobStatus,
        action: &'static str,
    ) -> Result<(), QueueError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(QueueError::InvalidTransition {
                job_id: self.job_id.clone(),
                status: self.status,
                action,
            })
        }
    }

    pub fn mark_queued(&mut self, at: DateTime<Utc>) {
        self.status = JobStatus::Queued;
        if self.queued_at.is_none() {
            self.queued_at = Some(at);
        }
    }

    pub fn mark_cutting(&mut self, at: DateTime<Utc>) {
        self.status = JobStatus::Cutting;
        self.started_at = Some(at);
    }

    pub fn mark_complete(&mut self, at: DateTime<Utc>) {
        self.status = JobStatus::Complete;
        self.completed_at = Some(at);
    }

    pub fn mark_error(&mut self, reason: &str, at: DateTime<Utc>) {
        self.status = JobStatus::Error;
        self.error_message = Some(reason.to_string());
        self.completed_at = Some(at);
    }

    /// Puts an interrupted cut back in line. Keeps `queued_at` so the job
    /// resumes at its original position within its priority class.
    pub fn requeue_interrupted(&mut self) {
        self.status = JobStatus::Queued;
        self.started_at = None;
        self.retry_count += 1;
    }

    /// True once crash recovery has re-queued this job more than allowed.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count > self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> NewJob {
        NewJob::new("ORD-1", "/plots/ord-1.plt")
            .priority(JobPriority::High)
            .piece_count(7)
            .fabric_length_cm(182.5)
    }

    #[test]
    fn test_new_job_defaults() {
        let job = CutterJob::new(sample_request(), 3);
        assert!(!job.job_id.is_empty());
        assert_eq!(job.order_id, "ORD-1");
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.priority, JobPriority::High);
        assert_eq!(job.piece_count, 7);
        assert_eq!(job.max_retries, 3);
        assert!(job.queued_at.is_none());
        assert!(job.started_at.is_none());
        assert!(!job.is_reprint);
        assert!(job.original_job_id.is_none());
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = CutterJob::new(sample_request(), 3);
        let b = CutterJob::new(sample_request(), 3);
        assert_ne!(a.job_id, b.job_id);
    }

    #[test]
    fn test_dict_round_trip_with_optional_fields() {
        let mut measurements = Measurements::new();
        measurements.insert("chest".to_string(), 98.5);
        measurements.insert("waist".to_string(), 84.0);

        let mut job = CutterJob::new(sample_request().measurements(measurements), 3);
        let now = Utc::now();
        job.mark_queued(now);
        job.mark_cutting(now);
        job.mark_error("blade jam", now);
        job.checksum_sha256 = Some("ab".repeat(32));

        let dict = job.to_dict();
        assert_eq!(dict["status"], "ERROR");
        assert_eq!(dict["priority"], "HIGH");

        let restored = CutterJob::from_dict(dict).unwrap();
        assert_eq!(restored, job);
    }

    #[test]
    fn test_dict_round_trip_minimal() {
        let job = CutterJob::new(NewJob::new("ORD-2", "/plots/a.plt"), 0);
        let dict = job.to_dict();
        assert!(dict.get("queued_at").is_none());
        assert!(dict.get("error_message").is_none());
        assert_eq!(CutterJob::from_dict(dict).unwrap(), job);
    }

    #[test]
    fn test_from_dict_rejects_unknown_priority() {
        let mut dict = CutterJob::new(sample_request(), 3).to_dict();
        dict["priority"] = serde_json::json!("URGENT");
        assert!(CutterJob::from_dict(dict).is_err());
    }

    #[test]
    fn test_reprint_of_copies_order_and_metrics() {
        let mut original = CutterJob::new(sample_request(), 3);
        original.checksum_sha256 = Some("cd".repeat(32));
        original.mark_complete(Utc::now());

        let reprint = CutterJob::reprint_of(
            &original,
            PathBuf::from("/archive/plots/x.plt"),
            JobPriority::Rush,
            "fabric flaw",
            "operator-7",
            3,
        );

        assert_ne!(reprint.job_id, original.job_id);
        assert!(reprint.is_reprint);
        assert_eq!(reprint.original_job_id.as_deref(), Some(original.job_id.as_str()));
        assert_eq!(reprint.order_id, original.order_id);
        assert_eq!(reprint.priority, JobPriority::Rush);
        assert_eq!(reprint.status, JobStatus::Queued);
        assert_eq!(reprint.checksum_sha256, original.checksum_sha256);
        assert_eq!(reprint.piece_count, original.piece_count);
        assert_eq!(reprint.reprint_reason.as_deref(), Some("fabric flaw"));
        assert_eq!(reprint.requested_by.as_deref(), Some("operator-7"));
        assert!(reprint.completed_at.is_none());
    }

    #[test]
    fn test_ensure_status() {
        let job = CutterJob::new(sample_request(), 3);
        assert!(job.ensure_status(JobStatus::Queued, "claim").is_ok());
        match job.ensure_status(JobStatus::Cutting, "complete") {
            Err(QueueError::InvalidTransition { status, action, .. }) => {
                assert_eq!(status, JobStatus::Queued);
                assert_eq!(action, "complete");
            }
            other => panic!("Expected InvalidTransition, got {:?}", other),
        }
    }

    #[test]
    fn test_requeue_interrupted_keeps_queue_position() {
        let mut job = CutterJob::new(sample_request(), 1);
        let queued = Utc::now();
        job.mark_queued(queued);
        job.mark_cutting(Utc::now());

        job.requeue_interrupted();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.queued_at, Some(queued));
        assert!(job.started_at.is_none());
        assert_eq!(job.retry_count, 1);
        assert!(!job.retries_exhausted());

        job.mark_cutting(Utc::now());
        job.requeue_interrupted();
        assert!(job.retries_exhausted());
    }
}
