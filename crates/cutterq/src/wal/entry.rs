//! WAL entry types and line framing.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WalError;
use crate::job::{CutterJob, JobId};

/// The fixed set of state-changing actions recorded in the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalActionKind {
    JobCreated,
    JobQueued,
    JobCutting,
    JobCompleted,
    JobFailed,
    ReprintCreated,
}

impl WalActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WalActionKind::JobCreated => "JOB_CREATED",
            WalActionKind::JobQueued => "JOB_QUEUED",
            WalActionKind::JobCutting => "JOB_CUTTING",
            WalActionKind::JobCompleted => "JOB_COMPLETED",
            WalActionKind::JobFailed => "JOB_FAILED",
            WalActionKind::ReprintCreated => "REPRINT_CREATED",
        }
    }
}

impl fmt::Display for WalActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action together with exactly the data replay needs for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalAction {
    /// Full snapshot of a freshly created job.
    JobCreated { job: CutterJob },
    /// Job entered (or re-entered) the queue.
    JobQueued {
        queued_at: DateTime<Utc>,
        retry_count: u32,
    },
    JobCutting { started_at: DateTime<Utc> },
    JobCompleted { completed_at: DateTime<Utc> },
    JobFailed {
        failed_at: DateTime<Utc>,
        reason: String,
        /// Retry count the job ends with.
        retry_count: u32,
        /// Set when recovery gave up after too many interrupted cuts.
        #[serde(default)]
        retries_exhausted: bool,
    },
    /// Full snapshot of a reprint job.
    ReprintCreated {
        job: CutterJob,
        original_job_id: JobId,
        reason: String,
        requested_by: String,
    },
}

impl WalAction {
    pub fn kind(&self) -> WalActionKind {
        match self {
            WalAction::JobCreated { .. } => WalActionKind::JobCreated,
            WalAction::JobQueued { .. } => WalActionKind::JobQueued,
            WalAction::JobCutting { .. } => WalActionKind::JobCutting,
            WalAction::JobCompleted { .. } => WalActionKind::JobCompleted,
            WalAction::JobFailed { .. } => WalActionKind::JobFailed,
            WalAction::ReprintCreated { .. } => WalActionKind::ReprintCreated,
        }
    }
}

/// One durable WAL record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    pub sequence: u64,
    pub job_id: JobId,
    pub timestamp: DateTime<Utc>,
    pub action: WalAction,
}

impl WalEntry {
    pub fn kind(&self) -> WalActionKind {
        self.action.kind()
    }

    /// Encodes the entry as `<crc32 hex> <json>\n`.
    pub(crate) fn to_line(&self) -> Result<String, WalError> {
        let json = serde_json::to_string(self)?;
        let crc = crc32fast::hash(json.as_bytes());
        Ok(format!("{:08x} {}\n", crc, json))
    }

    /// Decodes a line (without its trailing newline).
    pub(crate) fn from_line(line: &str) -> Result<Self, String> {
        let (crc_hex, json) = line
            .split_once(' ')
            .ok_or_else(|| "missing checksum separator".to_string())?;
        let expected =
            u32::from_str_radix(crc_hex, 16).map_err(|e| format!("bad checksum field: {}", e))?;
        let actual = crc32fast::hash(json.as_bytes());
        if expected != actual {
            return Err(format!(
                "checksum mismatch (stored {:08x}, computed {:08x})",
                expected, actual
            ));
        }
        serde_json::from_str(json).map_err(|e| format!("invalid entry JSON: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::NewJob;

    fn entry(sequence: u64, action: WalAction) -> WalEntry {
        WalEntry {
            sequence,
            job_id: "job-1".to_string(),
            timestamp: Utc::now(),
            action,
        }
    }

    #[test]
    fn test_line_round_trip() {
        let job = CutterJob::new(NewJob::new("ORD-1", "/plots/a.plt"), 3);
        let original = entry(1, WalAction::JobCreated { job });
        let line = original.to_line().unwrap();
        assert!(line.ends_with('\n'));

        let decoded = WalEntry::from_line(line.trim_end_matches('\n')).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.kind(), WalActionKind::JobCreated);
    }

    #[test]
    fn test_tampered_line_rejected() {
        let original = entry(
            4,
            WalAction::JobFailed {
                failed_at: Utc::now(),
                reason: "blade jam".to_string(),
                retry_count: 0,
                retries_exhausted: false,
            },
        );
        let line = original.to_line().unwrap().replace("blade jam", "blade ok!");
        let err = WalEntry::from_line(line.trim_end()).unwrap_err();
        assert!(err.contains("checksum mismatch"));
    }

    #[test]
    fn test_missing_separator_rejected() {
        assert!(WalEntry::from_line("deadbeef").is_err());
        assert!(WalEntry::from_line("zzzzzzzz {}").is_err());
    }

    #[test]
    fn test_action_schema_is_tagged() {
        let e = entry(
            2,
            WalAction::JobCutting {
                started_at: Utc::now(),
            },
        );
        let value = serde_json::to_value(&e).unwrap();
        assert_eq!(value["action"]["type"], "JOB_CUTTING");
        assert!(value["action"]["payload"]["started_at"].is_string());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(WalActionKind::ReprintCreated.to_string(), "REPRINT_CREATED");
        assert_eq!(WalActionKind::JobQueued.as_str(), "JOB_QUEUED");
    }
}
