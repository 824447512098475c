use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Job identifiers are UUID v4 strings.
pub type JobId = String;

/// Error returned when a stored priority or status string is not recognized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Scheduling class of a job. Ordered `Rush > High > Normal > Low`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPriority {
    Rush,
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    pub const ALL: [JobPriority; 4] = [
        JobPriority::Rush,
        JobPriority::High,
        JobPriority::Normal,
        JobPriority::Low,
    ];

    /// Numeric rank; higher is served first.
    pub fn rank(self) -> u8 {
        match self {
            JobPriority::Rush => 4,
            JobPriority::High => 3,
            JobPriority::Normal => 2,
            JobPriority::Low => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobPriority::Rush => "RUSH",
            JobPriority::High => "HIGH",
            JobPriority::Normal => "NORMAL",
            JobPriority::Low => "LOW",
        }
    }
}

impl PartialOrd for JobPriority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JobPriority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobPriority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RUSH" => Ok(JobPriority::Rush),
            "HIGH" => Ok(JobPriority::High),
            "NORMAL" => Ok(JobPriority::Normal),
            "LOW" => Ok(JobPriority::Low),
            _ => Err(ParseEnumError {
                kind: "priority",
                value: s.to_string(),
            }),
        }
    }
}

/// Lifecycle status of a job.
///
/// `Queued` is initial, `Cutting` means claimed by the cutter, and
/// `Complete` / `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Cutting,
    Complete,
    Error,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Cutting,
        JobStatus::Complete,
        JobStatus::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Cutting => "CUTTING",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Error => "ERROR",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }

    /// Queued or cutting: still part of the live queue.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(JobStatus::Queued),
            "CUTTING" => Ok(JobStatus::Cutting),
            "COMPLETE" => Ok(JobStatus::Complete),
            "ERROR" => Ok(JobStatus::Error),
            _ => Err(ParseEnumError {
                kind: "status",
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(JobPriority::Rush > JobPriority::High);
        assert!(JobPriority::High > JobPriority::Normal);
        assert!(JobPriority::Normal > JobPriority::Low);

        let mut all = vec![
            JobPriority::Low,
            JobPriority::Rush,
            JobPriority::Normal,
            JobPriority::High,
        ];
        all.sort();
        assert_eq!(
            all,
            vec![
                JobPriority::Low,
                JobPriority::Normal,
                JobPriority::High,
                JobPriority::Rush
            ]
        );
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("rush".parse::<JobPriority>().unwrap(), JobPriority::Rush);
        assert_eq!("LOW".parse::<JobPriority>().unwrap(), JobPriority::Low);
        let err = "urgent".parse::<JobPriority>().unwrap_err();
        assert_eq!(err.kind, "priority");
        assert_eq!(err.value, "urgent");
    }

    #[test]
    fn test_status_parse_and_display() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
            assert_eq!(status.to_string(), status.as_str());
        }
        assert!("DONE".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_status_terminal() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Cutting.is_terminal());
        assert!(JobStatus::Complete.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(JobStatus::Cutting.is_active());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&JobPriority::Rush).unwrap(),
            "\"RUSH\""
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::Complete).unwrap(),
            "\"COMPLETE\""
        );
    }
}
