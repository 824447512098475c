use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::job::JobPriority;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub version: String,
    /// Root of the persisted state (`wal/` and `archive/`).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Interrupted cuts recovery may re-queue before giving up on a job.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_cutting_speed")]
    pub cutting_speed_cm_per_min: f64,
    /// Default result cap for archive searches.
    #[serde(default = "default_search_limit")]
    pub search_limit: u64,
    #[serde(default = "default_reprint_priority")]
    pub reprint_priority: JobPriority,
    #[serde(default = "default_true")]
    pub sync_on_append: bool,
    /// Physically drop checkpointed WAL entries on every checkpoint.
    #[serde(default = "default_true")]
    pub compact_on_checkpoint: bool,
    /// How long an idle worker waits before polling the queue again.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cutterq")
        .join("data")
}

fn default_max_retries() -> u32 {
    3
}

fn default_cutting_speed() -> f64 {
    50.0
}

fn default_search_limit() -> u64 {
    50
}

fn default_reprint_priority() -> JobPriority {
    JobPriority::High
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            data_dir: default_data_dir(),
            max_retries: default_max_retries(),
            cutting_speed_cm_per_min: default_cutting_speed(),
            search_limit: default_search_limit(),
            reprint_priority: default_reprint_priority(),
            sync_on_append: true,
            compact_on_checkpoint: true,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl QueueConfig {
    /// Default settings rooted at `data_dir`.
    pub fn with_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join("wal")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join("archive")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
