//! Test harness for isolated queue execution.
//!
//! Each `TestHarness` owns a temporary directory holding the queue's data
//! directory and the plot files handed to it. Opening the queue twice on the
//! same harness simulates a process restart.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use cutterq::{JobPriority, NewJob, QueueConfig, ResilientCutterQueue, WalActionKind};

/// Test harness providing an isolated data directory for integration tests.
pub struct TestHarness {
    /// Temporary directory containing data/ and plots/.
    temp_dir: TempDir,
    /// Queue data directory (WAL and archive).
    pub data_dir: PathBuf,
    /// Directory the plot files are written to.
    pub plot_dir: PathBuf,
    config: QueueConfig,
}

impl TestHarness {
    /// Create a new harness with default queue settings.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a new harness, letting the caller adjust the queue config.
    pub fn with_config<F: FnOnce(&mut QueueConfig)>(configure: F) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let data_dir = temp_dir.path().join("data");
        let plot_dir = temp_dir.path().join("plots");
        std::fs::create_dir_all(&plot_dir).expect("Failed to create plot directory");

        let mut config = QueueConfig::with_data_dir(&data_dir);
        config.sync_on_append = false;
        config.poll_interval_ms = 10;
        configure(&mut config);

        Self {
            temp_dir,
            data_dir,
            plot_dir,
            config,
        }
    }

    pub fn config(&self) -> QueueConfig {
        self.config.clone()
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Open the queue over the harness data directory.
    pub fn open(&self) -> ResilientCutterQueue {
        ResilientCutterQueue::open(self.config()).expect("Failed to open queue")
    }

    /// Write a plot file and return its path.
    pub fn write_plot(&self, name: &str, content: &str) -> PathBuf {
        let path = self.plot_dir.join(name);
        std::fs::write(&path, content).expect("Failed to write plot file");
        path
    }

    /// Build a request for `order_id` backed by a freshly written plot.
    pub fn job(&self, order_id: &str, priority: JobPriority) -> NewJob {
        let plot = self.write_plot(
            &format!("{}-{}.plt", order_id, next_plot_number()),
            &format!("IN;SP1;PU0,0;PD100,0;LB{};", order_id),
        );
        NewJob::new(order_id, plot).priority(priority)
    }

    /// Add a job and return its id.
    pub fn add(
        &self,
        queue: &ResilientCutterQueue,
        order_id: &str,
        priority: JobPriority,
    ) -> String {
        queue
            .add_job(self.job(order_id, priority))
            .expect("Failed to add job")
            .job_id
    }

    /// Kinds of every WAL entry still in the log, oldest first.
    pub fn wal_kinds(&self, queue: &ResilientCutterQueue) -> Vec<WalActionKind> {
        queue
            .wal()
            .replay()
            .expect("Failed to replay WAL")
            .iter()
            .map(|e| e.kind())
            .collect()
    }
}

impl TestHarness {
    /// Make every archive write fail, the way a full disk or a foreign
    /// lock on `archive.db` would, until `unblock_archive_writes`.
    pub fn block_archive_writes(&self) {
        self.archive_connection()
            .execute_batch(
                "CREATE TRIGGER IF NOT EXISTS offline_insert BEFORE INSERT ON cutter_jobs
                 BEGIN SELECT RAISE(ABORT, 'archive offline'); END;
                 CREATE TRIGGER IF NOT EXISTS offline_update BEFORE UPDATE ON cutter_jobs
                 BEGIN SELECT RAISE(ABORT, 'archive offline'); END;",
            )
            .expect("Failed to block archive writes");
    }

    pub fn unblock_archive_writes(&self) {
        self.archive_connection()
            .execute_batch(
                "DROP TRIGGER IF EXISTS offline_insert;
                 DROP TRIGGER IF EXISTS offline_update;",
            )
            .expect("Failed to unblock archive writes");
    }

    fn archive_connection(&self) -> rusqlite::Connection {
        let conn = rusqlite::Connection::open(self.config.archive_dir().join("archive.db"))
            .expect("Failed to open archive database");
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .expect("Failed to set busy timeout");
        conn
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn next_plot_number() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed).to_string()
}
