use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, info};

use super::device::CutterDevice;
use crate::error::WorkerError;
use crate::job::CutterJob;
use crate::queue::ResilientCutterQueue;

/// Result of one polling step.
#[derive(Debug, Clone, PartialEq)]
pub enum CutOutcome {
    /// Nothing was queued.
    Idle,
    Completed(CutterJob),
    Failed(CutterJob),
}

/// Counters returned when a spawned worker stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub failed: u64,
    /// Queue errors (WAL or archive) hit while polling.
    pub errors: u64,
}

/// Drives one cutter from the queue: claim, cut, record the outcome.
pub struct CutterWorker<D: CutterDevice> {
    queue: Arc<ResilientCutterQueue>,
    device: D,
    name: String,
}

impl<D: CutterDevice> CutterWorker<D> {
    pub fn new(queue: Arc<ResilientCutterQueue>, device: D) -> Self {
        Self {
            queue,
            device,
            name: "cutter-0".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Claims at most one job and resolves it before returning.
    pub fn run_once(&mut self) -> Result<CutOutcome, WorkerError> {
        let Some(job) = self.queue.get_next_job()? else {
            return Ok(CutOutcome::Idle);
        };

        debug!("{} cutting job {} ({})", self.name, job.job_id, job.plt_file.display());
        match self.device.cut(&job) {
            Ok(()) => Ok(CutOutcome::Completed(self.queue.mark_complete(&job.job_id)?)),
            Err(reason) => Ok(CutOutcome::Failed(
                self.queue.mark_failed(&job.job_id, &reason)?,
            )),
        }
    }
}

impl<D: CutterDevice + 'static> CutterWorker<D> {
    /// Runs the poll loop on its own thread until the handle shuts it down.
    pub fn spawn(self) -> Result<WorkerHandle, WorkerError> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let poll_interval = self.queue.config().poll_interval();

        let thread = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run_worker(self, shutdown_rx, poll_interval))
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            thread,
        })
    }
}

/// Handle to a spawned [`CutterWorker`].
pub struct WorkerHandle {
    shutdown: Sender<()>,
    thread: JoinHandle<WorkerStats>,
}

impl WorkerHandle {
    /// Signals the worker and waits for it. A cut in progress finishes first.
    pub fn shutdown(self) -> Result<WorkerStats, WorkerError> {
        let _ = self.shutdown.try_send(());
        self.thread.join().map_err(|_| WorkerError::Panicked)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

fn run_worker<D: CutterDevice>(
    mut worker: CutterWorker<D>,
    shutdown: Receiver<()>,
    poll_interval: Duration,
) -> WorkerStats {
    info!("Cutter worker {} started", worker.name);
    let mut stats = WorkerStats::default();

    loop {
        let idle = match worker.run_once() {
            Ok(CutOutcome::Idle) => true,
            Ok(CutOutcome::Completed(_)) => {
                stats.completed += 1;
                false
            }
            Ok(CutOutcome::Failed(_)) => {
                stats.failed += 1;
                false
            }
            Err(e) => {
                error!("Cutter worker {} error: {}", worker.name, e);
                stats.errors += 1;
                true
            }
        };

        let stop = if idle {
            match shutdown.recv_timeout(poll_interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
                Err(RecvTimeoutError::Timeout) => false,
            }
        } else {
            match shutdown.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => true,
                Err(TryRecvError::Empty) => false,
            }
        };

        if stop {
            break;
        }
    }

    info!(
        "Cutter worker {} stopped ({} completed, {} failed)",
        worker.name, stats.completed, stats.failed
    );
    stats
}
