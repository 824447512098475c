pub mod archive;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod job;
pub mod logging;
pub mod queue;
pub mod wal;
pub mod worker;

pub use archive::{JobArchive, JobSearch};
pub use broadcast::{QueueEvent, QueueEventBroadcaster};
pub use config::{load_config, load_config_from_str, QueueConfig};
pub use error::{
    ArchiveError, ConfigError, CutterQueueError, LoggingError, QueueError, Result, WalError,
    WorkerError,
};
pub use job::{CutterJob, JobId, JobPriority, JobStatus, Measurements, NewJob};
pub use logging::{init_logging, LogFormat};
pub use queue::{QueueStatus, RecoveryReport, ResilientCutterQueue};
pub use wal::{WalAction, WalActionKind, WalEntry, WriteAheadLog};
pub use worker::{CutOutcome, CutterDevice, CutterWorker, WorkerHandle, WorkerStats};
