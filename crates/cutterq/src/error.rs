use std::path::PathBuf;
use thiserror::Error;

use crate::job::{JobId, JobStatus};

#[derive(Error, Debug)]
pub enum CutterQueueError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum WalError {
    #[error("WAL IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize WAL entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("WAL corrupted at line {line}: {reason}")]
    Corruption { line: usize, reason: String },

    #[error("Cannot roll WAL back to sequence {sequence}: {reason}")]
    Rollback { sequence: u64, reason: String },

    #[error("WAL at '{path}' is locked by another process")]
    Locked { path: PathBuf },

    #[error("WAL lock poisoned")]
    LockPoisoned,
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archive database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Failed to read plot file '{path}': {source}")]
    PlotRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write preserved plot '{path}': {source}")]
    PlotWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checksum mismatch for '{path}': expected {expected}, found {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Archived record for job {job_id} is unreadable: {reason}")]
    Corrupt { job_id: String, reason: String },
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Cannot {action} job {job_id}: job is {status}")]
    InvalidTransition {
        job_id: JobId,
        status: JobStatus,
        action: &'static str,
    },

    #[error("Plot file for job {job_id} is unavailable: {reason}")]
    PlotUnavailable { job_id: JobId, reason: String },

    #[error("Queue lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Wal(#[from] WalError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker thread panicked")]
    Panicked,

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

pub type Result<T> = std::result::Result<T, CutterQueueError>;
