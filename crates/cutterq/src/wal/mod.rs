//! Write-Ahead Log (WAL) for durability and crash recovery.
//!
//! Every queue state transition is appended here, and fsync'd, before it is
//! applied to the archive or the in-memory queue. On restart the log is
//! replayed to restore jobs that were in flight when the process stopped.
//!
//! # Record Format
//!
//! One entry per line, framed with a CRC32 of the JSON body:
//! ```text
//! 1f3a9c02 {"sequence":7,"job_id":"…","timestamp":"…","action":{"type":"JOB_CUTTING","payload":{…}}}
//! ```
//!
//! A line without its terminating newline, or whose checksum does not match,
//! at the very end of the file is a write torn by a crash and is discarded
//! on open. Anywhere else it is reported as corruption.
//!
//! # Checkpoints
//!
//! `checkpoint(n)` records, in `checkpoint.json`, that entries up to `n` are
//! reflected in the archive. Replay skips them; `compact()` removes them
//! from disk.

mod entry;
mod writer;

pub use entry::{WalAction, WalActionKind, WalEntry};
pub use writer::{WalConfig, WriteAheadLog};
