//! Append-only, fsync'd log file with logical checkpoints and compaction.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use super::entry::{WalAction, WalEntry};
use crate::error::WalError;

const LOG_FILE: &str = "wal.log";
const LOCK_FILE: &str = "wal.lock";
const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Configuration for opening a WAL.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory holding the log, lock and checkpoint marker.
    pub directory: PathBuf,
    /// Whether to fsync after each append.
    pub sync_on_append: bool,
}

impl WalConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            sync_on_append: true,
        }
    }

    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync_on_append = sync;
        self
    }
}

/// Persisted checkpoint marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointMarker {
    through_sequence: u64,
    checkpointed_at: DateTime<Utc>,
}

struct WalInner {
    log: File,
    next_sequence: u64,
    checkpointed_through: u64,
    /// Bumped whenever compaction replaces the log file.
    generation: u64,
}

/// Log position captured by [`WriteAheadLog::with_rollback`].
#[derive(Debug, Clone, Copy)]
struct WalMark {
    len: u64,
    next_sequence: u64,
    generation: u64,
}

/// Write-ahead log for queue state transitions.
///
/// Entries are numbered from 1 without gaps. A second process opening the
/// same directory fails with [`WalError::Locked`] while this handle lives.
pub struct WriteAheadLog {
    directory: PathBuf,
    sync_on_append: bool,
    inner: Mutex<WalInner>,
    // Held for the lifetime of the handle; the OS drops the lock on close.
    _lock: File,
}

/// Result of scanning the raw log bytes.
struct Scan {
    entries: Vec<WalEntry>,
    /// Byte length of the valid prefix.
    valid_len: u64,
    /// Set when a torn trailing write was found.
    torn_tail: Option<String>,
}

impl WriteAheadLog {
    /// Opens (or creates) the WAL, discarding a torn trailing write if the
    /// previous process died mid-append.
    pub fn open(config: WalConfig) -> Result<Self, WalError> {
        let directory = config.directory.clone();
        std::fs::create_dir_all(&directory).map_err(|e| WalError::Io {
            path: directory.clone(),
            source: e,
        })?;

        let lock_path = directory.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| WalError::Io {
                path: lock_path.clone(),
                source: e,
            })?;
        lock.try_lock_exclusive()
            .map_err(|_| WalError::Locked { path: lock_path })?;

        let checkpointed_through = read_checkpoint(&directory)?
            .map(|m| m.through_sequence)
            .unwrap_or(0);

        let log_path = directory.join(LOG_FILE);
        let mut log = open_log(&log_path)?;
        let scan = scan_file(&mut log, &log_path)?;

        if let Some(reason) = &scan.torn_tail {
            warn!(
                "Discarding torn WAL tail in {} ({}); truncating to {} bytes",
                log_path.display(),
                reason,
                scan.valid_len
            );
            log.set_len(scan.valid_len)
                .and_then(|_| log.sync_all())
                .map_err(|e| WalError::Io {
                    path: log_path.clone(),
                    source: e,
                })?;
        }

        let last_logged = scan.entries.last().map(|e| e.sequence).unwrap_or(0);
        let next_sequence = last_logged.max(checkpointed_through) + 1;

        info!(
            "WAL opened at {} ({} entries, checkpointed through {}, next sequence {})",
            directory.display(),
            scan.entries.len(),
            checkpointed_through,
            next_sequence
        );

        Ok(Self {
            directory,
            sync_on_append: config.sync_on_append,
            inner: Mutex::new(WalInner {
                log,
                next_sequence,
                checkpointed_through,
                generation: 0,
            }),
            _lock: lock,
        })
    }

    fn lock_inner(&self) -> Result<MutexGuard<'_, WalInner>, WalError> {
        self.inner.lock().map_err(|_| WalError::LockPoisoned)
    }

    fn log_path(&self) -> PathBuf {
        self.directory.join(LOG_FILE)
    }

    /// Appends one entry and makes it durable before returning its sequence.
    ///
    /// If the write fails part-way, the file is cut back to its previous
    /// length so no partial entry survives.
    pub fn append(&self, job_id: &str, action: WalAction) -> Result<u64, WalError> {
        let mut inner = self.lock_inner()?;
        let log_path = self.log_path();

        let entry = WalEntry {
            sequence: inner.next_sequence,
            job_id: job_id.to_string(),
            timestamp: Utc::now(),
            action,
        };
        let line = entry.to_line()?;

        let io_err = |e| WalError::Io {
            path: log_path.clone(),
            source: e,
        };
        let previous_len = inner.log.metadata().map_err(io_err)?.len();

        if let Err(e) = write_durably(&mut inner.log, line.as_bytes(), self.sync_on_append) {
            if let Err(rollback) = inner.log.set_len(previous_len) {
                warn!(
                    "Failed to roll back partial WAL write in {}: {}",
                    log_path.display(),
                    rollback
                );
            }
            return Err(io_err(e));
        }

        inner.next_sequence += 1;
        debug!(
            "WAL append seq={} action={} job={}",
            entry.sequence,
            entry.kind(),
            entry.job_id
        );
        Ok(entry.sequence)
    }

    /// Runs `f` and, if it fails, removes every entry appended while it ran.
    ///
    /// Callers use this to pair appends with a later write that must
    /// succeed for the entries to stand. Appends by other threads in the
    /// meantime are removed as well, so callers must serialize around it.
    pub fn with_rollback<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<WalError> + fmt::Display,
    {
        let mark = self.mark()?;
        f().map_err(|e| {
            match self.rollback(mark) {
                Ok(0) => {}
                Ok(removed) => warn!("Rolled back {} WAL entries after: {}", removed, e),
                Err(rollback) => error!("WAL rollback failed after '{}': {}", e, rollback),
            }
            e
        })
    }

    fn mark(&self) -> Result<WalMark, WalError> {
        let inner = self.lock_inner()?;
        let len = inner
            .log
            .metadata()
            .map_err(|e| WalError::Io {
                path: self.log_path(),
                source: e,
            })?
            .len();
        Ok(WalMark {
            len,
            next_sequence: inner.next_sequence,
            generation: inner.generation,
        })
    }

    /// Truncates the log back to `mark`. Returns the number of entries
    /// removed.
    fn rollback(&self, mark: WalMark) -> Result<u64, WalError> {
        let mut inner = self.lock_inner()?;
        let removed = inner.next_sequence.saturating_sub(mark.next_sequence);
        if removed == 0 {
            return Ok(0);
        }
        if inner.generation != mark.generation || inner.checkpointed_through >= mark.next_sequence {
            return Err(WalError::Rollback {
                sequence: mark.next_sequence,
                reason: "log was checkpointed or compacted in between".to_string(),
            });
        }

        let log_path = self.log_path();
        inner
            .log
            .set_len(mark.len)
            .and_then(|_| inner.log.sync_data())
            .map_err(|e| WalError::Io {
                path: log_path,
                source: e,
            })?;
        inner.next_sequence = mark.next_sequence;
        Ok(removed)
    }

    /// Returns every entry after the last checkpoint, in sequence order.
    pub fn replay(&self) -> Result<Vec<WalEntry>, WalError> {
        let mut inner = self.lock_inner()?;
        let through = inner.checkpointed_through;
        let scan = scan_file(&mut inner.log, &self.log_path())?;
        Ok(scan
            .entries
            .into_iter()
            .filter(|e| e.sequence > through)
            .collect())
    }

    /// Logically discards all entries with `sequence <= through_sequence`.
    ///
    /// The marker is replaced atomically; the log file itself is only
    /// rewritten by [`WriteAheadLog::compact`].
    pub fn checkpoint(&self, through_sequence: u64) -> Result<(), WalError> {
        let mut inner = self.lock_inner()?;
        let last = inner.next_sequence - 1;
        let through = if through_sequence > last {
            warn!(
                "Checkpoint requested through {} but last sequence is {}; clamping",
                through_sequence, last
            );
            last
        } else {
            through_sequence
        };

        if through <= inner.checkpointed_through {
            debug!(
                "Checkpoint through {} is not ahead of {}; nothing to do",
                through, inner.checkpointed_through
            );
            return Ok(());
        }

        let marker = CheckpointMarker {
            through_sequence: through,
            checkpointed_at: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&marker)?;
        write_atomically(&self.directory, CHECKPOINT_FILE, &bytes)?;

        inner.checkpointed_through = through;
        info!("WAL checkpointed through sequence {}", through);
        Ok(())
    }

    /// Physically drops checkpointed entries by rewriting the log.
    /// Returns the number of entries removed.
    pub fn compact(&self) -> Result<usize, WalError> {
        let _span = tracing::info_span!("wal.compact").entered();
        let mut inner = self.lock_inner()?;
        let log_path = self.log_path();
        let through = inner.checkpointed_through;

        let scan = scan_file(&mut inner.log, &log_path)?;
        let before = scan.entries.len();

        let kept: Vec<&WalEntry> = scan
            .entries
            .iter()
            .filter(|e| e.sequence > through)
            .collect();
        let removed = before - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        let mut rewritten = String::new();
        for entry in kept {
            rewritten.push_str(&entry.to_line()?);
        }

        write_atomically(&self.directory, LOG_FILE, rewritten.as_bytes())?;
        inner.log = open_log(&log_path)?;
        inner.generation += 1;

        info!(
            "WAL compacted: removed {} entries, {} remain",
            removed,
            before - removed
        );
        Ok(removed)
    }

    /// Sequence of the most recent entry (or checkpoint), 0 when empty.
    pub fn last_sequence(&self) -> Result<u64, WalError> {
        Ok(self.lock_inner()?.next_sequence - 1)
    }

    pub fn checkpointed_through(&self) -> Result<u64, WalError> {
        Ok(self.lock_inner()?.checkpointed_through)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

fn write_durably(log: &mut File, bytes: &[u8], sync: bool) -> std::io::Result<()> {
    log.write_all(bytes)?;
    if sync {
        log.sync_data()
    } else {
        log.flush()
    }
}

fn open_log(path: &Path) -> Result<File, WalError> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| WalError::Io {
            path: path.to_path_buf(),
            source: e,
        })
}

fn read_checkpoint(directory: &Path) -> Result<Option<CheckpointMarker>, WalError> {
    let path = directory.join(CHECKPOINT_FILE);
    let content = match std::fs::read(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(WalError::Io { path, source: e }),
    };
    let marker = serde_json::from_slice(&content).map_err(|e| WalError::Corruption {
        line: 0,
        reason: format!("unreadable checkpoint marker {}: {}", path.display(), e),
    })?;
    Ok(Some(marker))
}

/// Writes `name` inside `directory` via temp file, fsync and rename.
fn write_atomically(directory: &Path, name: &str, bytes: &[u8]) -> Result<(), WalError> {
    let target = directory.join(name);
    let tmp = directory.join(format!("{}.tmp", name));
    let io_err = |path: &Path, e| WalError::Io {
        path: path.to_path_buf(),
        source: e,
    };

    {
        let mut file = File::create(&tmp).map_err(|e| io_err(&tmp, e))?;
        file.write_all(bytes).map_err(|e| io_err(&tmp, e))?;
        file.sync_all().map_err(|e| io_err(&tmp, e))?;
    }
    std::fs::rename(&tmp, &target).map_err(|e| io_err(&target, e))?;

    // Persist the rename itself. Not supported on every platform.
    if let Err(e) = File::open(directory).and_then(|d| d.sync_all()) {
        debug!("Directory fsync skipped for {}: {}", directory.display(), e);
    }
    Ok(())
}

fn scan_file(file: &mut File, path: &Path) -> Result<Scan, WalError> {
    let mut bytes = Vec::new();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_end(&mut bytes))
        .map_err(|e| WalError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    scan_bytes(&bytes)
}

/// Parses framed entries. A bad final line is a torn write; a bad line
/// followed by more data is corruption.
fn scan_bytes(bytes: &[u8]) -> Result<Scan, WalError> {
    let mut entries: Vec<WalEntry> = Vec::new();
    let mut offset = 0usize;
    let mut line_no = 0usize;

    while offset < bytes.len() {
        line_no += 1;
        let rest = &bytes[offset..];
        let Some(newline) = rest.iter().position(|&b| b == b'\n') else {
            return Ok(Scan {
                entries,
                valid_len: offset as u64,
                torn_tail: Some(format!("line {} has no terminator", line_no)),
            });
        };

        let raw = &rest[..newline];
        let next_offset = offset + newline + 1;
        let is_last = next_offset >= bytes.len();

        let parsed = std::str::from_utf8(raw)
            .map_err(|e| format!("invalid UTF-8: {}", e))
            .and_then(WalEntry::from_line);

        match parsed {
            Ok(entry) => {
                if let Some(prev) = entries.last() {
                    if entry.sequence <= prev.sequence {
                        return Err(WalError::Corruption {
                            line: line_no,
                            reason: format!(
                                "sequence {} does not follow {}",
                                entry.sequence, prev.sequence
                            ),
                        });
                    }
                }
                entries.push(entry);
            }
            Err(reason) if is_last => {
                return Ok(Scan {
                    entries,
                    valid_len: offset as u64,
                    torn_tail: Some(format!("line {}: {}", line_no, reason)),
                });
            }
            Err(reason) => {
                return Err(WalError::Corruption {
                    line: line_no,
                    reason,
                });
            }
        }

        offset = next_offset;
    }

    Ok(Scan {
        entries,
        valid_len: bytes.len() as u64,
        torn_tail: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::WalActionKind;
    use tempfile::tempdir;

    fn cutting() -> WalAction {
        WalAction::JobCutting {
            started_at: Utc::now(),
        }
    }

    fn completed() -> WalAction {
        WalAction::JobCompleted {
            completed_at: Utc::now(),
        }
    }

    fn open(dir: &Path) -> WriteAheadLog {
        WriteAheadLog::open(WalConfig::new(dir).with_sync(false)).unwrap()
    }

    #[test]
    fn test_append_assigns_sequences_from_one() {
        let dir = tempdir().unwrap();
        let wal = open(dir.path());

        assert_eq!(wal.last_sequence().unwrap(), 0);
        assert_eq!(wal.append("a", cutting()).unwrap(), 1);
        assert_eq!(wal.append("a", completed()).unwrap(), 2);
        assert_eq!(wal.append("b", cutting()).unwrap(), 3);

        let entries = wal.replay().unwrap();
        let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(entries[1].kind(), WalActionKind::JobCompleted);
        assert_eq!(entries[2].job_id, "b");
    }

    #[test]
    fn test_reopen_continues_sequence() {
        let dir = tempdir().unwrap();
        {
            let wal = open(dir.path());
            wal.append("a", cutting()).unwrap();
            wal.append("a", completed()).unwrap();
        }
        let wal = open(dir.path());
        assert_eq!(wal.replay().unwrap().len(), 2);
        assert_eq!(wal.append("b", cutting()).unwrap(), 3);
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _wal = open(dir.path());
        let second = WriteAheadLog::open(WalConfig::new(dir.path()));
        assert!(matches!(second, Err(WalError::Locked { .. })));
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let dir = tempdir().unwrap();
        {
            let wal = open(dir.path());
            wal.append("a", cutting()).unwrap();
            wal.append("a", completed()).unwrap();
        }
        // Simulate a crash half-way through a third append.
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join(LOG_FILE))
            .unwrap();
        file.write_all(b"0badc0de {\"sequence\":3,\"job_id\":\"b\"")
            .unwrap();
        drop(file);

        let wal = open(dir.path());
        assert_eq!(wal.replay().unwrap().len(), 2);
        assert_eq!(wal.append("b", cutting()).unwrap(), 3);

        let reopened = {
            drop(wal);
            open(dir.path())
        };
        assert_eq!(reopened.replay().unwrap().len(), 3);
    }

    #[test]
    fn test_corrupt_middle_entry_fails_open() {
        let dir = tempdir().unwrap();
        {
            let wal = open(dir.path());
            wal.append("a", cutting()).unwrap();
            wal.append("a", completed()).unwrap();
        }
        let path = dir.path().join(LOG_FILE);
        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = content.lines().map(String::from).collect();
        lines[0] = lines[0].replacen("\"a\"", "\"z\"", 1);
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();

        let result = WriteAheadLog::open(WalConfig::new(dir.path()));
        assert!(matches!(result, Err(WalError::Corruption { line: 1, .. })));
    }

    #[test]
    fn test_checkpoint_hides_earlier_entries() {
        let dir = tempdir().unwrap();
        let wal = open(dir.path());
        for _ in 0..4 {
            wal.append("a", cutting()).unwrap();
        }

        wal.checkpoint(2).unwrap();
        let sequences: Vec<u64> = wal.replay().unwrap().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![3, 4]);
        assert_eq!(wal.checkpointed_through().unwrap(), 2);

        // Going backwards is a no-op.
        wal.checkpoint(1).unwrap();
        assert_eq!(wal.checkpointed_through().unwrap(), 2);
    }

    #[test]
    fn test_checkpoint_survives_reopen_and_clamps() {
        let dir = tempdir().unwrap();
        {
            let wal = open(dir.path());
            wal.append("a", cutting()).unwrap();
            wal.append("a", completed()).unwrap();
            wal.checkpoint(99).unwrap();
            assert_eq!(wal.checkpointed_through().unwrap(), 2);
        }
        let wal = open(dir.path());
        assert!(wal.replay().unwrap().is_empty());
        assert_eq!(wal.checkpointed_through().unwrap(), 2);
    }

    #[test]
    fn test_compact_keeps_sequence_monotonic() {
        let dir = tempdir().unwrap();
        {
            let wal = open(dir.path());
            for _ in 0..3 {
                wal.append("a", cutting()).unwrap();
            }
            wal.checkpoint(3).unwrap();
            assert_eq!(wal.compact().unwrap(), 3);
            assert_eq!(wal.compact().unwrap(), 0);

            let content = std::fs::read_to_string(dir.path().join(LOG_FILE)).unwrap();
            assert!(content.is_empty());

            // The handle keeps appending to the rewritten file.
            assert_eq!(wal.append("b", cutting()).unwrap(), 4);
        }

        let wal = open(dir.path());
        let entries = wal.replay().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sequence, 4);
        assert_eq!(wal.append("c", cutting()).unwrap(), 5);
    }

    #[test]
    fn test_failed_operation_is_rolled_back() {
        let dir = tempdir().unwrap();
        let wal = open(dir.path());
        wal.append("a", cutting()).unwrap();

        let result: Result<(), WalError> = wal.with_rollback(|| {
            wal.append("b", cutting())?;
            wal.append("b", completed())?;
            Err(WalError::LockPoisoned)
        });
        assert!(result.is_err());
        assert_eq!(wal.last_sequence().unwrap(), 1);
        assert_eq!(wal.replay().unwrap().len(), 1);

        // Sequence numbers are reused, so there is no gap on disk.
        assert_eq!(wal.append("c", cutting()).unwrap(), 2);
        drop(wal);
        let wal = open(dir.path());
        let jobs: Vec<String> = wal.replay().unwrap().into_iter().map(|e| e.job_id).collect();
        assert_eq!(jobs, vec!["a", "c"]);
    }

    #[test]
    fn test_successful_operation_keeps_entries() {
        let dir = tempdir().unwrap();
        let wal = open(dir.path());

        let sequence = wal
            .with_rollback(|| -> Result<u64, WalError> { wal.append("a", cutting()) })
            .unwrap();
        assert_eq!(sequence, 1);
        assert_eq!(wal.replay().unwrap().len(), 1);
    }

    #[test]
    fn test_rollback_refused_across_compaction() {
        let dir = tempdir().unwrap();
        let wal = open(dir.path());
        wal.append("a", cutting()).unwrap();

        let result: Result<(), WalError> = wal.with_rollback(|| {
            wal.append("a", completed())?;
            wal.checkpoint(2)?;
            wal.compact()?;
            Err(WalError::LockPoisoned)
        });
        assert!(matches!(result, Err(WalError::LockPoisoned)));
        assert_eq!(wal.last_sequence().unwrap(), 2);
        assert_eq!(wal.append("b", cutting()).unwrap(), 3);
    }

    #[test]
    fn test_scan_empty_and_clean() {
        let scan = scan_bytes(b"").unwrap();
        assert!(scan.entries.is_empty());
        assert_eq!(scan.valid_len, 0);
        assert!(scan.torn_tail.is_none());
    }
}
