//! File-backed FIFO replay queue.
//!
//! One JSON entry per line. The on-disk file is append-only between
//! compactions; removal of sent entries is tracked in memory and folded back
//! into the file when [`ReplayQueue::compact`] runs. After a crash the file
//! therefore over-approximates the pending set, never under-approximates it.

use crate::error::{ExportError, ExportResult};
use starlog_lock::{LockError, QueueLock};
use std::collections::VecDeque;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Default number of removals between file compactions.
pub const DEFAULT_COMPACT_EVERY: u64 = 20;

/// Single-writer, file-backed FIFO of serialized queue entries.
///
/// Construction acquires the exclusive queue lock; the lock is held for the
/// queue's whole lifetime and released when it is dropped. Entries are opaque
/// single-line strings; parsing is the caller's concern so that a corrupt
/// line can be popped and skipped without losing the rest of the queue.
pub struct ReplayQueue {
    lock: QueueLock,
    entries: VecDeque<String>,
    /// Removals since the last compaction.
    pops: u64,
    compact_every: u64,
}

impl ReplayQueue {
    /// Acquire the queue lock and load all pending entries from `path`.
    ///
    /// Fails with [`ExportError::QueueUnavailable`] when another process
    /// already holds the lock or an existing file cannot be opened
    /// read/write; either way the caller operates without persistence.
    pub fn open(path: &Path, compact_every: u64) -> ExportResult<Self> {
        let mut lock = QueueLock::acquire(path).map_err(|e| match e {
            LockError::AlreadyLocked => {
                ExportError::QueueUnavailable(format!("{} is locked by another process", path.display()))
            }
            LockError::Io(io) => {
                ExportError::QueueUnavailable(format!("cannot open {}: {}", path.display(), io))
            }
        })?;

        let mut contents = String::new();
        lock.file_mut().read_to_string(&mut contents)?;
        let entries: VecDeque<String> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        if !entries.is_empty() {
            info!(pending = entries.len(), path = %path.display(), "Loaded replay queue");
        } else {
            debug!(path = %path.display(), "Replay queue empty");
        }

        Ok(Self {
            lock,
            entries,
            pops: 0,
            compact_every: compact_every.max(1),
        })
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue has no pending entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest pending entry, if any. The entry stays queued until
    /// [`ReplayQueue::pop_head`] confirms it.
    pub fn head(&self) -> Option<&str> {
        self.entries.front().map(String::as_str)
    }

    /// Append an entry, persisting it to disk before it becomes visible in
    /// memory. On write failure the queue is unchanged.
    pub fn append(&mut self, entry: &str) -> ExportResult<()> {
        let file = self.lock.file_mut();
        file.seek(SeekFrom::End(0))?;
        file.write_all(entry.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_data()?;

        self.entries.push_back(entry.to_string());
        debug!(pending = self.entries.len(), "Queued entry");
        Ok(())
    }

    /// Remove the confirmed head entry.
    ///
    /// Memory-only; the on-disk file shrinks at the next compaction. Returns
    /// whether a compaction is now due.
    pub fn pop_head(&mut self) -> bool {
        if self.entries.pop_front().is_some() {
            self.pops += 1;
        }
        self.pops >= self.compact_every
    }

    /// Rewrite the backing file to match the in-memory pending set and reset
    /// the removal counter.
    pub fn compact(&mut self) -> ExportResult<()> {
        let mut contents = String::new();
        for entry in &self.entries {
            contents.push_str(entry);
            contents.push('\n');
        }

        let file = self.lock.file_mut();
        file.seek(SeekFrom::Start(0))?;
        file.set_len(0)?;
        file.write_all(contents.as_bytes())?;
        file.sync_data()?;

        debug!(pending = self.entries.len(), pops = self.pops, "Compacted replay file");
        self.pops = 0;
        Ok(())
    }

    /// Compact if removals have accumulated, then release the lock.
    pub fn close(mut self) -> ExportResult<()> {
        if self.pops > 0 {
            if let Err(e) = self.compact() {
                warn!(error = %e, "Failed to compact replay file on close");
            }
        }
        self.lock.release();
        Ok(())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        self.lock.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn queue_path(dir: &tempfile::TempDir) -> std::path::PathBuf {
        dir.path().join("replay.jsonl")
    }

    #[test]
    fn open_creates_empty_queue() {
        let dir = tempdir().unwrap();
        let queue = ReplayQueue::open(&queue_path(&dir), DEFAULT_COMPACT_EVERY).unwrap();
        assert!(queue.is_empty());
        assert_eq!(queue.head(), None);
        assert!(queue_path(&dir).exists());
    }

    #[test]
    fn append_persists_before_memory() {
        let dir = tempdir().unwrap();
        let path = queue_path(&dir);

        let mut queue = ReplayQueue::open(&path, DEFAULT_COMPACT_EVERY).unwrap();
        queue.append(r#"["a",{}]"#).unwrap();
        queue.append(r#"["b",{}]"#).unwrap();
        assert_eq!(queue.len(), 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "[\"a\",{}]\n[\"b\",{}]\n");
    }

    #[test]
    fn reload_preserves_fifo_order() {
        let dir = tempdir().unwrap();
        let path = queue_path(&dir);

        let mut queue = ReplayQueue::open(&path, DEFAULT_COMPACT_EVERY).unwrap();
        for entry in ["first", "second", "third"] {
            queue.append(entry).unwrap();
        }
        drop(queue);

        let reloaded = ReplayQueue::open(&path, DEFAULT_COMPACT_EVERY).unwrap();
        assert_eq!(reloaded.len(), 3);
        assert_eq!(reloaded.head(), Some("first"));
    }

    #[test]
    fn pop_is_memory_only_until_compaction() {
        let dir = tempdir().unwrap();
        let path = queue_path(&dir);

        let mut queue = ReplayQueue::open(&path, 10).unwrap();
        queue.append("first").unwrap();
        queue.append("second").unwrap();

        assert!(!queue.pop_head());
        assert_eq!(queue.head(), Some("second"));

        // Disk still holds both lines.
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);

        queue.compact().unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "second\n");
    }

    #[test]
    fn pop_signals_compaction_due() {
        let dir = tempdir().unwrap();
        let mut queue = ReplayQueue::open(&queue_path(&dir), 2).unwrap();
        for entry in ["a", "b", "c"] {
            queue.append(entry).unwrap();
        }

        assert!(!queue.pop_head());
        assert!(queue.pop_head());

        queue.compact().unwrap();
        assert!(!queue.pop_head());
    }

    #[test]
    fn crash_before_compaction_replays_sent_entries() {
        let dir = tempdir().unwrap();
        let path = queue_path(&dir);

        let mut queue = ReplayQueue::open(&path, 100).unwrap();
        queue.append("sent").unwrap();
        queue.append("pending").unwrap();
        queue.pop_head();
        // Dropped without compacting, as a crash would.
        drop(queue);

        let reloaded = ReplayQueue::open(&path, 100).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.head(), Some("sent"));
    }

    #[test]
    fn close_compacts_pending_removals() {
        let dir = tempdir().unwrap();
        let path = queue_path(&dir);

        let mut queue = ReplayQueue::open(&path, 100).unwrap();
        queue.append("sent").unwrap();
        queue.append("pending").unwrap();
        queue.pop_head();
        queue.close().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "pending\n");
    }

    #[test]
    fn second_open_is_unavailable_until_drop() {
        let dir = tempdir().unwrap();
        let path = queue_path(&dir);

        let queue = ReplayQueue::open(&path, DEFAULT_COMPACT_EVERY).unwrap();
        match ReplayQueue::open(&path, DEFAULT_COMPACT_EVERY) {
            Err(ExportError::QueueUnavailable(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("expected QueueUnavailable"),
        }

        drop(queue);
        assert!(ReplayQueue::open(&path, DEFAULT_COMPACT_EVERY).is_ok());
    }

    #[test]
    fn unopenable_path_is_queue_unavailable() {
        let dir = tempdir().unwrap();
        // A directory cannot be opened read/write as a file.
        match ReplayQueue::open(dir.path(), DEFAULT_COMPACT_EVERY) {
            Err(ExportError::QueueUnavailable(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("expected QueueUnavailable"),
        }
    }

    #[test]
    fn blank_lines_are_skipped_on_load() {
        let dir = tempdir().unwrap();
        let path = queue_path(&dir);
        std::fs::write(&path, "first\n\n  \nsecond\n").unwrap();

        let queue = ReplayQueue::open(&path, DEFAULT_COMPACT_EVERY).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.head(), Some("first"));
    }
}
