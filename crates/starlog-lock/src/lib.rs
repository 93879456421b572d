//! Exclusive ownership of the on-disk replay queue.
//!
//! Two exporter processes sharing one replay file would interleave appends
//! and compactions and corrupt it. `QueueLock` opens the backing file
//! read/write (creating it if absent) and takes a non-blocking exclusive
//! advisory lock scoped to the life of the value. Queue I/O goes through the
//! same descriptor via [`QueueLock::file_mut`].

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors from lock acquisition.
#[derive(Error, Debug)]
pub enum LockError {
    /// Another process holds the lock.
    #[error("replay queue is locked by another process")]
    AlreadyLocked,
    /// The backing file could not be opened or locked.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Exclusive handle on the replay queue's backing file.
///
/// The OS releases the advisory lock when the descriptor closes, so the lock
/// lives exactly as long as this value. There is no renewal or heartbeat;
/// the lock's lifetime equals the process's interest in the queue.
pub struct QueueLock {
    path: PathBuf,
    file: File,
}

impl QueueLock {
    /// Open the backing file read/write, creating it if absent, and take a
    /// non-blocking exclusive lock.
    ///
    /// Fails with [`LockError::AlreadyLocked`] on contention and
    /// [`LockError::Io`] when an existing file cannot be opened read/write.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let mut lock = fd_lock::RwLock::new(file);
        match lock.try_write() {
            Ok(guard) => {
                // The guard would unlock on drop, but the OS also releases
                // the lock when the descriptor closes. The descriptor is what
                // we keep, so the guard itself is forgotten.
                std::mem::forget(guard);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Err(LockError::AlreadyLocked),
            Err(e) => return Err(LockError::Io(e)),
        }

        debug!(path = %path.display(), "Acquired replay queue lock");
        Ok(Self {
            path: path.to_path_buf(),
            file: lock.into_inner(),
        })
    }

    /// Path of the locked file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The locked file handle, for queue I/O.
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// Release the lock by closing the descriptor.
    pub fn release(self) {
        debug!(path = %self.path.display(), "Released replay queue lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replay.jsonl");
        assert!(!path.exists());

        let lock = QueueLock::acquire(&path).unwrap();
        assert!(path.exists());
        assert_eq!(lock.path(), path.as_path());
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replay.jsonl");

        let _held = QueueLock::acquire(&path).unwrap();
        let second = QueueLock::acquire(&path);
        assert!(matches!(second, Err(LockError::AlreadyLocked)));
    }

    #[test]
    fn release_allows_reacquire() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replay.jsonl");

        let held = QueueLock::acquire(&path).unwrap();
        held.release();

        QueueLock::acquire(&path).unwrap();
    }

    #[test]
    fn drop_allows_reacquire() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replay.jsonl");

        {
            let _held = QueueLock::acquire(&path).unwrap();
        }

        QueueLock::acquire(&path).unwrap();
    }

    #[test]
    fn unopenable_path_is_io_error() {
        let dir = tempdir().unwrap();
        // A directory cannot be opened read/write as a file.
        let result = QueueLock::acquire(dir.path());
        assert!(matches!(result, Err(LockError::Io(_))));
    }

    #[test]
    fn locked_file_is_usable_for_io() {
        use std::io::{Read, Seek, SeekFrom, Write};

        let dir = tempdir().unwrap();
        let path = dir.path().join("replay.jsonl");

        let mut lock = QueueLock::acquire(&path).unwrap();
        lock.file_mut().write_all(b"line\n").unwrap();
        lock.file_mut().seek(SeekFrom::Start(0)).unwrap();

        let mut content = String::new();
        lock.file_mut().read_to_string(&mut content).unwrap();
        assert_eq!(content, "line\n");
    }
}
