//! Single-instance advisory lock
//!
//! A run may only start while it holds the lock. The file-backed
//! implementation creates a marker containing the acquisition time with
//! create-new semantics; a marker older than the configured stale age is
//! assumed to belong to a crashed run and is reclaimed.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{OnionooError, Result};
use crate::time::{Clock, ONE_SECOND};

/// Acquire/release contract of the process-wide lock
#[cfg_attr(test, mockall::automock)]
pub trait AdvisoryLock: Send + Sync {
    /// `Ok(true)` if the lock is now held, `Ok(false)` if another run holds it
    fn acquire(&self) -> Result<bool>;

    /// `Ok(true)` if the lock is no longer held afterwards
    fn release(&self) -> Result<bool>;
}

/// Lock backed by a marker file
pub struct FileLock {
    path: PathBuf,
    stale_after_millis: i64,
    clock: Arc<dyn Clock>,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>, stale_after_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            stale_after_millis: (stale_after_secs as i64).saturating_mul(ONE_SECOND),
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn create_marker(&self) -> Result<bool> {
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(lock_error(&self.path, e)),
        };
        writeln!(file, "{}", self.clock.now_millis()).map_err(|e| lock_error(&self.path, e))?;
        Ok(true)
    }

    /// Acquisition time stored in an existing marker, if readable
    fn marker_millis(&self) -> Result<Option<i64>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.trim().parse().ok()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(lock_error(&self.path, e)),
        }
    }
}

fn lock_error(path: &Path, err: std::io::Error) -> OnionooError {
    OnionooError::Lock(format!("{:?}: {}", path, err))
}

impl AdvisoryLock for FileLock {
    fn acquire(&self) -> Result<bool> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| lock_error(parent, e))?;
        }
        if self.create_marker()? {
            return Ok(true);
        }

        // An unreadable or empty marker is treated as held; only a marker
        // with a known, old enough timestamp is reclaimed.
        let Some(acquired) = self.marker_millis()? else {
            return Ok(false);
        };
        let age = self.clock.now_millis().saturating_sub(acquired);
        if age < self.stale_after_millis {
            return Ok(false);
        }

        tracing::warn!(
            "Reclaiming stale lock {:?} acquired {} s ago",
            self.path,
            age / ONE_SECOND
        );
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(lock_error(&self.path, e)),
        }
        self.create_marker()
    }

    fn release(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(lock_error(&self.path, e)),
        }
    }
}
