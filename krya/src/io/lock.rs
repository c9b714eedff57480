//! Mutual exclusion for script launches.
//!
//! Two layers: an in-process async slot per script path, and a marker file
//! that other krya processes sharing the project directory can see. A
//! marker older than its staleness threshold is treated as abandoned.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another execution is in progress (lock marker {} is {age_secs}s old)", .path.display())]
    Busy { path: PathBuf, age_secs: u64 },

    #[error("lock marker {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LockError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Filesystem marker asserting that an execution is in progress.
#[derive(Debug, Clone)]
pub struct LockMarker {
    path: PathBuf,
    stale_after: Duration,
}

impl LockMarker {
    pub fn new(path: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            path: path.into(),
            stale_after,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the marker holding `token`.
    ///
    /// A stale marker is removed and replaced; a fresh one yields
    /// [`LockError::Busy`].
    pub fn acquire(&self, token: &str) -> Result<MarkerGuard, LockError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| LockError::io(parent, e))?;
        }
        for _ in 0..2 {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(mut file) => {
                    file.write_all(token.as_bytes())
                        .map_err(|e| LockError::io(&self.path, e))?;
                    debug!(path = %self.path.display(), token, "lock marker created");
                    return Ok(MarkerGuard {
                        path: self.path.clone(),
                        token: token.to_string(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !self.remove_if_stale()? {
                        let age_secs = self.age().map(|a| a.as_secs()).unwrap_or_default();
                        return Err(LockError::Busy {
                            path: self.path.clone(),
                            age_secs,
                        });
                    }
                }
                Err(e) => return Err(LockError::io(&self.path, e)),
            }
        }
        Err(LockError::Busy {
            path: self.path.clone(),
            age_secs: 0,
        })
    }

    /// Remove the marker when it is older than the staleness threshold.
    ///
    /// Returns `true` when the marker is gone afterwards.
    pub fn remove_if_stale(&self) -> Result<bool, LockError> {
        let Some(age) = self.age() else {
            return Ok(!self.path.exists());
        };
        if age < self.stale_after {
            return Ok(false);
        }
        warn!(path = %self.path.display(), age_secs = age.as_secs(), "removing stale lock marker");
        self.clear()?;
        Ok(true)
    }

    /// Remove the marker unconditionally. Returns whether one existed.
    pub fn clear(&self) -> Result<bool, LockError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(LockError::io(&self.path, e)),
        }
    }

    fn age(&self) -> Option<Duration> {
        let modified = fs::metadata(&self.path).and_then(|m| m.modified()).ok()?;
        Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO),
        )
    }
}

/// Removes the marker on drop if it still carries this guard's token.
#[derive(Debug)]
pub struct MarkerGuard {
    path: PathBuf,
    token: String,
}

impl Drop for MarkerGuard {
    fn drop(&mut self) {
        match fs::read_to_string(&self.path) {
            Ok(current) if current == self.token => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), err = %e, "failed to remove lock marker");
                } else {
                    debug!(path = %self.path.display(), "lock marker removed");
                }
            }
            Ok(_) => debug!(path = %self.path.display(), "lock marker taken over, leaving it"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), err = %e, "failed to read lock marker"),
        }
    }
}

/// One execution at a time per script path within this process.
#[derive(Debug, Default)]
pub struct ExecutionSlots {
    slots: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl ExecutionSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the slot keyed by `key`. Returns `None` if `cancel` fires first.
    pub async fn acquire(
        &self,
        key: &Path,
        cancel: &CancellationToken,
    ) -> Option<OwnedMutexGuard<()>> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.to_path_buf()).or_default())
        };
        tokio::select! {
            guard = slot.lock_owned() => Some(guard),
            () = cancel.cancelled() => None,
        }
    }
}
