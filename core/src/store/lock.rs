//! Exclusive advisory lock on a sidecar file.

use crate::error::{FlagError, FlagResult};
use std::{
    fs::{File, OpenOptions, TryLockError},
    path::Path,
    thread,
    time::{Duration, Instant},
};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Held for the duration of a critical section; unlocked on drop.
#[derive(Debug)]
pub(crate) struct StoreLock {
    file: File,
}

impl StoreLock {
    /// Block until the lock is ours. With a timeout, give up after it.
    pub(crate) fn acquire(path: &Path, timeout: Option<Duration>) -> FlagResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        let Some(limit) = timeout else {
            file.lock()?;
            return Ok(Self { file });
        };

        let started = Instant::now();
        loop {
            match file.try_lock() {
                Ok(()) => return Ok(Self { file }),
                Err(TryLockError::WouldBlock) => {
                    if started.elapsed() >= limit {
                        return Err(FlagError::LockTimeout {
                            location:  path.display().to_string(),
                            waited_ms: started.elapsed().as_millis(),
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(TryLockError::Error(e)) => return Err(e.into()),
            }
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            log::warn!("Failed to release store lock: {e}");
        }
    }
}
