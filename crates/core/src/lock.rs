//! Advisory file lock serializing task run admission
//!
//! Held only around the count-check-and-register step so that two invocations
//! never observe the same pre-increment run count.

use crate::errors::{ConcurrencyError, Result, StateError};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exclusive lock released on drop, or by the OS when the process exits
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Try once. `Ok(None)` when another holder has the lock.
    pub fn try_acquire(path: &Path) -> std::result::Result<Option<Self>, StateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StateError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StateError::io(path, e))?;

        if let Err(err) = flock(&file, libc::LOCK_EX | libc::LOCK_NB) {
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Ok(None);
            }
            return Err(StateError::io(path, err));
        }

        debug!(lock_path = %path.display(), "Acquired run lock");
        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
        }))
    }

    /// Acquire, polling until `timeout`. A zero timeout fails immediately when
    /// the lock is held.
    pub async fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let started = Instant::now();
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(lock);
            }
            if timeout.is_zero() {
                return Err(ConcurrencyError::LockBusy {
                    path: path.display().to_string(),
                }
                .into());
            }
            if started.elapsed() >= timeout {
                return Err(ConcurrencyError::LockTimeout {
                    path: path.display().to_string(),
                    secs: timeout.as_secs(),
                }
                .into());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = flock(&self.file, libc::LOCK_UN);
        debug!(lock_path = %self.path.display(), "Released run lock");
    }
}

#[allow(unsafe_code)]
fn flock(file: &File, operation: libc::c_int) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and stays open for the call
    let result = unsafe { libc::flock(file.as_raw_fd(), operation) };
    if result != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
