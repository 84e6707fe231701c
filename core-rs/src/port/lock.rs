/**
 * lock.rs
 * Cross-process mutual exclusion for the port registry
 *
 * The lock token is `<registry-path>.lock`. On unix it is held with an
 * advisory flock(LOCK_EX | LOCK_NB), so the kernel drops it when the
 * holding process dies. Elsewhere the token is created exclusively and
 * removed on release; a crashed holder leaves it behind.
 *
 * Acquisition never blocks in the kernel: each failed attempt sleeps for
 * base delay + random jitter and tries again, up to `max_attempts`.
 */

use rand::Rng;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::config::LockSettings;
use crate::errors::{EnvPortError, Result};

/// Lock token for one registry file
#[derive(Debug, Clone)]
pub struct RegistryLock {
    path: PathBuf,
    settings: LockSettings,
}

/// Held lock; released on drop
#[derive(Debug)]
pub struct LockGuard {
    file: Option<File>,
    path: PathBuf,
}

impl RegistryLock {
    pub fn new<P: AsRef<Path>>(registry_path: P, settings: LockSettings) -> Self {
        RegistryLock {
            path: Self::lock_path_for(registry_path.as_ref()),
            settings,
        }
    }

    /// `<registry-path>.lock`
    pub fn lock_path_for(registry_path: &Path) -> PathBuf {
        let mut name = registry_path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lock, retrying with randomized backoff
    ///
    /// # Errors
    /// `LockTimeout` once `max_attempts` attempts have failed. I/O errors
    /// other than contention are returned immediately.
    pub fn acquire(&self) -> Result<LockGuard> {
        let attempts = self.settings.max_attempts.max(1);
        let mut rng = rand::thread_rng();

        for attempt in 1..=attempts {
            if let Some(guard) = self.try_acquire()? {
                if attempt > 1 {
                    tracing::debug!(path = %self.path.display(), attempt, "registry lock acquired");
                }
                return Ok(guard);
            }

            if attempt == attempts {
                break;
            }

            let jitter = if self.settings.max_jitter_ms > 0 {
                rng.gen_range(0..=self.settings.max_jitter_ms)
            } else {
                0
            };
            let delay = self.settings.base_delay_ms + jitter;
            tracing::trace!(path = %self.path.display(), attempt, delay_ms = delay, "registry lock busy");
            thread::sleep(Duration::from_millis(delay));
        }

        tracing::warn!(path = %self.path.display(), attempts, "gave up waiting for registry lock");
        Err(EnvPortError::LockTimeout {
            path: self.path.to_string_lossy().to_string(),
            attempts,
        })
    }

    /// Single non-blocking attempt. `Ok(None)` means another holder has it.
    #[cfg(unix)]
    pub fn try_acquire(&self) -> Result<Option<LockGuard>> {
        use std::os::unix::io::AsRawFd;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.path)?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(Some(LockGuard {
                file: Some(file),
                path: self.path.clone(),
            }));
        }

        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EWOULDBLOCK || code == libc::EINTR => Ok(None),
            _ => Err(EnvPortError::Io(err)),
        }
    }

    /// Single non-blocking attempt. `Ok(None)` means another holder has it.
    #[cfg(not(unix))]
    pub fn try_acquire(&self) -> Result<Option<LockGuard>> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => Ok(Some(LockGuard {
                file: Some(file),
                path: self.path.clone(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(EnvPortError::Io(e)),
        }
    }
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;

            // close() would release it too
            if let Some(file) = &self.file {
                unsafe {
                    libc::flock(file.as_raw_fd(), libc::LOCK_UN);
                }
            }
            self.file.take();
        }

        #[cfg(not(unix))]
        {
            self.file.take();
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove registry lock token");
            }
        }

        tracing::trace!(path = %self.path.display(), "registry lock released");
    }
}
