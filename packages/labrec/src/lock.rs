//! Cross-process locks.
//!
//! `DirLock` serializes access to one file (the index database) across
//! threads and processes. Acquisition takes an in-process mutex, then creates the
//! sentinel directory `<file>.lock`; `create_dir` either succeeds or fails
//! with `AlreadyExists`, which makes it an atomic test-and-set on every
//! platform. A sentinel older than the staleness threshold is treated as
//! left behind by a crashed holder and removed.
//!
//! `WriteLock` is an OS advisory lock (`flock` / `LockFileEx`) on the
//! sidecar `<file>.lck`, held by every read-write open of a record file so
//! that two writers never overwrite each other's changes. The sidecar is
//! locked instead of the record itself because flushes replace the record
//! file by rename. The OS drops the lock when its holder dies.
//!
//! Every wait is bounded by an explicit timeout.
//!
//! ## Usage
//!
//! ```no_run
//! # use labrec::lock::{DirLock, LockOptions};
//! # fn main() -> labrec::Result<()> {
//! let lock = DirLock::new("/data/index.sqlite", LockOptions::default());
//! let guard = lock.acquire()?;
//! // the sentinel is removed when `guard` is dropped
//! # drop(guard);
//! # Ok(())
//! # }
//! ```

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use fs2::FileExt;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::config::IndexerConfig;
use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockOptions {
    pub timeout: Duration,
    pub stale_after: Duration,
    pub poll_interval: Duration,
    /// Copy the protected file to `<file>.backup` on every release.
    pub copy_on_lock: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            stale_after: Duration::from_secs(120),
            poll_interval: Duration::from_millis(50),
            copy_on_lock: false,
        }
    }
}

impl From<&IndexerConfig> for LockOptions {
    fn from(config: &IndexerConfig) -> Self {
        Self {
            timeout: config.lock_timeout(),
            stale_after: config.stale_lock(),
            poll_interval: config.lock_poll(),
            copy_on_lock: config.copy_on_lock,
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[derive(Debug)]
pub struct DirLock {
    target: PathBuf,
    sentinel: PathBuf,
    local: Mutex<()>,
    options: LockOptions,
}

/// Held lock. Dropping it releases the sentinel and the in-process mutex.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct DirLockGuard<'a> {
    lock: &'a DirLock,
    _local: MutexGuard<'a, ()>,
}

impl DirLock {
    pub fn new<P: AsRef<Path>>(target: P, options: LockOptions) -> Self {
        let target = target.as_ref().to_path_buf();
        Self {
            sentinel: with_suffix(&target, ".lock"),
            target,
            local: Mutex::new(()),
            options,
        }
    }

    pub fn sentinel(&self) -> &Path {
        &self.sentinel
    }

    pub fn backup_path(&self) -> PathBuf {
        with_suffix(&self.target, ".backup")
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    fn timed_out(&self) -> StoreError {
        warn!(
            sentinel = %self.sentinel.display(),
            timeout_ms = self.options.timeout.as_millis() as u64,
            "lock acquisition timed out"
        );
        StoreError::LockTimeout {
            what: self.sentinel.display().to_string(),
            timeout_ms: self.options.timeout.as_millis(),
        }
    }

    /// Age of an existing sentinel, `None` if it vanished meanwhile.
    fn sentinel_age(&self) -> Option<Duration> {
        let modified = fs::metadata(&self.sentinel).ok()?.modified().ok()?;
        Some(SystemTime::now().duration_since(modified).unwrap_or_default())
    }

    pub fn acquire(&self) -> Result<DirLockGuard<'_>> {
        let started = Instant::now();
        let local = self
            .local
            .try_lock_for(self.options.timeout)
            .ok_or_else(|| self.timed_out())?;

        loop {
            match fs::create_dir(&self.sentinel) {
                Ok(()) => {
                    debug!(sentinel = %self.sentinel.display(), "lock acquired");
                    return Ok(DirLockGuard { lock: self, _local: local });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    // parent directory missing
                    match self.sentinel.parent() {
                        Some(dir) if !dir.as_os_str().is_empty() && !dir.exists() => {
                            fs::create_dir_all(dir)?;
                            continue;
                        }
                        _ => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }

            if let Some(age) = self.sentinel_age() {
                if age > self.options.stale_after {
                    warn!(
                        sentinel = %self.sentinel.display(),
                        age_ms = age.as_millis() as u64,
                        "removing stale lock"
                    );
                    match fs::remove_dir_all(&self.sentinel) {
                        Ok(()) => continue,
                        Err(e) if e.kind() == ErrorKind::NotFound => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= self.options.timeout {
                return Err(self.timed_out());
            }
            std::thread::sleep(self.options.poll_interval.min(self.options.timeout - elapsed));
        }
    }

    /// Copy the backup over the protected file. Returns false when there is
    /// no backup to restore.
    pub fn restore(&self) -> Result<bool> {
        let _guard = self.acquire()?;
        let backup = self.backup_path();
        if !backup.is_file() {
            return Ok(false);
        }
        fs::copy(&backup, &self.target)?;
        warn!(file = %self.target.display(), "restored from backup");
        Ok(true)
    }
}

impl Drop for DirLockGuard<'_> {
    fn drop(&mut self) {
        let lock = self.lock;
        if lock.options.copy_on_lock && lock.target.is_file() {
            if let Err(e) = fs::copy(&lock.target, lock.backup_path()) {
                warn!(file = %lock.target.display(), error = %e, "backup on release failed");
            }
        }
        if let Err(e) = fs::remove_dir(&lock.sentinel) {
            warn!(sentinel = %lock.sentinel.display(), error = %e, "failed to remove lock sentinel");
        } else {
            debug!(sentinel = %lock.sentinel.display(), "lock released");
        }
    }
}

// ── Write Lock ─────────────────────────────────────────────────────

/// Exclusive advisory lock on `<file>.lck`. Released on drop.
#[derive(Debug)]
pub struct WriteLock {
    file: File,
    path: PathBuf,
}

impl WriteLock {
    /// Take the write lock of `target`, polling every `poll` until `timeout`
    /// elapses.
    pub fn acquire(target: &Path, timeout: Duration, poll: Duration) -> Result<Self> {
        let path = with_suffix(target, ".lck");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(lock = %path.display(), "write lock acquired");
                    return Ok(Self { file, path });
                }
                Err(e) if is_contended(&e) => {}
                Err(e) => return Err(e.into()),
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                warn!(
                    lock = %path.display(),
                    timeout_ms = timeout.as_millis() as u64,
                    "record is open for writing elsewhere"
                );
                return Err(StoreError::LockTimeout {
                    what: target.display().to_string(),
                    timeout_ms: timeout.as_millis(),
                });
            }
            std::thread::sleep(poll.max(Duration::from_millis(1)).min(timeout - elapsed));
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `WouldBlock`, or the raw EWOULDBLOCK/EAGAIN some platforms report.
fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(lock = %self.path.display(), error = %e, "failed to release write lock");
        } else {
            debug!(lock = %self.path.display(), "write lock released");
        }
    }
}
