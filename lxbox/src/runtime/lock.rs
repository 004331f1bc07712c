//! Runtime and per-container locks.
//!
//! - [`RuntimeLock`]: exclusive `flock` on the home directory, so only one
//!   runtime manages a given `LXBOX_HOME` at a time.
//! - [`ContainerLocks`]: in-process lock table serializing create, load and
//!   delete per container (snapshots share their parent's lock).

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};

use crate::errors::{LxboxError, LxboxResult};
use crate::runtime::constants::filenames;
use crate::runtime::layout::base_name;

/// Exclusive lock on the runtime home directory, released on drop.
#[derive(Debug)]
pub struct RuntimeLock {
    _lock: Flock<File>,
    path: PathBuf,
}

impl RuntimeLock {
    /// Lock `home_dir`, failing immediately if another runtime holds it.
    pub fn acquire(home_dir: &Path) -> LxboxResult<Self> {
        std::fs::create_dir_all(home_dir)
            .map_err(|e| LxboxError::Storage(format!("failed to create home dir: {}", e)))?;

        let lock_path = home_dir.join(filenames::LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| LxboxError::Storage(format!("failed to open lock file: {}", e)))?;

        let lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_, Errno::EWOULDBLOCK)) => {
                return Err(LxboxError::InvalidState(format!(
                    "another runtime is already using {}",
                    home_dir.display()
                )));
            }
            Err((_, errno)) => {
                return Err(LxboxError::Storage(format!(
                    "failed to acquire lock: {}",
                    errno
                )));
            }
        };

        tracing::debug!(lock_path = %lock_path.display(), "Acquired runtime lock");

        Ok(Self {
            _lock: lock,
            path: lock_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RuntimeLock {
    fn drop(&mut self) {
        tracing::debug!(lock_path = %self.path.display(), "Released runtime lock");
    }
}

/// Guard returned by [`ContainerLocks::lock`].
pub type ContainerLockGuard = ArcMutexGuard<RawMutex, ()>;

/// Per-container mutual exclusion for lifecycle calls.
#[derive(Debug, Default)]
pub struct ContainerLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ContainerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock for `name`'s container is free.
    pub fn lock(&self, name: &str) -> ContainerLockGuard {
        let entry = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(base_name(name).to_string()).or_default())
        };
        entry.lock_arc()
    }

    /// Run `f` under `name`'s lock, then drop idle table entries.
    pub fn with_lock<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        let result = {
            let _guard = self.lock(name);
            f()
        };
        self.prune();
        result
    }

    /// Drop table entries nobody holds or waits on.
    pub fn prune(&self) {
        self.locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
