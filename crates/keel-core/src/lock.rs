//! Exclusive advisory lock on a file-backed store.
//!
//! The lock lives in a sidecar file (`<store>.lock`) and is held for the
//! whole life of the store handle, so a second process opening the same
//! store waits up to a timeout and then fails with a typed error.

use crate::error::ErrorCode;
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long [`StoreLock::acquire`] waits by default.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("{} is held by another process (waited {waited:?})", path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("cannot open lock file: {0}")]
    Io(#[from] io::Error),
}

impl LockError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::Io(_) => ErrorCode::StoreWriteFailed,
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// Released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Take the lock at `path`, retrying until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// [`LockError::Timeout`] if another holder keeps it, or
    /// [`LockError::Io`] if the lock file cannot be created.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let start = Instant::now();
        while file.try_lock_exclusive().is_err() {
            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited: start.elapsed(),
                });
            }
            thread::sleep(RETRY_INTERVAL);
        }
        debug!(path = %path.display(), "store lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Sidecar lock file for the store at `store_path`.
    #[must_use]
    pub fn path_for(store_path: &Path) -> PathBuf {
        let mut name = store_path
            .file_name()
            .map_or_else(|| OsString::from("store"), ToOwned::to_owned);
        name.push(".lock");
        store_path.with_file_name(name)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %err, "failed to release store lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LockError, StoreLock};
    use crate::error::ErrorCode;
    use std::path::{Path, PathBuf};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn reacquire_after_drop() -> Result<(), LockError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested/catalog.lock");
        let lock = StoreLock::acquire(&path, Duration::from_millis(50))?;
        assert_eq!(lock.path(), path.as_path());
        drop(lock);
        StoreLock::acquire(&path, Duration::from_millis(50))?;
        Ok(())
    }

    #[test]
    fn contended_lock_times_out() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("catalog.lock");
        let _held = StoreLock::acquire(&path, Duration::from_millis(50)).expect("first lock");
        let err = StoreLock::acquire(&path, Duration::from_millis(20)).expect_err("contended");

        assert!(matches!(&err, LockError::Timeout { path: p, .. } if *p == path));
        assert_eq!(err.code(), ErrorCode::LockContention);
        assert!(err.hint().is_some());
    }

    #[test]
    fn waiter_gets_lock_once_holder_releases() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("catalog.lock");
        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder_path = path.clone();
        let holder = thread::spawn(move || {
            let _lock = StoreLock::acquire(&holder_path, Duration::from_millis(200))
                .expect("holder lock");
            held_tx.send(()).expect("signal held");
            release_rx.recv().expect("wait for release");
        });

        held_rx.recv().expect("holder ready");
        assert!(StoreLock::acquire(&path, Duration::from_millis(20)).is_err());
        release_tx.send(()).expect("release holder");
        holder.join().expect("holder thread");

        StoreLock::acquire(&path, Duration::from_millis(200)).expect("lock after release");
    }

    #[test]
    fn lock_file_sits_next_to_store() {
        assert_eq!(
            StoreLock::path_for(Path::new("/tmp/x/catalog.graph.json")),
            PathBuf::from("/tmp/x/catalog.graph.json.lock")
        );
    }
}
