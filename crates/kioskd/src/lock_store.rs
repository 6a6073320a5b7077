//! Active-application lock file.
//!
//! The lock file holds a single JSON [`LockRecord`]. It is the only record of
//! which application is running: there is no in-memory copy to drift out of
//! sync. A lock whose pid is no longer alive (or whose contents cannot be
//! parsed) is stale and is removed the next time anyone looks at it.
//!
//! All access goes through a [`LockTransaction`], which holds an async mutex
//! so that a check followed by an acquire cannot interleave with another
//! request's check and acquire.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use kiosk_core::LockRecord;

use crate::process_tree::is_alive;

/// Errors from lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another live application holds the lock
    #[error("Lock held by {record}")]
    Conflict { record: LockRecord },

    #[error("Lock file {path}: {error}")]
    Io { path: PathBuf, error: io::Error },
}

/// File-backed lock with serialized transactions.
#[derive(Debug)]
pub struct LockStore {
    path: PathBuf,
    txn: Mutex<()>,
}

impl LockStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            txn: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Starts a transaction, waiting for any other one to finish first.
    pub async fn begin(&self) -> LockTransaction<'_> {
        LockTransaction {
            path: &self.path,
            _guard: self.txn.lock().await,
        }
    }

    /// Shorthand for a transaction that only checks.
    pub async fn check(&self) -> Result<Option<LockRecord>, LockError> {
        self.begin().await.check().await
    }
}

/// Exclusive access to the lock file for the lifetime of the value.
pub struct LockTransaction<'a> {
    path: &'a Path,
    _guard: MutexGuard<'a, ()>,
}

impl LockTransaction<'_> {
    /// Returns the live lock, if any, deleting a stale one.
    pub async fn check(&self) -> Result<Option<LockRecord>, LockError> {
        let contents = match fs::read_to_string(self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        match LockRecord::from_json(&contents) {
            Ok(record) if is_alive(record.pid) => Ok(Some(record)),
            Ok(record) => {
                info!(app = %record.app, pid = record.pid, "Removing stale lock");
                self.remove().await?;
                Ok(None)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Removing unreadable lock file");
                self.remove().await?;
                Ok(None)
            }
        }
    }

    /// Records `record` as the active application.
    ///
    /// Fails with [`LockError::Conflict`] if a live lock exists. The file is
    /// created exclusively, so a writer outside this process cannot be
    /// silently overwritten either.
    pub async fn acquire(&self, record: &LockRecord) -> Result<(), LockError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        match self.create(record).await {
            Err(LockError::Io { error, .. }) if error.kind() == io::ErrorKind::AlreadyExists => {
                if let Some(existing) = self.check().await? {
                    return Err(LockError::Conflict { record: existing });
                }
                // The stale file is gone now; one more attempt.
                self.create(record).await
            }
            result => result,
        }
    }

    async fn create(&self, record: &LockRecord) -> Result<(), LockError> {
        let json = record
            .to_json()
            .map_err(|e| self.io_error(io::Error::new(io::ErrorKind::InvalidData, e.to_string())))?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        let written = match file.write_all(json.as_bytes()).await {
            Ok(()) => file.sync_all().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            // A half-written lock would read as corrupt; drop it now.
            drop(file);
            let _ = fs::remove_file(self.path).await;
            return Err(self.io_error(e));
        }

        debug!(app = %record.app, pid = record.pid, "Lock acquired");
        Ok(())
    }

    /// Deletes the lock file. A missing file is not an error.
    pub async fn release(&self) -> Result<(), LockError> {
        self.remove().await?;
        debug!(path = %self.path.display(), "Lock released");
        Ok(())
    }

    async fn remove(&self) -> Result<(), LockError> {
        match fs::remove_file(self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn io_error(&self, error: io::Error) -> LockError {
        LockError::Io {
            path: self.path.to_path_buf(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiosk_core::AppName;
    use tempfile::TempDir;

    const DEAD_PID: u32 = 999_999_999;

    fn record(pid: u32, app: &str) -> LockRecord {
        LockRecord::new(pid, AppName::parse(app).unwrap())
    }

    fn store(dir: &TempDir) -> LockStore {
        LockStore::new(dir.path().join("state").join("app.lock"))
    }

    #[tokio::test]
    async fn test_check_without_file() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).check().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_acquire_then_check() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mine = record(std::process::id(), "chess");

        store.begin().await.acquire(&mine).await.unwrap();

        assert_eq!(store.check().await.unwrap(), Some(mine));
        let on_disk = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(on_disk, format!(r#"{{"pid":{},"app":"chess"}}"#, std::process::id()));
    }

    #[tokio::test]
    async fn test_live_lock_conflicts() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let chess = record(std::process::id(), "chess");
        store.begin().await.acquire(&chess).await.unwrap();

        let err = store
            .begin()
            .await
            .acquire(&record(std::process::id(), "checkers"))
            .await
            .unwrap_err();
        match err {
            LockError::Conflict { record } => assert_eq!(record, chess),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_stale_lock_self_heals() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.begin().await.acquire(&record(DEAD_PID, "chess")).await.unwrap();

        assert!(store.check().await.unwrap().is_none());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_acquire_over_stale_lock() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.begin().await.acquire(&record(DEAD_PID, "chess")).await.unwrap();

        let checkers = record(std::process::id(), "checkers");
        store.begin().await.acquire(&checkers).await.unwrap();
        assert_eq!(store.check().await.unwrap(), Some(checkers));
    }

    #[tokio::test]
    async fn test_corrupt_lock_is_stale() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "{not json").unwrap();

        assert!(store.check().await.unwrap().is_none());
        assert!(!store.path().exists());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_concurrent_acquires_admit_one() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(store(&dir));

        let attempts: Vec<_> = ["chess", "checkers", "go"]
            .into_iter()
            .map(|app| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move {
                    let txn = store.begin().await;
                    match txn.check().await.unwrap() {
                        Some(active) => Err(active),
                        None => txn.acquire(&record(std::process::id(), app)).await.map_err(|e| match e {
                            LockError::Conflict { record } => record,
                            other => panic!("unexpected error: {other}"),
                        }),
                    }
                })
            })
            .collect();

        let mut admitted = 0;
        for attempt in attempts {
            if attempt.await.unwrap().is_ok() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert!(store.check().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .begin()
            .await
            .acquire(&record(std::process::id(), "chess"))
            .await
            .unwrap();

        let txn = store.begin().await;
        txn.release().await.unwrap();
        txn.release().await.unwrap();
        drop(txn);
        assert!(store.check().await.unwrap().is_none());
    }
}
