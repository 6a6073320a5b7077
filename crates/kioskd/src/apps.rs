//! Single-instance application management.
//!
//! [`AppManager`] ties the lock store, the catalog and the supervisor
//! together. Launch and stop each run inside one lock transaction, so at
//! most one application is ever recorded as active.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use kiosk_core::{AppDescriptor, LockRecord};

use crate::catalog::{AppCatalog, CatalogError};
use crate::config::AppsConfig;
use crate::lock_store::{LockError, LockStore};
use crate::supervisor::{LaunchError, ProcessSupervisor, TerminateReport};

/// Errors from application management.
#[derive(Debug, Error)]
pub enum AppError {
    /// Another application is active
    #[error("Already running: {0}")]
    AlreadyActive(LockRecord),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// Stop signals were sent but processes outlived the stop timeout.
    /// The lock stays until they exit.
    #[error("{record} did not stop; still running: {survivors:?}")]
    StillRunning {
        record: LockRecord,
        survivors: BTreeSet<u32>,
    },

    #[error(transparent)]
    Lock(LockError),
}

impl From<LockError> for AppError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Conflict { record } => Self::AlreadyActive(record),
            other => Self::Lock(other),
        }
    }
}

/// Owns the active-application state.
#[derive(Debug)]
pub struct AppManager {
    store: LockStore,
    catalog: AppCatalog,
    supervisor: ProcessSupervisor,
    stop_timeout: Duration,
}

impl AppManager {
    pub fn new(
        store: LockStore,
        catalog: AppCatalog,
        supervisor: ProcessSupervisor,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            supervisor,
            stop_timeout,
        }
    }

    pub fn from_config(config: &AppsConfig) -> Self {
        Self::new(
            LockStore::new(&config.lock_file),
            AppCatalog::new(&config.dir),
            ProcessSupervisor::from_config(config),
            config.stop_timeout(),
        )
    }

    pub fn catalog(&self) -> &AppCatalog {
        &self.catalog
    }

    /// The live lock, if any.
    pub async fn status(&self) -> Result<Option<LockRecord>, AppError> {
        Ok(self.store.check().await?)
    }

    /// Launches `name` unless another application is active.
    pub async fn launch(&self, name: &str) -> Result<LockRecord, AppError> {
        let txn = self.store.begin().await;

        if let Some(active) = txn.check().await? {
            info!(requested = name, active = %active, "Launch refused, application active");
            return Err(AppError::AlreadyActive(active));
        }

        let (app, dir) = self.catalog.resolve(name).await?;
        let record = self.supervisor.launch(&app, &dir)?;

        if let Err(e) = txn.acquire(&record).await {
            error!(app = %app, pid = record.pid, error = %e, "Failed to record launch, stopping it");
            self.supervisor
                .terminate(&record, Some(self.stop_timeout))
                .await;
            return Err(e.into());
        }

        Ok(record)
    }

    /// Stops the active application, if any, and clears the lock.
    ///
    /// Returns `None` when nothing was running. If any process of the tree
    /// survives the stop timeout the lock is kept and
    /// [`AppError::StillRunning`] is returned; a later check clears the lock
    /// once they are gone.
    pub async fn stop(&self) -> Result<Option<(LockRecord, TerminateReport)>, AppError> {
        let txn = self.store.begin().await;

        let Some(record) = txn.check().await? else {
            return Ok(None);
        };

        let report = self
            .supervisor
            .terminate(&record, Some(self.stop_timeout))
            .await;
        if !report.is_complete() {
            warn!(
                app = %record.app,
                survivors = ?report.survivors,
                "Processes outlived the stop timeout, keeping lock"
            );
            return Err(AppError::StillRunning {
                record,
                survivors: report.survivors,
            });
        }

        txn.release().await?;
        info!(app = %record.app, pid = record.pid, "Application stopped");
        Ok(Some((record, report)))
    }

    /// Installed applications with their descriptors.
    pub async fn list(&self) -> Result<BTreeMap<String, AppDescriptor>, AppError> {
        Ok(self.catalog.list().await?)
    }
}
