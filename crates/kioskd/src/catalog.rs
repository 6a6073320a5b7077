//! Installed applications.
//!
//! Each subdirectory of the applications directory is one application. It
//! may carry an `app.json` descriptor; directories without one (or with an
//! unreadable one) are listed with a placeholder descriptor.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use kiosk_core::{AppDescriptor, AppName};

/// Descriptor file name inside an application directory.
pub const DESCRIPTOR_FILE: &str = "app.json";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Application not found: {0}")]
    AppNotFound(String),

    #[error("Failed to read applications directory {path}: {error}")]
    Io { path: PathBuf, error: io::Error },
}

/// Read-only view of the applications directory.
#[derive(Debug, Clone)]
pub struct AppCatalog {
    root: PathBuf,
}

impl AppCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `name` to its validated identifier and directory.
    ///
    /// Names that could escape the applications directory are reported as
    /// not found.
    pub async fn resolve(&self, name: &str) -> Result<(AppName, PathBuf), CatalogError> {
        let app = AppName::parse(name).map_err(|e| {
            debug!(name, error = %e, "Rejected application name");
            CatalogError::AppNotFound(name.to_string())
        })?;

        let dir = self.root.join(app.as_str());
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok((app, dir)),
            _ => Err(CatalogError::AppNotFound(name.to_string())),
        }
    }

    /// Lists every installed application with its descriptor.
    pub async fn list(&self) -> Result<BTreeMap<String, AppDescriptor>, CatalogError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| self.io_error(e))?;

        let mut apps = BTreeMap::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| self.io_error(e))? {
            let Ok(app) = AppName::parse(entry.file_name().to_string_lossy().into_owned()) else {
                continue;
            };
            let path = entry.path();
            // Follows symlinks, so linked application directories count.
            let is_dir = tokio::fs::metadata(&path)
                .await
                .map(|meta| meta.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }

            let descriptor = read_descriptor(&app, &path).await;
            apps.insert(app.to_string(), descriptor);
        }

        Ok(apps)
    }

    fn io_error(&self, error: io::Error) -> CatalogError {
        CatalogError::Io {
            path: self.root.clone(),
            error,
        }
    }
}

async fn read_descriptor(app: &AppName, dir: &Path) -> AppDescriptor {
    let path = dir.join(DESCRIPTOR_FILE);
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return AppDescriptor::placeholder(app),
        Err(e) => {
            warn!(app = %app, error = %e, "Failed to read application descriptor");
            return AppDescriptor::placeholder(app);
        }
    };

    AppDescriptor::from_json(&contents).unwrap_or_else(|e| {
        warn!(app = %app, error = %e, "Invalid application descriptor");
        AppDescriptor::placeholder(app)
    })
}
