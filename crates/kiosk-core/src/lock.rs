//! The persisted lock record.
//!
//! The lock file holds exactly one JSON object, `{"pid": <int>, "app": "<name>"}`.
//! Its presence means an application is (or was, if stale) under management.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::app::AppName;
use crate::error::{DomainError, DomainResult};

/// Ownership record for the single managed application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Process ID of the launcher process
    pub pid: u32,

    /// Name of the launched application
    pub app: AppName,
}

impl LockRecord {
    /// Creates a new lock record.
    pub fn new(pid: u32, app: AppName) -> Self {
        Self { pid, app }
    }

    /// Serializes the record to the on-disk JSON form.
    pub fn to_json(&self) -> DomainResult<String> {
        serde_json::to_string(self).map_err(|e| DomainError::ParseError {
            field: "lock record".to_string(),
            reason: e.to_string(),
        })
    }

    /// Parses a record from lock file contents.
    pub fn from_json(contents: &str) -> DomainResult<Self> {
        let record: Self =
            serde_json::from_str(contents.trim()).map_err(|e| DomainError::ParseError {
                field: "lock record".to_string(),
                reason: e.to_string(),
            })?;

        if record.pid == 0 {
            return Err(DomainError::InvalidFieldValue {
                field: "pid".to_string(),
                value: "0".to_string(),
                expected: "a positive process id".to_string(),
            });
        }

        Ok(record)
    }
}

impl fmt::Display for LockRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (pid {})", self.app, self.pid)
    }
}
