//! Application identity and descriptor types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DomainError, DomainResult};

/// Description used when an application ships no `app.json`.
pub const DEFAULT_APP_DESCRIPTION: &str = "Sample Application";

// ============================================================================
// Application Name
// ============================================================================

/// Name of an installed application.
///
/// Application names are directory names directly below the applications
/// directory, so they are validated to never escape it: no path separators,
/// no `.`/`..`, no leading dot and no control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppName(String);

impl AppName {
    /// Parses and validates an application name.
    pub fn parse(name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        let reject = |reason: &str| DomainError::InvalidAppName {
            name: name.clone(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(reject("name is empty"));
        }
        if name.starts_with('.') {
            return Err(reject("name must not start with '.'"));
        }
        if name.contains(['/', '\\']) {
            return Err(reject("name must not contain path separators"));
        }
        if name.chars().any(char::is_control) {
            return Err(reject("name must not contain control characters"));
        }

        Ok(Self(name))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for AppName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<AppName> for String {
    fn from(name: AppName) -> Self {
        name.0
    }
}

// ============================================================================
// Application Descriptor
// ============================================================================

/// Metadata shown on the dashboard for an installed application.
///
/// Read from `app.json` inside the application directory. Fields other
/// than `name` and `description` are preserved untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDescriptor {
    /// Display name
    pub name: String,

    /// Short description
    #[serde(default)]
    pub description: String,

    /// Any additional descriptor fields
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AppDescriptor {
    /// Descriptor for an application directory without `app.json`.
    pub fn placeholder(app: &AppName) -> Self {
        Self {
            name: app.to_string(),
            description: DEFAULT_APP_DESCRIPTION.to_string(),
            extra: serde_json::Map::new(),
        }
    }

    /// Parses a descriptor from the contents of an `app.json` file.
    pub fn from_json(contents: &str) -> DomainResult<Self> {
        serde_json::from_str(contents).map_err(|e| DomainError::ParseError {
            field: "app.json".to_string(),
            reason: e.to_string(),
        })
    }
}
