//! Control socket message types.
//!
//! Messages are newline-delimited JSON objects tagged by `type`.

use std::collections::BTreeMap;

use crate::version::ProtocolVersion;
use kiosk_core::AppDescriptor;
use serde::{Deserialize, Serialize};

/// Display power actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayAction {
    On,
    Off,
    Status,
}

/// Message types that can be sent by clients to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Client handshake/connection request
    Connect {
        /// Client identifier (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Display power control
    Display { action: DisplayAction },

    /// Arbitrary controller command
    Serial {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sub_target: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
    },

    /// Launch an application by directory name
    AppLaunch { app: String },

    /// Stop the running application
    AppStop,

    /// Query which application is running
    AppStatus,

    /// List installed applications
    AppList,

    /// Ping to check connection
    Ping {
        /// Sequence number for matching pong response
        seq: u64,
    },

    /// Client disconnecting gracefully
    Disconnect,
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    /// Creates a connect message.
    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    /// Creates a display power message.
    pub fn display(action: DisplayAction) -> Self {
        Self::new(MessageType::Display { action })
    }

    /// Creates a launch request.
    pub fn app_launch(app: impl Into<String>) -> Self {
        Self::new(MessageType::AppLaunch { app: app.into() })
    }

    /// Creates a stop request.
    pub fn app_stop() -> Self {
        Self::new(MessageType::AppStop)
    }

    /// Creates a status request.
    pub fn app_status() -> Self {
        Self::new(MessageType::AppStatus)
    }

    /// Creates a list request.
    pub fn app_list() -> Self {
        Self::new(MessageType::AppList)
    }

    /// Creates a ping message.
    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    /// Creates a disconnect message.
    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Connection accepted
    Connected {
        /// Daemon's protocol version
        protocol_version: ProtocolVersion,
        /// Assigned client ID
        client_id: String,
    },

    /// Connection rejected (version mismatch, etc.)
    Rejected {
        /// Reason for rejection
        reason: String,
        /// Daemon's protocol version (for client to upgrade)
        protocol_version: ProtocolVersion,
    },

    /// Outcome of a display, serial, launch or stop request
    Outcome {
        success: bool,
        /// Operation result (`null` when there is none)
        #[serde(default)]
        result: serde_json::Value,
        /// Human-readable failure reason, empty on success
        #[serde(default)]
        reason: String,
    },

    /// Managed application status
    AppStatus { active: bool, application: String },

    /// Installed applications keyed by directory name
    AppList {
        apps: BTreeMap<String, AppDescriptor>,
    },

    /// Pong response to ping
    Pong {
        /// Sequence number from ping
        seq: u64,
    },

    /// Error response
    Error {
        /// Error message
        message: String,
        /// Error code (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl DaemonMessage {
    /// Creates a connected response.
    pub fn connected(client_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
        }
    }

    /// Creates a rejected response.
    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    /// Creates a successful outcome carrying a result.
    pub fn success(result: serde_json::Value) -> Self {
        Self::Outcome {
            success: true,
            result,
            reason: String::new(),
        }
    }

    /// Creates a failed outcome with a reason.
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Outcome {
            success: false,
            result: serde_json::Value::Bool(false),
            reason: reason.into(),
        }
    }

    /// Creates an application status response.
    pub fn app_status(application: Option<String>) -> Self {
        Self::AppStatus {
            active: application.is_some(),
            application: application.unwrap_or_default(),
        }
    }

    /// Creates an application list response.
    pub fn app_list(apps: BTreeMap<String, AppDescriptor>) -> Self {
        Self::AppList { apps }
    }

    /// Creates a pong response.
    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    /// Creates an error response.
    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    /// Creates an error response with code.
    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }

    /// Returns true for a successful outcome.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Outcome { success: true, .. })
    }
}
