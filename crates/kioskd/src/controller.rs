//! Request handling behind the control socket.
//!
//! Every method turns a request into a [`DaemonMessage`]. Failures become
//! `success = false` outcomes with a human-readable reason; nothing here
//! is fatal to the daemon.

use serde_json::Value;
use tracing::{debug, warn};

use kiosk_protocol::{CommandResponse, DaemonMessage, DisplayAction, SerialCommand};

use crate::apps::{AppError, AppManager};
use crate::catalog::CatalogError;
use crate::serial::{TransportError, TransportHandle};
use crate::supervisor::LaunchError;

/// Controller command for display power.
pub const DISPLAY_POWER: &str = "display.power";

pub const REASON_CONTROLLER: &str = "Controller didn't return, or returned an error.";
pub const REASON_APP_ACTIVE: &str = "An application is already active.";
pub const REASON_APP_NOT_FOUND: &str = "Application not found.";
pub const REASON_LAUNCHER_MISSING: &str = "Launcher not found.";
pub const REASON_APP_NOT_STOPPED: &str = "Application did not stop.";

/// Fields of an arbitrary controller command.
#[derive(Debug, Clone, Default)]
pub struct SerialRequest {
    pub command: String,
    pub value: Option<String>,
    pub selector: Option<String>,
    pub sub_target: Option<String>,
    pub kind: Option<String>,
}

impl SerialRequest {
    fn into_command(self, default_selector: &str) -> SerialCommand {
        let mut command = match self.value {
            Some(value) => SerialCommand::set(self.command, value),
            None => SerialCommand::query(self.command),
        };
        command = command.with_selector(self.selector.unwrap_or_else(|| default_selector.to_string()));
        if let Some(kind) = self.kind {
            command = command.with_kind(kind);
        }
        if let Some(sub_target) = self.sub_target {
            command = command.with_sub_target(sub_target);
        }
        command
    }
}

pub struct Controller {
    transport: TransportHandle,
    selector: String,
    apps: AppManager,
}

impl Controller {
    /// `selector` addresses display power commands.
    pub fn new(transport: TransportHandle, selector: impl Into<String>, apps: AppManager) -> Self {
        Self {
            transport,
            selector: selector.into(),
            apps,
        }
    }

    pub fn apps(&self) -> &AppManager {
        &self.apps
    }

    pub async fn display(&self, action: DisplayAction) -> DaemonMessage {
        let command = match action {
            DisplayAction::On => SerialCommand::set(DISPLAY_POWER, "ON"),
            DisplayAction::Off => SerialCommand::set(DISPLAY_POWER, "OFF"),
            DisplayAction::Status => SerialCommand::query(DISPLAY_POWER),
        }
        .with_selector(self.selector.as_str());

        self.run_command(command).await
    }

    pub async fn serial(&self, request: SerialRequest) -> DaemonMessage {
        let command = request.into_command(&self.selector);
        self.run_command(command).await
    }

    async fn run_command(&self, command: SerialCommand) -> DaemonMessage {
        match self.transport.execute(command).await {
            Ok(CommandResponse::Ack) => DaemonMessage::success(Value::Bool(true)),
            Ok(CommandResponse::Value(value)) => DaemonMessage::success(Value::String(value)),
            Ok(CommandResponse::NoReply) => DaemonMessage::success(Value::Null),
            Err(e) => DaemonMessage::failure(transport_reason(&e)),
        }
    }

    pub async fn app_launch(&self, name: &str) -> DaemonMessage {
        match self.apps.launch(name).await {
            Ok(record) => DaemonMessage::success(Value::from(record.pid)),
            Err(e) => {
                debug!(app = name, error = %e, "Launch failed");
                DaemonMessage::failure(app_reason(&e))
            }
        }
    }

    pub async fn app_stop(&self) -> DaemonMessage {
        match self.apps.stop().await {
            Ok(Some((record, report))) => DaemonMessage::success(serde_json::json!({
                "app": record.app.as_str(),
                "signaled": report.signaled.len(),
            })),
            Ok(None) => DaemonMessage::success(Value::Null),
            Err(AppError::StillRunning { record, survivors }) => DaemonMessage::Outcome {
                success: false,
                result: serde_json::json!({
                    "app": record.app.as_str(),
                    "survivors": survivors,
                }),
                reason: REASON_APP_NOT_STOPPED.to_string(),
            },
            Err(e) => {
                warn!(error = %e, "Stop failed");
                DaemonMessage::failure(app_reason(&e))
            }
        }
    }

    pub async fn app_status(&self) -> DaemonMessage {
        match self.apps.status().await {
            Ok(record) => DaemonMessage::app_status(record.map(|r| r.app.to_string())),
            Err(e) => {
                warn!(error = %e, "Status check failed");
                DaemonMessage::error_with_code(&e.to_string(), "LOCK_ERROR")
            }
        }
    }

    pub async fn app_list(&self) -> DaemonMessage {
        match self.apps.list().await {
            Ok(apps) => DaemonMessage::app_list(apps),
            Err(e) => {
                warn!(error = %e, "Listing applications failed");
                DaemonMessage::error_with_code(&e.to_string(), "CATALOG_ERROR")
            }
        }
    }
}

fn transport_reason(err: &TransportError) -> String {
    format!("{REASON_CONTROLLER} ({err})")
}

fn app_reason(err: &AppError) -> String {
    match err {
        AppError::AlreadyActive(_) => REASON_APP_ACTIVE.to_string(),
        AppError::Catalog(CatalogError::AppNotFound(_)) => REASON_APP_NOT_FOUND.to_string(),
        AppError::Launch(LaunchError::LauncherMissing { .. }) => REASON_LAUNCHER_MISSING.to_string(),
        AppError::StillRunning { .. } => REASON_APP_NOT_STOPPED.to_string(),
        other => other.to_string(),
    }
}
