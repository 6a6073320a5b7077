//! Daemon configuration.
//!
//! Loaded from TOML (`--config <path>`, else `<config_dir>/kiosk/config.toml`
//! when it exists, else built-in defaults), then overridden from the
//! environment. Every field has a default so a partial file is valid.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Environment variable overriding the control socket path.
pub const ENV_SOCKET: &str = "KIOSK_SOCKET";

/// Environment variable overriding the serial device path.
pub const ENV_SERIAL_PORT: &str = "KIOSK_SERIAL_PORT";

/// Environment variable overriding the applications directory.
pub const ENV_APPS_DIR: &str = "KIOSK_APPS_DIR";

/// Environment variable overriding the lock file path.
pub const ENV_LOCK_FILE: &str = "KIOSK_LOCK_FILE";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Invalid config file {path}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KioskConfig {
    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub apps: AppsConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Display controller link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial device path
    #[serde(default = "default_serial_port")]
    pub port: String,

    /// Line speed
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Selector used for display power commands
    #[serde(default = "default_selector")]
    pub selector: String,

    /// Reply deadline, measured from the first read attempt
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

/// Application management settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppsConfig {
    /// Directory containing one subdirectory per application
    #[serde(default = "default_apps_dir")]
    pub dir: PathBuf,

    /// Launcher file name inside each application directory
    #[serde(default = "default_launcher")]
    pub launcher: String,

    /// Program used to run the launcher; an empty path executes it directly
    #[serde(default = "default_interpreter")]
    pub interpreter: Option<PathBuf>,

    /// Lock file recording the running application
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,

    /// How long a stop request waits for the process tree to exit
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Send SIGKILL to processes that outlive the stop timeout.
    ///
    /// Off by default: a plain SIGTERM is the historical behavior.
    #[serde(default)]
    pub escalate_to_kill: bool,
}

/// Control socket settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
}

// Default value functions for serde
fn default_serial_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_selector() -> String {
    kiosk_protocol::DEFAULT_SELECTOR.to_string()
}

fn default_response_timeout_ms() -> u64 {
    3000
}

fn default_apps_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("kiosk")
        .join("apps")
}

fn default_launcher() -> String {
    "launch.sh".to_string()
}

fn default_interpreter() -> Option<PathBuf> {
    Some(PathBuf::from("/bin/sh"))
}

fn default_lock_file() -> PathBuf {
    state_dir().join("app.lock")
}

fn default_stop_timeout_ms() -> u64 {
    5000
}

fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("kiosk.sock")
}

/// Returns the daemon state directory (pid file, log file, lock file).
pub fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("kiosk")
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            selector: default_selector(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

impl Default for AppsConfig {
    fn default() -> Self {
        Self {
            dir: default_apps_dir(),
            launcher: default_launcher(),
            interpreter: default_interpreter(),
            lock_file: default_lock_file(),
            stop_timeout_ms: default_stop_timeout_ms(),
            escalate_to_kill: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
        }
    }
}

impl SerialConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl AppsConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl KioskConfig {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kiosk")
            .join("config.toml")
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Loads configuration and applies environment overrides.
    ///
    /// An explicitly given path must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::read(path)?,
            None => {
                let default_path = Self::default_path();
                if default_path.exists() {
                    Self::read(&default_path)?
                } else {
                    debug!(path = %default_path.display(), "No config file, using defaults");
                    Self::default()
                }
            }
        };

        config.apply_env_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml(&contents, path)
    }

    /// Applies overrides from a key lookup (the process environment in
    /// production).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(socket) = lookup(ENV_SOCKET) {
            self.server.socket_path = PathBuf::from(socket);
        }
        if let Some(port) = lookup(ENV_SERIAL_PORT) {
            self.serial.port = port;
        }
        if let Some(dir) = lookup(ENV_APPS_DIR) {
            self.apps.dir = PathBuf::from(dir);
        }
        if let Some(lock_file) = lookup(ENV_LOCK_FILE) {
            self.apps.lock_file = PathBuf::from(lock_file);
        }
    }
}
