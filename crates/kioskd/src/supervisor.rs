//! Application launch and process-tree termination.
//!
//! The launcher runs in its own process group with stdin closed and the
//! application directory as working directory, so the daemon's terminal
//! signals never reach it. The daemon does not keep a handle to it beyond
//! a background task that reaps its exit status; the lock record's pid is
//! the only link back.
//!
//! Termination signals the recorded pid and every descendant present in a
//! fresh process-table snapshot, then optionally waits for them to exit.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use kiosk_core::{AppName, LockRecord};

use crate::config::AppsConfig;
use crate::process_tree::{descendants_of, is_alive, send_signal, ProcessTable, StopSignal};

/// Interval between liveness polls while waiting for exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long SIGKILLed processes get to disappear.
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Errors from [`ProcessSupervisor::launch`].
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Launcher not found: {path}")]
    LauncherMissing { path: PathBuf },

    #[error("Failed to start {path}: {error}")]
    Spawn { path: PathBuf, error: String },
}

/// What a termination did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminateReport {
    /// Pids that received SIGTERM
    pub signaled: BTreeSet<u32>,
    /// Pids still alive when waiting gave up (empty when not waiting)
    pub survivors: BTreeSet<u32>,
    /// Whether SIGKILL was sent to survivors
    pub escalated: bool,
}

impl TerminateReport {
    /// True if the recorded process was already gone.
    pub fn was_gone(&self) -> bool {
        self.signaled.is_empty()
    }

    /// True if nothing signaled is known to be alive.
    pub fn is_complete(&self) -> bool {
        self.survivors.is_empty()
    }
}

/// Starts and stops managed applications.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    launcher: String,
    interpreter: Option<PathBuf>,
    escalate_to_kill: bool,
}

impl ProcessSupervisor {
    /// `interpreter` runs the launcher; `None` (or an empty path) executes
    /// the launcher directly.
    pub fn new(launcher: impl Into<String>, interpreter: Option<PathBuf>) -> Self {
        Self {
            launcher: launcher.into(),
            interpreter: interpreter.filter(|path| !path.as_os_str().is_empty()),
            escalate_to_kill: false,
        }
    }

    pub fn from_config(config: &AppsConfig) -> Self {
        Self::new(config.launcher.clone(), config.interpreter.clone())
            .with_kill_escalation(config.escalate_to_kill)
    }

    /// Send SIGKILL to processes still alive after the termination wait.
    pub fn with_kill_escalation(mut self, enabled: bool) -> Self {
        self.escalate_to_kill = enabled;
        self
    }

    /// Path of the launcher inside `app_dir`.
    pub fn launcher_path(&self, app_dir: &Path) -> PathBuf {
        app_dir.join(&self.launcher)
    }

    /// Starts `app` from `app_dir` and returns the record to lock.
    ///
    /// The caller is responsible for making sure no other application is
    /// active. Must be called from within a Tokio runtime.
    pub fn launch(&self, app: &AppName, app_dir: &Path) -> Result<LockRecord, LaunchError> {
        let launcher = self.launcher_path(app_dir);
        if !launcher.is_file() {
            return Err(LaunchError::LauncherMissing { path: launcher });
        }

        let mut command = match &self.interpreter {
            Some(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(&launcher);
                command
            }
            None => Command::new(&launcher),
        };
        command
            .current_dir(app_dir)
            .stdin(Stdio::null())
            .process_group(0)
            .kill_on_drop(false);

        let mut child = command.spawn().map_err(|e| LaunchError::Spawn {
            path: launcher.clone(),
            error: e.to_string(),
        })?;

        let Some(pid) = child.id() else {
            return Err(LaunchError::Spawn {
                path: launcher,
                error: "process exited before its pid was known".to_string(),
            });
        };

        let name = app.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => info!(app = %name, pid, status = %status, "Application exited"),
                Err(e) => warn!(app = %name, pid, error = %e, "Failed to reap application"),
            }
        });

        info!(app = %app, pid, launcher = %launcher.display(), "Application launched");
        Ok(LockRecord::new(pid, app.clone()))
    }

    /// Sends SIGTERM to the recorded process and all of its descendants.
    ///
    /// With `wait`, polls until every signaled process has exited or the
    /// duration elapses; leftovers are reported as survivors (and killed,
    /// if escalation is enabled). A recorded process that is already gone
    /// is a no-op.
    pub async fn terminate(&self, record: &LockRecord, wait: Option<Duration>) -> TerminateReport {
        let mut report = TerminateReport::default();

        if !is_alive(record.pid) {
            debug!(app = %record.app, pid = record.pid, "Application already exited");
            return report;
        }

        let table = tokio::task::spawn_blocking(ProcessTable::snapshot)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Process table snapshot failed");
                ProcessTable::default()
            });

        let mut members = descendants_of(&table, record.pid);
        members.insert(record.pid);

        report.signaled = signal_all(&members, StopSignal::Terminate);
        info!(
            app = %record.app,
            pid = record.pid,
            signaled = report.signaled.len(),
            "Sent SIGTERM to application tree"
        );

        let Some(wait) = wait else {
            return report;
        };

        report.survivors = wait_for_exit(report.signaled.clone(), wait).await;

        if !report.survivors.is_empty() && self.escalate_to_kill {
            warn!(survivors = ?report.survivors, "Escalating to SIGKILL");
            signal_all(&report.survivors, StopSignal::Kill);
            report.escalated = true;
            report.survivors = wait_for_exit(report.survivors.clone(), KILL_GRACE).await;
        }

        if !report.survivors.is_empty() {
            warn!(
                app = %record.app,
                survivors = ?report.survivors,
                "Processes still running after termination wait"
            );
        }

        report
    }
}

/// Signals each pid, returning the ones that received it.
fn signal_all(pids: &BTreeSet<u32>, signal: StopSignal) -> BTreeSet<u32> {
    pids.iter()
        .copied()
        .filter(|&pid| match send_signal(pid, signal) {
            Ok(delivered) => delivered,
            Err(e) => {
                warn!(pid, signal = ?signal, error = %e, "Failed to signal process");
                false
            }
        })
        .collect()
}

/// Polls until every pid is gone or `wait` elapses; returns the rest.
async fn wait_for_exit(mut pending: BTreeSet<u32>, wait: Duration) -> BTreeSet<u32> {
    let deadline = Instant::now() + wait;

    loop {
        pending.retain(|&pid| is_alive(pid));
        if pending.is_empty() || Instant::now() >= deadline {
            return pending;
        }
        sleep(EXIT_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn app(name: &str) -> AppName {
        AppName::parse(name).unwrap()
    }

    #[test]
    fn test_empty_interpreter_means_direct_exec() {
        let supervisor = ProcessSupervisor::new("launch.sh", Some(PathBuf::new()));
        assert!(supervisor.interpreter.is_none());
    }

    #[tokio::test]
    async fn test_launch_missing_launcher() {
        let dir = TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new("launch.sh", Some(PathBuf::from("/bin/sh")));

        let err = supervisor.launch(&app("chess"), dir.path()).unwrap_err();
        match err {
            LaunchError::LauncherMissing { path } => assert_eq!(path, dir.path().join("launch.sh")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_launch_runs_in_app_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("launch.sh"), "pwd > cwd.txt\n").unwrap();
        let supervisor = ProcessSupervisor::new("launch.sh", Some(PathBuf::from("/bin/sh")));

        let record = supervisor.launch(&app("chess"), dir.path()).unwrap();
        assert_eq!(record.app, app("chess"));
        assert!(record.pid > 1);

        let marker = dir.path().join("cwd.txt");
        let deadline = Instant::now() + Duration::from_secs(5);
        while !marker.exists() && Instant::now() < deadline {
            sleep(Duration::from_millis(20)).await;
        }
        let cwd = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(
            PathBuf::from(cwd.trim()).canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn test_terminate_gone_process_is_noop() {
        let supervisor = ProcessSupervisor::new("launch.sh", None);
        let record = LockRecord::new(999_999_999, app("chess"));

        let report = supervisor
            .terminate(&record, Some(Duration::from_millis(100)))
            .await;
        assert!(report.was_gone());
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_terminate_single_process() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("launch.sh"), "exec sleep 30\n").unwrap();
        let supervisor = ProcessSupervisor::new("launch.sh", Some(PathBuf::from("/bin/sh")));

        let record = supervisor.launch(&app("chess"), dir.path()).unwrap();
        assert!(is_alive(record.pid));

        let report = supervisor
            .terminate(&record, Some(Duration::from_secs(5)))
            .await;
        assert!(report.signaled.contains(&record.pid));
        assert!(report.is_complete());
        assert!(!report.escalated);
        assert!(!is_alive(record.pid));
    }
}
