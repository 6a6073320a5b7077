//! Kiosk Daemon - display controller link and application supervisor
//!
//! This binary runs as a background daemon, serving display power and
//! application requests from control clients over a Unix socket.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! kioskd start
//!
//! # Start the daemon (background/daemonized)
//! kioskd start -d
//!
//! # Start without display hardware
//! kioskd start --simulate-display
//!
//! # Stop the daemon
//! kioskd stop
//!
//! # Check daemon status
//! kioskd status
//!
//! # Enable debug logging
//! RUST_LOG=kioskd=debug kioskd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown. A running application is left
//!   running and its lock stays in place for the next daemon.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kioskd::apps::AppManager;
use kioskd::config::{state_dir, KioskConfig};
use kioskd::controller::Controller;
use kioskd::process_tree::{is_alive, send_signal, StopSignal};
use kioskd::serial::{spawn_transport, MemoryLink, SerialPortLink, TransportHandle};
use kioskd::server::DaemonServer;

/// Kiosk daemon - display power and application supervision
#[derive(Parser, Debug)]
#[command(name = "kioskd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Configuration file (default: <config_dir>/kiosk/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Answer display commands from memory instead of the serial port
        #[arg(long)]
        simulate_display: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status {
        /// Configuration file used to locate the socket
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Returns the path to the PID file.
fn pid_file_path() -> PathBuf {
    state_dir().join("kioskd.pid")
}

/// Returns the path to the log file.
fn log_file_path() -> PathBuf {
    state_dir().join("kioskd.log")
}

/// Reads the PID from the PID file, if it exists.
fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// Writes the current PID to the PID file.
fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

/// Returns the daemon's PID if it is running, clearing a stale PID file.
fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_alive(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        config: None,
        simulate_display: false,
    });

    match command {
        Command::Start {
            daemon,
            config,
            simulate_display,
        } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'kioskd stop' to stop it first.");
                process::exit(1);
            }

            // Before daemonizing, so relative paths and errors reach the terminal.
            let config = KioskConfig::load(config.as_deref()).context("Failed to load configuration")?;

            if daemon {
                daemonize()?;
            }

            write_pid()?;
            let result = run_daemon(config, simulate_display);
            remove_pid_file();

            result
        }
        Command::Stop => {
            let Some(pid) = is_daemon_running() else {
                println!("Daemon is not running.");
                return Ok(());
            };

            println!("Stopping daemon (PID {pid})...");
            if !send_signal(pid, StopSignal::Terminate)
                .with_context(|| format!("Failed to send SIGTERM to process {pid}"))?
            {
                println!("Daemon stopped.");
                return Ok(());
            }

            // Wait for process to exit (up to 5 seconds)
            for _ in 0..50 {
                if !is_alive(pid) {
                    println!("Daemon stopped.");
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(100));
            }

            bail!("Daemon did not stop within 5 seconds.");
        }
        Command::Status { config } => {
            let Some(pid) = is_daemon_running() else {
                println!("Daemon is not running.");
                process::exit(1);
            };

            println!("Daemon is running (PID {pid})");
            let config = KioskConfig::load(config.as_deref()).context("Failed to load configuration")?;
            if config.server.socket_path.exists() {
                println!("Socket: {}", config.server.socket_path.display());
            }
            Ok(())
        }
    }
}

/// Daemonizes the current process.
fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon(config: KioskConfig, simulate_display: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("kioskd=info".parse()?)
                .add_directive("kiosk_core=info".parse()?)
                .add_directive("kiosk_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "Kiosk daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let transport = start_transport(&config, simulate_display);

    let apps = AppManager::from_config(&config.apps);
    log_startup_state(&apps, &config.apps.dir).await;

    let controller = Arc::new(Controller::new(
        transport,
        config.serial.selector.clone(),
        apps,
    ));

    let server = DaemonServer::new(&config.server.socket_path, controller, cancel_token);
    info!(socket = %config.server.socket_path.display(), "Starting server");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Kiosk daemon stopped");
    Ok(())
}

fn start_transport(config: &KioskConfig, simulate_display: bool) -> TransportHandle {
    let timeout = config.serial.response_timeout();
    if simulate_display {
        warn!("Using simulated display controller");
        spawn_transport(MemoryLink::simulated_display(), timeout)
    } else {
        spawn_transport(
            SerialPortLink::new(config.serial.port.clone(), config.serial.baud_rate),
            timeout,
        )
    }
}

/// Reports (and self-heals) the lock left by a previous daemon.
async fn log_startup_state(apps: &AppManager, apps_dir: &Path) {
    match apps.status().await {
        Ok(Some(record)) => info!(app = %record.app, pid = record.pid, "Application still running"),
        Ok(None) => info!("No application running"),
        Err(e) => warn!(error = %e, "Failed to read application lock"),
    }
    if !apps_dir.is_dir() {
        warn!(dir = %apps_dir.display(), "Applications directory does not exist");
    }
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}
