//! Kiosk control client
//!
//! Sends one request to a running `kioskd` and prints the JSON reply.
//!
//! # Usage
//!
//! ```text
//! kioskctl display on          # Power the display on
//! kioskctl display status      # Query display power
//! kioskctl send input.source --value hdmi2
//! kioskctl launch chess        # Start an installed application
//! kioskctl status              # Which application is running
//! kioskctl stop                # Stop it
//! kioskctl list                # Installed applications
//! ```
//!
//! Exits non-zero when the daemon reports a failure.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use kiosk_protocol::{ClientMessage, DaemonMessage, DisplayAction, MessageType};
use kioskd::client::ControlClient;
use kioskd::config::KioskConfig;

/// Kiosk control client
#[derive(Parser, Debug)]
#[command(name = "kioskctl", version, about)]
struct Args {
    /// Control socket (default: from configuration)
    #[arg(short, long, global = true, env = "KIOSK_SOCKET")]
    socket: Option<PathBuf>,

    /// Configuration file used to locate the socket
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Seconds to wait for the reply
    #[arg(short, long, global = true, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Display power control
    Display {
        #[arg(value_enum)]
        action: PowerArg,
    },
    /// Send an arbitrary controller command
    Send {
        /// Command name, e.g. `display.power`
        command: String,
        /// Value to set; omit to query
        #[arg(long)]
        value: Option<String>,
        /// Controller address (`*` broadcasts)
        #[arg(long)]
        selector: Option<String>,
        /// Sub-target within the addressed controller
        #[arg(long = "sub")]
        sub_target: Option<String>,
        /// Command kind prefix
        #[arg(long)]
        kind: Option<String>,
    },
    /// Launch an installed application
    Launch { app: String },
    /// Stop the running application
    Stop,
    /// Show the running application
    Status,
    /// List installed applications
    List,
    /// Check the daemon is answering
    Ping,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PowerArg {
    On,
    Off,
    Status,
}

impl From<PowerArg> for DisplayAction {
    fn from(arg: PowerArg) -> Self {
        match arg {
            PowerArg::On => DisplayAction::On,
            PowerArg::Off => DisplayAction::Off,
            PowerArg::Status => DisplayAction::Status,
        }
    }
}

impl Command {
    fn into_message(self) -> ClientMessage {
        match self {
            Command::Display { action } => ClientMessage::display(action.into()),
            Command::Send {
                command,
                value,
                selector,
                sub_target,
                kind,
            } => ClientMessage::new(MessageType::Serial {
                command,
                value,
                selector,
                sub_target,
                kind,
            }),
            Command::Launch { app } => ClientMessage::app_launch(app),
            Command::Stop => ClientMessage::app_stop(),
            Command::Status => ClientMessage::app_status(),
            Command::List => ClientMessage::app_list(),
            Command::Ping => ClientMessage::ping(1),
        }
    }
}

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("kioskctl: {e:#}");
            process::exit(2);
        }
    }
}

/// Returns whether the daemon reported success.
#[tokio::main(flavor = "current_thread")]
async fn run() -> Result<bool> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let socket_path = match args.socket {
        Some(path) => path,
        None => {
            KioskConfig::load(args.config.as_deref())
                .context("Failed to load configuration")?
                .server
                .socket_path
        }
    };

    let mut client = ControlClient::connect(&socket_path, None)
        .await?
        .with_request_timeout(Duration::from_secs(args.timeout));
    let reply = client.request(&args.command.into_message()).await?;
    client.disconnect().await?;

    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(succeeded(&reply))
}

fn succeeded(reply: &DaemonMessage) -> bool {
    match reply {
        DaemonMessage::Outcome { .. } => reply.is_success(),
        DaemonMessage::Error { .. } | DaemonMessage::Rejected { .. } => false,
        _ => true,
    }
}
