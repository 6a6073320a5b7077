//! Control socket server.
//!
//! One task per client connection; every task shares the same
//! [`Controller`]. Serial commands and application requests from different
//! clients meet there, not here.

mod connection;

pub use connection::{ConnectionError, ConnectionHandler, MAX_MESSAGE_SIZE};

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::controller::Controller;

/// How long connections may keep running once shutdown starts.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },
}

pub struct DaemonServer {
    socket_path: PathBuf,
    controller: Arc<Controller>,
    cancel_token: CancellationToken,
}

impl DaemonServer {
    pub fn new(
        socket_path: impl Into<PathBuf>,
        controller: Arc<Controller>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            controller,
            cancel_token,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Serves clients until the cancellation token fires, then removes the
    /// socket file and drains open connections.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = bind_socket(&self.socket_path).map_err(|e| ServerError::SocketSetup {
            path: self.socket_path.clone(),
            error: e.to_string(),
        })?;
        info!(socket = %self.socket_path.display(), "Daemon server listening");

        let mut connections = JoinSet::new();
        let mut accepted: u64 = 0;

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!(open = connections.len(), "Server shutdown requested");
                    break;
                }
                accept = listener.accept() => match accept {
                    Ok((stream, _)) => {
                        connections.spawn(self.serve(stream, accepted));
                        accepted += 1;
                    }
                    Err(e) => error!(error = %e, "Failed to accept connection"),
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        warn!(error = %e, "Connection task failed");
                    }
                }
            }
        }

        drop(listener);
        self.remove_socket();
        self.drain(connections).await;
        Ok(())
    }

    fn serve(&self, stream: UnixStream, connection_number: u64) -> impl Future<Output = ()> {
        let (reader, writer) = stream.into_split();
        let controller = Arc::clone(&self.controller);
        let handler = ConnectionHandler::new(reader, writer, controller, connection_number);
        async move {
            if let Some(client_id) = handler.run().await {
                debug!(client_id, "Connection finished");
            }
        }
    }

    async fn drain(&self, mut connections: JoinSet<()>) {
        if connections.is_empty() {
            return;
        }
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(open = connections.len(), "Aborting connections still open at shutdown");
            connections.shutdown().await;
        }
    }

    fn remove_socket(&self) {
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => info!("Socket removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                socket = %self.socket_path.display(),
                error = %e,
                "Failed to remove socket file"
            ),
        }
    }
}

/// Binds `path`, replacing a socket left behind by an unclean exit.
fn bind_socket(path: &Path) -> io::Result<UnixListener> {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(socket = %path.display(), "Removed stale socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    UnixListener::bind(path)
}
