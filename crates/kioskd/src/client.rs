//! Control socket client.
//!
//! Used by `kioskctl` and the integration tests. One request is in flight
//! at a time; each request waits for exactly one reply.
//!
//! **Panic-Free Policy:** no `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()` or `todo!()` outside tests.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::debug;

use kiosk_protocol::{ClientMessage, DaemonMessage, ProtocolVersion};

/// Reply deadline. Covers a full stop-timeout plus a serial deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the control client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Cannot reach daemon at {path}: {error}")]
    Connect { path: String, error: std::io::Error },

    #[error("Version mismatch: client {client_version}, daemon {daemon_version}")]
    VersionMismatch {
        client_version: String,
        daemon_version: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Daemon closed the connection")]
    Closed,

    #[error("No reply within {0:?}")]
    Timeout(Duration),
}

/// A connected, handshaken control session.
pub struct ControlClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    client_id: String,
    request_timeout: Duration,
}

impl ControlClient {
    /// Connects to the daemon and performs the handshake.
    pub async fn connect(socket_path: &Path, client_id: Option<String>) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|error| ClientError::Connect {
                path: socket_path.display().to_string(),
                error,
            })?;
        let (reader, writer) = stream.into_split();

        let mut client = Self {
            reader: BufReader::new(reader),
            writer,
            client_id: String::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        };

        match client.request(&ClientMessage::connect(client_id)).await? {
            DaemonMessage::Connected {
                protocol_version,
                client_id,
            } => {
                if !ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
                    return Err(ClientError::VersionMismatch {
                        client_version: ProtocolVersion::CURRENT.to_string(),
                        daemon_version: protocol_version.to_string(),
                    });
                }
                debug!(client_id, protocol_version = %protocol_version, "Handshake complete");
                client.client_id = client_id;
                Ok(client)
            }
            DaemonMessage::Rejected {
                protocol_version, ..
            } => Err(ClientError::VersionMismatch {
                client_version: ProtocolVersion::CURRENT.to_string(),
                daemon_version: protocol_version.to_string(),
            }),
            other => Err(ClientError::Protocol(format!(
                "Unexpected response to connect: {other:?}"
            ))),
        }
    }

    /// Overrides the reply deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Client ID assigned during the handshake.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Sends one request and waits for its reply.
    pub async fn request(&mut self, message: &ClientMessage) -> Result<DaemonMessage, ClientError> {
        let json = serde_json::to_string(message)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        debug!(message_type = ?message.message, "Sent request");

        let mut line = String::new();
        let read = timeout(self.request_timeout, self.reader.read_line(&mut line))
            .await
            .map_err(|_| ClientError::Timeout(self.request_timeout))??;
        if read == 0 {
            return Err(ClientError::Closed);
        }

        Ok(serde_json::from_str(line.trim())?)
    }

    /// Says goodbye and closes the connection.
    pub async fn disconnect(mut self) -> Result<(), ClientError> {
        let json = serde_json::to_string(&ClientMessage::disconnect())?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}
