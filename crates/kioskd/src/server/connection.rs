//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Performs protocol version negotiation
//! - Parses incoming messages
//! - Routes requests to the controller
//! - Sends one reply per request
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use kiosk_protocol::{ClientMessage, DaemonMessage, MessageType, ProtocolVersion};

use crate::controller::{Controller, SerialRequest};

/// Maximum message size (64 KiB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Read timeout for idle connections (5 minutes)
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection handler for a single client.
pub struct ConnectionHandler<R, W> {
    reader: BufReader<R>,
    writer: BufWriter<W>,
    controller: Arc<Controller>,

    /// Assigned after handshake
    client_id: Option<String>,

    connection_number: u64,
}

impl<R, W> ConnectionHandler<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, controller: Arc<Controller>, connection_number: u64) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            controller,
            client_id: None,
            connection_number,
        }
    }

    /// Performs the handshake, then serves requests until the client
    /// disconnects. Returns the client ID, if the handshake succeeded.
    pub async fn run(mut self) -> Option<String> {
        debug!(connection = self.connection_number, "New client connected");

        match timeout(READ_TIMEOUT, self.handle_handshake()).await {
            Ok(Ok(())) => {
                info!(client_id = ?self.client_id, "Client handshake completed");
            }
            Ok(Err(e)) => {
                warn!(connection = self.connection_number, error = %e, "Handshake failed");
                return None;
            }
            Err(_) => {
                warn!(connection = self.connection_number, "Handshake timed out");
                return None;
            }
        }

        let client_id = self.client_id.clone();

        if let Err(e) = self.process_messages().await {
            debug!(client_id = ?self.client_id, error = %e, "Connection closed");
        }

        info!(client_id = ?self.client_id, "Client disconnected");
        client_id
    }

    /// Expects a `Connect` message with a compatible protocol version and
    /// answers `Connected` or `Rejected`.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = self.read_message().await?;

        let client_version = msg.protocol_version;
        if !client_version.is_compatible_with(&ProtocolVersion::CURRENT) {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );

            self.send_message(DaemonMessage::rejected(&format!(
                "Protocol version {} not compatible with server version {}",
                client_version,
                ProtocolVersion::CURRENT
            )))
            .await?;

            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.message {
            MessageType::Connect { client_id } => {
                let assigned_id =
                    client_id.unwrap_or_else(|| format!("client-{}", self.connection_number));
                self.client_id = Some(assigned_id.clone());
                self.send_message(DaemonMessage::connected(assigned_id)).await
            }
            other => {
                self.send_message(DaemonMessage::error("Expected Connect message for handshake"))
                    .await?;
                Err(ConnectionError::UnexpectedMessage(format!("{other:?}")))
            }
        }
    }

    /// Reads and answers requests until EOF, `Disconnect`, idle timeout or
    /// an unrecoverable error.
    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        loop {
            let msg = match timeout(READ_TIMEOUT, self.read_message()).await {
                Ok(Ok(msg)) => msg,
                Ok(Err(ConnectionError::Eof)) => {
                    debug!(client_id = ?self.client_id, "Client sent EOF");
                    return Ok(());
                }
                Ok(Err(ConnectionError::ParseError(reason))) => {
                    // The line was consumed whole; framing is intact.
                    self.send_message(DaemonMessage::error_with_code(&reason, "PARSE_ERROR"))
                        .await?;
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!(client_id = ?self.client_id, "Connection timed out");
                    return Err(ConnectionError::Timeout);
                }
            };

            if matches!(msg.message, MessageType::Disconnect) {
                debug!(client_id = ?self.client_id, "Client requested disconnect");
                return Ok(());
            }

            let reply = dispatch(&self.controller, msg.message).await;
            self.send_message(reply).await?;
        }
    }

    /// Reads one newline-terminated message of at most [`MAX_MESSAGE_SIZE`]
    /// bytes.
    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let mut line = Vec::new();
        let limit = (MAX_MESSAGE_SIZE + 1) as u64;

        let bytes_read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let msg: ClientMessage =
            serde_json::from_slice(&line).map_err(|e| ConnectionError::ParseError(e.to_string()))?;

        debug!(
            client_id = ?self.client_id,
            message_type = ?std::mem::discriminant(&msg.message),
            "Received message"
        );

        Ok(msg)
    }

    async fn send_message(&mut self, msg: DaemonMessage) -> Result<(), ConnectionError> {
        let json =
            serde_json::to_string(&msg).map_err(|e| ConnectionError::ParseError(e.to_string()))?;

        let writer = &mut self.writer;
        match timeout(WRITE_TIMEOUT, async {
            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}

/// Produces the reply for one request.
async fn dispatch(controller: &Controller, message: MessageType) -> DaemonMessage {
    match message {
        MessageType::Connect { .. } => DaemonMessage::error("Already connected"),
        MessageType::Display { action } => controller.display(action).await,
        MessageType::Serial {
            command,
            value,
            selector,
            sub_target,
            kind,
        } => {
            controller
                .serial(SerialRequest {
                    command,
                    value,
                    selector,
                    sub_target,
                    kind,
                })
                .await
        }
        MessageType::AppLaunch { app } => controller.app_launch(&app).await,
        MessageType::AppStop => controller.app_stop().await,
        MessageType::AppStatus => controller.app_status().await,
        MessageType::AppList => controller.app_list().await,
        MessageType::Ping { seq } => DaemonMessage::pong(seq),
        MessageType::Disconnect => DaemonMessage::error("Disconnecting"),
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::AppManager;
    use crate::catalog::AppCatalog;
    use crate::lock_store::LockStore;
    use crate::serial::{spawn_transport, MemoryLink, DEFAULT_RESPONSE_TIMEOUT};
    use crate::supervisor::ProcessSupervisor;
    use kiosk_protocol::DisplayAction;
    use tempfile::TempDir;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    struct Client {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Client {
        async fn send_raw(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
        }

        async fn send(&mut self, msg: &ClientMessage) {
            self.send_raw(&serde_json::to_string(msg).unwrap()).await;
        }

        async fn recv(&mut self) -> Option<DaemonMessage> {
            let mut line = String::new();
            match self.reader.read_line(&mut line).await.unwrap() {
                0 => None,
                _ => Some(serde_json::from_str(&line).unwrap()),
            }
        }
    }

    fn start(dir: &TempDir) -> (Client, tokio::task::JoinHandle<Option<String>>) {
        let apps = AppManager::new(
            LockStore::new(dir.path().join("app.lock")),
            AppCatalog::new(dir.path()),
            ProcessSupervisor::new("launch.sh", None),
            Duration::from_secs(1),
        );
        let transport = spawn_transport(MemoryLink::simulated_display(), DEFAULT_RESPONSE_TIMEOUT);
        let controller = Arc::new(Controller::new(transport, "A1", apps));

        let (client, server) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let handler = ConnectionHandler::new(server_read, server_write, controller, 7);
        let task = tokio::spawn(handler.run());

        let (client_read, client_write) = tokio::io::split(client);
        (
            Client {
                reader: BufReader::new(client_read),
                writer: client_write,
            },
            task,
        )
    }

    #[tokio::test]
    async fn test_handshake_assigns_client_id() {
        let dir = TempDir::new().unwrap();
        let (mut client, task) = start(&dir);

        client.send(&ClientMessage::connect(None)).await;
        match client.recv().await {
            Some(DaemonMessage::Connected { client_id, .. }) => assert_eq!(client_id, "client-7"),
            other => panic!("unexpected reply: {other:?}"),
        }

        client.send(&ClientMessage::disconnect()).await;
        assert_eq!(task.await.unwrap(), Some("client-7".to_string()));
    }

    #[tokio::test]
    async fn test_incompatible_version_rejected() {
        let dir = TempDir::new().unwrap();
        let (mut client, task) = start(&dir);

        let mut msg = ClientMessage::connect(Some("old".to_string()));
        msg.protocol_version = ProtocolVersion::new(2, 0);
        client.send(&msg).await;

        assert!(matches!(client.recv().await, Some(DaemonMessage::Rejected { .. })));
        assert_eq!(task.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_request_before_connect() {
        let dir = TempDir::new().unwrap();
        let (mut client, task) = start(&dir);

        client.send(&ClientMessage::ping(1)).await;
        assert!(matches!(client.recv().await, Some(DaemonMessage::Error { .. })));
        assert_eq!(task.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_requests_after_handshake() {
        let dir = TempDir::new().unwrap();
        let (mut client, _task) = start(&dir);
        client.send(&ClientMessage::connect(None)).await;
        client.recv().await;

        client.send(&ClientMessage::ping(42)).await;
        assert_eq!(client.recv().await, Some(DaemonMessage::pong(42)));

        client.send(&ClientMessage::display(DisplayAction::On)).await;
        assert!(client.recv().await.unwrap().is_success());

        client.send(&ClientMessage::app_status()).await;
        assert_eq!(client.recv().await, Some(DaemonMessage::app_status(None)));

        client.send_raw("{not json").await;
        match client.recv().await {
            Some(DaemonMessage::Error { code, .. }) => assert_eq!(code.as_deref(), Some("PARSE_ERROR")),
            other => panic!("unexpected reply: {other:?}"),
        }

        // Still usable after a bad line.
        client.send(&ClientMessage::ping(43)).await;
        assert_eq!(client.recv().await, Some(DaemonMessage::pong(43)));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let (mut client, _task) = start(&dir);
        client.send(&ClientMessage::connect(None)).await;
        client.recv().await;

        client.writer.write_all(b"{\"type\":\"\xff\xfe\"}\n").await.unwrap();
        match client.recv().await {
            Some(DaemonMessage::Error { code, .. }) => assert_eq!(code.as_deref(), Some("PARSE_ERROR")),
            other => panic!("unexpected reply: {other:?}"),
        }

        client.send(&ClientMessage::ping(44)).await;
        assert_eq!(client.recv().await, Some(DaemonMessage::pong(44)));
    }

    #[tokio::test]
    async fn test_oversized_message_closes_connection() {
        let dir = TempDir::new().unwrap();
        let (mut client, task) = start(&dir);
        client.send(&ClientMessage::connect(None)).await;
        client.recv().await;

        let huge = "x".repeat(MAX_MESSAGE_SIZE + 10);
        let writer = tokio::spawn(async move {
            // The server may hang up before the whole line is written.
            let _ = client.writer.write_all(huge.as_bytes()).await;
            client
        });

        assert_eq!(task.await.unwrap(), Some("client-7".to_string()));
        let mut client = writer.await.unwrap();
        assert_eq!(client.recv().await, None);
    }

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::VersionMismatch {
            client: ProtocolVersion::new(2, 0),
            server: ProtocolVersion::new(1, 0),
        };
        assert!(err.to_string().contains("2.0"));
        assert!(err.to_string().contains("1.0"));
    }

    #[test]
    fn test_message_size_error() {
        let err = ConnectionError::MessageTooLarge {
            size: 70_000,
            max: MAX_MESSAGE_SIZE,
        };
        assert!(err.to_string().contains("70000"));
        assert!(err.to_string().contains("65536"));
    }
}
