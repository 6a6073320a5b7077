//! Serial transport worker.
//!
//! A single worker task owns the [`SerialLink`]. Commands arrive on an mpsc
//! queue and are executed one at a time, so the link is never opened by two
//! commands at once no matter how many tasks hold a [`TransportHandle`].
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Reply channel failures are ignored (the caller went away)

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use kiosk_protocol::{decode, CodecError, CommandResponse, SerialCommand, TERMINATOR};

use super::link::SerialLink;

/// Reply deadline used when none is configured.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Longest reply accepted before a terminator must appear.
pub const MAX_REPLY_LEN: usize = 1024;

/// Queue depth for pending commands.
const COMMAND_BUFFER: usize = 32;

/// Read chunk size.
const READ_CHUNK: usize = 64;

/// Errors returned by [`TransportHandle::execute`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Link could not be opened, or failed mid-command
    #[error("Serial link unavailable: {0}")]
    Connection(String),

    /// Controller stayed silent past the deadline
    #[error("No reply from display controller within {0:?}")]
    Timeout(Duration),

    /// Controller answered, but not as the command requires
    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(CodecError),

    /// Command would corrupt the line framing; nothing was sent
    #[error("Invalid command: {0}")]
    InvalidCommand(CodecError),

    /// Reply grew past the limit without a terminator
    #[error("Reply exceeded {max} bytes without a terminator")]
    ReplyTooLong { max: usize },

    /// The transport worker has stopped
    #[error("Serial transport has shut down")]
    ChannelClosed,
}

impl From<CodecError> for TransportError {
    fn from(err: CodecError) -> Self {
        if err.is_protocol_mismatch() {
            Self::ProtocolMismatch(err)
        } else {
            Self::InvalidCommand(err)
        }
    }
}

/// One queued command and where to send its outcome.
struct TransportRequest {
    command: SerialCommand,
    respond_to: oneshot::Sender<Result<CommandResponse, TransportError>>,
}

// ============================================================================
// Transport Handle
// ============================================================================

/// Cheap-to-clone handle for submitting commands to the transport worker.
#[derive(Clone)]
pub struct TransportHandle {
    sender: mpsc::Sender<TransportRequest>,
}

impl TransportHandle {
    /// Executes one command and waits for its outcome.
    ///
    /// Commands from all handles run strictly one after another. The wait
    /// includes time spent queued behind other commands.
    pub async fn execute(&self, command: SerialCommand) -> Result<CommandResponse, TransportError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(TransportRequest {
                command,
                respond_to: tx,
            })
            .await
            .map_err(|_| TransportError::ChannelClosed)?;

        rx.await.map_err(|_| TransportError::ChannelClosed)?
    }
}

/// Spawns the transport worker and returns a handle to it.
///
/// The worker stops once every handle has been dropped.
pub fn spawn_transport<L: SerialLink>(link: L, response_timeout: Duration) -> TransportHandle {
    let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);

    let worker = TransportWorker {
        receiver,
        link,
        response_timeout,
    };
    tokio::spawn(worker.run());

    TransportHandle { sender }
}

// ============================================================================
// Transport Worker
// ============================================================================

struct TransportWorker<L> {
    receiver: mpsc::Receiver<TransportRequest>,
    link: L,
    response_timeout: Duration,
}

impl<L: SerialLink> TransportWorker<L> {
    async fn run(mut self) {
        info!(
            link = %self.link.describe(),
            response_timeout_ms = self.response_timeout.as_millis() as u64,
            "Serial transport starting"
        );

        while let Some(request) = self.receiver.recv().await {
            let result = self.execute(&request.command).await;
            log_outcome(&request.command, &result);
            // Ignore send error - caller may have dropped the receiver
            let _ = request.respond_to.send(result);
        }

        info!("Serial transport stopped");
    }

    /// Open, write, read, decode. The stream is dropped (and the link
    /// closed) when this returns, whichever way it returns.
    async fn execute(&self, command: &SerialCommand) -> Result<CommandResponse, TransportError> {
        command.validate().map_err(TransportError::InvalidCommand)?;

        let mut stream = self
            .link
            .open()
            .await
            .map_err(|e| TransportError::Connection(format!("open {}: {e}", self.link.describe())))?;

        let line = command.encode();
        debug!(command = %command, "Writing serial command");

        stream
            .write_all(line.as_bytes())
            .await
            .map_err(|e| TransportError::Connection(format!("write: {e}")))?;
        stream
            .flush()
            .await
            .map_err(|e| TransportError::Connection(format!("flush: {e}")))?;

        if command.is_broadcast() {
            return Ok(CommandResponse::NoReply);
        }

        let reply = read_reply(&mut stream, self.response_timeout).await?;
        debug!(command = %command, reply = ?reply, "Received reply");

        Ok(decode(&reply, command.mode())?)
    }
}

/// Reads one reply up to and including the first terminator.
///
/// The deadline covers the whole loop. Bytes received before the deadline
/// are dropped on timeout; bytes after the terminator are ignored.
pub async fn read_reply<R>(reader: &mut R, deadline: Duration) -> Result<String, TransportError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match timeout(deadline, read_until_terminator(reader)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(deadline)),
    }
}

async fn read_until_terminator<R>(reader: &mut R) -> Result<String, TransportError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut reply: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|e| TransportError::Connection(format!("read: {e}")))?;

        if n == 0 {
            return Err(TransportError::Connection(
                "link closed before reply was terminated".to_string(),
            ));
        }

        let received = chunk.get(..n).unwrap_or_default();
        if let Some(end) = received.iter().position(|b| *b == TERMINATOR as u8) {
            reply.extend_from_slice(received.get(..=end).unwrap_or_default());
            return Ok(String::from_utf8_lossy(&reply).into_owned());
        }

        reply.extend_from_slice(received);
        if reply.len() > MAX_REPLY_LEN {
            return Err(TransportError::ReplyTooLong { max: MAX_REPLY_LEN });
        }
    }
}

/// Logs timeouts and link faults differently so they can be told apart.
fn log_outcome(command: &SerialCommand, result: &Result<CommandResponse, TransportError>) {
    match result {
        Ok(_) => {}
        Err(TransportError::Timeout(deadline)) => {
            warn!(
                command = %command,
                deadline_ms = deadline.as_millis() as u64,
                "Display controller did not reply in time"
            );
        }
        Err(TransportError::Connection(reason)) => {
            error!(command = %command, reason = %reason, "Serial link fault");
        }
        Err(e) => {
            warn!(command = %command, error = %e, "Serial command failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MemoryLink;
    use kiosk_protocol::ACK_LINE;

    #[tokio::test]
    async fn test_read_reply_stops_at_terminator() {
        let mut input: &[u8] = b"opA1display.power=ON\rtrailing";
        let reply = read_reply(&mut input, DEFAULT_RESPONSE_TIMEOUT).await.unwrap();
        assert_eq!(reply, "opA1display.power=ON\r");
    }

    #[tokio::test]
    async fn test_read_reply_eof_is_connection_error() {
        let mut input: &[u8] = b"opA1display.pow";
        let err = read_reply(&mut input, DEFAULT_RESPONSE_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }

    #[tokio::test]
    async fn test_read_reply_too_long() {
        let long = vec![b'x'; MAX_REPLY_LEN + READ_CHUNK];
        let mut input: &[u8] = &long;
        let err = read_reply(&mut input, DEFAULT_RESPONSE_TIMEOUT).await.unwrap_err();
        assert_eq!(err, TransportError::ReplyTooLong { max: MAX_REPLY_LEN });
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_reply_discards_partial_on_timeout() {
        let (mut client, mut controller) = tokio::io::duplex(64);
        controller.write_all(b"opA1display.power=O").await.unwrap();

        let err = read_reply(&mut client, DEFAULT_RESPONSE_TIMEOUT).await.unwrap_err();
        assert_eq!(err, TransportError::Timeout(DEFAULT_RESPONSE_TIMEOUT));
        drop(controller);
    }

    #[tokio::test]
    async fn test_set_command_ack() {
        let link = MemoryLink::new(|_| Some(ACK_LINE.to_string()));
        let transport = spawn_transport(link.clone(), DEFAULT_RESPONSE_TIMEOUT);

        let response = transport
            .execute(SerialCommand::set("display.power", "ON"))
            .await
            .unwrap();
        assert_eq!(response, CommandResponse::Ack);
        assert_eq!(link.received(), vec!["opA1display.power=ON".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_command_never_opens_link() {
        let link = MemoryLink::new(|_| Some(ACK_LINE.to_string()));
        let transport = spawn_transport(link.clone(), DEFAULT_RESPONSE_TIMEOUT);

        let err = transport
            .execute(SerialCommand::set("display.power", "ON\rOFF"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidCommand(_)));
        assert_eq!(link.opened(), 0);
    }

    #[tokio::test]
    async fn test_codec_error_mapping() {
        let mismatch: TransportError = CodecError::UnexpectedAck.into();
        assert!(matches!(mismatch, TransportError::ProtocolMismatch(_)));

        let invalid: TransportError = CodecError::InvalidField {
            field: "value",
            reason: "line break".to_string(),
        }
        .into();
        assert!(matches!(invalid, TransportError::InvalidCommand(_)));
    }
}
