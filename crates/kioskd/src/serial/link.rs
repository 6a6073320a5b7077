//! Physical link abstraction.
//!
//! A [`SerialLink`] knows how to open a fresh byte stream to the display
//! controller. The transport opens one per command and drops it when the
//! command completes, which closes the device on every exit path.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{DataBits, FlowControl, Parity, StopBits};
use tracing::trace;

/// Byte stream returned by [`SerialLink::open`].
pub trait LinkStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> LinkStream for T {}

/// Something that can open a session to the display controller.
#[async_trait]
pub trait SerialLink: Send + Sync + 'static {
    /// Opens a new session. The session is closed when the stream is dropped.
    async fn open(&self) -> io::Result<Box<dyn LinkStream>>;

    /// Human-readable name for logs.
    fn describe(&self) -> String;
}

/// A real serial device, 8N1 without flow control.
#[derive(Debug, Clone)]
pub struct SerialPortLink {
    path: String,
    baud_rate: u32,
}

impl SerialPortLink {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }
}

#[async_trait]
impl SerialLink for SerialPortLink {
    async fn open(&self) -> io::Result<Box<dyn LinkStream>> {
        trace!(port = %self.path, baud_rate = self.baud_rate, "Opening serial port");

        let builder = tokio_serial::new(&self.path, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None);

        let stream = tokio_serial::SerialStream::open(&builder).map_err(io::Error::from)?;
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.path, self.baud_rate)
    }
}
