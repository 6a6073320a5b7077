//! In-memory display controller.
//!
//! [`MemoryLink`] answers commands through an in-process duplex pipe. The
//! daemon uses [`MemoryLink::simulated_display`] when started without
//! hardware; tests use [`MemoryLink::new`] with a scripted responder.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tracing::debug;

use kiosk_protocol::{ACK_LINE, TERMINATOR};

use super::link::{LinkStream, SerialLink};

/// Pipe capacity for one session.
const SESSION_BUFFER: usize = 1024;

/// Maps a received command line (terminator stripped) to the raw reply.
/// `None` keeps the controller silent.
type Responder = dyn Fn(&str) -> Option<String> + Send + Sync;

#[derive(Default)]
struct Stats {
    opened: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    received: Mutex<Vec<String>>,
}

/// A display controller living in memory.
#[derive(Clone)]
pub struct MemoryLink {
    responder: Option<Arc<Responder>>,
    stats: Arc<Stats>,
}

impl MemoryLink {
    /// Creates a link whose controller answers through `responder`.
    pub fn new(responder: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            responder: Some(Arc::new(responder)),
            stats: Arc::new(Stats::default()),
        }
    }

    /// Creates a link that can never be opened.
    pub fn unavailable() -> Self {
        Self {
            responder: None,
            stats: Arc::new(Stats::default()),
        }
    }

    /// A controller that remembers set values and reports them back.
    ///
    /// `opA1display.power=ON` is acknowledged and stored; a later
    /// `opA1display.power?` is answered with `opA1display.power=ON`.
    /// Unknown queries are answered with an empty value.
    pub fn simulated_display() -> Self {
        let state: Mutex<HashMap<String, String>> = Mutex::new(HashMap::new());

        Self::new(move |line| {
            let mut state = state.lock().ok()?;
            if let Some((target, value)) = line.split_once('=') {
                state.insert(target.to_string(), value.to_string());
                return Some(ACK_LINE.to_string());
            }
            let target = line.strip_suffix('?')?;
            let value = state.get(target).cloned().unwrap_or_default();
            Some(format!("{target}={value}{TERMINATOR}"))
        })
    }

    /// Number of sessions opened so far.
    pub fn opened(&self) -> usize {
        self.stats.opened.load(Ordering::SeqCst)
    }

    /// Highest number of sessions that were open at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.stats.max_active.load(Ordering::SeqCst)
    }

    /// Command lines received, terminators stripped, in arrival order.
    pub fn received(&self) -> Vec<String> {
        self.stats
            .received
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SerialLink for MemoryLink {
    async fn open(&self) -> io::Result<Box<dyn LinkStream>> {
        let responder = self.responder.clone().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "simulated controller is unplugged")
        })?;

        let (client, controller) = tokio::io::duplex(SESSION_BUFFER);

        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        let active = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_active.fetch_max(active, Ordering::SeqCst);

        tokio::spawn(serve_session(controller, responder, Arc::clone(&self.stats)));

        Ok(Box::new(SessionStream {
            inner: client,
            stats: Arc::clone(&self.stats),
        }))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Controller side of one session: read one command line, answer it, then
/// hold the pipe open until the client hangs up.
async fn serve_session(mut controller: DuplexStream, responder: Arc<Responder>, stats: Arc<Stats>) {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        match controller.read(&mut byte).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {
                if byte == [TERMINATOR as u8] {
                    break;
                }
                line.extend_from_slice(&byte);
            }
        }
    }

    let line = String::from_utf8_lossy(&line).into_owned();
    if let Ok(mut received) = stats.received.lock() {
        received.push(line.clone());
    }

    match responder(&line) {
        Some(reply) => {
            if controller.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
        }
        None => debug!(command = %line, "Simulated controller staying silent"),
    }

    // Drain until the client drops its end.
    let mut sink = [0u8; 64];
    while let Ok(n) = controller.read(&mut sink).await {
        if n == 0 {
            break;
        }
    }
}

/// Client end of a session; records the close when dropped.
struct SessionStream {
    inner: DuplexStream,
    stats: Arc<Stats>,
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AsyncRead for SessionStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for SessionStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
