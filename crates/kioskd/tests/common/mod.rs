//! Shared fixtures for the daemon integration tests.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use kiosk_protocol::{ClientMessage, DaemonMessage};
use kioskd::apps::AppManager;
use kioskd::catalog::AppCatalog;
use kioskd::client::ControlClient;
use kioskd::controller::Controller;
use kioskd::lock_store::LockStore;
use kioskd::serial::{spawn_transport, MemoryLink, DEFAULT_RESPONSE_TIMEOUT};
use kioskd::server::DaemonServer;
use kioskd::supervisor::ProcessSupervisor;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

/// Maximum time to wait for server socket to appear
const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between socket existence checks
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Grace period for server shutdown
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// How long stop requests wait for application trees in tests
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// A daemon running in-process against a simulated display.
pub struct TestDaemon {
    pub socket_path: PathBuf,
    pub apps_dir: PathBuf,
    pub lock_path: PathBuf,
    pub link: MemoryLink,
    cancel_token: CancellationToken,
    _temp_dir: TempDir,
}

impl TestDaemon {
    pub async fn spawn() -> Self {
        Self::spawn_with_link(MemoryLink::simulated_display()).await
    }

    pub async fn spawn_with_link(link: MemoryLink) -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("kiosk.sock");
        let apps_dir = temp_dir.path().join("apps");
        let lock_path = temp_dir.path().join("state").join("app.lock");
        std::fs::create_dir_all(&apps_dir).unwrap();

        let apps = AppManager::new(
            LockStore::new(&lock_path),
            AppCatalog::new(&apps_dir),
            ProcessSupervisor::new("launch.sh", Some(PathBuf::from("/bin/sh"))),
            STOP_TIMEOUT,
        );
        let transport = spawn_transport(link.clone(), DEFAULT_RESPONSE_TIMEOUT);
        let controller = Arc::new(Controller::new(transport, "A1", apps));

        let cancel_token = CancellationToken::new();
        let server = DaemonServer::new(socket_path.clone(), controller, cancel_token.clone());
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let start = Instant::now();
        while start.elapsed() < SOCKET_WAIT_TIMEOUT && !socket_path.exists() {
            sleep(SOCKET_POLL_INTERVAL).await;
        }
        assert!(
            socket_path.exists(),
            "Server socket did not appear within {SOCKET_WAIT_TIMEOUT:?}"
        );

        Self {
            socket_path,
            apps_dir,
            lock_path,
            link,
            cancel_token,
            _temp_dir: temp_dir,
        }
    }

    /// Installs an application whose launcher runs `script` under `/bin/sh`.
    pub fn install_app(&self, name: &str, script: &str) -> PathBuf {
        let dir = self.apps_dir.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("launch.sh"), script).unwrap();
        dir
    }

    pub async fn client(&self) -> ControlClient {
        ControlClient::connect(&self.socket_path, None)
            .await
            .expect("connect to daemon")
    }

    pub async fn raw_client(&self) -> TestClient {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to server");
        TestClient::new(stream)
    }

    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        sleep(SHUTDOWN_GRACE_PERIOD).await;
    }
}

/// Line-level client for malformed-input tests.
pub struct TestClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    pub async fn send(&mut self, msg: ClientMessage) {
        let json = serde_json::to_string(&msg).unwrap();
        self.send_raw(json.as_bytes()).await;
        self.send_raw(b"\n").await;
    }

    /// Ignores write errors; the server may already have hung up.
    pub async fn send_raw(&mut self, data: &[u8]) {
        let _ = self.writer.write_all(data).await;
        let _ = self.writer.flush().await;
    }

    /// Next reply, or `None` on EOF or after `wait`.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Option<DaemonMessage> {
        let mut line = String::new();
        match timeout(wait, self.reader.read_line(&mut line)).await {
            Ok(Ok(n)) if n > 0 => serde_json::from_str(&line).ok(),
            _ => None,
        }
    }

    pub async fn recv(&mut self) -> DaemonMessage {
        self.recv_timeout(Duration::from_secs(5))
            .await
            .expect("reply from server")
    }

    pub async fn handshake(&mut self, client_id: Option<String>) -> String {
        self.send(ClientMessage::connect(client_id)).await;
        match self.recv().await {
            DaemonMessage::Connected { client_id, .. } => client_id,
            other => panic!("Expected Connected, got {other:?}"),
        }
    }
}

/// Polls until `path` exists or `wait` elapses.
pub async fn wait_for_file(path: &Path, wait: Duration) -> bool {
    let deadline = Instant::now() + wait;
    while Instant::now() < deadline {
        if path.exists() {
            return true;
        }
        sleep(SOCKET_POLL_INTERVAL).await;
    }
    path.exists()
}
