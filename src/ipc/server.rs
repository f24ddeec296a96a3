use std::collections::HashMap;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use super::dispatch::Dispatcher;
use super::protocol::Response;

/// Tick of the server thread's readiness loop; also bounds how long a stop
/// signal can go unnoticed.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

const READ_BUF_SIZE: usize = 4096;

/// Unique identifier for a client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Buffered client connection state. `buffer` carries the partial trailing
/// fragment between reads so messages straddling a read boundary survive.
struct ClientConnection {
    stream: UnixStream,
    buffer: String,
}

impl ClientConnection {
    fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            buffer: String::new(),
        }
    }
}

/// Unix socket server: owns the listener, the per-connection buffers, and
/// the socket file lifetime. Permission on the socket file is owner-only.
pub struct IpcServer {
    listener: UnixListener,
    connections: HashMap<ConnectionId, ClientConnection>,
    socket_path: PathBuf,
    next_conn_id: u64,
}

impl IpcServer {
    /// Bind the listener, removing any stale socket file first, and restrict
    /// the socket file to the owning user.
    pub fn bind(socket_path: impl AsRef<Path>) -> io::Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();

        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }

        let listener = UnixListener::bind(&socket_path)?;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))?;

        Ok(Self {
            listener,
            connections: HashMap::new(),
            socket_path,
            next_conn_id: 0,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept any pending new connections (non-blocking).
    /// Returns the number of new connections accepted.
    pub fn accept_pending(&mut self) -> io::Result<usize> {
        let mut accepted = 0;

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        loop {
            match self.listener.poll_accept(&mut cx) {
                Poll::Ready(Ok((stream, _addr))) => {
                    let conn_id = ConnectionId::new(self.next_conn_id);
                    self.next_conn_id += 1;
                    self.connections
                        .insert(conn_id, ClientConnection::new(stream));
                    accepted += 1;
                }
                Poll::Ready(Err(e)) => return Err(e),
                Poll::Pending => break,
            }
        }

        Ok(accepted)
    }

    /// Drain readable sockets and return every complete newline-terminated
    /// line, paired with its connection, in per-connection arrival order.
    /// Partial trailing fragments stay buffered until the next read; closed
    /// or failed connections are removed.
    pub fn poll_lines(&mut self) -> Vec<(ConnectionId, String)> {
        let mut lines = Vec::new();
        let mut disconnected = Vec::new();

        for (&conn_id, client) in &mut self.connections {
            let mut buf = [0u8; READ_BUF_SIZE];
            loop {
                match client.stream.try_read(&mut buf) {
                    Ok(0) => {
                        disconnected.push(conn_id);
                        break;
                    }
                    Ok(n) => {
                        if let Ok(s) = std::str::from_utf8(&buf[..n]) {
                            client.buffer.push_str(s);
                        } else {
                            // Not UTF-8; the peer is not speaking the protocol.
                            disconnected.push(conn_id);
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(_) => {
                        disconnected.push(conn_id);
                        break;
                    }
                }
            }

            while let Some(newline_pos) = client.buffer.find('\n') {
                let line = client.buffer[..newline_pos].to_string();
                client.buffer = client.buffer[newline_pos + 1..].to_string();
                if line.trim().is_empty() {
                    continue;
                }
                lines.push((conn_id, line));
            }
        }

        for conn_id in disconnected {
            self.connections.remove(&conn_id);
        }

        lines
    }

    /// Serialize a response to one JSON line and write it on the connection.
    pub async fn send_response(
        &mut self,
        conn_id: ConnectionId,
        response: &Response,
    ) -> io::Result<()> {
        let client = self
            .connections
            .get_mut(&conn_id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection not found"))?;

        let mut json = serde_json::to_string(response)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        json.push('\n');

        client.stream.write_all(json.as_bytes()).await?;
        client.stream.flush().await?;

        Ok(())
    }

    pub fn close_connection(&mut self, conn_id: ConnectionId) {
        self.connections.remove(&conn_id);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Remove the socket file.
    pub fn cleanup(&self) -> io::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        Ok(())
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

/// Running server thread. Stopping is idempotent and also happens on drop;
/// either way the thread is joined and the socket file removed.
pub struct IpcServerHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
    socket_path: PathBuf,
}

impl IpcServerHandle {
    /// Bind the socket and start the dedicated server thread. A bind failure
    /// is reported here, before any thread outlives the call.
    pub fn spawn(socket_path: PathBuf, dispatcher: Dispatcher) -> anyhow::Result<IpcServerHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let path = socket_path.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<io::Result<()>>();

        let thread = std::thread::Builder::new()
            .name("wbridge-ipc".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                runtime.block_on(async move {
                    let mut server = match IpcServer::bind(&path) {
                        Ok(server) => {
                            let _ = ready_tx.send(Ok(()));
                            server
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    run_loop(&mut server, &dispatcher, &flag).await;
                });
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(IpcServerHandle {
                shutdown,
                thread: Some(thread),
                socket_path,
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(anyhow::Error::from(e).context("binding ipc socket"))
            }
            Err(_) => {
                let _ = thread.join();
                anyhow::bail!("ipc server thread exited before binding");
            }
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for IpcServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Readiness loop of the server thread. Each tick accepts pending
/// connections, drains complete lines, and answers each line before touching
/// the next one from the same read, preserving per-connection order.
async fn run_loop(server: &mut IpcServer, dispatcher: &Dispatcher, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::SeqCst) {
        tokio::time::sleep(POLL_INTERVAL).await;

        if let Err(e) = server.accept_pending() {
            warn!("ipc accept error: {e}");
        }
        for (conn_id, line) in server.poll_lines() {
            let response = dispatcher.dispatch_line(&line);
            if let Err(e) = server.send_response(conn_id, &response).await {
                // Peer gone mid-write: drop only that connection.
                debug!("ipc write failed, closing connection: {e}");
                server.close_connection(conn_id);
            }
        }
    }
    let _ = server.cleanup();
}

fn noop_waker() -> std::task::Waker {
    use std::task::{RawWaker, RawWakerVTable, Waker};

    const VTABLE: RawWakerVTable = RawWakerVTable::new(
        |_| RawWaker::new(std::ptr::null(), &VTABLE), // clone
        |_| {},                                       // wake
        |_| {},                                       // wake_by_ref
        |_| {},                                       // drop
    );

    unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixStream;

    fn temp_socket_path() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.sock");
        (dir, path)
    }

    #[tokio::test]
    async fn server_binds_with_owner_only_permissions() {
        let (_dir, path) = temp_socket_path();
        let server = IpcServer::bind(&path).unwrap();
        assert!(path.exists());
        assert_eq!(server.socket_path(), path);

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn server_removes_stale_socket_file() {
        let (_dir, path) = temp_socket_path();
        std::fs::write(&path, "stale").unwrap();

        let _server = IpcServer::bind(&path).unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn cleanup_removes_socket_file() {
        let (_dir, path) = temp_socket_path();
        let server = IpcServer::bind(&path).unwrap();
        server.cleanup().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn server_accepts_connections() {
        let (_dir, path) = temp_socket_path();
        let mut server = IpcServer::bind(&path).unwrap();

        let _client = UnixStream::connect(&path).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(server.accept_pending().unwrap(), 1);
        assert_eq!(server.connection_count(), 1);
    }

    #[tokio::test]
    async fn poll_lines_returns_complete_lines_only() {
        let (_dir, path) = temp_socket_path();
        let mut server = IpcServer::bind(&path).unwrap();

        let mut client = UnixStream::connect(&path).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        server.accept_pending().unwrap();

        client.write_all(b"{\"op\":\"a\"}\n{\"op\":").await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let lines = server.poll_lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].1, "{\"op\":\"a\"}");

        // The partial fragment completes on the next read.
        client.write_all(b"\"b\"}\n").await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let lines = server.poll_lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].1, "{\"op\":\"b\"}");
    }

    #[tokio::test]
    async fn poll_lines_handles_multiple_messages_in_one_write() {
        let (_dir, path) = temp_socket_path();
        let mut server = IpcServer::bind(&path).unwrap();

        let mut client = UnixStream::connect(&path).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        server.accept_pending().unwrap();

        client
            .write_all(b"{\"op\":\"one\"}\n{\"op\":\"two\"}\n")
            .await
            .unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let lines = server.poll_lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].1, "{\"op\":\"one\"}");
        assert_eq!(lines[1].1, "{\"op\":\"two\"}");
    }

    #[tokio::test]
    async fn disconnected_client_is_removed() {
        let (_dir, path) = temp_socket_path();
        let mut server = IpcServer::bind(&path).unwrap();

        let client = UnixStream::connect(&path).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        server.accept_pending().unwrap();
        assert_eq!(server.connection_count(), 1);

        drop(client);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let _ = server.poll_lines();
        assert_eq!(server.connection_count(), 0);
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let (_dir, path) = temp_socket_path();
        let mut server = IpcServer::bind(&path).unwrap();

        let mut client = UnixStream::connect(&path).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        server.accept_pending().unwrap();

        client.write_all(b"\n  \n{\"op\":\"x\"}\n").await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let lines = server.poll_lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].1, "{\"op\":\"x\"}");
    }
}
