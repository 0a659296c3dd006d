//! TCP server implementation.

use crate::error::ServerError;
use jrcp_core::{Controller, SocketId};
use jrcp_protocol::message::response;
use jrcp_protocol::Decoder;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], jrcp_protocol::DEFAULT_PORT)),
            idle_timeout: Duration::from_secs(300),
            max_connections: 64,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn from_network(network: &crate::config::NetworkConfig) -> Self {
        Self {
            bind_addr: network.bind_addr,
            idle_timeout: network.idle_timeout(),
            max_connections: network.max_connections,
        }
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server embedding a [`Controller`].
///
/// Every accepted connection gets a fresh nonzero socket id; each complete
/// inbound frame is dispatched through the controller under its lock and the
/// response bytes are written straight back. When a connection ends, its
/// socket id is released so the devices it bound become free again.
pub struct Server {
    config: ServerConfig,
    controller: Arc<Mutex<Controller>>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
    next_socket: AtomicU64,
}

impl Server {
    /// Creates a new server around a controller.
    pub fn new(config: ServerConfig, controller: Controller) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            controller: Arc::new(Mutex::new(controller)),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
            // Socket id zero is reserved as the invalid marker.
            next_socket: AtomicU64::new(1),
        }
    }

    /// Shared handle to the embedded controller.
    pub fn controller(&self) -> Arc<Mutex<Controller>> {
        self.controller.clone()
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    /// Signals all tasks to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs the accept loop until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.run_on(listener).await
    }

    /// Runs the accept loop on an already-bound listener.
    pub async fn run_on(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("server listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let socket = SocketId(self.next_socket.fetch_add(1, Ordering::Relaxed));
                            let controller = self.controller.clone();
                            let stats = self.stats.clone();
                            let config = self.config.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                tracing::info!("client connected: {} (socket {})", addr, socket);
                                let result = Self::handle_connection(
                                    stream,
                                    addr,
                                    socket,
                                    controller.clone(),
                                    &stats,
                                    config,
                                    &mut conn_shutdown,
                                )
                                .await;

                                if let Err(e) = result {
                                    tracing::debug!("connection {} error: {}", addr, e);
                                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                }

                                controller.lock().release_socket(socket);
                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                tracing::info!("client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Handles a single connection until EOF, timeout or shutdown.
    async fn handle_connection(
        mut stream: TcpStream,
        addr: SocketAddr,
        socket: SocketId,
        controller: Arc<Mutex<Controller>>,
        stats: &ServerStats,
        config: ServerConfig,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let mut decoder = Decoder::new();
        let mut buf = [0u8; 8192];

        loop {
            tokio::select! {
                result = stream.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!("[{}] connection closed by client", addr);
                            return Ok(());
                        }
                        Ok(n) => {
                            tracing::debug!("[{}] received {} bytes", addr, n);
                            decoder.extend(&buf[..n]);
                        }
                        Err(e) => {
                            tracing::debug!("[{}] read error: {}", addr, e);
                            return Err(ServerError::Io(e));
                        }
                    }
                }
                _ = tokio::time::sleep(config.idle_timeout) => {
                    tracing::debug!("[{}] idle timeout", addr);
                    return Ok(());
                }
                _ = shutdown.recv() => {
                    tracing::debug!("[{}] shutdown signal received", addr);
                    return Err(ServerError::ShuttingDown);
                }
            }

            // Process any complete frames.
            loop {
                match decoder.next_raw() {
                    Ok(Some(raw)) => {
                        stats.requests_total.fetch_add(1, Ordering::Relaxed);
                        let response = controller.lock().dispatch_from(socket, &raw);
                        stream.write_all(&response).await?;
                    }
                    Ok(None) => break,
                    Err(err) => {
                        // Unsynchronized stream: the frame fields are not
                        // trustworthy, so answer with zeroed addressing and
                        // close.
                        let status = response::error(0, &err).encode();
                        stream.write_all(&status).await?;
                        return Err(ServerError::Protocol(err));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::{install_demo_device, DEMO_ATR};
    use bytes::Bytes;
    use jrcp_protocol::message::{mty, StatusReport};
    use jrcp_protocol::{Frame, GenericStatus, PROTOCOL_VERSION};

    async fn spawn_server() -> (SocketAddr, Arc<Server>) {
        let mut controller = Controller::new("test", PROTOCOL_VERSION).unwrap();
        install_demo_device(&mut controller, 0x20, "virtual card").unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(Server::new(ServerConfig::new(addr), controller));
        let runner = server.clone();
        tokio::spawn(async move { runner.run_on(listener).await });
        (addr, server)
    }

    async fn roundtrip(stream: &mut TcpStream, request: &Frame) -> Frame {
        stream.write_all(&request.encode()).await.unwrap();
        let mut decoder = Decoder::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "server closed connection");
            decoder.extend(&buf[..n]);
            if let Some(frame) = decoder.next_frame().unwrap() {
                return frame;
            }
        }
    }

    #[tokio::test]
    async fn serves_atr_over_loopback() {
        let (addr, server) = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let request = Frame::new(mty::WAIT_FOR_CARD, 0x20, Bytes::new()).unwrap();
        let response = roundtrip(&mut stream, &request).await;
        assert_eq!(response.payload().as_ref(), DEMO_ATR);

        server.shutdown();
    }

    #[tokio::test]
    async fn second_connection_gets_socket_mismatch() {
        let (addr, server) = spawn_server().await;
        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();

        let request = Frame::new(mty::SEND_DATA, 0x20, Bytes::from_static(b"hi")).unwrap();

        // First connection binds the device.
        let response = roundtrip(&mut first, &request).await;
        assert_eq!(response.payload().as_ref(), b"hi");

        // Second connection is refused for the bound device.
        let response = roundtrip(&mut second, &request).await;
        let report = StatusReport::from_frame(&response).unwrap();
        assert_eq!(report.status, GenericStatus::CLIENT_SOCKET_MISMATCH);

        // After the first client disconnects, the device is free again.
        drop(first);
        // The release happens in the connection task; give it a moment.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let response = roundtrip(&mut second, &request).await;
        assert_eq!(response.payload().as_ref(), b"hi");

        server.shutdown();
    }

    #[tokio::test]
    async fn garbage_input_yields_status_and_close() {
        let (addr, server) = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(b"\x00not a frame at all....").await.unwrap();

        let mut decoder = Decoder::new();
        let mut buf = [0u8; 4096];
        let frame = loop {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0);
            decoder.extend(&buf[..n]);
            if let Some(frame) = decoder.next_frame().unwrap() {
                break frame;
            }
        };
        let report = StatusReport::from_frame(&frame).unwrap();
        assert_eq!(report.status, GenericStatus::MALFORMED_MESSAGE);

        // The server closes after the status frame.
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        server.shutdown();
    }
}
