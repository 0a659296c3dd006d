//! Connection management.

use bytes::Bytes;
use jrcp_protocol::{Decoder, Frame, JrcpError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Request timeout.
    pub request_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }
}

struct ConnState {
    stream: TcpStream,
    decoder: Decoder,
}

/// A connection to a JRCP server.
///
/// Requests are strictly serialized: one frame out, one frame back. The
/// transport lock is held across the exchange so interleaving cannot happen.
pub struct Connection {
    config: ConnectionConfig,
    state: Mutex<Option<ConnState>>,
    connected: AtomicBool,
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Establishes the TCP connection.
    pub async fn connect(&self) -> Result<(), JrcpError> {
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.addr),
        )
        .await
        .map_err(|_| JrcpError::TimeoutOccurred)?
        .map_err(JrcpError::NetworkingInitFailed)?;

        stream.set_nodelay(true).map_err(JrcpError::NetworkingInitFailed)?;

        let mut state = self.state.lock().await;
        *state = Some(ConnState {
            stream,
            decoder: Decoder::new(),
        });
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!("connected to {}", self.config.addr);
        Ok(())
    }

    /// Drops the connection. Safe to call when not connected.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        *state = None;
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Sends one frame and waits for the matching response frame.
    pub async fn transceive(&self, request: &Frame) -> Result<Frame, JrcpError> {
        let raw = self.transceive_raw(&request.encode()).await?;
        Frame::parse(&raw)
    }

    /// Sends raw frame bytes and returns the raw response frame.
    pub async fn transceive_raw(&self, raw: &[u8]) -> Result<Bytes, JrcpError> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(JrcpError::NoActiveConnection)?;

        let result = match tokio::time::timeout(
            self.config.request_timeout,
            Self::exchange(state, raw, self.config.read_buffer_size),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(JrcpError::TimeoutOccurred),
        };

        if result.is_err() {
            // The stream is in an unknown state after a transport fault or
            // an abandoned exchange.
            *guard = None;
            self.connected.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn exchange(
        state: &mut ConnState,
        raw: &[u8],
        buffer_size: usize,
    ) -> Result<Bytes, JrcpError> {
        state
            .stream
            .write_all(raw)
            .await
            .map_err(JrcpError::SocketSendFailed)?;

        let mut buf = vec![0u8; buffer_size];
        loop {
            if let Some(frame) = state.decoder.next_raw()? {
                return Ok(frame);
            }
            let n = state
                .stream
                .read(&mut buf)
                .await
                .map_err(JrcpError::SocketRecvFailed)?;
            if n == 0 {
                return Err(JrcpError::SocketRecvFailed(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed by server",
                )));
            }
            state.decoder.extend(&buf[..n]);
        }
    }
}
