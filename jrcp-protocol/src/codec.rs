//! Incremental frame decoding for streaming transports.

use crate::error::JrcpError;
use crate::frame::Frame;
use bytes::{Bytes, BytesMut};

/// Accumulates bytes from a stream and yields complete raw frames.
///
/// Frames come out as exact byte slices so the transport layer can hand them
/// to the dispatcher without re-encoding. A decode error means the stream is
/// unsynchronized and the connection should be dropped; there is no resync
/// scan for a later SOF.
#[derive(Debug, Default)]
pub struct Decoder {
    buf: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes received from the transport.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Attempts to decode the next complete frame.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn next_raw(&mut self) -> Result<Option<Bytes>, JrcpError> {
        Frame::decode_raw(&mut self.buf)
    }

    /// Attempts to decode and parse the next complete frame.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, JrcpError> {
        Frame::decode(&mut self.buf)
    }

    /// Number of buffered bytes not yet consumed by a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Discards any buffered bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
