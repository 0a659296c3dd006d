//! Binary frame format for JRCP.
//!
//! Frame layout (4-byte fixed prefix + variable header + payload + timing
//! trailer):
//!
//! ```text
//! +-----+-----+-----+-----+----------+------------+------------+-----+----------+
//! | SOF | MTY | NAD | HDL | HEADER   |     LN     |  PAYLOAD   | TIL | TR [TC]  |
//! | 1   | 1   | 1   | 1   | HDL bytes| 4 bytes BE |  LN bytes  | 1   | 0/8/16   |
//! +-----+-----+-----+-----+----------+------------+------------+-----+----------+
//! ```
//!
//! TIL is 0x00 (no timestamps), 0x08 (response timestamp TR) or 0x10
//! (response and command timestamps TR, TC).

use crate::error::JrcpError;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Start-of-frame sentinel byte.
pub const SOF: u8 = 0xA5;

/// Size of the fixed frame prefix in bytes (SOF + MTY + NAD + HDL).
pub const FIXED_HEADER_SIZE: usize = 4;

/// TIL code: no timestamps follow the payload.
pub const TIL_NONE: u8 = 0x00;
/// TIL code: an 8-byte response timestamp follows the payload.
pub const TIL_RESPONSE: u8 = 0x08;
/// TIL code: 8-byte response and command timestamps follow the payload.
pub const TIL_FULL: u8 = 0x10;

/// Optional timing information carried after the payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Timing {
    /// No timestamps (TIL 0x00).
    #[default]
    None,
    /// Response timestamp only (TIL 0x08).
    Response { tr: u64 },
    /// Response and command timestamps (TIL 0x10).
    Full { tr: u64, tc: u64 },
}

impl Timing {
    /// Returns the TIL code for this timing variant.
    pub fn til(&self) -> u8 {
        match self {
            Timing::None => TIL_NONE,
            Timing::Response { .. } => TIL_RESPONSE,
            Timing::Full { .. } => TIL_FULL,
        }
    }

    /// Returns the number of trailer bytes following the TIL byte.
    pub fn trailer_len(til: u8) -> Option<usize> {
        match til {
            TIL_NONE => Some(0),
            TIL_RESPONSE => Some(8),
            TIL_FULL => Some(16),
            _ => None,
        }
    }
}

/// Returns the message type of a raw buffer, if the fixed prefix is present.
pub fn peek_mty(raw: &[u8]) -> Option<u8> {
    raw.get(1).copied()
}

/// Returns the node address of a raw buffer, if the fixed prefix is present.
pub fn peek_nad(raw: &[u8]) -> Option<u8> {
    raw.get(2).copied()
}

/// Returns the header length of a raw buffer, if the fixed prefix is present.
pub fn peek_hdl(raw: &[u8]) -> Option<u8> {
    raw.get(3).copied()
}

/// Returns the declared payload length of a raw buffer.
///
/// The header length is validated against the buffer bounds before the LN
/// field offset is computed; a buffer too short for its own declared header
/// yields `None` instead of an out-of-bounds read.
pub fn payload_len(raw: &[u8]) -> Option<u32> {
    let hdl = peek_hdl(raw)? as usize;
    let ln_start = FIXED_HEADER_SIZE + hdl;
    let ln_bytes = raw.get(ln_start..ln_start + 4)?;
    Some(u32::from_be_bytes([
        ln_bytes[0],
        ln_bytes[1],
        ln_bytes[2],
        ln_bytes[3],
    ]))
}

/// A parsed JRCP frame.
///
/// Construction paths validate field ranges, so [`Frame::encode`] is total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    mty: u8,
    nad: u8,
    header: Bytes,
    payload: Bytes,
    timing: Timing,
}

impl Frame {
    /// Internal constructor for payloads already known to be within bounds.
    pub(crate) fn from_parts(mty: u8, nad: u8, payload: Bytes) -> Self {
        Self {
            mty,
            nad,
            header: Bytes::new(),
            payload,
            timing: Timing::None,
        }
    }

    /// Creates a new frame with the given payload and no header or timing.
    pub fn new(mty: u8, nad: u8, payload: Bytes) -> Result<Self, JrcpError> {
        if payload.len() > MAX_PAYLOAD_SIZE as usize {
            return Err(JrcpError::InvalidArgument("payload exceeds maximum size"));
        }
        Ok(Self {
            mty,
            nad,
            header: Bytes::new(),
            payload,
            timing: Timing::None,
        })
    }

    /// Attaches an opaque header segment (at most 255 bytes).
    pub fn with_header(mut self, header: Bytes) -> Result<Self, JrcpError> {
        if header.len() > u8::MAX as usize {
            return Err(JrcpError::InvalidArgument("header exceeds 255 bytes"));
        }
        self.header = header;
        Ok(self)
    }

    /// Attaches timing information.
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn mty(&self) -> u8 {
        self.mty
    }

    pub fn nad(&self) -> u8 {
        self.nad
    }

    pub fn header(&self) -> &Bytes {
        &self.header
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    /// Returns the encoded length of this frame in bytes.
    pub fn encoded_len(&self) -> usize {
        FIXED_HEADER_SIZE
            + self.header.len()
            + 4
            + self.payload.len()
            + 1
            + Timing::trailer_len(self.timing.til()).unwrap_or(0)
    }

    /// Encodes the frame into bytes. Total for any constructed frame.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(SOF);
        buf.put_u8(self.mty);
        buf.put_u8(self.nad);
        buf.put_u8(self.header.len() as u8);
        buf.put_slice(&self.header);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.put_u8(self.timing.til());
        match self.timing {
            Timing::None => {}
            Timing::Response { tr } => buf.put_u64(tr),
            Timing::Full { tr, tc } => {
                buf.put_u64(tr);
                buf.put_u64(tc);
            }
        }
        buf
    }

    /// Parses a complete frame from a raw buffer.
    ///
    /// Never reads past the end of `raw`. Any structural defect — short
    /// buffer, wrong SOF, header or payload lengths overrunning the buffer,
    /// an unknown TIL code, truncated timestamps or trailing bytes — is
    /// rejected with `MalformedMessage`. The header length is validated
    /// against the buffer before the LN offset is computed.
    pub fn parse(raw: &[u8]) -> Result<Self, JrcpError> {
        if raw.len() < FIXED_HEADER_SIZE {
            return Err(JrcpError::MalformedMessage("buffer shorter than prefix"));
        }
        if raw[0] != SOF {
            return Err(JrcpError::MalformedMessage("missing SOF sentinel"));
        }
        let mty = raw[1];
        let nad = raw[2];
        let hdl = raw[3] as usize;

        // The header length must fit before LN can be located.
        let ln_start = FIXED_HEADER_SIZE + hdl;
        if ln_start + 4 > raw.len() {
            return Err(JrcpError::MalformedMessage("header overruns buffer"));
        }
        let header = Bytes::copy_from_slice(&raw[FIXED_HEADER_SIZE..ln_start]);

        let ln = u32::from_be_bytes([
            raw[ln_start],
            raw[ln_start + 1],
            raw[ln_start + 2],
            raw[ln_start + 3],
        ]);
        if ln > MAX_PAYLOAD_SIZE {
            return Err(JrcpError::MalformedMessage("payload length exceeds maximum"));
        }
        let payload_start = ln_start + 4;
        let payload_end = payload_start
            .checked_add(ln as usize)
            .ok_or(JrcpError::MalformedMessage("payload length overflow"))?;
        if payload_end + 1 > raw.len() {
            return Err(JrcpError::MalformedMessage("payload overruns buffer"));
        }
        let payload = Bytes::copy_from_slice(&raw[payload_start..payload_end]);

        let til = raw[payload_end];
        let trailer_len = Timing::trailer_len(til)
            .ok_or(JrcpError::MalformedMessage("unknown TIL code"))?;
        let trailer_start = payload_end + 1;
        if trailer_start + trailer_len != raw.len() {
            return Err(JrcpError::MalformedMessage("truncated or oversized trailer"));
        }
        let timing = match til {
            TIL_RESPONSE => Timing::Response {
                tr: read_u64(&raw[trailer_start..]),
            },
            TIL_FULL => Timing::Full {
                tr: read_u64(&raw[trailer_start..]),
                tc: read_u64(&raw[trailer_start + 8..]),
            },
            _ => Timing::None,
        };

        Ok(Self {
            mty,
            nad,
            header,
            payload,
            timing,
        })
    }

    /// Decodes a frame from a streaming buffer.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was consumed,
    /// `Ok(None)` if more data is needed, or `Err` on unrecoverable garbage
    /// at the head of the stream.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, JrcpError> {
        match Self::decode_raw(buf)? {
            Some(raw) => Ok(Some(Self::parse(&raw)?)),
            None => Ok(None),
        }
    }

    /// Decodes the exact raw bytes of the next frame from a streaming
    /// buffer, without interpreting the payload.
    ///
    /// The declared lengths are bounds-checked incrementally so that a
    /// partial frame is reported as `Ok(None)` while a structurally invalid
    /// one fails immediately.
    pub fn decode_raw(buf: &mut BytesMut) -> Result<Option<Bytes>, JrcpError> {
        if buf.len() < FIXED_HEADER_SIZE {
            return Ok(None);
        }
        if buf[0] != SOF {
            return Err(JrcpError::MalformedMessage("missing SOF sentinel"));
        }
        let hdl = buf[3] as usize;
        let ln_start = FIXED_HEADER_SIZE + hdl;
        if buf.len() < ln_start + 4 {
            return Ok(None);
        }
        let ln = u32::from_be_bytes([
            buf[ln_start],
            buf[ln_start + 1],
            buf[ln_start + 2],
            buf[ln_start + 3],
        ]);
        if ln > MAX_PAYLOAD_SIZE {
            return Err(JrcpError::MalformedMessage("payload length exceeds maximum"));
        }
        let til_index = ln_start + 4 + ln as usize;
        if buf.len() < til_index + 1 {
            return Ok(None);
        }
        let trailer_len = Timing::trailer_len(buf[til_index])
            .ok_or(JrcpError::MalformedMessage("unknown TIL code"))?;
        let total = til_index + 1 + trailer_len;
        if buf.len() < total {
            return Ok(None);
        }
        let raw = buf.copy_to_bytes(total);
        Ok(Some(raw))
    }
}

fn read_u64(raw: &[u8]) -> u64 {
    u64::from_be_bytes([
        raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn frame_roundtrip() {
        let frame = Frame::new(0x01, 0x20, Bytes::from_static(b"\x00\xA4\x04\x00")).unwrap();
        let encoded = frame.encode();
        let decoded = Frame::parse(&encoded).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.mty(), 0x01);
        assert_eq!(decoded.nad(), 0x20);
        assert_eq!(decoded.payload().as_ref(), b"\x00\xA4\x04\x00");
    }

    #[test]
    fn frame_roundtrip_with_header_and_timing() {
        let frame = Frame::new(0x0A, 0x80, Bytes::from_static(b"\x00\x00"))
            .unwrap()
            .with_header(Bytes::from_static(b"hdr"))
            .unwrap()
            .with_timing(Timing::Full {
                tr: 0x1122334455667788,
                tc: 42,
            });
        let encoded = frame.encode();
        let decoded = Frame::parse(&encoded).unwrap();
        assert_eq!(decoded.header().as_ref(), b"hdr");
        assert_eq!(
            decoded.timing(),
            Timing::Full {
                tr: 0x1122334455667788,
                tc: 42
            }
        );
    }

    #[test]
    fn empty_payload_roundtrip() {
        let frame = Frame::new(0x00, 0xFF, Bytes::new()).unwrap();
        let encoded = frame.encode();
        // SOF MTY NAD HDL + LN + TIL
        assert_eq!(encoded.len(), 9);
        let decoded = Frame::parse(&encoded).unwrap();
        assert!(decoded.payload().is_empty());
    }

    #[test]
    fn short_buffer_is_malformed() {
        for len in 0..4 {
            let buf = vec![SOF; len];
            assert!(matches!(
                Frame::parse(&buf),
                Err(JrcpError::MalformedMessage(_))
            ));
        }
    }

    #[test]
    fn wrong_sof_is_malformed() {
        let frame = Frame::new(0x01, 0x20, Bytes::from_static(b"xy")).unwrap();
        let mut encoded = frame.encode();
        encoded[0] = 0x5A;
        assert!(matches!(
            Frame::parse(&encoded),
            Err(JrcpError::MalformedMessage(_))
        ));
    }

    #[test]
    fn hdl_validated_before_ln_is_read() {
        // HDL claims 200 header bytes but the buffer ends right after the
        // prefix; parse must reject before computing the LN offset.
        let buf = [SOF, 0x01, 0x20, 200, 0x00, 0x00];
        assert!(matches!(
            Frame::parse(&buf),
            Err(JrcpError::MalformedMessage(_))
        ));
        assert_eq!(payload_len(&buf), None);
    }

    #[test]
    fn ln_overrunning_buffer_is_malformed() {
        let frame = Frame::new(0x01, 0x20, Bytes::from_static(b"abcd")).unwrap();
        let mut encoded = frame.encode();
        // Inflate LN beyond the actual payload.
        encoded[7] = 0xFF;
        assert!(matches!(
            Frame::parse(&encoded),
            Err(JrcpError::MalformedMessage(_))
        ));
    }

    #[test]
    fn unknown_til_is_malformed() {
        let frame = Frame::new(0x01, 0x20, Bytes::from_static(b"ab")).unwrap();
        let mut encoded = frame.encode();
        let til_index = encoded.len() - 1;
        encoded[til_index] = 0x07;
        assert!(matches!(
            Frame::parse(&encoded),
            Err(JrcpError::MalformedMessage(_))
        ));
    }

    #[test]
    fn trailing_garbage_is_malformed() {
        let frame = Frame::new(0x01, 0x20, Bytes::from_static(b"ab")).unwrap();
        let mut encoded = frame.encode();
        encoded.extend_from_slice(b"\x00");
        assert!(matches!(
            Frame::parse(&encoded),
            Err(JrcpError::MalformedMessage(_))
        ));
    }

    #[test]
    fn oversized_header_rejected_at_construction() {
        let frame = Frame::new(0x01, 0x20, Bytes::new()).unwrap();
        let result = frame.with_header(Bytes::from(vec![0u8; 256]));
        assert!(matches!(result, Err(JrcpError::InvalidArgument(_))));
    }

    #[test]
    fn peek_accessors() {
        let frame = Frame::new(0x0A, 0x80, Bytes::from_static(b"\x00\x00hello"))
            .unwrap()
            .with_header(Bytes::from_static(b"h"))
            .unwrap();
        let encoded = frame.encode();
        assert_eq!(peek_mty(&encoded), Some(0x0A));
        assert_eq!(peek_nad(&encoded), Some(0x80));
        assert_eq!(peek_hdl(&encoded), Some(1));
        assert_eq!(payload_len(&encoded), Some(7));

        assert_eq!(peek_mty(b""), None);
        assert_eq!(peek_nad(b"\xA5"), None);
        assert_eq!(payload_len(b"\xA5\x01\x02\x05"), None);
    }

    #[test]
    fn streaming_decode_partial_then_complete() {
        let frame = Frame::new(0x01, 0x20, Bytes::from_static(b"payload")).unwrap();
        let encoded = frame.encode();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encoded[..5]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&encoded[5..]);
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn streaming_decode_multiple_frames() {
        let f1 = Frame::new(0x01, 0x20, Bytes::from_static(b"one")).unwrap();
        let f2 = Frame::new(0x0A, 0xFF, Bytes::from_static(b"two")).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&f1.encode());
        buf.extend_from_slice(&f2.encode());

        assert_eq!(Frame::decode(&mut buf).unwrap().unwrap(), f1);
        assert_eq!(Frame::decode(&mut buf).unwrap().unwrap(), f2);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn streaming_decode_bad_sof_fails() {
        let mut buf = BytesMut::from(&b"\x5A\x01\x02\x00\x00\x00\x00\x00\x00"[..]);
        assert!(matches!(
            Frame::decode(&mut buf),
            Err(JrcpError::MalformedMessage(_))
        ));
    }

    proptest! {
        #[test]
        fn parse_never_panics(raw in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = Frame::parse(&raw);
            let _ = peek_mty(&raw);
            let _ = peek_nad(&raw);
            let _ = peek_hdl(&raw);
            let _ = payload_len(&raw);
        }

        #[test]
        fn short_or_bad_sof_always_malformed(mut raw in proptest::collection::vec(any::<u8>(), 0..64)) {
            if raw.len() >= 4 {
                // Force a bad sentinel.
                if raw[0] == SOF {
                    raw[0] = raw[0].wrapping_add(1);
                }
            }
            prop_assert!(matches!(Frame::parse(&raw), Err(JrcpError::MalformedMessage(_))));
        }

        #[test]
        fn roundtrip_arbitrary_payload(
            mty in any::<u8>(),
            nad in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..256),
            header in proptest::collection::vec(any::<u8>(), 0..32),
        ) {
            let frame = Frame::new(mty, nad, Bytes::from(payload)).unwrap()
                .with_header(Bytes::from(header)).unwrap();
            let decoded = Frame::parse(&frame.encode()).unwrap();
            prop_assert_eq!(decoded, frame);
        }
    }
}
