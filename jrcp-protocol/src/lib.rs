//! # jrcp-protocol
//!
//! Wire protocol implementation for JRCP (reader/terminal communication
//! protocol).
//!
//! This crate provides:
//! - Binary framing with a fixed SOF sentinel, variable-length header and
//!   optional timing trailer
//! - Typed request messages selected by message type (MTY)
//! - Response frame builders and decoders
//! - The engine-wide result-code taxonomy and wire status codes

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::Decoder;
pub use error::{GenericStatus, JrcpError};
pub use frame::{Frame, Timing, FIXED_HEADER_SIZE, SOF};
pub use message::{Message, MessageBody, ResetKind};

/// Protocol version supported by this implementation.
pub const PROTOCOL_VERSION: u8 = 2;

/// Default port for a JRCP server.
pub const DEFAULT_PORT: u16 = 8050;

/// Node address reserved for the controller/server device. Also the
/// sentinel NAD reported for disconnected devices in directory listings.
pub const NAD_CONTROLLER: u8 = 0xFF;

/// Maximum frame payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Maximum device description length in bytes.
pub const MAX_DESCRIPTION_LEN: usize = 255;
