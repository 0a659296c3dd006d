//! Result-code taxonomy and wire status codes.
//!
//! Every failure in the engine is a value of [`JrcpError`]; nothing in the
//! dispatch path panics or escapes without a wire-visible status frame. Each
//! variant maps to a stable u16 code carried in status payloads.

use std::fmt;
use thiserror::Error;

/// A generic status code as carried in status/error response payloads
/// (u16, big-endian on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenericStatus(pub u16);

impl GenericStatus {
    pub const OK: GenericStatus = GenericStatus(0x0000);
    pub const GENERAL_ERROR: GenericStatus = GenericStatus(0x0001);

    // Addressing
    pub const NAD_IN_USE: GenericStatus = GenericStatus(0x0110);
    pub const NO_DEVICE_REGISTERED: GenericStatus = GenericStatus(0x0111);
    pub const DESCRIPTION_LENGTH_EXCEEDED: GenericStatus = GenericStatus(0x0112);

    // Handler lifecycle
    pub const HANDLER_ALREADY_PRESENT: GenericStatus = GenericStatus(0x0120);
    pub const NO_HANDLER_REGISTERED: GenericStatus = GenericStatus(0x0121);
    pub const MESSAGE_HANDLER_NOT_REGISTERED: GenericStatus = GenericStatus(0x0122);

    // Framing
    pub const MALFORMED_MESSAGE: GenericStatus = GenericStatus(0x0130);
    pub const INSUFFICIENT_BUFFER: GenericStatus = GenericStatus(0x0131);

    // Transport / session
    pub const INVALID_SOCKET: GenericStatus = GenericStatus(0x0140);
    pub const CLIENT_SOCKET_MISMATCH: GenericStatus = GenericStatus(0x0141);
    pub const NO_ACTIVE_CONNECTION: GenericStatus = GenericStatus(0x0142);
    pub const NETWORKING_INIT_FAILED: GenericStatus = GenericStatus(0x0143);
    pub const SOCKET_SEND_FAILED: GenericStatus = GenericStatus(0x0144);
    pub const SOCKET_RECV_FAILED: GenericStatus = GenericStatus(0x0145);
    pub const TIMEOUT_OCCURRED: GenericStatus = GenericStatus(0x0146);

    // Argument validation
    pub const INVALID_ARGUMENT: GenericStatus = GenericStatus(0x0150);
    pub const INVALID_DEVICE: GenericStatus = GenericStatus(0x0151);

    // Protocol
    pub const PROTOCOL_UNSUPPORTED: GenericStatus = GenericStatus(0x0160);
    pub const TIMING_OPTION_UNSUPPORTED: GenericStatus = GenericStatus(0x0161);
    pub const COMMAND_EXECUTION_FAILED: GenericStatus = GenericStatus(0x0162);

    /// Returns the raw code value.
    pub fn code(&self) -> u16 {
        self.0
    }

    /// Returns whether this status reports success.
    pub fn is_ok(&self) -> bool {
        *self == GenericStatus::OK
    }
}

impl From<u16> for GenericStatus {
    fn from(code: u16) -> Self {
        GenericStatus(code)
    }
}

impl fmt::Display for GenericStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// The closed set of result codes used across the engine.
///
/// Internal helpers return the narrowest applicable variant; the controller
/// dispatch path catches all of them and wraps them into a status frame, so
/// the wire contract is uniform for success and failure.
#[derive(Debug, Error)]
pub enum JrcpError {
    // Addressing
    #[error("node address {0:#04x} already in use")]
    NadInUse(u8),

    #[error("no device registered at node address {0:#04x}")]
    NoDeviceRegistered(u8),

    #[error("device description of {0} bytes exceeds the maximum")]
    DescriptionLengthExceeded(usize),

    // Handler lifecycle
    #[error("handler already present for message type {0:#04x}")]
    HandlerAlreadyPresent(u8),

    #[error("no handler registered for message type {0:#04x}")]
    NoHandlerRegistered(u8),

    #[error("device {nad:#04x} has no handler for message type {mty:#04x}")]
    MessageHandlerNotRegistered { nad: u8, mty: u8 },

    // Framing
    #[error("malformed message: {0}")]
    MalformedMessage(&'static str),

    #[error("insufficient buffer: need {needed} bytes, have {available}")]
    InsufficientBuffer { needed: usize, available: usize },

    // Transport / session
    #[error("invalid socket identifier")]
    InvalidSocket,

    #[error("device is bound to a different client socket")]
    ClientSocketMismatch,

    #[error("no active connection")]
    NoActiveConnection,

    #[error("networking initialization failed: {0}")]
    NetworkingInitFailed(#[source] std::io::Error),

    #[error("socket send failed: {0}")]
    SocketSendFailed(#[source] std::io::Error),

    #[error("socket receive failed: {0}")]
    SocketRecvFailed(#[source] std::io::Error),

    #[error("operation timed out")]
    TimeoutOccurred,

    // Argument validation
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("unknown device: {0}")]
    InvalidDevice(String),

    // Protocol
    #[error("protocol version {0} is not supported")]
    ProtocolUnsupported(u8),

    #[error("timing option {0:#04x} is not supported")]
    TimingOptionUnsupported(u8),

    #[error("remote command execution failed with status {0}")]
    CommandExecutionFailed(GenericStatus),
}

impl JrcpError {
    /// Returns the stable wire status code for this error.
    pub fn status_code(&self) -> GenericStatus {
        match self {
            JrcpError::NadInUse(_) => GenericStatus::NAD_IN_USE,
            JrcpError::NoDeviceRegistered(_) => GenericStatus::NO_DEVICE_REGISTERED,
            JrcpError::DescriptionLengthExceeded(_) => GenericStatus::DESCRIPTION_LENGTH_EXCEEDED,
            JrcpError::HandlerAlreadyPresent(_) => GenericStatus::HANDLER_ALREADY_PRESENT,
            JrcpError::NoHandlerRegistered(_) => GenericStatus::NO_HANDLER_REGISTERED,
            JrcpError::MessageHandlerNotRegistered { .. } => {
                GenericStatus::MESSAGE_HANDLER_NOT_REGISTERED
            }
            JrcpError::MalformedMessage(_) => GenericStatus::MALFORMED_MESSAGE,
            JrcpError::InsufficientBuffer { .. } => GenericStatus::INSUFFICIENT_BUFFER,
            JrcpError::InvalidSocket => GenericStatus::INVALID_SOCKET,
            JrcpError::ClientSocketMismatch => GenericStatus::CLIENT_SOCKET_MISMATCH,
            JrcpError::NoActiveConnection => GenericStatus::NO_ACTIVE_CONNECTION,
            JrcpError::NetworkingInitFailed(_) => GenericStatus::NETWORKING_INIT_FAILED,
            JrcpError::SocketSendFailed(_) => GenericStatus::SOCKET_SEND_FAILED,
            JrcpError::SocketRecvFailed(_) => GenericStatus::SOCKET_RECV_FAILED,
            JrcpError::TimeoutOccurred => GenericStatus::TIMEOUT_OCCURRED,
            JrcpError::InvalidArgument(_) => GenericStatus::INVALID_ARGUMENT,
            JrcpError::InvalidDevice(_) => GenericStatus::INVALID_DEVICE,
            JrcpError::ProtocolUnsupported(_) => GenericStatus::PROTOCOL_UNSUPPORTED,
            JrcpError::TimingOptionUnsupported(_) => GenericStatus::TIMING_OPTION_UNSUPPORTED,
            JrcpError::CommandExecutionFailed(_) => GenericStatus::COMMAND_EXECUTION_FAILED,
        }
    }

    /// Reconstructs the closest error for a status code received over the
    /// wire. Unknown codes map to `CommandExecutionFailed`.
    pub fn from_status(status: GenericStatus) -> Option<JrcpError> {
        if status.is_ok() {
            return None;
        }
        Some(match status {
            GenericStatus::MALFORMED_MESSAGE => JrcpError::MalformedMessage("reported by peer"),
            GenericStatus::CLIENT_SOCKET_MISMATCH => JrcpError::ClientSocketMismatch,
            GenericStatus::INVALID_SOCKET => JrcpError::InvalidSocket,
            GenericStatus::TIMEOUT_OCCURRED => JrcpError::TimeoutOccurred,
            other => JrcpError::CommandExecutionFailed(other),
        })
    }
}
