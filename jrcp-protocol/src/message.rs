//! Typed request messages, response builders and response decoders.
//!
//! A [`Message`] is a request [`Frame`] paired with its parsed body. The
//! body variant is selected by the MTY byte; message types in the
//! device-specific range and unrecognized MTYs fall back to
//! [`MessageBody::Generic`] so proprietary extensions pass through untouched.
//!
//! Responses are plain frames built by the functions in [`response`] and
//! interpreted by the decoders at the bottom of this module.

use crate::error::{GenericStatus, JrcpError};
use crate::frame::{Frame, Timing};
use crate::{MAX_DESCRIPTION_LEN, PROTOCOL_VERSION};
use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Message type (MTY) assignments.
pub mod mty {
    pub const WAIT_FOR_CARD: u8 = 0x00;
    pub const SEND_DATA: u8 = 0x01;
    pub const TERMINAL_INFO: u8 = 0x02;
    pub const SERVER_STATUS: u8 = 0x0A;
    pub const TIMING_INFO: u8 = 0x0B;
    pub const PREPARE_TEARING: u8 = 0x0C;
    pub const EVENT_HANDLING: u8 = 0x0D;
    pub const SET_IO_PIN: u8 = 0x0E;
    pub const WARM_RESET: u8 = 0x0F;
    pub const COLD_RESET: u8 = 0x10;
    pub const HCI_SEND_DATA: u8 = 0x11;
    pub const FEATURE_CONTROL: u8 = 0xFA;
    pub const CONTROLLER_CONFIGURATION: u8 = 0xFF;

    /// Inclusive bounds of the device-specific message type range.
    pub const DEVICE_SPECIFIC_START: u8 = 0x80;
    pub const DEVICE_SPECIFIC_END: u8 = 0xF9;

    /// Returns whether an MTY falls in the device-specific range.
    pub fn is_device_specific(mty: u8) -> bool {
        (DEVICE_SPECIFIC_START..=DEVICE_SPECIFIC_END).contains(&mty)
    }
}

/// Reset flavor, shared by the reset and tearing operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    Cold,
    Warm,
}

impl ResetKind {
    /// Wire encoding used in the PrepareTearing sub-payload.
    pub fn code(&self) -> u8 {
        match self {
            ResetKind::Cold => 0x00,
            ResetKind::Warm => 0x01,
        }
    }

    /// The reset message type for this kind.
    pub fn mty(&self) -> u8 {
        match self {
            ResetKind::Cold => mty::COLD_RESET,
            ResetKind::Warm => mty::WARM_RESET,
        }
    }
}

/// TerminalInfo response form requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalInfoForm {
    /// Response payload is the raw descriptor bytes.
    Standard,
    /// Response payload is `[len u8, bytes]` (legacy clients).
    Legacy,
}

/// ServerStatus sub-commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatusRequest {
    Get,
    Set(GenericStatus),
}

/// TimingInfo sub-commands. Valid options are exactly the TIL codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingRequest {
    ResetTimer,
    QueryOptions,
    SetOption(u8),
}

/// EventHandling sub-commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRequest {
    Query,
    Acknowledge(Bytes),
}

/// FeatureControl sub-commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureRequest {
    Version,
    Options,
    SessionId,
}

/// ControllerConfiguration sub-commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerRequest {
    ListReaders,
    Identifier,
}

/// Parsed request body, selected by MTY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    WaitForCard,
    SendData,
    TerminalInfo(TerminalInfoForm),
    ServerStatus(ServerStatusRequest),
    TimingInfo(TimingRequest),
    PrepareTearing { kind: ResetKind, count: u32 },
    EventHandling(EventRequest),
    SetIoPin { pin: u8, high: bool },
    Reset(ResetKind),
    HciSendData,
    FeatureControl(FeatureRequest),
    ControllerConfiguration(ControllerRequest),
    /// Device-specific or unrecognized message type; payload passes through.
    Generic,
}

/// A request frame with its parsed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    frame: Frame,
    body: MessageBody,
}

impl Message {
    /// Parses a request frame into a typed message.
    ///
    /// Sub-payload defects in recognized message types fail with
    /// `MalformedMessage`; device-specific and unknown MTYs never fail here.
    pub fn request(frame: Frame) -> Result<Self, JrcpError> {
        let body = parse_body(&frame)?;
        Ok(Self { frame, body })
    }

    pub fn mty(&self) -> u8 {
        self.frame.mty()
    }

    pub fn nad(&self) -> u8 {
        self.frame.nad()
    }

    pub fn header(&self) -> &Bytes {
        self.frame.header()
    }

    pub fn timing(&self) -> Timing {
        self.frame.timing()
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// The raw payload bytes of the underlying frame.
    pub fn raw_bytes(&self) -> &Bytes {
        self.frame.payload()
    }
}

fn parse_body(frame: &Frame) -> Result<MessageBody, JrcpError> {
    let p = frame.payload().as_ref();
    let body = match frame.mty() {
        mty::WAIT_FOR_CARD => {
            require_empty(p)?;
            MessageBody::WaitForCard
        }
        mty::SEND_DATA => MessageBody::SendData,
        mty::TERMINAL_INFO => match p {
            [] => MessageBody::TerminalInfo(TerminalInfoForm::Standard),
            [0x01] => MessageBody::TerminalInfo(TerminalInfoForm::Legacy),
            _ => return Err(JrcpError::MalformedMessage("bad terminal-info request")),
        },
        mty::SERVER_STATUS => match p {
            [0x00] => MessageBody::ServerStatus(ServerStatusRequest::Get),
            [0x01, hi, lo] => MessageBody::ServerStatus(ServerStatusRequest::Set(
                GenericStatus(u16::from_be_bytes([*hi, *lo])),
            )),
            _ => return Err(JrcpError::MalformedMessage("bad server-status request")),
        },
        mty::TIMING_INFO => match p {
            [0x00] => MessageBody::TimingInfo(TimingRequest::ResetTimer),
            [0x01] => MessageBody::TimingInfo(TimingRequest::QueryOptions),
            [0x02, option] => MessageBody::TimingInfo(TimingRequest::SetOption(*option)),
            _ => return Err(JrcpError::MalformedMessage("bad timing-info request")),
        },
        mty::PREPARE_TEARING => match p {
            [kind, c0, c1, c2, c3] => {
                let kind = match kind {
                    0x00 => ResetKind::Cold,
                    0x01 => ResetKind::Warm,
                    _ => return Err(JrcpError::MalformedMessage("bad tearing reset kind")),
                };
                MessageBody::PrepareTearing {
                    kind,
                    count: u32::from_be_bytes([*c0, *c1, *c2, *c3]),
                }
            }
            _ => return Err(JrcpError::MalformedMessage("bad prepare-tearing request")),
        },
        mty::EVENT_HANDLING => match p.split_first() {
            Some((0x00, [])) => MessageBody::EventHandling(EventRequest::Query),
            Some((0x01, data)) => MessageBody::EventHandling(EventRequest::Acknowledge(
                frame.payload().slice(1..1 + data.len()),
            )),
            _ => return Err(JrcpError::MalformedMessage("bad event-handling request")),
        },
        mty::SET_IO_PIN => match p {
            [pin, state @ (0x00 | 0x01)] => MessageBody::SetIoPin {
                pin: *pin,
                high: *state == 0x01,
            },
            _ => return Err(JrcpError::MalformedMessage("bad io-pin request")),
        },
        mty::WARM_RESET => {
            require_empty(p)?;
            MessageBody::Reset(ResetKind::Warm)
        }
        mty::COLD_RESET => {
            require_empty(p)?;
            MessageBody::Reset(ResetKind::Cold)
        }
        mty::HCI_SEND_DATA => MessageBody::HciSendData,
        mty::FEATURE_CONTROL => match p {
            [0x00] => MessageBody::FeatureControl(FeatureRequest::Version),
            [0x01] => MessageBody::FeatureControl(FeatureRequest::Options),
            [0x02] => MessageBody::FeatureControl(FeatureRequest::SessionId),
            _ => return Err(JrcpError::MalformedMessage("bad feature-control request")),
        },
        mty::CONTROLLER_CONFIGURATION => match p {
            [0x00] => MessageBody::ControllerConfiguration(ControllerRequest::ListReaders),
            [0x01] => MessageBody::ControllerConfiguration(ControllerRequest::Identifier),
            _ => {
                return Err(JrcpError::MalformedMessage(
                    "bad controller-configuration request",
                ))
            }
        },
        _ => MessageBody::Generic,
    };
    Ok(body)
}

fn require_empty(payload: &[u8]) -> Result<(), JrcpError> {
    if payload.is_empty() {
        Ok(())
    } else {
        Err(JrcpError::MalformedMessage("unexpected request payload"))
    }
}

/// Response frame builders.
///
/// Success frames carry the message type of the request they answer; error
/// frames always carry the ServerStatus type. Builders with bounded
/// payloads are total; the rest validate and return `Result`.
pub mod response {
    use super::*;

    /// Longest status message carried on the wire; longer ones are cut.
    const MAX_STATUS_MESSAGE: usize = 1024;

    /// Builds a status frame: `[code u16 BE, message…]`.
    ///
    /// This is both the ServerStatus response and the uniform error frame
    /// the dispatch path emits for any failed request. Total by
    /// construction so error wrapping itself cannot fail.
    pub fn status(req_mty: u8, nad: u8, code: GenericStatus, message: &str) -> Frame {
        let msg = message.as_bytes();
        let msg = &msg[..msg.len().min(MAX_STATUS_MESSAGE)];
        let mut payload = BytesMut::with_capacity(2 + msg.len());
        payload.put_u16(code.code());
        payload.put_slice(msg);
        Frame::from_parts(req_mty, nad, payload.freeze())
    }

    /// Builds the uniform error frame for a failed request.
    ///
    /// Error frames always carry the ServerStatus message type, regardless
    /// of the request that failed. Success responses carry the request's
    /// own message type, so a client can tell the two apart even when the
    /// success payload is opaque (an ATR, echoed data).
    pub fn error(nad: u8, err: &JrcpError) -> Frame {
        status(mty::SERVER_STATUS, nad, err.status_code(), &err.to_string())
    }

    /// ATR response for WaitForCard and the reset operations.
    pub fn atr(req_mty: u8, nad: u8, atr: &[u8]) -> Result<Frame, JrcpError> {
        Frame::new(req_mty, nad, Bytes::copy_from_slice(atr))
    }

    /// Opaque data response (SendData, HciSendData, device-specific).
    pub fn data(req_mty: u8, nad: u8, payload: Bytes) -> Result<Frame, JrcpError> {
        Frame::new(req_mty, nad, payload)
    }

    /// TerminalInfo response in the requested form.
    pub fn terminal_info(
        nad: u8,
        form: TerminalInfoForm,
        info: &[u8],
    ) -> Result<Frame, JrcpError> {
        let payload = match form {
            TerminalInfoForm::Standard => Bytes::copy_from_slice(info),
            TerminalInfoForm::Legacy => {
                if info.len() > u8::MAX as usize {
                    return Err(JrcpError::InvalidArgument(
                        "terminal info too long for legacy form",
                    ));
                }
                let mut buf = BytesMut::with_capacity(1 + info.len());
                buf.put_u8(info.len() as u8);
                buf.put_slice(info);
                buf.freeze()
            }
        };
        Frame::new(mty::TERMINAL_INFO, nad, payload)
    }

    /// Reader directory listing: repeated `[nad u8, len u8, description…]`.
    pub fn reader_list<'a, I>(nad: u8, entries: I) -> Result<Frame, JrcpError>
    where
        I: IntoIterator<Item = (u8, &'a str)>,
    {
        let mut payload = BytesMut::new();
        for (entry_nad, description) in entries {
            let desc = description.as_bytes();
            if desc.len() > MAX_DESCRIPTION_LEN {
                return Err(JrcpError::DescriptionLengthExceeded(desc.len()));
            }
            payload.put_u8(entry_nad);
            payload.put_u8(desc.len() as u8);
            payload.put_slice(desc);
        }
        Frame::new(mty::CONTROLLER_CONFIGURATION, nad, payload.freeze())
    }

    /// FeatureControl version response.
    pub fn feature_version(nad: u8) -> Frame {
        Frame::from_parts(
            mty::FEATURE_CONTROL,
            nad,
            Bytes::copy_from_slice(&[PROTOCOL_VERSION]),
        )
    }

    /// FeatureControl options bitmask response.
    pub fn feature_options(nad: u8, options: u32) -> Frame {
        Frame::from_parts(
            mty::FEATURE_CONTROL,
            nad,
            Bytes::copy_from_slice(&options.to_be_bytes()),
        )
    }

    /// FeatureControl session identifier response (16-byte UUID).
    pub fn session_id(nad: u8, id: Uuid) -> Frame {
        Frame::from_parts(
            mty::FEATURE_CONTROL,
            nad,
            Bytes::copy_from_slice(id.as_bytes()),
        )
    }

    /// TimingInfo options response: one byte per supported TIL code.
    pub fn timing_options(nad: u8, options: &[u8]) -> Frame {
        Frame::from_parts(mty::TIMING_INFO, nad, Bytes::copy_from_slice(options))
    }

    /// SetIoPin acknowledgement echoing the pin and resulting state.
    pub fn io_pin(nad: u8, pin: u8, high: bool) -> Frame {
        Frame::from_parts(
            mty::SET_IO_PIN,
            nad,
            Bytes::copy_from_slice(&[pin, high as u8]),
        )
    }
}

/// A decoded status payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: GenericStatus,
    pub message: String,
}

impl StatusReport {
    /// Decodes a status frame payload: `[code u16 BE, message…]`.
    pub fn from_frame(frame: &Frame) -> Result<Self, JrcpError> {
        let p = frame.payload().as_ref();
        if p.len() < 2 {
            return Err(JrcpError::MalformedMessage("status payload too short"));
        }
        Ok(Self {
            status: GenericStatus(u16::from_be_bytes([p[0], p[1]])),
            message: String::from_utf8_lossy(&p[2..]).into_owned(),
        })
    }

    /// Turns a non-OK report into its error, `Ok(())` otherwise.
    pub fn into_result(self) -> Result<(), JrcpError> {
        match JrcpError::from_status(self.status) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

/// One entry of a reader directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderEntry {
    pub nad: u8,
    pub description: String,
}

/// Decodes a ListReaders response payload.
pub fn decode_reader_list(frame: &Frame) -> Result<Vec<ReaderEntry>, JrcpError> {
    let mut p = frame.payload().as_ref();
    let mut entries = Vec::new();
    while !p.is_empty() {
        if p.len() < 2 {
            return Err(JrcpError::MalformedMessage("truncated reader entry"));
        }
        let nad = p[0];
        let len = p[1] as usize;
        if p.len() < 2 + len {
            return Err(JrcpError::MalformedMessage("truncated reader description"));
        }
        entries.push(ReaderEntry {
            nad,
            description: String::from_utf8_lossy(&p[2..2 + len]).into_owned(),
        });
        p = &p[2 + len..];
    }
    Ok(entries)
}

/// Decodes a FeatureControl version response.
pub fn decode_feature_version(frame: &Frame) -> Result<u8, JrcpError> {
    match frame.payload().as_ref() {
        [version] => Ok(*version),
        _ => Err(JrcpError::MalformedMessage("bad version response")),
    }
}

/// Decodes a FeatureControl options response.
pub fn decode_feature_options(frame: &Frame) -> Result<u32, JrcpError> {
    match frame.payload().as_ref() {
        [a, b, c, d] => Ok(u32::from_be_bytes([*a, *b, *c, *d])),
        _ => Err(JrcpError::MalformedMessage("bad options response")),
    }
}

/// Decodes a FeatureControl session identifier response.
pub fn decode_session_id(frame: &Frame) -> Result<Uuid, JrcpError> {
    Uuid::from_slice(frame.payload().as_ref())
        .map_err(|_| JrcpError::MalformedMessage("bad session id response"))
}

/// Decodes a TerminalInfo response in the given form.
pub fn decode_terminal_info(frame: &Frame, form: TerminalInfoForm) -> Result<String, JrcpError> {
    let p = frame.payload().as_ref();
    let info = match form {
        TerminalInfoForm::Standard => p,
        TerminalInfoForm::Legacy => match p.split_first() {
            Some((len, rest)) if rest.len() == *len as usize => rest,
            _ => return Err(JrcpError::MalformedMessage("bad legacy terminal info")),
        },
    };
    Ok(String::from_utf8_lossy(info).into_owned())
}
