//! Built-in demo card device.
//!
//! Gives a freshly started server something to talk to: a virtual card that
//! answers the stock reader operations, echoes APDUs back and accepts the
//! timing and I/O-pin commands.

use bytes::Bytes;
use jrcp_core::{Controller, MessageHandler};
use jrcp_protocol::frame::{TIL_FULL, TIL_NONE, TIL_RESPONSE};
use jrcp_protocol::message::{mty, response, MessageBody, TimingRequest};
use jrcp_protocol::{Frame, GenericStatus, JrcpError, Message, PROTOCOL_VERSION};
use std::sync::Arc;

/// Answer-to-reset reported by the demo card.
pub const DEMO_ATR: &[u8] = &[
    0x3B, 0xF8, 0x13, 0x00, 0x00, 0x81, 0x31, 0xFE, 0x45, 0x4A, 0x43, 0x4F, 0x50, 0x76, 0x32,
    0x34, 0x31, 0xB7,
];

/// Timing options the demo device accepts.
const TIMING_OPTIONS: &[u8] = &[TIL_NONE, TIL_RESPONSE, TIL_FULL];

/// Creates and registers the demo card device with its full handler set.
pub fn install_demo_device(
    controller: &mut Controller,
    nad: u8,
    description: &str,
) -> Result<(), JrcpError> {
    controller.create_device(nad, description)?;
    controller.register_device(nad)?;

    controller.register_handler(nad, mty::WAIT_FOR_CARD, PROTOCOL_VERSION, atr_handler())?;
    controller.register_handler(nad, mty::WARM_RESET, PROTOCOL_VERSION, atr_handler())?;
    controller.register_handler(nad, mty::COLD_RESET, PROTOCOL_VERSION, atr_handler())?;
    controller.register_handler(nad, mty::SEND_DATA, PROTOCOL_VERSION, echo_handler())?;
    controller.register_handler(nad, mty::HCI_SEND_DATA, PROTOCOL_VERSION, echo_handler())?;
    controller.register_handler(nad, mty::PREPARE_TEARING, PROTOCOL_VERSION, ok_handler())?;
    controller.register_handler(nad, mty::SET_IO_PIN, PROTOCOL_VERSION, io_pin_handler())?;
    controller.register_handler(nad, mty::TIMING_INFO, PROTOCOL_VERSION, timing_handler())?;
    Ok(())
}

fn atr_handler() -> MessageHandler {
    Arc::new(|_: &mut Controller, msg: &Message| {
        response::atr(msg.mty(), msg.nad(), DEMO_ATR)
    })
}

fn echo_handler() -> MessageHandler {
    Arc::new(|_: &mut Controller, msg: &Message| {
        response::data(msg.mty(), msg.nad(), msg.raw_bytes().clone())
    })
}

fn ok_handler() -> MessageHandler {
    Arc::new(|_: &mut Controller, msg: &Message| {
        Ok(response::status(
            msg.mty(),
            msg.nad(),
            GenericStatus::OK,
            "",
        ))
    })
}

fn io_pin_handler() -> MessageHandler {
    Arc::new(|_: &mut Controller, msg: &Message| match msg.body() {
        MessageBody::SetIoPin { pin, high } => Ok(response::io_pin(msg.nad(), *pin, *high)),
        _ => Err(JrcpError::MalformedMessage("not an io-pin request")),
    })
}

fn timing_handler() -> MessageHandler {
    Arc::new(|_: &mut Controller, msg: &Message| match msg.body() {
        MessageBody::TimingInfo(TimingRequest::ResetTimer) => Ok(response::status(
            msg.mty(),
            msg.nad(),
            GenericStatus::OK,
            "",
        )),
        MessageBody::TimingInfo(TimingRequest::QueryOptions) => {
            Ok(response::timing_options(msg.nad(), TIMING_OPTIONS))
        }
        MessageBody::TimingInfo(TimingRequest::SetOption(option)) => {
            if TIMING_OPTIONS.contains(option) {
                Ok(response::status(
                    msg.mty(),
                    msg.nad(),
                    GenericStatus::OK,
                    "",
                ))
            } else {
                Err(JrcpError::TimingOptionUnsupported(*option))
            }
        }
        _ => Err(JrcpError::MalformedMessage("not a timing request")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jrcp_protocol::message::StatusReport;

    fn demo_controller() -> Controller {
        let mut c = Controller::new("demo", PROTOCOL_VERSION).unwrap();
        install_demo_device(&mut c, 0x20, "virtual card").unwrap();
        c
    }

    fn dispatch(c: &mut Controller, mty: u8, payload: &[u8]) -> Frame {
        let raw = Frame::new(mty, 0x20, Bytes::copy_from_slice(payload))
            .unwrap()
            .encode();
        Frame::parse(&c.dispatch(&raw)).unwrap()
    }

    #[test]
    fn card_presents_atr() {
        let mut c = demo_controller();
        for mty in [mty::WAIT_FOR_CARD, mty::WARM_RESET, mty::COLD_RESET] {
            let frame = dispatch(&mut c, mty, b"");
            assert_eq!(frame.payload().as_ref(), DEMO_ATR);
        }
    }

    #[test]
    fn apdu_is_echoed() {
        let mut c = demo_controller();
        let frame = dispatch(&mut c, mty::SEND_DATA, b"\x00\xA4\x04\x00");
        assert_eq!(frame.payload().as_ref(), b"\x00\xA4\x04\x00");
    }

    #[test]
    fn unsupported_timing_option_is_reported() {
        let mut c = demo_controller();
        let frame = dispatch(&mut c, mty::TIMING_INFO, b"\x02\x05");
        let report = StatusReport::from_frame(&frame).unwrap();
        assert_eq!(
            report.status,
            GenericStatus::TIMING_OPTION_UNSUPPORTED
        );

        let frame = dispatch(&mut c, mty::TIMING_INFO, b"\x01");
        assert_eq!(frame.payload().as_ref(), TIMING_OPTIONS);
    }

    #[test]
    fn tearing_is_acknowledged() {
        let mut c = demo_controller();
        let frame = dispatch(&mut c, mty::PREPARE_TEARING, b"\x00\x00\x00\x00\x05");
        let report = StatusReport::from_frame(&frame).unwrap();
        assert!(report.status.is_ok());
    }
}
