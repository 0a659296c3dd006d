//! Default handlers installed on every registered device.

use crate::controller::Controller;
use crate::device::{Device, MessageHandler};
use bytes::Bytes;
use jrcp_protocol::message::{
    mty, response, ControllerRequest, FeatureRequest, MessageBody, ServerStatusRequest,
};
use jrcp_protocol::{GenericStatus, JrcpError, Message};
use std::sync::Arc;

/// Installs the handlers every registered device answers with:
/// FeatureControl, ServerStatus and TerminalInfo.
pub fn install_defaults(device: &mut Device) -> Result<(), JrcpError> {
    let version = jrcp_protocol::PROTOCOL_VERSION;
    device.register_handler(mty::FEATURE_CONTROL, version, feature_control())?;
    device.register_handler(mty::SERVER_STATUS, version, server_status())?;
    device.register_handler(mty::TERMINAL_INFO, version, terminal_info())?;
    Ok(())
}

/// FeatureControl: protocol version, feature options bitmask, session id.
pub fn feature_control() -> MessageHandler {
    Arc::new(|controller: &mut Controller, msg: &Message| match msg.body() {
        MessageBody::FeatureControl(FeatureRequest::Version) => {
            Ok(response::feature_version(msg.nad()))
        }
        MessageBody::FeatureControl(FeatureRequest::Options) => {
            Ok(response::feature_options(msg.nad(), controller.features()))
        }
        MessageBody::FeatureControl(FeatureRequest::SessionId) => {
            Ok(response::session_id(msg.nad(), controller.session_id()))
        }
        _ => Err(JrcpError::MalformedMessage("not a feature-control request")),
    })
}

/// ServerStatus: report or update the addressed device's status code.
pub fn server_status() -> MessageHandler {
    Arc::new(|controller: &mut Controller, msg: &Message| {
        let device = controller
            .device_mut(msg.nad())
            .ok_or(JrcpError::NoDeviceRegistered(msg.nad()))?;
        match msg.body() {
            MessageBody::ServerStatus(ServerStatusRequest::Get) => Ok(response::status(
                msg.mty(),
                msg.nad(),
                device.server_status(),
                "",
            )),
            MessageBody::ServerStatus(ServerStatusRequest::Set(code)) => {
                device.set_server_status(*code);
                Ok(response::status(
                    msg.mty(),
                    msg.nad(),
                    GenericStatus::OK,
                    "",
                ))
            }
            _ => Err(JrcpError::MalformedMessage("not a server-status request")),
        }
    })
}

/// TerminalInfo: the device's own description, in the requested form.
pub fn terminal_info() -> MessageHandler {
    Arc::new(|controller: &mut Controller, msg: &Message| match msg.body() {
        MessageBody::TerminalInfo(form) => {
            let description = controller
                .device(msg.nad())
                .map(|device| device.description().to_string())
                .ok_or(JrcpError::NoDeviceRegistered(msg.nad()))?;
            response::terminal_info(msg.nad(), *form, description.as_bytes())
        }
        _ => Err(JrcpError::MalformedMessage("not a terminal-info request")),
    })
}

/// ControllerConfiguration: reader directory listing and controller
/// identifier. Installed only on the controller's own address.
pub fn controller_configuration() -> MessageHandler {
    Arc::new(|controller: &mut Controller, msg: &Message| match msg.body() {
        MessageBody::ControllerConfiguration(ControllerRequest::ListReaders) => {
            let readers = controller.list_readers();
            response::reader_list(
                msg.nad(),
                readers.iter().map(|(nad, desc)| (*nad, desc.as_str())),
            )
        }
        MessageBody::ControllerConfiguration(ControllerRequest::Identifier) => response::data(
            msg.mty(),
            msg.nad(),
            Bytes::copy_from_slice(controller.name().as_bytes()),
        ),
        _ => Err(JrcpError::MalformedMessage(
            "not a controller-configuration request",
        )),
    })
}
