//! The controller: owns the registry and routes requests to handlers.

use crate::device::{ConnectionStatus, Device, MessageHandler, SocketId};
use crate::handlers;
use crate::registry::DeviceRegistry;
use bytes::Bytes;
use jrcp_protocol::message::{mty, response};
use jrcp_protocol::{
    frame, Frame, GenericStatus, JrcpError, Message, MAX_DESCRIPTION_LEN, NAD_CONTROLLER,
    PROTOCOL_VERSION,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Routes request frames to the handlers of registered devices.
///
/// All methods take `&mut self`; concurrent use requires an external lock.
/// The socket ownership check and the handler invocation happen under one
/// borrow, so check-then-act races cannot occur by construction.
pub struct Controller {
    name: String,
    version: u8,
    session: Uuid,
    features: u32,
    registry: DeviceRegistry,
}

impl Controller {
    /// Creates a controller speaking the given protocol version.
    ///
    /// The controller registers itself as the device at the reserved node
    /// address 0xFF, carrying the configuration handler in addition to the
    /// per-device defaults.
    pub fn new(name: impl Into<String>, version: u8) -> Result<Self, JrcpError> {
        if version != PROTOCOL_VERSION {
            return Err(JrcpError::ProtocolUnsupported(version));
        }
        let name = name.into();
        let mut controller = Self {
            name: name.clone(),
            version,
            session: Uuid::new_v4(),
            features: 0,
            registry: DeviceRegistry::new(),
        };
        controller.create_device(NAD_CONTROLLER, &name)?;
        controller.register_device(NAD_CONTROLLER)?;
        controller.register_handler(
            NAD_CONTROLLER,
            mty::CONTROLLER_CONFIGURATION,
            version,
            handlers::controller_configuration(),
        )?;
        info!(name = %controller.name, session = %controller.session, "controller created");
        Ok(controller)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// Session identifier reported through FeatureControl.
    pub fn session_id(&self) -> Uuid {
        self.session
    }

    /// The controller's own reported status (the device at 0xFF).
    pub fn status(&self) -> GenericStatus {
        self.registry
            .get(NAD_CONTROLLER)
            .map(Device::server_status)
            .unwrap_or(GenericStatus::OK)
    }

    pub fn set_status(&mut self, status: GenericStatus) {
        if let Some(device) = self.registry.get_mut(NAD_CONTROLLER) {
            device.set_server_status(status);
        }
    }

    /// Feature options bitmask reported through FeatureControl.
    pub fn features(&self) -> u32 {
        self.features
    }

    pub fn set_features(&mut self, features: u32) {
        self.features = features;
    }

    pub fn device(&self, nad: u8) -> Option<&Device> {
        self.registry.get(nad)
    }

    pub fn device_mut(&mut self, nad: u8) -> Option<&mut Device> {
        self.registry.get_mut(nad)
    }

    /// Creates a device at a free node address. The device stays invisible
    /// to directory listings until [`Controller::register_device`].
    pub fn create_device(&mut self, nad: u8, description: &str) -> Result<(), JrcpError> {
        if description.len() > MAX_DESCRIPTION_LEN {
            return Err(JrcpError::DescriptionLengthExceeded(description.len()));
        }
        self.registry.insert(Device::new(nad, description.to_string()))?;
        debug!(nad, description, "device created");
        Ok(())
    }

    /// Completes registration: installs the default handlers and makes the
    /// device visible to directory listings. Idempotent.
    pub fn register_device(&mut self, nad: u8) -> Result<(), JrcpError> {
        let device = self
            .registry
            .get_mut(nad)
            .ok_or(JrcpError::NoDeviceRegistered(nad))?;
        if device.is_registered() {
            return Ok(());
        }
        handlers::install_defaults(device)?;
        device.mark_registered();
        info!(nad, "device registered");
        Ok(())
    }

    /// Removes a device, dropping its handlers and socket binding.
    pub fn remove_device(&mut self, nad: u8) -> Result<(), JrcpError> {
        self.registry.remove(nad)?;
        info!(nad, "device removed");
        Ok(())
    }

    /// Installs a handler on the device at the given node address.
    pub fn register_handler(
        &mut self,
        nad: u8,
        mty: u8,
        version: u8,
        handler: MessageHandler,
    ) -> Result<(), JrcpError> {
        self.registry
            .get_mut(nad)
            .ok_or(JrcpError::NoDeviceRegistered(nad))?
            .register_handler(mty, version, handler)
    }

    /// Removes a handler from the device at the given node address.
    pub fn deregister_handler(&mut self, nad: u8, mty: u8) -> Result<(), JrcpError> {
        self.registry
            .get_mut(nad)
            .ok_or(JrcpError::NoDeviceRegistered(nad))?
            .deregister_handler(mty)
    }

    /// Marks a device reachable or unreachable from the device side.
    pub fn set_device_status(
        &mut self,
        nad: u8,
        status: ConnectionStatus,
    ) -> Result<(), JrcpError> {
        self.registry
            .get_mut(nad)
            .ok_or(JrcpError::NoDeviceRegistered(nad))?
            .set_status(status);
        Ok(())
    }

    /// Directory listing of registered devices: `(nad, description)` pairs
    /// in node-address order. Disconnected devices stay listed but under
    /// the sentinel address 0xFF.
    pub fn list_readers(&self) -> Vec<(u8, String)> {
        self.registry
            .iter_registered()
            .map(|device| {
                let nad = match device.status() {
                    ConnectionStatus::Connected => device.nad(),
                    ConnectionStatus::Disconnected => NAD_CONTROLLER,
                };
                (nad, device.description().to_string())
            })
            .collect()
    }

    /// Dispatches one raw request frame without socket ownership tracking.
    ///
    /// Always returns a complete response frame; failures come back as a
    /// status frame carrying the error's stable code.
    pub fn dispatch(&mut self, raw: &[u8]) -> Bytes {
        self.dispatch_inner(None, raw)
    }

    /// Dispatches one raw request frame on behalf of a client socket.
    ///
    /// The target device binds to the calling socket on first use; requests
    /// from a different socket to a bound device fail with a mismatch
    /// status. The controller's own address is exempt and shared by all
    /// sockets.
    pub fn dispatch_from(&mut self, socket: SocketId, raw: &[u8]) -> Bytes {
        self.dispatch_inner(Some(socket), raw)
    }

    fn dispatch_inner(&mut self, socket: Option<SocketId>, raw: &[u8]) -> Bytes {
        let mty = frame::peek_mty(raw).unwrap_or_default();
        let nad = frame::peek_nad(raw).unwrap_or_default();
        match self.try_dispatch(socket, raw) {
            Ok(response) => response.encode().freeze(),
            Err(err) => {
                warn!(mty, nad, %err, "request failed");
                response::error(nad, &err).encode().freeze()
            }
        }
    }

    fn try_dispatch(&mut self, socket: Option<SocketId>, raw: &[u8]) -> Result<Frame, JrcpError> {
        let frame = Frame::parse(raw)?;
        let message = Message::request(frame)?;
        let nad = message.nad();
        let mty = message.mty();
        debug!(mty, nad, len = message.raw_bytes().len(), "dispatching request");

        // Socket check and handler lookup share one registry borrow. The
        // handler lookup comes first so a request the device cannot serve
        // does not claim it for the calling socket.
        let handler = {
            let device = self
                .registry
                .get_mut(nad)
                .ok_or(JrcpError::NoDeviceRegistered(nad))?;
            let handler = device
                .lookup_handler(mty)
                .map(|entry| entry.handler.clone())
                .ok_or(JrcpError::MessageHandlerNotRegistered { nad, mty })?;
            if let Some(socket) = socket {
                if nad != NAD_CONTROLLER {
                    device.bind_socket(socket)?;
                }
            }
            handler
        };
        handler(self, &message)
    }

    /// Unbinds every device owned by a socket so other clients can claim
    /// them. Called by the transport when a client connection ends.
    pub fn release_socket(&mut self, socket: SocketId) {
        if !socket.is_valid() {
            return;
        }
        for device in self.registry.iter_mut() {
            if device.socket() == Some(socket) {
                let _ = device.unbind_socket(socket);
                debug!(nad = device.nad(), %socket, "socket released");
            }
        }
    }
}
