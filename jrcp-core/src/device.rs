//! Addressable devices and their handler tables.

use crate::controller::Controller;
use jrcp_protocol::{Frame, GenericStatus, JrcpError, Message};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Identifier of the client connection a device is bound to.
///
/// Zero is never a valid connection; it doubles as the "unbound" marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(pub u64);

impl SocketId {
    /// The reserved invalid/unbound identifier.
    pub const INVALID: SocketId = SocketId(0);

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a device is currently reachable.
///
/// This is availability from the device side (a simulator going offline,
/// a reader unplugged), independent of which client socket has the device
/// bound. Registration marks a device connected; disconnected devices stay
/// listed in the directory but under the sentinel address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
}

/// A message handler attached to a device for one message type.
///
/// Handlers receive the controller so they can reach the registry and
/// controller state; the dispatch path clones the `Arc` out of the device
/// before invoking, which keeps the registry borrow short.
pub type MessageHandler =
    Arc<dyn Fn(&mut Controller, &Message) -> Result<Frame, JrcpError> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct HandlerEntry {
    pub version: u8,
    pub handler: MessageHandler,
}

/// One addressable endpoint in the registry.
///
/// Lifecycle: created (invisible to directory listings) → registered →
/// connected/disconnected → removed.
pub struct Device {
    nad: u8,
    description: String,
    registered: bool,
    status: ConnectionStatus,
    busy: bool,
    server_status: GenericStatus,
    socket: SocketId,
    handlers: HashMap<u8, HandlerEntry>,
}

impl Device {
    pub(crate) fn new(nad: u8, description: String) -> Self {
        Self {
            nad,
            description,
            registered: false,
            status: ConnectionStatus::Disconnected,
            busy: false,
            server_status: GenericStatus::OK,
            socket: SocketId::INVALID,
            handlers: HashMap::new(),
        }
    }

    pub fn nad(&self) -> u8 {
        self.nad
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub(crate) fn mark_registered(&mut self) {
        self.registered = true;
        self.status = ConnectionStatus::Connected;
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    /// The last status code this device reported through ServerStatus.
    pub fn server_status(&self) -> GenericStatus {
        self.server_status
    }

    pub fn set_server_status(&mut self, status: GenericStatus) {
        self.server_status = status;
    }

    /// The socket this device is bound to, if any.
    pub fn socket(&self) -> Option<SocketId> {
        self.socket.is_valid().then_some(self.socket)
    }

    /// Binds the device to a client socket.
    ///
    /// Binding to the already-bound socket is a no-op success; a different
    /// live binding is a mismatch.
    pub fn bind_socket(&mut self, socket: SocketId) -> Result<(), JrcpError> {
        if !socket.is_valid() {
            return Err(JrcpError::InvalidSocket);
        }
        if self.socket.is_valid() && self.socket != socket {
            return Err(JrcpError::ClientSocketMismatch);
        }
        self.socket = socket;
        Ok(())
    }

    /// Releases the device's socket binding.
    ///
    /// Unbinding an unbound device succeeds silently; unbinding with a
    /// foreign identifier is a mismatch.
    pub fn unbind_socket(&mut self, socket: SocketId) -> Result<(), JrcpError> {
        if !self.socket.is_valid() {
            return Ok(());
        }
        if self.socket != socket {
            return Err(JrcpError::ClientSocketMismatch);
        }
        self.socket = SocketId::INVALID;
        Ok(())
    }

    /// Installs a handler for a message type. At most one per MTY.
    pub fn register_handler(
        &mut self,
        mty: u8,
        version: u8,
        handler: MessageHandler,
    ) -> Result<(), JrcpError> {
        if self.handlers.contains_key(&mty) {
            return Err(JrcpError::HandlerAlreadyPresent(mty));
        }
        self.handlers.insert(mty, HandlerEntry { version, handler });
        Ok(())
    }

    /// Removes the handler for a message type.
    pub fn deregister_handler(&mut self, mty: u8) -> Result<(), JrcpError> {
        match self.handlers.remove(&mty) {
            Some(_) => Ok(()),
            None => Err(JrcpError::NoHandlerRegistered(mty)),
        }
    }

    pub fn has_handler(&self, mty: u8) -> bool {
        self.handlers.contains_key(&mty)
    }

    pub(crate) fn lookup_handler(&self, mty: u8) -> Option<&HandlerEntry> {
        self.handlers.get(&mty)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("nad", &self.nad)
            .field("description", &self.description)
            .field("registered", &self.registered)
            .field("status", &self.status)
            .field("busy", &self.busy)
            .field("server_status", &self.server_status)
            .field("socket", &self.socket)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn noop_handler() -> MessageHandler {
        Arc::new(|_: &mut Controller, msg: &Message| Frame::new(msg.mty(), msg.nad(), Bytes::new()))
    }

    #[test]
    fn handler_registration_is_exclusive_per_mty() {
        let mut device = Device::new(0x20, "sim".into());
        device.register_handler(0x01, 1, noop_handler()).unwrap();
        assert!(device.has_handler(0x01));

        let err = device.register_handler(0x01, 1, noop_handler());
        assert!(matches!(err, Err(JrcpError::HandlerAlreadyPresent(0x01))));

        device.deregister_handler(0x01).unwrap();
        assert!(!device.has_handler(0x01));
        let err = device.deregister_handler(0x01);
        assert!(matches!(err, Err(JrcpError::NoHandlerRegistered(0x01))));

        // A freed slot accepts a new handler again.
        device.register_handler(0x01, 2, noop_handler()).unwrap();
    }

    #[test]
    fn socket_binding_matrix() {
        let mut device = Device::new(0x20, "sim".into());
        assert_eq!(device.socket(), None);

        // Zero is never bindable.
        assert!(matches!(
            device.bind_socket(SocketId::INVALID),
            Err(JrcpError::InvalidSocket)
        ));

        device.bind_socket(SocketId(7)).unwrap();
        assert_eq!(device.socket(), Some(SocketId(7)));

        // Rebinding the same socket is idempotent.
        device.bind_socket(SocketId(7)).unwrap();

        // A different socket cannot steal the binding.
        assert!(matches!(
            device.bind_socket(SocketId(8)),
            Err(JrcpError::ClientSocketMismatch)
        ));

        // Foreign unbind is rejected, owner unbind succeeds.
        assert!(matches!(
            device.unbind_socket(SocketId(8)),
            Err(JrcpError::ClientSocketMismatch)
        ));
        device.unbind_socket(SocketId(7)).unwrap();
        assert_eq!(device.socket(), None);

        // Unbinding when unbound is a silent success.
        device.unbind_socket(SocketId(9)).unwrap();
    }

    #[test]
    fn busy_and_server_status_are_plain_state() {
        let mut device = Device::new(0x20, "sim".into());
        assert!(!device.is_busy());
        assert_eq!(device.server_status(), GenericStatus::OK);

        device.set_busy(true);
        device.set_server_status(GenericStatus::GENERAL_ERROR);
        assert!(device.is_busy());
        assert_eq!(device.server_status(), GenericStatus::GENERAL_ERROR);
    }

    #[test]
    fn registration_marks_device_connected() {
        let mut device = Device::new(0x20, "sim".into());
        assert_eq!(device.status(), ConnectionStatus::Disconnected);
        device.mark_registered();
        assert_eq!(device.status(), ConnectionStatus::Connected);
    }
}
