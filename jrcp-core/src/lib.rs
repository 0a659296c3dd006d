//! # jrcp-core
//!
//! The JRCP engine: a registry of addressable devices and a controller that
//! routes parsed request messages to per-device handlers.
//!
//! The registry is the sole owner of all devices; everything outside refers
//! to a device by its node address. The controller takes `&mut self` for all
//! dispatch, so sharing across threads requires an explicit external lock.

pub mod controller;
pub mod device;
pub mod handlers;
pub mod registry;

pub use controller::Controller;
pub use device::{ConnectionStatus, Device, MessageHandler, SocketId};
pub use registry::DeviceRegistry;
