//! # jrcp-server
//!
//! TCP server for JRCP.
//!
//! This crate provides:
//! - TCP connection handling with async I/O
//! - Per-connection socket-id assignment and release
//! - Frame decoding and controller dispatch
//! - A demo card device for test-driving clients

pub mod config;
pub mod demo;
pub mod error;
pub mod server;

pub use config::{Config, ControllerConfig, NetworkConfig};
pub use error::ServerError;
pub use server::{Server, ServerConfig};
