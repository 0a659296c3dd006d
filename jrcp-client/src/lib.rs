//! # jrcp-client
//!
//! Async client for JRCP servers.
//!
//! [`JrcpClient`] keeps the session state the protocol expects: the reader
//! directory retrieved from the server, the currently selected node and the
//! last answer-to-reset. All operations report failures through the
//! engine-wide [`jrcp_protocol::JrcpError`] taxonomy.

pub mod client;
pub mod connection;

pub use client::JrcpClient;
pub use connection::{Connection, ConnectionConfig};
