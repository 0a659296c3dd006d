//! High-level client API.
//!
//! The client tracks the protocol session state: the reader directory, the
//! selected node address and the answer-to-reset from the last card reset.
//! The selected node defaults to the numerically smallest listed address
//! until [`JrcpClient::connect_to_node`] picks one by name.

use crate::connection::{Connection, ConnectionConfig};
use bytes::{BufMut, Bytes, BytesMut};
use jrcp_protocol::message::{
    self, mty, ReaderEntry, ResetKind, StatusReport, TerminalInfoForm,
};
use jrcp_protocol::{Frame, GenericStatus, JrcpError, NAD_CONTROLLER};
use std::collections::BTreeMap;

/// High-level client for a JRCP server.
pub struct JrcpClient {
    conn: Connection,
    nodes: BTreeMap<u8, String>,
    current_nad: Option<u8>,
    current_atr: Option<Bytes>,
}

impl JrcpClient {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Connection::new(config),
            nodes: BTreeMap::new(),
            current_nad: None,
            current_atr: None,
        }
    }

    /// Connects to the server.
    pub async fn connect(&mut self) -> Result<(), JrcpError> {
        self.conn.connect().await
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Disconnects and clears the session state. Never fails; disconnecting
    /// an unconnected client is a no-op.
    pub async fn disconnect(&mut self) -> Result<(), JrcpError> {
        self.conn.close().await;
        self.nodes.clear();
        self.current_nad = None;
        self.current_atr = None;
        Ok(())
    }

    /// Node address requests are currently addressed to.
    pub fn current_nad(&self) -> Option<u8> {
        self.current_nad
    }

    /// Answer-to-reset from the last card connect or reset.
    pub fn current_atr(&self) -> Option<&Bytes> {
        self.current_atr.as_ref()
    }

    /// Retrieves the reader directory from the server.
    ///
    /// If no node is selected yet, the numerically smallest listed address
    /// becomes the default target.
    pub async fn retrieve_nodes_list(&mut self) -> Result<Vec<ReaderEntry>, JrcpError> {
        let request = Frame::new(
            mty::CONTROLLER_CONFIGURATION,
            NAD_CONTROLLER,
            Bytes::from_static(&[0x00]),
        )?;
        let response = self.request(&request).await?;
        let entries = message::decode_reader_list(&response)?;

        self.nodes = entries
            .iter()
            .map(|e| (e.nad, e.description.clone()))
            .collect();
        if self.current_nad.is_none() {
            self.current_nad = self
                .nodes
                .keys()
                .copied()
                .find(|nad| *nad != NAD_CONTROLLER);
        }
        Ok(entries)
    }

    /// Selects a node by its directory description and performs the
    /// WaitForCard handshake, storing the resulting ATR.
    pub async fn connect_to_node(&mut self, name: &str) -> Result<(), JrcpError> {
        if self.nodes.is_empty() {
            self.retrieve_nodes_list().await?;
        }
        let nad = self
            .nodes
            .iter()
            .find(|(_, description)| description.as_str() == name)
            .map(|(nad, _)| *nad)
            .ok_or_else(|| JrcpError::InvalidDevice(name.to_string()))?;

        let request = Frame::new(mty::WAIT_FOR_CARD, nad, Bytes::new())?;
        let response = self.request(&request).await?;
        self.current_nad = Some(nad);
        self.current_atr = Some(response.payload().clone());
        tracing::debug!(nad, name, "connected to node");
        Ok(())
    }

    /// Retrieves the terminal descriptor of the selected node.
    pub async fn retrieve_terminal_info(&mut self) -> Result<String, JrcpError> {
        let nad = self.target()?;
        let request = Frame::new(mty::TERMINAL_INFO, nad, Bytes::new())?;
        let response = self.request(&request).await?;
        message::decode_terminal_info(&response, TerminalInfoForm::Standard)
    }

    /// Sends opaque data and copies the response into the caller's buffer,
    /// returning the response length.
    pub async fn send_and_receive(
        &mut self,
        request: &[u8],
        response: &mut [u8],
    ) -> Result<usize, JrcpError> {
        let payload = self.send_apdu(request).await?;
        if response.len() < payload.len() {
            return Err(JrcpError::InsufficientBuffer {
                needed: payload.len(),
                available: response.len(),
            });
        }
        response[..payload.len()].copy_from_slice(&payload);
        Ok(payload.len())
    }

    /// Sends an APDU to the selected node and returns the response payload.
    pub async fn send_apdu(&mut self, apdu: &[u8]) -> Result<Bytes, JrcpError> {
        let nad = self.target()?;
        let request = Frame::new(mty::SEND_DATA, nad, Bytes::copy_from_slice(apdu))?;
        let response = self.request(&request).await?;
        Ok(response.payload().clone())
    }

    /// Resets the card and stores the fresh ATR.
    pub async fn reset(&mut self, kind: ResetKind) -> Result<Bytes, JrcpError> {
        let nad = self.target()?;
        let request = Frame::new(kind.mty(), nad, Bytes::new())?;
        let response = self.request(&request).await?;
        let atr = response.payload().clone();
        self.current_atr = Some(atr.clone());
        Ok(atr)
    }

    /// Arms a tearing event: the card will be torn on the n-th subsequent
    /// command.
    pub async fn prepare_reset(&mut self, kind: ResetKind, count: u32) -> Result<(), JrcpError> {
        let nad = self.target()?;
        let mut payload = BytesMut::with_capacity(5);
        payload.put_u8(kind.code());
        payload.put_u32(count);
        let request = Frame::new(mty::PREPARE_TEARING, nad, payload.freeze())?;
        let response = self.request(&request).await?;
        StatusReport::from_frame(&response)?.into_result()
    }

    /// Sends a text echo through the data channel and verifies it comes
    /// back unchanged.
    pub async fn echo(&mut self, text: &str) -> Result<String, JrcpError> {
        let payload = self.send_apdu(text.as_bytes()).await?;
        if payload.as_ref() == text.as_bytes() {
            Ok(text.to_string())
        } else {
            Err(JrcpError::CommandExecutionFailed(
                GenericStatus::GENERAL_ERROR,
            ))
        }
    }

    /// Drives an I/O pin on the selected node.
    pub async fn set_io_pin(&mut self, pin: u8, high: bool) -> Result<(), JrcpError> {
        let nad = self.target()?;
        let request = Frame::new(
            mty::SET_IO_PIN,
            nad,
            Bytes::copy_from_slice(&[pin, high as u8]),
        )?;
        let response = self.request(&request).await?;
        if response.payload().as_ref() == [pin, high as u8] {
            Ok(())
        } else {
            Err(JrcpError::MalformedMessage("unexpected io-pin response"))
        }
    }

    /// Queries the timing options the selected node supports.
    pub async fn timing_options(&mut self) -> Result<Vec<u8>, JrcpError> {
        let nad = self.target()?;
        let request = Frame::new(mty::TIMING_INFO, nad, Bytes::from_static(&[0x01]))?;
        let response = self.request(&request).await?;
        Ok(response.payload().to_vec())
    }

    /// Selects a timing option on the node.
    pub async fn set_timing_option(&mut self, option: u8) -> Result<(), JrcpError> {
        let nad = self.target()?;
        let request = Frame::new(mty::TIMING_INFO, nad, Bytes::copy_from_slice(&[0x02, option]))?;
        match self.request(&request).await {
            Ok(response) => StatusReport::from_frame(&response)?.into_result(),
            Err(JrcpError::CommandExecutionFailed(status))
                if status == GenericStatus::TIMING_OPTION_UNSUPPORTED =>
            {
                Err(JrcpError::TimingOptionUnsupported(option))
            }
            Err(err) => Err(err),
        }
    }

    fn target(&self) -> Result<u8, JrcpError> {
        self.current_nad.ok_or(JrcpError::NoActiveConnection)
    }

    /// Sends a request and surfaces remote failures.
    ///
    /// Error frames come back with the ServerStatus message type; any
    /// response of that type to a request of a different type is decoded
    /// as a status report and turned into the matching error.
    async fn request(&self, request: &Frame) -> Result<Frame, JrcpError> {
        let response = self.conn.transceive(request).await?;
        if response.mty() == mty::SERVER_STATUS && request.mty() != mty::SERVER_STATUS {
            StatusReport::from_frame(&response)?.into_result()?;
        }
        Ok(response)
    }
}
