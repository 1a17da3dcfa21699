//! Transport abstraction traits for the Centrifuge client.
//!
//! The engine drives a [`Transport`] through three calls and learns about the
//! stream through [`TransportEvent`]s delivered back to it on the same task.

use bytes::Bytes;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The transport is already open.
    #[error("Transport already open")]
    AlreadyOpen,

    /// Could not establish the stream.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Inbound message exceeded the configured limit.
    #[error("Message of {size} bytes exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// A notification from the transport to the engine.
#[derive(Debug)]
pub enum TransportEvent {
    /// The stream is established.
    Open,
    /// The stream ended, with the cause if it was not a clean close.
    Close(Option<TransportError>),
    /// A text frame arrived.
    Text(String),
    /// A binary frame arrived.
    Binary(Bytes),
}

impl TransportEvent {
    /// Frame payload, treating text and binary alike.
    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            TransportEvent::Text(text) => Some(text.as_bytes()),
            TransportEvent::Binary(data) => Some(data),
            TransportEvent::Open | TransportEvent::Close(_) => None,
        }
    }
}

/// A client-side stream to the server.
///
/// Calls never block; completion of `open` and `close` is reported later as
/// [`TransportEvent::Open`] and [`TransportEvent::Close`].
pub trait Transport: Send {
    /// Start establishing the stream.
    fn open(&mut self) -> Result<(), TransportError>;

    /// Request teardown of the stream.
    fn close(&mut self);

    /// Queue an encoded frame for sending.
    fn send(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Get the transport name (e.g., "websocket").
    fn name(&self) -> &'static str;
}
