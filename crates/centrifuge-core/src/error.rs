//! Error types for the client engine.

use centrifuge_protocol::{Method, ProtocolError};
use centrifuge_transport::TransportError;
use thiserror::Error;

/// Errors delivered to completions and delegates.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport failed or dropped the stream.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A request could not be built or encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server answered with an error.
    #[error("Server error on {method}: {message}")]
    Server { method: Method, message: String },

    /// The server closed the session.
    #[error("Disconnected by server: {reason}")]
    ServerDisconnect { reason: String, reconnect: bool },

    /// The stream closed without a reported cause.
    #[error("Unknown disconnect error")]
    UnknownDisconnect,

    /// The caller disconnected before the operation finished.
    #[error("Disconnected by client")]
    Disconnected,

    /// A request was issued outside the `Connected` state.
    #[error("Not connected")]
    NotConnected,

    /// `connect` was called while connecting or connected.
    #[error("Already connected")]
    AlreadyConnected,

    /// A correlation id collided with a pending request.
    #[error("Duplicate request id: {0}")]
    DuplicateUid(String),
}

/// Coarse classification of [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    Protocol,
    Server,
    Disconnect,
    State,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Server => "server",
            ErrorKind::Disconnect => "disconnect",
            ErrorKind::State => "state",
        }
    }
}

impl ClientError {
    /// Get the error kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Transport(_) => ErrorKind::Transport,
            ClientError::Protocol(_) | ClientError::DuplicateUid(_) => ErrorKind::Protocol,
            ClientError::Server { .. } => ErrorKind::Server,
            ClientError::ServerDisconnect { .. }
            | ClientError::UnknownDisconnect
            | ClientError::Disconnected => ErrorKind::Disconnect,
            ClientError::NotConnected | ClientError::AlreadyConnected => ErrorKind::State,
        }
    }
}

/// Breach of the contract between server, transport and engine.
///
/// These are returned from the `handle_*` methods of the client and are never
/// delivered to completions.
#[derive(Debug, Error)]
pub enum Violation {
    /// A reply carried a `uid` with no pending request.
    #[error("Reply for untracked request {uid}")]
    UntrackedReply { uid: String },

    /// A channel event had no channel in its body.
    #[error("{method} event without a channel")]
    MissingChannel { method: Method },

    /// A channel event named a channel with no subscription.
    #[error("{method} event for unregistered channel {channel}")]
    UnknownChannel { method: Method, channel: String },

    /// An envelope this client cannot route.
    #[error("Unexpected {method} envelope")]
    UnexpectedEnvelope { method: Method },

    /// An inbound frame could not be decoded.
    #[error("Undecodable frame: {0}")]
    Decode(#[from] ProtocolError),
}
