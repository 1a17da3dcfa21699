//! # centrifuge-transport
//!
//! Transport abstraction layer for the Centrifuge client.
//!
//! The client engine only needs a stream it can open, close and write frames
//! to, plus a feed of notifications about that stream. This crate defines that
//! contract and ships a WebSocket implementation behind the `websocket` feature.
//!
//! ```rust,ignore
//! use centrifuge_transport::{Transport, TransportEvent, WebSocketConfig, WebSocketTransport};
//!
//! let (mut transport, mut events) = WebSocketTransport::new(WebSocketConfig::new(url));
//! transport.open()?;
//! while let Some(event) = events.recv().await {
//!     // Hand the event to the engine
//! }
//! ```

pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Transport, TransportError, TransportEvent};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketEvents, WebSocketTransport};
