//! # centrifuge-core
//!
//! The protocol engine of the Centrifuge client.
//!
//! - **Client** - Connection state machine, request correlation and routing
//! - **Delegates** - Callbacks for pushed events, held weakly
//! - **Signer** - HMAC-SHA256 connection tokens
//! - **Metrics** - Counters and gauges through the `metrics` facade
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  events   ┌─────────────┐  replies  ┌─────────────┐
//! │  Transport  │──────────▶│   Client    │──────────▶│ Completions │
//! └─────────────┘           └─────────────┘           └─────────────┘
//!        ▲                     │       │
//!        └──── frames ─────────┘       │ pushes
//!                                      ▼
//!                              ┌───────────────┐
//!                              │   Delegates   │
//!                              └───────────────┘
//! ```
//!
//! The engine is single-threaded: the owner feeds transport events into
//! [`Client::handle_event`] from the same task that issues requests.

pub mod client;
pub mod delegate;
pub mod error;
pub mod metrics;
mod pending;
mod registry;
pub mod signer;

pub use client::{Client, ConnectionState};
pub use delegate::{ChannelDelegate, ClientDelegate};
pub use error::{ClientError, ErrorKind, Violation};
pub use pending::{Completion, Reply};
pub use signer::{channel_sign, connection_token, sign, signed_credentials};

pub use centrifuge_protocol::{Credentials, InboundEnvelope, Method};
