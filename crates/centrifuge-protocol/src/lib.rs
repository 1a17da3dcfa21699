//! # centrifuge-protocol
//!
//! Wire protocol definitions for the Centrifuge realtime messaging client.
//!
//! This crate defines the JSON envelopes exchanged with the server, the
//! builder that stamps requests with correlation ids, and the codec.
//!
//! ## Envelopes
//!
//! - `OutboundEnvelope` - a request: `uid`, `method`, typed parameters
//! - `InboundEnvelope` - a reply (carries `uid`) or a server push
//!
//! ## Example
//!
//! ```rust
//! use centrifuge_protocol::{codec, MessageBuilder};
//!
//! let envelope = MessageBuilder::new().subscribe("news").unwrap();
//! let bytes = codec::encode(&envelope).unwrap();
//!
//! let replies = codec::decode(br#"{"uid":"1","method":"subscribe","body":{}}"#).unwrap();
//! assert_eq!(replies.len(), 1);
//! # let _ = bytes;
//! ```

pub mod builder;
pub mod channel;
pub mod codec;
pub mod credentials;
pub mod envelope;

pub use builder::{generate_uid, MessageBuilder};
pub use channel::{
    is_private_channel, private_channel_name, validate_channel_name, PRIVATE_CHANNEL_PREFIX,
};
pub use codec::{decode, decode_frame, encode, DecodedFrame, EnvelopeCodec, ProtocolError};
pub use credentials::Credentials;
pub use envelope::{Command, InboundEnvelope, Method, OutboundEnvelope, Subscription};
