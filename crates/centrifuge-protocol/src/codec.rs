//! JSON codec for Centrifuge envelopes.
//!
//! Outbound envelopes encode to a single JSON object. An inbound frame holds
//! either one envelope object or an array of them.

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use crate::envelope::{InboundEnvelope, OutboundEnvelope};

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur while building, encoding or decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),

    /// One item of a batch frame is not an envelope.
    #[error("Invalid envelope at index {index}: {source}")]
    InvalidItem {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    /// Channel name rejected by validation.
    #[error("Invalid channel name: {0}")]
    InvalidChannel(&'static str),

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Encode an envelope to bytes.
///
/// # Errors
///
/// Returns an error if the envelope is too large or encoding fails.
pub fn encode(envelope: &OutboundEnvelope) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(envelope).map_err(ProtocolError::Encode)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    Ok(Bytes::from(payload))
}

/// A decoded inbound frame.
///
/// Items of a batch that are not valid envelopes are collected in `rejected`
/// and do not prevent the rest of the batch from decoding.
#[derive(Debug, Default)]
pub struct DecodedFrame {
    /// Envelopes in frame order.
    pub envelopes: Vec<InboundEnvelope>,
    /// One [`ProtocolError::InvalidItem`] per rejected batch item.
    pub rejected: Vec<ProtocolError>,
}

/// Decode a raw frame, keeping the valid items of a partially bad batch.
///
/// # Errors
///
/// Returns an error if the frame is too large, not JSON, a single object that
/// is not an envelope, or neither an object nor an array.
pub fn decode_frame(data: &[u8]) -> Result<DecodedFrame, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(DecodedFrame::default());
    }

    let value: Value = serde_json::from_slice(data).map_err(ProtocolError::Decode)?;

    match value {
        Value::Array(items) => {
            let mut frame = DecodedFrame::default();
            for (index, item) in items.into_iter().enumerate() {
                match serde_json::from_value(item) {
                    Ok(envelope) => frame.envelopes.push(envelope),
                    Err(source) => frame
                        .rejected
                        .push(ProtocolError::InvalidItem { index, source }),
                }
            }
            Ok(frame)
        }
        Value::Object(_) => {
            let envelope = serde_json::from_value(value).map_err(ProtocolError::Decode)?;
            Ok(DecodedFrame {
                envelopes: vec![envelope],
                rejected: Vec::new(),
            })
        }
        other => Err(ProtocolError::Invalid(format!(
            "expected envelope object or array, got {other}"
        ))),
    }
}

/// Decode a raw frame into zero or more envelopes, preserving order.
///
/// # Errors
///
/// Returns an error if the frame is too large, not JSON, or not an
/// envelope object or array of envelope objects.
pub fn decode(data: &[u8]) -> Result<Vec<InboundEnvelope>, ProtocolError> {
    let mut frame = decode_frame(data)?;
    if frame.rejected.is_empty() {
        Ok(frame.envelopes)
    } else {
        Err(frame.rejected.swap_remove(0))
    }
}

/// Envelope codec handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    /// Create a new codec instance.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, envelope: &OutboundEnvelope) -> Result<Bytes, ProtocolError> {
        encode(envelope)
    }

    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode(&self, data: &[u8]) -> Result<Vec<InboundEnvelope>, ProtocolError> {
        decode(data)
    }

    /// # Errors
    ///
    /// Returns an error if the frame as a whole cannot be decoded.
    pub fn decode_frame(&self, data: &[u8]) -> Result<DecodedFrame, ProtocolError> {
        decode_frame(data)
    }
}
