//! Construction of outbound request envelopes.
//!
//! Every builder call stamps a fresh UUID v4 correlation id. The builder holds no
//! state and can be shared freely across threads.

use serde_json::Value;
use uuid::Uuid;

use crate::channel::{private_channel_name, validate_channel_name};
use crate::codec::ProtocolError;
use crate::credentials::Credentials;
use crate::envelope::{Command, OutboundEnvelope, Subscription};

/// Generate a new correlation id.
#[must_use]
pub fn generate_uid() -> String {
    Uuid::new_v4().to_string()
}

/// Builds outbound envelopes, one method per protocol request.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageBuilder;

impl MessageBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Build the connect handshake.
    #[must_use]
    pub fn connect(&self, credentials: &Credentials) -> OutboundEnvelope {
        build(Command::Connect {
            user: credentials.user().to_string(),
            timestamp: credentials.timestamp().to_string(),
            token: credentials.token().to_string(),
            info: credentials.info().map(str::to_string),
        })
    }

    #[must_use]
    pub fn disconnect(&self) -> OutboundEnvelope {
        build(Command::Disconnect)
    }

    #[must_use]
    pub fn ping(&self) -> OutboundEnvelope {
        build(Command::Ping)
    }

    /// Subscribe to a public channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel name is invalid.
    pub fn subscribe(&self, channel: &str) -> Result<OutboundEnvelope, ProtocolError> {
        let channel = checked(channel)?;
        Ok(build(Command::Subscribe(Subscription::Public { channel })))
    }

    /// Subscribe to a private channel.
    ///
    /// The channel name gets the private prefix if it lacks one, and `info` is
    /// sent in its serialized string form.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel name is invalid.
    pub fn subscribe_private(
        &self,
        channel: &str,
        client: &str,
        sign: &str,
        info: &Value,
    ) -> Result<OutboundEnvelope, ProtocolError> {
        let channel = checked(&private_channel_name(channel))?;
        Ok(build(Command::Subscribe(Subscription::Private {
            channel,
            client: client.to_string(),
            sign: sign.to_string(),
            info: info.to_string(),
        })))
    }

    /// Subscribe asking the server to recover publications after `last`.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel name is invalid.
    pub fn subscribe_recover(
        &self,
        channel: &str,
        last: &str,
    ) -> Result<OutboundEnvelope, ProtocolError> {
        let channel = checked(channel)?;
        Ok(build(Command::Subscribe(Subscription::Recover {
            channel,
            last: last.to_string(),
        })))
    }

    /// # Errors
    ///
    /// Returns an error if the channel name is invalid.
    pub fn unsubscribe(&self, channel: &str) -> Result<OutboundEnvelope, ProtocolError> {
        let channel = checked(channel)?;
        Ok(build(Command::Unsubscribe { channel }))
    }

    /// # Errors
    ///
    /// Returns an error if the channel name is invalid.
    pub fn publish(&self, channel: &str, data: Value) -> Result<OutboundEnvelope, ProtocolError> {
        let channel = checked(channel)?;
        Ok(build(Command::Publish { channel, data }))
    }

    /// # Errors
    ///
    /// Returns an error if the channel name is invalid.
    pub fn presence(&self, channel: &str) -> Result<OutboundEnvelope, ProtocolError> {
        let channel = checked(channel)?;
        Ok(build(Command::Presence { channel }))
    }

    /// # Errors
    ///
    /// Returns an error if the channel name is invalid.
    pub fn history(&self, channel: &str) -> Result<OutboundEnvelope, ProtocolError> {
        let channel = checked(channel)?;
        Ok(build(Command::History { channel }))
    }
}

fn build(command: Command) -> OutboundEnvelope {
    OutboundEnvelope::new(generate_uid(), command)
}

fn checked(channel: &str) -> Result<String, ProtocolError> {
    validate_channel_name(channel).map_err(ProtocolError::InvalidChannel)?;
    Ok(channel.to_string())
}
