//! Delegate traits for server-pushed events.
//!
//! The client keeps only weak references to delegates; callers own them and
//! must keep them alive for as long as they want notifications.

use centrifuge_protocol::InboundEnvelope;

use crate::error::ClientError;

/// Connection-level notifications.
pub trait ClientDelegate: Send + Sync {
    /// The server asked the client to refresh its credentials.
    fn on_refresh(&self, message: &InboundEnvelope);

    /// The session ended without the caller asking for it.
    fn on_disconnect(&self, error: ClientError);
}

/// Notifications for one subscribed channel.
pub trait ChannelDelegate: Send + Sync {
    /// A publication arrived.
    fn on_message(&self, channel: &str, message: &InboundEnvelope);

    fn on_join(&self, _channel: &str, _message: &InboundEnvelope) {}

    fn on_leave(&self, _channel: &str, _message: &InboundEnvelope) {}

    /// The subscription ended. No further events follow for this channel.
    fn on_unsubscribe(&self, _channel: &str, _message: &InboundEnvelope) {}
}
