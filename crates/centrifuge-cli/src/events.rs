//! Delegates that log pushed events and forward what the main loop acts on.

use centrifuge_core::{ChannelDelegate, ClientDelegate, ClientError, InboundEnvelope, Method, Reply};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

/// Work for the main loop, produced by completions and delegates.
#[derive(Debug)]
pub enum AppEvent {
    /// The connect handshake finished.
    Connected(Reply),
    /// A request other than connect finished.
    Completed {
        method: Method,
        channel: String,
        reply: Reply,
    },
    /// The session ended without the user asking for it.
    Disconnected(ClientError),
}

/// Completion that forwards the reply of `method` on `channel`.
pub fn forward(
    events: &UnboundedSender<AppEvent>,
    method: Method,
    channel: &str,
) -> impl FnOnce(Reply) + Send + 'static {
    let events = events.clone();
    let channel = channel.to_string();
    move |reply| {
        let _ = events.send(AppEvent::Completed {
            method,
            channel,
            reply,
        });
    }
}

/// Connection-level delegate.
pub struct SessionLogger {
    events: UnboundedSender<AppEvent>,
}

impl SessionLogger {
    pub fn new(events: UnboundedSender<AppEvent>) -> Self {
        Self { events }
    }
}

impl ClientDelegate for SessionLogger {
    fn on_refresh(&self, message: &InboundEnvelope) {
        warn!(body = ?message.body, "Server requested a credentials refresh");
    }

    fn on_disconnect(&self, error: ClientError) {
        let _ = self.events.send(AppEvent::Disconnected(error));
    }
}

/// Logs every event of the channels it is registered for.
pub struct ChannelLogger;

impl ChannelDelegate for ChannelLogger {
    fn on_message(&self, channel: &str, message: &InboundEnvelope) {
        let data = message.body_field("data").unwrap_or(&Value::Null);
        info!(channel = %channel, data = %data, "Message");
    }

    fn on_join(&self, channel: &str, message: &InboundEnvelope) {
        info!(channel = %channel, info = ?message.body_field("data"), "Join");
    }

    fn on_leave(&self, channel: &str, message: &InboundEnvelope) {
        info!(channel = %channel, info = ?message.body_field("data"), "Leave");
    }

    fn on_unsubscribe(&self, channel: &str, _message: &InboundEnvelope) {
        info!(channel = %channel, "Unsubscribed");
    }
}
