//! Envelope types for the Centrifuge client protocol.
//!
//! Outbound envelopes carry a typed [`Command`]; the parameter object seen on the
//! wire is produced only when the envelope is serialized. Inbound envelopes are
//! either replies (they carry the `uid` of a request) or server pushes.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Protocol method names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Connect,
    Disconnect,
    Subscribe,
    Unsubscribe,
    Publish,
    Presence,
    History,
    Ping,
    /// Publication pushed into a channel.
    Message,
    /// A client joined a channel.
    Join,
    /// A client left a channel.
    Leave,
    /// Server asks the client to refresh its credentials.
    Refresh,
    /// Any method name this client does not understand.
    #[serde(other)]
    Unknown,
}

impl Method {
    /// Wire name of the method.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Connect => "connect",
            Method::Disconnect => "disconnect",
            Method::Subscribe => "subscribe",
            Method::Unsubscribe => "unsubscribe",
            Method::Publish => "publish",
            Method::Presence => "presence",
            Method::History => "history",
            Method::Ping => "ping",
            Method::Message => "message",
            Method::Join => "join",
            Method::Leave => "leave",
            Method::Refresh => "refresh",
            Method::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a subscribe request.
#[derive(Debug, Clone, PartialEq)]
pub enum Subscription {
    /// Plain public channel.
    Public {
        channel: String,
    },
    /// Access-controlled channel, authorized by a backend signature.
    Private {
        channel: String,
        /// `client` field from the connect reply.
        client: String,
        /// Signature issued by the application backend.
        sign: String,
        /// Pre-serialized JSON payload.
        info: String,
    },
    /// Resubscribe asking the server to replay publications missed since `last`.
    Recover {
        channel: String,
        last: String,
    },
}

impl Subscription {
    /// Channel this subscription targets.
    #[must_use]
    pub fn channel(&self) -> &str {
        match self {
            Subscription::Public { channel }
            | Subscription::Private { channel, .. }
            | Subscription::Recover { channel, .. } => channel,
        }
    }
}

/// A request the client can send, with its method-specific parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect {
        user: String,
        timestamp: String,
        token: String,
        info: Option<String>,
    },
    Disconnect,
    Subscribe(Subscription),
    Unsubscribe {
        channel: String,
    },
    Publish {
        channel: String,
        data: Value,
    },
    Presence {
        channel: String,
    },
    History {
        channel: String,
    },
    Ping,
}

impl Command {
    /// Get the protocol method of this command.
    #[must_use]
    pub fn method(&self) -> Method {
        match self {
            Command::Connect { .. } => Method::Connect,
            Command::Disconnect => Method::Disconnect,
            Command::Subscribe(_) => Method::Subscribe,
            Command::Unsubscribe { .. } => Method::Unsubscribe,
            Command::Publish { .. } => Method::Publish,
            Command::Presence { .. } => Method::Presence,
            Command::History { .. } => Method::History,
            Command::Ping => Method::Ping,
        }
    }

    /// Channel the command is scoped to, if any.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        match self {
            Command::Subscribe(sub) => Some(sub.channel()),
            Command::Unsubscribe { channel }
            | Command::Publish { channel, .. }
            | Command::Presence { channel }
            | Command::History { channel } => Some(channel),
            Command::Connect { .. } | Command::Disconnect | Command::Ping => None,
        }
    }

    /// Flatten the parameters into the generic key-value wire form.
    #[must_use]
    pub fn to_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        let mut put = |key: &str, value: Value| {
            params.insert(key.to_string(), value);
        };

        match self {
            Command::Connect {
                user,
                timestamp,
                token,
                info,
            } => {
                put("user", user.as_str().into());
                put("timestamp", timestamp.as_str().into());
                put("token", token.as_str().into());
                if let Some(info) = info {
                    put("info", info.as_str().into());
                }
            }
            Command::Subscribe(Subscription::Public { channel })
            | Command::Unsubscribe { channel }
            | Command::Presence { channel }
            | Command::History { channel } => {
                put("channel", channel.as_str().into());
            }
            Command::Subscribe(Subscription::Private {
                channel,
                client,
                sign,
                info,
            }) => {
                put("channel", channel.as_str().into());
                put("client", client.as_str().into());
                put("sign", sign.as_str().into());
                put("info", info.as_str().into());
            }
            Command::Subscribe(Subscription::Recover { channel, last }) => {
                put("channel", channel.as_str().into());
                put("recover", Value::Bool(true));
                put("last", last.as_str().into());
            }
            Command::Publish { channel, data } => {
                put("channel", channel.as_str().into());
                put("data", data.clone());
            }
            Command::Disconnect | Command::Ping => {}
        }

        params
    }
}

/// A request ready to be encoded and sent.
///
/// Immutable once built; the `uid` correlates the eventual reply.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEnvelope {
    uid: String,
    command: Command,
}

impl OutboundEnvelope {
    /// Create an envelope from a correlation id and a command.
    #[must_use]
    pub fn new(uid: impl Into<String>, command: Command) -> Self {
        Self {
            uid: uid.into(),
            command,
        }
    }

    /// Correlation id.
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Protocol method.
    #[must_use]
    pub fn method(&self) -> Method {
        self.command.method()
    }

    /// Typed parameters.
    #[must_use]
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Channel the request is scoped to, if any.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.command.channel()
    }
}

impl Serialize for OutboundEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("OutboundEnvelope", 3)?;
        state.serialize_field("uid", &self.uid)?;
        state.serialize_field("method", &self.method())?;
        state.serialize_field("params", &self.command.to_params())?;
        state.end()
    }
}

/// A reply or push received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    /// Correlation id, present only on replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Protocol method.
    pub method: Method,
    /// Error text reported by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Method-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl InboundEnvelope {
    /// Create a push envelope (no correlation id).
    #[must_use]
    pub fn push(method: Method, body: Value) -> Self {
        Self {
            uid: None,
            method,
            error: None,
            body: Some(body),
        }
    }

    /// Create a successful reply to the request `uid`.
    #[must_use]
    pub fn reply(uid: impl Into<String>, method: Method, body: Option<Value>) -> Self {
        Self {
            uid: Some(uid.into()),
            method,
            error: None,
            body,
        }
    }

    /// Attach a server error.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Whether this envelope answers a request.
    #[must_use]
    pub fn is_reply(&self) -> bool {
        self.uid.is_some()
    }

    /// Server error text. An empty string counts as no error.
    #[must_use]
    pub fn server_error(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }

    /// Look up a field of the body object.
    #[must_use]
    pub fn body_field(&self, name: &str) -> Option<&Value> {
        self.body.as_ref()?.get(name)
    }

    /// Channel named in the body, if any.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.body_field("channel")?.as_str()
    }
}
