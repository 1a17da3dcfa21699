//! The client engine.
//!
//! [`Client`] owns the connection state, the table of pending requests and the
//! channel subscriptions. It never spawns work and never locks: every public
//! method and every `handle_*` call must come from the same task, and
//! completions and delegates run synchronously inside those calls.
//!
//! ```text
//!   Disconnected ──connect()──▶ Connecting ──handshake ok──▶ Connected
//!        ▲                          │                            │
//!        └────── error / close ─────┴── disconnect / close / ────┘
//!                                       server disconnect
//! ```

use bytes::Bytes;
use centrifuge_protocol::{
    private_channel_name, Credentials, EnvelopeCodec, InboundEnvelope, MessageBuilder, Method,
    OutboundEnvelope, ProtocolError,
};
use centrifuge_transport::{Transport, TransportError, TransportEvent};
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, trace, warn};

use crate::delegate::{ChannelDelegate, ClientDelegate};
use crate::error::{ClientError, Violation};
use crate::metrics;
use crate::pending::{Completion, PendingRequest, PendingRequests, Reply};
use crate::registry::{Lookup, SubscriptionRegistry};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    /// Transport opening or handshake in flight.
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy)]
enum ChannelEvent {
    Message,
    Join,
    Leave,
    Unsubscribe,
}

/// Protocol engine for one logical stream.
pub struct Client<T: Transport> {
    credentials: Credentials,
    transport: T,
    builder: MessageBuilder,
    codec: EnvelopeCodec,
    delegate: Option<Weak<dyn ClientDelegate>>,
    state: ConnectionState,
    /// Completion of the in-flight `connect`, present only while connecting.
    handshake: Option<Completion>,
    /// Set once the connect envelope is sent; the next envelope decides the handshake.
    awaiting_handshake: bool,
    pending: PendingRequests,
    subscriptions: SubscriptionRegistry,
}

impl<T: Transport> Client<T> {
    /// Create a disconnected client.
    #[must_use]
    pub fn new(credentials: Credentials, transport: T) -> Self {
        Self {
            credentials,
            transport,
            builder: MessageBuilder::new(),
            codec: EnvelopeCodec::new(),
            delegate: None,
            state: ConnectionState::Disconnected,
            handshake: None,
            awaiting_handshake: false,
            pending: PendingRequests::default(),
            subscriptions: SubscriptionRegistry::default(),
        }
    }

    /// Set the connection-level delegate.
    #[must_use]
    pub fn with_delegate<D: ClientDelegate + 'static>(mut self, delegate: &Arc<D>) -> Self {
        self.set_delegate(delegate);
        self
    }

    /// Set the connection-level delegate. Only a weak reference is kept.
    pub fn set_delegate<D: ClientDelegate + 'static>(&mut self, delegate: &Arc<D>) {
        let delegate = Arc::downgrade(delegate);
        let delegate: Weak<dyn ClientDelegate> = delegate;
        self.delegate = Some(delegate);
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Number of requests awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Channels with a registered delegate, sorted.
    #[must_use]
    pub fn subscribed_channels(&self) -> Vec<String> {
        self.subscriptions.channels()
    }

    #[must_use]
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.contains(channel)
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Open the transport and perform the connect handshake.
    ///
    /// `completion` runs exactly once: with the connect reply, or with the
    /// transport or server error that ended the attempt.
    pub fn connect(&mut self, completion: impl FnOnce(Reply) + Send + 'static) {
        if self.state != ConnectionState::Disconnected {
            warn!(state = ?self.state, "connect called while not disconnected");
            completion(Err(ClientError::AlreadyConnected));
            return;
        }

        if let Err(e) = self.transport.open() {
            warn!(transport = self.transport.name(), error = %e, "Failed to open transport");
            completion(Err(e.into()));
            return;
        }

        info!(transport = self.transport.name(), "Connecting");
        self.state = ConnectionState::Connecting;
        self.handshake = Some(Box::new(completion));
        self.awaiting_handshake = false;
    }

    /// Tear down the session.
    ///
    /// Pending requests are abandoned without being completed. A connect still
    /// in flight completes with [`ClientError::Disconnected`].
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            debug!("disconnect called while already disconnected");
            return;
        }

        let handshake = self.handshake.take();
        self.reset();
        self.transport.close();
        metrics::record_disconnect("client");
        info!("Disconnected");

        if let Some(completion) = handshake {
            completion(Err(ClientError::Disconnected));
        }
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    pub fn ping(&mut self, completion: impl FnOnce(Reply) + Send + 'static) {
        let envelope = Ok(self.builder.ping());
        self.request(envelope, None, Box::new(completion));
    }

    /// Subscribe to a public channel.
    ///
    /// The delegate is registered right away, before the server acknowledges,
    /// so pushes that race the reply are still delivered.
    pub fn subscribe<D: ChannelDelegate + 'static>(
        &mut self,
        channel: &str,
        delegate: &Arc<D>,
        completion: impl FnOnce(Reply) + Send + 'static,
    ) {
        let envelope = self.builder.subscribe(channel);
        self.request(envelope, Some(downgrade(delegate)), Box::new(completion));
    }

    /// Subscribe to a private channel, adding the private prefix if missing.
    ///
    /// `client` is the `client` field of the connect reply and `sign` the
    /// signature issued by the application backend.
    pub fn subscribe_private<D: ChannelDelegate + 'static>(
        &mut self,
        channel: &str,
        client: &str,
        sign: &str,
        info: &Value,
        delegate: &Arc<D>,
        completion: impl FnOnce(Reply) + Send + 'static,
    ) {
        let channel = private_channel_name(channel);
        let envelope = self.builder.subscribe_private(&channel, client, sign, info);
        self.request(envelope, Some(downgrade(delegate)), Box::new(completion));
    }

    /// Subscribe asking the server to replay publications after `last`.
    pub fn subscribe_recover<D: ChannelDelegate + 'static>(
        &mut self,
        channel: &str,
        last: &str,
        delegate: &Arc<D>,
        completion: impl FnOnce(Reply) + Send + 'static,
    ) {
        let envelope = self.builder.subscribe_recover(channel, last);
        self.request(envelope, Some(downgrade(delegate)), Box::new(completion));
    }

    pub fn unsubscribe(&mut self, channel: &str, completion: impl FnOnce(Reply) + Send + 'static) {
        let envelope = self.builder.unsubscribe(channel);
        self.request(envelope, None, Box::new(completion));
    }

    pub fn publish(
        &mut self,
        channel: &str,
        data: Value,
        completion: impl FnOnce(Reply) + Send + 'static,
    ) {
        let envelope = self.builder.publish(channel, data);
        self.request(envelope, None, Box::new(completion));
    }

    pub fn presence(&mut self, channel: &str, completion: impl FnOnce(Reply) + Send + 'static) {
        let envelope = self.builder.presence(channel);
        self.request(envelope, None, Box::new(completion));
    }

    pub fn history(&mut self, channel: &str, completion: impl FnOnce(Reply) + Send + 'static) {
        let envelope = self.builder.history(channel);
        self.request(envelope, None, Box::new(completion));
    }

    fn request(
        &mut self,
        envelope: Result<OutboundEnvelope, ProtocolError>,
        delegate: Option<Weak<dyn ChannelDelegate>>,
        completion: Completion,
    ) {
        if self.state != ConnectionState::Connected {
            warn!(state = ?self.state, "Request issued while not connected");
            completion(Err(ClientError::NotConnected));
            return;
        }

        let envelope = match envelope {
            Ok(envelope) => envelope,
            Err(e) => {
                completion(Err(e.into()));
                return;
            }
        };

        let data = match self.codec.encode(&envelope) {
            Ok(data) => data,
            Err(e) => {
                error!(uid = %envelope.uid(), method = %envelope.method(), error = %e, "Failed to encode request");
                completion(Err(e.into()));
                return;
            }
        };

        let uid = envelope.uid().to_string();
        let method = envelope.method();
        let channel = envelope.channel().map(str::to_string);

        let registration = match (delegate, channel.as_deref()) {
            (Some(delegate), Some(channel)) => {
                debug!(channel = %channel, "Channel registered");
                Some(self.subscriptions.insert(channel, delegate))
            }
            _ => None,
        };

        let request = PendingRequest::new(method, channel, completion).with_registration(registration);
        if let Err(request) = self.pending.insert(uid.clone(), request) {
            error!(uid = %uid, "Correlation id already pending");
            let request = self.revert_registration(request);
            request.complete(Err(ClientError::DuplicateUid(uid)));
            return;
        }

        if let Err(e) = self.transport.send(data) {
            warn!(uid = %uid, method = %method, error = %e, "Failed to send request");
            if let Some(request) = self.pending.take(&uid) {
                let request = self.revert_registration(request);
                request.complete(Err(e.into()));
            }
            return;
        }

        metrics::record_request(method);
        metrics::set_pending(self.pending.len());
        metrics::set_subscriptions(self.subscriptions.len());
        trace!(uid = %uid, method = %method, "Request sent");
    }

    /// Undo the channel registration a failed request made, restoring any
    /// delegate it replaced.
    fn revert_registration(&mut self, mut request: PendingRequest) -> PendingRequest {
        if let (Some(registration), Some(channel)) =
            (request.registration.take(), request.channel.as_deref())
        {
            self.subscriptions.revert(channel, registration);
            debug!(channel = %channel, "Channel registration reverted");
        }
        request
    }

    // ------------------------------------------------------------------
    // Transport notifications
    // ------------------------------------------------------------------

    /// Feed one transport notification into the engine.
    ///
    /// # Errors
    ///
    /// Returns the first contract violation found in an inbound frame.
    pub fn handle_event(&mut self, event: TransportEvent) -> Result<(), Violation> {
        match event {
            TransportEvent::Open => {
                self.handle_open();
                Ok(())
            }
            TransportEvent::Close(error) => {
                self.handle_close(error);
                Ok(())
            }
            TransportEvent::Text(text) => self.handle_text(&text),
            TransportEvent::Binary(data) => self.handle_binary(&data),
        }
    }

    /// The transport is up: send the connect handshake.
    pub fn handle_open(&mut self) {
        if self.state != ConnectionState::Connecting || self.awaiting_handshake {
            warn!(state = ?self.state, "Ignoring unexpected transport open");
            return;
        }

        let envelope = self.builder.connect(&self.credentials);
        let sent = self
            .codec
            .encode(&envelope)
            .map_err(ClientError::from)
            .and_then(|data| self.send_raw(data).map_err(ClientError::from));

        match sent {
            Ok(()) => {
                debug!(uid = %envelope.uid(), "Handshake sent");
                self.awaiting_handshake = true;
            }
            Err(e) => {
                warn!(error = %e, "Failed to send handshake");
                let handshake = self.handshake.take();
                self.reset();
                self.transport.close();
                if let Some(completion) = handshake {
                    completion(Err(e));
                }
            }
        }
    }

    /// The transport closed, with its error if it reported one.
    pub fn handle_close(&mut self, error: Option<TransportError>) {
        let error = error.map_or(ClientError::UnknownDisconnect, ClientError::Transport);

        match self.state {
            ConnectionState::Disconnected => {
                debug!("Transport closed");
            }
            ConnectionState::Connecting => {
                warn!(error = %error, "Transport closed during connect");
                let handshake = self.handshake.take();
                self.reset();
                metrics::record_disconnect("transport");
                if let Some(completion) = handshake {
                    completion(Err(error));
                }
            }
            ConnectionState::Connected => {
                warn!(error = %error, "Transport closed");
                self.reset();
                metrics::record_disconnect("transport");
                self.notify_disconnect(error);
            }
        }
    }

    /// A text frame arrived.
    ///
    /// # Errors
    ///
    /// Returns the first contract violation found in the frame.
    pub fn handle_text(&mut self, text: &str) -> Result<(), Violation> {
        self.handle_frame(text.as_bytes())
    }

    /// A binary frame arrived.
    ///
    /// # Errors
    ///
    /// Returns the first contract violation found in the frame.
    pub fn handle_binary(&mut self, data: &[u8]) -> Result<(), Violation> {
        self.handle_frame(data)
    }

    fn handle_frame(&mut self, data: &[u8]) -> Result<(), Violation> {
        let frame = match self.codec.decode_frame(data) {
            Ok(frame) => frame,
            Err(e) => return Err(self.violation(Violation::Decode(e))),
        };

        let routed = self.route(frame.envelopes);
        let mut first_rejected = None;
        for e in frame.rejected {
            let violation = self.violation(Violation::Decode(e));
            first_rejected.get_or_insert(violation);
        }

        match (routed, first_rejected) {
            (Err(v), _) => Err(v),
            (Ok(()), Some(v)) => Err(v),
            (Ok(()), None) => Ok(()),
        }
    }

    fn send_raw(&mut self, data: Bytes) -> Result<(), TransportError> {
        self.transport.send(data)
    }

    // ------------------------------------------------------------------
    // Inbound routing
    // ------------------------------------------------------------------

    fn route(&mut self, envelopes: Vec<InboundEnvelope>) -> Result<(), Violation> {
        let mut envelopes = envelopes.into_iter();

        match self.state {
            ConnectionState::Disconnected => {
                if envelopes.len() > 0 {
                    warn!(count = envelopes.len(), "Dropping envelopes received while disconnected");
                }
                return Ok(());
            }
            ConnectionState::Connecting => {
                if !self.awaiting_handshake {
                    warn!(count = envelopes.len(), "Dropping envelopes received before handshake");
                    return Ok(());
                }
                let Some(first) = envelopes.next() else {
                    return Ok(());
                };
                if !self.finish_handshake(first) {
                    if envelopes.len() > 0 {
                        debug!(count = envelopes.len(), "Dropping envelopes batched with failed handshake");
                    }
                    return Ok(());
                }
            }
            ConnectionState::Connected => {}
        }

        let mut first_violation = None;
        for envelope in envelopes {
            if self.state != ConnectionState::Connected {
                debug!("Dropping envelopes after disconnect");
                break;
            }
            if let Err(v) = self.dispatch(envelope) {
                first_violation.get_or_insert(v);
            }
        }

        metrics::set_pending(self.pending.len());
        metrics::set_subscriptions(self.subscriptions.len());
        first_violation.map_or(Ok(()), Err)
    }

    /// Settle the connect attempt with the first post-open envelope.
    /// Returns whether the client is now connected.
    fn finish_handshake(&mut self, envelope: InboundEnvelope) -> bool {
        self.awaiting_handshake = false;
        let handshake = self.handshake.take();

        let reply = match envelope.server_error() {
            Some(message) => {
                let error = ClientError::Server {
                    method: envelope.method,
                    message: message.to_string(),
                };
                warn!(error = %error, "Handshake rejected");
                self.reset();
                self.transport.close();
                Err(error)
            }
            None => {
                info!("Connected");
                self.state = ConnectionState::Connected;
                Ok(envelope)
            }
        };

        let connected = reply.is_ok();
        if let Some(completion) = handshake {
            completion(reply);
        }
        connected
    }

    fn dispatch(&mut self, envelope: InboundEnvelope) -> Result<(), Violation> {
        let also_event = matches!(envelope.method, Method::Unsubscribe | Method::Disconnect);

        if let Some(uid) = envelope.uid.clone() {
            let Some(request) = self.pending.take(&uid) else {
                return Err(self.violation(Violation::UntrackedReply { uid }));
            };

            if let Some(message) = envelope.server_error() {
                metrics::record_reply(envelope.method, false);
                debug!(uid = %uid, method = %request.method, error = %message, "Request failed");
                let error = ClientError::Server {
                    method: envelope.method,
                    message: message.to_string(),
                };
                let request = self.revert_registration(request);
                request.complete(Err(error));
                return Ok(());
            }

            metrics::record_reply(envelope.method, true);
            trace!(uid = %uid, method = %request.method, "Reply received");
            if !also_event {
                request.complete(Ok(envelope));
                return Ok(());
            }
            request.complete(Ok(envelope.clone()));
        }

        self.dispatch_push(envelope)
    }

    fn dispatch_push(&mut self, envelope: InboundEnvelope) -> Result<(), Violation> {
        metrics::record_push(envelope.method);

        match envelope.method {
            Method::Message => self.dispatch_channel(ChannelEvent::Message, &envelope),
            Method::Join => self.dispatch_channel(ChannelEvent::Join, &envelope),
            Method::Leave => self.dispatch_channel(ChannelEvent::Leave, &envelope),
            Method::Unsubscribe => self.dispatch_channel(ChannelEvent::Unsubscribe, &envelope),
            Method::Disconnect => {
                self.handle_server_disconnect(&envelope);
                Ok(())
            }
            Method::Refresh => {
                match self.client_delegate() {
                    Some(delegate) => delegate.on_refresh(&envelope),
                    None => debug!("Refresh received without a delegate"),
                }
                Ok(())
            }
            method => Err(self.violation(Violation::UnexpectedEnvelope { method })),
        }
    }

    fn dispatch_channel(
        &mut self,
        event: ChannelEvent,
        envelope: &InboundEnvelope,
    ) -> Result<(), Violation> {
        let method = envelope.method;
        let Some(channel) = envelope.channel() else {
            return Err(self.violation(Violation::MissingChannel { method }));
        };

        let delegate = match self.subscriptions.lookup(channel) {
            Lookup::Live(delegate) => delegate,
            Lookup::Dropped => {
                warn!(channel = %channel, "Channel delegate dropped, removing subscription");
                self.subscriptions.remove(channel);
                return Ok(());
            }
            Lookup::Missing => {
                let channel = channel.to_string();
                return Err(self.violation(Violation::UnknownChannel { method, channel }));
            }
        };

        trace!(channel = %channel, method = %method, "Dispatching channel event");
        match event {
            ChannelEvent::Message => delegate.on_message(channel, envelope),
            ChannelEvent::Join => delegate.on_join(channel, envelope),
            ChannelEvent::Leave => delegate.on_leave(channel, envelope),
            ChannelEvent::Unsubscribe => {
                delegate.on_unsubscribe(channel, envelope);
                self.subscriptions.remove(channel);
                debug!(channel = %channel, "Unsubscribed");
            }
        }
        Ok(())
    }

    fn handle_server_disconnect(&mut self, envelope: &InboundEnvelope) {
        let error = server_disconnect_error(envelope);
        warn!(error = %error, "Disconnected by server");

        self.reset();
        self.transport.close();
        metrics::record_disconnect("server");
        self.notify_disconnect(error);
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Return to `Disconnected`, abandoning pending requests and subscriptions.
    fn reset(&mut self) {
        let abandoned = self.pending.clear();
        let channels = self.subscriptions.clear();
        self.handshake = None;
        self.awaiting_handshake = false;
        self.state = ConnectionState::Disconnected;

        metrics::set_pending(0);
        metrics::set_subscriptions(0);
        debug!(abandoned, channels, "Client state reset");
    }

    fn client_delegate(&self) -> Option<Arc<dyn ClientDelegate>> {
        self.delegate.as_ref()?.upgrade()
    }

    fn notify_disconnect(&self, error: ClientError) {
        match self.client_delegate() {
            Some(delegate) => delegate.on_disconnect(error),
            None => debug!(error = %error, "Disconnect without a delegate"),
        }
    }

    fn violation(&self, violation: Violation) -> Violation {
        error!(violation = %violation, "Protocol contract violation");
        metrics::record_violation();
        violation
    }
}

fn downgrade<D: ChannelDelegate + 'static>(delegate: &Arc<D>) -> Weak<dyn ChannelDelegate> {
    let delegate = Arc::downgrade(delegate);
    let delegate: Weak<dyn ChannelDelegate> = delegate;
    delegate
}

fn server_disconnect_error(envelope: &InboundEnvelope) -> ClientError {
    let reason = envelope
        .server_error()
        .or_else(|| envelope.body_field("reason").and_then(Value::as_str))
        .filter(|reason| !reason.is_empty())
        .unwrap_or("disconnected by server")
        .to_string();
    let reconnect = envelope
        .body_field("reconnect")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    ClientError::ServerDisconnect { reason, reconnect }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockTransport {
        opened: usize,
        closed: usize,
        sent: Vec<Bytes>,
        fail_open: bool,
        fail_send: bool,
    }

    impl MockTransport {
        fn last_sent(&self) -> Value {
            serde_json::from_slice(self.sent.last().unwrap()).unwrap()
        }

        fn last_uid(&self) -> String {
            self.last_sent()["uid"].as_str().unwrap().to_string()
        }
    }

    impl Transport for MockTransport {
        fn open(&mut self) -> Result<(), TransportError> {
            if self.fail_open {
                return Err(TransportError::ConnectFailed("refused".into()));
            }
            self.opened += 1;
            Ok(())
        }

        fn close(&mut self) {
            self.closed += 1;
        }

        fn send(&mut self, data: Bytes) -> Result<(), TransportError> {
            if self.fail_send {
                return Err(TransportError::SendFailed("broken pipe".into()));
            }
            self.sent.push(data);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "mock"
        }
    }

    type Calls = Arc<Mutex<Vec<Result<InboundEnvelope, String>>>>;

    fn calls() -> Calls {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn record(calls: &Calls) -> impl FnOnce(Reply) + Send + 'static {
        let calls = Arc::clone(calls);
        move |reply| calls.lock().unwrap().push(reply.map_err(|e| e.to_string()))
    }

    #[derive(Default)]
    struct ChannelRecorder {
        events: Mutex<Vec<(&'static str, String)>>,
    }

    impl ChannelRecorder {
        fn events(&self) -> Vec<(&'static str, String)> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ChannelDelegate for ChannelRecorder {
        fn on_message(&self, channel: &str, _message: &InboundEnvelope) {
            self.events.lock().unwrap().push(("message", channel.to_string()));
        }

        fn on_join(&self, channel: &str, _message: &InboundEnvelope) {
            self.events.lock().unwrap().push(("join", channel.to_string()));
        }

        fn on_leave(&self, channel: &str, _message: &InboundEnvelope) {
            self.events.lock().unwrap().push(("leave", channel.to_string()));
        }

        fn on_unsubscribe(&self, channel: &str, _message: &InboundEnvelope) {
            self.events.lock().unwrap().push(("unsubscribe", channel.to_string()));
        }
    }

    #[derive(Default)]
    struct ClientRecorder {
        refreshes: Mutex<usize>,
        disconnects: Mutex<Vec<ClientError>>,
    }

    impl ClientDelegate for ClientRecorder {
        fn on_refresh(&self, _message: &InboundEnvelope) {
            *self.refreshes.lock().unwrap() += 1;
        }

        fn on_disconnect(&self, error: ClientError) {
            self.disconnects.lock().unwrap().push(error);
        }
    }

    fn credentials() -> Credentials {
        Credentials::new("42", "1460000000", "token")
    }

    fn frame(value: Value) -> String {
        value.to_string()
    }

    fn connected_client() -> (Client<MockTransport>, Arc<ClientRecorder>) {
        let recorder = Arc::new(ClientRecorder::default());
        let mut client =
            Client::new(credentials(), MockTransport::default()).with_delegate(&recorder);

        let connect = calls();
        client.connect(record(&connect));
        client.handle_open();
        let uid = client.transport().last_uid();
        client
            .handle_text(&frame(json!({"uid": uid, "method": "connect", "body": {"client": "c-1"}})))
            .unwrap();

        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(connect.lock().unwrap().len(), 1);
        (client, recorder)
    }

    fn reply_to_last(client: &mut Client<MockTransport>, method: &str, body: Value) {
        let uid = client.transport().last_uid();
        client
            .handle_text(&frame(json!({"uid": uid, "method": method, "body": body})))
            .unwrap();
    }

    #[test]
    fn test_connect_success() {
        let mut client = Client::new(credentials().with_info("{}"), MockTransport::default());
        let connect = calls();

        client.connect(record(&connect));
        assert_eq!(client.state(), ConnectionState::Connecting);
        assert_eq!(client.transport().opened, 1);
        assert!(client.transport().sent.is_empty());

        client.handle_open();
        let sent = client.transport().last_sent();
        assert_eq!(sent["method"], "connect");
        assert_eq!(
            sent["params"],
            json!({"user": "42", "timestamp": "1460000000", "token": "token", "info": "{}"})
        );

        let uid = client.transport().last_uid();
        client
            .handle_text(&frame(json!({"uid": uid, "method": "connect", "body": {"client": "c-1"}})))
            .unwrap();

        assert_eq!(client.state(), ConnectionState::Connected);
        let connect = connect.lock().unwrap();
        assert_eq!(connect.len(), 1);
        let reply = connect[0].as_ref().unwrap();
        assert_eq!(reply.body_field("client"), Some(&json!("c-1")));
    }

    #[test]
    fn test_connect_rejected_by_server() {
        let mut client = Client::new(credentials(), MockTransport::default());
        let connect = calls();

        client.connect(record(&connect));
        client.handle_open();
        let uid = client.transport().last_uid();
        client
            .handle_text(&frame(json!({"uid": uid, "method": "connect", "error": "invalid token"})))
            .unwrap();

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.transport().closed, 1);
        let connect = connect.lock().unwrap();
        assert_eq!(connect.len(), 1);
        assert_eq!(
            connect[0].as_ref().unwrap_err(),
            "Server error on connect: invalid token"
        );
    }

    #[test]
    fn test_connect_transport_failure() {
        let mut client = Client::new(credentials(), MockTransport::default());
        let connect = calls();

        client.connect(record(&connect));
        client.handle_close(Some(TransportError::ConnectFailed("refused".into())));

        assert_eq!(client.state(), ConnectionState::Disconnected);
        let connect = connect.lock().unwrap();
        assert_eq!(connect.len(), 1);
        assert!(connect[0].as_ref().unwrap_err().contains("refused"));
    }

    #[test]
    fn test_connect_close_without_error() {
        let mut client = Client::new(credentials(), MockTransport::default());
        let connect = calls();

        client.connect(record(&connect));
        client.handle_open();
        client.handle_close(None);

        let connect = connect.lock().unwrap();
        assert_eq!(connect[0].as_ref().unwrap_err(), "Unknown disconnect error");
    }

    #[test]
    fn test_connect_open_failure() {
        let transport = MockTransport {
            fail_open: true,
            ..MockTransport::default()
        };
        let mut client = Client::new(credentials(), transport);
        let connect = calls();

        client.connect(record(&connect));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(connect.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_connect_twice_is_rejected() {
        let (mut client, _recorder) = connected_client();
        let second = calls();

        client.connect(record(&second));

        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.transport().opened, 1);
        assert_eq!(second.lock().unwrap()[0].as_ref().unwrap_err(), "Already connected");
    }

    #[test]
    fn test_handshake_batch_routes_remaining_envelopes() {
        let mut client = Client::new(credentials(), MockTransport::default());
        let connect = calls();
        let recorder = Arc::new(ClientRecorder::default());
        client.set_delegate(&recorder);

        client.connect(record(&connect));
        client.handle_open();
        let uid = client.transport().last_uid();
        client
            .handle_text(&frame(json!([
                {"uid": uid, "method": "connect", "body": {}},
                {"method": "refresh", "body": {}}
            ])))
            .unwrap();

        assert!(client.is_connected());
        assert_eq!(*recorder.refreshes.lock().unwrap(), 1);
    }

    #[test]
    fn test_frames_before_handshake_are_ignored() {
        let mut client = Client::new(credentials(), MockTransport::default());
        let connect = calls();

        client.connect(record(&connect));
        client
            .handle_text(&frame(json!({"method": "refresh", "body": {}})))
            .unwrap();

        assert_eq!(client.state(), ConnectionState::Connecting);
        assert!(connect.lock().unwrap().is_empty());
    }

    #[test]
    fn test_subscribe_registers_before_ack() {
        let (mut client, _recorder) = connected_client();
        let channel = Arc::new(ChannelRecorder::default());
        let subscribe = calls();

        client.subscribe("room42", &channel, record(&subscribe));

        let sent = client.transport().last_sent();
        assert_eq!(sent["method"], "subscribe");
        assert_eq!(sent["params"], json!({"channel": "room42"}));
        assert!(client.is_subscribed("room42"));
        assert_eq!(client.pending_count(), 1);

        client
            .handle_text(&frame(json!({"method": "message", "body": {"channel": "room42", "data": {"text": "hi"}}})))
            .unwrap();

        assert_eq!(channel.events(), vec![("message", "room42".to_string())]);
        assert!(subscribe.lock().unwrap().is_empty());

        reply_to_last(&mut client, "subscribe", json!({"channel": "room42"}));
        assert_eq!(subscribe.lock().unwrap().len(), 1);
        assert!(subscribe.lock().unwrap()[0].is_ok());
        assert_eq!(client.pending_count(), 0);
    }

    #[test]
    fn test_channel_events_in_batch_order() {
        let (mut client, _recorder) = connected_client();
        let channel = Arc::new(ChannelRecorder::default());
        client.subscribe("room", &channel, |_| {});

        client
            .handle_text(&frame(json!([
                {"method": "join", "body": {"channel": "room"}},
                {"method": "message", "body": {"channel": "room"}},
                {"method": "leave", "body": {"channel": "room"}}
            ])))
            .unwrap();

        let kinds: Vec<&str> = channel.events().into_iter().map(|(kind, _)| kind).collect();
        assert_eq!(kinds, vec!["join", "message", "leave"]);
    }

    #[test]
    fn test_private_subscribe_normalizes_name() {
        let (mut client, _recorder) = connected_client();
        let channel = Arc::new(ChannelRecorder::default());

        client.subscribe_private("x", "c-1", "sig", &json!({"k": "v"}), &channel, |_| {});
        let sent = client.transport().last_sent();
        assert_eq!(sent["params"]["channel"], "$x");
        assert_eq!(sent["params"]["info"], "{\"k\":\"v\"}");
        assert!(client.is_subscribed("$x"));

        client.subscribe_private("$x", "c-1", "sig", &json!({}), &channel, |_| {});
        assert_eq!(client.transport().last_sent()["params"]["channel"], "$x");
        assert_eq!(client.subscribed_channels(), vec!["$x".to_string()]);
    }

    #[test]
    fn test_subscribe_recover_params() {
        let (mut client, _recorder) = connected_client();
        let channel = Arc::new(ChannelRecorder::default());

        client.subscribe_recover("news", "msg-17", &channel, |_| {});
        assert_eq!(
            client.transport().last_sent()["params"],
            json!({"channel": "news", "recover": true, "last": "msg-17"})
        );
        assert!(client.is_subscribed("news"));
    }

    #[test]
    fn test_subscribe_error_unregisters_channel() {
        let (mut client, _recorder) = connected_client();
        let channel = Arc::new(ChannelRecorder::default());
        let subscribe = calls();

        client.subscribe("closed", &channel, record(&subscribe));
        let uid = client.transport().last_uid();
        client
            .handle_text(&frame(json!({"uid": uid, "method": "subscribe", "error": "permission denied"})))
            .unwrap();

        assert!(!client.is_subscribed("closed"));
        assert_eq!(
            subscribe.lock().unwrap()[0].as_ref().unwrap_err(),
            "Server error on subscribe: permission denied"
        );
    }

    #[test]
    fn test_rejected_resubscribe_keeps_live_subscription() {
        let (mut client, _recorder) = connected_client();
        let channel = Arc::new(ChannelRecorder::default());
        client.subscribe("room", &channel, |_| {});
        reply_to_last(&mut client, "subscribe", json!({"channel": "room"}));

        let again = calls();
        client.subscribe("room", &channel, record(&again));
        let uid = client.transport().last_uid();
        client
            .handle_text(&frame(json!({"uid": uid, "method": "subscribe", "error": "already subscribed"})))
            .unwrap();

        assert!(again.lock().unwrap()[0].is_err());
        assert!(client.is_subscribed("room"));
        client
            .handle_text(&frame(json!({"method": "message", "body": {"channel": "room"}})))
            .unwrap();
        assert_eq!(channel.events(), vec![("message", "room".to_string())]);
    }

    #[test]
    fn test_failed_resubscribe_restores_previous_delegate() {
        let (mut client, _recorder) = connected_client();
        let first = Arc::new(ChannelRecorder::default());
        let second = Arc::new(ChannelRecorder::default());
        client.subscribe("room", &first, |_| {});

        client.transport_mut().fail_send = true;
        client.subscribe("room", &second, |_| {});
        client.transport_mut().fail_send = false;

        client
            .handle_text(&frame(json!({"method": "join", "body": {"channel": "room"}})))
            .unwrap();
        assert_eq!(first.events(), vec![("join", "room".to_string())]);
        assert!(second.events().is_empty());
    }

    #[test]
    fn test_unsubscribe_reply_is_also_an_event() {
        let (mut client, _recorder) = connected_client();
        let channel = Arc::new(ChannelRecorder::default());
        client.subscribe("room", &channel, |_| {});
        reply_to_last(&mut client, "subscribe", json!({"channel": "room"}));

        let unsubscribe = calls();
        client.unsubscribe("room", record(&unsubscribe));
        assert_eq!(client.transport().last_sent()["params"], json!({"channel": "room"}));
        reply_to_last(&mut client, "unsubscribe", json!({"channel": "room"}));

        assert!(unsubscribe.lock().unwrap()[0].is_ok());
        assert_eq!(channel.events(), vec![("unsubscribe", "room".to_string())]);
        assert!(!client.is_subscribed("room"));
    }

    #[test]
    fn test_server_unsubscribe_push_removes_channel() {
        let (mut client, _recorder) = connected_client();
        let channel = Arc::new(ChannelRecorder::default());
        client.subscribe("room", &channel, |_| {});

        client
            .handle_text(&frame(json!({"method": "unsubscribe", "body": {"channel": "room"}})))
            .unwrap();

        assert!(!client.is_subscribed("room"));
        let result =
            client.handle_text(&frame(json!({"method": "message", "body": {"channel": "room"}})));
        assert!(matches!(result, Err(Violation::UnknownChannel { .. })));
    }

    #[test]
    fn test_requests_carry_channel_params() {
        let (mut client, _recorder) = connected_client();

        client.publish("chat", json!({"text": "hello"}), |_| {});
        let sent = client.transport().last_sent();
        assert_eq!(sent["method"], "publish");
        assert_eq!(sent["params"], json!({"channel": "chat", "data": {"text": "hello"}}));

        client.presence("chat", |_| {});
        assert_eq!(client.transport().last_sent()["method"], "presence");

        client.history("chat", |_| {});
        assert_eq!(client.transport().last_sent()["method"], "history");

        client.ping(|_| {});
        let sent = client.transport().last_sent();
        assert_eq!(sent["method"], "ping");
        assert_eq!(sent["params"], json!({}));

        assert_eq!(client.pending_count(), 4);
    }

    #[test]
    fn test_reply_error_reaches_completion() {
        let (mut client, _recorder) = connected_client();
        let publish = calls();

        client.publish("chat", json!({}), record(&publish));
        let uid = client.transport().last_uid();
        client
            .handle_text(&frame(json!({"uid": uid, "method": "publish", "error": "not available"})))
            .unwrap();

        let publish = publish.lock().unwrap();
        assert_eq!(publish.len(), 1);
        assert!(publish[0].is_err());
        assert_eq!(client.pending_count(), 0);
    }

    #[test]
    fn test_reply_completes_exactly_once() {
        let (mut client, _recorder) = connected_client();
        let ping = calls();

        client.ping(record(&ping));
        let uid = client.transport().last_uid();
        let reply = frame(json!({"uid": uid, "method": "ping"}));

        client.handle_text(&reply).unwrap();
        let second = client.handle_text(&reply);

        assert!(matches!(second, Err(Violation::UntrackedReply { .. })));
        assert_eq!(ping.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_untracked_reply_is_reported() {
        let (mut client, _recorder) = connected_client();

        let result = client.handle_text(&frame(json!({"uid": "nobody", "method": "ping"})));

        match result {
            Err(Violation::UntrackedReply { uid }) => assert_eq!(uid, "nobody"),
            other => panic!("Expected UntrackedReply, got {:?}", other),
        }
        assert!(client.is_connected());
    }

    #[test]
    fn test_unroutable_pushes_are_reported() {
        let (mut client, _recorder) = connected_client();

        let result =
            client.handle_text(&frame(json!({"method": "message", "body": {"channel": "ghost"}})));
        assert!(matches!(result, Err(Violation::UnknownChannel { .. })));

        let result = client.handle_text(&frame(json!({"method": "join", "body": {}})));
        assert!(matches!(
            result,
            Err(Violation::MissingChannel { method: Method::Join })
        ));

        let result = client.handle_text(&frame(json!({"method": "rpc", "body": {}})));
        assert!(matches!(
            result,
            Err(Violation::UnexpectedEnvelope { method: Method::Unknown })
        ));

        let result = client.handle_text(&frame(json!({"method": "publish"})));
        assert!(matches!(
            result,
            Err(Violation::UnexpectedEnvelope { method: Method::Publish })
        ));

        let result = client.handle_text("{not json");
        assert!(matches!(result, Err(Violation::Decode(_))));
    }

    #[test]
    fn test_violation_does_not_stop_batch() {
        let (mut client, _recorder) = connected_client();
        let channel = Arc::new(ChannelRecorder::default());
        client.subscribe("room", &channel, |_| {});

        let result = client.handle_text(&frame(json!([
            {"method": "message", "body": {"channel": "ghost"}},
            {"method": "message", "body": {"channel": "room"}}
        ])));

        assert!(matches!(result, Err(Violation::UnknownChannel { .. })));
        assert_eq!(channel.events(), vec![("message", "room".to_string())]);
    }

    #[test]
    fn test_bad_batch_item_does_not_drop_replies() {
        let (mut client, _recorder) = connected_client();
        let ping = calls();
        client.ping(record(&ping));
        let uid = client.transport().last_uid();

        let result = client.handle_text(&frame(json!([
            {"body": {}},
            {"uid": uid, "method": "ping"}
        ])));

        assert!(matches!(result, Err(Violation::Decode(_))));
        assert_eq!(ping.lock().unwrap().len(), 1);
        assert_eq!(client.pending_count(), 0);
    }

    #[test]
    fn test_refresh_notifies_delegate() {
        let (mut client, recorder) = connected_client();

        client
            .handle_text(&frame(json!({"method": "refresh", "body": {}})))
            .unwrap();

        assert_eq!(*recorder.refreshes.lock().unwrap(), 1);
        assert!(client.is_connected());
    }

    #[test]
    fn test_server_disconnect_clears_everything() {
        let (mut client, recorder) = connected_client();
        let channel = Arc::new(ChannelRecorder::default());
        let subscribe = calls();
        let ping = calls();

        client.subscribe("room42", &channel, record(&subscribe));
        client.ping(record(&ping));
        assert_eq!(client.pending_count(), 2);

        client
            .handle_text(&frame(json!({"method": "disconnect", "body": {"reason": "shutdown", "reconnect": false}})))
            .unwrap();

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.pending_count(), 0);
        assert!(client.subscribed_channels().is_empty());
        assert_eq!(client.transport().closed, 1);

        client
            .handle_text(&frame(json!({"method": "message", "body": {"channel": "room42"}})))
            .unwrap();
        assert!(channel.events().is_empty());
        assert!(subscribe.lock().unwrap().is_empty());
        assert!(ping.lock().unwrap().is_empty());

        let disconnects = recorder.disconnects.lock().unwrap();
        assert_eq!(disconnects.len(), 1);
        match &disconnects[0] {
            ClientError::ServerDisconnect { reason, reconnect } => {
                assert_eq!(reason, "shutdown");
                assert!(!reconnect);
            }
            other => panic!("Expected ServerDisconnect, got {:?}", other),
        }
    }

    #[test]
    fn test_transport_close_while_connected() {
        let (mut client, recorder) = connected_client();
        let ping = calls();
        client.ping(record(&ping));

        client.handle_close(Some(TransportError::ReceiveFailed("reset by peer".into())));

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.pending_count(), 0);
        assert!(ping.lock().unwrap().is_empty());
        let disconnects = recorder.disconnects.lock().unwrap();
        assert!(matches!(disconnects[0], ClientError::Transport(_)));
    }

    #[test]
    fn test_transport_close_without_error_is_unknown() {
        let (mut client, recorder) = connected_client();

        client.handle_close(None);

        let disconnects = recorder.disconnects.lock().unwrap();
        assert!(matches!(disconnects[0], ClientError::UnknownDisconnect));
    }

    #[test]
    fn test_client_disconnect_is_silent() {
        let (mut client, recorder) = connected_client();
        let channel = Arc::new(ChannelRecorder::default());
        let ping = calls();
        client.subscribe("room", &channel, |_| {});
        client.ping(record(&ping));

        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.transport().closed, 1);
        assert!(client.subscribed_channels().is_empty());

        client.handle_event(TransportEvent::Close(None)).unwrap();
        assert!(recorder.disconnects.lock().unwrap().is_empty());
        assert!(ping.lock().unwrap().is_empty());
    }

    #[test]
    fn test_disconnect_while_connecting_fails_connect() {
        let mut client = Client::new(credentials(), MockTransport::default());
        let connect = calls();

        client.connect(record(&connect));
        client.handle_open();
        client.disconnect();

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(connect.lock().unwrap()[0].as_ref().unwrap_err(), "Disconnected by client");
    }

    #[test]
    fn test_reconnect_after_disconnect() {
        let (mut client, _recorder) = connected_client();
        client.disconnect();

        let connect = calls();
        client.connect(record(&connect));
        assert_eq!(client.state(), ConnectionState::Connecting);
        assert_eq!(client.transport().opened, 2);
    }

    #[test]
    fn test_requests_rejected_while_disconnected() {
        let mut client = Client::new(credentials(), MockTransport::default());
        let channel = Arc::new(ChannelRecorder::default());
        let subscribe = calls();

        client.subscribe("room", &channel, record(&subscribe));

        assert!(client.transport().sent.is_empty());
        assert!(!client.is_subscribed("room"));
        assert_eq!(client.pending_count(), 0);
        assert_eq!(subscribe.lock().unwrap()[0].as_ref().unwrap_err(), "Not connected");
    }

    #[test]
    fn test_invalid_channel_fails_fast() {
        let (mut client, _recorder) = connected_client();
        let history = calls();
        let sent_before = client.transport().sent.len();

        client.history("", record(&history));

        assert_eq!(client.transport().sent.len(), sent_before);
        assert!(history.lock().unwrap()[0].is_err());
    }

    #[test]
    fn test_send_failure_completes_and_unregisters() {
        let (mut client, _recorder) = connected_client();
        let channel = Arc::new(ChannelRecorder::default());
        let subscribe = calls();
        client.transport_mut().fail_send = true;

        client.subscribe("room", &channel, record(&subscribe));

        assert!(!client.is_subscribed("room"));
        assert_eq!(client.pending_count(), 0);
        assert!(subscribe.lock().unwrap()[0]
            .as_ref()
            .unwrap_err()
            .contains("broken pipe"));
    }

    #[test]
    fn test_dropped_channel_delegate_is_removed() {
        let (mut client, _recorder) = connected_client();
        let channel = Arc::new(ChannelRecorder::default());
        client.subscribe("room", &channel, |_| {});
        drop(channel);

        client
            .handle_text(&frame(json!({"method": "message", "body": {"channel": "room"}})))
            .unwrap();

        assert!(!client.is_subscribed("room"));
    }

    #[test]
    fn test_binary_frames_route_like_text() {
        let (mut client, recorder) = connected_client();

        client
            .handle_event(TransportEvent::Binary(Bytes::from_static(
                br#"{"method":"refresh","body":{}}"#,
            )))
            .unwrap();

        assert_eq!(*recorder.refreshes.lock().unwrap(), 1);
    }

    #[test]
    fn test_server_disconnect_error_defaults() {
        let envelope = InboundEnvelope::push(Method::Disconnect, json!({}));
        match server_disconnect_error(&envelope) {
            ClientError::ServerDisconnect { reason, reconnect } => {
                assert_eq!(reason, "disconnected by server");
                assert!(reconnect);
            }
            other => panic!("Expected ServerDisconnect, got {:?}", other),
        }

        let envelope = envelope.with_error("expired");
        assert!(server_disconnect_error(&envelope)
            .to_string()
            .contains("expired"));
    }
}
