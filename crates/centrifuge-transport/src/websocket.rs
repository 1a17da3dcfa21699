//! WebSocket transport implementation.
//!
//! This module provides a WebSocket client transport using tokio-tungstenite.
//! The socket lives on its own tokio task; frames to send travel to it over a
//! channel and everything it observes comes back as [`TransportEvent`]s.
//!
//! Every `open` starts a new connection generation. Events still in flight
//! from an earlier, closed connection are discarded by [`WebSocketEvents`].

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, info, warn};

use crate::traits::{Transport, TransportError, TransportEvent};

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Server endpoint, e.g. `ws://localhost:8000/connection/websocket`.
    pub url: String,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
}

impl WebSocketConfig {
    /// Create a config for `url` with default limits.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_message_size: 64 * 1024, // 64 KB
        }
    }
}

enum Outbound {
    Frame(Bytes),
    Close,
}

type Tagged = (u64, TransportEvent);

/// Receiver for the events of a [`WebSocketTransport`].
///
/// Only events of the most recently opened connection are yielded.
pub struct WebSocketEvents {
    rx: mpsc::UnboundedReceiver<Tagged>,
    generation: Arc<AtomicU64>,
}

impl WebSocketEvents {
    /// Receive the next event of the current connection.
    ///
    /// Returns `None` once the transport has been dropped.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        loop {
            let (generation, event) = self.rx.recv().await?;
            if generation == self.generation.load(Ordering::Acquire) {
                return Some(event);
            }
            debug!(generation, "Dropping event of a superseded connection");
        }
    }
}

/// WebSocket client transport.
pub struct WebSocketTransport {
    config: WebSocketConfig,
    events: mpsc::UnboundedSender<Tagged>,
    generation: Arc<AtomicU64>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    task: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    /// Create a transport and the receiver its events are delivered on.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> (Self, WebSocketEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let generation = Arc::new(AtomicU64::new(0));
        let transport = Self {
            config,
            events,
            generation: Arc::clone(&generation),
            outbound: None,
            task: None,
        };
        (transport, WebSocketEvents { rx, generation })
    }

    /// Get the endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// A connection is live and has not been asked to close.
    fn is_open(&self) -> bool {
        self.outbound.is_some() && self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Transport for WebSocketTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.is_open() {
            return Err(TransportError::AlreadyOpen);
        }

        let runtime = Handle::try_current()
            .map_err(|e| TransportError::Other(format!("No tokio runtime: {e}")))?;

        // Anything a closing predecessor still reports carries an older generation.
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound = Some(tx);
        self.task = Some(runtime.spawn(run_connection(
            self.config.clone(),
            rx,
            EventSink {
                generation,
                events: self.events.clone(),
            },
        )));

        debug!(url = %self.config.url, generation, "WebSocket connecting");
        Ok(())
    }

    fn close(&mut self) {
        if let Some(outbound) = self.outbound.take() {
            // The task may already be gone; nothing left to close then.
            let _ = outbound.send(Outbound::Close);
        }
    }

    fn send(&mut self, data: Bytes) -> Result<(), TransportError> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?;
        outbound
            .send(Outbound::Frame(data))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

fn check_size(size: usize, max: usize) -> Result<(), TransportError> {
    if size > max {
        warn!("Message too large: {} bytes (max: {})", size, max);
        return Err(TransportError::MessageTooLarge { size, max });
    }
    Ok(())
}

struct EventSink {
    generation: u64,
    events: mpsc::UnboundedSender<Tagged>,
}

impl EventSink {
    fn send(&self, event: TransportEvent) -> Result<(), ()> {
        self.events.send((self.generation, event)).map_err(|_| ())
    }
}

/// Own the socket until it closes, then report exactly one `Close`.
async fn run_connection(
    config: WebSocketConfig,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: EventSink,
) {
    let stream = match connect_async(config.url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            error!(url = %config.url, "WebSocket connect failed: {}", e);
            let _ = events.send(TransportEvent::Close(Some(TransportError::ConnectFailed(
                e.to_string(),
            ))));
            return;
        }
    };

    info!(url = %config.url, "WebSocket connected");
    if events.send(TransportEvent::Open).is_err() {
        return;
    }

    let (mut sink, mut stream) = stream.split();

    let cause = loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(Outbound::Frame(data)) => {
                    if let Err(e) = sink.send(Message::Binary(data.to_vec())).await {
                        break Some(TransportError::SendFailed(e.to_string()));
                    }
                }
                Some(Outbound::Close) | None => {
                    debug!("Closing WebSocket");
                    if let Err(e) = sink.close().await {
                        warn!("Failed to close WebSocket cleanly: {}", e);
                    }
                    break None;
                }
            },

            message = stream.next() => {
                let event = match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = check_size(text.len(), config.max_message_size) {
                            break Some(e);
                        }
                        TransportEvent::Text(text)
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if let Err(e) = check_size(data.len(), config.max_message_size) {
                            break Some(e);
                        }
                        TransportEvent::Binary(Bytes::from(data))
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            warn!("Failed to send pong: {}", e);
                        }
                        continue;
                    }
                    Some(Ok(Message::Pong(_) | Message::Frame(_))) => continue,
                    Some(Ok(Message::Close(_))) => {
                        debug!("Received close frame");
                        break None;
                    }
                    Some(Err(WsError::ConnectionClosed)) | None => {
                        debug!("WebSocket stream ended");
                        break None;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break Some(TransportError::ReceiveFailed(e.to_string()));
                    }
                };

                if events.send(event).is_err() {
                    debug!("Event receiver dropped");
                    break None;
                }
            }
        }
    };

    let _ = events.send(TransportEvent::Close(cause));
}
