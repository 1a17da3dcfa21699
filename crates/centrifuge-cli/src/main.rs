//! # Centrifuge CLI
//!
//! Connects to a Centrifuge server, subscribes to the configured channels and
//! logs everything pushed to them until interrupted.
//!
//! ## Usage
//!
//! ```bash
//! # Run with ./centrifuge.toml or ~/.config/centrifuge/centrifuge.toml
//! centrifuge
//!
//! # Run with environment variables
//! CENTRIFUGE_URL=ws://localhost:8000/connection/websocket \
//! CENTRIFUGE_USER=42 CENTRIFUGE_SECRET=secret centrifuge
//! ```

mod config;
mod events;
mod metrics;

use anyhow::{anyhow, Result};
use centrifuge_core::{channel_sign, Client, ClientError, Method};
use centrifuge_protocol::is_private_channel;
use centrifuge_transport::{TransportEvent, WebSocketConfig, WebSocketEvents, WebSocketTransport};
use events::{AppEvent, ChannelLogger, SessionLogger};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "centrifuge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;
    let credentials = config.credentials.credentials()?;

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            warn!(error = %e, "Failed to start metrics server");
        }
    }

    info!(url = %config.url, user = %credentials.user(), "Starting Centrifuge client");

    let (transport, mut transport_events) = WebSocketTransport::new(WebSocketConfig {
        url: config.url.clone(),
        max_message_size: config.max_message_size,
    });

    let (app_tx, mut app_events) = mpsc::unbounded_channel();
    let session = Arc::new(SessionLogger::new(app_tx.clone()));
    let channel_logger = Arc::new(ChannelLogger);
    let mut client = Client::new(credentials, transport).with_delegate(&session);

    let connected = app_tx.clone();
    client.connect(move |reply| {
        let _ = connected.send(AppEvent::Connected(reply));
    });

    loop {
        tokio::select! {
            Some(event) = transport_events.recv() => {
                if let Err(violation) = client.handle_event(event) {
                    warn!(%violation, "Inbound frame broke the protocol contract");
                }
            }
            Some(event) = app_events.recv() => match event {
                AppEvent::Connected(Ok(reply)) => {
                    let client_id = reply
                        .body_field("client")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    info!(client = %client_id, "Connected");
                    subscribe_all(&mut client, &config, &client_id, &channel_logger, &app_tx);
                }
                AppEvent::Connected(Err(e)) => {
                    return Err(anyhow!(e).context("Failed to connect"));
                }
                AppEvent::Completed { method, channel, reply } => {
                    on_completed(&mut client, &config, method, &channel, reply, &app_tx);
                }
                AppEvent::Disconnected(e) => {
                    error!(error = %e, "Connection lost");
                    if matches!(e, ClientError::ServerDisconnect { .. }) {
                        wait_for_close(&mut transport_events).await;
                    }
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                client.disconnect();
                wait_for_close(&mut transport_events).await;
                break;
            }
        }
    }

    Ok(())
}

/// Let the transport finish its close handshake before the runtime stops.
async fn wait_for_close(events: &mut WebSocketEvents) {
    let closed = async {
        while let Some(event) = events.recv().await {
            if let TransportEvent::Close(cause) = event {
                debug!(?cause, "Transport closed");
                return;
            }
        }
    };

    if tokio::time::timeout(CLOSE_TIMEOUT, closed).await.is_err() {
        warn!("Timed out waiting for the connection to close");
    }
}

fn subscribe_all(
    client: &mut Client<WebSocketTransport>,
    config: &config::Config,
    client_id: &str,
    delegate: &Arc<ChannelLogger>,
    events: &mpsc::UnboundedSender<AppEvent>,
) {
    for channel in &config.channels {
        let completion = events::forward(events, Method::Subscribe, channel);

        if !is_private_channel(channel) {
            client.subscribe(channel, delegate, completion);
            continue;
        }

        let Some(secret) = config.credentials.secret.as_deref() else {
            warn!(channel = %channel, "Skipping private channel, no secret configured to sign it");
            continue;
        };
        let info = Value::Object(serde_json::Map::new());
        let sign = channel_sign(secret, client_id, channel, &info.to_string());
        client.subscribe_private(channel, client_id, &sign, &info, delegate, completion);
    }
}

fn on_completed(
    client: &mut Client<WebSocketTransport>,
    config: &config::Config,
    method: Method,
    channel: &str,
    reply: centrifuge_core::Reply,
    events: &mpsc::UnboundedSender<AppEvent>,
) {
    let reply = match reply {
        Ok(reply) => reply,
        Err(e) => {
            warn!(channel = %channel, %method, error = %e, "Request failed");
            return;
        }
    };

    match method {
        Method::Subscribe => {
            info!(channel = %channel, "Subscribed");
            if config.history {
                client.history(channel, events::forward(events, Method::History, channel));
            }
        }
        Method::History => {
            let count = reply
                .body_field("data")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            info!(channel = %channel, count, "History received");
        }
        _ => debug!(channel = %channel, %method, "Request completed"),
    }
}
