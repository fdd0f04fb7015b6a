//! Registry WebSocket Client
//!
//! One long-lived connection to the registry's `/ws/2` endpoint. A single
//! reader task parses frames into [`RegistryEvent`]s and dispatches them to
//! registered handlers; commands are written through a shared sink.
//!
//! # Dispatch
//!
//! Each event goes to the first handler found, in this order:
//!
//! 1. [`HandlerKey::Feature`] for the event's feature id
//! 2. [`HandlerKey::AnyFeature`] when the event has a feature id
//! 3. [`HandlerKey::Action`] for the event's action
//! 4. [`HandlerKey::AnyThing`]
//!
//! Events nothing matches are dropped with a debug log.
//!
//! # Reconnect
//!
//! Any termination not caused by [`RegistryWsClient::disconnect`] or
//! cancellation is followed by a backoff delay and a new connection.
//! Subscriptions are remembered and replayed once connected.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::auth::RegistryAuth;
use super::error::RegistryClientError;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::RegistryEventHandler;
use crate::domain::events::RegistryEvent;
use crate::infrastructure::broker::supervise;
use crate::infrastructure::config::DittoSettings;
use crate::infrastructure::metrics;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Default keepalive ping interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

const START_SEND_EVENTS: &str = "START-SEND-EVENTS";
const STOP_SEND_EVENTS: &str = "STOP-SEND-EVENTS";

// =============================================================================
// Connection State
// =============================================================================

/// Connection state, observable through [`RegistryWsClient::connection_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Socket open, reader running.
    Connected,
}

impl ConnectionState {
    /// Label used in health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Rewrite the registry HTTP(S) base URL to its WebSocket endpoint.
///
/// # Errors
///
/// Returns `InvalidUrl` when the scheme is neither `http` nor `https`.
pub fn websocket_url(base: &str) -> Result<String, RegistryClientError> {
    let base = base.trim_end_matches('/');
    let rewritten = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(RegistryClientError::InvalidUrl(base.to_string()));
    };
    Ok(format!("{rewritten}/ws/2"))
}

/// Registry WebSocket client configuration.
#[derive(Debug, Clone)]
pub struct RegistryWsConfig {
    /// `ws(s)://<host>/ws/2`.
    pub url: String,
    /// Credentials sent on the upgrade request.
    pub auth: RegistryAuth,
    /// Backoff between connection attempts.
    pub reconnect: ReconnectConfig,
    /// Keepalive ping interval. Two missed intervals close the socket.
    pub ping_interval: Duration,
}

impl RegistryWsConfig {
    /// Build from registry settings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidUrl` if the base URL is not HTTP(S).
    pub fn from_settings(settings: &DittoSettings) -> Result<Self, RegistryClientError> {
        Ok(Self {
            url: websocket_url(&settings.url)?,
            auth: RegistryAuth::from_settings(settings),
            reconnect: ReconnectConfig::default(),
            ping_interval: DEFAULT_PING_INTERVAL,
        })
    }
}

// =============================================================================
// Commands and Subscriptions
// =============================================================================

/// Payload of a `START-SEND-EVENTS` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionSpec {
    /// Event topic filter.
    pub topic: String,
    /// RQL filter expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Namespaces to restrict to.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
}

impl SubscriptionSpec {
    /// Every twin, optionally narrowed by namespace and filter.
    #[must_use]
    pub fn things(namespaces: Vec<String>, filter: Option<String>) -> Self {
        Self {
            topic: "/_/things/twin/events".to_string(),
            filter: filter.filter(|f| !f.is_empty()),
            namespaces,
        }
    }

    /// One twin.
    #[must_use]
    pub fn thing(thing_id: &str) -> Self {
        Self {
            topic: format!("/{thing_id}/things/twin/events"),
            filter: None,
            namespaces: Vec::new(),
        }
    }

    /// One twin, with the feature's state attached to each event.
    #[must_use]
    pub fn feature(thing_id: &str, feature_id: &str) -> Self {
        Self {
            topic: format!("/{thing_id}/things/twin/events?extraFields=features/{feature_id}"),
            filter: None,
            namespaces: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Command<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<CommandPayload<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum CommandPayload<'a> {
    Subscribe(&'a SubscriptionSpec),
    Topic { topic: &'a str },
}

impl<'a> Command<'a> {
    const fn start(spec: &'a SubscriptionSpec) -> Self {
        Self {
            kind: START_SEND_EVENTS,
            payload: Some(CommandPayload::Subscribe(spec)),
        }
    }

    const fn stop(topic: &'a str) -> Self {
        Self {
            kind: STOP_SEND_EVENTS,
            payload: Some(CommandPayload::Topic { topic }),
        }
    }

    const fn stop_all() -> Self {
        Self {
            kind: STOP_SEND_EVENTS,
            payload: None,
        }
    }

    fn to_message(&self) -> Result<Message, RegistryClientError> {
        Ok(Message::Text(serde_json::to_string(self)?.into()))
    }
}

// =============================================================================
// Handler Table
// =============================================================================

/// Registration key for a [`RegistryEventHandler`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HandlerKey {
    /// Events for one feature id.
    Feature(String),
    /// Events for any feature.
    AnyFeature,
    /// Thing events with one action.
    Action(String),
    /// Any thing event.
    AnyThing,
}

impl HandlerKey {
    /// Candidate keys for `event`, in lookup order.
    fn candidates(event: &RegistryEvent) -> Vec<Self> {
        let mut keys = Vec::with_capacity(4);
        if let Some(feature) = &event.feature_id {
            keys.push(Self::Feature(feature.clone()));
            keys.push(Self::AnyFeature);
        }
        if let Some(action) = &event.action {
            keys.push(Self::Action(action.clone()));
        }
        keys.push(Self::AnyThing);
        keys
    }
}

// =============================================================================
// Client
// =============================================================================

/// Registry WebSocket client.
pub struct RegistryWsClient {
    config: RegistryWsConfig,
    cancel: CancellationToken,
    handlers: parking_lot::RwLock<HashMap<HandlerKey, Arc<dyn RegistryEventHandler>>>,
    subscriptions: parking_lot::Mutex<Vec<SubscriptionSpec>>,
    writer: tokio::sync::Mutex<Option<WsSink>>,
    state: watch::Sender<ConnectionState>,
}

impl RegistryWsClient {
    /// Create a disconnected client.
    #[must_use]
    pub fn new(config: RegistryWsConfig, cancel: CancellationToken) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            cancel,
            handlers: parking_lot::RwLock::new(HashMap::new()),
            subscriptions: parking_lot::Mutex::new(Vec::new()),
            writer: tokio::sync::Mutex::new(None),
            state,
        }
    }

    /// Register a handler, replacing any previous one for `key`.
    pub fn register_handler(&self, key: HandlerKey, handler: Arc<dyn RegistryEventHandler>) {
        self.handlers.write().insert(key, handler);
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Whether the socket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Wait until connected or `timeout` elapses. Returns whether connected.
    pub async fn wait_until_connected(&self, timeout: Duration) -> bool {
        let mut rx = self.state.subscribe();
        tokio::time::timeout(
            timeout,
            rx.wait_for(|state| *state == ConnectionState::Connected),
        )
        .await
        .is_ok_and(|r| r.is_ok())
    }

    /// Remembered subscriptions, in the order they were made.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionSpec> {
        self.subscriptions.lock().clone()
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    /// Subscribe to events for every twin.
    ///
    /// The subscription is remembered even when the socket is down and is
    /// sent on the next connection.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` if the socket is not open.
    pub async fn subscribe_to_things(
        &self,
        namespaces: Vec<String>,
        filter: Option<String>,
    ) -> Result<(), RegistryClientError> {
        self.subscribe(SubscriptionSpec::things(namespaces, filter)).await
    }

    /// Subscribe to events for one twin.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` if the socket is not open.
    pub async fn subscribe_to_thing(&self, thing_id: &str) -> Result<(), RegistryClientError> {
        self.subscribe(SubscriptionSpec::thing(thing_id)).await
    }

    /// Subscribe to events for one twin feature.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` if the socket is not open.
    pub async fn subscribe_to_feature(
        &self,
        thing_id: &str,
        feature_id: &str,
    ) -> Result<(), RegistryClientError> {
        self.subscribe(SubscriptionSpec::feature(thing_id, feature_id))
            .await
    }

    async fn subscribe(&self, spec: SubscriptionSpec) -> Result<(), RegistryClientError> {
        {
            let mut subs = self.subscriptions.lock();
            if !subs.contains(&spec) {
                subs.push(spec.clone());
            }
        }
        tracing::info!(topic = %spec.topic, "Subscribing to registry events");
        self.send(&Command::start(&spec)).await
    }

    /// Stop events for `topic` and forget the subscription.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` if the socket is not open.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), RegistryClientError> {
        self.subscriptions.lock().retain(|s| s.topic != topic);
        tracing::info!(topic, "Unsubscribing from registry events");
        self.send(&Command::stop(topic)).await
    }

    /// Stop every event stream and forget all subscriptions.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` if the socket is not open.
    pub async fn unsubscribe_all(&self) -> Result<(), RegistryClientError> {
        self.subscriptions.lock().clear();
        self.send(&Command::stop_all()).await
    }

    async fn send(&self, command: &Command<'_>) -> Result<(), RegistryClientError> {
        let message = command.to_message()?;
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(RegistryClientError::NotConnected)?;
        sink.send(message).await?;
        Ok(())
    }

    /// Send a normal-close frame, close the socket and stop reconnecting.
    pub async fn disconnect(&self) {
        self.cancel.cancel();
        self.close_writer().await;
        self.state.send_replace(ConnectionState::Disconnected);
    }

    async fn close_writer(&self) {
        let Some(mut sink) = self.writer.lock().await.take() else {
            return;
        };
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client shutdown".into(),
        };
        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
            tracing::debug!(error = %e, "Failed to send close frame");
        }
        if let Err(e) = sink.close().await {
            tracing::debug!(error = %e, "Failed to close registry socket");
        }
        tracing::info!("Registry WebSocket closed");
    }

    // -------------------------------------------------------------------------
    // Connection Loop
    // -------------------------------------------------------------------------

    /// Run [`RegistryWsClient::run`] under panic supervision. A handler
    /// panic drops the connection and the loop is rebuilt with the
    /// remembered subscriptions.
    pub async fn run_supervised(self: Arc<Self>) {
        let cancel = self.cancel.clone();
        let restarts = supervise("registry-ws", cancel, move || {
            let client = Arc::clone(&self);
            async move {
                if let Err(e) = client.run().await {
                    tracing::error!(error = %e, "Registry WebSocket client error");
                }
            }
        })
        .await;
        tracing::debug!(restarts, "Registry WebSocket supervisor stopped");
    }

    /// Run the connection loop until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `MaxReconnectAttemptsExceeded` if the reconnect policy gives
    /// up. The default policy never does.
    pub async fn run(self: Arc<Self>) -> Result<(), RegistryClientError> {
        let _reset = ResetOnExit(&*self);
        let mut reconnect_policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Registry WebSocket client cancelled");
                return Ok(());
            }

            let result = self.connect_and_run(&mut reconnect_policy).await;
            *self.writer.lock().await = None;
            self.state.send_replace(ConnectionState::Disconnected);

            match result {
                Ok(()) => {
                    tracing::info!("Registry WebSocket client stopped");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Registry WebSocket connection error");

                    let Some(delay) = reconnect_policy.next_delay() else {
                        return Err(RegistryClientError::MaxReconnectAttemptsExceeded);
                    };
                    let attempt = reconnect_policy.attempt_count();
                    metrics::record_registry_reconnect();
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to registry"
                    );

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("Registry client cancelled during reconnect delay");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Connect and read until cancelled (`Ok`) or the connection ends (`Err`).
    async fn connect_and_run(
        &self,
        reconnect_policy: &mut ReconnectPolicy,
    ) -> Result<(), RegistryClientError> {
        tracing::info!(url = %self.config.url, "Connecting to registry WebSocket");
        self.state.send_replace(ConnectionState::Connecting);

        let mut request = self.config.url.as_str().into_client_request()?;
        if let Some(value) = self.config.auth.header_value() {
            let value = HeaderValue::from_str(&value)
                .map_err(|e| RegistryClientError::Protocol(format!("invalid auth header: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            connected = tokio_tungstenite::connect_async(request) => connected?,
        };
        let (write, mut read) = ws_stream.split();
        *self.writer.lock().await = Some(write);

        reconnect_policy.reset();
        self.state.send_replace(ConnectionState::Connected);
        tracing::info!("Connected to registry WebSocket");

        self.replay_subscriptions().await?;

        let mut ping = tokio::time::interval(self.config.ping_interval);
        ping.tick().await;
        let mut last_seen = tokio::time::Instant::now();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    self.close_writer().await;
                    return Ok(());
                }
                _ = ping.tick() => {
                    if last_seen.elapsed() > self.config.ping_interval * 2 {
                        tracing::warn!("Registry heartbeat timeout");
                        return Err(RegistryClientError::ConnectionClosed);
                    }
                    self.write(Message::Ping(Vec::new().into())).await?;
                }
                msg = read.next() => {
                    last_seen = tokio::time::Instant::now();
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text).await,
                        Some(Ok(Message::Ping(data))) => self.write(Message::Pong(data)).await?,
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Registry sent close frame");
                            return Err(RegistryClientError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("Registry WebSocket stream ended");
                            return Err(RegistryClientError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    async fn write(&self, message: Message) -> Result<(), RegistryClientError> {
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(RegistryClientError::ConnectionClosed)?;
        sink.send(message).await?;
        Ok(())
    }

    async fn replay_subscriptions(&self) -> Result<(), RegistryClientError> {
        let subs = self.subscriptions();
        for spec in &subs {
            tracing::info!(topic = %spec.topic, "Restoring registry subscription");
            self.write(Command::start(spec).to_message()?).await?;
        }
        Ok(())
    }

    async fn handle_text(&self, text: &str) {
        if text.ends_with(":ACK") {
            tracing::debug!(ack = text, "Registry acknowledged command");
            return;
        }

        match RegistryEvent::parse(text) {
            Ok(event) => {
                metrics::record_registry_event();
                self.dispatch(&event).await;
            }
            Err(e) => {
                metrics::record_registry_protocol_error();
                tracing::warn!(error = %e, "Dropping malformed registry frame");
            }
        }
    }

    /// Hand `event` to the first matching handler.
    async fn dispatch(&self, event: &RegistryEvent) {
        let handler = {
            let handlers = self.handlers.read();
            HandlerKey::candidates(event)
                .into_iter()
                .find_map(|key| handlers.get(&key).cloned())
        };

        match handler {
            Some(handler) => handler.on_event(event).await,
            None => tracing::debug!(topic = %event.topic, path = %event.path, "No handler for registry event"),
        }
    }
}

/// Clears the writer and publishes `Disconnected` when the connection loop
/// ends, including by unwinding.
struct ResetOnExit<'a>(&'a RegistryWsClient);

impl Drop for ResetOnExit<'_> {
    fn drop(&mut self) {
        if let Ok(mut writer) = self.0.writer.try_lock() {
            writer.take();
        }
        self.0.state.send_replace(ConnectionState::Disconnected);
    }
}
