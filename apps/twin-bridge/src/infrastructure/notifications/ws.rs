//! Notification WebSocket Endpoint
//!
//! `GET /ws/notifications?user_id=&project_id=` upgrades to a WebSocket
//! bound to one hub client. The writer pings every 30s and gives each write
//! 10s; the reader drops the connection after 60s of silence and rejects
//! frames over 4KB.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Router;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::hub::{ClientId, Frame, SharedNotificationHub};
use crate::domain::twin::CatalogId;

/// Endpoint path.
pub const NOTIFICATIONS_PATH: &str = "/ws/notifications";

/// Largest inbound frame accepted.
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Silence after which the reader gives up.
pub const READ_DEADLINE: Duration = Duration::from_secs(60);

/// Heartbeat interval.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Per-write budget.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Connection query parameters.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ConnectParams {
    /// Connecting user.
    pub user_id: Option<CatalogId>,
    /// Project the user is viewing.
    pub project_id: Option<CatalogId>,
}

/// Subscription change sent by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Start receiving a topic.
    Subscribe(String),
    /// Stop receiving a topic.
    Unsubscribe(String),
}

#[derive(Deserialize)]
struct ClientFrame {
    action: String,
    #[serde(default)]
    topic: String,
}

/// Parse a client text frame. Unknown actions and empty topics yield `None`.
#[must_use]
pub fn parse_client_frame(text: &str) -> Option<ClientCommand> {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, message = text, "Invalid client message");
            return None;
        }
    };

    if frame.topic.is_empty() {
        return None;
    }
    match frame.action.as_str() {
        "subscribe" => Some(ClientCommand::Subscribe(frame.topic)),
        "unsubscribe" => Some(ClientCommand::Unsubscribe(frame.topic)),
        _ => None,
    }
}

/// Router serving the notification endpoint.
pub fn router(hub: SharedNotificationHub) -> Router {
    Router::new()
        .route(NOTIFICATIONS_PATH, get(upgrade_handler))
        .with_state(hub)
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(hub): State<SharedNotificationHub>,
) -> Response {
    let Some(user_id) = params.user_id else {
        return (StatusCode::BAD_REQUEST, "user_id is required").into_response();
    };
    let project_id = params.project_id.unwrap_or_default();

    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| serve_client(socket, hub, user_id, project_id))
}

async fn serve_client(
    socket: WebSocket,
    hub: SharedNotificationHub,
    user_id: CatalogId,
    project_id: CatalogId,
) {
    let (id, queue) = hub.register(user_id, project_id);
    let (sink, stream) = socket.split();

    let mut writer = tokio::spawn(write_loop(sink, queue));
    let mut reader = tokio::spawn(read_loop(stream, hub.clone(), id));

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    hub.unregister(id);
}

async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut queue: mpsc::Receiver<Frame>) {
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;

    loop {
        let message = tokio::select! {
            frame = queue.recv() => match frame {
                Some(frame) => Message::Text(frame.as_ref().into()),
                None => {
                    let close = sink.send(Message::Close(None));
                    let _ = tokio::time::timeout(WRITE_DEADLINE, close).await;
                    return;
                }
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        match tokio::time::timeout(WRITE_DEADLINE, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Notification write failed");
                return;
            }
            Err(_) => {
                tracing::debug!("Notification write timed out");
                return;
            }
        }
    }
}

async fn read_loop(mut stream: SplitStream<WebSocket>, hub: SharedNotificationHub, id: ClientId) {
    loop {
        let message = match tokio::time::timeout(READ_DEADLINE, stream.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => {
                tracing::warn!(client_id = %id, error = %e, "Unexpected websocket close");
                return;
            }
            Ok(None) => return,
            Err(_) => {
                tracing::debug!(client_id = %id, "Notification client read deadline exceeded");
                return;
            }
        };

        match message {
            Message::Text(text) => {
                let result = match parse_client_frame(text.as_str()) {
                    Some(ClientCommand::Subscribe(topic)) => hub.subscribe(id, &topic),
                    Some(ClientCommand::Unsubscribe(topic)) => hub.unsubscribe(id, &topic),
                    None => Ok(()),
                };
                if result.is_err() {
                    return;
                }
            }
            Message::Close(_) => return,
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}
