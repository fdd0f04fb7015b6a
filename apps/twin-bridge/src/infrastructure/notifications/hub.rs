//! Notification Hub
//!
//! Fans bridge notifications out to connected browser clients. Each client
//! owns a bounded send queue; publishing never waits on a client. A client
//! whose queue is full is unregistered and its queue closed.
//!
//! # Routing
//!
//! - Broadcast: every client
//! - Project: clients connected for the project
//! - Topic: clients subscribed to the topic

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::application::ports::{NotificationType, Notifier};
use crate::domain::twin::CatalogId;
use crate::infrastructure::metrics;

/// Messages a client may queue before it is dropped.
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

/// Hub-assigned client identifier.
pub type ClientId = Uuid;

// =============================================================================
// Envelope
// =============================================================================

/// Wire envelope sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification category.
    #[serde(rename = "type")]
    pub kind: NotificationType,
    /// When the hub accepted the notification.
    pub timestamp: DateTime<Utc>,
    /// Routing topic.
    pub topic: String,
    /// Arbitrary JSON body.
    pub payload: serde_json::Value,
}

impl Notification {
    /// Stamp a notification with the current time.
    #[must_use]
    pub fn now(kind: NotificationType, topic: &str, payload: serde_json::Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            topic: topic.to_string(),
            payload,
        }
    }
}

/// Serialized envelope shared across client queues.
pub type Frame = Arc<str>;

// =============================================================================
// State
// =============================================================================

#[derive(Debug)]
struct Client {
    user_id: CatalogId,
    project_id: CatalogId,
    topics: HashSet<String>,
    tx: mpsc::Sender<Frame>,
}

#[derive(Debug, Default)]
struct HubState {
    clients: HashMap<ClientId, Client>,
    projects: HashSet<CatalogId>,
    topics: HashMap<String, HashSet<ClientId>>,
    dropped: u64,
}

/// Hub counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Connected clients.
    pub clients: usize,
    /// Project channels created so far.
    pub project_channels: usize,
    /// Topic channels created so far.
    pub topic_channels: usize,
    /// Clients dropped for a full queue.
    pub dropped_clients: u64,
}

/// Hub errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The client is not registered.
    #[error("unknown notification client: {0}")]
    UnknownClient(ClientId),

    /// Topic names must be non-empty.
    #[error("empty topic")]
    EmptyTopic,
}

// =============================================================================
// Hub
// =============================================================================

/// Browser notification fan-out.
#[derive(Debug, Default)]
pub struct NotificationHub {
    state: RwLock<HubState>,
}

impl NotificationHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client. The receiver yields serialized envelopes and ends
    /// when the client is unregistered.
    pub fn register(
        &self,
        user_id: CatalogId,
        project_id: CatalogId,
    ) -> (ClientId, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let id = Uuid::new_v4();

        let count = {
            let mut state = self.state.write();
            state.clients.insert(
                id,
                Client {
                    user_id,
                    project_id,
                    topics: HashSet::new(),
                    tx,
                },
            );
            state.clients.len()
        };
        metrics::set_notification_clients(count);

        tracing::debug!(client_id = %id, user_id, project_id, "Notification client registered");
        (id, rx)
    }

    /// Remove a client and close its queue. Unknown ids are ignored.
    pub fn unregister(&self, id: ClientId) {
        let (removed, count) = {
            let mut state = self.state.write();
            let removed = remove_client(&mut state, id);
            (removed, state.clients.len())
        };

        if let Some(client) = removed {
            metrics::set_notification_clients(count);
            tracing::debug!(
                client_id = %id,
                user_id = client.user_id,
                project_id = client.project_id,
                "Notification client unregistered"
            );
        }
    }

    /// Add `topic` to a client's subscriptions.
    ///
    /// # Errors
    ///
    /// Returns `UnknownClient` if the client is gone, `EmptyTopic` for an
    /// empty topic.
    pub fn subscribe(&self, id: ClientId, topic: &str) -> Result<(), HubError> {
        if topic.is_empty() {
            return Err(HubError::EmptyTopic);
        }

        let mut state = self.state.write();
        let client = state.clients.get_mut(&id).ok_or(HubError::UnknownClient(id))?;
        client.topics.insert(topic.to_string());
        state.topics.entry(topic.to_string()).or_default().insert(id);

        tracing::debug!(client_id = %id, topic, "Client subscribed to topic");
        Ok(())
    }

    /// Remove `topic` from a client's subscriptions.
    ///
    /// # Errors
    ///
    /// Returns `UnknownClient` if the client is gone.
    pub fn unsubscribe(&self, id: ClientId, topic: &str) -> Result<(), HubError> {
        let mut state = self.state.write();
        let client = state.clients.get_mut(&id).ok_or(HubError::UnknownClient(id))?;
        client.topics.remove(topic);
        if let Some(subscribers) = state.topics.get_mut(topic) {
            subscribers.remove(&id);
        }

        tracing::debug!(client_id = %id, topic, "Client unsubscribed from topic");
        Ok(())
    }

    /// Connected client count.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.state.read().clients.len()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let state = self.state.read();
        HubStats {
            clients: state.clients.len(),
            project_channels: state.projects.len(),
            topic_channels: state.topics.len(),
            dropped_clients: state.dropped,
        }
    }

    fn ensure_project_channel(&self, project_id: CatalogId) {
        if !self.state.read().projects.contains(&project_id) {
            self.state.write().projects.insert(project_id);
        }
    }

    fn ensure_topic_channel(&self, topic: &str) {
        if !self.state.read().topics.contains_key(topic) {
            self.state.write().topics.entry(topic.to_string()).or_default();
        }
    }

    /// Queue `notification` for every client `select` accepts, then drop
    /// the clients whose queue was full.
    fn deliver(&self, notification: &Notification, select: impl Fn(ClientId, &Client) -> bool) {
        let frame: Frame = match serde_json::to_string(notification) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    kind = notification.kind.as_str(),
                    topic = %notification.topic,
                    "Failed to serialize notification"
                );
                return;
            }
        };

        let mut overflowed = Vec::new();
        let mut closed = Vec::new();
        {
            let state = self.state.read();
            for (id, client) in &state.clients {
                if !select(*id, client) {
                    continue;
                }
                match client.tx.try_send(Arc::clone(&frame)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => overflowed.push(*id),
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if overflowed.is_empty() && closed.is_empty() {
            return;
        }

        let count = {
            let mut state = self.state.write();
            for id in &overflowed {
                if let Some(client) = remove_client(&mut state, *id) {
                    state.dropped += 1;
                    metrics::record_notification_client_dropped();
                    tracing::warn!(
                        client_id = %id,
                        user_id = client.user_id,
                        project_id = client.project_id,
                        "Client buffer full, connection closed"
                    );
                }
            }
            for id in &closed {
                remove_client(&mut state, *id);
            }
            state.clients.len()
        };
        metrics::set_notification_clients(count);
    }
}

fn remove_client(state: &mut HubState, id: ClientId) -> Option<Client> {
    let client = state.clients.remove(&id)?;
    for topic in &client.topics {
        if let Some(subscribers) = state.topics.get_mut(topic) {
            subscribers.remove(&id);
        }
    }
    Some(client)
}

impl Notifier for NotificationHub {
    fn broadcast(&self, kind: NotificationType, topic: &str, payload: serde_json::Value) {
        self.deliver(&Notification::now(kind, topic, payload), |_, _| true);
    }

    fn notify_project(
        &self,
        project_id: CatalogId,
        kind: NotificationType,
        topic: &str,
        payload: serde_json::Value,
    ) {
        self.ensure_project_channel(project_id);
        self.deliver(&Notification::now(kind, topic, payload), |_, client| {
            client.project_id == project_id
        });
    }

    fn notify_topic(&self, topic: &str, kind: NotificationType, payload: serde_json::Value) {
        self.ensure_topic_channel(topic);
        self.deliver(&Notification::now(kind, topic, payload), |_, client| {
            client.topics.contains(topic)
        });
    }
}

/// Shared hub reference.
pub type SharedNotificationHub = Arc<NotificationHub>;
