//! Notification Port (Driven Port)
//!
//! Pushes bridge events to connected browser clients. Implementations must
//! never block: a slow client is dropped, not waited on.

use serde::{Deserialize, Serialize};

use crate::domain::twin::CatalogId;

/// Category of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// A twin feature changed.
    TwinUpdate,
    /// An alert was raised.
    Alert,
    /// An ML prediction was stored.
    MlPrediction,
    /// Platform-level event.
    SystemEvent,
}

impl NotificationType {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TwinUpdate => "twin_update",
            Self::Alert => "alert",
            Self::MlPrediction => "ml_prediction",
            Self::SystemEvent => "system_event",
        }
    }
}

/// Port for browser notifications.
pub trait Notifier: Send + Sync {
    /// Deliver to every connected client.
    fn broadcast(&self, kind: NotificationType, topic: &str, payload: serde_json::Value);

    /// Deliver to clients connected for `project_id`.
    fn notify_project(
        &self,
        project_id: CatalogId,
        kind: NotificationType,
        topic: &str,
        payload: serde_json::Value,
    );

    /// Deliver to clients subscribed to `topic`.
    fn notify_topic(&self, topic: &str, kind: NotificationType, payload: serde_json::Value);
}

/// Notifier that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpNotifier;

impl Notifier for NoOpNotifier {
    fn broadcast(&self, _kind: NotificationType, _topic: &str, _payload: serde_json::Value) {}

    fn notify_project(
        &self,
        _project_id: CatalogId,
        _kind: NotificationType,
        _topic: &str,
        _payload: serde_json::Value,
    ) {
    }

    fn notify_topic(&self, _topic: &str, _kind: NotificationType, _payload: serde_json::Value) {}
}
