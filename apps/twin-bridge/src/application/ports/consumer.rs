//! Inbound Handler Ports (Driver Ports)
//!
//! The broker consumer and the registry WebSocket reader drive the bridge
//! through these traits. Neither client holds a reference to the bridge
//! itself; the bridge registers handlers on them at startup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::RepositoryError;
use crate::domain::events::RegistryEvent;

/// A record delivered by the broker consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRecord {
    /// Source topic.
    pub topic: String,
    /// Partitioning key.
    pub key: Option<String>,
    /// Raw value.
    pub payload: Vec<u8>,
    /// Record headers, in order.
    pub headers: Vec<(String, String)>,
    /// Broker timestamp.
    pub timestamp: Option<DateTime<Utc>>,
    /// Source partition.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
}

impl InboundRecord {
    /// Build a record for `topic` with a key and payload.
    #[must_use]
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: Some(key.into()),
            payload,
            headers: Vec::new(),
            timestamp: None,
            partition: 0,
            offset: 0,
        }
    }
}

/// Failure returned by a message handler. Routed to the dead-letter topic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// Malformed payload or unparseable timestamp.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Catalog constraint violated while reconciling.
    #[error("reconciliation failed: {0}")]
    Reconciliation(String),

    /// Storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),

    /// The handler can no longer accept work.
    #[error("handler unavailable: {0}")]
    Unavailable(String),
}

impl HandlerError {
    /// Metric label for the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::Reconciliation(_) => "reconciliation",
            Self::Storage(_) => "storage",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

/// Handler invoked for each record on a subscribed topic.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one record. An error sends the record to `<topic>.dlq`.
    async fn handle(&self, record: &InboundRecord) -> Result<(), HandlerError>;
}

/// Handler invoked for each event read from the registry WebSocket.
#[async_trait]
pub trait RegistryEventHandler: Send + Sync {
    /// Process one event. Must not block the reader on slow I/O.
    async fn on_event(&self, event: &RegistryEvent);
}
