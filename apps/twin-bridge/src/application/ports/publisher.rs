//! Event Publisher Port (Driven Port)
//!
//! Interface for producing records onto broker topics.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Record production errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// The broker could not be reached after the client's own retries.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// The local producer queue is full.
    #[error("producer queue full")]
    QueueFull,

    /// The value could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A record ready to be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    /// Destination topic.
    pub topic: String,
    /// Partitioning key. `None` produces a keyless record.
    pub key: Option<String>,
    /// Encoded value.
    pub payload: Vec<u8>,
    /// Record headers, in order.
    pub headers: Vec<(String, String)>,
    /// Record timestamp.
    pub timestamp: DateTime<Utc>,
}

impl OutboundRecord {
    /// Create a record with a raw payload.
    #[must_use]
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: Some(key.into()),
            payload,
            headers: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a record whose payload is `value` encoded as JSON.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if `value` cannot be encoded.
    pub fn json<T: Serialize + ?Sized>(
        topic: impl Into<String>,
        key: impl Into<String>,
        value: &T,
    ) -> Result<Self, PublishError> {
        let payload =
            serde_json::to_vec(value).map_err(|e| PublishError::Serialization(e.to_string()))?;
        Ok(Self::new(topic, key, payload))
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Override the record timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Look up a header value by name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Port for producing broker records.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Queue a record for delivery with acks-all semantics.
    ///
    /// Returns once the record is accepted by the producer; delivery is
    /// reported asynchronously.
    async fn publish(&self, record: OutboundRecord) -> Result<(), PublishError>;

    /// Produce a record and wait for the broker to confirm it.
    async fn publish_sync(&self, record: OutboundRecord) -> Result<(), PublishError>;

    /// Wait up to `timeout` for queued records. Returns how many remain.
    fn flush(&self, timeout: Duration) -> usize;
}

/// Publisher that accepts and discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpPublisher;

#[async_trait]
impl EventPublisher for NoOpPublisher {
    async fn publish(&self, _record: OutboundRecord) -> Result<(), PublishError> {
        Ok(())
    }

    async fn publish_sync(&self, _record: OutboundRecord) -> Result<(), PublishError> {
        Ok(())
    }

    fn flush(&self, _timeout: Duration) -> usize {
        0
    }
}
