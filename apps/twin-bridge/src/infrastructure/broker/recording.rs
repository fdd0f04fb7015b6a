//! In-memory publisher.
//!
//! Keeps every published record in order. Used for the dead-letter path in
//! tests and for running the pipeline without a cluster.

use std::time::Duration;

use async_trait::async_trait;

use crate::application::ports::{EventPublisher, OutboundRecord, PublishError};

/// Publisher that records instead of producing.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    records: parking_lot::Mutex<Vec<OutboundRecord>>,
    fail_with: parking_lot::Mutex<Option<PublishError>>,
}

impl RecordingPublisher {
    /// Create an empty publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following publish fail with `error`; `None` restores success.
    pub fn fail_with(&self, error: Option<PublishError>) {
        *self.fail_with.lock() = error;
    }

    /// Every record, in publish order.
    #[must_use]
    pub fn records(&self) -> Vec<OutboundRecord> {
        self.records.lock().clone()
    }

    /// Records published to `topic`.
    #[must_use]
    pub fn on_topic(&self, topic: &str) -> Vec<OutboundRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.topic == topic)
            .cloned()
            .collect()
    }

    /// Remove and return every record.
    pub fn drain(&self) -> Vec<OutboundRecord> {
        std::mem::take(&mut *self.records.lock())
    }

    fn push(&self, record: OutboundRecord) -> Result<(), PublishError> {
        if let Some(error) = self.fail_with.lock().clone() {
            return Err(error);
        }
        self.records.lock().push(record);
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, record: OutboundRecord) -> Result<(), PublishError> {
        self.push(record)
    }

    async fn publish_sync(&self, record: OutboundRecord) -> Result<(), PublishError> {
        self.push(record)
    }

    fn flush(&self, _timeout: Duration) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_in_order_and_filters_by_topic() {
        let publisher = RecordingPublisher::new();
        publisher
            .publish(OutboundRecord::new("a", "1", Vec::new()))
            .await
            .unwrap();
        publisher
            .publish(OutboundRecord::new("b", "2", Vec::new()))
            .await
            .unwrap();

        assert_eq!(publisher.records().len(), 2);
        assert_eq!(publisher.on_topic("b")[0].key.as_deref(), Some("2"));
        assert_eq!(publisher.drain().len(), 2);
        assert!(publisher.records().is_empty());
    }

    #[tokio::test]
    async fn injected_failure() {
        let publisher = RecordingPublisher::new();
        publisher.fail_with(Some(PublishError::QueueFull));
        let result = publisher
            .publish(OutboundRecord::new("a", "1", Vec::new()))
            .await;
        assert_eq!(result, Err(PublishError::QueueFull));
        assert!(publisher.records().is_empty());
    }
}
