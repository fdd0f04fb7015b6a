//! WebSocket Pass-Through
//!
//! Republishes every registry event onto `registry-events`, and feature
//! changes additionally onto `time-series`. Both are keyed by the twin's
//! registry id so per-twin order survives partitioning.

use std::sync::Arc;

use async_trait::async_trait;

use crate::application::ports::{
    EventPublisher, OutboundRecord, PublishError, RegistryEventHandler,
};
use crate::domain::events::{RegistryEvent, RegistryEventRecord, TimeSeriesRecord, topics};

/// Registry event handler that forwards events to the broker.
pub struct EventForwarder {
    publisher: Arc<dyn EventPublisher>,
}

impl EventForwarder {
    /// Create a forwarder producing through `publisher`.
    #[must_use]
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    async fn send(&self, topic: &str, key: &str, record: Result<OutboundRecord, PublishError>) {
        let result = match record {
            Ok(record) => self.publisher.publish(record).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::error!(topic, twin_id = key, error = %e, "Failed to forward registry event");
        }
    }
}

#[async_trait]
impl RegistryEventHandler for EventForwarder {
    async fn on_event(&self, event: &RegistryEvent) {
        let Some(twin_id) = event.twin_id.as_deref() else {
            tracing::warn!(topic = %event.topic, "Registry event without twin id");
            return;
        };
        let action = event.action.clone().unwrap_or_default();
        let timestamp = event.occurred_at();

        let lifecycle = RegistryEventRecord {
            twin_id: twin_id.to_string(),
            action,
            timestamp,
            payload: event.value.clone(),
        };
        self.send(
            topics::REGISTRY_EVENTS,
            twin_id,
            OutboundRecord::json(topics::REGISTRY_EVENTS, twin_id, &lifecycle)
                .map(|r| r.with_timestamp(timestamp)),
        )
        .await;

        let Some(feature_id) = event.feature_id.as_deref() else {
            return;
        };
        if !event.twin_action().is_some_and(|a| a.carries_sample()) {
            return;
        }

        let sample = TimeSeriesRecord {
            twin_id: twin_id.to_string(),
            feature_id: feature_id.to_string(),
            timestamp,
            data: event.value.clone(),
        };
        self.send(
            topics::TIME_SERIES,
            twin_id,
            OutboundRecord::json(topics::TIME_SERIES, twin_id, &sample)
                .map(|r| r.with_timestamp(timestamp)),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct Capture {
        records: Mutex<Vec<OutboundRecord>>,
        fail: bool,
    }

    #[async_trait]
    impl EventPublisher for Capture {
        async fn publish(&self, record: OutboundRecord) -> Result<(), PublishError> {
            if self.fail {
                return Err(PublishError::BrokerUnavailable("down".to_string()));
            }
            self.records.lock().push(record);
            Ok(())
        }

        async fn publish_sync(&self, record: OutboundRecord) -> Result<(), PublishError> {
            self.publish(record).await
        }

        fn flush(&self, _timeout: Duration) -> usize {
            0
        }
    }

    fn frame(topic: &str, path: &str, value: &str) -> RegistryEvent {
        RegistryEvent::parse(&format!(
            r#"{{"topic":"{topic}","path":"{path}","value":{value},"timestamp":"2024-01-01T00:00:00Z"}}"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn lifecycle_event_goes_to_registry_events_only() {
        let capture = Arc::new(Capture::default());
        let forwarder = EventForwarder::new(capture.clone());

        forwarder
            .on_event(&frame(
                "/ns/twinA/things/twin/events/created",
                "/",
                r#"{"attributes":{"name":"Pump-1","projectId":7}}"#,
            ))
            .await;

        let records = capture.records.lock();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].topic, "registry-events");
        assert_eq!(records[0].key.as_deref(), Some("twinA"));
        let body: serde_json::Value = serde_json::from_slice(&records[0].payload).unwrap();
        assert_eq!(body["twinId"], "twinA");
        assert_eq!(body["action"], "created");
        assert_eq!(body["payload"]["attributes"]["name"], "Pump-1");
    }

    #[tokio::test]
    async fn feature_change_is_split_onto_time_series() {
        let capture = Arc::new(Capture::default());
        let forwarder = EventForwarder::new(capture.clone());

        forwarder
            .on_event(&frame(
                "/ns/twinA/things/twin/events/modified",
                "/features/temp/properties/value",
                "42.5",
            ))
            .await;

        let records = capture.records.lock();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].topic, "time-series");
        assert_eq!(records[1].key.as_deref(), Some("twinA"));
        let body: serde_json::Value = serde_json::from_slice(&records[1].payload).unwrap();
        assert_eq!(body["featureId"], "temp");
        assert_eq!(body["data"], 42.5);
        assert_eq!(body["timestamp"], "2024-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn deleted_feature_is_not_sampled() {
        let capture = Arc::new(Capture::default());
        let forwarder = EventForwarder::new(capture.clone());

        forwarder
            .on_event(&frame(
                "/ns/twinA/things/twin/events/deleted",
                "/features/temp",
                "null",
            ))
            .await;

        assert_eq!(capture.records.lock().len(), 1);
    }

    #[tokio::test]
    async fn events_without_twin_are_dropped() {
        let capture = Arc::new(Capture::default());
        let forwarder = EventForwarder::new(capture.clone());

        forwarder.on_event(&frame("/short/topic", "/", "1")).await;

        assert!(capture.records.lock().is_empty());
    }

    #[tokio::test]
    async fn publish_failures_do_not_panic() {
        let capture = Arc::new(Capture {
            fail: true,
            ..Capture::default()
        });
        let forwarder = EventForwarder::new(capture.clone());

        forwarder
            .on_event(&frame(
                "/ns/twinA/things/twin/events/modified",
                "/features/temp/properties/value",
                "1",
            ))
            .await;

        assert!(capture.records.lock().is_empty());
    }
}
