//! Kafka Consumers and Handler Dispatch
//!
//! [`HandlerRegistry`] holds the per-topic handler lists and implements the
//! dead-letter policy independently of librdkafka. [`KafkaConsumer`] feeds
//! it from a `StreamConsumer`.
//!
//! # Dead Letters
//!
//! When a handler fails, the record is copied to `<topic>.dlq` with the
//! same key and payload, its original headers, and two more:
//!
//! - `error`: the handler error
//! - `original_topic`: the source topic
//!
//! Consumption continues and the offset is committed as usual.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use tokio_util::sync::CancellationToken;

use super::client::consumer_config;
use super::error::BrokerError;
use crate::application::ports::{EventPublisher, InboundRecord, MessageHandler, OutboundRecord};
use crate::application::services::ProcessedSignal;
use crate::domain::events::topics;
use crate::infrastructure::config::KafkaSettings;
use crate::infrastructure::metrics;

/// Header carrying the handler error on a dead-letter record.
pub const ERROR_HEADER: &str = "error";

/// Header carrying the source topic on a dead-letter record.
pub const ORIGINAL_TOPIC_HEADER: &str = "original_topic";

/// Pause after a receive error.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(500);

// =============================================================================
// Handler Registry
// =============================================================================

/// Result of dispatching one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchOutcome {
    /// Handlers invoked.
    pub handled: usize,
    /// Handlers that failed.
    pub failed: usize,
    /// Dead-letter records that could not be published.
    pub dlq_failed: usize,
}

/// Per-topic handlers in registration order.
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<Arc<dyn MessageHandler>>>,
    dlq: Arc<dyn EventPublisher>,
    processed: Option<ProcessedSignal>,
}

impl HandlerRegistry {
    /// Create an empty registry publishing dead letters through `dlq`.
    #[must_use]
    pub fn new(dlq: Arc<dyn EventPublisher>) -> Self {
        Self {
            handlers: HashMap::new(),
            dlq,
            processed: None,
        }
    }

    /// Signal `processed` once per dispatched record.
    #[must_use]
    pub fn with_processed_signal(mut self, processed: ProcessedSignal) -> Self {
        self.processed = Some(processed);
        self
    }

    /// Append a handler for `topic`.
    pub fn register(&mut self, topic: &str, handler: Arc<dyn MessageHandler>) {
        self.handlers
            .entry(topic.to_string())
            .or_default()
            .push(handler);
    }

    /// Number of handlers registered for `topic`.
    #[must_use]
    pub fn handler_count(&self, topic: &str) -> usize {
        self.handlers.get(topic).map_or(0, Vec::len)
    }

    /// Run every handler for the record's topic, dead-lettering failures.
    pub async fn dispatch(&self, record: &InboundRecord) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let Some(handlers) = self.handlers.get(&record.topic) else {
            tracing::debug!(topic = %record.topic, "No handlers for topic");
            return outcome;
        };

        for handler in handlers {
            outcome.handled += 1;
            let Err(e) = handler.handle(record).await else {
                continue;
            };

            outcome.failed += 1;
            metrics::record_handler_failure(&record.topic, e.kind());
            tracing::error!(
                topic = %record.topic,
                key = record.key.as_deref().unwrap_or_default(),
                partition = record.partition,
                offset = record.offset,
                kind = e.kind(),
                error = %e,
                "Handler failed, sending record to DLQ"
            );

            if !self.dead_letter(record, &e.to_string()).await {
                outcome.dlq_failed += 1;
            }
        }

        if let Some(processed) = &self.processed {
            processed.signal();
        }
        outcome
    }

    async fn dead_letter(&self, record: &InboundRecord, error: &str) -> bool {
        let dlq_topic = topics::dlq(&record.topic);
        let mut dead = OutboundRecord::new(dlq_topic.as_str(), "", record.payload.clone());
        dead.key.clone_from(&record.key);
        dead.headers.clone_from(&record.headers);
        let dead = dead
            .with_header(ERROR_HEADER, error)
            .with_header(ORIGINAL_TOPIC_HEADER, record.topic.as_str());

        match self.dlq.publish(dead).await {
            Ok(()) => {
                metrics::record_dlq(&record.topic);
                true
            }
            Err(e) => {
                tracing::error!(topic = %dlq_topic, error = %e, "Failed to publish to DLQ");
                false
            }
        }
    }
}

// =============================================================================
// Kafka Consumer
// =============================================================================

/// One `StreamConsumer` subscribed to a single topic.
pub struct KafkaConsumer {
    name: String,
    topic: String,
    consumer: StreamConsumer,
    registry: Arc<HandlerRegistry>,
}

impl KafkaConsumer {
    /// Create a consumer named `<name>-<topic>` in the shared group.
    ///
    /// # Errors
    ///
    /// Returns `Client` if librdkafka rejects the configuration or the
    /// subscription.
    pub fn new(
        settings: &KafkaSettings,
        name: &str,
        topic: &str,
        registry: Arc<HandlerRegistry>,
    ) -> Result<Self, BrokerError> {
        let client_id = format!("{name}-{topic}");
        let consumer: StreamConsumer = consumer_config(settings, &client_id).create()?;
        consumer.subscribe(&[topic])?;

        tracing::info!(
            consumer = %client_id,
            topic,
            group = %settings.consumer_group,
            "Kafka consumer created"
        );

        Ok(Self {
            name: client_id,
            topic: topic.to_string(),
            consumer,
            registry,
        })
    }

    /// Consumer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consume until cancelled. The record in progress finishes first.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(consumer = %self.name, topic = %self.topic, "Consumer started");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                received = self.consumer.recv() => match received {
                    Ok(message) => {
                        let record = inbound_record(&message);
                        metrics::record_consumed(&record.topic);
                        self.registry.dispatch(&record).await;
                    }
                    Err(e) => {
                        tracing::warn!(consumer = %self.name, error = %e, "Kafka receive error");
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(RECV_ERROR_BACKOFF) => {}
                        }
                    }
                },
            }
        }

        self.consumer.unsubscribe();
        tracing::info!(consumer = %self.name, "Consumer stopped");
    }
}

/// Copy a borrowed message into an owned record.
fn inbound_record(message: &BorrowedMessage<'_>) -> InboundRecord {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| {
                    (
                        h.key.to_string(),
                        h.value
                            .map(|v| String::from_utf8_lossy(v).into_owned())
                            .unwrap_or_default(),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    InboundRecord {
        topic: message.topic().to_string(),
        key: message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned()),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        headers,
        timestamp: message
            .timestamp()
            .to_millis()
            .and_then(DateTime::from_timestamp_millis),
        partition: message.partition(),
        offset: message.offset(),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::HandlerError;
    use crate::application::ports::PublishError;
    use crate::infrastructure::broker::RecordingPublisher;

    struct Scripted {
        fail: bool,
        calls: parking_lot::Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail,
                calls: parking_lot::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MessageHandler for Scripted {
        async fn handle(&self, record: &InboundRecord) -> Result<(), HandlerError> {
            self.calls.lock().push(record.key.clone().unwrap_or_default());
            if self.fail {
                Err(HandlerError::Reconciliation("missing project".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn record(key: &str) -> InboundRecord {
        let mut record =
            InboundRecord::new(topics::REGISTRY_EVENTS, key, br#"{"twinId":"twinA"}"#.to_vec());
        record.headers.push(("trace".to_string(), "abc".to_string()));
        record
    }

    #[tokio::test]
    async fn failing_handler_dead_letters_original_record() {
        let dlq = Arc::new(RecordingPublisher::new());
        let mut registry = HandlerRegistry::new(dlq.clone());
        registry.register(topics::REGISTRY_EVENTS, Scripted::new(true));

        let outcome = registry.dispatch(&record("twinA")).await;

        assert_eq!(outcome.failed, 1);
        let dead = dlq.on_topic("registry-events.dlq");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].key.as_deref(), Some("twinA"));
        assert_eq!(dead[0].payload, br#"{"twinId":"twinA"}"#);
        assert_eq!(dead[0].header(ORIGINAL_TOPIC_HEADER), Some("registry-events"));
        assert!(!dead[0].header(ERROR_HEADER).unwrap_or_default().is_empty());
        assert_eq!(dead[0].header("trace"), Some("abc"));
    }

    #[tokio::test]
    async fn keyless_record_stays_keyless_on_dlq() {
        let dlq = Arc::new(RecordingPublisher::new());
        let mut registry = HandlerRegistry::new(dlq.clone());
        registry.register(topics::REGISTRY_EVENTS, Scripted::new(true));

        let mut keyless = record("twinA");
        keyless.key = None;
        registry.dispatch(&keyless).await;

        let dead = dlq.on_topic("registry-events.dlq");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].key, None);
    }

    #[tokio::test]
    async fn handlers_run_in_order_even_after_failure() {
        let dlq = Arc::new(RecordingPublisher::new());
        let first = Scripted::new(true);
        let second = Scripted::new(false);
        let mut registry = HandlerRegistry::new(dlq.clone());
        registry.register(topics::REGISTRY_EVENTS, first.clone());
        registry.register(topics::REGISTRY_EVENTS, second.clone());

        let outcome = registry.dispatch(&record("twinA")).await;
        let next = registry.dispatch(&record("twinB")).await;

        assert_eq!(outcome.handled, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(next.failed, 1);
        assert_eq!(*second.calls.lock(), ["twinA", "twinB"]);
        assert_eq!(dlq.on_topic("registry-events.dlq").len(), 2);
    }

    #[tokio::test]
    async fn success_writes_nothing_to_dlq() {
        let dlq = Arc::new(RecordingPublisher::new());
        let mut registry = HandlerRegistry::new(dlq.clone());
        registry.register(topics::REGISTRY_EVENTS, Scripted::new(false));

        let outcome = registry.dispatch(&record("twinA")).await;

        assert_eq!(outcome, DispatchOutcome { handled: 1, failed: 0, dlq_failed: 0 });
        assert!(dlq.records().is_empty());
    }

    #[tokio::test]
    async fn unknown_topic_is_ignored() {
        let registry = HandlerRegistry::new(Arc::new(RecordingPublisher::new()));
        let outcome = registry
            .dispatch(&InboundRecord::new("twin-state", "k", Vec::new()))
            .await;
        assert_eq!(outcome.handled, 0);
    }

    #[tokio::test]
    async fn dlq_publish_failure_is_counted() {
        let dlq = Arc::new(RecordingPublisher::new());
        dlq.fail_with(Some(PublishError::BrokerUnavailable("down".to_string())));
        let mut registry = HandlerRegistry::new(dlq);
        registry.register(topics::REGISTRY_EVENTS, Scripted::new(true));

        let outcome = registry.dispatch(&record("twinA")).await;

        assert_eq!(outcome.dlq_failed, 1);
    }
}
