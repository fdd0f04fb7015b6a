//! Kafka Producer
//!
//! `FutureProducer` wrapper implementing [`EventPublisher`]. Records are
//! enqueued without waiting; each delivery outcome is published on a
//! broadcast channel of [`DeliveryReport`]s.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tokio::sync::broadcast;

use super::client::producer_config;
use super::error::BrokerError;
use crate::application::ports::{EventPublisher, OutboundRecord, PublishError};
use crate::infrastructure::config::KafkaSettings;
use crate::infrastructure::metrics;

/// Flush budget used by [`KafkaProducer::close`].
pub const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `produce_sync` waits for a full local queue.
const QUEUE_TIMEOUT: Duration = Duration::from_secs(30);

const REPORT_CAPACITY: usize = 1024;

/// Outcome of one asynchronous delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Destination topic.
    pub topic: String,
    /// Record key.
    pub key: Option<String>,
    /// Failure message, `None` when delivered.
    pub error: Option<String>,
}

impl DeliveryReport {
    /// Whether the record reached the broker.
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        self.error.is_none()
    }
}

/// Kafka producer with acks-all delivery.
pub struct KafkaProducer {
    client_id: String,
    producer: FutureProducer,
    reports: broadcast::Sender<DeliveryReport>,
}

impl std::fmt::Debug for KafkaProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaProducer")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl KafkaProducer {
    /// Create a producer. No connection is made until the first record.
    ///
    /// # Errors
    ///
    /// Returns `Client` if librdkafka rejects the configuration.
    pub fn new(settings: &KafkaSettings, client_id: &str) -> Result<Self, BrokerError> {
        let producer: FutureProducer = producer_config(settings, client_id).create()?;
        let (reports, _) = broadcast::channel(REPORT_CAPACITY);
        tracing::info!(client_id, brokers = %settings.brokers, "Kafka producer created");

        Ok(Self {
            client_id: client_id.to_string(),
            producer,
            reports,
        })
    }

    /// Receive delivery reports from now on.
    #[must_use]
    pub fn delivery_reports(&self) -> broadcast::Receiver<DeliveryReport> {
        self.reports.subscribe()
    }

    /// Enqueue a record; the outcome arrives as a [`DeliveryReport`].
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` when the local queue is full and `Unavailable`
    /// or `Client` when librdkafka refuses the record.
    pub fn produce(&self, record: &OutboundRecord) -> Result<(), BrokerError> {
        let delivery = self
            .producer
            .send_result(future_record(record))
            .map_err(|(e, _)| BrokerError::from_produce(e))?;

        metrics::record_produced(&record.topic);

        let reports = self.reports.clone();
        let topic = record.topic.clone();
        let key = record.key.clone();
        tokio::spawn(async move {
            let error = match delivery.await {
                Ok(Ok(_)) => None,
                Ok(Err((e, _))) => Some(e.to_string()),
                Err(_) => Some("delivery cancelled".to_string()),
            };
            if let Some(error) = &error {
                metrics::record_produce_failure(&topic);
                tracing::error!(
                    topic = %topic,
                    key = key.as_deref().unwrap_or_default(),
                    error = %error,
                    "Record delivery failed"
                );
            }
            let _ = reports.send(DeliveryReport { topic, key, error });
        });

        Ok(())
    }

    /// Produce a record and wait for the broker to confirm it.
    ///
    /// # Errors
    ///
    /// See [`KafkaProducer::produce`]; delivery failures are reported too.
    pub async fn produce_sync(&self, record: &OutboundRecord) -> Result<(), BrokerError> {
        match self
            .producer
            .send(future_record(record), Timeout::After(QUEUE_TIMEOUT))
            .await
        {
            Ok(_) => {
                metrics::record_produced(&record.topic);
                Ok(())
            }
            Err((e, _)) => {
                metrics::record_produce_failure(&record.topic);
                Err(BrokerError::from_produce(e))
            }
        }
    }

    /// Records still queued or in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        usize::try_from(self.producer.in_flight_count()).unwrap_or(0)
    }

    /// Wait up to `timeout` for queued records; returns how many remain.
    pub fn flush_for(&self, timeout: Duration) -> usize {
        if let Err(e) = self.producer.flush(Timeout::After(timeout)) {
            tracing::debug!(client_id = %self.client_id, error = %e, "Producer flush incomplete");
        }
        self.in_flight()
    }

    /// Flush with a 5 second budget, warning about what is left.
    pub fn close(&self) {
        let remaining = self.flush_for(CLOSE_FLUSH_TIMEOUT);
        if remaining > 0 {
            tracing::warn!(
                client_id = %self.client_id,
                remaining,
                "Producer closed with undelivered records"
            );
        } else {
            tracing::info!(client_id = %self.client_id, "Producer closed");
        }
    }
}

/// Keyless records stay keyless on the wire.
fn future_record(record: &OutboundRecord) -> FutureRecord<'_, str, Vec<u8>> {
    let future_record = FutureRecord::to(&record.topic)
        .payload(&record.payload)
        .headers(owned_headers(record))
        .timestamp(record.timestamp.timestamp_millis());
    match record.key.as_deref() {
        Some(key) => future_record.key(key),
        None => future_record,
    }
}

fn owned_headers(record: &OutboundRecord) -> OwnedHeaders {
    record
        .headers
        .iter()
        .fold(OwnedHeaders::new(), |headers, (key, value)| {
            headers.insert(Header {
                key,
                value: Some(value.as_bytes()),
            })
        })
}

#[async_trait]
impl EventPublisher for KafkaProducer {
    async fn publish(&self, record: OutboundRecord) -> Result<(), PublishError> {
        Ok(self.produce(&record)?)
    }

    async fn publish_sync(&self, record: OutboundRecord) -> Result<(), PublishError> {
        Ok(self.produce_sync(&record).await?)
    }

    fn flush(&self, timeout: Duration) -> usize {
        self.flush_for(timeout)
    }
}

#[cfg(test)]
mod tests {
    use rdkafka::message::Headers;

    use super::*;

    #[test]
    fn headers_keep_order() {
        let record = OutboundRecord::new("t", "k", Vec::new())
            .with_header("error", "boom")
            .with_header("original_topic", "t");
        let headers = owned_headers(&record);

        assert_eq!(headers.count(), 2);
        let first = headers.get(0);
        assert_eq!(first.key, "error");
        assert_eq!(first.value, Some(b"boom".as_slice()));
        assert_eq!(headers.get(1).key, "original_topic");
    }

    #[test]
    fn keyless_record_has_no_key() {
        let mut record = OutboundRecord::new("t", "k", b"v".to_vec());
        assert_eq!(future_record(&record).key, Some("k"));

        record.key = None;
        assert_eq!(future_record(&record).key, None);
    }

    #[test]
    fn delivery_report_status() {
        let ok = DeliveryReport {
            topic: "t".to_string(),
            key: Some("k".to_string()),
            error: None,
        };
        assert!(ok.is_delivered());
    }

    #[tokio::test]
    async fn empty_producer_flushes_immediately() {
        let producer = KafkaProducer::new(&KafkaSettings::default(), "test-producer").unwrap();
        assert_eq!(producer.flush_for(Duration::from_millis(10)), 0);
        producer.close();
    }
}
