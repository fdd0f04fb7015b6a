//! Sample Ingestion
//!
//! Consumes `time-series`, stores one classified sample per record, fans the
//! update out to browser subscribers and forwards it to `ml-input` when ML is
//! enabled for the feature.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::application::ports::{
    EventPublisher, HandlerError, InboundRecord, MessageHandler, NotificationType, Notifier,
    OutboundRecord, TimeSeriesStore,
};
use crate::domain::events::{MlInputRecord, TimeSeriesRecord, topics};
use crate::domain::timeseries::{REGISTRY_SOURCE, Sample, classify_value};

/// Which features are forwarded to ML.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MlPolicy {
    enabled: HashSet<String>,
}

impl MlPolicy {
    /// Policy enabling every feature.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Policy from an allow-list; an empty list enables every feature.
    #[must_use]
    pub fn from_features<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: features.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether records for `feature_id` go to `ml-input`.
    #[must_use]
    pub fn is_enabled_for(&self, feature_id: &str) -> bool {
        self.enabled.is_empty() || self.enabled.contains(feature_id)
    }
}

/// `time-series` handler.
pub struct SampleIngestor {
    store: Arc<dyn TimeSeriesStore>,
    publisher: Arc<dyn EventPublisher>,
    notifier: Arc<dyn Notifier>,
    ml_policy: MlPolicy,
}

impl SampleIngestor {
    /// Create the handler.
    #[must_use]
    pub fn new(
        store: Arc<dyn TimeSeriesStore>,
        publisher: Arc<dyn EventPublisher>,
        notifier: Arc<dyn Notifier>,
        ml_policy: MlPolicy,
    ) -> Self {
        Self {
            store,
            publisher,
            notifier,
            ml_policy,
        }
    }

    async fn forward_to_ml(&self, record: TimeSeriesRecord) {
        let feature_id = record.feature_id.clone();
        let input = MlInputRecord {
            model_id: feature_id.clone(),
            timestamp: record.timestamp,
            input: record,
        };

        let result = match OutboundRecord::json(topics::ML_INPUT, feature_id.as_str(), &input) {
            Ok(out) => self.publisher.publish(out.with_timestamp(input.timestamp)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::error!(
                twin_id = %input.input.twin_id,
                feature_id = %feature_id,
                error = %e,
                "Failed to publish ML input"
            );
        }
    }
}

#[async_trait]
impl MessageHandler for SampleIngestor {
    async fn handle(&self, record: &InboundRecord) -> Result<(), HandlerError> {
        let data: TimeSeriesRecord = serde_json::from_slice(&record.payload)?;

        let sample = Sample {
            time: data.timestamp,
            twin_id: data.twin_id.clone(),
            feature_path: data.feature_id.clone(),
            value: classify_value(data.data.clone()),
            source: REGISTRY_SOURCE.to_string(),
        };
        self.store.insert_samples(std::slice::from_ref(&sample)).await?;
        metrics::counter!("twin_bridge_samples_written_total").increment(1);

        tracing::debug!(
            twin_id = %sample.twin_id,
            feature_id = %sample.feature_path,
            kind = sample.value.kind().as_str(),
            "Sample stored"
        );

        self.notifier.notify_topic(
            &format!("twin.{}", data.twin_id),
            NotificationType::TwinUpdate,
            serde_json::json!({
                "twinId": data.twin_id,
                "featureId": data.feature_id,
                "timestamp": data.timestamp,
                "value": data.data,
            }),
        );

        if self.ml_policy.is_enabled_for(&data.feature_id) {
            self.forward_to_ml(data).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use serde_json::json;

    use super::*;
    use crate::application::ports::{MockTimeSeriesStore, NoOpNotifier, NoOpPublisher, RepositoryError};
    use crate::domain::timeseries::SampleValue;

    fn record(data: serde_json::Value) -> InboundRecord {
        let body = json!({
            "twinId": "twinA",
            "featureId": "temp",
            "timestamp": "2024-01-01T00:00:00Z",
            "data": data,
        });
        InboundRecord::new("time-series", "twinA", serde_json::to_vec(&body).unwrap())
    }

    #[test]
    fn empty_policy_enables_everything() {
        assert!(MlPolicy::all().is_enabled_for("anything"));
        let policy = MlPolicy::from_features(["temp"]);
        assert!(policy.is_enabled_for("temp"));
        assert!(!policy.is_enabled_for("pressure"));
    }

    #[tokio::test]
    async fn stores_classified_sample() {
        let expected_time: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let mut store = MockTimeSeriesStore::new();
        store
            .expect_insert_samples()
            .withf(move |samples| {
                samples.len() == 1
                    && samples[0].value == SampleValue::Number(42.5)
                    && samples[0].time == expected_time
                    && samples[0].source == "registry"
                    && samples[0].feature_path == "temp"
            })
            .times(1)
            .returning(|_| Ok(()));

        let ingestor = SampleIngestor::new(
            Arc::new(store),
            Arc::new(NoOpPublisher),
            Arc::new(NoOpNotifier),
            MlPolicy::all(),
        );

        ingestor.handle(&record(json!(42.5))).await.unwrap();
    }

    #[tokio::test]
    async fn storage_failure_is_a_handler_error() {
        let mut store = MockTimeSeriesStore::new();
        store
            .expect_insert_samples()
            .returning(|_| Err(RepositoryError::Database("down".to_string())));

        let ingestor = SampleIngestor::new(
            Arc::new(store),
            Arc::new(NoOpPublisher),
            Arc::new(NoOpNotifier),
            MlPolicy::all(),
        );

        let err = ingestor.handle(&record(json!(1))).await.unwrap_err();
        assert_eq!(err.kind(), "storage");
    }

    #[tokio::test]
    async fn malformed_payload_is_a_protocol_error() {
        let ingestor = SampleIngestor::new(
            Arc::new(MockTimeSeriesStore::new()),
            Arc::new(NoOpPublisher),
            Arc::new(NoOpNotifier),
            MlPolicy::all(),
        );
        let bad = InboundRecord::new("time-series", "twinA", br#"{"twinId":"a","timestamp":"yesterday"}"#.to_vec());

        let err = ingestor.handle(&bad).await.unwrap_err();
        assert_eq!(err.kind(), "protocol");
    }
}
