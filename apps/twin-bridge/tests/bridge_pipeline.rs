//! End-to-end pipeline tests.
//!
//! Registry frames go through the forwarder, the published records are fed
//! back through the same handler registry the Kafka consumers use, and the
//! results are read from the in-memory catalog and store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use twin_bridge::application::ports::{
    InboundRecord, NotificationType, Notifier, OutboundRecord, RegistryEventHandler,
    RepositoryError, TimeRange, TimeSeriesStore,
};
use twin_bridge::application::services::MlPolicy;
use twin_bridge::domain::events::{RegistryEvent, topics};
use twin_bridge::domain::timeseries::{AggregateInterval, SampleValue, ValueKind};
use twin_bridge::infrastructure::broker::{
    ERROR_HEADER, HandlerRegistry, ORIGINAL_TOPIC_HEADER, RecordingPublisher,
};
use twin_bridge::infrastructure::persistence::{InMemoryCatalog, InMemoryTimeSeriesStore};
use twin_bridge::{Pipeline, PipelineDeps};

// =============================================================================
// Harness
// =============================================================================

/// Notifier that keeps every project and topic notification.
#[derive(Default)]
struct CapturingNotifier {
    sent: parking_lot::Mutex<Vec<(NotificationType, String)>>,
}

impl Notifier for CapturingNotifier {
    fn broadcast(&self, kind: NotificationType, topic: &str, _payload: serde_json::Value) {
        self.sent.lock().push((kind, topic.to_string()));
    }

    fn notify_project(
        &self,
        _project_id: i64,
        kind: NotificationType,
        topic: &str,
        _payload: serde_json::Value,
    ) {
        self.sent.lock().push((kind, topic.to_string()));
    }

    fn notify_topic(&self, topic: &str, kind: NotificationType, _payload: serde_json::Value) {
        self.sent.lock().push((kind, topic.to_string()));
    }
}

struct Harness {
    catalog: Arc<InMemoryCatalog>,
    store: Arc<InMemoryTimeSeriesStore>,
    producer: Arc<RecordingPublisher>,
    dlq: Arc<RecordingPublisher>,
    notifier: Arc<CapturingNotifier>,
    forwarder: Arc<dyn RegistryEventHandler>,
    consumers: HandlerRegistry,
    delivered: Vec<OutboundRecord>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

impl Harness {
    fn new() -> Self {
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.add_project_with_id(7, "Plant");
        let store = Arc::new(InMemoryTimeSeriesStore::new());
        let producer = Arc::new(RecordingPublisher::new());
        let dlq = Arc::new(RecordingPublisher::new());
        let notifier = Arc::new(CapturingNotifier::default());

        let mut pipeline = Pipeline::new(PipelineDeps {
            twins: catalog.clone(),
            projects: catalog.clone(),
            twin_types: catalog.clone(),
            store: store.clone(),
            publisher: producer.clone(),
            notifier: notifier.clone(),
            ml_policy: MlPolicy::all(),
        });

        let mut consumers = HandlerRegistry::new(dlq.clone());
        for binding in pipeline.consumer_bindings() {
            consumers.register(binding.topic, Arc::clone(&binding.handler));
        }

        let cancel = CancellationToken::new();
        let worker = tokio::spawn(pipeline.take_worker().unwrap().run(cancel.clone()));

        Self {
            catalog,
            store,
            producer,
            dlq,
            notifier,
            forwarder: pipeline.registry_handler(),
            consumers,
            delivered: Vec::new(),
            cancel,
            worker,
        }
    }

    /// Push a registry frame and deliver everything it produces, including
    /// records produced by the consumers themselves.
    async fn push(&mut self, frame: serde_json::Value) {
        self.forward(frame).await;
        self.deliver().await;
    }

    /// Hand a registry frame to the forwarder without consuming anything.
    async fn forward(&self, frame: serde_json::Value) {
        let event = RegistryEvent::parse(&frame.to_string()).unwrap();
        self.forwarder.on_event(&event).await;
    }

    /// Consume everything produced so far, in produce order.
    async fn deliver(&mut self) {
        loop {
            let batch = self.producer.drain();
            if batch.is_empty() {
                break;
            }
            for record in batch {
                self.consumers.dispatch(&inbound(&record)).await;
                self.delivered.push(record);
            }
        }
    }

    fn delivered_on(&self, topic: &str) -> Vec<&OutboundRecord> {
        self.delivered.iter().filter(|r| r.topic == topic).collect()
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.worker.await.unwrap();
    }
}

fn inbound(record: &OutboundRecord) -> InboundRecord {
    let mut inbound = InboundRecord::new(record.topic.as_str(), "", record.payload.clone());
    inbound.key.clone_from(&record.key);
    inbound.headers.clone_from(&record.headers);
    inbound.timestamp = Some(record.timestamp);
    inbound
}

fn created_pump() -> serde_json::Value {
    json!({
        "topic": "/ns/twinA/things/twin/events/created",
        "path": "/",
        "value": {"attributes": {"name": "Pump-1", "projectId": 7}}
    })
}

fn renamed_pump(name: &str) -> serde_json::Value {
    json!({
        "topic": "/ns/twinA/things/twin/events/modified",
        "path": "/",
        "value": {"attributes": {"name": name}}
    })
}

fn feature_change(value: serde_json::Value, timestamp: &str) -> serde_json::Value {
    json!({
        "topic": "/ns/twinA/things/twin/events/modified",
        "path": "/features/temp/properties/value",
        "value": value,
        "timestamp": timestamp
    })
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn twin_created_from_registry() {
    let mut harness = Harness::new();

    harness.push(created_pump()).await;

    let published = harness.delivered_on(topics::REGISTRY_EVENTS);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key.as_deref(), Some("twinA"));
    assert!(harness.delivered_on(topics::TIME_SERIES).is_empty());

    let twins = harness.catalog.all_twins();
    assert_eq!(twins.len(), 1);
    assert_eq!(twins[0].registry_id, "twinA");
    assert_eq!(twins[0].name, "Pump-1");
    assert_eq!(twins[0].project_id, 7);

    assert!(
        harness
            .notifier
            .sent
            .lock()
            .contains(&(NotificationType::TwinUpdate, "twin.twinA".to_string()))
    );
    assert!(harness.dlq.records().is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn repeated_created_event_keeps_one_twin() {
    let mut harness = Harness::new();

    harness.push(created_pump()).await;
    harness.push(created_pump()).await;

    assert_eq!(harness.delivered_on(topics::REGISTRY_EVENTS).len(), 2);
    assert_eq!(harness.catalog.live_twins_with("twinA"), 1);
    assert_eq!(harness.catalog.all_twins()[0].name, "Pump-1");
    assert!(harness.dlq.records().is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn modifications_apply_in_produce_order() {
    let mut harness = Harness::new();
    harness.push(created_pump()).await;

    harness.forward(renamed_pump("Pump-2")).await;
    harness.forward(renamed_pump("Pump-3")).await;
    harness.deliver().await;

    let names: Vec<serde_json::Value> = harness
        .delivered_on(topics::REGISTRY_EVENTS)
        .iter()
        .skip(1)
        .map(|r| {
            let record: serde_json::Value = serde_json::from_slice(&r.payload).unwrap();
            record["payload"]["attributes"]["name"].clone()
        })
        .collect();
    assert_eq!(names, [json!("Pump-2"), json!("Pump-3")]);

    let twins = harness.catalog.all_twins();
    assert_eq!(twins.len(), 1);
    assert_eq!(twins[0].name, "Pump-3");
    assert!(harness.dlq.records().is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn modification_of_unknown_twin_is_dead_lettered() {
    let mut harness = Harness::new();

    harness
        .push(json!({
            "topic": "/ns/ghost/things/twin/events/modified",
            "path": "/",
            "value": {"attributes": {"name": "Ghost"}}
        }))
        .await;

    assert!(harness.catalog.all_twins().is_empty());
    let dead = harness.dlq.on_topic("registry-events.dlq");
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].key.as_deref(), Some("ghost"));
    assert!(
        dead[0]
            .header(ERROR_HEADER)
            .is_some_and(|e| e.contains("twin not found: ghost"))
    );

    harness.stop().await;
}

#[tokio::test]
async fn numeric_feature_sample_is_stored() {
    let mut harness = Harness::new();
    harness.push(created_pump()).await;

    harness
        .push(feature_change(json!(42.5), "2024-01-01T00:00:00Z"))
        .await;

    assert_eq!(harness.delivered_on(topics::TIME_SERIES).len(), 1);
    assert_eq!(harness.delivered_on(topics::ML_INPUT).len(), 1);

    let samples = harness.store.all_samples();
    assert_eq!(samples.len(), 1);
    let sample = &samples[0];
    assert_eq!(sample.twin_id, "twinA");
    assert_eq!(sample.feature_path, "temp");
    assert_eq!(sample.value.kind(), ValueKind::Number);
    assert_eq!(sample.value, SampleValue::Number(42.5));
    assert_eq!(sample.time, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    assert_eq!(sample.source, "registry");

    // The registry-events copy of a feature change leaves the twin alone.
    assert_eq!(harness.catalog.all_twins()[0].name, "Pump-1");
    assert!(harness.dlq.records().is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn object_sample_is_kept_out_of_aggregates() {
    let mut harness = Harness::new();
    harness.push(created_pump()).await;

    harness
        .push(feature_change(json!(10.0), "2024-01-01T00:00:10Z"))
        .await;
    harness
        .push(feature_change(json!({"x": 1}), "2024-01-01T00:00:20Z"))
        .await;
    harness
        .push(feature_change(json!(20.0), "2024-01-01T00:00:30Z"))
        .await;

    let samples = harness.store.all_samples();
    assert_eq!(samples.len(), 3);
    let object = samples
        .iter()
        .find(|s| s.value.kind() == ValueKind::Object)
        .unwrap();
    assert_eq!(object.value.as_json(), Some(&json!({"x": 1})));

    let range = TimeRange::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
    );
    let buckets = harness
        .store
        .aggregates("twinA", "temp", range, AggregateInterval::OneHour)
        .await
        .unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].count, 2);
    assert!((buckets[0].min - 10.0).abs() < f64::EPSILON);
    assert!((buckets[0].max - 20.0).abs() < f64::EPSILON);
    assert!((buckets[0].avg - 15.0).abs() < f64::EPSILON);

    harness.stop().await;
}

#[tokio::test]
async fn failed_reconciliation_is_dead_lettered_and_consumption_continues() {
    let mut harness = Harness::new();
    harness.push(created_pump()).await;

    harness
        .catalog
        .fail_updates(Some(RepositoryError::Database("simulated outage".to_string())));
    harness
        .push(json!({
            "topic": "/ns/twinA/things/twin/events/modified",
            "path": "/",
            "value": {"attributes": {"name": "Pump-2"}}
        }))
        .await;

    let dead = harness.dlq.on_topic("registry-events.dlq");
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].key.as_deref(), Some("twinA"));
    assert_eq!(
        dead[0].header(ORIGINAL_TOPIC_HEADER),
        Some(topics::REGISTRY_EVENTS)
    );
    assert!(dead[0].header(ERROR_HEADER).is_some_and(|e| !e.is_empty()));
    assert_eq!(harness.catalog.all_twins()[0].name, "Pump-1");

    harness.catalog.fail_updates(None);
    harness
        .push(json!({
            "topic": "/ns/twinB/things/twin/events/created",
            "path": "/",
            "value": {"attributes": {"name": "Valve-1", "projectId": 7}}
        }))
        .await;
    harness
        .push(feature_change(json!(3.5), "2024-01-01T00:00:00Z"))
        .await;

    assert_eq!(harness.catalog.live_twins_with("twinB"), 1);
    assert_eq!(harness.store.all_samples().len(), 1);
    assert_eq!(harness.dlq.records().len(), 1);

    harness.stop().await;
}

#[tokio::test]
async fn malformed_time_series_record_is_dead_lettered() {
    let harness = Harness::new();

    let outcome = harness
        .consumers
        .dispatch(&InboundRecord::new(
            topics::TIME_SERIES,
            "twinA",
            b"{not json".to_vec(),
        ))
        .await;

    assert_eq!(outcome.failed, 1);
    let dead = harness.dlq.on_topic(&topics::dlq(topics::TIME_SERIES));
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].payload, b"{not json".to_vec());
    assert!(harness.store.all_samples().is_empty());

    harness.stop().await;
}
