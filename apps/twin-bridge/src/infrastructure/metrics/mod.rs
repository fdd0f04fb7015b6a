//! Prometheus Metrics Module
//!
//! Exposes bridge metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Broker**: records produced, consumed, failed and dead-lettered
//! - **Registry**: events received, malformed frames, reconnects
//! - **Storage**: samples, predictions and alerts written
//! - **Notifications**: connected and dropped browser clients
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls return the same handle.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Broker
    describe_counter!(
        "twin_bridge_records_produced_total",
        "Records accepted by the broker producer"
    );
    describe_counter!(
        "twin_bridge_produce_failures_total",
        "Records the broker producer failed to deliver"
    );
    describe_counter!(
        "twin_bridge_records_consumed_total",
        "Records received by broker consumers"
    );
    describe_counter!(
        "twin_bridge_handler_failures_total",
        "Handler errors by topic and kind"
    );
    describe_counter!(
        "twin_bridge_dlq_records_total",
        "Records copied to a dead-letter topic"
    );
    describe_counter!(
        "twin_bridge_consumer_restarts_total",
        "Consumer loops restarted after a panic"
    );

    // Registry
    describe_counter!(
        "twin_bridge_registry_events_total",
        "Events received from the registry WebSocket"
    );
    describe_counter!(
        "twin_bridge_registry_protocol_errors_total",
        "Registry frames dropped as malformed"
    );
    describe_counter!(
        "twin_bridge_registry_reconnects_total",
        "Registry WebSocket reconnection attempts"
    );

    // Storage
    describe_counter!(
        "twin_bridge_samples_written_total",
        "Feature samples written to the time-series store"
    );
    describe_counter!(
        "twin_bridge_predictions_written_total",
        "ML predictions written to the time-series store"
    );
    describe_counter!(
        "twin_bridge_alerts_written_total",
        "Alerts written to the time-series store"
    );

    // Notifications
    describe_gauge!(
        "twin_bridge_notification_clients",
        "Connected notification clients"
    );
    describe_counter!(
        "twin_bridge_notification_clients_dropped_total",
        "Notification clients dropped for a full send queue"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a record accepted by the producer.
pub fn record_produced(topic: &str) {
    counter!("twin_bridge_records_produced_total", "topic" => topic.to_string()).increment(1);
}

/// Record a failed delivery.
pub fn record_produce_failure(topic: &str) {
    counter!("twin_bridge_produce_failures_total", "topic" => topic.to_string()).increment(1);
}

/// Record a record received by a consumer.
pub fn record_consumed(topic: &str) {
    counter!("twin_bridge_records_consumed_total", "topic" => topic.to_string()).increment(1);
}

/// Record a handler error.
pub fn record_handler_failure(topic: &str, kind: &'static str) {
    counter!(
        "twin_bridge_handler_failures_total",
        "topic" => topic.to_string(),
        "kind" => kind
    )
    .increment(1);
}

/// Record a dead-lettered record.
pub fn record_dlq(topic: &str) {
    counter!("twin_bridge_dlq_records_total", "topic" => topic.to_string()).increment(1);
}

/// Record a consumer restart after a panic.
pub fn record_consumer_restart(consumer: &str) {
    counter!(
        "twin_bridge_consumer_restarts_total",
        "consumer" => consumer.to_string()
    )
    .increment(1);
}

/// Record a registry event.
pub fn record_registry_event() {
    counter!("twin_bridge_registry_events_total").increment(1);
}

/// Record a malformed registry frame.
pub fn record_registry_protocol_error() {
    counter!("twin_bridge_registry_protocol_errors_total").increment(1);
}

/// Record a registry reconnect attempt.
pub fn record_registry_reconnect() {
    counter!("twin_bridge_registry_reconnects_total").increment(1);
}

/// Update the connected notification client count.
pub fn set_notification_clients(count: usize) {
    gauge!("twin_bridge_notification_clients").set(count as f64);
}

/// Record a notification client dropped for overflow.
pub fn record_notification_client_dropped() {
    counter!("twin_bridge_notification_clients_dropped_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_produced("registry-events");
        record_handler_failure("registry-events", "storage");
        set_notification_clients(3);
    }
}
