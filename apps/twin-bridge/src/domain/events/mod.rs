//! Registry Events and Broker Records
//!
//! Parses inbound registry frames into [`RegistryEvent`]s and defines the
//! JSON envelopes the bridge exchanges over the broker topics.
//!
//! # Topics
//!
//! | Topic             | Key          | Envelope                |
//! |-------------------|--------------|-------------------------|
//! | `registry-events` | registry id  | [`RegistryEventRecord`] |
//! | `time-series`     | registry id  | [`TimeSeriesRecord`]    |
//! | `ml-input`        | feature id   | [`MlInputRecord`]       |
//! | `ml-output`       | model id     | [`MlOutputRecord`]      |
//! | `<topic>.dlq`     | original key | original payload        |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::twin::TwinAction;

// =============================================================================
// Topics
// =============================================================================

/// Broker topic names.
pub mod topics {
    /// Registry lifecycle events republished from the WebSocket.
    pub const REGISTRY_EVENTS: &str = "registry-events";
    /// Feature samples extracted from registry events.
    pub const TIME_SERIES: &str = "time-series";
    /// Samples forwarded to the ML service.
    pub const ML_INPUT: &str = "ml-input";
    /// ML service results.
    pub const ML_OUTPUT: &str = "ml-output";
    /// Opaque twin state snapshots.
    pub const TWIN_STATE: &str = "twin-state";
    /// Opaque alert stream.
    pub const ALERTS: &str = "alerts";
    /// Suffix appended to a topic to form its dead-letter topic.
    pub const DLQ_SUFFIX: &str = ".dlq";

    /// Dead-letter topic for `topic`.
    #[must_use]
    pub fn dlq(topic: &str) -> String {
        format!("{topic}{DLQ_SUFFIX}")
    }
}

// =============================================================================
// Registry Event
// =============================================================================

/// Error raised for frames that do not follow the registry event protocol.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame is not a JSON event object.
    #[error("malformed registry frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),
}

/// Raw frame shape as sent by the registry.
#[derive(Debug, Clone, Deserialize)]
struct RegistryFrame {
    topic: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    revision: Option<i64>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    headers: Map<String, Value>,
    #[serde(default)]
    extra: Option<Value>,
}

/// A change event received from the registry, with the routing fields
/// derived from its topic and path.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEvent {
    /// Full registry topic.
    pub topic: String,
    /// JSON pointer into the thing the value belongs to.
    pub path: String,
    /// New value at `path`.
    pub value: Value,
    /// Thing revision after the change.
    pub revision: Option<i64>,
    /// Time the registry applied the change.
    pub timestamp: Option<DateTime<Utc>>,
    /// Protocol headers.
    pub headers: Map<String, Value>,
    /// Extra fields requested by the subscription.
    pub extra: Option<Value>,
    /// Twin registry id (2nd topic segment).
    pub twin_id: Option<String>,
    /// Action name (6th topic segment).
    pub action: Option<String>,
    /// Feature id when `path` points below `/features/<id>`.
    pub feature_id: Option<String>,
}

impl RegistryEvent {
    /// Parse a text frame into an event.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedFrame`] if the frame is not JSON,
    /// lacks a topic, or carries an unparseable timestamp.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let frame: RegistryFrame = serde_json::from_str(text)?;
        Ok(Self::from_frame(frame))
    }

    fn from_frame(frame: RegistryFrame) -> Self {
        let (twin_id, action) = split_topic(&frame.topic);
        let feature_id = feature_from_path(&frame.path);

        Self {
            topic: frame.topic,
            path: frame.path,
            value: frame.value,
            revision: frame.revision,
            timestamp: frame.timestamp,
            headers: frame.headers,
            extra: frame.extra,
            twin_id,
            action,
            feature_id,
        }
    }

    /// The lifecycle action, if it is one the catalog understands.
    #[must_use]
    pub fn twin_action(&self) -> Option<TwinAction> {
        self.action.as_deref().and_then(TwinAction::parse)
    }

    /// Event time, falling back to `now` when the frame had none.
    #[must_use]
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or_else(Utc::now)
    }
}

/// Extract `(twin_id, action)` from `/<ns>/<id>/things/twin/events/<action>`.
fn split_topic(topic: &str) -> (Option<String>, Option<String>) {
    let parts: Vec<&str> = topic.split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() < 6 {
        return (None, None);
    }
    (Some(parts[1].to_string()), Some(parts[5].to_string()))
}

/// Extract the feature id from `/features/<feature>/...`.
fn feature_from_path(path: &str) -> Option<String> {
    path.strip_prefix("/features/")
        .and_then(|rest| rest.split('/').next())
        .filter(|feature| !feature.is_empty())
        .map(str::to_string)
}

// =============================================================================
// Broker Envelopes
// =============================================================================

/// Payload on `registry-events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEventRecord {
    /// Twin registry id.
    pub twin_id: String,
    /// Action name.
    pub action: String,
    /// Event time.
    pub timestamp: DateTime<Utc>,
    /// Value carried by the registry event.
    #[serde(default)]
    pub payload: Value,
}

/// Payload on `time-series`, and the `input` of an `ml-input` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesRecord {
    /// Twin registry id.
    pub twin_id: String,
    /// Feature id.
    pub feature_id: String,
    /// Sample time.
    pub timestamp: DateTime<Utc>,
    /// Raw feature value.
    #[serde(default)]
    pub data: Value,
}

/// Payload on `ml-input`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MlInputRecord {
    /// Model routing id (the feature id).
    pub model_id: String,
    /// Time the input was forwarded.
    pub timestamp: DateTime<Utc>,
    /// The sample to score.
    pub input: TimeSeriesRecord,
}

/// Payload on `ml-output`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MlOutputRecord {
    /// Model that produced the result.
    pub model_id: String,
    /// Inference time.
    pub timestamp: DateTime<Utc>,
    /// Inference output.
    pub output: MlOutput,
}

/// Inference output for one twin feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MlOutput {
    /// Twin registry id.
    pub thing_id: String,
    /// Feature id.
    #[serde(default)]
    pub feature_id: String,
    /// Opaque result document.
    #[serde(default)]
    pub result: Value,
    /// Prediction kind name, `anomaly` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction_type: Option<String>,
    /// Model version, `1.0` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    /// Alert raised by the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<MlAlert>,
}

/// Alert block inside an ML output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MlAlert {
    /// Alert category.
    #[serde(rename = "type", default)]
    pub alert_type: String,
    /// Severity name.
    #[serde(default)]
    pub severity: String,
    /// Human readable description.
    #[serde(default)]
    pub description: String,
}
