//! Time-Series Types
//!
//! Rows of the four hypertables: feature samples, pre-computed rollups,
//! alerts and ML predictions. All rows are keyed by the twin's registry id,
//! not its catalog id, so history survives catalog re-creation.

mod classifier;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use classifier::{classify, classify_value};

/// Source tag for samples taken from registry events.
pub const REGISTRY_SOURCE: &str = "registry";

/// Source tag for alerts raised by the ML pipeline.
pub const ML_SOURCE: &str = "ml";

/// Model version recorded when the ML output does not name one.
pub const DEFAULT_MODEL_VERSION: &str = "1.0";

// =============================================================================
// Samples
// =============================================================================

/// Discriminator stored in `value_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// JSON number.
    Number,
    /// JSON boolean.
    Boolean,
    /// JSON string.
    String,
    /// Anything else, kept as raw JSON.
    Object,
}

impl ValueKind {
    /// Column value for `value_type`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Object => "object",
        }
    }
}

impl FromStr for ValueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "number" => Ok(Self::Number),
            "boolean" => Ok(Self::Boolean),
            "string" => Ok(Self::String),
            "object" => Ok(Self::Object),
            other => Err(format!("unknown value kind: {other}")),
        }
    }
}

/// A classified feature value. Exactly one typed column is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum SampleValue {
    /// Numeric reading.
    Number(f64),
    /// Boolean reading.
    Boolean(bool),
    /// Unquoted string reading.
    String(String),
    /// Structured or unparseable reading, stored as JSON.
    Object(serde_json::Value),
}

impl SampleValue {
    /// The discriminator for this value.
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Number(_) => ValueKind::Number,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::String(_) => ValueKind::String,
            Self::Object(_) => ValueKind::Object,
        }
    }

    /// Numeric column.
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Boolean column.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// String column.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Raw JSON column.
    #[must_use]
    pub const fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Object(v) => Some(v),
            _ => None,
        }
    }

    /// Rebuild a value from its stored columns.
    ///
    /// Returns `None` if the column for `kind` is null.
    #[must_use]
    pub fn from_columns(
        kind: ValueKind,
        number: Option<f64>,
        boolean: Option<bool>,
        string: Option<String>,
        json: Option<serde_json::Value>,
    ) -> Option<Self> {
        match kind {
            ValueKind::Number => number.map(Self::Number),
            ValueKind::Boolean => boolean.map(Self::Boolean),
            ValueKind::String => string.map(Self::String),
            ValueKind::Object => json.map(Self::Object),
        }
    }
}

/// One observation of a twin feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Observation time.
    pub time: DateTime<Utc>,
    /// Twin registry id.
    pub twin_id: String,
    /// Feature path (the feature id for registry samples).
    pub feature_path: String,
    /// Classified value.
    pub value: SampleValue,
    /// Origin tag.
    pub source: String,
}

// =============================================================================
// Aggregates
// =============================================================================

/// Granularity of a stored rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalType {
    /// Minute buckets.
    Minute,
    /// Hour buckets.
    Hour,
    /// Day buckets.
    Day,
    /// Week buckets.
    Week,
    /// Month buckets.
    Month,
}

impl IntervalType {
    /// Column value for `interval_type`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

/// Error for interval strings outside the accepted set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid interval: {0}")]
pub struct InvalidInterval(pub String);

/// A bucket width accepted by aggregate queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateInterval {
    /// `1m`
    OneMinute,
    /// `5m`
    FiveMinutes,
    /// `15m`
    FifteenMinutes,
    /// `30m`
    ThirtyMinutes,
    /// `1h`
    OneHour,
    /// `6h`
    SixHours,
    /// `12h`
    TwelveHours,
    /// `1d`
    OneDay,
    /// `1w`
    OneWeek,
    /// `1mon`
    OneMonth,
}

impl AggregateInterval {
    /// Every accepted interval, shortest first.
    pub const ALL: [Self; 10] = [
        Self::OneMinute,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::ThirtyMinutes,
        Self::OneHour,
        Self::SixHours,
        Self::TwelveHours,
        Self::OneDay,
        Self::OneWeek,
        Self::OneMonth,
    ];

    /// Short request form, e.g. `15m`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::SixHours => "6h",
            Self::TwelveHours => "12h",
            Self::OneDay => "1d",
            Self::OneWeek => "1w",
            Self::OneMonth => "1mon",
        }
    }

    /// Rollup granularity the interval is served from.
    #[must_use]
    pub const fn interval_type(self) -> IntervalType {
        match self {
            Self::OneMinute | Self::FiveMinutes | Self::FifteenMinutes | Self::ThirtyMinutes => {
                IntervalType::Minute
            }
            Self::OneHour | Self::SixHours | Self::TwelveHours => IntervalType::Hour,
            Self::OneDay => IntervalType::Day,
            Self::OneWeek => IntervalType::Week,
            Self::OneMonth => IntervalType::Month,
        }
    }

    /// Postgres interval literal for `time_bucket`.
    #[must_use]
    pub const fn bucket_width(self) -> &'static str {
        match self {
            Self::OneMinute => "1 minute",
            Self::FiveMinutes => "5 minutes",
            Self::FifteenMinutes => "15 minutes",
            Self::ThirtyMinutes => "30 minutes",
            Self::OneHour => "1 hour",
            Self::SixHours => "6 hours",
            Self::TwelveHours => "12 hours",
            Self::OneDay => "1 day",
            Self::OneWeek => "1 week",
            Self::OneMonth => "1 month",
        }
    }
}

impl FromStr for AggregateInterval {
    type Err = InvalidInterval;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|interval| interval.as_str() == s)
            .ok_or_else(|| InvalidInterval(s.to_string()))
    }
}

impl fmt::Display for AggregateInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistical rollup of numeric samples over one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    /// Bucket start.
    pub bucket: DateTime<Utc>,
    /// Twin registry id.
    pub twin_id: String,
    /// Feature path.
    pub feature_path: String,
    /// Rollup granularity.
    pub interval_type: IntervalType,
    /// Minimum value.
    pub min: f64,
    /// Maximum value.
    pub max: f64,
    /// Mean value.
    pub avg: f64,
    /// Sum of values.
    pub sum: f64,
    /// Number of samples.
    pub count: i64,
    /// Earliest sample time in the bucket.
    pub first_time: DateTime<Utc>,
    /// Latest sample time in the bucket.
    pub last_time: DateTime<Utc>,
}

// =============================================================================
// Alerts
// =============================================================================

/// Error for unknown severity names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid severity: {0}")]
pub struct InvalidSeverity(pub String);

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Info,
    /// Needs attention.
    Warning,
    /// Failure.
    Error,
    /// Immediate action required.
    Critical,
}

impl Severity {
    /// Column value for `severity`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = InvalidSeverity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            other => Err(InvalidSeverity(other.to_string())),
        }
    }
}

/// A severity-tagged event for a twin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Raise time.
    pub time: DateTime<Utc>,
    /// Unique alert id.
    pub alert_id: String,
    /// Twin registry id.
    pub twin_id: String,
    /// Feature the alert refers to.
    pub feature_path: Option<String>,
    /// Severity.
    pub severity: Severity,
    /// Human readable message.
    pub message: String,
    /// Raw document that triggered the alert.
    pub value: serde_json::Value,
    /// Origin tag.
    pub source: String,
    /// Set once by acknowledgement.
    pub acknowledged: bool,
    /// Who acknowledged.
    pub ack_by: Option<String>,
    /// When it was acknowledged.
    pub ack_time: Option<DateTime<Utc>>,
}

impl Alert {
    /// Build an alert id from the twin and a nanosecond timestamp.
    #[must_use]
    pub fn make_id(twin_id: &str, at: DateTime<Utc>) -> String {
        let nanos = at
            .timestamp_nanos_opt()
            .unwrap_or_else(|| at.timestamp_micros().saturating_mul(1_000));
        format!("{twin_id}-{nanos}")
    }
}

// =============================================================================
// Predictions
// =============================================================================

/// Category of an ML prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionKind {
    /// Anomaly score.
    #[default]
    Anomaly,
    /// Class label.
    Classification,
    /// Continuous estimate.
    Regression,
}

impl PredictionKind {
    /// Column value for `prediction_type`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anomaly => "anomaly",
            Self::Classification => "classification",
            Self::Regression => "regression",
        }
    }

    /// Parse a kind name, defaulting to [`PredictionKind::Anomaly`].
    #[must_use]
    pub fn parse_or_default(name: Option<&str>) -> Self {
        match name {
            Some("classification") => Self::Classification,
            Some("regression") => Self::Regression,
            _ => Self::Anomaly,
        }
    }
}

/// A timestamped ML output for a twin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Inference time.
    pub time: DateTime<Utc>,
    /// Twin registry id.
    pub twin_id: String,
    /// Task (model) id.
    pub task_id: String,
    /// Prediction category.
    pub kind: PredictionKind,
    /// Optional numeric score.
    pub score: Option<f64>,
    /// Optional class label.
    pub label: Option<String>,
    /// Raw result document.
    pub details: serde_json::Value,
    /// Model version.
    pub model_version: String,
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("1m", IntervalType::Minute)]
    #[test_case("5m", IntervalType::Minute)]
    #[test_case("15m", IntervalType::Minute)]
    #[test_case("30m", IntervalType::Minute)]
    #[test_case("1h", IntervalType::Hour)]
    #[test_case("6h", IntervalType::Hour)]
    #[test_case("12h", IntervalType::Hour)]
    #[test_case("1d", IntervalType::Day)]
    #[test_case("1w", IntervalType::Week)]
    #[test_case("1mon", IntervalType::Month)]
    fn interval_maps_to_type(raw: &str, expected: IntervalType) {
        let interval: AggregateInterval = raw.parse().unwrap();
        assert_eq!(interval.interval_type(), expected);
        assert_eq!(interval.as_str(), raw);
    }

    #[test_case("2m")]
    #[test_case("1y")]
    #[test_case("")]
    #[test_case("1M")]
    fn interval_rejects_unknown(raw: &str) {
        let err = raw.parse::<AggregateInterval>().unwrap_err();
        assert_eq!(err.to_string(), format!("invalid interval: {raw}"));
    }

    #[test]
    fn severity_parse() {
        assert_eq!("critical".parse::<Severity>().unwrap(), Severity::Critical);
        assert_eq!(
            "fatal".parse::<Severity>().unwrap_err().to_string(),
            "invalid severity: fatal"
        );
    }

    #[test]
    fn prediction_kind_defaults_to_anomaly() {
        assert_eq!(PredictionKind::parse_or_default(None), PredictionKind::Anomaly);
        assert_eq!(
            PredictionKind::parse_or_default(Some("something")),
            PredictionKind::Anomaly
        );
        assert_eq!(
            PredictionKind::parse_or_default(Some("regression")),
            PredictionKind::Regression
        );
    }

    #[test]
    fn alert_id_uses_unix_nanos() {
        let at: DateTime<Utc> = "2024-01-01T00:00:00.000000001Z".parse().unwrap();
        assert_eq!(Alert::make_id("twinA", at), "twinA-1704067200000000001");
    }

    #[test]
    fn sample_value_columns_round_trip() {
        let value = SampleValue::String("on".to_string());
        let rebuilt = SampleValue::from_columns(
            value.kind(),
            value.as_number(),
            value.as_bool(),
            value.as_str().map(str::to_string),
            value.as_json().cloned(),
        );
        assert_eq!(rebuilt, Some(value));
    }

    #[test]
    fn from_columns_rejects_missing_column() {
        assert_eq!(
            SampleValue::from_columns(ValueKind::Number, None, Some(true), None, None),
            None
        );
    }
}
