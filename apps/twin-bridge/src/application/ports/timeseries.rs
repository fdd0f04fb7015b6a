//! Time-Series Store Port (Driven Port)
//!
//! Append-only writes from the bridge plus the read-only query surface the
//! REST layer consumes. Rows are never mutated except for the one-time
//! alert acknowledgement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::RepositoryError;
use crate::domain::timeseries::{Aggregate, AggregateInterval, Alert, Prediction, Sample, Severity};

/// Inclusive time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Window start.
    pub start: DateTime<Utc>,
    /// Window end.
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Create a window.
    #[must_use]
    pub const fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whether `t` falls inside the window.
    #[must_use]
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t <= self.end
    }
}

/// Hypertable store for samples, rollups, alerts and predictions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Append samples, committed in transactional batches.
    ///
    /// # Errors
    ///
    /// Returns `Database` if a batch fails; that batch is rolled back.
    async fn insert_samples(&self, samples: &[Sample]) -> Result<(), RepositoryError>;

    /// Append pre-computed rollups, committed in transactional batches.
    async fn insert_aggregates(&self, aggregates: &[Aggregate]) -> Result<(), RepositoryError>;

    /// Append predictions, committed in transactional batches.
    async fn insert_predictions(&self, predictions: &[Prediction]) -> Result<(), RepositoryError>;

    /// Append one alert.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the alert id already exists.
    async fn insert_alert(&self, alert: &Alert) -> Result<(), RepositoryError>;

    /// Samples for one twin feature inside `range`, newest first.
    async fn samples_in_range(
        &self,
        twin_id: &str,
        feature_path: &str,
        range: TimeRange,
        limit: Option<i64>,
    ) -> Result<Vec<Sample>, RepositoryError>;

    /// Most recent sample for one twin feature.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the feature has no samples.
    async fn latest_sample(
        &self,
        twin_id: &str,
        feature_path: &str,
    ) -> Result<Sample, RepositoryError>;

    /// Rollups for one twin feature, newest bucket first.
    ///
    /// Served from stored rollups when present; otherwise computed over
    /// numeric samples only.
    async fn aggregates(
        &self,
        twin_id: &str,
        feature_path: &str,
        range: TimeRange,
        interval: AggregateInterval,
    ) -> Result<Vec<Aggregate>, RepositoryError>;

    /// Alerts for a twin inside `range`, newest first.
    async fn alerts(
        &self,
        twin_id: &str,
        range: TimeRange,
        severity: Option<Severity>,
        limit: Option<i64>,
    ) -> Result<Vec<Alert>, RepositoryError>;

    /// Acknowledge an unacknowledged alert.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the alert does not exist or is already
    /// acknowledged.
    async fn acknowledge_alert(&self, alert_id: &str, ack_by: &str) -> Result<(), RepositoryError>;

    /// Remove an alert.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the alert does not exist.
    async fn delete_alert(&self, alert_id: &str) -> Result<(), RepositoryError>;

    /// Predictions for a twin task inside `range`, newest first.
    async fn predictions(
        &self,
        twin_id: &str,
        task_id: &str,
        range: TimeRange,
        limit: Option<i64>,
    ) -> Result<Vec<Prediction>, RepositoryError>;

    /// Most recent prediction for a twin task.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the task has no predictions.
    async fn latest_prediction(
        &self,
        twin_id: &str,
        task_id: &str,
    ) -> Result<Prediction, RepositoryError>;

    /// Drop a twin's samples older than `before`. Returns the row count.
    async fn delete_samples_before(
        &self,
        twin_id: &str,
        before: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    /// Drop a twin's predictions older than `before`. Returns the row count.
    async fn delete_predictions_before(
        &self,
        twin_id: &str,
        before: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;
}
