//! History Queries
//!
//! Read-only time-series surface for the REST layer. Callers address twins
//! by catalog id; the store is keyed by registry id, so every query first
//! resolves the twin through the catalog.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::application::ports::{RepositoryError, TimeRange, TimeSeriesStore, TwinRepository};
use crate::domain::timeseries::{
    Aggregate, AggregateInterval, Alert, InvalidInterval, InvalidSeverity, Prediction, Sample,
    Severity,
};
use crate::domain::twin::{CatalogId, Twin};

/// History query errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    /// No twin with the requested catalog id.
    #[error("twin not found")]
    TwinNotFound,

    /// Aggregate interval outside the accepted set.
    #[error(transparent)]
    InvalidInterval(#[from] InvalidInterval),

    /// Severity outside the accepted set.
    #[error(transparent)]
    InvalidSeverity(#[from] InvalidSeverity),

    /// No sample for the twin feature.
    #[error("no data found for the given twin and feature path")]
    NoData,

    /// No prediction for the twin task.
    #[error("no ML prediction found for the given twin and task")]
    NoPrediction,

    /// Alert missing, or acknowledged before.
    #[error("alert not found or already acknowledged")]
    AlertNotFound,

    /// Underlying storage failure.
    #[error("database error: {0}")]
    Repository(RepositoryError),
}

/// History query service.
pub struct HistoryService {
    twins: Arc<dyn TwinRepository>,
    store: Arc<dyn TimeSeriesStore>,
}

impl HistoryService {
    /// Create the service.
    #[must_use]
    pub fn new(twins: Arc<dyn TwinRepository>, store: Arc<dyn TimeSeriesStore>) -> Self {
        Self { twins, store }
    }

    async fn resolve(&self, twin_id: CatalogId) -> Result<Twin, HistoryError> {
        match self.twins.get_by_id(twin_id).await {
            Ok(twin) => Ok(twin),
            Err(RepositoryError::NotFound) => Err(HistoryError::TwinNotFound),
            Err(e) => {
                tracing::error!(twin_id, error = %e, "Failed to verify twin exists");
                Err(HistoryError::Repository(e))
            }
        }
    }

    /// Samples for a twin feature inside `[start, end]`.
    pub async fn samples(
        &self,
        twin_id: CatalogId,
        feature_path: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<i64>,
    ) -> Result<Vec<Sample>, HistoryError> {
        let twin = self.resolve(twin_id).await?;
        self.store
            .samples_in_range(&twin.registry_id, feature_path, TimeRange::new(start, end), limit)
            .await
            .map_err(HistoryError::Repository)
    }

    /// Most recent sample for a twin feature.
    pub async fn latest_sample(
        &self,
        twin_id: CatalogId,
        feature_path: &str,
    ) -> Result<Sample, HistoryError> {
        let twin = self.resolve(twin_id).await?;
        self.store
            .latest_sample(&twin.registry_id, feature_path)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => HistoryError::NoData,
                other => HistoryError::Repository(other),
            })
    }

    /// Bucketed rollups. `interval` is one of `1m`..`1mon`.
    pub async fn aggregates(
        &self,
        twin_id: CatalogId,
        feature_path: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: &str,
    ) -> Result<Vec<Aggregate>, HistoryError> {
        let twin = self.resolve(twin_id).await?;
        let interval: AggregateInterval = interval.parse()?;
        self.store
            .aggregates(&twin.registry_id, feature_path, TimeRange::new(start, end), interval)
            .await
            .map_err(HistoryError::Repository)
    }

    /// Alerts for a twin. An empty `severity` matches every severity.
    pub async fn alerts(
        &self,
        twin_id: CatalogId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        severity: &str,
        limit: Option<i64>,
    ) -> Result<Vec<Alert>, HistoryError> {
        let twin = self.resolve(twin_id).await?;
        let severity = if severity.is_empty() {
            None
        } else {
            Some(severity.parse::<Severity>()?)
        };
        self.store
            .alerts(&twin.registry_id, TimeRange::new(start, end), severity, limit)
            .await
            .map_err(HistoryError::Repository)
    }

    /// Acknowledge an alert once.
    pub async fn acknowledge_alert(&self, alert_id: &str, ack_by: &str) -> Result<(), HistoryError> {
        match self.store.acknowledge_alert(alert_id, ack_by).await {
            Ok(()) => {
                tracing::info!(alert_id, ack_by, "Alert acknowledged");
                Ok(())
            }
            Err(RepositoryError::NotFound) => Err(HistoryError::AlertNotFound),
            Err(e) => {
                tracing::error!(alert_id, error = %e, "Failed to acknowledge alert");
                Err(HistoryError::Repository(e))
            }
        }
    }

    /// Predictions for a twin task inside `[start, end]`.
    pub async fn predictions(
        &self,
        twin_id: CatalogId,
        task_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<i64>,
    ) -> Result<Vec<Prediction>, HistoryError> {
        let twin = self.resolve(twin_id).await?;
        self.store
            .predictions(&twin.registry_id, task_id, TimeRange::new(start, end), limit)
            .await
            .map_err(HistoryError::Repository)
    }

    /// Most recent prediction for a twin task.
    pub async fn latest_prediction(
        &self,
        twin_id: CatalogId,
        task_id: &str,
    ) -> Result<Prediction, HistoryError> {
        let twin = self.resolve(twin_id).await?;
        self.store
            .latest_prediction(&twin.registry_id, task_id)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => HistoryError::NoPrediction,
                other => HistoryError::Repository(other),
            })
    }
}
