//! In-memory catalog and time-series store.
//!
//! Same contracts as the Postgres adapters, including the live-registry-id
//! uniqueness rule and conditional alert acknowledgement. Suitable for
//! tests and local runs; not for production use.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use parking_lot::RwLock;

use crate::application::ports::{
    ProjectRepository, RepositoryError, TimeRange, TimeSeriesStore, TwinRepository,
    TwinTypeRepository,
};
use crate::domain::timeseries::{
    Aggregate, AggregateInterval, Alert, Prediction, Sample, SampleValue, Severity,
};
use crate::domain::twin::{
    CatalogId, GENERIC_TWIN_TYPE, NewTwin, Project, ProjectMember, Twin, TwinType,
};

// =============================================================================
// Catalog
// =============================================================================

#[derive(Debug, Default)]
struct CatalogState {
    next_id: CatalogId,
    twins: BTreeMap<CatalogId, Twin>,
    projects: BTreeMap<CatalogId, Project>,
    members: Vec<ProjectMember>,
    twin_types: BTreeMap<CatalogId, TwinType>,
    fail_updates: Option<RepositoryError>,
}

impl CatalogState {
    fn next_id(&mut self) -> CatalogId {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory twins, projects and twin types.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    /// Create a catalog holding only the `generic` twin type.
    #[must_use]
    pub fn new() -> Self {
        let catalog = Self::empty();
        catalog.add_twin_type(GENERIC_TWIN_TYPE);
        catalog
    }

    /// Create a catalog with no rows at all.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Insert a project and return it.
    pub fn add_project(&self, name: &str) -> Project {
        let mut state = self.state.write();
        let project = Project {
            id: state.next_id(),
            name: name.to_string(),
            description: String::new(),
            created_at: Utc::now(),
        };
        state.projects.insert(project.id, project.clone());
        project
    }

    /// Insert a project with a fixed id.
    pub fn add_project_with_id(&self, id: CatalogId, name: &str) -> Project {
        let mut state = self.state.write();
        state.next_id = state.next_id.max(id);
        let project = Project {
            id,
            name: name.to_string(),
            description: String::new(),
            created_at: Utc::now(),
        };
        state.projects.insert(id, project.clone());
        project
    }

    /// Add a member to a project.
    pub fn add_member(&self, project_id: CatalogId, user_id: CatalogId, role: &str) {
        self.state.write().members.push(ProjectMember {
            project_id,
            user_id,
            role: role.to_string(),
        });
    }

    /// Insert a twin type and return it.
    pub fn add_twin_type(&self, name: &str) -> TwinType {
        let mut state = self.state.write();
        let twin_type = TwinType {
            id: state.next_id(),
            name: name.to_string(),
            version: "1.0".to_string(),
            schema: serde_json::json!({}),
            created_at: Utc::now(),
        };
        state.twin_types.insert(twin_type.id, twin_type.clone());
        twin_type
    }

    /// Make every following `update` and `soft_delete` fail with `error`.
    pub fn fail_updates(&self, error: Option<RepositoryError>) {
        self.state.write().fail_updates = error;
    }

    /// Every twin row, deleted ones included.
    #[must_use]
    pub fn all_twins(&self) -> Vec<Twin> {
        self.state.read().twins.values().cloned().collect()
    }

    /// Live twins carrying `registry_id`.
    #[must_use]
    pub fn live_twins_with(&self, registry_id: &str) -> usize {
        self.state
            .read()
            .twins
            .values()
            .filter(|t| t.registry_id == registry_id && !t.is_deleted())
            .count()
    }
}

#[async_trait]
impl TwinRepository for InMemoryCatalog {
    async fn get_by_registry_id(&self, registry_id: &str) -> Result<Twin, RepositoryError> {
        self.state
            .read()
            .twins
            .values()
            .find(|t| t.registry_id == registry_id && !t.is_deleted())
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn get_by_id(&self, id: CatalogId) -> Result<Twin, RepositoryError> {
        self.state
            .read()
            .twins
            .get(&id)
            .filter(|t| !t.is_deleted())
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn create(&self, twin: NewTwin) -> Result<Twin, RepositoryError> {
        let mut state = self.state.write();
        if state
            .twins
            .values()
            .any(|t| t.registry_id == twin.registry_id && !t.is_deleted())
        {
            return Err(RepositoryError::Conflict(format!(
                "twin with registry id '{}' already exists",
                twin.registry_id
            )));
        }
        if !state.twin_types.contains_key(&twin.type_id)
            || !state.projects.contains_key(&twin.project_id)
        {
            return Err(RepositoryError::InvalidInput(format!(
                "twin type {} or project {} does not exist",
                twin.type_id, twin.project_id
            )));
        }

        let now = Utc::now();
        let row = Twin {
            id: state.next_id(),
            registry_id: twin.registry_id,
            name: twin.name,
            description: twin.description,
            type_id: twin.type_id,
            project_id: twin.project_id,
            model_url: twin.model_url,
            metadata: twin.metadata,
            created_by: twin.created_by,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state.twins.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update(&self, twin: &Twin) -> Result<Twin, RepositoryError> {
        let mut state = self.state.write();
        if let Some(error) = state.fail_updates.clone() {
            return Err(error);
        }
        let row = state
            .twins
            .get_mut(&twin.id)
            .filter(|t| !t.is_deleted())
            .ok_or(RepositoryError::NotFound)?;
        row.name.clone_from(&twin.name);
        row.description.clone_from(&twin.description);
        row.type_id = twin.type_id;
        row.project_id = twin.project_id;
        row.model_url.clone_from(&twin.model_url);
        row.metadata.clone_from(&twin.metadata);
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn soft_delete(&self, id: CatalogId) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        if let Some(error) = state.fail_updates.clone() {
            return Err(error);
        }
        let row = state
            .twins
            .get_mut(&id)
            .filter(|t| !t.is_deleted())
            .ok_or(RepositoryError::NotFound)?;
        let now = Utc::now();
        row.deleted_at = Some(now);
        row.updated_at = now;
        Ok(())
    }

    async fn list_by_project(
        &self,
        project_id: CatalogId,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Twin>, RepositoryError> {
        Ok(self
            .state
            .read()
            .twins
            .values()
            .filter(|t| t.project_id == project_id && !t.is_deleted())
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ProjectRepository for InMemoryCatalog {
    async fn get_by_id(&self, id: CatalogId) -> Result<Project, RepositoryError> {
        self.state
            .read()
            .projects
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Project>, RepositoryError> {
        let state = self.state.read();
        let mut projects: Vec<Project> = state.projects.values().cloned().collect();
        projects.sort_by_key(|p| (p.created_at, p.id));
        Ok(projects
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }

    async fn members(&self, project_id: CatalogId) -> Result<Vec<ProjectMember>, RepositoryError> {
        Ok(self
            .state
            .read()
            .members
            .iter()
            .filter(|m| m.project_id == project_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TwinTypeRepository for InMemoryCatalog {
    async fn get_by_id(&self, id: CatalogId) -> Result<TwinType, RepositoryError> {
        self.state
            .read()
            .twin_types
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn get_by_name(&self, name: &str) -> Result<TwinType, RepositoryError> {
        self.state
            .read()
            .twin_types
            .values()
            .find(|t| t.name == name)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn list(&self) -> Result<Vec<TwinType>, RepositoryError> {
        let mut types: Vec<TwinType> = self.state.read().twin_types.values().cloned().collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(types)
    }
}

// =============================================================================
// Time Series
// =============================================================================

#[derive(Debug, Default)]
struct SeriesState {
    samples: HashMap<(DateTime<Utc>, String, String), Sample>,
    aggregates: Vec<Aggregate>,
    alerts: Vec<Alert>,
    predictions: HashMap<(DateTime<Utc>, String, String), Prediction>,
    fail_writes: Option<RepositoryError>,
}

/// In-memory hypertables.
#[derive(Debug, Default)]
pub struct InMemoryTimeSeriesStore {
    state: RwLock<SeriesState>,
}

impl InMemoryTimeSeriesStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following insert fail with `error`.
    pub fn fail_writes(&self, error: Option<RepositoryError>) {
        self.state.write().fail_writes = error;
    }

    /// Every stored sample, oldest first.
    #[must_use]
    pub fn all_samples(&self) -> Vec<Sample> {
        let mut samples: Vec<Sample> = self.state.read().samples.values().cloned().collect();
        samples.sort_by_key(|s| s.time);
        samples
    }

    /// Every stored alert.
    #[must_use]
    pub fn all_alerts(&self) -> Vec<Alert> {
        self.state.read().alerts.clone()
    }

    /// Every stored prediction, oldest first.
    #[must_use]
    pub fn all_predictions(&self) -> Vec<Prediction> {
        let mut predictions: Vec<Prediction> =
            self.state.read().predictions.values().cloned().collect();
        predictions.sort_by_key(|p| p.time);
        predictions
    }

    fn check_writable(&self) -> Result<(), RepositoryError> {
        self.state.read().fail_writes.clone().map_or(Ok(()), Err)
    }
}

fn newest_first<T>(
    mut rows: Vec<T>,
    time: impl Fn(&T) -> DateTime<Utc>,
    limit: Option<i64>,
) -> Vec<T> {
    rows.sort_by_key(|row| std::cmp::Reverse(time(row)));
    if let Some(limit) = limit.and_then(|l| usize::try_from(l).ok()) {
        rows.truncate(limit);
    }
    rows
}

/// Start of the bucket containing `t`. Weeks start on Monday.
fn bucket_start(interval: AggregateInterval, t: DateTime<Utc>) -> DateTime<Utc> {
    let width = match interval {
        AggregateInterval::OneMinute => 60,
        AggregateInterval::FiveMinutes => 300,
        AggregateInterval::FifteenMinutes => 900,
        AggregateInterval::ThirtyMinutes => 1800,
        AggregateInterval::OneHour => 3600,
        AggregateInterval::SixHours => 6 * 3600,
        AggregateInterval::TwelveHours => 12 * 3600,
        AggregateInterval::OneDay => 86_400,
        AggregateInterval::OneWeek => 7 * 86_400,
        AggregateInterval::OneMonth => {
            return Utc
                .with_ymd_and_hms(t.year(), t.month(), 1, 0, 0, 0)
                .single()
                .unwrap_or(t);
        }
    };
    // 1970-01-05 was a Monday.
    let origin = if interval == AggregateInterval::OneWeek { 4 * 86_400 } else { 0 };
    let secs = t.timestamp() - origin;
    let start = secs - secs.rem_euclid(width) + origin;
    DateTime::from_timestamp(start, 0).unwrap_or(t)
}

#[async_trait]
impl TimeSeriesStore for InMemoryTimeSeriesStore {
    async fn insert_samples(&self, samples: &[Sample]) -> Result<(), RepositoryError> {
        self.check_writable()?;
        let mut state = self.state.write();
        for sample in samples {
            state
                .samples
                .entry((sample.time, sample.twin_id.clone(), sample.feature_path.clone()))
                .or_insert_with(|| sample.clone());
        }
        Ok(())
    }

    async fn insert_aggregates(&self, aggregates: &[Aggregate]) -> Result<(), RepositoryError> {
        self.check_writable()?;
        let mut state = self.state.write();
        for aggregate in aggregates {
            state.aggregates.retain(|a| {
                !(a.bucket == aggregate.bucket
                    && a.twin_id == aggregate.twin_id
                    && a.feature_path == aggregate.feature_path
                    && a.interval_type == aggregate.interval_type)
            });
            state.aggregates.push(aggregate.clone());
        }
        Ok(())
    }

    async fn insert_predictions(&self, predictions: &[Prediction]) -> Result<(), RepositoryError> {
        self.check_writable()?;
        let mut state = self.state.write();
        for prediction in predictions {
            state
                .predictions
                .entry((prediction.time, prediction.twin_id.clone(), prediction.task_id.clone()))
                .or_insert_with(|| prediction.clone());
        }
        Ok(())
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<(), RepositoryError> {
        self.check_writable()?;
        let mut state = self.state.write();
        if state.alerts.iter().any(|a| a.alert_id == alert.alert_id) {
            return Err(RepositoryError::Conflict(format!(
                "alert '{}' already exists",
                alert.alert_id
            )));
        }
        state.alerts.push(alert.clone());
        Ok(())
    }

    async fn samples_in_range(
        &self,
        twin_id: &str,
        feature_path: &str,
        range: TimeRange,
        limit: Option<i64>,
    ) -> Result<Vec<Sample>, RepositoryError> {
        let rows = self
            .state
            .read()
            .samples
            .values()
            .filter(|s| {
                s.twin_id == twin_id && s.feature_path == feature_path && range.contains(s.time)
            })
            .cloned()
            .collect();
        Ok(newest_first(rows, |s| s.time, limit))
    }

    async fn latest_sample(
        &self,
        twin_id: &str,
        feature_path: &str,
    ) -> Result<Sample, RepositoryError> {
        self.state
            .read()
            .samples
            .values()
            .filter(|s| s.twin_id == twin_id && s.feature_path == feature_path)
            .max_by_key(|s| s.time)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn aggregates(
        &self,
        twin_id: &str,
        feature_path: &str,
        range: TimeRange,
        interval: AggregateInterval,
    ) -> Result<Vec<Aggregate>, RepositoryError> {
        let interval_type = interval.interval_type();
        let state = self.state.read();

        let stored: Vec<Aggregate> = state
            .aggregates
            .iter()
            .filter(|a| {
                a.twin_id == twin_id
                    && a.feature_path == feature_path
                    && a.interval_type == interval_type
                    && range.contains(a.bucket)
            })
            .cloned()
            .collect();
        if !stored.is_empty() {
            return Ok(newest_first(stored, |a| a.bucket, None));
        }

        let mut buckets: BTreeMap<DateTime<Utc>, Aggregate> = BTreeMap::new();
        for sample in state.samples.values() {
            let SampleValue::Number(value) = sample.value else {
                continue;
            };
            if sample.twin_id != twin_id
                || sample.feature_path != feature_path
                || !range.contains(sample.time)
            {
                continue;
            }

            let bucket = bucket_start(interval, sample.time);
            let entry = buckets.entry(bucket).or_insert_with(|| Aggregate {
                bucket,
                twin_id: twin_id.to_string(),
                feature_path: feature_path.to_string(),
                interval_type,
                min: value,
                max: value,
                avg: 0.0,
                sum: 0.0,
                count: 0,
                first_time: sample.time,
                last_time: sample.time,
            });
            entry.min = entry.min.min(value);
            entry.max = entry.max.max(value);
            entry.sum += value;
            entry.count += 1;
            entry.first_time = entry.first_time.min(sample.time);
            entry.last_time = entry.last_time.max(sample.time);
        }

        Ok(buckets
            .into_values()
            .rev()
            .map(|mut a| {
                a.avg = a.sum / a.count as f64;
                a
            })
            .collect())
    }

    async fn alerts(
        &self,
        twin_id: &str,
        range: TimeRange,
        severity: Option<Severity>,
        limit: Option<i64>,
    ) -> Result<Vec<Alert>, RepositoryError> {
        let rows = self
            .state
            .read()
            .alerts
            .iter()
            .filter(|a| {
                a.twin_id == twin_id
                    && range.contains(a.time)
                    && severity.is_none_or(|s| a.severity == s)
            })
            .cloned()
            .collect();
        Ok(newest_first(rows, |a| a.time, limit))
    }

    async fn acknowledge_alert(&self, alert_id: &str, ack_by: &str) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        let alert = state
            .alerts
            .iter_mut()
            .find(|a| a.alert_id == alert_id && !a.acknowledged)
            .ok_or(RepositoryError::NotFound)?;
        alert.acknowledged = true;
        alert.ack_by = Some(ack_by.to_string());
        alert.ack_time = Some(Utc::now());
        Ok(())
    }

    async fn delete_alert(&self, alert_id: &str) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        let before = state.alerts.len();
        state.alerts.retain(|a| a.alert_id != alert_id);
        if state.alerts.len() == before {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn predictions(
        &self,
        twin_id: &str,
        task_id: &str,
        range: TimeRange,
        limit: Option<i64>,
    ) -> Result<Vec<Prediction>, RepositoryError> {
        let rows = self
            .state
            .read()
            .predictions
            .values()
            .filter(|p| p.twin_id == twin_id && p.task_id == task_id && range.contains(p.time))
            .cloned()
            .collect();
        Ok(newest_first(rows, |p| p.time, limit))
    }

    async fn latest_prediction(
        &self,
        twin_id: &str,
        task_id: &str,
    ) -> Result<Prediction, RepositoryError> {
        self.state
            .read()
            .predictions
            .values()
            .filter(|p| p.twin_id == twin_id && p.task_id == task_id)
            .max_by_key(|p| p.time)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn delete_samples_before(
        &self,
        twin_id: &str,
        before: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state.write();
        let count = state.samples.len();
        state
            .samples
            .retain(|_, s| !(s.twin_id == twin_id && s.time < before));
        Ok((count - state.samples.len()) as u64)
    }

    async fn delete_predictions_before(
        &self,
        twin_id: &str,
        before: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state.write();
        let count = state.predictions.len();
        state
            .predictions
            .retain(|_, p| !(p.twin_id == twin_id && p.time < before));
        Ok((count - state.predictions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::timeseries::REGISTRY_SOURCE;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn day() -> TimeRange {
        TimeRange::new(at("2024-01-01T00:00:00Z"), at("2024-01-02T00:00:00Z"))
    }

    fn sample(time: &str, value: SampleValue) -> Sample {
        Sample {
            time: at(time),
            twin_id: "twinA".to_string(),
            feature_path: "temp".to_string(),
            value,
            source: REGISTRY_SOURCE.to_string(),
        }
    }

    fn alert(id: &str) -> Alert {
        Alert {
            time: at("2024-01-01T12:00:00Z"),
            alert_id: id.to_string(),
            twin_id: "twinA".to_string(),
            feature_path: Some("temp".to_string()),
            severity: Severity::Warning,
            message: "too hot".to_string(),
            value: json!({}),
            source: "ml".to_string(),
            acknowledged: false,
            ack_by: None,
            ack_time: None,
        }
    }

    fn new_twin(catalog: &InMemoryCatalog, registry_id: &str, project_id: CatalogId) -> NewTwin {
        let type_id = catalog.state.read().twin_types.keys().next().copied().unwrap();
        NewTwin {
            registry_id: registry_id.to_string(),
            name: "Pump".to_string(),
            description: String::new(),
            type_id,
            project_id,
            model_url: None,
            metadata: json!({}),
            created_by: None,
        }
    }

    #[tokio::test]
    async fn registry_id_unique_among_live_twins() {
        let catalog = InMemoryCatalog::new();
        let project = catalog.add_project("p");

        let twin = catalog.create(new_twin(&catalog, "twinA", project.id)).await.unwrap();
        let dup = catalog.create(new_twin(&catalog, "twinA", project.id)).await;
        assert!(matches!(dup, Err(RepositoryError::Conflict(_))));

        TwinRepository::soft_delete(&catalog, twin.id).await.unwrap();
        assert!(catalog.create(new_twin(&catalog, "twinA", project.id)).await.is_ok());
        assert_eq!(catalog.live_twins_with("twinA"), 1);
    }

    #[tokio::test]
    async fn create_requires_existing_project() {
        let catalog = InMemoryCatalog::new();
        let result = catalog.create(new_twin(&catalog, "twinA", 99)).await;
        assert!(matches!(result, Err(RepositoryError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn soft_deleted_twin_is_not_found() {
        let catalog = InMemoryCatalog::new();
        let project = catalog.add_project("p");
        let twin = catalog.create(new_twin(&catalog, "twinA", project.id)).await.unwrap();

        TwinRepository::soft_delete(&catalog, twin.id).await.unwrap();

        assert_eq!(
            catalog.get_by_registry_id("twinA").await,
            Err(RepositoryError::NotFound)
        );
        assert_eq!(
            TwinRepository::soft_delete(&catalog, twin.id).await,
            Err(RepositoryError::NotFound)
        );
    }

    #[tokio::test]
    async fn projects_list_oldest_first() {
        let catalog = InMemoryCatalog::new();
        let first = catalog.add_project("first");
        catalog.add_project("second");

        let page = ProjectRepository::list(&catalog, 0, 1).await.unwrap();
        assert_eq!(page, vec![first]);
    }

    #[tokio::test]
    async fn acknowledge_once() {
        let store = InMemoryTimeSeriesStore::new();
        store.insert_alert(&alert("a-1")).await.unwrap();

        store.acknowledge_alert("a-1", "operator").await.unwrap();
        assert_eq!(
            store.acknowledge_alert("a-1", "someone-else").await,
            Err(RepositoryError::NotFound)
        );

        let stored = &store.all_alerts()[0];
        assert!(stored.acknowledged);
        assert_eq!(stored.ack_by.as_deref(), Some("operator"));
    }

    #[tokio::test]
    async fn duplicate_alert_id_conflicts() {
        let store = InMemoryTimeSeriesStore::new();
        store.insert_alert(&alert("a-1")).await.unwrap();
        assert!(matches!(
            store.insert_alert(&alert("a-1")).await,
            Err(RepositoryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn redelivered_samples_are_skipped() {
        let store = InMemoryTimeSeriesStore::new();
        let s = sample("2024-01-01T00:00:00Z", SampleValue::Number(42.5));
        store.insert_samples(&[s.clone()]).await.unwrap();
        store.insert_samples(&[s]).await.unwrap();
        assert_eq!(store.all_samples().len(), 1);
    }

    #[tokio::test]
    async fn range_is_newest_first_and_limited() {
        let store = InMemoryTimeSeriesStore::new();
        store
            .insert_samples(&[
                sample("2024-01-01T00:00:00Z", SampleValue::Number(1.0)),
                sample("2024-01-01T01:00:00Z", SampleValue::Number(2.0)),
                sample("2024-01-01T02:00:00Z", SampleValue::Number(3.0)),
            ])
            .await
            .unwrap();

        let rows = store.samples_in_range("twinA", "temp", day(), Some(2)).await.unwrap();
        let values: Vec<_> = rows.iter().map(|s| s.value.as_number()).collect();
        assert_eq!(values, [Some(3.0), Some(2.0)]);
    }

    #[tokio::test]
    async fn computed_aggregates_skip_non_numeric_samples() {
        let store = InMemoryTimeSeriesStore::new();
        store
            .insert_samples(&[
                sample("2024-01-01T00:10:00Z", SampleValue::Number(10.0)),
                sample("2024-01-01T00:20:00Z", SampleValue::Number(20.0)),
                sample("2024-01-01T00:30:00Z", SampleValue::Object(json!({"x": 1}))),
                sample("2024-01-01T01:05:00Z", SampleValue::Number(5.0)),
            ])
            .await
            .unwrap();

        let rows = store
            .aggregates("twinA", "temp", day(), AggregateInterval::OneHour)
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].bucket, at("2024-01-01T01:00:00Z"));
        assert_eq!(rows[1].count, 2);
        assert!((rows[1].avg - 15.0).abs() < f64::EPSILON);
        assert_eq!(rows[1].first_time, at("2024-01-01T00:10:00Z"));
    }

    #[test]
    fn week_buckets_start_on_monday() {
        let bucket = bucket_start(AggregateInterval::OneWeek, at("2024-01-04T12:00:00Z"));
        assert_eq!(bucket, at("2024-01-01T00:00:00Z"));
        let month = bucket_start(AggregateInterval::OneMonth, at("2024-02-29T23:00:00Z"));
        assert_eq!(month, at("2024-02-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn retention_deletes_only_older_rows() {
        let store = InMemoryTimeSeriesStore::new();
        store
            .insert_samples(&[
                sample("2024-01-01T00:00:00Z", SampleValue::Boolean(true)),
                sample("2024-01-01T02:00:00Z", SampleValue::Boolean(false)),
            ])
            .await
            .unwrap();

        let removed = store
            .delete_samples_before("twinA", at("2024-01-01T01:00:00Z"))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.all_samples().len(), 1);
    }
}
