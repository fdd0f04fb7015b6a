//! Lifecycle Reconciliation
//!
//! Applies registry lifecycle events (`created`, `modified`, `deleted`) to
//! the catalog. Events arrive from the `registry-events` consumer, pass
//! through a bounded buffer and are applied by a single worker, so the
//! per-twin order produced on the broker key is the order applied here.
//!
//! ```text
//! consumer ──(event, reply)──► [buffer: 100] ──► worker ──► catalog
//!     ▲                                             │
//!     └──────────────── Result<(), HandlerError> ◄──┘
//! ```
//!
//! The consumer handler waits for the worker's reply so that a failed
//! reconciliation still reaches the dead-letter topic.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    HandlerError, InboundRecord, MessageHandler, NotificationType, Notifier, ProjectRepository,
    RepositoryError, TwinRepository, TwinTypeRepository,
};
use crate::domain::events::RegistryEventRecord;
use crate::domain::twin::{
    CatalogId, GENERIC_TWIN_TYPE, NewTwin, ThingAttributes, Twin, TwinAction,
};

/// Capacity of the buffer between the consumer and the worker.
pub const EVENT_BUFFER_CAPACITY: usize = 100;

// =============================================================================
// Reconciler
// =============================================================================

/// What a reconciliation did to the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// A new twin row was inserted.
    Created(Twin),
    /// An existing twin row was updated.
    Updated(Twin),
    /// The twin was soft-deleted.
    Deleted {
        /// Catalog id of the deleted twin.
        id: CatalogId,
        /// Project the twin belonged to.
        project_id: CatalogId,
    },
    /// The event matched the catalog already.
    Unchanged,
    /// The event does not apply to the catalog.
    Ignored,
}

/// Applies lifecycle events to the catalog repositories.
pub struct Reconciler {
    twins: Arc<dyn TwinRepository>,
    projects: Arc<dyn ProjectRepository>,
    twin_types: Arc<dyn TwinTypeRepository>,
}

impl Reconciler {
    /// Create a reconciler over the catalog repositories.
    #[must_use]
    pub fn new(
        twins: Arc<dyn TwinRepository>,
        projects: Arc<dyn ProjectRepository>,
        twin_types: Arc<dyn TwinTypeRepository>,
    ) -> Self {
        Self {
            twins,
            projects,
            twin_types,
        }
    }

    /// Apply one lifecycle event.
    ///
    /// # Errors
    ///
    /// Returns `Reconciliation` when a catalog constraint cannot be met
    /// (no project to place a new twin in, unknown project id, missing
    /// twin type) or when `modified`/`deleted` names a twin the catalog
    /// does not hold, and `Storage` on repository failure.
    pub async fn apply(&self, event: &RegistryEventRecord) -> Result<ReconcileOutcome, HandlerError> {
        let Some(action) = TwinAction::parse(&event.action) else {
            tracing::warn!(
                twin_id = %event.twin_id,
                action = %event.action,
                "Dropping registry event with unknown action"
            );
            return Ok(ReconcileOutcome::Ignored);
        };

        let existing = match self.twins.get_by_registry_id(&event.twin_id).await {
            Ok(twin) => Some(twin),
            Err(RepositoryError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };

        let attributes = ThingAttributes::from_payload(&event.payload);

        match (existing, action) {
            (None, TwinAction::Created) => self.create(event, &attributes).await,
            (None, _) => Err(HandlerError::Reconciliation(format!(
                "twin not found: {}",
                event.twin_id
            ))),
            (Some(twin), TwinAction::Created) => self.upsert(twin, &attributes).await,
            (Some(twin), TwinAction::Modified) => self.modify(twin, &attributes).await,
            (Some(twin), TwinAction::Deleted) => {
                self.twins.soft_delete(twin.id).await?;
                tracing::info!(twin_id = %twin.registry_id, id = twin.id, "Twin soft-deleted");
                Ok(ReconcileOutcome::Deleted {
                    id: twin.id,
                    project_id: twin.project_id,
                })
            }
        }
    }

    async fn create(
        &self,
        event: &RegistryEventRecord,
        attributes: &ThingAttributes,
    ) -> Result<ReconcileOutcome, HandlerError> {
        let project_id = match attributes.project_id {
            Some(id) => id,
            None => self.fallback_project().await?,
        };

        let type_id = match self.twin_types.get_by_name(GENERIC_TWIN_TYPE).await {
            Ok(twin_type) => twin_type.id,
            Err(RepositoryError::NotFound) => {
                return Err(HandlerError::Reconciliation(format!(
                    "twin type '{GENERIC_TWIN_TYPE}' does not exist"
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let new_twin = NewTwin {
            registry_id: event.twin_id.clone(),
            name: attributes.display_name(),
            description: attributes.description.clone().unwrap_or_default(),
            type_id,
            project_id,
            model_url: None,
            metadata: serde_json::json!({}),
            created_by: None,
        };

        match self.twins.create(new_twin).await {
            Ok(twin) => {
                tracing::info!(
                    twin_id = %twin.registry_id,
                    id = twin.id,
                    name = %twin.name,
                    project_id = twin.project_id,
                    "Twin created from registry"
                );
                Ok(ReconcileOutcome::Created(twin))
            }
            Err(RepositoryError::Conflict(_)) => {
                // Lost a race with a concurrent creator; the row exists now.
                tracing::debug!(twin_id = %event.twin_id, "Twin already created");
                let twin = self.twins.get_by_registry_id(&event.twin_id).await?;
                self.upsert(twin, attributes).await
            }
            Err(RepositoryError::InvalidInput(msg)) => Err(HandlerError::Reconciliation(msg)),
            Err(e) => Err(e.into()),
        }
    }

    async fn fallback_project(&self) -> Result<CatalogId, HandlerError> {
        self.projects
            .list(0, 1)
            .await?
            .first()
            .map(|p| p.id)
            .ok_or_else(|| HandlerError::Reconciliation("no project to place twin in".to_string()))
    }

    /// `created` for a known twin: converge on the event's attributes.
    async fn upsert(
        &self,
        mut twin: Twin,
        attributes: &ThingAttributes,
    ) -> Result<ReconcileOutcome, HandlerError> {
        let name = attributes.display_name();
        let description = attributes.description.clone().unwrap_or_default();
        if twin.name == name && twin.description == description {
            return Ok(ReconcileOutcome::Unchanged);
        }
        twin.name = name;
        twin.description = description;
        let updated = self.twins.update(&twin).await?;
        Ok(ReconcileOutcome::Updated(updated))
    }

    /// `modified`: apply non-empty name and description.
    async fn modify(
        &self,
        mut twin: Twin,
        attributes: &ThingAttributes,
    ) -> Result<ReconcileOutcome, HandlerError> {
        let mut changed = false;
        if let Some(name) = attributes.name.as_deref().filter(|n| !n.is_empty()) {
            twin.name = name.to_string();
            changed = true;
        }
        if let Some(description) = attributes.description.as_deref().filter(|d| !d.is_empty()) {
            twin.description = description.to_string();
            changed = true;
        }
        if !changed {
            return Ok(ReconcileOutcome::Unchanged);
        }

        let updated = self.twins.update(&twin).await?;
        tracing::info!(twin_id = %updated.registry_id, name = %updated.name, "Twin updated");
        Ok(ReconcileOutcome::Updated(updated))
    }
}

// =============================================================================
// Buffer + Worker
// =============================================================================

type Job = (RegistryEventRecord, oneshot::Sender<Result<(), HandlerError>>);

/// `registry-events` handler feeding the reconciliation buffer.
pub struct RegistryEventConsumer {
    tx: mpsc::Sender<Job>,
}

#[async_trait]
impl MessageHandler for RegistryEventConsumer {
    async fn handle(&self, record: &InboundRecord) -> Result<(), HandlerError> {
        let event: RegistryEventRecord = serde_json::from_slice(&record.payload)?;
        tracing::debug!(twin_id = %event.twin_id, action = %event.action, "Buffering registry event");

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((event, reply_tx))
            .await
            .map_err(|_| HandlerError::Unavailable("reconciliation worker stopped".to_string()))?;

        reply_rx
            .await
            .map_err(|_| HandlerError::Unavailable("reconciliation worker dropped event".to_string()))?
    }
}

/// Single worker draining the reconciliation buffer.
pub struct ReconciliationWorker {
    reconciler: Reconciler,
    notifier: Arc<dyn Notifier>,
    rx: mpsc::Receiver<Job>,
}

impl ReconciliationWorker {
    /// Create the buffer, returning the consumer-side handler and the worker.
    #[must_use]
    pub fn channel(
        reconciler: Reconciler,
        notifier: Arc<dyn Notifier>,
    ) -> (RegistryEventConsumer, Self) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER_CAPACITY);
        (
            RegistryEventConsumer { tx },
            Self {
                reconciler,
                notifier,
                rx,
            },
        )
    }

    /// Drain the buffer until cancelled or every sender is gone.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("Reconciliation worker started");

        loop {
            let job = tokio::select! {
                () = cancel.cancelled() => break,
                job = self.rx.recv() => job,
            };
            let Some((event, reply)) = job else { break };

            let result = self.reconciler.apply(&event).await;
            match &result {
                Ok(outcome) => self.notify(&event, outcome),
                Err(e) => tracing::error!(
                    twin_id = %event.twin_id,
                    action = %event.action,
                    error = %e,
                    "Failed to reconcile registry event"
                ),
            }
            // The consumer may have given up waiting; nothing to do then.
            let _ = reply.send(result.map(|_| ()));
        }

        tracing::info!("Reconciliation worker stopped");
    }

    fn notify(&self, event: &RegistryEventRecord, outcome: &ReconcileOutcome) {
        let project_id = match outcome {
            ReconcileOutcome::Created(twin) | ReconcileOutcome::Updated(twin) => twin.project_id,
            ReconcileOutcome::Deleted { project_id, .. } => *project_id,
            ReconcileOutcome::Unchanged | ReconcileOutcome::Ignored => return,
        };
        self.notifier.notify_project(
            project_id,
            NotificationType::TwinUpdate,
            &format!("twin.{}", event.twin_id),
            serde_json::json!({
                "twinId": event.twin_id,
                "action": event.action,
                "timestamp": event.timestamp,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use mockall::predicate::eq;
    use serde_json::json;

    use super::*;
    use crate::application::ports::{
        MockProjectRepository, MockTwinRepository, MockTwinTypeRepository, NoOpNotifier,
    };
    use crate::domain::twin::{Project, TwinType};

    fn twin(id: CatalogId, registry_id: &str, name: &str) -> Twin {
        Twin {
            id,
            registry_id: registry_id.to_string(),
            name: name.to_string(),
            description: String::new(),
            type_id: 1,
            project_id: 7,
            model_url: None,
            metadata: json!({}),
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    fn generic_type() -> TwinType {
        TwinType {
            id: 1,
            name: GENERIC_TWIN_TYPE.to_string(),
            version: "1".to_string(),
            schema: json!({}),
            created_at: Utc::now(),
        }
    }

    fn event(action: &str, payload: serde_json::Value) -> RegistryEventRecord {
        RegistryEventRecord {
            twin_id: "twinA".to_string(),
            action: action.to_string(),
            timestamp: Utc::now(),
            payload,
        }
    }

    fn reconciler(
        twins: MockTwinRepository,
        projects: MockProjectRepository,
        types: MockTwinTypeRepository,
    ) -> Reconciler {
        Reconciler::new(Arc::new(twins), Arc::new(projects), Arc::new(types))
    }

    #[tokio::test]
    async fn created_unknown_twin_uses_project_attribute() {
        let mut twins = MockTwinRepository::new();
        twins
            .expect_get_by_registry_id()
            .with(eq("twinA"))
            .returning(|_| Err(RepositoryError::NotFound));
        twins
            .expect_create()
            .withf(|t| t.project_id == 7 && t.name == "Pump-1" && t.type_id == 1)
            .returning(|t| Ok(twin(10, &t.registry_id, &t.name)));

        let mut projects = MockProjectRepository::new();
        projects.expect_list().never();

        let mut types = MockTwinTypeRepository::new();
        types
            .expect_get_by_name()
            .returning(|_| Ok(generic_type()));

        let outcome = reconciler(twins, projects, types)
            .apply(&event("created", json!({"attributes": {"name": "Pump-1", "projectId": 7}})))
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Created(t) if t.id == 10));
    }

    #[tokio::test]
    async fn created_without_project_falls_back_to_oldest() {
        let mut twins = MockTwinRepository::new();
        twins
            .expect_get_by_registry_id()
            .returning(|_| Err(RepositoryError::NotFound));
        twins
            .expect_create()
            .withf(|t| t.project_id == 3 && t.name == "Unknown Twin")
            .returning(|t| Ok(twin(11, &t.registry_id, &t.name)));

        let mut projects = MockProjectRepository::new();
        projects.expect_list().with(eq(0), eq(1)).returning(|_, _| {
            Ok(vec![Project {
                id: 3,
                name: "Default".to_string(),
                description: String::new(),
                created_at: Utc::now(),
            }])
        });

        let mut types = MockTwinTypeRepository::new();
        types
            .expect_get_by_name()
            .returning(|_| Ok(generic_type()));

        let outcome = reconciler(twins, projects, types)
            .apply(&event("created", json!({})))
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Created(_)));
    }

    #[tokio::test]
    async fn created_without_any_project_fails() {
        let mut twins = MockTwinRepository::new();
        twins
            .expect_get_by_registry_id()
            .returning(|_| Err(RepositoryError::NotFound));
        twins.expect_create().never();

        let mut projects = MockProjectRepository::new();
        projects.expect_list().returning(|_, _| Ok(Vec::new()));

        let result = reconciler(twins, projects, MockTwinTypeRepository::new())
            .apply(&event("created", json!({})))
            .await;

        assert!(matches!(result, Err(HandlerError::Reconciliation(_))));
    }

    #[tokio::test]
    async fn modified_applies_non_empty_attributes() {
        let mut twins = MockTwinRepository::new();
        twins
            .expect_get_by_registry_id()
            .returning(|_| Ok(twin(10, "twinA", "Old")));
        twins
            .expect_update()
            .withf(|t| t.name == "New" && t.description.is_empty())
            .returning(|t| Ok(t.clone()));

        let outcome = reconciler(
            twins,
            MockProjectRepository::new(),
            MockTwinTypeRepository::new(),
        )
        .apply(&event("modified", json!({"attributes": {"name": "New", "description": ""}})))
        .await
        .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Updated(t) if t.name == "New"));
    }

    #[tokio::test]
    async fn modified_without_attributes_is_unchanged() {
        let mut twins = MockTwinRepository::new();
        twins
            .expect_get_by_registry_id()
            .returning(|_| Ok(twin(10, "twinA", "Old")));
        twins.expect_update().never();

        let outcome = reconciler(
            twins,
            MockProjectRepository::new(),
            MockTwinTypeRepository::new(),
        )
        .apply(&event("modified", json!(21.5)))
        .await
        .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Unchanged);
    }

    #[tokio::test]
    async fn modified_repository_failure_is_returned() {
        let mut twins = MockTwinRepository::new();
        twins
            .expect_get_by_registry_id()
            .returning(|_| Ok(twin(10, "twinA", "Old")));
        twins
            .expect_update()
            .returning(|_| Err(RepositoryError::Database("connection reset".to_string())));

        let result = reconciler(
            twins,
            MockProjectRepository::new(),
            MockTwinTypeRepository::new(),
        )
        .apply(&event("modified", json!({"attributes": {"name": "New"}})))
        .await;

        assert!(matches!(result, Err(HandlerError::Storage(_))));
    }

    #[tokio::test]
    async fn deleted_soft_deletes() {
        let mut twins = MockTwinRepository::new();
        twins
            .expect_get_by_registry_id()
            .returning(|_| Ok(twin(10, "twinA", "Pump")));
        twins
            .expect_soft_delete()
            .with(eq(10))
            .times(1)
            .returning(|_| Ok(()));

        let outcome = reconciler(
            twins,
            MockProjectRepository::new(),
            MockTwinTypeRepository::new(),
        )
        .apply(&event("deleted", json!(null)))
        .await
        .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Deleted { id: 10, project_id: 7 });
    }

    #[tokio::test]
    async fn modify_of_unknown_twin_fails() {
        let mut twins = MockTwinRepository::new();
        twins
            .expect_get_by_registry_id()
            .returning(|_| Err(RepositoryError::NotFound));
        twins.expect_update().never();

        let err = reconciler(
            twins,
            MockProjectRepository::new(),
            MockTwinTypeRepository::new(),
        )
        .apply(&event("modified", json!({"attributes": {"name": "Ghost"}})))
        .await
        .unwrap_err();

        assert_eq!(
            err,
            HandlerError::Reconciliation("twin not found: twinA".to_string())
        );
    }

    #[tokio::test]
    async fn unknown_action_is_ignored() {
        let mut twins = MockTwinRepository::new();
        twins.expect_get_by_registry_id().never();

        let outcome = reconciler(
            twins,
            MockProjectRepository::new(),
            MockTwinTypeRepository::new(),
        )
        .apply(&event("merged", json!({})))
        .await
        .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Ignored);
    }

    #[tokio::test]
    async fn create_conflict_converges_on_existing_row() {
        let mut twins = MockTwinRepository::new();
        let mut lookups = 0;
        twins.expect_get_by_registry_id().returning(move |_| {
            lookups += 1;
            if lookups == 1 {
                Err(RepositoryError::NotFound)
            } else {
                Ok(twin(10, "twinA", "Pump-1"))
            }
        });
        twins
            .expect_create()
            .returning(|_| Err(RepositoryError::Conflict("registry_id".to_string())));
        twins.expect_update().never();

        let mut types = MockTwinTypeRepository::new();
        types
            .expect_get_by_name()
            .returning(|_| Ok(generic_type()));

        let outcome = reconciler(twins, MockProjectRepository::new(), types)
            .apply(&event("created", json!({"attributes": {"name": "Pump-1", "projectId": 7}})))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Unchanged);
    }

    #[tokio::test]
    async fn worker_replies_with_handler_result() {
        let mut twins = MockTwinRepository::new();
        twins
            .expect_get_by_registry_id()
            .returning(|_| Ok(twin(10, "twinA", "Old")));
        twins
            .expect_update()
            .returning(|_| Err(RepositoryError::Database("down".to_string())));

        let reconciler = reconciler(
            twins,
            MockProjectRepository::new(),
            MockTwinTypeRepository::new(),
        );
        let (consumer, worker) = ReconciliationWorker::channel(reconciler, Arc::new(NoOpNotifier));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(worker.run(cancel.clone()));

        let payload = serde_json::to_vec(&event("modified", json!({"attributes": {"name": "X"}})))
            .unwrap();
        let record = InboundRecord::new("registry-events", "twinA", payload);
        let result = consumer.handle(&record).await;
        assert!(matches!(result, Err(HandlerError::Storage(_))));

        let garbage = InboundRecord::new("registry-events", "twinA", b"not json".to_vec());
        assert!(matches!(
            consumer.handle(&garbage).await,
            Err(HandlerError::Protocol(_))
        ));

        cancel.cancel();
        handle.await.unwrap();
    }
}
