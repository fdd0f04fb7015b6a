//! Catalog Repository Ports (Driven Ports)
//!
//! Narrow capability sets over the relational catalog. Adapters enforce the
//! catalog invariants: a registry id is unique among non-deleted twins, and
//! a twin's type and project must exist.

use async_trait::async_trait;

use crate::domain::twin::{CatalogId, NewTwin, Project, ProjectMember, Twin, TwinType};

/// Catalog and time-series repository errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    /// No matching row.
    #[error("record not found")]
    NotFound,

    /// Input violates a referential or value constraint.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Input violates a uniqueness constraint.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Database failure.
    #[error("database error: {0}")]
    Database(String),
}

impl RepositoryError {
    /// Whether this is [`RepositoryError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Twin rows.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TwinRepository: Send + Sync {
    /// Find a non-deleted twin by registry id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no live twin carries the id.
    async fn get_by_registry_id(&self, registry_id: &str) -> Result<Twin, RepositoryError>;

    /// Find a non-deleted twin by catalog id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the twin does not exist or is deleted.
    async fn get_by_id(&self, id: CatalogId) -> Result<Twin, RepositoryError>;

    /// Insert a twin.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if a live twin already has the registry id, and
    /// `InvalidInput` if the type or project does not exist.
    async fn create(&self, twin: NewTwin) -> Result<Twin, RepositoryError>;

    /// Persist the mutable fields of a twin and bump `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the twin does not exist or is deleted.
    async fn update(&self, twin: &Twin) -> Result<Twin, RepositoryError>;

    /// Mark a twin deleted.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the twin does not exist or is already deleted.
    async fn soft_delete(&self, id: CatalogId) -> Result<(), RepositoryError>;

    /// Live twins of a project, oldest first.
    async fn list_by_project(
        &self,
        project_id: CatalogId,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Twin>, RepositoryError>;
}

/// Project rows.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    /// Find a project.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the project does not exist.
    async fn get_by_id(&self, id: CatalogId) -> Result<Project, RepositoryError>;

    /// Projects ordered by creation time, oldest first.
    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Project>, RepositoryError>;

    /// Members of a project.
    async fn members(&self, project_id: CatalogId) -> Result<Vec<ProjectMember>, RepositoryError>;
}

/// Twin type rows. Read-only from the bridge.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TwinTypeRepository: Send + Sync {
    /// Find a twin type by id.
    async fn get_by_id(&self, id: CatalogId) -> Result<TwinType, RepositoryError>;

    /// Find a twin type by its unique name.
    async fn get_by_name(&self, name: &str) -> Result<TwinType, RepositoryError>;

    /// All twin types ordered by name.
    async fn list(&self) -> Result<Vec<TwinType>, RepositoryError>;
}
