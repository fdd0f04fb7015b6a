//! Postgres catalog repositories.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::application::ports::{
    ProjectRepository, RepositoryError, TwinRepository, TwinTypeRepository,
};
use crate::domain::twin::{CatalogId, NewTwin, Project, ProjectMember, Twin, TwinType};

const TWIN_COLUMNS: &str = "id, registry_id, name, description, type_id, project_id, model_url, \
     metadata, created_by, created_at, updated_at, deleted_at";

/// Catalog repositories over one pool.
#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    /// Create the catalog over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn twin_from_row(row: &PgRow) -> Result<Twin, RepositoryError> {
    Ok(Twin {
        id: row.try_get("id")?,
        registry_id: row.try_get("registry_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        type_id: row.try_get("type_id")?,
        project_id: row.try_get("project_id")?,
        model_url: row.try_get("model_url")?,
        metadata: row.try_get("metadata")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn project_from_row(row: &PgRow) -> Result<Project, RepositoryError> {
    Ok(Project {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

fn twin_type_from_row(row: &PgRow) -> Result<TwinType, RepositoryError> {
    Ok(TwinType {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        version: row.try_get("version")?,
        schema: row.try_get("json_schema")?,
        created_at: row.try_get("created_at")?,
    })
}

// =============================================================================
// Twins
// =============================================================================

#[async_trait]
impl TwinRepository for PgCatalog {
    async fn get_by_registry_id(&self, registry_id: &str) -> Result<Twin, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TWIN_COLUMNS} FROM twins WHERE registry_id = $1 AND deleted_at IS NULL"
        ))
        .bind(registry_id)
        .fetch_one(&self.pool)
        .await?;
        twin_from_row(&row)
    }

    async fn get_by_id(&self, id: CatalogId) -> Result<Twin, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TWIN_COLUMNS} FROM twins WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        twin_from_row(&row)
    }

    async fn create(&self, twin: NewTwin) -> Result<Twin, RepositoryError> {
        let result = sqlx::query(&format!(
            r"
            INSERT INTO twins (
                registry_id, name, description, type_id, project_id,
                model_url, metadata, created_by
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {TWIN_COLUMNS}
            "
        ))
        .bind(&twin.registry_id)
        .bind(&twin.name)
        .bind(&twin.description)
        .bind(twin.type_id)
        .bind(twin.project_id)
        .bind(&twin.model_url)
        .bind(&twin.metadata)
        .bind(twin.created_by)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => twin_from_row(&row),
            Err(e) => Err(match RepositoryError::from(e) {
                RepositoryError::Conflict(_) => RepositoryError::Conflict(format!(
                    "twin with registry id '{}' already exists",
                    twin.registry_id
                )),
                RepositoryError::InvalidInput(_) => RepositoryError::InvalidInput(format!(
                    "twin type {} or project {} does not exist",
                    twin.type_id, twin.project_id
                )),
                other => other,
            }),
        }
    }

    async fn update(&self, twin: &Twin) -> Result<Twin, RepositoryError> {
        let row = sqlx::query(&format!(
            r"
            UPDATE twins SET
                name = $2, description = $3, type_id = $4, project_id = $5,
                model_url = $6, metadata = $7, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {TWIN_COLUMNS}
            "
        ))
        .bind(twin.id)
        .bind(&twin.name)
        .bind(&twin.description)
        .bind(twin.type_id)
        .bind(twin.project_id)
        .bind(&twin.model_url)
        .bind(&twin.metadata)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepositoryError::NotFound)?;
        twin_from_row(&row)
    }

    async fn soft_delete(&self, id: CatalogId) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE twins SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_by_project(
        &self,
        project_id: CatalogId,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Twin>, RepositoryError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {TWIN_COLUMNS} FROM twins
            WHERE project_id = $1 AND deleted_at IS NULL
            ORDER BY created_at, id
            OFFSET $2 LIMIT $3
            "
        ))
        .bind(project_id)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(twin_from_row).collect()
    }
}

// =============================================================================
// Projects
// =============================================================================

#[async_trait]
impl ProjectRepository for PgCatalog {
    async fn get_by_id(&self, id: CatalogId) -> Result<Project, RepositoryError> {
        let row = sqlx::query("SELECT id, name, description, created_at FROM projects WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        project_from_row(&row)
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Project>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, description, created_at FROM projects ORDER BY created_at, id OFFSET $1 LIMIT $2",
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(project_from_row).collect()
    }

    async fn members(&self, project_id: CatalogId) -> Result<Vec<ProjectMember>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT project_id, user_id, role FROM project_members WHERE project_id = $1 ORDER BY user_id",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ProjectMember, RepositoryError> {
                Ok(ProjectMember {
                    project_id: row.try_get("project_id")?,
                    user_id: row.try_get("user_id")?,
                    role: row.try_get("role")?,
                })
            })
            .collect()
    }
}

// =============================================================================
// Twin Types
// =============================================================================

#[async_trait]
impl TwinTypeRepository for PgCatalog {
    async fn get_by_id(&self, id: CatalogId) -> Result<TwinType, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, version, json_schema, created_at FROM twin_types WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        twin_type_from_row(&row)
    }

    async fn get_by_name(&self, name: &str) -> Result<TwinType, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, version, json_schema, created_at FROM twin_types WHERE name = $1",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        twin_type_from_row(&row)
    }

    async fn list(&self) -> Result<Vec<TwinType>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, version, json_schema, created_at FROM twin_types ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(twin_type_from_row).collect()
    }
}
