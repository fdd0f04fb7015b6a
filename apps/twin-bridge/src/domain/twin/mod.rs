//! Catalog Entities
//!
//! Twins, twin types and projects as the relational catalog stores them.
//! A twin is identified twice: by the registry's opaque string id (the
//! `registry_id`, unique across non-deleted twins) and by the catalog's
//! integer primary key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Catalog primary key type.
pub type CatalogId = i64;

/// Name of the twin type assigned to twins discovered through the registry.
pub const GENERIC_TWIN_TYPE: &str = "generic";

/// Fallback display name for a twin created without a `name` attribute.
pub const UNKNOWN_TWIN_NAME: &str = "Unknown Twin";

// =============================================================================
// Twin
// =============================================================================

/// A digital twin row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Twin {
    /// Internal id.
    pub id: CatalogId,
    /// Registry (Ditto thing) id.
    pub registry_id: String,
    /// Human readable name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Twin type reference.
    pub type_id: CatalogId,
    /// Owning project reference.
    pub project_id: CatalogId,
    /// Optional 3D model location.
    pub model_url: Option<String>,
    /// Free-form metadata object.
    pub metadata: serde_json::Value,
    /// Creating user, `None` for twins discovered by the bridge.
    pub created_by: Option<CatalogId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Twin {
    /// Whether the twin has been soft-deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Values needed to insert a new twin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTwin {
    /// Registry (Ditto thing) id.
    pub registry_id: String,
    /// Human readable name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Twin type reference.
    pub type_id: CatalogId,
    /// Owning project reference.
    pub project_id: CatalogId,
    /// Optional 3D model location.
    pub model_url: Option<String>,
    /// Free-form metadata object.
    pub metadata: serde_json::Value,
    /// Creating user.
    pub created_by: Option<CatalogId>,
}

// =============================================================================
// Twin Type / Project
// =============================================================================

/// Schema template a twin conforms to. Read-only from the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwinType {
    /// Internal id.
    pub id: CatalogId,
    /// Unique name.
    pub name: String,
    /// Schema version string.
    pub version: String,
    /// JSON schema document.
    pub schema: serde_json::Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Grouping bucket for twins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Internal id.
    pub id: CatalogId,
    /// Project name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A user's membership in a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMember {
    /// Project reference.
    pub project_id: CatalogId,
    /// Member user id.
    pub user_id: CatalogId,
    /// Role within the project.
    pub role: String,
}

// =============================================================================
// Lifecycle Actions
// =============================================================================

/// Lifecycle action carried in the last segment of a registry topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TwinAction {
    /// Thing or feature created.
    Created,
    /// Thing or feature changed.
    Modified,
    /// Thing or feature removed.
    Deleted,
}

impl TwinAction {
    /// Parse the registry's action name. Unknown names yield `None`.
    #[must_use]
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "created" => Some(Self::Created),
            "modified" => Some(Self::Modified),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Wire name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }

    /// Whether the action produces a new feature value worth sampling.
    #[must_use]
    pub const fn carries_sample(self) -> bool {
        matches!(self, Self::Created | Self::Modified)
    }
}

impl std::fmt::Display for TwinAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Thing Attributes
// =============================================================================

/// The subset of a registry thing's `attributes` the catalog mirrors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThingAttributes {
    /// `attributes.name` when it is a string.
    pub name: Option<String>,
    /// `attributes.description` when it is a string.
    pub description: Option<String>,
    /// `attributes.projectId` when it is a positive integral number.
    pub project_id: Option<CatalogId>,
}

impl ThingAttributes {
    /// Extract mirrored attributes from a thing payload.
    ///
    /// Accepts either a full thing (`{"attributes": {...}}`) or nothing
    /// useful at all; missing or mistyped fields are left as `None`.
    #[must_use]
    pub fn from_payload(payload: &serde_json::Value) -> Self {
        let Some(attributes) = payload.get("attributes").and_then(|a| a.as_object()) else {
            return Self::default();
        };

        let string_attr = |key: &str| {
            attributes
                .get(key)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        };

        let project_id = attributes.get("projectId").and_then(|v| {
            v.as_i64().or_else(|| {
                v.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 1.0 && *f <= i64::MAX as f64)
                    .map(|f| f as i64)
            })
        });

        Self {
            name: string_attr("name"),
            description: string_attr("description"),
            project_id: project_id.filter(|id| *id > 0),
        }
    }

    /// Name to use for a newly created twin.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(UNKNOWN_TWIN_NAME)
            .to_string()
    }
}
