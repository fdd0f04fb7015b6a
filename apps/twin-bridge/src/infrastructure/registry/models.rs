//! Registry API v2 resources.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A twin as stored by the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thing {
    /// `<namespace>:<name>`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thing_id: String,
    /// Policy guarding the thing.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub policy_id: String,
    /// Definition identifier.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub definition: String,
    /// Free-form attributes.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    /// Features by id.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub features: HashMap<String, Feature>,
    /// Revision counter.
    #[serde(rename = "_revision", default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<i64>,
    /// Last modification time.
    #[serde(rename = "_modified", default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    /// Creation time.
    #[serde(rename = "_created", default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

impl Thing {
    /// Namespace part of the thing id.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.thing_id.split_once(':').map(|(ns, _)| ns)
    }
}

/// A feature of a thing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Definition identifiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<Vec<String>>,
    /// Feature properties.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

/// Feature property document.
pub type FeatureProperties = Map<String, Value>;

/// An access policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Policy id.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub policy_id: String,
    /// Entries by label.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub entries: HashMap<String, PolicyEntry>,
    /// Revision counter.
    #[serde(rename = "_revision", default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<i64>,
}

/// One labelled policy entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEntry {
    /// Subjects by id.
    #[serde(default)]
    pub subjects: HashMap<String, PolicySubject>,
    /// Resources by path.
    #[serde(default)]
    pub resources: HashMap<String, PolicyResource>,
}

/// Subject of a policy entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySubject {
    /// Subject type.
    #[serde(rename = "type", default)]
    pub subject_type: String,
}

/// Permissions on a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyResource {
    /// Granted permissions.
    #[serde(default)]
    pub grant: Vec<String>,
    /// Revoked permissions.
    #[serde(default)]
    pub revoke: Vec<String>,
}

/// Registry error response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryErrorBody {
    /// HTTP status echoed by the registry.
    #[serde(default)]
    pub status: u16,
    /// Error code, e.g. `things:thing.notfound`.
    #[serde(default)]
    pub error: String,
    /// Human readable message.
    #[serde(default)]
    pub message: String,
    /// Extra detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Documentation link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

/// Search response page.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchResult {
    /// Matching things.
    #[serde(default)]
    pub items: Vec<Thing>,
    /// Cursor for the next page.
    #[serde(default, rename = "cursor")]
    pub cursor: Option<String>,
}
