//! Knowledge graph data model.
//!
//! Field names follow the wire format shared by the memory file and the MCP
//! tools: `entityType`, `relationType`, `createdAt`. Entities are keyed by
//! `name`, relations by the `(from, to, relationType)` triple.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A named node. `created_at` and `version` are stamped server-side; inputs
/// may omit them (older memory files do as well).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// The name of the entity
    pub name: String,
    /// The type of the entity
    pub entity_type: String,
    /// An array of observation contents associated with the entity
    #[serde(default)]
    pub observations: Vec<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub version: u32,
}

/// A directed, typed edge between two entity names. Endpoints are not
/// checked against the entity set; a relation may reference a name that
/// does not (yet) exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    /// The name of the entity where the relation starts
    pub from: String,
    /// The name of the entity where the relation ends
    pub to: String,
    /// The type of the relation
    pub relation_type: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub version: u32,
}

impl Relation {
    pub fn same_key(&self, other: &RelationRef) -> bool {
        self.from == other.from
            && self.to == other.to
            && self.relation_type == other.relation_type
    }
}

/// Identifies a relation by its composite key without the bookkeeping
/// fields. Used by delete and update operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelationRef {
    /// The name of the entity where the relation starts
    pub from: String,
    /// The name of the entity where the relation ends
    pub to: String,
    /// The type of the relation
    pub relation_type: String,
}

/// Partial entity update. Omitted fields keep their prior values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntityUpdate {
    /// The name of the entity to update
    pub name: String,
    /// The updated type of the entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    /// The updated array of observation contents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations: Option<Vec<String>>,
}

/// Observations to append to one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObservationInput {
    /// The name of the entity to add the observations to
    pub entity_name: String,
    /// An array of observation contents to add
    pub contents: Vec<String>,
}

/// What was actually appended for one entity (duplicates are dropped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObservationResult {
    pub entity_name: String,
    pub added_observations: Vec<String>,
}

/// Observations to remove from one entity (exact string match).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObservationDeletion {
    /// The name of the entity containing the observations
    pub entity_name: String,
    /// An array of observations to delete
    pub observations: Vec<String>,
}

/// The whole graph. Entity names are unique within `entities`, relation
/// keys unique within `relations`; insertion order is preserved through
/// serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct KnowledgeGraph {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}
