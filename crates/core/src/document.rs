use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::field_value::FieldValue;
use crate::hlc::Hlc;
use crate::ids::{ResourceId, RevisionId};
use crate::CoreError;

/// Hierarchical relation linking a resource to the operation (e.g. a
/// trench) it was recorded in.
pub const RECORDED_IN: &str = "isRecordedIn";

/// Hierarchical relation linking a resource to its direct parent within an
/// operation.
pub const LIES_WITHIN: &str = "liesWithin";

/// The two relations that span the parent/child forest. Exactly one of them
/// may be set per resource.
pub fn is_hierarchical(relation_name: &str) -> bool {
    relation_name == RECORDED_IN || relation_name == LIES_WITHIN
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryType {
    Point,
    Polyline,
    Polygon,
}

/// Minimal geometry payload. Coordinates are flattened per geometry type;
/// the map layer interprets them, the core only carries them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub geometry_type: GeometryType,
    pub coordinates: Vec<f64>,
}

/// The user-meaningful payload of a document: a human-facing identifier
/// (unique per project among live resources), a category, named relation
/// target lists, optional geometry and the open map of category-defined
/// fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub identifier: String,
    pub category: String,
    #[serde(default)]
    pub relations: BTreeMap<String, Vec<ResourceId>>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl Resource {
    pub fn new(identifier: &str, category: &str) -> Self {
        Self {
            id: ResourceId::new(),
            identifier: identifier.to_string(),
            category: category.to_string(),
            relations: BTreeMap::new(),
            geometry: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn relation_targets(&self, relation_name: &str) -> &[ResourceId] {
        self.relations
            .get(relation_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Appends `target` to the relation's target list; idempotent.
    pub fn add_relation_target(&mut self, relation_name: &str, target: ResourceId) {
        let targets = self.relations.entry(relation_name.to_string()).or_default();
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    /// Removes `target` from the relation's target list, dropping the
    /// relation entirely when its list becomes empty.
    pub fn remove_relation_target(&mut self, relation_name: &str, target: ResourceId) {
        if let Some(targets) = self.relations.get_mut(relation_name) {
            targets.retain(|id| *id != target);
            if targets.is_empty() {
                self.relations.remove(relation_name);
            }
        }
    }

    /// True if any relation, regardless of name, references `other`.
    pub fn references(&self, other: ResourceId) -> bool {
        self.relations.values().any(|targets| targets.contains(&other))
    }
}

/// One entry of a document's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub user: String,
    pub at: Hlc,
}

/// A resource plus its store-managed envelope. The revision id and the
/// conflict list are owned by the backing store and set on fetch; the body
/// (resource + audit trail) is what gets hashed into revision ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub resource: Resource,
    pub created: Action,
    #[serde(default)]
    pub modified: Vec<Action>,
    #[serde(skip)]
    pub revision_id: Option<RevisionId>,
    #[serde(skip)]
    pub conflicts: Vec<RevisionId>,
}

impl Document {
    pub fn from_resource(resource: Resource, user: &str, at: Hlc) -> Self {
        Self {
            resource,
            created: Action {
                user: user.to_string(),
                at,
            },
            modified: Vec::new(),
            revision_id: None,
            conflicts: Vec::new(),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.resource.id
    }

    /// Timestamp of the most recent edit; the creation timestamp for
    /// documents never modified. Drives find() ordering and the
    /// latest-timestamp-wins merge policy.
    pub fn last_modified(&self) -> Hlc {
        self.modified
            .last()
            .map(|action| action.at)
            .unwrap_or(self.created.at)
    }

    pub fn stamp_modified(&mut self, user: &str, at: Hlc) {
        self.modified.push(Action {
            user: user.to_string(),
            at,
        });
    }

    /// Serializes the document body (resource + audit trail) for storage
    /// and revision-id derivation. BTreeMap fields keep the encoding
    /// deterministic across replicas.
    pub fn body_bytes(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_body_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_bytes_roundtrip() {
        let mut resource = Resource::new("t1", "Trench");
        resource.fields.insert("depth".into(), FieldValue::Float(1.5));
        resource.add_relation_target(RECORDED_IN, ResourceId::new());
        let doc = Document::from_resource(resource, "alice", Hlc::new(1000, 0));

        let bytes = doc.body_bytes().unwrap();
        let restored = Document::from_body_bytes(&bytes).unwrap();
        assert_eq!(restored, doc);
    }

    #[test]
    fn body_bytes_is_deterministic() {
        let resource = Resource::new("f1", "Feature");
        let doc = Document::from_resource(resource, "bob", Hlc::new(42, 0));
        assert_eq!(doc.body_bytes().unwrap(), doc.body_bytes().unwrap());
    }

    #[test]
    fn last_modified_falls_back_to_created() {
        let resource = Resource::new("f1", "Feature");
        let mut doc = Document::from_resource(resource, "bob", Hlc::new(42, 0));
        assert_eq!(doc.last_modified(), Hlc::new(42, 0));

        doc.stamp_modified("alice", Hlc::new(43, 0));
        doc.stamp_modified("bob", Hlc::new(44, 0));
        assert_eq!(doc.last_modified(), Hlc::new(44, 0));
    }

    #[test]
    fn relation_target_edits_are_idempotent() {
        let mut resource = Resource::new("f1", "Feature");
        let target = ResourceId::new();
        resource.add_relation_target("isAfter", target);
        resource.add_relation_target("isAfter", target);
        assert_eq!(resource.relation_targets("isAfter"), &[target]);

        resource.remove_relation_target("isAfter", target);
        assert!(resource.relations.get("isAfter").is_none());
    }
}
