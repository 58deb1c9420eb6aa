use std::collections::{HashMap, HashSet};

use fieldwork_core::{Document, ResourceId};

use crate::query::Constraint;

/// What a document contributed to the index, kept per id so `remove` can
/// take entries back out without a full scan.
#[derive(Debug, Default)]
struct IndexedEntries {
    matches: Vec<(String, String)>,
    contains: Vec<(String, String)>,
    exists: Vec<String>,
}

/// In-memory inverted index over constraint paths. Match slots map
/// path -> value -> ids, contain slots do the same for list-valued paths
/// (one entry per list element), exist slots map path -> ids.
#[derive(Debug, Default)]
pub struct ConstraintIndex {
    match_slots: HashMap<String, HashMap<String, HashSet<ResourceId>>>,
    contain_slots: HashMap<String, HashMap<String, HashSet<ResourceId>>>,
    exist_slots: HashMap<String, HashSet<ResourceId>>,
    entries_by_id: HashMap<ResourceId, IndexedEntries>,
}

impl ConstraintIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes the winning revision of a document, replacing any previous
    /// entries for the same id.
    pub fn put(&mut self, document: &Document) {
        let id = document.id();
        self.remove(id);

        let mut entries = IndexedEntries::default();
        entries.matches.push((
            "identifier".to_string(),
            document.resource.identifier.clone(),
        ));
        entries
            .matches
            .push(("category".to_string(), document.resource.category.clone()));
        for (name, targets) in &document.resource.relations {
            let path = format!("relations.{name}");
            for target in targets {
                entries.contains.push((path.clone(), target.to_string()));
            }
            entries.exists.push(path);
        }
        if document.resource.geometry.is_some() {
            entries.exists.push("geometry".to_string());
        }
        if !document.conflicts.is_empty() {
            entries.exists.push("conflicts".to_string());
        }

        for (path, value) in &entries.matches {
            self.match_slots
                .entry(path.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(id);
        }
        for (path, value) in &entries.contains {
            self.contain_slots
                .entry(path.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(id);
        }
        for path in &entries.exists {
            self.exist_slots.entry(path.clone()).or_default().insert(id);
        }
        self.entries_by_id.insert(id, entries);
    }

    pub fn remove(&mut self, id: ResourceId) {
        let Some(entries) = self.entries_by_id.remove(&id) else {
            return;
        };
        for (path, value) in &entries.matches {
            if let Some(values) = self.match_slots.get_mut(path)
                && let Some(ids) = values.get_mut(value)
            {
                ids.remove(&id);
            }
        }
        for (path, value) in &entries.contains {
            if let Some(values) = self.contain_slots.get_mut(path)
                && let Some(ids) = values.get_mut(value)
            {
                ids.remove(&id);
            }
        }
        for path in &entries.exists {
            if let Some(ids) = self.exist_slots.get_mut(path) {
                ids.remove(&id);
            }
        }
    }

    pub fn get(&self, constraint: &Constraint) -> HashSet<ResourceId> {
        match constraint {
            Constraint::Match { path, value } => self
                .match_slots
                .get(path)
                .and_then(|values| values.get(value))
                .cloned()
                .unwrap_or_default(),
            Constraint::Contain { path, value } => self
                .contain_slots
                .get(path)
                .and_then(|values| values.get(value))
                .cloned()
                .unwrap_or_default(),
            Constraint::Exist { path } => {
                self.exist_slots.get(path).cloned().unwrap_or_default()
            }
        }
    }

    pub fn clear(&mut self) {
        self.match_slots.clear();
        self.contain_slots.clear();
        self.exist_slots.clear();
        self.entries_by_id.clear();
    }
}

#[cfg(test)]
mod tests {
    use fieldwork_core::{Hlc, Resource, LIES_WITHIN};

    use super::*;

    fn doc(identifier: &str, category: &str) -> Document {
        Document::from_resource(Resource::new(identifier, category), "alice", Hlc::new(1, 0))
    }

    #[test]
    fn match_and_contain_lookup() {
        let mut index = ConstraintIndex::new();
        let parent = doc("t1", "Trench");
        let mut child = doc("f1", "Feature");
        child.resource.add_relation_target(LIES_WITHIN, parent.id());
        index.put(&parent);
        index.put(&child);

        let by_identifier = index.get(&Constraint::matches("identifier", "f1"));
        assert_eq!(by_identifier, HashSet::from([child.id()]));

        let children = index.get(&Constraint::contains(
            "relations.liesWithin",
            parent.id().to_string(),
        ));
        assert_eq!(children, HashSet::from([child.id()]));
    }

    #[test]
    fn reindex_replaces_previous_entries() {
        let mut index = ConstraintIndex::new();
        let mut document = doc("f1", "Feature");
        index.put(&document);

        document.resource.identifier = "f1-renamed".to_string();
        index.put(&document);

        assert!(index.get(&Constraint::matches("identifier", "f1")).is_empty());
        assert_eq!(
            index.get(&Constraint::matches("identifier", "f1-renamed")),
            HashSet::from([document.id()])
        );
    }

    #[test]
    fn remove_drops_all_entries() {
        let mut index = ConstraintIndex::new();
        let mut document = doc("f1", "Feature");
        document
            .resource
            .add_relation_target("isAfter", ResourceId::new());
        index.put(&document);
        index.remove(document.id());

        assert!(index.get(&Constraint::matches("category", "Feature")).is_empty());
        assert!(index.get(&Constraint::exists("relations.isAfter")).is_empty());
    }
}
