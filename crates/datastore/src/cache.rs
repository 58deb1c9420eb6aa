use std::collections::HashMap;

use fieldwork_core::{Document, ResourceId};

/// Write-through cache of winning revisions, keyed by resource id. The
/// cached instance is the one handed to callers, so remote changes must go
/// through `reassign` to keep views that hold a copy coherent.
#[derive(Debug, Default)]
pub struct DocumentCache {
    documents: HashMap<ResourceId, Document>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ResourceId) -> Option<&Document> {
        self.documents.get(&id)
    }

    pub fn set(&mut self, document: Document) -> &Document {
        let id = document.id();
        self.documents.insert(id, document);
        &self.documents[&id]
    }

    pub fn remove(&mut self, id: ResourceId) {
        self.documents.remove(&id);
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.documents.contains_key(&id)
    }

    /// Merges a freshly fetched winning revision over the cached entry.
    /// The conflict list is replaced wholesale: an incoming document with
    /// no conflicts clears a previously conflicted cache entry, which is
    /// how a completed resolution becomes visible to readers.
    pub fn reassign(&mut self, document: Document) -> &Document {
        let id = document.id();
        match self.documents.get_mut(&id) {
            Some(cached) => {
                cached.resource = document.resource;
                cached.created = document.created;
                cached.modified = document.modified;
                cached.revision_id = document.revision_id;
                cached.conflicts = document.conflicts;
                &self.documents[&id]
            }
            None => self.set(document),
        }
    }

    pub fn clear(&mut self) {
        self.documents.clear();
    }
}

#[cfg(test)]
mod tests {
    use fieldwork_core::{Hlc, Resource, RevisionId};

    use super::*;

    fn doc(identifier: &str) -> Document {
        Document::from_resource(Resource::new(identifier, "Find"), "alice", Hlc::new(1, 0))
    }

    #[test]
    fn reassign_replaces_conflicts_wholesale() {
        let mut cache = DocumentCache::new();
        let mut conflicted = doc("f1");
        conflicted.conflicts = vec![RevisionId::root(b"other")];
        cache.set(conflicted.clone());

        let mut resolved = conflicted.clone();
        resolved.conflicts = Vec::new();
        cache.reassign(resolved);

        assert!(cache.get(conflicted.id()).unwrap().conflicts.is_empty());
    }

    #[test]
    fn reassign_inserts_on_miss() {
        let mut cache = DocumentCache::new();
        let document = doc("f1");
        cache.reassign(document.clone());
        assert!(cache.contains(document.id()));
    }
}
