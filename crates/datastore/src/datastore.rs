use std::collections::HashSet;

use fieldwork_core::{CoreError, Document, HlcClock, Resource, ResourceId, RevisionId};
use fieldwork_store::{DocumentStore, StoreError};
use tracing::{debug, warn};

use crate::cache::DocumentCache;
use crate::error::DatastoreError;
use crate::index::IndexFacade;
use crate::query::{Constraint, Query};

/// What a pulled remote change did to the local view.
#[derive(Debug, Clone)]
pub enum RemoteChange {
    /// Winning revision replaced, no open conflicts.
    Updated(Document),
    /// Winning revision replaced and the document now carries conflicts.
    Conflicted(Document),
    /// Document deleted remotely; evicted from cache and index.
    Removed(ResourceId),
}

/// Read/write datastore over a backing [`DocumentStore`], kept coherent
/// with an in-memory cache and index. All project reads and writes go
/// through here; the store is only touched directly by replication.
pub struct CachedDatastore<S: DocumentStore> {
    store: S,
    cache: DocumentCache,
    index: IndexFacade,
    clock: HlcClock,
    last_seq: u64,
}

impl<S: DocumentStore> CachedDatastore<S> {
    /// Wraps a store and populates cache and index from its live documents.
    pub fn new(store: S) -> Result<Self, DatastoreError> {
        let mut datastore = Self {
            store,
            cache: DocumentCache::new(),
            index: IndexFacade::new(),
            clock: HlcClock::new(),
            last_seq: 0,
        };
        datastore.populate()?;
        Ok(datastore)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Direct store access for replication; callers must follow up with
    /// [`absorb_remote_changes`](Self::absorb_remote_changes).
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn index(&self) -> &IndexFacade {
        &self.index
    }

    /// A fresh timestamp from this process's clock, for callers that stamp
    /// documents before handing them to [`create_document`](Self::create_document).
    pub fn now(&mut self) -> Result<fieldwork_core::Hlc, DatastoreError> {
        Ok(self.clock.tick()?)
    }

    /// Rebuilds cache and index from the store, e.g. after bulk ingest.
    /// Unindexable documents are skipped with a warning.
    pub fn populate(&mut self) -> Result<usize, DatastoreError> {
        let documents = self.store.all_documents()?;
        self.cache.clear();
        let indexed = self.index.rebuild(documents.iter());
        for document in documents {
            self.cache.set(document);
        }
        let (_, last_seq) = self.store.changes_since(self.last_seq)?;
        self.last_seq = last_seq;
        Ok(indexed)
    }

    /// The document's winning revision, served from cache when present.
    pub fn get(&mut self, id: ResourceId) -> Result<Document, DatastoreError> {
        if let Some(cached) = self.cache.get(id) {
            return Ok(cached.clone());
        }
        let document = self.store.fetch(id)?;
        Ok(self.cache.set(document).clone())
    }

    /// Bypasses the cache and re-fetches from the store, refreshing the
    /// cached entry. Conflict resolution uses this to see the merge state
    /// replication may have changed underneath the cache.
    pub fn get_fresh(&mut self, id: ResourceId) -> Result<Document, DatastoreError> {
        let document = self.store.fetch(id)?;
        Ok(self.cache.reassign(document).clone())
    }

    /// A specific revision, bypassing cache and winner election.
    pub fn get_revision(
        &self,
        id: ResourceId,
        rev: &RevisionId,
    ) -> Result<Document, DatastoreError> {
        Ok(self.store.fetch_revision(id, rev)?)
    }

    /// Index-backed query, results ordered by last modification (newest
    /// first; ties broken by id so the order is stable).
    pub fn find(&mut self, query: &Query) -> Result<Vec<Document>, DatastoreError> {
        let ids = self.index.find(query);
        let mut documents = Vec::with_capacity(ids.len());
        for id in ids {
            documents.push(self.get(id)?);
        }
        documents.sort_by(|a, b| {
            (b.last_modified(), b.id()).cmp(&(a.last_modified(), a.id()))
        });
        Ok(documents)
    }

    /// Creates a new document from a resource. The identifier must be free
    /// among live documents.
    pub fn create(
        &mut self,
        resource: Resource,
        user: &str,
    ) -> Result<Document, DatastoreError> {
        let at = self.clock.tick()?;
        self.create_document(Document::from_resource(resource, user, at))
    }

    /// Creates a document whose audit trail is already populated (the
    /// import path). Rejects documents that already carry a revision.
    pub fn create_document(&mut self, document: Document) -> Result<Document, DatastoreError> {
        if document.revision_id.is_some() {
            return Err(CoreError::InvalidData(format!(
                "document {} already has a revision",
                document.id()
            ))
            .into());
        }
        self.assert_identifier_free(&document.resource.identifier, document.id())?;
        let written = self.store.put(&document, None)?;
        self.refresh(written.id())?;
        Ok(written)
    }

    /// Updates a document against its carried revision. Stamps a modified
    /// action for `user`. On `SaveConflict` nothing is written and the
    /// cache keeps serving the old winner.
    pub fn update(&mut self, document: &Document, user: &str) -> Result<Document, DatastoreError> {
        let expected = document.revision_id.ok_or_else(|| {
            CoreError::InvalidData(format!("document {} has no revision to update", document.id()))
        })?;
        self.assert_identifier_free(&document.resource.identifier, document.id())?;

        let mut stamped = document.clone();
        stamped.stamp_modified(user, self.clock.tick()?);
        let written = self.store.put(&stamped, Some(&expected))?;
        self.refresh(written.id())?;
        Ok(written)
    }

    /// Like `update`, but additionally squashes the given conflicting
    /// revisions — the persistence half of conflict resolution.
    pub fn update_resolving(
        &mut self,
        document: &Document,
        user: &str,
        squash: &[RevisionId],
    ) -> Result<Document, DatastoreError> {
        self.assert_identifier_free(&document.resource.identifier, document.id())?;
        let mut stamped = document.clone();
        stamped.stamp_modified(user, self.clock.tick()?);
        let written = self.store.put_resolving(&stamped, squash)?;
        self.refresh(written.id())?;
        Ok(written)
    }

    /// Deletes a document (tombstone write) and evicts it from cache and
    /// index. Tombstoning the winning revision of a conflicted document
    /// promotes the surviving branch instead of deleting the document, so
    /// the store is consulted again before evicting anything.
    pub fn remove(&mut self, id: ResourceId) -> Result<(), DatastoreError> {
        let current = self.get(id)?;
        let rev = current.revision_id.ok_or_else(|| {
            CoreError::InvalidData(format!("document {id} has no revision to remove"))
        })?;
        self.store.remove(id, &rev)?;
        match self.store.fetch(id) {
            Ok(survivor) => {
                self.index.put(&survivor)?;
                self.cache.reassign(survivor);
            }
            Err(StoreError::DocumentNotFound(_)) => {
                self.cache.remove(id);
                self.index.remove(id);
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    /// Pulls the store's changes feed past our checkpoint and folds each
    /// changed document back into cache and index. Local writes appear on
    /// the same feed; re-applying them is harmless. Returns one outcome per
    /// changed document (latest change wins when a document changed more
    /// than once).
    ///
    /// The checkpoint advances only after the whole batch has been folded,
    /// so an error leaves the changes pending for the next call instead of
    /// silently dropping them. A remote timestamp too far ahead of the
    /// local wall clock is logged and left out of the clock merge; the
    /// document itself is still absorbed.
    pub fn absorb_remote_changes(&mut self) -> Result<Vec<RemoteChange>, DatastoreError> {
        let (changes, last_seq) = self.store.changes_since(self.last_seq)?;

        let mut seen = HashSet::new();
        let mut outcomes = Vec::new();
        for change in changes.iter().rev() {
            if !seen.insert(change.id) {
                continue;
            }
            match self.store.fetch(change.id) {
                Ok(document) => {
                    if let Err(err) = self.clock.receive(&document.last_modified()) {
                        warn!(id = %change.id, error = %err, "ignoring remote timestamp");
                    }
                    if let Err(err) = self.index.put(&document) {
                        debug!(id = %change.id, error = %err, "change not indexable");
                    }
                    let cached = self.cache.reassign(document).clone();
                    outcomes.push(if cached.conflicts.is_empty() {
                        RemoteChange::Updated(cached)
                    } else {
                        RemoteChange::Conflicted(cached)
                    });
                }
                Err(StoreError::DocumentNotFound(_)) => {
                    self.cache.remove(change.id);
                    self.index.remove(change.id);
                    outcomes.push(RemoteChange::Removed(change.id));
                }
                Err(err) => return Err(err.into()),
            }
        }
        self.last_seq = last_seq;
        outcomes.reverse();
        Ok(outcomes)
    }

    /// Re-fetches the winning revision after a write and folds it into
    /// cache and index. The write's new revision does not always win the
    /// election when other conflicting leaves exist, so trusting the
    /// written document alone would leave the cache showing a loser.
    fn refresh(&mut self, id: ResourceId) -> Result<(), DatastoreError> {
        let fresh = self.store.fetch(id)?;
        self.index.put(&fresh)?;
        self.cache.reassign(fresh);
        Ok(())
    }

    fn assert_identifier_free(
        &self,
        identifier: &str,
        own_id: ResourceId,
    ) -> Result<(), DatastoreError> {
        if identifier.trim().is_empty() {
            return Err(
                CoreError::InvalidData(format!("resource {own_id} has no identifier")).into(),
            );
        }
        let taken = self
            .index
            .get_constraint(&Constraint::matches("identifier", identifier));
        if taken.iter().any(|id| *id != own_id) {
            return Err(DatastoreError::IdentifierExists(identifier.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use fieldwork_core::Resource;
    use fieldwork_store::SqliteStore;

    use super::*;

    fn datastore() -> CachedDatastore<SqliteStore> {
        CachedDatastore::new(SqliteStore::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn create_then_find_sees_own_write() {
        let mut datastore = datastore();
        let created = datastore
            .create(Resource::new("coin-1", "Find"), "alice")
            .unwrap();

        let found = datastore.find(&Query::text("coin")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), created.id());
        assert_eq!(found[0].revision_id, created.revision_id);
    }

    #[test]
    fn duplicate_identifier_is_rejected_without_persisting() {
        let mut datastore = datastore();
        datastore
            .create(Resource::new("coin-1", "Find"), "alice")
            .unwrap();

        let result = datastore.create(Resource::new("coin-1", "Find"), "bob");
        assert!(matches!(result, Err(DatastoreError::IdentifierExists(_))));
        assert_eq!(datastore.find(&Query::all()).unwrap().len(), 1);
    }

    #[test]
    fn stale_update_leaves_cache_untouched() {
        let mut datastore = datastore();
        let v1 = datastore
            .create(Resource::new("f1", "Feature"), "alice")
            .unwrap();
        let mut edit = v1.clone();
        edit.resource.fields.insert(
            "color".into(),
            fieldwork_core::FieldValue::Text("red".into()),
        );
        let v2 = datastore.update(&edit, "alice").unwrap();

        let mut stale = v1.clone();
        stale.resource.fields.insert(
            "color".into(),
            fieldwork_core::FieldValue::Text("blue".into()),
        );
        assert!(matches!(
            datastore.update(&stale, "bob"),
            Err(DatastoreError::SaveConflict { .. })
        ));

        let cached = datastore.get(v1.id()).unwrap();
        assert_eq!(cached.revision_id, v2.revision_id);
        assert_eq!(
            cached.resource.fields.get("color").and_then(|v| v.as_text()),
            Some("red")
        );
    }

    #[test]
    fn find_orders_by_last_modified_desc() {
        let mut datastore = datastore();
        let older = datastore
            .create(Resource::new("f1", "Feature"), "alice")
            .unwrap();
        let newer = datastore
            .create(Resource::new("f2", "Feature"), "alice")
            .unwrap();

        let found = datastore.find(&Query::all()).unwrap();
        assert_eq!(found[0].id(), newer.id());
        assert_eq!(found[1].id(), older.id());

        // Touching the older document moves it to the front.
        let refetched = datastore.get(older.id()).unwrap();
        datastore.update(&refetched, "alice").unwrap();
        let found = datastore.find(&Query::all()).unwrap();
        assert_eq!(found[0].id(), older.id());
    }

    #[test]
    fn remove_evicts_from_cache_and_index() {
        let mut datastore = datastore();
        let created = datastore
            .create(Resource::new("f1", "Feature"), "alice")
            .unwrap();
        datastore.remove(created.id()).unwrap();

        assert!(matches!(
            datastore.get(created.id()),
            Err(DatastoreError::DocumentNotFound(_))
        ));
        assert!(datastore.find(&Query::all()).unwrap().is_empty());
    }

    #[test]
    fn absorb_tolerates_skewed_remote_timestamps() {
        let mut datastore = datastore();
        datastore
            .create(Resource::new("f1", "Feature"), "alice")
            .unwrap();
        datastore.absorb_remote_changes().unwrap();

        // Writes landing store-side, as replication delivers them. One
        // carries a wall clock far ahead of the local one.
        let far_ahead = fieldwork_core::Hlc::new(
            fieldwork_core::hlc::physical_now().unwrap() + 2 * fieldwork_core::hlc::MAX_DRIFT_MS,
            0,
        );
        let skewed = Document::from_resource(Resource::new("f2", "Feature"), "bob", far_ahead);
        datastore.store_mut().put(&skewed, None).unwrap();
        let normal = Document::from_resource(
            Resource::new("f3", "Feature"),
            "bob",
            fieldwork_core::Hlc::new(1, 0),
        );
        datastore.store_mut().put(&normal, None).unwrap();

        let outcomes = datastore.absorb_remote_changes().unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(datastore.find(&Query::all()).unwrap().len(), 3);

        // Nothing was left pending behind the checkpoint.
        assert!(datastore.absorb_remote_changes().unwrap().is_empty());
    }

    #[test]
    fn resolving_write_cannot_steal_an_identifier() {
        let mut datastore = datastore();
        datastore
            .create(Resource::new("f1", "Feature"), "alice")
            .unwrap();
        let other = datastore
            .create(Resource::new("f2", "Feature"), "alice")
            .unwrap();

        let mut renamed = other.clone();
        renamed.resource.identifier = "f1".to_string();
        let result = datastore.update_resolving(&renamed, "alice", &[]);
        assert!(matches!(result, Err(DatastoreError::IdentifierExists(_))));
        assert_eq!(
            datastore.get(other.id()).unwrap().resource.identifier,
            "f2"
        );
    }

    #[test]
    fn populate_rebuilds_from_existing_store() {
        let mut first = datastore();
        first
            .create(Resource::new("coin-1", "Find"), "alice")
            .unwrap();
        let store = first.store;

        let mut second = CachedDatastore::new(store).unwrap();
        assert_eq!(second.find(&Query::text("coin")).unwrap().len(), 1);
    }
}
