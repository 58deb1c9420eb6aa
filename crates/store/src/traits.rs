use fieldwork_core::{Document, ResourceId, RevisionId};

use crate::error::StoreError;

/// One row of the changes feed. At-least-once: consumers may see the same
/// document more than once; per-document order follows revision order.
#[derive(Debug, Clone)]
pub struct Change {
    pub seq: u64,
    pub id: ResourceId,
    pub rev: RevisionId,
    pub deleted: bool,
}

/// A raw revision-tree node, as exchanged during replication. `body` is the
/// serialized document body; tombstone revisions carry none.
#[derive(Debug, Clone)]
pub struct RevisionEntry {
    pub id: ResourceId,
    pub rev: RevisionId,
    pub parent: Option<RevisionId>,
    pub body: Option<Vec<u8>>,
    pub deleted: bool,
    pub superseded: bool,
}

/// The backing replicated document store. Revision branching on concurrent
/// writes is the store's concern; everything above it (cache, index,
/// relations, merge) builds on this contract and never inspects sqlite
/// directly.
pub trait DocumentStore {
    /// Winning revision of a live document.
    fn fetch(&self, id: ResourceId) -> Result<Document, StoreError>;

    /// A specific revision, bypassing winner election. Used for conflict
    /// inspection; tombstone revisions report `RevisionNotFound`.
    fn fetch_revision(&self, id: ResourceId, rev: &RevisionId)
        -> Result<Document, StoreError>;

    /// Creates or updates a document. `expected_rev` is the optimistic
    /// concurrency check: it must name a live leaf of the revision tree
    /// (`None` for creation), otherwise `SaveConflict`.
    fn put(
        &mut self,
        document: &Document,
        expected_rev: Option<&RevisionId>,
    ) -> Result<Document, StoreError>;

    /// Like `put`, but additionally marks the given conflicting leaf
    /// revisions as superseded, so they stop counting as conflicts
    /// (store-level squash after conflict resolution).
    fn put_resolving(
        &mut self,
        document: &Document,
        squash: &[RevisionId],
    ) -> Result<Document, StoreError>;

    /// Persists a tombstone revision. `DocumentNotFound` if the document is
    /// already gone, `SaveConflict` on a stale expected revision.
    fn remove(&mut self, id: ResourceId, expected_rev: &RevisionId) -> Result<(), StoreError>;

    /// Ids of all live (non-deleted) documents.
    fn find_ids(&self) -> Result<Vec<ResourceId>, StoreError>;

    /// Winning revisions of all live documents, for bulk index rebuild.
    fn all_documents(&self) -> Result<Vec<Document>, StoreError>;

    /// Changes feed entries with `seq > since`, plus the latest sequence
    /// number observed.
    fn changes_since(&self, since: u64) -> Result<(Vec<Change>, u64), StoreError>;

    /// Full revision tree of a document in generation order, for
    /// replication.
    fn revision_tree(&self, id: ResourceId) -> Result<Vec<RevisionEntry>, StoreError>;

    /// Grafts a replicated revision onto the local tree. Idempotent for
    /// known revisions (a known revision's superseded flag is still raised
    /// if the entry carries it, propagating remote conflict resolutions).
    /// Returns true if the local tree changed.
    fn ingest_revision(&mut self, entry: &RevisionEntry) -> Result<bool, StoreError>;
}
