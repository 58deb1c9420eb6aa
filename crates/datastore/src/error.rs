use fieldwork_core::CoreError;
use fieldwork_store::StoreError;

/// Errors surfaced by the datastore layer. This vocabulary is the contract
/// callers may depend on; store-level errors are remapped at the boundary.
/// Identifiers are carried as rendered strings, matching the store layer.
#[derive(Debug, thiserror::Error)]
pub enum DatastoreError {
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("revision not found: {id} @ {revision}")]
    RevisionNotFound { id: String, revision: String },

    #[error("save conflict: {id}")]
    SaveConflict { id: String },

    #[error("identifier already taken: {0}")]
    IdentifierExists(String),

    // Field name `from` (not `source`): thiserror reserves a field called
    // `source` for error chaining and requires it to be an error type.
    #[error("relation '{relation}' does not allow target {target} from {from}")]
    RelationTargetNotAllowed {
        relation: String,
        from: String,
        target: String,
    },

    #[error("documents {from} and {target} declare a relation without its inverse")]
    NotInterrelated { from: String, target: String },

    #[error("relation '{relation}' of resource {resource} has no targets")]
    EmptyRelation { resource: String, relation: String },

    #[error("resource {resource} still has {count} descendant(s)")]
    ResourceHasDescendants { resource: String, count: usize },

    #[error("relation target {0} does not exist")]
    MissingRelationTarget(String),

    #[error("documents {from} and {target} belong to different operations")]
    DifferentOperations { from: String, target: String },

    /// Batch persistence is best-effort: the source document and some targets
    /// may already be written when a later write fails. `updated` lists what
    /// went through, `failed` carries the per-document reason.
    #[error("batch update failed for {} of {} document(s)", failed.len(), updated.len() + failed.len())]
    BatchUpdateFailed {
        updated: Vec<String>,
        failed: Vec<(String, String)>,
    },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for DatastoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DocumentNotFound(id) => DatastoreError::DocumentNotFound(id),
            StoreError::RevisionNotFound { id, revision } => {
                DatastoreError::RevisionNotFound { id, revision }
            }
            StoreError::SaveConflict { id } => DatastoreError::SaveConflict { id },
            other => DatastoreError::Store(other),
        }
    }
}
