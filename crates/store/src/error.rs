use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("revision not found: {id} @ {revision}")]
    RevisionNotFound { id: String, revision: String },

    #[error("save conflict: {id}")]
    SaveConflict { id: String },

    #[error("missing ancestor revision: {id} @ {revision}")]
    MissingAncestor { id: String, revision: String },

    #[error("core error: {0}")]
    Core(#[from] fieldwork_core::CoreError),
}
