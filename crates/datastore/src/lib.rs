//! Cached, indexed datastore over a revision-tracked document store, plus
//! the relations-integrity and conflict-resolution layers built on it.

pub mod cache;
pub mod datastore;
pub mod error;
pub mod index;
pub mod query;
pub mod relations;
pub mod resolver;

pub use cache::DocumentCache;
pub use datastore::{CachedDatastore, RemoteChange};
pub use error::DatastoreError;
pub use index::IndexFacade;
pub use query::{Constraint, Query};
pub use relations::{GetOptions, RelationsManager, RemoveOptions};
pub use resolver::{ConflictResolver, FallbackPolicy, Resolution};
