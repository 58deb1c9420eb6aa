use std::collections::HashMap;

use fieldwork_core::ResourceId;
use fieldwork_datastore::{DatastoreError, RemoteChange};
use fieldwork_store::DocumentStore;
use tracing::debug;

use crate::TestPeer;

/// Pull-based replication between test peers: reads the source's changes
/// feed past a per-direction checkpoint, grafts the changed documents'
/// revision trees into the target store, and has the target fold the
/// result into its cache and index. Trees arrive in generation order, so
/// parents are always ingested before children.
#[derive(Default)]
pub struct Replicator {
    checkpoints: HashMap<(String, String), u64>,
}

impl Replicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// One replication pass from `source` into `target`. Returns what the
    /// target's view absorbed.
    pub fn replicate(
        &mut self,
        source: &TestPeer,
        target: &mut TestPeer,
    ) -> Result<Vec<RemoteChange>, DatastoreError> {
        let key = (source.name.clone(), target.name.clone());
        let since = self.checkpoints.get(&key).copied().unwrap_or(0);

        let (changes, last_seq) = source.datastore.store().changes_since(since)?;
        let mut ids: Vec<ResourceId> = Vec::new();
        for change in &changes {
            if !ids.contains(&change.id) {
                ids.push(change.id);
            }
        }
        debug!(
            source = %source.name,
            target = %target.name,
            documents = ids.len(),
            "replicating"
        );

        for id in ids {
            for entry in source.datastore.store().revision_tree(id)? {
                target.datastore.store_mut().ingest_revision(&entry)?;
            }
        }
        self.checkpoints.insert(key, last_seq);
        target.datastore.absorb_remote_changes()
    }

    /// One pass in each direction. After a quiescent network (no further
    /// writes), repeated syncs converge both peers to identical views.
    pub fn sync(&mut self, a: &mut TestPeer, b: &mut TestPeer) -> Result<(), DatastoreError> {
        self.replicate(&*a, b)?;
        self.replicate(&*b, a)?;
        Ok(())
    }
}
