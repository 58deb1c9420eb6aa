use fieldwork_core::{
    configuration::default_test_configuration, Document, ProjectConfiguration, Resource,
    ResourceId,
};
use fieldwork_datastore::{
    CachedDatastore, ConflictResolver, DatastoreError, Query, RelationsManager,
};
use fieldwork_store::SqliteStore;

/// One simulated client: a named user with its own store, cache and index.
pub struct TestPeer {
    pub name: String,
    pub config: ProjectConfiguration,
    pub datastore: CachedDatastore<SqliteStore>,
}

impl TestPeer {
    pub fn new(name: &str) -> Result<Self, DatastoreError> {
        Ok(Self {
            name: name.to_string(),
            config: default_test_configuration(),
            datastore: CachedDatastore::new(SqliteStore::open_in_memory()?)?,
        })
    }

    /// Creates a resource of the given category, without relation
    /// bookkeeping. Use [`relations`](Self::relations) for edits that
    /// should ripple into other documents.
    pub fn create(&mut self, identifier: &str, category: &str) -> Result<Document, DatastoreError> {
        let name = self.name.clone();
        self.datastore.create(Resource::new(identifier, category), &name)
    }

    /// Creates a resource that already carries relation targets, going
    /// through the relations manager so inverses are completed.
    pub fn create_with_relations(
        &mut self,
        resource: Resource,
    ) -> Result<Document, DatastoreError> {
        let at = self.datastore.now()?;
        let document = Document::from_resource(resource, &self.name.clone(), at);
        let mut old = document.clone();
        old.resource.relations.clear();
        self.relations().update(&document, &old)
    }

    pub fn get(&mut self, id: ResourceId) -> Result<Document, DatastoreError> {
        self.datastore.get(id)
    }

    pub fn update(&mut self, document: &Document) -> Result<Document, DatastoreError> {
        let name = self.name.clone();
        self.datastore.update(document, &name)
    }

    pub fn find(&mut self, query: &Query) -> Result<Vec<Document>, DatastoreError> {
        self.datastore.find(query)
    }

    pub fn relations(&mut self) -> RelationsManager<'_, SqliteStore> {
        RelationsManager::new(&mut self.datastore, &self.config, &self.name)
    }

    pub fn resolver(&mut self) -> ConflictResolver<'_, SqliteStore> {
        ConflictResolver::new(&mut self.datastore, &self.name)
    }
}
