use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use fieldwork_core::{
    is_hierarchical, CoreError, Document, ProjectConfiguration, ResourceId, LIES_WITHIN,
    RECORDED_IN,
};
use fieldwork_store::DocumentStore;

use crate::datastore::CachedDatastore;
use crate::error::DatastoreError;
use crate::query::Constraint;

#[derive(Debug, Clone, Copy)]
pub struct GetOptions {
    /// Also fetch the transitive descendant set via hierarchical relations.
    pub descendants: bool,
    /// Include the requested document itself in the result.
    pub toplevel: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            descendants: false,
            toplevel: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Cascade over descendants instead of refusing to delete a parent.
    pub descendants: bool,
}

/// Maintains relational integrity across documents: inverse-relation
/// completion on edits, disconnection-safe pruning, hierarchy traversal and
/// cascading deletion. Owns no state of its own; everything goes through
/// the wrapped datastore.
pub struct RelationsManager<'a, S: DocumentStore> {
    datastore: &'a mut CachedDatastore<S>,
    config: &'a ProjectConfiguration,
    user: &'a str,
}

impl<'a, S: DocumentStore> RelationsManager<'a, S> {
    pub fn new(
        datastore: &'a mut CachedDatastore<S>,
        config: &'a ProjectConfiguration,
        user: &'a str,
    ) -> Self {
        Self {
            datastore,
            config,
            user,
        }
    }

    /// Fetches a document, optionally with its full descendant set in
    /// breadth-first order. `toplevel: false` drops the root from the
    /// result, leaving only descendants.
    pub fn get(
        &mut self,
        id: ResourceId,
        options: GetOptions,
    ) -> Result<Vec<Document>, DatastoreError> {
        let root = self.datastore.get(id)?;
        let mut result = Vec::new();
        if options.toplevel {
            result.push(root);
        }
        if !options.descendants {
            return Ok(result);
        }

        let mut visited = HashSet::from([id]);
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for child in self.children_of(current) {
                if visited.insert(child) {
                    result.push(self.datastore.get(child)?);
                    queue.push_back(child);
                }
            }
        }
        Ok(result)
    }

    /// Applies a document edit together with all inverse-relation updates
    /// it implies on other documents. `old_version` is the last persisted
    /// state the edit was based on; the symmetric difference of relation
    /// targets between the two drives the inverse bookkeeping.
    ///
    /// Persistence is a best-effort batch: the source document is written
    /// first, then each affected target. Already-committed writes are not
    /// rolled back when a later one fails; the error lists which documents
    /// went through and which did not.
    pub fn update(
        &mut self,
        document: &Document,
        old_version: &Document,
    ) -> Result<Document, DatastoreError> {
        self.validate(document)?;

        let (added, removed) = relation_diff(old_version, document);
        self.assert_same_operation(document, &added)?;

        // Edit every affected target in memory first so validation
        // failures never leave partial state behind.
        let mut targets: BTreeMap<ResourceId, Document> = BTreeMap::new();
        let mut dirty: BTreeSet<ResourceId> = BTreeSet::new();

        for (relation, target_id) in &added {
            let Some(inverse) = self.config.inverse_of(relation) else {
                continue;
            };
            let inverse = inverse.to_string();
            let target = self.target_entry(&mut targets, *target_id)?;
            if !target.resource.relation_targets(&inverse).contains(&document.id()) {
                target.resource.add_relation_target(&inverse, document.id());
                dirty.insert(*target_id);
            }
        }

        for (relation, target_id) in &removed {
            let Some(inverse) = self.config.inverse_of(relation) else {
                continue;
            };
            let inverse = inverse.to_string();
            // The link survives when another still-present relation with
            // the same inverse connects the two documents.
            let still_connected = document
                .resource
                .relations
                .iter()
                .filter(|(name, _)| {
                    self.config.inverse_of(name) == Some(inverse.as_str())
                })
                .any(|(_, targets)| targets.contains(target_id));
            if still_connected {
                continue;
            }
            let target = match self.target_entry(&mut targets, *target_id) {
                Ok(target) => target,
                // A removed target may itself be gone already.
                Err(DatastoreError::DocumentNotFound(_)) => continue,
                Err(err) => return Err(err),
            };
            if target.resource.relation_targets(&inverse).contains(&document.id()) {
                target.resource.remove_relation_target(&inverse, document.id());
                dirty.insert(*target_id);
            }
        }

        let written = if document.revision_id.is_some() {
            self.datastore.update(document, self.user)?
        } else {
            self.datastore.create_document(document.clone())?
        };

        let mut updated = vec![written.id().to_string()];
        let mut failed = Vec::new();
        for target_id in dirty {
            let target = &targets[&target_id];
            match self.datastore.update(target, self.user) {
                Ok(_) => updated.push(target_id.to_string()),
                Err(err) => failed.push((target_id.to_string(), err.to_string())),
            }
        }
        if !failed.is_empty() {
            return Err(DatastoreError::BatchUpdateFailed { updated, failed });
        }
        Ok(written)
    }

    /// Deletes a document. With live descendants this fails unless the
    /// caller asked for cascading deletion, in which case descendants go
    /// first (deepest first). Every removed document is stripped out of
    /// the relation lists of all documents still referencing it.
    pub fn remove(
        &mut self,
        id: ResourceId,
        options: RemoveOptions,
    ) -> Result<(), DatastoreError> {
        let root = self.datastore.get(id)?;
        let descendants = self.get(
            id,
            GetOptions {
                descendants: true,
                toplevel: false,
            },
        )?;
        if !descendants.is_empty() && !options.descendants {
            return Err(DatastoreError::ResourceHasDescendants {
                resource: id.to_string(),
                count: descendants.len(),
            });
        }

        let mut order = descendants;
        order.reverse();
        order.push(root);
        let removing: HashSet<ResourceId> = order.iter().map(Document::id).collect();

        for document in order {
            self.strip_references(document.id(), &removing)?;
            self.datastore.remove(document.id())?;
        }
        Ok(())
    }

    /// Import-stage processing of a batch of incoming documents:
    ///
    /// 1. A `liesWithin` pointing at an operation-root category is
    ///    rewritten to `isRecordedIn` (imports may only know the parent
    ///    identifier, not whether it is an operation).
    /// 2. Inverse relations are completed: targets inside the batch must
    ///    already declare the inverse (`NotInterrelated` otherwise),
    ///    targets in the datastore get the inverse appended.
    ///
    /// Returns the datastore documents that gained inverse entries; the
    /// caller persists them together with the batch.
    pub fn complete_inverse_relations(
        &mut self,
        batch: &mut [Document],
    ) -> Result<Vec<Document>, DatastoreError> {
        let batch_ids: HashMap<ResourceId, usize> = batch
            .iter()
            .enumerate()
            .map(|(i, document)| (document.id(), i))
            .collect();

        for i in 0..batch.len() {
            let targets = batch[i].resource.relation_targets(LIES_WITHIN).to_vec();
            let mut promoted = Vec::new();
            for target_id in targets {
                let category = match batch_ids.get(&target_id) {
                    Some(&j) => batch[j].resource.category.clone(),
                    None => match self.datastore.get(target_id) {
                        Ok(target) => target.resource.category.clone(),
                        Err(DatastoreError::DocumentNotFound(_)) => {
                            return Err(DatastoreError::MissingRelationTarget(
                                target_id.to_string(),
                            ));
                        }
                        Err(err) => return Err(err),
                    },
                };
                if self.config.is_operation_category(&category) {
                    promoted.push(target_id);
                }
            }
            for target_id in promoted {
                batch[i].resource.remove_relation_target(LIES_WITHIN, target_id);
                batch[i].resource.add_relation_target(RECORDED_IN, target_id);
            }
        }

        let mut db_targets: BTreeMap<ResourceId, Document> = BTreeMap::new();
        for document in batch.iter() {
            for (relation, target_ids) in &document.resource.relations {
                if target_ids.is_empty() {
                    return Err(DatastoreError::EmptyRelation {
                        resource: document.id().to_string(),
                        relation: relation.clone(),
                    });
                }
                if !self.config.is_relation(relation) {
                    return Err(DatastoreError::RelationTargetNotAllowed {
                        relation: relation.clone(),
                        from: document.id().to_string(),
                        target: target_ids[0].to_string(),
                    });
                }
                let Some(inverse) = self.config.inverse_of(relation) else {
                    continue;
                };
                let inverse = inverse.to_string();
                for target_id in target_ids {
                    if let Some(&j) = batch_ids.get(target_id) {
                        if !batch[j]
                            .resource
                            .relation_targets(&inverse)
                            .contains(&document.id())
                        {
                            return Err(DatastoreError::NotInterrelated {
                                from: document.id().to_string(),
                                target: target_id.to_string(),
                            });
                        }
                    } else {
                        if !db_targets.contains_key(target_id) {
                            let fetched =
                                self.datastore.get(*target_id).map_err(|err| match err {
                                    DatastoreError::DocumentNotFound(_) => {
                                        DatastoreError::MissingRelationTarget(
                                            target_id.to_string(),
                                        )
                                    }
                                    other => other,
                                })?;
                            db_targets.insert(*target_id, fetched);
                        }
                        let target = db_targets.get_mut(target_id).unwrap();
                        target.resource.add_relation_target(&inverse, document.id());
                    }
                }
            }
        }
        Ok(db_targets.into_values().collect())
    }

    /// Ids whose `liesWithin` or `isRecordedIn` points at `id`, in stable
    /// order.
    fn children_of(&self, id: ResourceId) -> Vec<ResourceId> {
        let index = self.datastore.index();
        let mut children: BTreeSet<ResourceId> = BTreeSet::new();
        for relation in [LIES_WITHIN, RECORDED_IN] {
            children.extend(index.get_constraint(&Constraint::contains(
                &format!("relations.{relation}"),
                id.to_string(),
            )));
        }
        children.into_iter().collect()
    }

    /// Pre-flight checks; nothing is persisted when any of these fail.
    fn validate(&mut self, document: &Document) -> Result<(), DatastoreError> {
        let relations = document.resource.relations.clone();

        if relations.contains_key(RECORDED_IN) && relations.contains_key(LIES_WITHIN) {
            return Err(CoreError::InvalidData(format!(
                "resource {} sets both {RECORDED_IN} and {LIES_WITHIN}",
                document.id()
            ))
            .into());
        }

        for (relation, target_ids) in &relations {
            if target_ids.is_empty() {
                return Err(DatastoreError::EmptyRelation {
                    resource: document.id().to_string(),
                    relation: relation.clone(),
                });
            }
            if !self.config.is_relation(relation) {
                return Err(DatastoreError::RelationTargetNotAllowed {
                    relation: relation.clone(),
                    from: document.id().to_string(),
                    target: target_ids[0].to_string(),
                });
            }
            for target_id in target_ids {
                let target = self.datastore.get(*target_id).map_err(|err| match err {
                    DatastoreError::DocumentNotFound(_) => {
                        DatastoreError::MissingRelationTarget(target_id.to_string())
                    }
                    other => other,
                })?;
                if !self.config.is_allowed_relation_domain_category(
                    &document.resource.category,
                    &target.resource.category,
                    relation,
                ) {
                    return Err(DatastoreError::RelationTargetNotAllowed {
                        relation: relation.clone(),
                        from: document.id().to_string(),
                        target: target_id.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Non-hierarchical relations may only connect documents under the
    /// same operation root, unless declared cross-operation.
    fn assert_same_operation(
        &mut self,
        document: &Document,
        added: &[(String, ResourceId)],
    ) -> Result<(), DatastoreError> {
        let source_root = self.operation_root(document)?;
        for (relation, target_id) in added {
            if is_hierarchical(relation) {
                continue;
            }
            let cross_operation = self
                .config
                .relation(relation)
                .map(|r| r.cross_operation)
                .unwrap_or(false);
            if cross_operation {
                continue;
            }
            let target = self.datastore.get(*target_id)?;
            let target_root = self.operation_root(&target)?;
            if let (Some(source_root), Some(target_root)) = (source_root, target_root)
                && source_root != target_root
            {
                return Err(DatastoreError::DifferentOperations {
                    from: document.id().to_string(),
                    target: target_id.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Operation root of a document: itself when it is an operation, its
    /// `isRecordedIn` target when set, otherwise the first operation found
    /// on the `liesWithin` ancestor chain. `None` for documents above the
    /// operation level (e.g. project-level resources).
    fn operation_root(
        &mut self,
        document: &Document,
    ) -> Result<Option<ResourceId>, DatastoreError> {
        if self
            .config
            .is_operation_category(&document.resource.category)
        {
            return Ok(Some(document.id()));
        }
        if let Some(target) = document.resource.relation_targets(RECORDED_IN).first() {
            return Ok(Some(*target));
        }

        let mut visited = HashSet::from([document.id()]);
        let mut current = match document.resource.relation_targets(LIES_WITHIN).first() {
            Some(parent) => self.datastore.get(*parent)?,
            None => return Ok(None),
        };
        loop {
            if self
                .config
                .is_operation_category(&current.resource.category)
            {
                return Ok(Some(current.id()));
            }
            if let Some(target) = current.resource.relation_targets(RECORDED_IN).first() {
                return Ok(Some(*target));
            }
            if !visited.insert(current.id()) {
                return Err(CoreError::InvalidData(format!(
                    "hierarchy cycle at {}",
                    current.id()
                ))
                .into());
            }
            current = match current.resource.relation_targets(LIES_WITHIN).first() {
                Some(parent) => self.datastore.get(*parent)?,
                None => return Ok(None),
            };
        }
    }

    fn target_entry<'t>(
        &mut self,
        targets: &'t mut BTreeMap<ResourceId, Document>,
        id: ResourceId,
    ) -> Result<&'t mut Document, DatastoreError> {
        if !targets.contains_key(&id) {
            let fetched = self.datastore.get(id)?;
            targets.insert(id, fetched);
        }
        Ok(targets.get_mut(&id).unwrap())
    }

    /// Removes `id` from the relation lists of every document still
    /// referencing it, skipping documents in the same removal batch.
    fn strip_references(
        &mut self,
        id: ResourceId,
        removing: &HashSet<ResourceId>,
    ) -> Result<(), DatastoreError> {
        let relation_names: Vec<String> =
            self.config.relation_names().map(str::to_string).collect();

        let mut referrers: BTreeSet<ResourceId> = BTreeSet::new();
        for name in &relation_names {
            referrers.extend(self.datastore.index().get_constraint(&Constraint::contains(
                &format!("relations.{name}"),
                id.to_string(),
            )));
        }

        for referrer_id in referrers {
            if removing.contains(&referrer_id) {
                continue;
            }
            let mut referrer = self.datastore.get(referrer_id)?;
            let names: Vec<String> = referrer.resource.relations.keys().cloned().collect();
            for name in names {
                referrer.resource.remove_relation_target(&name, id);
            }
            self.datastore.update(&referrer, self.user)?;
        }
        Ok(())
    }
}

/// Per-relation symmetric difference of target lists between two document
/// versions: `(added, removed)` pairs of `(relation name, target id)`.
fn relation_diff(
    old_version: &Document,
    new_version: &Document,
) -> (Vec<(String, ResourceId)>, Vec<(String, ResourceId)>) {
    let mut added = Vec::new();
    let mut removed = Vec::new();

    let names: BTreeSet<&String> = old_version
        .resource
        .relations
        .keys()
        .chain(new_version.resource.relations.keys())
        .collect();
    for name in names {
        let old_targets = old_version.resource.relation_targets(name);
        let new_targets = new_version.resource.relation_targets(name);
        for target in new_targets {
            if !old_targets.contains(target) {
                added.push((name.clone(), *target));
            }
        }
        for target in old_targets {
            if !new_targets.contains(target) {
                removed.push((name.clone(), *target));
            }
        }
    }
    (added, removed)
}

#[cfg(test)]
mod tests {
    use fieldwork_core::{configuration::default_test_configuration, Resource};
    use fieldwork_store::SqliteStore;

    use super::*;

    #[test]
    fn relation_diff_reports_both_directions() {
        let kept = ResourceId::new();
        let dropped = ResourceId::new();

        let mut old_resource = Resource::new("f1", "Feature");
        old_resource.add_relation_target("isAfter", dropped);
        let old = Document::from_resource(old_resource, "alice", fieldwork_core::Hlc::new(1, 0));

        let mut new = old.clone();
        new.resource.remove_relation_target("isAfter", dropped);
        new.resource.add_relation_target("isAfter", kept);

        let (added, removed) = relation_diff(&old, &new);
        assert_eq!(added, vec![("isAfter".to_string(), kept)]);
        assert_eq!(removed, vec![("isAfter".to_string(), dropped)]);
    }

    #[test]
    fn operation_root_follows_the_lies_within_chain() {
        let config = default_test_configuration();
        let mut datastore =
            CachedDatastore::new(SqliteStore::open_in_memory().unwrap()).unwrap();

        let trench = datastore
            .create(Resource::new("t1", "Trench"), "alice")
            .unwrap();
        let mut feature = Resource::new("f1", "Feature");
        feature.add_relation_target(RECORDED_IN, trench.id());
        let feature = datastore.create(feature, "alice").unwrap();
        let mut find = Resource::new("fi1", "Find");
        find.add_relation_target(LIES_WITHIN, feature.id());
        let find = datastore.create(find, "alice").unwrap();

        let mut manager = RelationsManager::new(&mut datastore, &config, "alice");
        let root = manager.operation_root(&find).unwrap();
        assert_eq!(root, Some(trench.id()));
    }
}
