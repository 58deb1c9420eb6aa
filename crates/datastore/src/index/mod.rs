pub mod constraint;
pub mod fulltext;

use std::collections::HashSet;

use fieldwork_core::{CoreError, Document, ResourceId};
use tracing::warn;

use crate::query::{Constraint, Query};

pub use constraint::ConstraintIndex;
pub use fulltext::FulltextIndex;

/// Single entry point over the constraint and full-text indexes. Holds the
/// set of all indexed ids so a blank query can answer without scanning.
#[derive(Debug, Default)]
pub struct IndexFacade {
    constraint: ConstraintIndex,
    fulltext: FulltextIndex,
    all_ids: HashSet<ResourceId>,
}

impl IndexFacade {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes a document's winning revision, replacing previous entries.
    pub fn put(&mut self, document: &Document) -> Result<(), CoreError> {
        if document.resource.identifier.trim().is_empty() {
            return Err(CoreError::InvalidData(format!(
                "resource {} has no identifier",
                document.id()
            )));
        }
        self.constraint.put(document);
        self.fulltext.put(document);
        self.all_ids.insert(document.id());
        Ok(())
    }

    pub fn remove(&mut self, id: ResourceId) {
        self.constraint.remove(id);
        self.fulltext.remove(id);
        self.all_ids.remove(&id);
    }

    pub fn clear(&mut self) {
        self.constraint.clear();
        self.fulltext.clear();
        self.all_ids.clear();
    }

    /// Rebuilds both indexes from scratch. Documents that fail to index are
    /// skipped with a warning rather than aborting the rebuild; one bad
    /// document must not take down the whole project view.
    pub fn rebuild<'a>(&mut self, documents: impl IntoIterator<Item = &'a Document>) -> usize {
        self.clear();
        let mut indexed = 0;
        for document in documents {
            match self.put(document) {
                Ok(()) => indexed += 1,
                Err(err) => {
                    warn!(id = %document.id(), error = %err, "skipping unindexable document");
                }
            }
        }
        indexed
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.all_ids.contains(&id)
    }

    /// Evaluates a query as the intersection of its parts: full-text
    /// restriction, category filter (union over the listed categories) and
    /// each constraint in turn.
    pub fn find(&self, query: &Query) -> HashSet<ResourceId> {
        let mut result = match self.fulltext.find(&query.q) {
            Some(ids) => ids,
            None => self.all_ids.clone(),
        };

        if let Some(categories) = &query.categories {
            let mut of_categories = HashSet::new();
            for category in categories {
                of_categories
                    .extend(self.constraint.get(&Constraint::matches("category", category)));
            }
            result.retain(|id| of_categories.contains(id));
        }

        for constraint in &query.constraints {
            let ids = self.constraint.get(constraint);
            result.retain(|id| ids.contains(id));
        }
        result
    }

    /// Constraint lookup without building a full query, used by the
    /// relations traversals.
    pub fn get_constraint(&self, constraint: &Constraint) -> HashSet<ResourceId> {
        self.constraint.get(constraint)
    }
}

#[cfg(test)]
mod tests {
    use fieldwork_core::{Hlc, Resource};

    use super::*;

    fn doc(identifier: &str, category: &str) -> Document {
        Document::from_resource(Resource::new(identifier, category), "alice", Hlc::new(1, 0))
    }

    #[test]
    fn query_combines_text_categories_and_constraints() {
        let mut index = IndexFacade::new();
        let trench = doc("t1", "Trench");
        let mut find = doc("coin-1", "Find");
        find.resource
            .add_relation_target("isRecordedIn", trench.id());
        let feature = doc("coin-like", "Feature");
        index.put(&trench).unwrap();
        index.put(&find).unwrap();
        index.put(&feature).unwrap();

        let query = Query::text("coin")
            .with_categories(&["Find"])
            .with_constraint(Constraint::contains(
                "relations.isRecordedIn",
                trench.id().to_string(),
            ));
        assert_eq!(index.find(&query), HashSet::from([find.id()]));

        assert_eq!(index.find(&Query::all()).len(), 3);
    }

    #[test]
    fn rebuild_skips_unindexable_documents() {
        let mut index = IndexFacade::new();
        let good = doc("f1", "Feature");
        let nameless = doc("", "Feature");

        let indexed = index.rebuild([&good, &nameless]);
        assert_eq!(indexed, 1);
        assert!(index.contains(good.id()));
        assert!(!index.contains(nameless.id()));
    }
}
