use std::collections::{BTreeMap, BTreeSet};

use fieldwork_core::{Document, FieldValue, Resource, ResourceId};
use fieldwork_store::DocumentStore;

use crate::datastore::CachedDatastore;
use crate::error::DatastoreError;

/// What to do when the field-level merge cannot settle every field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Pick a deterministic winner for the disputed fields and persist it
    /// as a fresh revision, keeping the losing branches in history.
    Alternative,
    /// Persist nothing; report the disputed fields for manual resolution.
    Manual,
}

/// Outcome of a resolution pass over one document.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// The document had no conflicts (anymore); nothing was written.
    NoConflict(Document),
    /// Field-level merge settled everything; the merged document was
    /// persisted and the losing revisions squashed.
    Merged(Document),
    /// Merge was partial; the deterministic winner was persisted as a
    /// fresh revision without squashing, so the discarded branches stay
    /// inspectable.
    Alternative(Document),
    /// Merge was partial and the policy was `Manual`; nothing was written.
    Unresolved {
        document: Document,
        conflicted_fields: Vec<String>,
    },
}

/// Resolves store-level write conflicts on a single document: fetches all
/// conflicting revisions, merges field by field and persists the outcome.
/// A `SaveConflict` during the final persist (a write raced the
/// resolution) is not retried here; the caller re-invokes, which bounds
/// recursion and lets a UI surface repeated failures.
pub struct ConflictResolver<'a, S: DocumentStore> {
    datastore: &'a mut CachedDatastore<S>,
    user: &'a str,
}

impl<'a, S: DocumentStore> ConflictResolver<'a, S> {
    pub fn new(datastore: &'a mut CachedDatastore<S>, user: &'a str) -> Self {
        Self { datastore, user }
    }

    pub fn resolve(
        &mut self,
        id: ResourceId,
        fallback: FallbackPolicy,
    ) -> Result<Resolution, DatastoreError> {
        // Re-fetch past the cache: another client may have resolved the
        // conflict since it was detected.
        let latest = self.datastore.get_fresh(id)?;
        if latest.conflicts.is_empty() {
            return Ok(Resolution::NoConflict(latest));
        }

        let mut candidates = Vec::with_capacity(latest.conflicts.len() + 1);
        for rev in &latest.conflicts {
            candidates.push(self.datastore.get_revision(id, rev)?);
        }
        candidates.push(latest.clone());
        // Ascending authority: later candidates win ties. Revision ids are
        // unique, so this order is total and every replica agrees on it.
        candidates.sort_by_key(|c| (c.last_modified(), c.revision_id));

        let (merged, conflicted_fields) = merge_resources(&candidates);
        let mut resolved = latest.clone();
        resolved.resource = merged;

        if conflicted_fields.is_empty() {
            let written =
                self.datastore
                    .update_resolving(&resolved, self.user, &latest.conflicts)?;
            return Ok(Resolution::Merged(written));
        }
        match fallback {
            FallbackPolicy::Alternative => {
                let written = self.datastore.update(&resolved, self.user)?;
                Ok(Resolution::Alternative(written))
            }
            FallbackPolicy::Manual => Ok(Resolution::Unresolved {
                document: latest,
                conflicted_fields,
            }),
        }
    }
}

/// Field-level merge over candidates in ascending authority order.
///
/// Relations are unioned per name. Open fields follow per-kind policy:
/// a single distinct value is kept, diverging lists are concatenated with
/// de-duplication, diverging scalars go to the latest writer. The
/// structural fields (identifier, category, geometry) have no safe merge;
/// divergence there is reported back as a conflicted field, with the most
/// authoritative candidate's value standing in.
fn merge_resources(candidates: &[Document]) -> (Resource, Vec<String>) {
    let mut conflicted = Vec::new();
    let (first, last) = match (candidates.first(), candidates.last()) {
        (Some(first), Some(last)) => (first, last),
        // resolve() always passes at least the latest revision.
        _ => unreachable!("merge candidates are never empty"),
    };
    let mut merged = last.resource.clone();

    if candidates
        .iter()
        .any(|c| c.resource.identifier != first.resource.identifier)
    {
        conflicted.push("identifier".to_string());
    }
    if candidates
        .iter()
        .any(|c| c.resource.category != first.resource.category)
    {
        conflicted.push("category".to_string());
    }
    if candidates
        .iter()
        .any(|c| c.resource.geometry != first.resource.geometry)
    {
        conflicted.push("geometry".to_string());
    }

    let mut relations: BTreeMap<String, Vec<ResourceId>> = BTreeMap::new();
    for candidate in candidates {
        for (name, targets) in &candidate.resource.relations {
            let union = relations.entry(name.clone()).or_default();
            for target in targets {
                if !union.contains(target) {
                    union.push(*target);
                }
            }
        }
    }
    merged.relations = relations;

    let keys: BTreeSet<&String> = candidates
        .iter()
        .flat_map(|c| c.resource.fields.keys())
        .collect();
    let mut fields = BTreeMap::new();
    for key in keys {
        let present: Vec<&FieldValue> = candidates
            .iter()
            .filter_map(|c| c.resource.fields.get(key))
            .collect();
        let mut distinct: Vec<&FieldValue> = Vec::new();
        for value in &present {
            if !distinct.contains(value) {
                distinct.push(value);
            }
        }

        let value = if distinct.len() == 1 {
            distinct[0].clone()
        } else if distinct
            .iter()
            .all(|v| matches!(v, FieldValue::List(_)))
        {
            let mut items = Vec::new();
            for value in &present {
                if let FieldValue::List(elements) = value {
                    for element in elements {
                        if !items.contains(element) {
                            items.push(element.clone());
                        }
                    }
                }
            }
            FieldValue::List(items)
        } else {
            // Latest writer wins; `present` follows candidate order.
            (*present.last().expect("key came from a candidate")).clone()
        };
        fields.insert(key.clone(), value);
    }
    merged.fields = fields;

    (merged, conflicted)
}
