use std::collections::{HashMap, HashSet};

use fieldwork_core::{Document, FieldValue, ResourceId};

/// Prefix-matching full-text index over identifiers and text field values.
/// Tokens are lowercased, split on non-alphanumeric characters. A query
/// matches a document when every query token is a prefix of at least one
/// of the document's tokens.
#[derive(Debug, Default)]
pub struct FulltextIndex {
    ids_by_token: HashMap<String, HashSet<ResourceId>>,
    tokens_by_id: HashMap<ResourceId, Vec<String>>,
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn collect_tokens(value: &FieldValue, tokens: &mut Vec<String>) {
    match value {
        FieldValue::Text(text) => tokens.extend(tokenize(text)),
        FieldValue::List(items) => {
            for item in items {
                collect_tokens(item, tokens);
            }
        }
        _ => {}
    }
}

impl FulltextIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, document: &Document) {
        let id = document.id();
        self.remove(id);

        let mut tokens: Vec<String> = tokenize(&document.resource.identifier).collect();
        for value in document.resource.fields.values() {
            collect_tokens(value, &mut tokens);
        }
        tokens.sort();
        tokens.dedup();

        for token in &tokens {
            self.ids_by_token
                .entry(token.clone())
                .or_default()
                .insert(id);
        }
        self.tokens_by_id.insert(id, tokens);
    }

    pub fn remove(&mut self, id: ResourceId) {
        let Some(tokens) = self.tokens_by_id.remove(&id) else {
            return;
        };
        for token in &tokens {
            if let Some(ids) = self.ids_by_token.get_mut(token) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.ids_by_token.remove(token);
                }
            }
        }
    }

    /// Ids matching the query string, or `None` when the query is blank
    /// (blank means "no full-text restriction", not "match nothing").
    pub fn find(&self, q: &str) -> Option<HashSet<ResourceId>> {
        let query_tokens: Vec<String> = tokenize(q).collect();
        if query_tokens.is_empty() {
            return None;
        }

        let mut result: Option<HashSet<ResourceId>> = None;
        for query_token in &query_tokens {
            let mut ids = HashSet::new();
            for (token, token_ids) in &self.ids_by_token {
                if token.starts_with(query_token.as_str()) {
                    ids.extend(token_ids.iter().copied());
                }
            }
            result = Some(match result {
                None => ids,
                Some(acc) => acc.intersection(&ids).copied().collect(),
            });
        }
        result
    }

    pub fn clear(&mut self) {
        self.ids_by_token.clear();
        self.tokens_by_id.clear();
    }
}

#[cfg(test)]
mod tests {
    use fieldwork_core::{Hlc, Resource};

    use super::*;

    fn doc(identifier: &str) -> Document {
        Document::from_resource(Resource::new(identifier, "Find"), "alice", Hlc::new(1, 0))
    }

    #[test]
    fn prefix_matching() {
        let mut index = FulltextIndex::new();
        let coin = doc("coin-1");
        let pottery = doc("pottery-1");
        index.put(&coin);
        index.put(&pottery);

        assert_eq!(index.find("coi"), Some(HashSet::from([coin.id()])));
        assert_eq!(
            index.find("1"),
            Some(HashSet::from([coin.id(), pottery.id()]))
        );
        assert_eq!(index.find("axe"), Some(HashSet::new()));
    }

    #[test]
    fn all_query_tokens_must_match() {
        let mut index = FulltextIndex::new();
        let mut document = doc("coin-7");
        document
            .resource
            .fields
            .insert("material".into(), FieldValue::Text("bronze alloy".into()));
        index.put(&document);

        assert_eq!(
            index.find("coin bronze"),
            Some(HashSet::from([document.id()]))
        );
        assert_eq!(index.find("coin silver"), Some(HashSet::new()));
    }

    #[test]
    fn blank_query_means_unrestricted() {
        let index = FulltextIndex::new();
        assert_eq!(index.find("   "), None);
    }
}
