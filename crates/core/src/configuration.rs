use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::document::{LIES_WITHIN, RECORDED_IN};

/// A category of resources, as declared by the (external) configuration
/// collaborator. `operation` marks operation-root categories (e.g. Trench):
/// the top-level hierarchical ancestors that scope descendant resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryDefinition {
    pub name: String,
    pub parent: Option<String>,
    pub operation: bool,
}

/// A named, directed edge between categories. `inverse` names the paired
/// relation maintained automatically on targets; unidirectional relations
/// have none. `cross_operation` relations may legally connect resources
/// living under different operation roots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDefinition {
    pub name: String,
    pub inverse: Option<String>,
    pub domain: Vec<String>,
    pub range: Vec<String>,
    pub cross_operation: bool,
}

/// Read-only view of the project's category and relation declarations.
/// Supplied by the configuration collaborator; the core only performs
/// lookups against it.
#[derive(Debug, Clone, Default)]
pub struct ProjectConfiguration {
    categories: BTreeMap<String, CategoryDefinition>,
    relations: BTreeMap<String, RelationDefinition>,
}

impl ProjectConfiguration {
    pub fn new(
        categories: Vec<CategoryDefinition>,
        relations: Vec<RelationDefinition>,
    ) -> Self {
        Self {
            categories: categories
                .into_iter()
                .map(|c| (c.name.clone(), c))
                .collect(),
            relations: relations
                .into_iter()
                .map(|r| (r.name.clone(), r))
                .collect(),
        }
    }

    pub fn category(&self, name: &str) -> Option<&CategoryDefinition> {
        self.categories.get(name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDefinition> {
        self.relations.get(name)
    }

    pub fn is_relation(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }

    pub fn inverse_of(&self, relation_name: &str) -> Option<&str> {
        self.relations
            .get(relation_name)?
            .inverse
            .as_deref()
    }

    pub fn is_operation_category(&self, category: &str) -> bool {
        self.categories
            .get(category)
            .map(|c| c.operation)
            .unwrap_or(false)
    }

    /// Whether `domain_category` resources may carry `relation_name` edges
    /// pointing at `range_category` resources. Category parents count: a
    /// subcategory is allowed wherever its parent is.
    pub fn is_allowed_relation_domain_category(
        &self,
        domain_category: &str,
        range_category: &str,
        relation_name: &str,
    ) -> bool {
        let Some(relation) = self.relations.get(relation_name) else {
            return false;
        };
        self.category_matches(domain_category, &relation.domain)
            && self.category_matches(range_category, &relation.range)
    }

    fn category_matches(&self, category: &str, allowed: &[String]) -> bool {
        if allowed.iter().any(|c| c == category) {
            return true;
        }
        let mut current = self.categories.get(category).and_then(|c| c.parent.as_deref());
        while let Some(parent) = current {
            if allowed.iter().any(|c| c == parent) {
                return true;
            }
            current = self.categories.get(parent).and_then(|c| c.parent.as_deref());
        }
        false
    }
}

/// The category/relation set used by the harness and the test suites:
/// a Project > Trench (operation) > Feature > Find hierarchy with a few
/// bidirectional stratigraphic relations.
pub fn default_test_configuration() -> ProjectConfiguration {
    let all = || {
        vec![
            "Project".to_string(),
            "Trench".to_string(),
            "Feature".to_string(),
            "Find".to_string(),
        ]
    };
    ProjectConfiguration::new(
        vec![
            CategoryDefinition {
                name: "Project".into(),
                parent: None,
                operation: false,
            },
            CategoryDefinition {
                name: "Trench".into(),
                parent: None,
                operation: true,
            },
            CategoryDefinition {
                name: "Feature".into(),
                parent: None,
                operation: false,
            },
            CategoryDefinition {
                name: "Find".into(),
                parent: None,
                operation: false,
            },
        ],
        vec![
            RelationDefinition {
                name: RECORDED_IN.into(),
                inverse: None,
                domain: vec!["Feature".into(), "Find".into()],
                range: vec!["Trench".into()],
                cross_operation: false,
            },
            RelationDefinition {
                name: LIES_WITHIN.into(),
                inverse: None,
                domain: all(),
                range: all(),
                cross_operation: false,
            },
            RelationDefinition {
                name: "isAfter".into(),
                inverse: Some("isBefore".into()),
                domain: vec!["Feature".into()],
                range: vec!["Feature".into()],
                cross_operation: false,
            },
            RelationDefinition {
                name: "isBefore".into(),
                inverse: Some("isAfter".into()),
                domain: vec!["Feature".into()],
                range: vec!["Feature".into()],
                cross_operation: false,
            },
            RelationDefinition {
                name: "isContemporaryWith".into(),
                inverse: Some("isContemporaryWith".into()),
                domain: vec!["Feature".into()],
                range: vec!["Feature".into()],
                cross_operation: false,
            },
            RelationDefinition {
                name: "isDepictedIn".into(),
                inverse: Some("depicts".into()),
                domain: all(),
                range: all(),
                cross_operation: true,
            },
            RelationDefinition {
                name: "depicts".into(),
                inverse: Some("isDepictedIn".into()),
                domain: all(),
                range: all(),
                cross_operation: true,
            },
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_lookup() {
        let config = default_test_configuration();
        assert_eq!(config.inverse_of("isAfter"), Some("isBefore"));
        assert_eq!(config.inverse_of("isBefore"), Some("isAfter"));
        assert_eq!(config.inverse_of(RECORDED_IN), None);
    }

    #[test]
    fn domain_range_checks() {
        let config = default_test_configuration();
        assert!(config.is_allowed_relation_domain_category("Feature", "Feature", "isAfter"));
        assert!(!config.is_allowed_relation_domain_category("Find", "Feature", "isAfter"));
        assert!(config.is_allowed_relation_domain_category("Find", "Trench", RECORDED_IN));
        assert!(!config.is_allowed_relation_domain_category("Trench", "Find", RECORDED_IN));
    }

    #[test]
    fn operation_categories() {
        let config = default_test_configuration();
        assert!(config.is_operation_category("Trench"));
        assert!(!config.is_operation_category("Feature"));
        assert!(!config.is_operation_category("missing"));
    }
}
