/// A single indexed predicate. Paths name index slots: `identifier` and
/// `category` are match-indexed, `relations.<name>` are contain-indexed,
/// `geometry` and `conflicts` are existence-indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Exact value equality on a match-indexed path.
    Match { path: String, value: String },
    /// Membership in the target list of a contain-indexed path.
    Contain { path: String, value: String },
    /// Presence of a value on an existence-indexed path.
    Exist { path: String },
}

impl Constraint {
    pub fn matches(path: &str, value: impl Into<String>) -> Self {
        Constraint::Match {
            path: path.to_string(),
            value: value.into(),
        }
    }

    pub fn contains(path: &str, value: impl Into<String>) -> Self {
        Constraint::Contain {
            path: path.to_string(),
            value: value.into(),
        }
    }

    pub fn exists(path: &str) -> Self {
        Constraint::Exist {
            path: path.to_string(),
        }
    }
}

/// A datastore query: an optional full-text string (empty matches all),
/// an optional category filter and a conjunction of constraints.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub q: String,
    pub categories: Option<Vec<String>>,
    pub constraints: Vec<Constraint>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn text(q: &str) -> Self {
        Self {
            q: q.to_string(),
            ..Self::default()
        }
    }

    pub fn with_categories(mut self, categories: &[&str]) -> Self {
        self.categories = Some(categories.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}
