//! Search filters and scopes.
//!
//! The engine builds filters as a tree and implementations render them to
//! RFC 4515 text (or evaluate them directly, as the in-memory client does).

/// Search scope relative to the base DN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The base entry only.
    Base,
    /// Immediate children of the base entry.
    OneLevel,
    /// The base entry and its whole subtree.
    Subtree,
}

/// A directory search filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// All inner filters must match.
    And(Vec<Filter>),
    /// At least one inner filter must match.
    Or(Vec<Filter>),
    /// The inner filter must not match.
    Not(Box<Filter>),
    /// Attribute equals value (case-insensitive, as directory servers match).
    Equals { attribute: String, value: String },
    /// Attribute is present with any value.
    Present { attribute: String },
}

impl Filter {
    /// Equality filter.
    pub fn eq(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Presence filter.
    pub fn present(attribute: impl Into<String>) -> Self {
        Filter::Present {
            attribute: attribute.into(),
        }
    }

    /// Conjunction of filters.
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    /// Disjunction of filters.
    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    /// Negation.
    pub fn negate(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Render to RFC 4515 filter text.
    pub fn to_filter_string(&self) -> String {
        match self {
            Filter::And(filters) => {
                let inner: Vec<String> = filters.iter().map(Filter::to_filter_string).collect();
                format!("(&{})", inner.join(""))
            }
            Filter::Or(filters) => {
                let inner: Vec<String> = filters.iter().map(Filter::to_filter_string).collect();
                format!("(|{})", inner.join(""))
            }
            Filter::Not(filter) => format!("(!{})", filter.to_filter_string()),
            Filter::Equals { attribute, value } => {
                format!("({}={})", attribute, escape_filter_value(value))
            }
            Filter::Present { attribute } => format!("({}=*)", attribute),
        }
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_filter_string())
    }
}

/// Escape special characters in filter values (RFC 4515).
pub fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}
