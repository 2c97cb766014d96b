//! Label matchers used to select series
//!
//! Matchers follow PromQL semantics: a missing label behaves like a label with
//! an empty value, and regular expressions are fully anchored.

use crate::query::error::{QueryError, QueryResult};
use crate::types::Labels;
use regex::Regex;
use std::fmt;

/// Longest accepted regex pattern
const MAX_PATTERN_LEN: usize = 1000;

/// Label matching operators
#[derive(Debug, Clone)]
pub enum LabelMatcher {
    /// Exact match: `name="value"`
    Equal {
        /// Label name
        name: String,
        /// Expected value
        value: String,
    },
    /// Not equal: `name!="value"`
    NotEqual {
        /// Label name
        name: String,
        /// Value that must not match
        value: String,
    },
    /// Regex match: `name=~"pattern"`
    Regex {
        /// Label name
        name: String,
        /// Source pattern as written
        pattern: String,
        /// Anchored, compiled pattern
        regex: Regex,
    },
    /// Negated regex match: `name!~"pattern"`
    NotRegex {
        /// Label name
        name: String,
        /// Source pattern as written
        pattern: String,
        /// Anchored, compiled pattern
        regex: Regex,
    },
}

impl LabelMatcher {
    /// Create an equality matcher
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equal {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Create an inequality matcher
    pub fn not_equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::NotEqual {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Create a regex matcher
    ///
    /// Returns a validation error if the pattern does not compile or is too long.
    pub fn regex(name: impl Into<String>, pattern: impl Into<String>) -> QueryResult<Self> {
        let pattern = pattern.into();
        let regex = compile_anchored(&pattern)?;
        Ok(Self::Regex {
            name: name.into(),
            pattern,
            regex,
        })
    }

    /// Create a negated regex matcher
    pub fn not_regex(name: impl Into<String>, pattern: impl Into<String>) -> QueryResult<Self> {
        let pattern = pattern.into();
        let regex = compile_anchored(&pattern)?;
        Ok(Self::NotRegex {
            name: name.into(),
            pattern,
            regex,
        })
    }

    /// Label name this matcher inspects
    pub fn name(&self) -> &str {
        match self {
            Self::Equal { name, .. }
            | Self::NotEqual { name, .. }
            | Self::Regex { name, .. }
            | Self::NotRegex { name, .. } => name,
        }
    }

    /// Check a label set against this matcher
    pub fn matches(&self, labels: &Labels) -> bool {
        let actual = labels.get(self.name()).unwrap_or("");
        match self {
            Self::Equal { value, .. } => actual == value,
            Self::NotEqual { value, .. } => actual != value,
            Self::Regex { regex, .. } => regex.is_match(actual),
            Self::NotRegex { regex, .. } => !regex.is_match(actual),
        }
    }
}

impl PartialEq for LabelMatcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Equal { name: a, value: x }, Self::Equal { name: b, value: y })
            | (Self::NotEqual { name: a, value: x }, Self::NotEqual { name: b, value: y }) => {
                a == b && x == y
            }
            (
                Self::Regex {
                    name: a, pattern: x, ..
                },
                Self::Regex {
                    name: b, pattern: y, ..
                },
            )
            | (
                Self::NotRegex {
                    name: a, pattern: x, ..
                },
                Self::NotRegex {
                    name: b, pattern: y, ..
                },
            ) => a == b && x == y,
            _ => false,
        }
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal { name, value } => write!(f, "{}=\"{}\"", name, value),
            Self::NotEqual { name, value } => write!(f, "{}!=\"{}\"", name, value),
            Self::Regex { name, pattern, .. } => write!(f, "{}=~\"{}\"", name, pattern),
            Self::NotRegex { name, pattern, .. } => write!(f, "{}!~\"{}\"", name, pattern),
        }
    }
}

fn compile_anchored(pattern: &str) -> QueryResult<Regex> {
    if pattern.len() > MAX_PATTERN_LEN {
        return Err(QueryError::validation(format!(
            "Regex pattern exceeds maximum length of {} characters",
            MAX_PATTERN_LEN
        )));
    }
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
        QueryError::validation(format!("Invalid regex pattern '{}': {}", pattern, e))
    })
}
