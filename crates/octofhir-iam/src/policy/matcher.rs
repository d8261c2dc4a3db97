//! Resource pattern matching.
//!
//! Resource identifiers are opaque strings. A pattern is one of:
//!
//! - `*` - matches every resource
//! - `patient:*` - trailing wildcard, matches any identifier sharing the
//!   literal prefix `patient:`
//! - `patient:123` - exact match
//!
//! There is no regex support and no backtracking; a comparison is linear in
//! the pattern length.
//!
//! Role matrices use *category* matching on top of this: a pattern without a
//! wildcard also matches identifiers that continue it after a segment
//! separator (`-`, `:`, `/`, `.`), so the matrix entry `observation` covers
//! `observation-42` while `patient:1` does not cover `patient:10`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The match-all pattern.
pub const MATCH_ALL: &str = "*";

/// Characters that end a category segment.
pub const SEGMENT_SEPARATORS: [char; 4] = ['-', ':', '/', '.'];

/// Returns `true` if `resource_id` is `category` or continues it after a
/// segment boundary.
#[must_use]
pub fn category_matches(category: &str, resource_id: &str) -> bool {
    match resource_id.strip_prefix(category) {
        Some("") => true,
        Some(rest) => {
            category.ends_with(SEGMENT_SEPARATORS) || rest.starts_with(SEGMENT_SEPARATORS)
        }
        None => false,
    }
}

/// Parsed shape of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind<'a> {
    /// `*`
    Any,
    /// Literal prefix before a trailing `*`.
    Prefix(&'a str),
    /// Exact identifier.
    Exact(&'a str),
}

/// A resource pattern attached to a permission or matrix entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourcePattern(String);

impl ResourcePattern {
    /// Creates a pattern from its textual form.
    #[must_use]
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    /// The pattern matching every resource.
    #[must_use]
    pub fn any() -> Self {
        Self(MATCH_ALL.to_string())
    }

    /// The textual form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Classifies the pattern.
    #[must_use]
    pub fn kind(&self) -> PatternKind<'_> {
        if self.0 == MATCH_ALL {
            PatternKind::Any
        } else if let Some(prefix) = self.0.strip_suffix('*') {
            PatternKind::Prefix(prefix)
        } else {
            PatternKind::Exact(&self.0)
        }
    }

    /// Returns `true` if the pattern contains a wildcard.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        !matches!(self.kind(), PatternKind::Exact(_))
    }

    /// Matches a concrete resource identifier.
    #[must_use]
    pub fn matches(&self, resource_id: &str) -> bool {
        match self.kind() {
            PatternKind::Any => true,
            PatternKind::Prefix(prefix) => resource_id.starts_with(prefix),
            PatternKind::Exact(exact) => resource_id == exact,
        }
    }

    /// Matches with category semantics: exact patterns also match
    /// identifiers that extend them past a segment boundary.
    #[must_use]
    pub fn matches_category(&self, resource_id: &str) -> bool {
        match self.kind() {
            PatternKind::Exact(category) => category_matches(category, resource_id),
            _ => self.matches(resource_id),
        }
    }
}

impl fmt::Display for ResourcePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourcePattern {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourcePattern {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&String> for ResourcePattern {
    fn from(value: &String) -> Self {
        Self(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_all() {
        let p = ResourcePattern::any();
        assert_eq!(p.kind(), PatternKind::Any);
        assert!(p.matches("patient:123"));
        assert!(p.matches(""));
    }

    #[test]
    fn test_wildcard_suffix() {
        let p = ResourcePattern::new("patient:*");
        assert_eq!(p.kind(), PatternKind::Prefix("patient:"));
        assert!(p.matches("patient:123"));
        assert!(p.matches("patient:456"));
        assert!(p.matches("patient:"));
        assert!(!p.matches("observation:123"));
        assert!(!p.matches("patient"));
    }

    #[test]
    fn test_exact() {
        let p = ResourcePattern::new("patient:123");
        assert!(!p.is_wildcard());
        assert!(p.matches("patient:123"));
        assert!(!p.matches("patient:1234"));
        assert!(!p.matches("patient:12"));
    }

    #[test]
    fn test_star_only_at_end_is_wildcard() {
        let p = ResourcePattern::new("pat*ent:1");
        assert!(p.matches("pat*ent:1"));
        assert!(!p.matches("patient:1"));
    }

    #[test]
    fn test_category_semantics() {
        let p = ResourcePattern::new("observation");
        assert!(p.matches_category("observation-42"));
        assert!(p.matches_category("observation"));
        assert!(!p.matches("observation-42"));
        assert!(!p.matches_category("patient-1"));

        let wildcard = ResourcePattern::new("lab:*");
        assert!(wildcard.matches_category("lab:cbc"));
        assert!(!wildcard.matches_category("imaging:ct"));
    }

    #[test]
    fn test_category_stops_at_segment_boundary() {
        let p = ResourcePattern::new("patient:1");
        assert!(p.matches_category("patient:1"));
        assert!(p.matches_category("patient:1/observation"));
        assert!(p.matches_category("patient:1.history"));
        assert!(!p.matches_category("patient:10"));
        assert!(!p.matches_category("patient:1999"));

        assert!(!ResourcePattern::new("observation").matches_category("observations-1"));
        assert!(category_matches("lab", "lab:cbc"));
        assert!(!category_matches("lab", "laboratory"));
        // a category ending in a separator is its own boundary
        assert!(category_matches("lab:", "lab:cbc"));
        assert!(!category_matches("lab:", "imaging:ct"));
    }

    #[test]
    fn test_serde_transparent() {
        let p: ResourcePattern = serde_json::from_str("\"patient:*\"").unwrap();
        assert_eq!(p.as_str(), "patient:*");
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"patient:*\"");
    }
}
