//! Typed request context for access decisions.
//!
//! Contexts and permission conditions share the same representation: a
//! string-keyed map of primitive values. A permission's conditions are
//! satisfied when every condition key is present in the request context with
//! an equal value.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Context key carrying the supervising actor's approval.
pub const SUPERVISOR_APPROVED: &str = "supervisor_approved";

/// Context key naming the approving supervisor, recorded in the audit entry.
pub const SUPERVISOR_ID: &str = "supervisor_id";

/// Context key carrying the clinical purpose of use.
pub const PURPOSE_OF_USE: &str = "purpose_of_use";

/// A primitive context value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Text value.
    Text(String),
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Key-value context supplied with an access request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessContext {
    values: BTreeMap<String, ContextValue>,
}

impl AccessContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Marks the request as approved by a supervisor.
    #[must_use]
    pub fn supervisor_approved(self) -> Self {
        self.with(SUPERVISOR_APPROVED, true)
    }

    /// Inserts a value in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Gets a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.values.get(key)
    }

    /// Returns `true` only if `supervisor_approved` is the boolean `true`.
    #[must_use]
    pub fn is_supervisor_approved(&self) -> bool {
        matches!(self.values.get(SUPERVISOR_APPROVED), Some(ContextValue::Bool(true)))
    }

    /// Returns `true` if every condition is present with an equal value.
    #[must_use]
    pub fn satisfies(&self, conditions: &BTreeMap<String, ContextValue>) -> bool {
        conditions
            .iter()
            .all(|(key, required)| self.values.get(key) == Some(required))
    }

    /// Overlays `other` on top of this context; `other` wins on conflicts.
    #[must_use]
    pub fn merged(&self, other: &AccessContext) -> AccessContext {
        let mut values = self.values.clone();
        values.extend(other.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        AccessContext { values }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the context is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ContextValue)> {
        self.values.iter()
    }
}

impl FromIterator<(String, ContextValue)> for AccessContext {
    fn from_iter<T: IntoIterator<Item = (String, ContextValue)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
