//! Role-based permission matrices.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::policy::matcher::ResourcePattern;
use crate::types::access_level::AccessLevel;

/// A versioned role → resource → level table.
///
/// Matrices are looked up by an actor's credentials, never by identity. A
/// published version is immutable; changes are published as a new version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionMatrix {
    /// Stable matrix identifier.
    pub matrix_id: String,

    /// Display name.
    pub name: String,

    /// Monotonically increasing version.
    pub version: u32,

    /// Domain the matrix governs (e.g. "clinical", "billing").
    pub domain: String,

    /// Role → resource pattern → granted level.
    #[serde(default)]
    pub role_permissions: BTreeMap<String, BTreeMap<ResourcePattern, AccessLevel>>,

    /// Resource category → role → granted level.
    #[serde(default)]
    pub resource_access_patterns: BTreeMap<String, BTreeMap<String, AccessLevel>>,

    /// Compliance rules recorded with every role-based grant under this
    /// matrix.
    #[serde(default)]
    pub required_compliance: Vec<String>,

    /// Roles allowed to request break-glass access.
    #[serde(default)]
    pub emergency_access_roles: Vec<String>,

    /// Role → roles whose supervision it needs.
    #[serde(default)]
    pub supervision_matrix: BTreeMap<String, Vec<String>>,

    /// Inactive matrices are ignored by lookups.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl PermissionMatrix {
    /// Creates an empty active matrix.
    #[must_use]
    pub fn new(
        matrix_id: impl Into<String>,
        name: impl Into<String>,
        version: u32,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            matrix_id: matrix_id.into(),
            name: name.into(),
            version,
            domain: domain.into(),
            role_permissions: BTreeMap::new(),
            resource_access_patterns: BTreeMap::new(),
            required_compliance: Vec::new(),
            emergency_access_roles: Vec::new(),
            supervision_matrix: BTreeMap::new(),
            active: true,
        }
    }

    /// Grants `level` on `pattern` to `role`.
    #[must_use]
    pub fn with_role_permission(
        mut self,
        role: impl Into<String>,
        pattern: impl Into<ResourcePattern>,
        level: AccessLevel,
    ) -> Self {
        self.role_permissions
            .entry(role.into())
            .or_default()
            .insert(pattern.into(), level);
        self
    }

    /// Sets the level a role has on a resource category.
    #[must_use]
    pub fn with_category_access(
        mut self,
        category: impl Into<String>,
        role: impl Into<String>,
        level: AccessLevel,
    ) -> Self {
        self.resource_access_patterns
            .entry(category.into())
            .or_default()
            .insert(role.into(), level);
        self
    }

    /// Allows `role` to request break-glass access.
    #[must_use]
    pub fn with_emergency_role(mut self, role: impl Into<String>) -> Self {
        self.emergency_access_roles.push(role.into());
        self
    }

    /// Declares that `role` must be supervised by one of `supervisors`.
    #[must_use]
    pub fn with_supervision(
        mut self,
        role: impl Into<String>,
        supervisors: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.supervision_matrix
            .entry(role.into())
            .or_default()
            .extend(supervisors.into_iter().map(Into::into));
        self
    }

    /// Adds a required compliance rule.
    #[must_use]
    pub fn with_required_compliance(mut self, rule: impl Into<String>) -> Self {
        self.required_compliance.push(rule.into());
        self
    }

    /// Highest level `role` holds on a resource matching `resource_id`.
    #[must_use]
    pub fn role_level(&self, role: &str, resource_id: &str) -> Option<AccessLevel> {
        self.role_permissions.get(role).and_then(|patterns| {
            patterns
                .iter()
                .filter(|(pattern, _)| pattern.matches_category(resource_id))
                .map(|(_, level)| *level)
                .max()
        })
    }

    /// Level `role` holds on a resource category.
    #[must_use]
    pub fn category_level(&self, category: &str, role: &str) -> Option<AccessLevel> {
        self.resource_access_patterns
            .get(category)
            .and_then(|roles| roles.get(role))
            .copied()
    }

    /// Returns `true` if `role` may request break-glass access.
    #[must_use]
    pub fn allows_emergency(&self, role: &str) -> bool {
        self.emergency_access_roles.iter().any(|r| r == role)
    }

    /// Roles that must supervise `role` (empty if unsupervised).
    #[must_use]
    pub fn supervisors_for(&self, role: &str) -> &[String] {
        self.supervision_matrix
            .get(role)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clinical() -> PermissionMatrix {
        PermissionMatrix::new("clinical", "Clinical", 1, "clinical")
            .with_role_permission("nurse", "observation", AccessLevel::Write)
            .with_role_permission("nurse", "patient:*", AccessLevel::Read)
            .with_role_permission("physician", "*", AccessLevel::Delete)
            .with_category_access("lab", "nurse", AccessLevel::Read)
            .with_emergency_role("physician")
            .with_supervision("resident", ["physician"])
    }

    #[test]
    fn test_role_level() {
        let m = clinical();
        assert_eq!(m.role_level("nurse", "observation-42"), Some(AccessLevel::Write));
        assert_eq!(m.role_level("nurse", "patient:7"), Some(AccessLevel::Read));
        assert_eq!(m.role_level("nurse", "encounter-1"), None);
        assert_eq!(m.role_level("physician", "anything"), Some(AccessLevel::Delete));
        assert_eq!(m.role_level("clerk", "observation-1"), None);
    }

    #[test]
    fn test_lookups() {
        let m = clinical();
        assert_eq!(m.category_level("lab", "nurse"), Some(AccessLevel::Read));
        assert_eq!(m.category_level("lab", "physician"), None);
        assert!(m.allows_emergency("physician"));
        assert!(!m.allows_emergency("nurse"));
        assert_eq!(m.supervisors_for("resident"), ["physician".to_string()]);
        assert!(m.supervisors_for("nurse").is_empty());
    }

    #[test]
    fn test_deserialize_defaults_active() {
        let json = serde_json::json!({
            "matrix_id": "m1",
            "name": "M1",
            "version": 3,
            "domain": "clinical",
            "role_permissions": { "nurse": { "observation": "write" } }
        });
        let m: PermissionMatrix = serde_json::from_value(json).unwrap();
        assert!(m.active);
        assert_eq!(m.role_level("nurse", "observation-1"), Some(AccessLevel::Write));
    }
}
