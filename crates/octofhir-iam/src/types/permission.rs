//! Direct permission grants.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::policy::matcher::ResourcePattern;
use crate::types::access_level::AccessLevel;
use crate::types::context::ContextValue;

/// Compliance rule attached to break-glass grants.
pub const RULE_EMERGENCY_APPROVAL: &str = "emergency_access_approval";

/// Compliance rule requiring every use to be audited.
pub const RULE_AUDIT_ALL_ACCESS: &str = "audit_all_access";

/// Compliance rule attached to delegated grants.
pub const RULE_PHYSICIAN_SUPERVISION: &str = "physician_supervision";

/// Breadth of a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionScope {
    /// Applies everywhere.
    Global,
    /// Limited to an organization.
    Organization,
    /// Limited to a department.
    Department,
    /// Limited to a patient's records.
    Patient,
    /// Limited to a resource type.
    ResourceType,
    /// Limited to a single resource instance.
    Instance,
}

impl fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Global => "global",
            Self::Organization => "organization",
            Self::Department => "department",
            Self::Patient => "patient",
            Self::ResourceType => "resource_type",
            Self::Instance => "instance",
        };
        f.write_str(s)
    }
}

/// A direct grant owned by one actor.
///
/// Only `last_used` and `use_count` change after creation. Revocation removes
/// the record from the active store; the audit trail keeps the grant event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    /// Unique permission identifier.
    pub permission_id: String,

    /// Owning actor.
    pub actor_id: String,

    /// Resource pattern (`*`, exact, or trailing-`*` prefix).
    pub resource_pattern: ResourcePattern,

    /// Granted level.
    pub access_level: AccessLevel,

    /// Breadth of the grant.
    pub scope: PermissionScope,

    /// Value qualifying the scope (organization id, patient id, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_value: Option<String>,

    /// Start of validity window.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub valid_from: Option<OffsetDateTime>,

    /// End of validity window.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub valid_until: Option<OffsetDateTime>,

    /// Context values the request must carry.
    #[serde(default)]
    pub conditions: BTreeMap<String, ContextValue>,

    /// Whether the request must carry supervisor approval.
    #[serde(default)]
    pub requires_supervision: bool,

    /// The supervising actor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervisor_id: Option<String>,

    /// Compliance rules attached to the grant.
    #[serde(default)]
    pub compliance_rules: Vec<String>,

    /// Free-form annotations (justification, delegation reason, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// Source permission when this grant was produced by delegation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_from: Option<String>,

    /// Actor that granted the permission.
    pub granted_by: String,

    /// When the permission was granted.
    #[serde(with = "time::serde::rfc3339")]
    pub granted_at: OffsetDateTime,

    /// Last time the permission granted access.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_used: Option<OffsetDateTime>,

    /// Number of times the permission granted access.
    #[serde(default)]
    pub use_count: u64,
}

impl Permission {
    /// Creates an unrestricted permission with a fresh ID.
    #[must_use]
    pub fn new(
        actor_id: impl Into<String>,
        resource_pattern: impl Into<ResourcePattern>,
        access_level: AccessLevel,
        scope: PermissionScope,
        granted_by: impl Into<String>,
    ) -> Self {
        Self {
            permission_id: Uuid::new_v4().to_string(),
            actor_id: actor_id.into(),
            resource_pattern: resource_pattern.into(),
            access_level,
            scope,
            scope_value: None,
            valid_from: None,
            valid_until: None,
            conditions: BTreeMap::new(),
            requires_supervision: false,
            supervisor_id: None,
            compliance_rules: Vec::new(),
            metadata: BTreeMap::new(),
            delegated_from: None,
            granted_by: granted_by.into(),
            granted_at: OffsetDateTime::now_utc(),
            last_used: None,
            use_count: 0,
        }
    }

    /// Returns `true` if `at` lies inside the validity window (inclusive).
    #[must_use]
    pub fn is_valid_at(&self, at: OffsetDateTime) -> bool {
        self.valid_from.is_none_or(|from| at >= from)
            && self.valid_until.is_none_or(|until| at <= until)
    }

    /// Returns `true` if the window has closed before `at`.
    #[must_use]
    pub fn is_expired_at(&self, at: OffsetDateTime) -> bool {
        self.valid_until.is_some_and(|until| at > until)
    }

    /// Returns `true` if the window bounds are ordered.
    #[must_use]
    pub fn has_valid_window(&self) -> bool {
        match (self.valid_from, self.valid_until) {
            (Some(from), Some(until)) => from <= until,
            _ => true,
        }
    }

    /// Returns `true` if this is a break-glass grant.
    #[must_use]
    pub fn is_emergency(&self) -> bool {
        self.access_level == AccessLevel::Emergency
            && self
                .compliance_rules
                .iter()
                .any(|r| r == RULE_EMERGENCY_APPROVAL)
    }

    /// Records a use that granted access.
    pub fn record_use(&mut self, at: OffsetDateTime) {
        self.use_count += 1;
        self.last_used = Some(at);
    }
}
