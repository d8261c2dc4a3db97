//! Audit entries and their builder.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::types::AccessLevel;

/// Kind of audited event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// An access check granted access.
    AccessGranted,
    /// An access check denied access.
    AccessDenied,
    /// A permission was granted or revoked.
    PermissionModified,
    /// A break-glass request (granted or refused).
    EmergencyAccess,
    /// A delegation attempt (granted or refused).
    DelegationGranted,
    /// The compliance monitor found a violation.
    ComplianceViolation,
    /// A resource was accessed under an existing decision.
    ResourceAccessed,
    /// Several records were changed in one operation.
    BulkOperation,
    /// A supervised session began.
    SessionStarted,
    /// A supervised session ended.
    SessionEnded,
    /// An actor was registered, activated, deactivated or re-credentialed.
    ActorModified,
}

impl AuditEventType {
    /// Wire name of the event type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessGranted => "access_granted",
            Self::AccessDenied => "access_denied",
            Self::PermissionModified => "permission_modified",
            Self::EmergencyAccess => "emergency_access",
            Self::DelegationGranted => "delegation_granted",
            Self::ComplianceViolation => "compliance_violation",
            Self::ResourceAccessed => "resource_accessed",
            Self::BulkOperation => "bulk_operation",
            Self::SessionStarted => "session_started",
            Self::SessionEnded => "session_ended",
            Self::ActorModified => "actor_modified",
        }
    }

    /// Returns `true` for events that represent an attempt to reach a resource.
    #[must_use]
    pub fn is_access_attempt(&self) -> bool {
        matches!(
            self,
            Self::AccessGranted | Self::AccessDenied | Self::EmergencyAccess | Self::ResourceAccessed
        )
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags that route an entry into compliance review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceFlag {
    /// Break-glass access was requested or used.
    EmergencyAccess,
    /// Entry must be reviewed retrospectively.
    RequiresReview,
    /// Access depended on supervisor approval.
    SupervisionRequired,
    /// Access or permission derived from a delegation.
    Delegated,
    /// A compliance rule was violated.
    PolicyViolation,
}

/// An immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonically assigned identifier.
    pub audit_id: u64,

    /// When the event was recorded (non-decreasing across entries).
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,

    /// Event kind.
    pub event_type: AuditEventType,

    /// Actor the event is about.
    pub actor_id: String,

    /// Target resource, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,

    /// Requested or granted level, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_level: Option<AccessLevel>,

    /// Outcome of the event.
    pub success: bool,

    /// Free-form structured details.
    #[serde(default)]
    pub details: Map<String, Value>,

    /// Compliance review flags.
    #[serde(default)]
    pub compliance_flags: Vec<ComplianceFlag>,
}

impl AuditEntry {
    /// Reads a string detail.
    #[must_use]
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Value::as_str)
    }

    /// Returns `true` if the entry carries the flag.
    #[must_use]
    pub fn has_flag(&self, flag: ComplianceFlag) -> bool {
        self.compliance_flags.contains(&flag)
    }
}

/// Builder for audit entries; the ledger assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct AuditEntryBuilder {
    event_type: AuditEventType,
    actor_id: String,
    resource_id: Option<String>,
    access_level: Option<AccessLevel>,
    success: bool,
    details: Map<String, Value>,
    compliance_flags: Vec<ComplianceFlag>,
}

impl AuditEntryBuilder {
    /// Starts a successful entry.
    pub fn new(event_type: AuditEventType, actor_id: impl Into<String>) -> Self {
        Self {
            event_type,
            actor_id: actor_id.into(),
            resource_id: None,
            access_level: None,
            success: true,
            details: Map::new(),
            compliance_flags: Vec::new(),
        }
    }

    /// Set the target resource
    pub fn resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Set the access level
    pub fn access_level(mut self, level: AccessLevel) -> Self {
        self.access_level = Some(level);
        self
    }

    /// Set the outcome
    pub fn success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    /// Add a detail
    pub fn detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Record the reason for a denial or failure
    pub fn reason(self, reason: impl Into<String>) -> Self {
        self.detail("reason", reason.into())
    }

    /// Add a compliance flag
    pub fn flag(mut self, flag: ComplianceFlag) -> Self {
        if !self.compliance_flags.contains(&flag) {
            self.compliance_flags.push(flag);
        }
        self
    }

    /// The actor the entry will be recorded for.
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// The event type the entry will be recorded as.
    pub fn event_type(&self) -> AuditEventType {
        self.event_type
    }

    pub(crate) fn build(self, audit_id: u64, timestamp: OffsetDateTime) -> AuditEntry {
        AuditEntry {
            audit_id,
            timestamp,
            event_type: self.event_type,
            actor_id: self.actor_id,
            resource_id: self.resource_id,
            access_level: self.access_level,
            success: self.success,
            details: self.details,
            compliance_flags: self.compliance_flags,
        }
    }
}
