//! Break-glass emergency access.
//!
//! An eligible actor can obtain a short-lived `emergency` grant on a single
//! resource by stating a justification. Eligibility comes from the actor's
//! credentials appearing in an active matrix's `emergency_access_roles`.
//! Every request is audited with `EMERGENCY_ACCESS` and `REQUIRES_REVIEW`
//! whether or not it succeeds.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

use crate::audit::{AuditEntryBuilder, AuditEventType, AuditLedger, ComplianceFlag};
use crate::directory::{ActorDirectory, ActorLocks};
use crate::error::require_id;
use crate::permission_store::{GrantRequest, PermissionStore};
use crate::policy::matrix::PermissionMatrixEngine;
use crate::types::{
    AccessLevel, Permission, PermissionScope, RULE_AUDIT_ALL_ACCESS, RULE_EMERGENCY_APPROVAL,
};
use crate::{IamError, IamResult};

/// Actor recorded as the grantor of break-glass permissions.
pub const EMERGENCY_GRANTOR: &str = "system:emergency";

/// Clinical category of an emergency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyType {
    /// Immediate threat to life.
    LifeThreatening,
    /// Urgent care that cannot wait for normal authorization.
    UrgentCare,
    /// Patient safety concern.
    PatientSafety,
    /// Normal access paths are unavailable.
    SystemOutage,
    /// Anything else; the justification carries the detail.
    Other,
}

impl EmergencyType {
    /// Wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LifeThreatening => "life_threatening",
            Self::UrgentCare => "urgent_care",
            Self::PatientSafety => "patient_safety",
            Self::SystemOutage => "system_outage",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for EmergencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmergencyType {
    type Err = IamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "life_threatening" => Ok(Self::LifeThreatening),
            "urgent_care" => Ok(Self::UrgentCare),
            "patient_safety" => Ok(Self::PatientSafety),
            "system_outage" => Ok(Self::SystemOutage),
            "other" => Ok(Self::Other),
            _ => Err(IamError::invalid_input(format!("unknown emergency type: {s}"))),
        }
    }
}

fn validate_request(resource_id: &str, justification: &str) -> IamResult<()> {
    require_id("resource_id", resource_id)?;
    if resource_id.contains('*') {
        return Err(IamError::invalid_input(
            "emergency access targets a single resource, not a pattern",
        ));
    }
    if justification.trim().is_empty() {
        return Err(IamError::invalid_input(
            "emergency access requires a justification",
        ));
    }
    Ok(())
}

/// Issues and sweeps break-glass grants.
#[derive(Debug, Clone)]
pub struct EmergencyAccessCoordinator {
    directory: Arc<ActorDirectory>,
    permissions: Arc<PermissionStore>,
    matrices: Arc<PermissionMatrixEngine>,
    ledger: Arc<AuditLedger>,
    locks: Arc<ActorLocks>,
    grace_window: Duration,
    fail_closed: bool,
}

impl EmergencyAccessCoordinator {
    /// Creates a coordinator over shared components.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        directory: Arc<ActorDirectory>,
        permissions: Arc<PermissionStore>,
        matrices: Arc<PermissionMatrixEngine>,
        ledger: Arc<AuditLedger>,
        locks: Arc<ActorLocks>,
        grace_window: Duration,
        fail_closed: bool,
    ) -> Self {
        Self {
            directory,
            permissions,
            matrices,
            ledger,
            locks,
            grace_window,
            fail_closed,
        }
    }

    /// How long a break-glass grant lasts.
    #[must_use]
    pub fn grace_window(&self) -> Duration {
        self.grace_window
    }

    /// Requests break-glass access to one resource.
    ///
    /// Returns `Ok(false)` when the actor is not eligible.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` for empty IDs or justification, or a
    /// wildcard resource. Unless the actor ID is empty the attempt is still
    /// audited.
    pub fn request_emergency_access(
        &self,
        actor_id: &str,
        resource_id: &str,
        justification: &str,
        emergency_type: EmergencyType,
    ) -> IamResult<bool> {
        require_id("actor_id", actor_id)?;

        let base = AuditEntryBuilder::new(AuditEventType::EmergencyAccess, actor_id)
            .resource(resource_id)
            .access_level(AccessLevel::Emergency)
            .detail("justification", justification)
            .detail("emergency_type", emergency_type.as_str())
            .flag(ComplianceFlag::EmergencyAccess)
            .flag(ComplianceFlag::RequiresReview);

        if let Err(e) = validate_request(resource_id, justification) {
            self.ledger.record(base.success(false).reason(e.code()));
            return Err(e);
        }

        // eligibility, issuance and the audit record must not interleave with
        // credential or status changes
        let issued = self.locks.with_lock(actor_id, || {
            match self.issue(actor_id, resource_id, justification, emergency_type) {
                Ok(Some((permission, matrix_id, role))) => {
                    let mut entry = base
                        .detail("permission_id", permission.permission_id.clone())
                        .detail("matrix_id", matrix_id)
                        .detail("role", role);
                    if let Some(until) = permission.valid_until {
                        entry = entry.detail("valid_until", until.unix_timestamp());
                    }
                    Ok(Some((permission, self.ledger.record(entry))))
                }
                Ok(None) => {
                    let receipt = self.ledger.record(
                        base.success(false)
                            .reason(IamError::emergency_not_authorized(actor_id).code()),
                    );
                    warn!(
                        actor_id = %actor_id,
                        resource_id = %resource_id,
                        audit_id = receipt.audit_id,
                        "Emergency access refused"
                    );
                    Ok(None)
                }
                Err(e) => {
                    self.ledger.record(base.success(false).reason(e.code()));
                    Err(e)
                }
            }
        })?;

        let Some((permission, receipt)) = issued else {
            return Ok(false);
        };

        if self.fail_closed && !receipt.delivered {
            // the grant must not outlive an unpersisted audit record
            let _ = self.permissions.remove(&permission.permission_id);
            warn!(
                actor_id = %actor_id,
                permission_id = %permission.permission_id,
                "Audit persistence unavailable, emergency grant withdrawn"
            );
            return Ok(false);
        }

        warn!(
            actor_id = %actor_id,
            resource_id = %resource_id,
            emergency_type = %emergency_type,
            permission_id = %permission.permission_id,
            audit_id = receipt.audit_id,
            "Emergency access granted"
        );
        Ok(true)
    }

    fn issue(
        &self,
        actor_id: &str,
        resource_id: &str,
        justification: &str,
        emergency_type: EmergencyType,
    ) -> IamResult<Option<(Permission, String, String)>> {
        let Some(credentials) = self
            .directory
            .with_active(actor_id, |actor| actor.credentials.clone())
        else {
            return Ok(None);
        };
        let Some((matrix_id, role)) = self.matrices.emergency_role(&credentials) else {
            return Ok(None);
        };

        let now = OffsetDateTime::now_utc();
        let permission = GrantRequest::new(
            actor_id,
            resource_id,
            AccessLevel::Emergency,
            PermissionScope::Instance,
            EMERGENCY_GRANTOR,
        )
        .scope_value(resource_id)
        .valid_from(now)
        .valid_until(now + self.grace_window)
        .compliance_rule(RULE_EMERGENCY_APPROVAL)
        .compliance_rule(RULE_AUDIT_ALL_ACCESS)
        .metadata("justification", justification)
        .metadata("emergency_type", emergency_type.as_str())
        .into_permission();

        let permission = self.permissions.insert(permission)?;
        Ok(Some((permission, matrix_id, role)))
    }

    /// Removes emergency grants that expired more than `older_than` ago.
    ///
    /// The ledger keeps their history; each removal is audited.
    pub fn purge_expired(&self, older_than: Duration) -> usize {
        let cutoff = OffsetDateTime::now_utc() - older_than;
        let purged = self.permissions.purge_expired_emergency(cutoff);
        for permission in &purged {
            self.ledger.record(
                AuditEntryBuilder::new(AuditEventType::PermissionModified, &permission.actor_id)
                    .resource(permission.resource_pattern.as_str())
                    .access_level(permission.access_level)
                    .detail("action", "purged")
                    .detail("permission_id", permission.permission_id.clone())
                    .reason("emergency_access_expired")
                    .flag(ComplianceFlag::EmergencyAccess),
            );
        }
        if !purged.is_empty() {
            info!(purged = purged.len(), "Expired emergency grants swept");
        }
        purged.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditQuery;
    use crate::types::{AccessContext, ActorIdentity, PermissionMatrix};
    use crate::policy::AccessDecisionEngine;

    struct Fixture {
        directory: Arc<ActorDirectory>,
        permissions: Arc<PermissionStore>,
        ledger: Arc<AuditLedger>,
        coordinator: EmergencyAccessCoordinator,
        engine: AccessDecisionEngine,
    }

    fn fixture() -> Fixture {
        let directory = Arc::new(ActorDirectory::new());
        let permissions = Arc::new(PermissionStore::new());
        let matrices = Arc::new(PermissionMatrixEngine::new());
        let ledger = Arc::new(AuditLedger::new());
        matrices
            .publish(
                PermissionMatrix::new("clinical", "Clinical", 1, "clinical")
                    .with_emergency_role("physician"),
            )
            .unwrap();
        directory
            .register(ActorIdentity::human("dr-1", "Dr").with_credential("physician"))
            .unwrap();
        directory
            .register(ActorIdentity::human("clerk-1", "Clerk").with_credential("clerk"))
            .unwrap();

        let coordinator = EmergencyAccessCoordinator::new(
            directory.clone(),
            permissions.clone(),
            matrices.clone(),
            ledger.clone(),
            Arc::new(ActorLocks::new()),
            Duration::hours(1),
            false,
        );
        let engine = AccessDecisionEngine::new(
            directory.clone(),
            permissions.clone(),
            matrices,
            ledger.clone(),
            false,
        );
        Fixture {
            directory,
            permissions,
            ledger,
            coordinator,
            engine,
        }
    }

    #[test]
    fn test_emergency_grant_is_time_boxed() {
        let f = fixture();
        assert!(
            f.coordinator
                .request_emergency_access("dr-1", "patient:9", "cardiac arrest", EmergencyType::LifeThreatening)
                .unwrap()
        );

        let grants = f.permissions.for_actor("dr-1");
        assert_eq!(grants.len(), 1);
        let grant = &grants[0];
        assert!(grant.is_emergency());
        assert_eq!(grant.scope, PermissionScope::Instance);
        assert_eq!(grant.scope_value.as_deref(), Some("patient:9"));
        assert_eq!(grant.metadata.get("emergency_type").map(String::as_str), Some("life_threatening"));
        let from = grant.valid_from.unwrap();
        assert_eq!(grant.valid_until.unwrap() - from, Duration::hours(1));

        let ctx = AccessContext::new();
        assert!(
            f.engine
                .check_access_at("dr-1", "patient:9", AccessLevel::Emergency, &ctx, from + Duration::minutes(30))
                .unwrap()
        );
        assert!(
            !f.engine
                .check_access_at("dr-1", "patient:9", AccessLevel::Read, &ctx, from + Duration::minutes(61))
                .unwrap()
        );
        // exact resource only
        assert!(
            !f.engine
                .check_access_at("dr-1", "patient:10", AccessLevel::Read, &ctx, from)
                .unwrap()
        );
    }

    #[test]
    fn test_every_request_audited_with_flags() {
        let f = fixture();
        f.coordinator
            .request_emergency_access("dr-1", "patient:9", "trauma", EmergencyType::UrgentCare)
            .unwrap();
        assert!(
            !f.coordinator
                .request_emergency_access("clerk-1", "patient:9", "curious", EmergencyType::Other)
                .unwrap()
        );
        assert!(
            !f.coordinator
                .request_emergency_access("ghost", "patient:9", "x", EmergencyType::Other)
                .unwrap()
        );

        let entries = f.ledger.query(
            &AuditQuery::new().with_event_type(AuditEventType::EmergencyAccess),
        );
        assert_eq!(entries.len(), 3);
        for e in &entries {
            assert!(e.has_flag(ComplianceFlag::EmergencyAccess));
            assert!(e.has_flag(ComplianceFlag::RequiresReview));
        }
        let refused = &entries[1];
        assert_eq!(refused.actor_id, "clerk-1");
        assert!(!refused.success);
        assert_eq!(refused.detail_str("reason"), Some("emergency_access_not_authorized"));
        assert!(f.permissions.for_actor("clerk-1").is_empty());
    }

    #[test]
    fn test_inactive_actor_refused() {
        let f = fixture();
        f.directory.set_active("dr-1", false).unwrap();
        assert!(
            !f.coordinator
                .request_emergency_access("dr-1", "patient:9", "trauma", EmergencyType::UrgentCare)
                .unwrap()
        );
        assert!(f.permissions.is_empty());
    }

    #[test]
    fn test_empty_justification_rejected() {
        let f = fixture();
        let err = f
            .coordinator
            .request_emergency_access("dr-1", "patient:9", "   ", EmergencyType::Other)
            .unwrap_err();
        assert!(matches!(err, IamError::InvalidInput { .. }));
        assert_eq!(f.ledger.len(), 1);
        assert!(f.permissions.is_empty());

        assert!(
            f.coordinator
                .request_emergency_access("dr-1", "patient:*", "mass casualty", EmergencyType::Other)
                .is_err()
        );
    }

    #[test]
    fn test_purge_expired_keeps_history() {
        let f = fixture();
        let t = OffsetDateTime::now_utc();
        let stale = GrantRequest::new("dr-1", "patient:1", AccessLevel::Emergency, PermissionScope::Instance, EMERGENCY_GRANTOR)
            .valid_from(t - Duration::hours(30))
            .valid_until(t - Duration::hours(29))
            .compliance_rule(RULE_EMERGENCY_APPROVAL)
            .into_permission();
        f.permissions.insert(stale).unwrap();
        f.coordinator
            .request_emergency_access("dr-1", "patient:2", "sepsis", EmergencyType::PatientSafety)
            .unwrap();

        assert_eq!(f.coordinator.purge_expired(Duration::hours(24)), 1);
        assert_eq!(f.permissions.for_actor("dr-1").len(), 1);
        let purged = f.ledger.query(
            &AuditQuery::new().with_event_type(AuditEventType::PermissionModified),
        );
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].detail_str("action"), Some("purged"));
    }

    #[test]
    fn test_emergency_type_parse() {
        assert_eq!("urgent_care".parse::<EmergencyType>().unwrap(), EmergencyType::UrgentCare);
        assert!("panic".parse::<EmergencyType>().is_err());
    }
}
