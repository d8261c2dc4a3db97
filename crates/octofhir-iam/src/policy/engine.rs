//! Access decision engine.
//!
//! A check walks three stages and stops at the first conclusive one:
//!
//! 1. the actor must exist and be active;
//! 2. a direct permission whose pattern, window, supervision and conditions
//!    all hold and whose level is sufficient grants;
//! 3. otherwise an active matrix entry for one of the actor's credentials
//!    grants.
//!
//! Anything else is denied. Every outcome is written to the audit ledger.
//! Policy outcomes are never errors; only malformed input is.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, error};

use crate::IamResult;
use crate::audit::{AuditEntryBuilder, AuditEventType, AuditLedger, ComplianceFlag};
use crate::directory::ActorDirectory;
use crate::error::require_id;
use crate::permission_store::{DirectGrant, DirectMiss, DirectOutcome, PermissionStore};
use crate::policy::matrix::{PermissionMatrixEngine, RoleGrant};
use crate::types::{AccessContext, AccessLevel, PURPOSE_OF_USE, SUPERVISOR_ID};

// =============================================================================
// Access Decision
// =============================================================================

/// Result of an access check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// Access is granted.
    Allow(AllowBasis),
    /// Access is denied with a reason.
    Deny(DenyReason),
}

impl AccessDecision {
    /// Returns `true` if access was granted.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }

    /// Returns `true` if access was denied.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny(_))
    }

    /// Get the deny reason if access was denied.
    #[must_use]
    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Self::Deny(reason) => Some(reason),
            Self::Allow(_) => None,
        }
    }
}

/// What granted access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowBasis {
    /// A direct permission.
    Direct(DirectGrant),
    /// A role matrix entry.
    RoleBased(RoleGrant),
}

impl AllowBasis {
    /// Value recorded as `access_pattern` in the audit entry.
    #[must_use]
    pub fn access_pattern(&self) -> &'static str {
        match self {
            Self::Direct(_) => "direct_permission",
            Self::RoleBased(_) => "role_based",
        }
    }
}

// =============================================================================
// Deny Reason
// =============================================================================

/// Reason for access denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DenyReason {
    /// Reason code recorded as `reason` in the audit entry.
    pub code: &'static str,

    /// More specific cause, when one is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<&'static str>,
}

impl DenyReason {
    /// The actor is unknown or deactivated.
    #[must_use]
    pub fn actor_not_found_or_inactive() -> Self {
        Self {
            code: "actor_not_found_or_inactive",
            detail: None,
        }
    }

    /// Nothing granted the requested level.
    #[must_use]
    pub fn insufficient_permissions(miss: Option<DirectMiss>) -> Self {
        Self {
            code: "insufficient_permissions",
            detail: miss.map(|m| m.code()),
        }
    }

    /// The audit entry could not be persisted and the engine fails closed.
    #[must_use]
    pub fn audit_unavailable() -> Self {
        Self {
            code: "audit_unavailable",
            detail: None,
        }
    }
}

// =============================================================================
// Access Decision Engine
// =============================================================================

/// Evaluates access checks and audits their outcomes.
#[derive(Debug, Clone)]
pub struct AccessDecisionEngine {
    directory: Arc<ActorDirectory>,
    permissions: Arc<PermissionStore>,
    matrices: Arc<PermissionMatrixEngine>,
    ledger: Arc<AuditLedger>,
    fail_closed: bool,
}

impl AccessDecisionEngine {
    /// Creates an engine over shared components.
    pub fn new(
        directory: Arc<ActorDirectory>,
        permissions: Arc<PermissionStore>,
        matrices: Arc<PermissionMatrixEngine>,
        ledger: Arc<AuditLedger>,
        fail_closed: bool,
    ) -> Self {
        Self {
            directory,
            permissions,
            matrices,
            ledger,
            fail_closed,
        }
    }

    /// Decides without auditing or touching usage counters.
    #[must_use]
    pub fn evaluate(
        &self,
        actor_id: &str,
        resource_id: &str,
        required: AccessLevel,
        context: &AccessContext,
        at: OffsetDateTime,
    ) -> AccessDecision {
        let Some(credentials) = self
            .directory
            .with_active(actor_id, |actor| actor.credentials.clone())
        else {
            return AccessDecision::Deny(DenyReason::actor_not_found_or_inactive());
        };

        let miss = match self
            .permissions
            .evaluate(actor_id, resource_id, required, context, at)
        {
            DirectOutcome::Granted(grant) => {
                return AccessDecision::Allow(AllowBasis::Direct(grant));
            }
            DirectOutcome::NotGranted(miss) => miss,
        };

        match self.matrices.role_grant(&credentials, resource_id, required) {
            Some(grant) => AccessDecision::Allow(AllowBasis::RoleBased(grant)),
            None => AccessDecision::Deny(DenyReason::insufficient_permissions(miss)),
        }
    }

    /// Decides at `at` and audits the outcome.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` if `actor_id` or `resource_id` is
    /// empty. An empty `actor_id` leaves no caller to attribute, so nothing
    /// is audited; an empty `resource_id` is audited as a denial.
    pub fn decide_at(
        &self,
        actor_id: &str,
        resource_id: &str,
        required: AccessLevel,
        context: &AccessContext,
        at: OffsetDateTime,
    ) -> IamResult<AccessDecision> {
        require_id("actor_id", actor_id)?;
        if let Err(e) = require_id("resource_id", resource_id) {
            self.ledger.record(
                AuditEntryBuilder::new(AuditEventType::AccessDenied, actor_id)
                    .access_level(required)
                    .success(false)
                    .reason(e.code()),
            );
            return Err(e);
        }

        let decision = self.evaluate(actor_id, resource_id, required, context, at);
        let entry = audit_entry(actor_id, resource_id, required, context, &decision);
        let receipt = self.ledger.record(entry);

        debug!(
            actor_id = %actor_id,
            resource_id = %resource_id,
            level = %required,
            allowed = decision.is_allowed(),
            audit_id = receipt.audit_id,
            "Access decision"
        );

        if self.fail_closed && !receipt.delivered {
            error!(
                actor_id = %actor_id,
                resource_id = %resource_id,
                audit_id = receipt.audit_id,
                "Audit persistence unavailable, denying access"
            );
            return Ok(AccessDecision::Deny(DenyReason::audit_unavailable()));
        }

        if let AccessDecision::Allow(AllowBasis::Direct(grant)) = &decision {
            self.permissions
                .record_use(actor_id, &grant.permission_id, at);
        }
        Ok(decision)
    }

    /// Decides now and audits the outcome.
    ///
    /// # Errors
    ///
    /// See [`decide_at`](Self::decide_at).
    pub fn decide(
        &self,
        actor_id: &str,
        resource_id: &str,
        required: AccessLevel,
        context: &AccessContext,
    ) -> IamResult<AccessDecision> {
        self.decide_at(actor_id, resource_id, required, context, OffsetDateTime::now_utc())
    }

    /// Returns whether access is granted at `at`.
    ///
    /// # Errors
    ///
    /// See [`decide_at`](Self::decide_at).
    pub fn check_access_at(
        &self,
        actor_id: &str,
        resource_id: &str,
        required: AccessLevel,
        context: &AccessContext,
        at: OffsetDateTime,
    ) -> IamResult<bool> {
        self.decide_at(actor_id, resource_id, required, context, at)
            .map(|d| d.is_allowed())
    }

    /// Returns whether access is granted now.
    ///
    /// # Errors
    ///
    /// See [`decide_at`](Self::decide_at).
    pub fn check_access(
        &self,
        actor_id: &str,
        resource_id: &str,
        required: AccessLevel,
        context: &AccessContext,
    ) -> IamResult<bool> {
        self.check_access_at(actor_id, resource_id, required, context, OffsetDateTime::now_utc())
    }
}

fn audit_entry(
    actor_id: &str,
    resource_id: &str,
    required: AccessLevel,
    context: &AccessContext,
    decision: &AccessDecision,
) -> AuditEntryBuilder {
    let mut entry = match decision {
        AccessDecision::Allow(basis) => {
            AuditEntryBuilder::new(AuditEventType::AccessGranted, actor_id)
                .detail("access_pattern", basis.access_pattern())
        }
        AccessDecision::Deny(reason) => {
            let entry = AuditEntryBuilder::new(AuditEventType::AccessDenied, actor_id)
                .success(false)
                .reason(reason.code);
            match reason.detail {
                Some(detail) => entry.detail("detail", detail),
                None => entry,
            }
        }
    }
    .resource(resource_id)
    .access_level(required);

    if let Some(purpose) = context.get(PURPOSE_OF_USE) {
        entry = entry.detail(PURPOSE_OF_USE, purpose.to_string());
    }

    match decision {
        AccessDecision::Allow(AllowBasis::Direct(grant)) => {
            entry = entry.detail("permission_id", grant.permission_id.clone());
            if grant.supervised {
                entry = entry
                    .detail("supervisor_approved", true)
                    .flag(ComplianceFlag::SupervisionRequired);
                if let Some(supervisor) = context.get(SUPERVISOR_ID) {
                    entry = entry.detail(SUPERVISOR_ID, supervisor.to_string());
                }
            }
            if grant.delegated {
                entry = entry.flag(ComplianceFlag::Delegated);
            }
            if grant.emergency {
                entry = entry
                    .flag(ComplianceFlag::EmergencyAccess)
                    .flag(ComplianceFlag::RequiresReview);
            }
        }
        AccessDecision::Allow(AllowBasis::RoleBased(grant)) => {
            entry = entry
                .detail("matrix_id", grant.matrix_id.clone())
                .detail("matrix_version", grant.matrix_version)
                .detail("role", grant.role.clone());
            if grant.via_category {
                entry = entry.detail("match", "category");
            }
            if !grant.compliance_rules.is_empty() {
                entry = entry.detail("compliance_rules", grant.compliance_rules.clone());
            }
        }
        AccessDecision::Deny(_) => {}
    }
    entry
}
