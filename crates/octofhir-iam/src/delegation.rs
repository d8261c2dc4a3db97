//! Supervised delegation.
//!
//! The owner of a permission may hand a time-boxed copy of it to another
//! actor. The copy always requires the delegator's supervision and never
//! outlives its source. Each attempt, successful or not, is audited as
//! `delegation_granted`.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

use crate::audit::{AuditEntryBuilder, AuditEventType, AuditLedger, ComplianceFlag};
use crate::directory::ActorDirectory;
use crate::error::require_id;
use crate::permission_store::PermissionStore;
use crate::types::{Permission, RULE_PHYSICIAN_SUPERVISION};
use crate::{IamError, IamResult};

/// Metadata key holding the delegation reason.
pub const META_DELEGATION_REASON: &str = "delegation_reason";

/// Metadata key holding the delegating actor.
pub const META_DELEGATED_BY: &str = "delegated_by";

/// Creates delegated permissions.
#[derive(Debug, Clone)]
pub struct DelegationService {
    directory: Arc<ActorDirectory>,
    permissions: Arc<PermissionStore>,
    ledger: Arc<AuditLedger>,
    max_duration: Duration,
    fail_closed: bool,
}

impl DelegationService {
    /// Creates a service over shared components.
    pub fn new(
        directory: Arc<ActorDirectory>,
        permissions: Arc<PermissionStore>,
        ledger: Arc<AuditLedger>,
        max_duration: Duration,
        fail_closed: bool,
    ) -> Self {
        Self {
            directory,
            permissions,
            ledger,
            max_duration,
            fail_closed,
        }
    }

    /// Delegates `permission_id` from `delegator_id` to `delegatee_id`.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for empty IDs, self-delegation, or a duration that
    ///   is not positive or exceeds the configured maximum
    /// - `ActorNotFoundOrInactive` if either actor is unknown or inactive
    /// - `PermissionNotFound` if the source does not exist
    /// - `DelegationSourceNotOwned` if the delegator does not own it
    /// - `PermissionExpired` if the source is not currently valid
    /// - `Storage` if the audit entry cannot be persisted and the engine
    ///   fails closed
    pub fn delegate(
        &self,
        delegator_id: &str,
        delegatee_id: &str,
        permission_id: &str,
        duration: Duration,
        reason: &str,
    ) -> IamResult<Permission> {
        require_id("delegator_id", delegator_id)?;

        let base = AuditEntryBuilder::new(AuditEventType::DelegationGranted, delegator_id)
            .detail("delegator_id", delegator_id)
            .detail("delegatee_id", delegatee_id)
            .detail("source_permission_id", permission_id)
            .detail("duration_seconds", duration.whole_seconds())
            .flag(ComplianceFlag::Delegated);

        let now = OffsetDateTime::now_utc();
        let derived = match self.build(delegator_id, delegatee_id, permission_id, duration, reason, now)
        {
            Ok(derived) => derived,
            Err(e) => {
                self.ledger.record(base.success(false).reason(e.code()));
                warn!(
                    delegator_id = %delegator_id,
                    delegatee_id = %delegatee_id,
                    permission_id = %permission_id,
                    error = %e,
                    "Delegation rejected"
                );
                return Err(e);
            }
        };

        let derived = match self.permissions.insert(derived) {
            Ok(p) => p,
            Err(e) => {
                self.ledger.record(base.success(false).reason(e.code()));
                return Err(e);
            }
        };

        let mut entry = base
            .resource(derived.resource_pattern.as_str())
            .access_level(derived.access_level)
            .detail("permission_id", derived.permission_id.clone())
            .flag(ComplianceFlag::SupervisionRequired);
        if let Some(until) = derived.valid_until {
            entry = entry.detail("valid_until", until.unix_timestamp());
        }
        let receipt = self.ledger.record(entry);

        if self.fail_closed && !receipt.delivered {
            let _ = self.permissions.remove(&derived.permission_id);
            return Err(IamError::storage(
                "delegation audit entry could not be persisted",
            ));
        }

        info!(
            delegator_id = %delegator_id,
            delegatee_id = %delegatee_id,
            source_permission_id = %permission_id,
            permission_id = %derived.permission_id,
            "Permission delegated"
        );
        Ok(derived)
    }

    fn build(
        &self,
        delegator_id: &str,
        delegatee_id: &str,
        permission_id: &str,
        duration: Duration,
        reason: &str,
        now: OffsetDateTime,
    ) -> IamResult<Permission> {
        require_id("delegatee_id", delegatee_id)?;
        require_id("permission_id", permission_id)?;
        if delegator_id == delegatee_id {
            return Err(IamError::invalid_input("an actor cannot delegate to itself"));
        }
        if !duration.is_positive() {
            return Err(IamError::invalid_input("delegation duration must be positive"));
        }
        if duration > self.max_duration {
            return Err(IamError::invalid_input(format!(
                "delegation duration exceeds the maximum of {}s",
                self.max_duration.whole_seconds()
            )));
        }

        if !self.directory.is_active(delegator_id) {
            return Err(IamError::actor_not_found(delegator_id));
        }
        if !self.directory.is_active(delegatee_id) {
            return Err(IamError::actor_not_found(delegatee_id));
        }

        let source = self
            .permissions
            .get(permission_id)
            .ok_or_else(|| IamError::permission_not_found(permission_id))?;
        if source.actor_id != delegator_id {
            return Err(IamError::not_owned(permission_id, delegator_id));
        }
        if !source.is_valid_at(now) {
            return Err(IamError::permission_expired(permission_id));
        }
        if source.is_emergency() {
            return Err(IamError::insufficient_permissions(format!(
                "break-glass permission '{permission_id}' cannot be delegated"
            )));
        }

        let mut valid_until = now + duration;
        if let Some(source_until) = source.valid_until
            && source_until < valid_until
        {
            valid_until = source_until;
        }

        let mut compliance_rules = source.compliance_rules.clone();
        if !compliance_rules.iter().any(|r| r == RULE_PHYSICIAN_SUPERVISION) {
            compliance_rules.push(RULE_PHYSICIAN_SUPERVISION.to_string());
        }

        let mut derived = Permission::new(
            delegatee_id,
            source.resource_pattern.clone(),
            source.access_level,
            source.scope,
            delegator_id,
        );
        derived.scope_value = source.scope_value.clone();
        derived.valid_from = Some(now);
        derived.valid_until = Some(valid_until);
        derived.conditions = source.conditions.clone();
        derived.requires_supervision = true;
        derived.supervisor_id = Some(delegator_id.to_string());
        derived.compliance_rules = compliance_rules;
        derived.delegated_from = Some(source.permission_id.clone());
        derived
            .metadata
            .insert(META_DELEGATED_BY.to_string(), delegator_id.to_string());
        if !reason.trim().is_empty() {
            derived
                .metadata
                .insert(META_DELEGATION_REASON.to_string(), reason.to_string());
        }
        Ok(derived)
    }
}
