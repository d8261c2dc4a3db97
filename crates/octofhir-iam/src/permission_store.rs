//! Direct permission grants.
//!
//! Permissions are grouped per actor behind a reader/writer lock so that
//! concurrent decisions for one actor only take read locks, while grants
//! and revocations for that actor serialize. A second map indexes
//! permission IDs to their owner.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

use crate::policy::matcher::ResourcePattern;
use crate::storage::{PersistOp, PersistenceQueue};
use crate::types::{AccessContext, AccessLevel, ContextValue, Permission, PermissionScope};
use crate::{IamError, IamResult, error::require_id};

// =============================================================================
// Grant Request
// =============================================================================

/// Parameters for a new direct permission.
#[derive(Debug, Clone)]
pub struct GrantRequest {
    /// Grantee.
    pub actor_id: String,
    /// Resource pattern.
    pub resource_pattern: ResourcePattern,
    /// Granted level.
    pub access_level: AccessLevel,
    /// Scope kind.
    pub scope: PermissionScope,
    /// Scope value (organization ID, patient ID, ...).
    pub scope_value: Option<String>,
    /// Start of validity.
    pub valid_from: Option<OffsetDateTime>,
    /// End of validity.
    pub valid_until: Option<OffsetDateTime>,
    /// Required context values.
    pub conditions: Vec<(String, ContextValue)>,
    /// Whether supervisor approval is needed at access time.
    pub requires_supervision: bool,
    /// Designated supervisor.
    pub supervisor_id: Option<String>,
    /// Compliance rules attached to the grant.
    pub compliance_rules: Vec<String>,
    /// Free-form metadata.
    pub metadata: Vec<(String, String)>,
    /// Granting actor.
    pub granted_by: String,
}

impl GrantRequest {
    /// Starts a grant with no window, conditions or supervision.
    pub fn new(
        actor_id: impl Into<String>,
        resource_pattern: impl Into<ResourcePattern>,
        access_level: AccessLevel,
        scope: PermissionScope,
        granted_by: impl Into<String>,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            resource_pattern: resource_pattern.into(),
            access_level,
            scope,
            scope_value: None,
            valid_from: None,
            valid_until: None,
            conditions: Vec::new(),
            requires_supervision: false,
            supervisor_id: None,
            compliance_rules: Vec::new(),
            metadata: Vec::new(),
            granted_by: granted_by.into(),
        }
    }

    /// Set the scope value
    #[must_use]
    pub fn scope_value(mut self, value: impl Into<String>) -> Self {
        self.scope_value = Some(value.into());
        self
    }

    /// Set the start of validity
    #[must_use]
    pub fn valid_from(mut self, at: OffsetDateTime) -> Self {
        self.valid_from = Some(at);
        self
    }

    /// Set the end of validity
    #[must_use]
    pub fn valid_until(mut self, at: OffsetDateTime) -> Self {
        self.valid_until = Some(at);
        self
    }

    /// Valid from now for `duration`
    #[must_use]
    pub fn valid_for(self, duration: Duration) -> Self {
        let now = OffsetDateTime::now_utc();
        self.valid_from(now).valid_until(now + duration)
    }

    /// Require a context value at access time
    #[must_use]
    pub fn condition(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.conditions.push((key.into(), value.into()));
        self
    }

    /// Require supervisor approval at access time
    #[must_use]
    pub fn requires_supervision(mut self) -> Self {
        self.requires_supervision = true;
        self
    }

    /// Designate the supervisor (implies supervision)
    #[must_use]
    pub fn supervisor(mut self, supervisor_id: impl Into<String>) -> Self {
        self.supervisor_id = Some(supervisor_id.into());
        self.requires_supervision = true;
        self
    }

    /// Attach a compliance rule
    #[must_use]
    pub fn compliance_rule(mut self, rule: impl Into<String>) -> Self {
        self.compliance_rules.push(rule.into());
        self
    }

    /// Attach metadata
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    /// Builds the permission record.
    #[must_use]
    pub fn into_permission(self) -> Permission {
        let mut permission = Permission::new(
            self.actor_id,
            self.resource_pattern,
            self.access_level,
            self.scope,
            self.granted_by,
        );
        permission.scope_value = self.scope_value;
        permission.valid_from = self.valid_from;
        permission.valid_until = self.valid_until;
        permission.conditions = self.conditions.into_iter().collect();
        permission.requires_supervision = self.requires_supervision;
        permission.supervisor_id = self.supervisor_id;
        permission.compliance_rules = self.compliance_rules;
        permission.metadata = self.metadata.into_iter().collect();
        permission
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// Why a pattern-matching permission of sufficient level did not apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectMiss {
    /// Every candidate was outside its validity window after it closed.
    Expired,
    /// Every candidate needed supervisor approval that was not given.
    SupervisionMissing,
}

impl DirectMiss {
    /// Reason code recorded in denial details.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Expired => "permission_expired",
            Self::SupervisionMissing => "supervision_required",
        }
    }
}

/// The permission that granted a direct access check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectGrant {
    /// Granting permission.
    pub permission_id: String,
    /// Its level.
    pub access_level: AccessLevel,
    /// Granted under supervisor approval.
    pub supervised: bool,
    /// Granted through a delegation.
    pub delegated: bool,
    /// Granted through break-glass access.
    pub emergency: bool,
}

/// Outcome of checking an actor's direct permissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectOutcome {
    /// A permission applied.
    Granted(DirectGrant),
    /// Nothing applied; carries the uniform cause if there was one.
    NotGranted(Option<DirectMiss>),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Blocker {
    Expired,
    Supervision,
    Other,
}

fn blocker(
    permission: &Permission,
    context: &AccessContext,
    at: OffsetDateTime,
) -> Option<Blocker> {
    if !permission.is_valid_at(at) {
        return Some(if permission.is_expired_at(at) {
            Blocker::Expired
        } else {
            Blocker::Other
        });
    }
    if permission.requires_supervision && !context.is_supervisor_approved() {
        return Some(Blocker::Supervision);
    }
    if !context.satisfies(&permission.conditions) {
        return Some(Blocker::Other);
    }
    None
}

// =============================================================================
// Permission Store
// =============================================================================

type ActorPermissions = Arc<RwLock<Vec<Permission>>>;

/// In-memory store of direct permissions.
#[derive(Debug, Default)]
pub struct PermissionStore {
    by_actor: DashMap<String, ActorPermissions>,
    owners: DashMap<String, String>,
    persistence: Option<PersistenceQueue>,
}

impl PermissionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that writes behind to `queue`.
    #[must_use]
    pub fn with_persistence(queue: PersistenceQueue) -> Self {
        Self {
            persistence: Some(queue),
            ..Self::default()
        }
    }

    fn slot(&self, actor_id: &str) -> ActorPermissions {
        self.by_actor
            .entry(actor_id.to_string())
            .or_default()
            .clone()
    }

    fn existing_slot(&self, actor_id: &str) -> Option<ActorPermissions> {
        self.by_actor.get(actor_id).map(|s| s.value().clone())
    }

    /// Stores a permission.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` for empty IDs or a reversed window,
    /// and `IamError::AlreadyExists` if the permission ID is taken.
    pub fn insert(&self, permission: Permission) -> IamResult<Permission> {
        require_id("actor_id", &permission.actor_id)?;
        require_id("permission_id", &permission.permission_id)?;
        require_id("resource_pattern", permission.resource_pattern.as_str())?;
        if !permission.has_valid_window() {
            return Err(IamError::invalid_input(
                "valid_from must not be after valid_until",
            ));
        }
        if self.owners.contains_key(&permission.permission_id) {
            return Err(IamError::already_exists(format!(
                "permission '{}' already exists",
                permission.permission_id
            )));
        }

        let slot = self.slot(&permission.actor_id);
        {
            let mut permissions = slot.write();
            self.owners
                .insert(permission.permission_id.clone(), permission.actor_id.clone());
            permissions.push(permission.clone());
        }

        info!(
            permission_id = %permission.permission_id,
            actor_id = %permission.actor_id,
            pattern = %permission.resource_pattern,
            level = %permission.access_level,
            "Permission granted"
        );
        self.persist(PersistOp::SavePermission(permission.clone()));
        Ok(permission)
    }

    /// Returns a copy of the permission.
    #[must_use]
    pub fn get(&self, permission_id: &str) -> Option<Permission> {
        let owner = self.owners.get(permission_id)?.value().clone();
        let slot = self.existing_slot(&owner)?;
        let permissions = slot.read();
        permissions
            .iter()
            .find(|p| p.permission_id == permission_id)
            .cloned()
    }

    /// Removes a permission.
    ///
    /// # Errors
    ///
    /// Returns `IamError::PermissionNotFound` if the ID is unknown.
    pub fn remove(&self, permission_id: &str) -> IamResult<Permission> {
        let owner = self
            .owners
            .get(permission_id)
            .map(|o| o.value().clone())
            .ok_or_else(|| IamError::permission_not_found(permission_id))?;
        let slot = self
            .existing_slot(&owner)
            .ok_or_else(|| IamError::permission_not_found(permission_id))?;

        let removed = {
            let mut permissions = slot.write();
            let idx = permissions
                .iter()
                .position(|p| p.permission_id == permission_id)
                .ok_or_else(|| IamError::permission_not_found(permission_id))?;
            self.owners.remove(permission_id);
            permissions.remove(idx)
        };

        info!(permission_id = %permission_id, actor_id = %owner, "Permission revoked");
        self.persist(PersistOp::RemovePermission(permission_id.to_string()));
        Ok(removed)
    }

    /// Copies of every permission the actor holds.
    #[must_use]
    pub fn for_actor(&self, actor_id: &str) -> Vec<Permission> {
        self.existing_slot(actor_id)
            .map(|slot| slot.read().clone())
            .unwrap_or_default()
    }

    /// Checks the actor's direct permissions at `at`.
    ///
    /// The scan runs under the actor's read lock and leaves usage counters
    /// untouched; see [`record_use`](Self::record_use).
    pub fn evaluate(
        &self,
        actor_id: &str,
        resource_id: &str,
        required: AccessLevel,
        context: &AccessContext,
        at: OffsetDateTime,
    ) -> DirectOutcome {
        let Some(slot) = self.existing_slot(actor_id) else {
            return DirectOutcome::NotGranted(None);
        };

        let mut blockers: Vec<Blocker> = Vec::new();
        let grant = {
            let permissions = slot.read();
            let mut grant = None;
            for permission in permissions.iter() {
                if !permission.resource_pattern.matches(resource_id)
                    || !permission.access_level.satisfies(required)
                {
                    continue;
                }
                match blocker(permission, context, at) {
                    Some(b) => blockers.push(b),
                    None => {
                        grant = Some(DirectGrant {
                            permission_id: permission.permission_id.clone(),
                            access_level: permission.access_level,
                            supervised: permission.requires_supervision,
                            delegated: permission.delegated_from.is_some(),
                            emergency: permission.is_emergency(),
                        });
                        break;
                    }
                }
            }
            grant
        };

        match grant {
            Some(grant) => DirectOutcome::Granted(grant),
            None => {
                let miss = match blockers.first() {
                    Some(Blocker::Expired) if blockers.iter().all(|b| *b == Blocker::Expired) => {
                        Some(DirectMiss::Expired)
                    }
                    Some(Blocker::Supervision)
                        if blockers.iter().all(|b| *b == Blocker::Supervision) =>
                    {
                        Some(DirectMiss::SupervisionMissing)
                    }
                    _ => None,
                };
                DirectOutcome::NotGranted(miss)
            }
        }
    }

    /// Bumps the usage counters of a permission that granted access at `at`.
    ///
    /// Returns `false` if the permission was revoked in the meantime.
    pub fn record_use(&self, actor_id: &str, permission_id: &str, at: OffsetDateTime) -> bool {
        let Some(slot) = self.existing_slot(actor_id) else {
            return false;
        };
        let mut permissions = slot.write();
        match permissions.iter_mut().find(|p| p.permission_id == permission_id) {
            Some(p) => {
                p.record_use(at);
                true
            }
            None => false,
        }
    }

    /// Removes emergency grants whose window closed before `cutoff`.
    ///
    /// Returns the removed permissions.
    pub fn purge_expired_emergency(&self, cutoff: OffsetDateTime) -> Vec<Permission> {
        let slots: Vec<(String, ActorPermissions)> = self
            .by_actor
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut purged = Vec::new();
        for (actor_id, slot) in slots {
            let mut permissions = slot.write();
            let before = permissions.len();
            let mut kept = Vec::with_capacity(before);
            for p in permissions.drain(..) {
                if p.is_emergency() && p.valid_until.is_some_and(|until| until < cutoff) {
                    self.owners.remove(&p.permission_id);
                    purged.push(p);
                } else {
                    kept.push(p);
                }
            }
            *permissions = kept;
            if permissions.len() != before {
                debug!(
                    actor_id = %actor_id,
                    purged = before - permissions.len(),
                    "Expired emergency grants purged"
                );
            }
        }

        for p in &purged {
            self.persist(PersistOp::RemovePermission(p.permission_id.clone()));
        }
        purged
    }

    /// Inserts or replaces a permission loaded from storage.
    pub(crate) fn restore(&self, permission: Permission) {
        let slot = self.slot(&permission.actor_id);
        let mut permissions = slot.write();
        permissions.retain(|p| p.permission_id != permission.permission_id);
        self.owners
            .insert(permission.permission_id.clone(), permission.actor_id.clone());
        permissions.push(permission);
    }

    /// Total number of stored permissions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    fn persist(&self, op: PersistOp) {
        if let Some(queue) = &self.persistence {
            let _ = queue.enqueue(op);
        }
    }
}
