//! The IAM service facade.
//!
//! [`IamService`] owns every engine component and is passed around
//! explicitly; there is no global instance. Decisions, break-glass access
//! and delegation are forwarded to their components, while administrative
//! mutations (grant, revoke, status changes, matrix publishing) are
//! validated and audited here.
//!
//! # Example
//!
//! ```ignore
//! let service = IamService::new(IamConfig::default())?;
//! service.register_actor(ActorIdentity::human("nurse-1", "Nurse").with_credential("nurse"))?;
//! service.publish_matrix("admin", matrix)?;
//! let allowed = service.check_access("nurse-1", "observation-42", AccessLevel::Write, &AccessContext::new())?;
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditEntryBuilder, AuditEventType, AuditLedger, AuditQuery, ComplianceFlag};
use crate::compliance::{ComplianceMonitor, ComplianceReport, ComplianceRule};
use crate::config::{IamConfig, loader, span};
use crate::delegation::DelegationService;
use crate::directory::{ActorDirectory, ActorLocks};
use crate::emergency::{EmergencyAccessCoordinator, EmergencyType};
use crate::error::require_id;
use crate::permission_store::{GrantRequest, PermissionStore};
use crate::policy::{AccessDecision, AccessDecisionEngine, PermissionMatrixEngine};
use crate::storage::{
    ActorCriteria, ActorStorage, AuditStorage, DynIamStorage, PermissionCriteria,
    PermissionStorage, PersistenceQueue, PersistenceReceiver, PersistenceStats, PersistenceWriter,
};
use crate::tasks::{BackgroundTasks, run_emergency_sweep};
use crate::types::{AccessContext, AccessLevel, ActorIdentity, Permission, PermissionMatrix, PURPOSE_OF_USE};
use crate::{IamError, IamResult};

/// Counts of records loaded by [`IamService::hydrate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrationStats {
    /// Actors restored.
    pub actors: usize,
    /// Permissions restored.
    pub permissions: usize,
    /// Audit entries restored.
    pub audit_entries: usize,
}

/// Result of [`IamService::grant_permissions_bulk`].
#[derive(Debug, Default)]
pub struct BulkGrantOutcome {
    /// Permissions created, in request order.
    pub granted: Vec<Permission>,
    /// Request index and error for each rejected request.
    pub failed: Vec<(usize, IamError)>,
}

impl BulkGrantOutcome {
    /// Returns `true` if every request succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// IAM decision and audit engine.
pub struct IamService {
    config: IamConfig,
    storage: Option<DynIamStorage>,
    directory: Arc<ActorDirectory>,
    permissions: Arc<PermissionStore>,
    matrices: Arc<PermissionMatrixEngine>,
    ledger: Arc<AuditLedger>,
    locks: Arc<ActorLocks>,
    engine: AccessDecisionEngine,
    emergency: Arc<EmergencyAccessCoordinator>,
    delegation: DelegationService,
    compliance: Arc<ComplianceMonitor>,
    persistence: Option<PersistenceQueue>,
    receiver: Mutex<Option<PersistenceReceiver>>,
}

impl fmt::Debug for IamService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IamService")
            .field("actors", &self.directory.len())
            .field("permissions", &self.permissions.len())
            .field("matrices", &self.matrices.len())
            .field("audit_entries", &self.ledger.len())
            .field("persistent", &self.storage.is_some())
            .finish()
    }
}

impl Default for IamService {
    fn default() -> Self {
        Self::assemble(IamConfig::default(), None)
    }
}

impl IamService {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Creates an in-memory service.
    ///
    /// # Errors
    ///
    /// Returns `IamError::Configuration` if the configuration is invalid.
    pub fn new(config: IamConfig) -> IamResult<Self> {
        config.validate()?;
        Ok(Self::assemble(config, None))
    }

    /// Creates a service that writes behind to `storage`.
    ///
    /// Nothing is written until [`spawn_background`](Self::spawn_background)
    /// starts the persistence writer.
    ///
    /// # Errors
    ///
    /// Returns `IamError::Configuration` if the configuration is invalid.
    pub fn with_storage(config: IamConfig, storage: DynIamStorage) -> IamResult<Self> {
        config.validate()?;
        Ok(Self::assemble(config, Some(storage)))
    }

    /// Creates an in-memory service from a TOML file and environment.
    ///
    /// # Errors
    ///
    /// Returns `IamError::Configuration` if loading or validation fails.
    pub fn from_config_file(path: Option<&str>) -> IamResult<Self> {
        Self::new(loader::load_config(path)?)
    }

    fn assemble(config: IamConfig, storage: Option<DynIamStorage>) -> Self {
        let (persistence, receiver) = match storage {
            Some(_) => {
                let (queue, receiver) = PersistenceQueue::channel(config.storage.queue_capacity);
                (Some(queue), Some(receiver))
            }
            None => (None, None),
        };

        let directory = Arc::new(match &persistence {
            Some(queue) => ActorDirectory::with_persistence(queue.clone()),
            None => ActorDirectory::new(),
        });
        let permissions = Arc::new(match &persistence {
            Some(queue) => PermissionStore::with_persistence(queue.clone()),
            None => PermissionStore::new(),
        });
        let ledger = Arc::new(match &persistence {
            Some(queue) => AuditLedger::with_persistence(queue.clone()),
            None => AuditLedger::new(),
        });
        let matrices = Arc::new(PermissionMatrixEngine::new());
        let locks = Arc::new(ActorLocks::new());
        let fail_closed = config.audit.fail_closed;

        let engine = AccessDecisionEngine::new(
            directory.clone(),
            permissions.clone(),
            matrices.clone(),
            ledger.clone(),
            fail_closed,
        );
        let emergency = Arc::new(EmergencyAccessCoordinator::new(
            directory.clone(),
            permissions.clone(),
            matrices.clone(),
            ledger.clone(),
            locks.clone(),
            span(config.emergency.grace_window),
            fail_closed,
        ));
        let delegation = DelegationService::new(
            directory.clone(),
            permissions.clone(),
            ledger.clone(),
            span(config.delegation.max_duration),
            fail_closed,
        );
        let compliance = Arc::new(ComplianceMonitor::new(ledger.clone(), &config.compliance));

        Self {
            config,
            storage,
            directory,
            permissions,
            matrices,
            ledger,
            locks,
            engine,
            emergency,
            delegation,
            compliance,
            persistence,
            receiver: Mutex::new(receiver),
        }
    }

    /// Drops all in-memory state, keeping configuration and storage.
    ///
    /// Background tasks spawned before the reset keep running against the
    /// old state until shut down.
    pub fn reset(&mut self) {
        *self = Self::assemble(self.config.clone(), self.storage.clone());
        debug!("IAM service reset");
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &IamConfig {
        &self.config
    }

    /// Actor directory.
    #[must_use]
    pub fn directory(&self) -> &Arc<ActorDirectory> {
        &self.directory
    }

    /// Direct permission store.
    #[must_use]
    pub fn permissions(&self) -> &Arc<PermissionStore> {
        &self.permissions
    }

    /// Published matrices.
    #[must_use]
    pub fn matrices(&self) -> &Arc<PermissionMatrixEngine> {
        &self.matrices
    }

    /// Audit ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.ledger
    }

    /// Compliance monitor.
    #[must_use]
    pub fn compliance(&self) -> &Arc<ComplianceMonitor> {
        &self.compliance
    }

    /// Persistence queue counters, if storage is configured.
    #[must_use]
    pub fn persistence_stats(&self) -> Option<Arc<PersistenceStats>> {
        self.persistence.as_ref().map(|q| q.stats().clone())
    }

    // =========================================================================
    // Actors
    // =========================================================================

    /// Registers an actor and returns its ID.
    ///
    /// # Errors
    ///
    /// Returns `IamError::AlreadyExists` if the ID is taken.
    pub fn register_actor(&self, actor: ActorIdentity) -> IamResult<String> {
        self.directory.register(actor)
    }

    /// Activates or deactivates `actor_id`.
    ///
    /// Serialized with break-glass issuance for the same actor; the audit
    /// entry is recorded before the actor lock is released.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` for empty IDs and
    /// `IamError::ActorNotFoundOrInactive` if the actor is unknown.
    pub fn set_actor_active(
        &self,
        changed_by: &str,
        actor_id: &str,
        active: bool,
    ) -> IamResult<ActorIdentity> {
        require_id("changed_by", changed_by)?;
        let base = AuditEntryBuilder::new(AuditEventType::ActorModified, changed_by)
            .detail("target_actor_id", actor_id)
            .detail("action", if active { "activated" } else { "deactivated" });

        if let Err(e) = require_id("actor_id", actor_id) {
            let result: IamResult<ActorIdentity> = Err(e);
            self.audit_admin(base, &result);
            return result;
        }
        self.locks.with_lock(actor_id, || {
            let result = self.directory.set_active(actor_id, active);
            self.audit_admin(base, &result);
            result
        })
    }

    /// Replaces the role credentials of `actor_id`.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` for empty IDs and
    /// `IamError::ActorNotFoundOrInactive` if the actor is unknown.
    pub fn update_credentials(
        &self,
        changed_by: &str,
        actor_id: &str,
        credentials: Vec<String>,
    ) -> IamResult<ActorIdentity> {
        require_id("changed_by", changed_by)?;
        let base = AuditEntryBuilder::new(AuditEventType::ActorModified, changed_by)
            .detail("target_actor_id", actor_id)
            .detail("action", "credentials_updated")
            .detail("credentials", credentials.clone());

        if let Err(e) = require_id("actor_id", actor_id) {
            let result: IamResult<ActorIdentity> = Err(e);
            self.audit_admin(base, &result);
            return result;
        }
        self.locks.with_lock(actor_id, || {
            let result = self.directory.update_credentials(actor_id, credentials);
            self.audit_admin(base, &result);
            result
        })
    }

    // =========================================================================
    // Permissions
    // =========================================================================

    /// Grants a direct permission.
    ///
    /// Grants to actors whose roles need supervision are marked as requiring
    /// it. A named supervisor must be active and qualified to supervise the
    /// grantee.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for empty IDs or a reversed validity window
    /// - `ActorNotFoundOrInactive` if the grantee is unknown or inactive
    /// - `SupervisionRequired` if the named supervisor is not qualified
    /// - `AlreadyExists` if the permission ID is taken
    pub fn grant_permission(&self, request: GrantRequest) -> IamResult<Permission> {
        require_id("granted_by", &request.granted_by)?;
        let base = AuditEntryBuilder::new(AuditEventType::PermissionModified, &request.granted_by)
            .resource(request.resource_pattern.as_str())
            .access_level(request.access_level)
            .detail("action", "granted")
            .detail("grantee_id", request.actor_id.clone());

        let result = self.grant(request);
        let entry = match &result {
            Ok(permission) if permission.requires_supervision => base
                .detail("permission_id", permission.permission_id.clone())
                .flag(ComplianceFlag::SupervisionRequired),
            Ok(permission) => base.detail("permission_id", permission.permission_id.clone()),
            Err(_) => base,
        };
        self.audit_admin(entry, &result);
        result
    }

    fn grant(&self, mut request: GrantRequest) -> IamResult<Permission> {
        require_id("actor_id", &request.actor_id)?;
        let grantee = self
            .directory
            .get_active(&request.actor_id)
            .ok_or_else(|| IamError::actor_not_found(request.actor_id.clone()))?;

        if !request.requires_supervision && self.matrices.requires_supervision(&grantee.credentials)
        {
            debug!(actor_id = %grantee.actor_id, "Grantee role requires supervision");
            request.requires_supervision = true;
        }

        if let Some(supervisor_id) = request.supervisor_id.as_deref() {
            let supervisor = self.directory.get_active(supervisor_id).ok_or_else(|| {
                IamError::supervision_required(format!(
                    "supervisor '{supervisor_id}' is unknown or inactive"
                ))
            })?;
            if !self
                .matrices
                .can_supervise(&supervisor.credentials, &grantee.credentials)
            {
                return Err(IamError::supervision_required(format!(
                    "actor '{supervisor_id}' may not supervise '{}'",
                    grantee.actor_id
                )));
            }
        }

        self.permissions.insert(request.into_permission())
    }

    /// Grants several permissions, auditing each plus one summary entry.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` if `performed_by` is empty. Failures
    /// of individual requests are reported in the outcome.
    pub fn grant_permissions_bulk(
        &self,
        performed_by: &str,
        requests: Vec<GrantRequest>,
    ) -> IamResult<BulkGrantOutcome> {
        require_id("performed_by", performed_by)?;
        let total = requests.len();
        let mut outcome = BulkGrantOutcome::default();

        for (index, request) in requests.into_iter().enumerate() {
            match self.grant_permission(request) {
                Ok(permission) => outcome.granted.push(permission),
                Err(e) => outcome.failed.push((index, e)),
            }
        }

        self.ledger.record(
            AuditEntryBuilder::new(AuditEventType::BulkOperation, performed_by)
                .success(outcome.is_complete())
                .detail("operation", "grant_permissions")
                .detail("total", total as u64)
                .detail("granted", outcome.granted.len() as u64)
                .detail("failed", outcome.failed.len() as u64),
        );
        info!(
            performed_by = %performed_by,
            total,
            failed = outcome.failed.len(),
            "Bulk permission grant"
        );
        Ok(outcome)
    }

    /// Removes a permission from the active store.
    ///
    /// The audit trail keeps the original grant.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` for empty IDs and
    /// `IamError::PermissionNotFound` if the permission is not active.
    pub fn revoke_permission(
        &self,
        revoked_by: &str,
        permission_id: &str,
        reason: &str,
    ) -> IamResult<Permission> {
        require_id("revoked_by", revoked_by)?;
        let base = AuditEntryBuilder::new(AuditEventType::PermissionModified, revoked_by)
            .detail("action", "revoked")
            .detail("permission_id", permission_id)
            .detail("revocation_reason", reason);

        let result = require_id("permission_id", permission_id)
            .and_then(|()| self.permissions.remove(permission_id));
        let entry = match &result {
            Ok(permission) => base
                .resource(permission.resource_pattern.as_str())
                .access_level(permission.access_level)
                .detail("grantee_id", permission.actor_id.clone()),
            Err(_) => base,
        };
        self.audit_admin(entry, &result);
        result
    }

    // =========================================================================
    // Matrices
    // =========================================================================

    /// Publishes a matrix or a newer version of one.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` for empty IDs or a version that is
    /// not greater than the published one.
    pub fn publish_matrix(&self, published_by: &str, matrix: PermissionMatrix) -> IamResult<()> {
        require_id("published_by", published_by)?;
        let base = AuditEntryBuilder::new(AuditEventType::PermissionModified, published_by)
            .detail("action", "matrix_published")
            .detail("matrix_id", matrix.matrix_id.clone())
            .detail("matrix_version", matrix.version);

        let result = self.matrices.publish(matrix);
        self.audit_admin(base, &result);
        result
    }

    /// Deactivates a published matrix.
    ///
    /// # Errors
    ///
    /// Returns `IamError::MatrixNotFound` if no such matrix was published.
    pub fn retire_matrix(&self, retired_by: &str, matrix_id: &str) -> IamResult<()> {
        require_id("retired_by", retired_by)?;
        let base = AuditEntryBuilder::new(AuditEventType::PermissionModified, retired_by)
            .detail("action", "matrix_retired")
            .detail("matrix_id", matrix_id);

        let result = self.matrices.retire(matrix_id);
        self.audit_admin(base, &result);
        result
    }

    // =========================================================================
    // Decisions
    // =========================================================================

    /// Returns whether `actor_id` may access `resource_id` at `level` now.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` for empty IDs.
    pub fn check_access(
        &self,
        actor_id: &str,
        resource_id: &str,
        level: AccessLevel,
        context: &AccessContext,
    ) -> IamResult<bool> {
        self.engine.check_access(actor_id, resource_id, level, context)
    }

    /// Returns whether access is granted at `at`.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` for empty IDs.
    pub fn check_access_at(
        &self,
        actor_id: &str,
        resource_id: &str,
        level: AccessLevel,
        context: &AccessContext,
        at: OffsetDateTime,
    ) -> IamResult<bool> {
        self.engine
            .check_access_at(actor_id, resource_id, level, context, at)
    }

    /// Like [`check_access`](Self::check_access) but returns the full
    /// decision.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` for empty IDs.
    pub fn decide(
        &self,
        actor_id: &str,
        resource_id: &str,
        level: AccessLevel,
        context: &AccessContext,
    ) -> IamResult<AccessDecision> {
        self.engine.decide(actor_id, resource_id, level, context)
    }

    /// Requests time-boxed break-glass access.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` for empty IDs, an empty
    /// justification or a wildcard resource.
    pub fn request_emergency_access(
        &self,
        actor_id: &str,
        resource_id: &str,
        justification: &str,
        emergency_type: EmergencyType,
    ) -> IamResult<bool> {
        self.emergency
            .request_emergency_access(actor_id, resource_id, justification, emergency_type)
    }

    /// Delegates a permission under supervision.
    ///
    /// # Errors
    ///
    /// See [`DelegationService::delegate`].
    pub fn delegate(
        &self,
        delegator_id: &str,
        delegatee_id: &str,
        permission_id: &str,
        duration: Duration,
        reason: &str,
    ) -> IamResult<Permission> {
        self.delegation
            .delegate(delegator_id, delegatee_id, permission_id, duration, reason)
    }

    // =========================================================================
    // Audit and compliance
    // =========================================================================

    /// Queries the audit trail, most recent first.
    #[must_use]
    pub fn get_audit_trail(&self, query: &AuditQuery) -> Vec<AuditEntry> {
        self.ledger.query(query)
    }

    /// Computes a compliance report for `actor_id`.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` if `actor_id` is empty.
    pub fn check_compliance(&self, actor_id: &str) -> IamResult<ComplianceReport> {
        self.compliance.check_compliance(actor_id)
    }

    /// Adds a compliance rule to every future report and scan.
    pub fn register_compliance_rule(&self, rule: impl ComplianceRule + 'static) {
        self.compliance.register_rule(rule);
    }

    fn audit_admin<T>(&self, builder: AuditEntryBuilder, result: &IamResult<T>) {
        let builder = match result {
            Ok(_) => builder,
            Err(e) => {
                warn!(
                    actor_id = %builder.actor_id(),
                    event_type = %builder.event_type(),
                    error = %e,
                    "Administrative operation rejected"
                );
                builder.success(false).reason(e.code())
            }
        };
        self.ledger.record(builder);
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Opens a supervised session for `actor_id`.
    ///
    /// The returned guard records `session_ended` when dropped.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` for an empty ID and
    /// `IamError::ActorNotFoundOrInactive` if the actor cannot act.
    pub fn begin_session(&self, actor_id: &str, purpose: &str) -> IamResult<IamSession<'_>> {
        require_id("actor_id", actor_id)?;
        let session_id = Uuid::new_v4().to_string();
        let base = AuditEntryBuilder::new(AuditEventType::SessionStarted, actor_id)
            .detail("session_id", session_id.clone())
            .detail("purpose", purpose);

        if !self.directory.is_active(actor_id) {
            let err = IamError::actor_not_found(actor_id);
            self.ledger.record(base.success(false).reason(err.code()));
            return Err(err);
        }
        self.ledger.record(base);
        debug!(actor_id = %actor_id, session_id = %session_id, "Session started");

        let mut context = AccessContext::new().with("session_id", session_id.clone());
        if !purpose.is_empty() {
            context.insert(PURPOSE_OF_USE, purpose);
        }

        Ok(IamSession {
            service: self,
            actor_id: actor_id.to_string(),
            session_id,
            context,
            started: Instant::now(),
            finished: false,
        })
    }

    // =========================================================================
    // Persistence and background tasks
    // =========================================================================

    /// Loads actors, permissions and audit history from storage.
    ///
    /// Meant to run once, before the service handles requests. Returns zero
    /// counts when no storage is configured.
    ///
    /// # Errors
    ///
    /// Returns the storage error if a load fails.
    pub async fn hydrate(&self) -> IamResult<HydrationStats> {
        let Some(storage) = &self.storage else {
            return Ok(HydrationStats::default());
        };
        let storage = storage.as_ref();

        let actors = ActorStorage::find_by_criteria(storage, &ActorCriteria::new()).await?;
        let permissions =
            PermissionStorage::find_by_criteria(storage, &PermissionCriteria::new()).await?;
        let entries = AuditStorage::find_by_criteria(storage, &AuditQuery::new()).await?;

        let stats = HydrationStats {
            actors: actors.len(),
            permissions: permissions.len(),
            audit_entries: self.ledger.restore(entries),
        };
        for actor in actors {
            self.directory.restore(actor);
        }
        for permission in permissions {
            self.permissions.restore(permission);
        }

        info!(
            actors = stats.actors,
            permissions = stats.permissions,
            audit_entries = stats.audit_entries,
            "IAM state hydrated from storage"
        );
        Ok(stats)
    }

    /// Starts the compliance scan, the emergency sweep and, with storage
    /// configured, the persistence writer.
    ///
    /// Must be called inside a tokio runtime. The persistence writer is only
    /// started by the first call.
    pub fn spawn_background(&self) -> BackgroundTasks {
        let cancel = CancellationToken::new();
        let mut tasks = BackgroundTasks::new(cancel.clone());

        if self.config.compliance.enabled {
            tasks.spawn(
                "compliance_monitor",
                self.compliance.clone().run(cancel.clone()),
            );
        }

        tasks.spawn(
            "emergency_sweep",
            run_emergency_sweep(
                self.emergency.clone(),
                self.config.emergency.sweep_interval,
                span(self.config.emergency.purge_after),
                cancel.clone(),
            ),
        );

        let receiver = self.receiver.lock().take();
        if let (Some(storage), Some(receiver)) = (&self.storage, receiver) {
            let writer = PersistenceWriter::new(storage.clone(), receiver);
            tasks.spawn("persistence_writer", writer.run(cancel));
        }

        info!(tasks = ?tasks.names(), "IAM background tasks started");
        tasks
    }
}

// =============================================================================
// Sessions
// =============================================================================

/// A scoped actor session.
///
/// Checks made through the session carry its ID and purpose of use. Dropping
/// the guard records `session_ended` with outcome `completed` if
/// [`finish`](Self::finish) was called and `aborted` otherwise.
pub struct IamSession<'a> {
    service: &'a IamService,
    actor_id: String,
    session_id: String,
    context: AccessContext,
    started: Instant,
    finished: bool,
}

impl fmt::Debug for IamSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IamSession")
            .field("actor_id", &self.actor_id)
            .field("session_id", &self.session_id)
            .field("finished", &self.finished)
            .finish()
    }
}

impl IamSession<'_> {
    /// Session ID.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Actor the session belongs to.
    #[must_use]
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// Checks access for the session's actor.
    ///
    /// `context` is layered over the session context.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` if `resource_id` is empty.
    pub fn check_access(
        &self,
        resource_id: &str,
        level: AccessLevel,
        context: &AccessContext,
    ) -> IamResult<bool> {
        let context = self.context.merged(context);
        self.service
            .check_access(&self.actor_id, resource_id, level, &context)
    }

    /// Ends the session normally.
    pub fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for IamSession<'_> {
    fn drop(&mut self) {
        let outcome = if self.finished { "completed" } else { "aborted" };
        let elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.service.ledger.record(
            AuditEntryBuilder::new(AuditEventType::SessionEnded, self.actor_id.as_str())
                .success(self.finished)
                .detail("session_id", self.session_id.clone())
                .detail("outcome", outcome)
                .detail("duration_ms", elapsed_ms),
        );
        debug!(
            actor_id = %self.actor_id,
            session_id = %self.session_id,
            outcome,
            "Session ended"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::{ComplianceViolation, Severity};
    use crate::policy::ResourcePattern;
    use crate::storage::InMemoryIamStorage;
    use crate::types::PermissionScope;

    fn service() -> IamService {
        let service = IamService::new(IamConfig::default()).unwrap();
        service
            .register_actor(ActorIdentity::human("dr-1", "Dr").with_credential("physician"))
            .unwrap();
        service
            .register_actor(ActorIdentity::human("nurse-1", "Nurse").with_credential("nurse"))
            .unwrap();
        service
            .register_actor(ActorIdentity::human("admin", "Admin").with_credential("admin"))
            .unwrap();
        service
            .publish_matrix(
                "admin",
                PermissionMatrix::new("clinical", "Clinical", 1, "clinical")
                    .with_role_permission("nurse", ResourcePattern::new("observation"), AccessLevel::Write)
                    .with_emergency_role("physician")
                    .with_supervision("nurse", ["physician"]),
            )
            .unwrap();
        service
    }

    fn grant(actor: &str, pattern: &str, level: AccessLevel) -> GrantRequest {
        GrantRequest::new(actor, ResourcePattern::new(pattern), level, PermissionScope::Global, "admin")
    }

    fn ctx() -> AccessContext {
        AccessContext::new()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = IamConfig::default();
        config.storage.queue_capacity = 0;
        let err = IamService::new(config).unwrap_err();
        assert!(matches!(err, IamError::Configuration { .. }));
    }

    #[test]
    fn test_grant_and_revoke_are_audited() {
        let service = service();
        let permission = service
            .grant_permission(grant("dr-1", "patient:*", AccessLevel::Read))
            .unwrap();
        assert!(service.check_access("dr-1", "patient:1", AccessLevel::Read, &ctx()).unwrap());

        let revoked = service
            .revoke_permission("admin", &permission.permission_id, "role change")
            .unwrap();
        assert_eq!(revoked.permission_id, permission.permission_id);
        assert!(!service.check_access("dr-1", "patient:1", AccessLevel::Read, &ctx()).unwrap());

        let trail = service.get_audit_trail(
            &AuditQuery::new().for_actor("admin").with_event_type(AuditEventType::PermissionModified),
        );
        let actions: Vec<_> = trail.iter().filter_map(|e| e.detail_str("action")).collect();
        assert_eq!(actions, vec!["revoked", "granted", "matrix_published"]);
    }

    #[test]
    fn test_revoke_unknown_is_audited_failure() {
        let service = service();
        let err = service.revoke_permission("admin", "nope", "cleanup").unwrap_err();
        assert!(matches!(err, IamError::PermissionNotFound { .. }));

        let latest = &service.get_audit_trail(&AuditQuery::new().for_actor("admin").with_limit(1))[0];
        assert!(!latest.success);
        assert_eq!(latest.detail_str("reason"), Some("permission_not_found"));
    }

    #[test]
    fn test_grant_to_supervised_role_requires_supervision() {
        let service = service();
        let permission = service
            .grant_permission(grant("nurse-1", "patient:1", AccessLevel::Read))
            .unwrap();
        assert!(permission.requires_supervision);

        assert!(!service.check_access("nurse-1", "patient:1", AccessLevel::Read, &ctx()).unwrap());
        assert!(service
            .check_access("nurse-1", "patient:1", AccessLevel::Read, &ctx().supervisor_approved())
            .unwrap());
    }

    #[test]
    fn test_grant_with_unqualified_supervisor_rejected() {
        let service = service();
        let err = service
            .grant_permission(grant("nurse-1", "patient:1", AccessLevel::Read).supervisor("admin"))
            .unwrap_err();
        assert!(matches!(err, IamError::SupervisionRequired { .. }));

        let ok = service
            .grant_permission(grant("nurse-1", "patient:1", AccessLevel::Read).supervisor("dr-1"))
            .unwrap();
        assert_eq!(ok.supervisor_id.as_deref(), Some("dr-1"));
    }

    #[test]
    fn test_grant_to_unknown_actor_rejected() {
        let service = service();
        let err = service
            .grant_permission(grant("ghost", "patient:1", AccessLevel::Read))
            .unwrap_err();
        assert!(matches!(err, IamError::ActorNotFoundOrInactive { .. }));
    }

    #[test]
    fn test_bulk_grant_reports_failures() {
        let service = service();
        let outcome = service
            .grant_permissions_bulk(
                "admin",
                vec![
                    grant("dr-1", "patient:1", AccessLevel::Read),
                    grant("ghost", "patient:1", AccessLevel::Read),
                    grant("dr-1", "patient:2", AccessLevel::Write),
                ],
            )
            .unwrap();
        assert_eq!(outcome.granted.len(), 2);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, 1);
        assert!(!outcome.is_complete());

        let bulk = service
            .get_audit_trail(&AuditQuery::new().with_event_type(AuditEventType::BulkOperation));
        assert_eq!(bulk.len(), 1);
        assert!(!bulk[0].success);
        assert_eq!(bulk[0].details["failed"], 1);
    }

    #[test]
    fn test_deactivation_blocks_access() {
        let service = service();
        assert!(service
            .check_access("nurse-1", "observation-1", AccessLevel::Write, &ctx())
            .unwrap());

        service.set_actor_active("admin", "nurse-1", false).unwrap();
        assert!(!service
            .check_access("nurse-1", "observation-1", AccessLevel::Write, &ctx())
            .unwrap());

        let entry = &service.get_audit_trail(
            &AuditQuery::new().for_actor("admin").with_event_type(AuditEventType::ActorModified),
        )[0];
        assert_eq!(entry.detail_str("action"), Some("deactivated"));
        assert_eq!(entry.detail_str("target_actor_id"), Some("nurse-1"));
    }

    #[test]
    fn test_credential_change_affects_role_path() {
        let service = service();
        service
            .update_credentials("admin", "nurse-1", vec!["clerk".to_string()])
            .unwrap();
        assert!(!service
            .check_access("nurse-1", "observation-1", AccessLevel::Write, &ctx())
            .unwrap());
    }

    #[test]
    fn test_retire_matrix_disables_role_path() {
        let service = service();
        service.retire_matrix("admin", "clinical").unwrap();
        assert!(!service
            .check_access("nurse-1", "observation-1", AccessLevel::Write, &ctx())
            .unwrap());
        assert!(matches!(
            service.retire_matrix("admin", "missing").unwrap_err(),
            IamError::MatrixNotFound { .. }
        ));
    }

    #[test]
    fn test_session_guard_records_outcome() {
        let service = service();
        {
            let session = service.begin_session("nurse-1", "treatment").unwrap();
            assert!(session
                .check_access("observation-7", AccessLevel::Read, &ctx())
                .unwrap());
            session.finish();
        }
        {
            let _session = service.begin_session("nurse-1", "treatment").unwrap();
        }

        let ended = service.get_audit_trail(
            &AuditQuery::new().for_actor("nurse-1").with_event_type(AuditEventType::SessionEnded),
        );
        let outcomes: Vec<_> = ended.iter().filter_map(|e| e.detail_str("outcome")).collect();
        assert_eq!(outcomes, vec!["aborted", "completed"]);

        let granted = service.get_audit_trail(
            &AuditQuery::new().for_actor("nurse-1").with_event_type(AuditEventType::AccessGranted),
        );
        assert_eq!(granted[0].detail_str("purpose_of_use"), Some("treatment"));
    }

    #[test]
    fn test_session_for_inactive_actor_rejected() {
        let service = service();
        service.set_actor_active("admin", "nurse-1", false).unwrap();
        assert!(service.begin_session("nurse-1", "treatment").is_err());
        assert!(service.begin_session("", "treatment").is_err());
    }

    #[test]
    fn test_custom_compliance_rule() {
        let service = service();
        service.register_compliance_rule(|window: &crate::compliance::AuditWindow<'_>| {
            (window.len() > 2).then(|| {
                ComplianceViolation::new("chatty", Severity::Low, "busy actor", window.len(), 2)
            })
        });
        for _ in 0..3 {
            service
                .check_access("nurse-1", "observation-1", AccessLevel::Read, &ctx())
                .unwrap();
        }
        let report = service.check_compliance("nurse-1").unwrap();
        assert_eq!(report.violations[0].name, "chatty");
    }

    #[test]
    fn test_reset_clears_state() {
        let mut service = service();
        service.reset();
        assert!(service.directory().is_empty());
        assert!(service.ledger().is_empty());
        assert!(service.matrices().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let storage = Arc::new(InMemoryIamStorage::new());
        let service = IamService::with_storage(IamConfig::default(), storage.clone()).unwrap();
        service
            .register_actor(ActorIdentity::human("dr-1", "Dr").with_credential("physician"))
            .unwrap();
        service
            .grant_permission(
                GrantRequest::new(
                    "dr-1",
                    ResourcePattern::new("patient:*"),
                    AccessLevel::Read,
                    PermissionScope::Global,
                    "admin",
                ),
            )
            .unwrap();

        let tasks = service.spawn_background();
        assert!(tasks.names().contains(&"persistence_writer"));
        tasks.shutdown().await.unwrap();

        assert_eq!(storage.actor_count(), 1);
        assert_eq!(storage.permission_count(), 1);
        assert_eq!(storage.audit_count(), 1);

        let restored = IamService::with_storage(IamConfig::default(), storage).unwrap();
        let stats = restored.hydrate().await.unwrap();
        assert_eq!(
            stats,
            HydrationStats {
                actors: 1,
                permissions: 1,
                audit_entries: 1
            }
        );
        assert!(restored
            .check_access("dr-1", "patient:9", AccessLevel::Read, &ctx())
            .unwrap());
        // ids continue after restored history
        assert_eq!(restored.ledger().len(), 2);
    }

    #[tokio::test]
    async fn test_hydrate_without_storage() {
        let service = IamService::default();
        assert_eq!(service.hydrate().await.unwrap(), HydrationStats::default());
    }
}
