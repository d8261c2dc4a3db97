//! Persistence boundary for IAM state.
//!
//! The engine keeps its working set in memory and writes behind through a
//! bounded queue (see [`writer`]). Backends implement the three storage
//! traits below; [`memory::InMemoryIamStorage`] is the in-process backend.
//!
//! The traits share method names, so a backend that implements all of them
//! is called with fully-qualified syntax:
//!
//! ```ignore
//! use octofhir_iam::storage::{ActorStorage, IamStorage};
//!
//! async fn load(storage: &dyn IamStorage, id: &str) {
//!     let actor = ActorStorage::find_by_id(storage, id).await?;
//! }
//! ```

pub mod memory;
pub mod writer;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::IamResult;
use crate::audit::{AuditEntry, AuditQuery};
use crate::types::{AccessLevel, ActorIdentity, ActorType, Permission};

pub use memory::InMemoryIamStorage;
pub use writer::{PersistOp, PersistenceQueue, PersistenceReceiver, PersistenceStats, PersistenceWriter};

// =============================================================================
// Search Criteria
// =============================================================================

/// Filters for actor lookups.
#[derive(Debug, Default, Clone)]
pub struct ActorCriteria {
    /// Filter by actor type.
    pub actor_type: Option<ActorType>,

    /// Filter by active status.
    pub active: Option<bool>,

    /// Filter by held credential (role).
    pub credential: Option<String>,

    /// Filter by organization.
    pub organization_id: Option<String>,

    /// Maximum number of results to return.
    pub limit: Option<usize>,
}

impl ActorCriteria {
    /// Create empty criteria (matches every actor).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the actor type filter.
    #[must_use]
    pub fn with_actor_type(mut self, actor_type: ActorType) -> Self {
        self.actor_type = Some(actor_type);
        self
    }

    /// Set the active filter.
    #[must_use]
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    /// Set the credential filter.
    #[must_use]
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// Set the organization filter.
    #[must_use]
    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    /// Set the result limit.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns `true` if `actor` passes every filter.
    #[must_use]
    pub fn matches(&self, actor: &ActorIdentity) -> bool {
        self.actor_type.is_none_or(|t| actor.actor_type == t)
            && self.active.is_none_or(|a| actor.active == a)
            && self
                .credential
                .as_deref()
                .is_none_or(|c| actor.has_credential(c))
            && self
                .organization_id
                .as_deref()
                .is_none_or(|o| actor.organization_id.as_deref() == Some(o))
    }
}

/// Filters for permission lookups.
#[derive(Debug, Default, Clone)]
pub struct PermissionCriteria {
    /// Filter by owning actor.
    pub actor_id: Option<String>,

    /// Only permissions at or above this level.
    pub min_level: Option<AccessLevel>,

    /// Only permissions valid at this instant.
    pub valid_at: Option<OffsetDateTime>,

    /// Only permissions derived from this source permission.
    pub delegated_from: Option<String>,

    /// Maximum number of results to return.
    pub limit: Option<usize>,
}

impl PermissionCriteria {
    /// Create empty criteria (matches every permission).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the owner filter.
    #[must_use]
    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Set the minimum level filter.
    #[must_use]
    pub fn with_min_level(mut self, level: AccessLevel) -> Self {
        self.min_level = Some(level);
        self
    }

    /// Set the validity instant filter.
    #[must_use]
    pub fn with_valid_at(mut self, at: OffsetDateTime) -> Self {
        self.valid_at = Some(at);
        self
    }

    /// Set the delegation source filter.
    #[must_use]
    pub fn with_delegated_from(mut self, permission_id: impl Into<String>) -> Self {
        self.delegated_from = Some(permission_id.into());
        self
    }

    /// Set the result limit.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns `true` if `permission` passes every filter.
    #[must_use]
    pub fn matches(&self, permission: &Permission) -> bool {
        self.actor_id
            .as_deref()
            .is_none_or(|id| permission.actor_id == id)
            && self
                .min_level
                .is_none_or(|level| permission.access_level.satisfies(level))
            && self.valid_at.is_none_or(|at| permission.is_valid_at(at))
            && self
                .delegated_from
                .as_deref()
                .is_none_or(|src| permission.delegated_from.as_deref() == Some(src))
    }
}

// =============================================================================
// Storage Traits
// =============================================================================

/// Storage operations for actor identities.
#[async_trait]
pub trait ActorStorage: Send + Sync {
    /// Insert or replace an actor.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn save(&self, actor: &ActorIdentity) -> IamResult<()>;

    /// Get an actor by ID. Returns `None` if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_id(&self, actor_id: &str) -> IamResult<Option<ActorIdentity>>;

    /// List actors matching the criteria.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_criteria(&self, criteria: &ActorCriteria) -> IamResult<Vec<ActorIdentity>>;

    /// Check whether an actor exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn exists(&self, actor_id: &str) -> IamResult<bool>;
}

/// Storage operations for permissions.
#[async_trait]
pub trait PermissionStorage: Send + Sync {
    /// Insert or replace a permission.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn save(&self, permission: &Permission) -> IamResult<()>;

    /// Get a permission by ID. Returns `None` if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_id(&self, permission_id: &str) -> IamResult<Option<Permission>>;

    /// List permissions matching the criteria.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_criteria(&self, criteria: &PermissionCriteria) -> IamResult<Vec<Permission>>;

    /// Check whether a permission exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn exists(&self, permission_id: &str) -> IamResult<bool>;

    /// Remove a permission. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn remove(&self, permission_id: &str) -> IamResult<bool>;
}

/// Append-only storage for audit entries.
#[async_trait]
pub trait AuditStorage: Send + Sync {
    /// Append an entry. Entries are never updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn append(&self, entry: &AuditEntry) -> IamResult<()>;

    /// Get an entry by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_id(&self, audit_id: u64) -> IamResult<Option<AuditEntry>>;

    /// Query entries, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_criteria(&self, query: &AuditQuery) -> IamResult<Vec<AuditEntry>>;

    /// Check whether an entry exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn exists(&self, audit_id: u64) -> IamResult<bool>;
}

/// A backend providing every IAM storage concern.
pub trait IamStorage: ActorStorage + PermissionStorage + AuditStorage {}

impl<T> IamStorage for T where T: ActorStorage + PermissionStorage + AuditStorage {}

/// Type alias for a shareable storage backend.
pub type DynIamStorage = std::sync::Arc<dyn IamStorage>;
