//! In-memory storage backend.
//!
//! Useful for tests and single-process deployments. Data is lost on drop.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::IamResult;
use crate::audit::{AuditEntry, AuditQuery};
use crate::storage::{
    ActorCriteria, ActorStorage, AuditStorage, PermissionCriteria, PermissionStorage,
};
use crate::types::{ActorIdentity, Permission};

/// In-memory implementation of every IAM storage trait.
#[derive(Debug, Default)]
pub struct InMemoryIamStorage {
    actors: DashMap<String, ActorIdentity>,
    permissions: DashMap<String, Permission>,
    audit: RwLock<BTreeMap<u64, AuditEntry>>,
}

impl InMemoryIamStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored actors.
    #[must_use]
    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    /// Number of stored permissions.
    #[must_use]
    pub fn permission_count(&self) -> usize {
        self.permissions.len()
    }

    /// Number of stored audit entries.
    #[must_use]
    pub fn audit_count(&self) -> usize {
        self.audit.read().len()
    }
}

#[async_trait]
impl ActorStorage for InMemoryIamStorage {
    async fn save(&self, actor: &ActorIdentity) -> IamResult<()> {
        self.actors.insert(actor.actor_id.clone(), actor.clone());
        Ok(())
    }

    async fn find_by_id(&self, actor_id: &str) -> IamResult<Option<ActorIdentity>> {
        Ok(self.actors.get(actor_id).map(|a| a.value().clone()))
    }

    async fn find_by_criteria(&self, criteria: &ActorCriteria) -> IamResult<Vec<ActorIdentity>> {
        let mut actors: Vec<ActorIdentity> = self
            .actors
            .iter()
            .filter(|a| criteria.matches(a.value()))
            .map(|a| a.value().clone())
            .collect();
        actors.sort_by(|a, b| a.actor_id.cmp(&b.actor_id));
        if let Some(limit) = criteria.limit {
            actors.truncate(limit);
        }
        Ok(actors)
    }

    async fn exists(&self, actor_id: &str) -> IamResult<bool> {
        Ok(self.actors.contains_key(actor_id))
    }
}

#[async_trait]
impl PermissionStorage for InMemoryIamStorage {
    async fn save(&self, permission: &Permission) -> IamResult<()> {
        self.permissions
            .insert(permission.permission_id.clone(), permission.clone());
        Ok(())
    }

    async fn find_by_id(&self, permission_id: &str) -> IamResult<Option<Permission>> {
        Ok(self.permissions.get(permission_id).map(|p| p.value().clone()))
    }

    async fn find_by_criteria(&self, criteria: &PermissionCriteria) -> IamResult<Vec<Permission>> {
        let mut permissions: Vec<Permission> = self
            .permissions
            .iter()
            .filter(|p| criteria.matches(p.value()))
            .map(|p| p.value().clone())
            .collect();
        permissions.sort_by(|a, b| {
            a.granted_at
                .cmp(&b.granted_at)
                .then_with(|| a.permission_id.cmp(&b.permission_id))
        });
        if let Some(limit) = criteria.limit {
            permissions.truncate(limit);
        }
        Ok(permissions)
    }

    async fn exists(&self, permission_id: &str) -> IamResult<bool> {
        Ok(self.permissions.contains_key(permission_id))
    }

    async fn remove(&self, permission_id: &str) -> IamResult<bool> {
        Ok(self.permissions.remove(permission_id).is_some())
    }
}

#[async_trait]
impl AuditStorage for InMemoryIamStorage {
    async fn append(&self, entry: &AuditEntry) -> IamResult<()> {
        self.audit
            .write()
            .entry(entry.audit_id)
            .or_insert_with(|| entry.clone());
        Ok(())
    }

    async fn find_by_id(&self, audit_id: u64) -> IamResult<Option<AuditEntry>> {
        Ok(self.audit.read().get(&audit_id).cloned())
    }

    async fn find_by_criteria(&self, query: &AuditQuery) -> IamResult<Vec<AuditEntry>> {
        let audit = self.audit.read();
        let entries = audit
            .values()
            .rev()
            .filter(|e| query.matches(e))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(entries)
    }

    async fn exists(&self, audit_id: u64) -> IamResult<bool> {
        Ok(self.audit.read().contains_key(&audit_id))
    }
}
