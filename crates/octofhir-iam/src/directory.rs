//! Actor directory.
//!
//! Registered actors live in a sharded map keyed by actor ID. Actors are
//! never removed; deactivation flips [`ActorIdentity::active`].

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::storage::{PersistOp, PersistenceQueue};
use crate::types::ActorIdentity;
use crate::{IamError, IamResult};

/// Registry of known actors.
#[derive(Debug, Default)]
pub struct ActorDirectory {
    actors: DashMap<String, ActorIdentity>,
    persistence: Option<PersistenceQueue>,
}

impl ActorDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a directory that writes behind to `queue`.
    #[must_use]
    pub fn with_persistence(queue: PersistenceQueue) -> Self {
        Self {
            actors: DashMap::new(),
            persistence: Some(queue),
        }
    }

    /// Registers an actor, generating an ID when none is given.
    ///
    /// # Errors
    ///
    /// Returns `IamError::AlreadyExists` if the ID is taken.
    pub fn register(&self, mut actor: ActorIdentity) -> IamResult<String> {
        if actor.actor_id.trim().is_empty() {
            actor.actor_id = Uuid::new_v4().to_string();
        }
        let actor_id = actor.actor_id.clone();

        match self.actors.entry(actor_id.clone()) {
            Entry::Occupied(_) => {
                return Err(IamError::already_exists(format!(
                    "actor '{actor_id}' is already registered"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(actor.clone());
            }
        }

        info!(
            actor_id = %actor_id,
            actor_type = ?actor.actor_type,
            credentials = actor.credentials.len(),
            "Actor registered"
        );
        self.persist(actor);
        Ok(actor_id)
    }

    /// Returns a copy of the actor.
    #[must_use]
    pub fn get(&self, actor_id: &str) -> Option<ActorIdentity> {
        self.actors.get(actor_id).map(|a| a.value().clone())
    }

    /// Returns a copy of the actor if it exists and is active.
    #[must_use]
    pub fn get_active(&self, actor_id: &str) -> Option<ActorIdentity> {
        self.actors
            .get(actor_id)
            .filter(|a| a.active)
            .map(|a| a.value().clone())
    }

    /// Runs `f` against an active actor without cloning it.
    pub fn with_active<R>(&self, actor_id: &str, f: impl FnOnce(&ActorIdentity) -> R) -> Option<R> {
        self.actors
            .get(actor_id)
            .filter(|a| a.active)
            .map(|a| f(a.value()))
    }

    /// Returns `true` if the actor exists and is active.
    #[must_use]
    pub fn is_active(&self, actor_id: &str) -> bool {
        self.actors.get(actor_id).is_some_and(|a| a.active)
    }

    /// Activates or deactivates an actor.
    ///
    /// # Errors
    ///
    /// Returns `IamError::ActorNotFoundOrInactive` if the actor is unknown.
    pub fn set_active(&self, actor_id: &str, active: bool) -> IamResult<ActorIdentity> {
        let updated = self.update(actor_id, |actor| actor.active = active)?;
        info!(actor_id = %actor_id, active, "Actor status changed");
        Ok(updated)
    }

    /// Replaces an actor's role credentials.
    ///
    /// # Errors
    ///
    /// Returns `IamError::ActorNotFoundOrInactive` if the actor is unknown.
    pub fn update_credentials(
        &self,
        actor_id: &str,
        credentials: Vec<String>,
    ) -> IamResult<ActorIdentity> {
        let updated = self.update(actor_id, |actor| actor.credentials = credentials)?;
        info!(
            actor_id = %actor_id,
            credentials = ?updated.credentials,
            "Actor credentials updated"
        );
        Ok(updated)
    }

    fn update(
        &self,
        actor_id: &str,
        f: impl FnOnce(&mut ActorIdentity),
    ) -> IamResult<ActorIdentity> {
        let updated = {
            let mut actor = self
                .actors
                .get_mut(actor_id)
                .ok_or_else(|| IamError::actor_not_found(actor_id))?;
            f(&mut actor);
            actor.updated_at = OffsetDateTime::now_utc();
            actor.clone()
        };
        self.persist(updated.clone());
        Ok(updated)
    }

    /// Inserts or replaces an actor loaded from storage.
    pub(crate) fn restore(&self, actor: ActorIdentity) {
        self.actors.insert(actor.actor_id.clone(), actor);
    }

    /// Number of registered actors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actors.len()
    }

    /// Returns `true` if no actor is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    fn persist(&self, actor: ActorIdentity) {
        if let Some(queue) = &self.persistence {
            // failures are counted and logged by the queue
            let _ = queue.enqueue(PersistOp::SaveActor(actor));
        }
    }
}

// =============================================================================
// Per-actor locks
// =============================================================================

/// Per-actor mutexes serializing emergency issuance with actor mutations.
#[derive(Debug, Default)]
pub struct ActorLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ActorLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the actor's lock.
    pub fn with_lock<R>(&self, actor_id: &str, f: impl FnOnce() -> R) -> R {
        let mutex = self
            .locks
            .entry(actor_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = mutex.lock();
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_register_and_lookup() {
        let dir = ActorDirectory::new();
        let id = dir
            .register(ActorIdentity::human("nurse-1", "Nurse").with_credential("nurse"))
            .unwrap();
        assert_eq!(id, "nurse-1");
        assert!(dir.is_active("nurse-1"));
        assert_eq!(dir.get("nurse-1").unwrap().credentials, vec!["nurse"]);
        assert!(dir.get("missing").is_none());
    }

    #[test]
    fn test_generated_id() {
        let dir = ActorDirectory::new();
        let id = dir.register(ActorIdentity::agent("", "Scheduler")).unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_duplicate_rejected() {
        let dir = ActorDirectory::new();
        dir.register(ActorIdentity::human("a", "A")).unwrap();
        let err = dir.register(ActorIdentity::human("a", "Other")).unwrap_err();
        assert!(matches!(err, IamError::AlreadyExists { .. }));
        assert_eq!(dir.get("a").unwrap().name, "A");
    }

    #[test]
    fn test_deactivate() {
        let dir = ActorDirectory::new();
        dir.register(ActorIdentity::human("a", "A")).unwrap();
        let before = dir.get("a").unwrap().updated_at;

        let updated = dir.set_active("a", false).unwrap();
        assert!(!updated.active);
        assert!(updated.updated_at >= before);
        assert!(!dir.is_active("a"));
        assert!(dir.get_active("a").is_none());
        // still present
        assert!(dir.get("a").is_some());

        assert!(matches!(
            dir.set_active("ghost", true),
            Err(IamError::ActorNotFoundOrInactive { .. })
        ));
    }

    #[test]
    fn test_update_credentials() {
        let dir = ActorDirectory::new();
        dir.register(ActorIdentity::human("a", "A").with_credential("nurse")).unwrap();
        dir.update_credentials("a", vec!["physician".into()]).unwrap();
        assert!(dir.with_active("a", |a| a.has_credential("physician")).unwrap());
    }

    #[test]
    fn test_actor_locks_serialize() {
        let locks = Arc::new(ActorLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        locks.with_lock("dr-1", || {
                            assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
