//! Write-behind persistence queue.
//!
//! Mutations are applied in memory first and then enqueued here with
//! `try_send`, so decision paths never await storage. A single
//! [`PersistenceWriter`] task drains the queue into an [`IamStorage`]
//! backend. On cancellation the writer stops accepting new work and drains
//! what is already queued before returning.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::AuditEntry;
use crate::storage::{ActorStorage, AuditStorage, IamStorage, PermissionStorage};
use crate::types::{ActorIdentity, Permission};
use crate::{IamError, IamResult};

/// A queued persistence operation.
#[derive(Debug, Clone)]
pub enum PersistOp {
    /// Insert or replace an actor.
    SaveActor(ActorIdentity),
    /// Insert or replace a permission.
    SavePermission(Permission),
    /// Remove a permission by ID.
    RemovePermission(String),
    /// Append an audit entry.
    AppendAudit(Arc<AuditEntry>),
}

impl PersistOp {
    fn kind(&self) -> &'static str {
        match self {
            Self::SaveActor(_) => "save_actor",
            Self::SavePermission(_) => "save_permission",
            Self::RemovePermission(_) => "remove_permission",
            Self::AppendAudit(_) => "append_audit",
        }
    }
}

/// Counters shared by the queue handle and the writer.
#[derive(Debug, Default)]
pub struct PersistenceStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
}

impl PersistenceStats {
    /// Operations accepted by the queue.
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Operations rejected because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Operations the backend applied.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Operations the backend rejected.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Sending half of the persistence queue.
#[derive(Debug, Clone)]
pub struct PersistenceQueue {
    tx: mpsc::Sender<PersistOp>,
    stats: Arc<PersistenceStats>,
}

/// Receiving half, consumed by [`PersistenceWriter`].
#[derive(Debug)]
pub struct PersistenceReceiver {
    rx: mpsc::Receiver<PersistOp>,
    stats: Arc<PersistenceStats>,
}

impl PersistenceQueue {
    /// Creates a bounded queue.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, PersistenceReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(PersistenceStats::default());
        (
            Self {
                tx,
                stats: stats.clone(),
            },
            PersistenceReceiver { rx, stats },
        )
    }

    /// Enqueues an operation without waiting.
    ///
    /// # Errors
    ///
    /// Returns `IamError::Storage` if the queue is full or the writer is gone.
    pub fn enqueue(&self, op: PersistOp) -> IamResult<()> {
        let kind = op.kind();
        match self.tx.try_send(op) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(op = kind, "Persistence queue full, dropping write");
                Err(IamError::storage("persistence queue full"))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(op = kind, "Persistence queue closed, dropping write");
                Err(IamError::storage("persistence queue closed"))
            }
        }
    }

    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<PersistenceStats> {
        &self.stats
    }
}

/// Drains the persistence queue into a storage backend.
pub struct PersistenceWriter {
    storage: Arc<dyn IamStorage>,
    receiver: PersistenceReceiver,
}

impl PersistenceWriter {
    /// Creates a writer for `storage`.
    pub fn new(storage: Arc<dyn IamStorage>, receiver: PersistenceReceiver) -> Self {
        Self { storage, receiver }
    }

    /// Runs until cancelled or every queue handle is dropped.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Persistence writer started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                op = self.receiver.rx.recv() => match op {
                    Some(op) => self.apply(op).await,
                    None => break,
                },
            }
        }

        // Stop new sends, then flush what was accepted.
        self.receiver.rx.close();
        let mut drained = 0usize;
        while let Ok(op) = self.receiver.rx.try_recv() {
            self.apply(op).await;
            drained += 1;
        }

        info!(
            drained,
            written = self.receiver.stats.written(),
            failed = self.receiver.stats.failed(),
            "Persistence writer stopped"
        );
    }

    async fn apply(&self, op: PersistOp) {
        let kind = op.kind();
        let storage = self.storage.as_ref();
        let result = match op {
            PersistOp::SaveActor(actor) => ActorStorage::save(storage, &actor).await,
            PersistOp::SavePermission(permission) => {
                PermissionStorage::save(storage, &permission).await
            }
            PersistOp::RemovePermission(permission_id) => {
                PermissionStorage::remove(storage, &permission_id).await.map(|_| ())
            }
            PersistOp::AppendAudit(entry) => AuditStorage::append(storage, &entry).await,
        };

        match result {
            Ok(()) => {
                self.receiver.stats.written.fetch_add(1, Ordering::Relaxed);
                debug!(op = kind, "Persisted");
            }
            Err(e) => {
                self.receiver.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(op = kind, error = %e, "Persistence write failed");
            }
        }
    }
}
