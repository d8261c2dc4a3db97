//! Append-only audit ledger.
//!
//! A single mutex guards the append buffer. Identifiers and timestamps are
//! assigned while it is held, so both are monotonic in insertion order and
//! the buffer stays sorted by time.
//!
//! Entries land in a bounded tail; a full tail is frozen into an immutable
//! segment. Readers copy the segment list `Arc` and the tail under the lock,
//! so the critical section never grows with the size of the trail, then
//! binary-search and filter after releasing it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::audit::entry::{AuditEntry, AuditEntryBuilder, AuditEventType};
use crate::storage::{PersistOp, PersistenceQueue};

// =============================================================================
// Audit Query
// =============================================================================

/// Filters for audit trail queries.
#[derive(Debug, Default, Clone)]
pub struct AuditQuery {
    /// Filter by actor.
    pub actor_id: Option<String>,

    /// Filter by resource.
    pub resource_id: Option<String>,

    /// Inclusive lower time bound.
    pub start: Option<OffsetDateTime>,

    /// Inclusive upper time bound.
    pub end: Option<OffsetDateTime>,

    /// Restrict to these event types.
    pub event_types: Option<Vec<AuditEventType>>,

    /// Maximum number of results to return.
    pub limit: Option<usize>,
}

impl AuditQuery {
    /// Create an unfiltered query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the actor filter.
    #[must_use]
    pub fn for_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Set the resource filter.
    #[must_use]
    pub fn for_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Set the inclusive time range.
    #[must_use]
    pub fn between(mut self, start: OffsetDateTime, end: OffsetDateTime) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    /// Set the lower time bound.
    #[must_use]
    pub fn since(mut self, start: OffsetDateTime) -> Self {
        self.start = Some(start);
        self
    }

    /// Add an event type to the filter.
    #[must_use]
    pub fn with_event_type(mut self, event_type: AuditEventType) -> Self {
        self.event_types.get_or_insert_with(Vec::new).push(event_type);
        self
    }

    /// Set the result limit.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns `true` if `entry` passes every filter.
    #[must_use]
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.actor_id
            .as_deref()
            .is_none_or(|id| entry.actor_id == id)
            && self
                .resource_id
                .as_deref()
                .is_none_or(|id| entry.resource_id.as_deref() == Some(id))
            && self.start.is_none_or(|start| entry.timestamp >= start)
            && self.end.is_none_or(|end| entry.timestamp <= end)
            && self
                .event_types
                .as_ref()
                .is_none_or(|types| types.contains(&entry.event_type))
    }
}

// =============================================================================
// Audit Ledger
// =============================================================================

/// Result of recording an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditReceipt {
    /// Identifier assigned to the entry.
    pub audit_id: u64,

    /// `false` if the entry could not be handed to persistence.
    pub delivered: bool,
}

/// Entries per frozen segment.
const SEGMENT_LEN: usize = 1024;

type Segment = Arc<[Arc<AuditEntry>]>;

#[derive(Debug, Default)]
struct LedgerState {
    sealed: Arc<Vec<Segment>>,
    sealed_len: usize,
    tail: Vec<Arc<AuditEntry>>,
    next_id: u64,
    last_timestamp: Option<OffsetDateTime>,
}

impl LedgerState {
    fn push(&mut self, entry: Arc<AuditEntry>) {
        self.tail.push(entry);
        if self.tail.len() >= SEGMENT_LEN {
            let full = std::mem::replace(&mut self.tail, Vec::with_capacity(SEGMENT_LEN));
            let segment: Segment = full.into();
            self.sealed_len += segment.len();
            // copies the list only while a reader still holds the old one
            Arc::make_mut(&mut self.sealed).push(segment);
        }
    }

    fn len(&self) -> usize {
        self.sealed_len + self.tail.len()
    }
}

/// The append-only audit trail.
#[derive(Debug, Default)]
pub struct AuditLedger {
    state: Mutex<LedgerState>,
    persistence: Option<PersistenceQueue>,
    undelivered: AtomicU64,
}

impl AuditLedger {
    /// Creates a ledger without persistence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger that forwards entries to `queue`.
    #[must_use]
    pub fn with_persistence(queue: PersistenceQueue) -> Self {
        Self {
            persistence: Some(queue),
            ..Self::default()
        }
    }

    /// Appends an entry. Never fails; forwarding problems are logged.
    pub fn record(&self, builder: AuditEntryBuilder) -> AuditReceipt {
        let entry = {
            let mut state = self.state.lock();
            state.next_id += 1;
            let audit_id = state.next_id;

            // wall clock may step back; keep timestamps non-decreasing
            let mut timestamp = OffsetDateTime::now_utc();
            if let Some(last) = state.last_timestamp
                && timestamp < last
            {
                timestamp = last;
            }
            state.last_timestamp = Some(timestamp);

            let entry = Arc::new(builder.build(audit_id, timestamp));
            state.push(entry.clone());
            entry
        };

        debug!(
            audit_id = entry.audit_id,
            event_type = %entry.event_type,
            actor_id = %entry.actor_id,
            success = entry.success,
            "Audit entry recorded"
        );

        let delivered = match &self.persistence {
            None => true,
            Some(queue) => match queue.enqueue(PersistOp::AppendAudit(entry.clone())) {
                Ok(()) => true,
                Err(e) => {
                    self.undelivered.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        audit_id = entry.audit_id,
                        error = %e,
                        "Failed to forward audit entry to persistence"
                    );
                    false
                }
            },
        };

        AuditReceipt {
            audit_id: entry.audit_id,
            delivered,
        }
    }

    /// Returns matching entries, most recent first.
    #[must_use]
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEntry> {
        self.snapshot(query.start, query.end)
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|e| AuditEntry::clone(e))
            .collect()
    }

    /// Entries in `[start, end]` in insertion order.
    ///
    /// Only the segment list handle and the tail are copied under the lock.
    pub(crate) fn snapshot(
        &self,
        start: Option<OffsetDateTime>,
        end: Option<OffsetDateTime>,
    ) -> Vec<Arc<AuditEntry>> {
        let (sealed, tail) = {
            let state = self.state.lock();
            (state.sealed.clone(), state.tail.clone())
        };

        let mut window = Vec::new();
        let chunks = sealed.iter().map(|segment| &**segment).chain(std::iter::once(&tail[..]));
        for chunk in chunks {
            let (Some(first), Some(last)) = (chunk.first(), chunk.last()) else {
                continue;
            };
            if start.is_some_and(|s| last.timestamp < s) {
                continue;
            }
            if end.is_some_and(|e| first.timestamp > e) {
                break;
            }
            let from = start.map_or(0, |s| chunk.partition_point(|x| x.timestamp < s));
            let to = end.map_or(chunk.len(), |e| chunk.partition_point(|x| x.timestamp <= e));
            if from < to {
                window.extend_from_slice(&chunk[from..to]);
            }
        }
        window
    }

    /// Loads previously persisted entries into an empty ledger.
    ///
    /// Entries are sorted by id; new ids continue after the highest one.
    /// Ignored if the ledger already holds entries.
    pub(crate) fn restore(&self, mut entries: Vec<AuditEntry>) -> usize {
        let mut state = self.state.lock();
        if state.len() > 0 {
            return 0;
        }
        entries.sort_by_key(|e| e.audit_id);
        let mut last: Option<OffsetDateTime> = None;
        for mut entry in entries {
            if let Some(prev) = last
                && entry.timestamp < prev
            {
                entry.timestamp = prev;
            }
            last = Some(entry.timestamp);
            state.next_id = state.next_id.max(entry.audit_id);
            state.push(Arc::new(entry));
        }
        state.last_timestamp = last;
        state.len()
    }

    /// Number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    /// Returns `true` if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries that could not be forwarded to persistence.
    #[must_use]
    pub fn undelivered(&self) -> u64 {
        self.undelivered.load(Ordering::Relaxed)
    }
}
