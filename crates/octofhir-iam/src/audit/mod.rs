//! Audit trail.
//!
//! Every access decision, emergency request, delegation attempt and
//! administrative mutation is written to the [`AuditLedger`]. Entries are
//! immutable and the ledger exposes no update or delete operation.

pub mod entry;
pub mod ledger;

pub use entry::{AuditEntry, AuditEntryBuilder, AuditEventType, ComplianceFlag};
pub use ledger::{AuditLedger, AuditQuery, AuditReceipt};
