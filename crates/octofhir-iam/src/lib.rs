//! # octofhir-iam
//!
//! Identity and access management decision and audit engine for OctoFHIR.
//!
//! Given an actor, a resource identifier and a requested access level, the
//! engine decides whether to grant access under healthcare constraints and
//! writes every outcome to an append-only audit trail.
//!
//! This crate provides:
//! - Direct permissions with validity windows, conditions and supervision
//! - Role-based fallback through versioned permission matrices
//! - Time-boxed break-glass access
//! - Supervised delegation of permissions
//! - Compliance reporting over the audit trail
//! - Write-behind persistence through pluggable storage traits
//!
//! ## Modules
//!
//! - [`types`] - actors, permissions, access levels, matrices and context
//! - [`policy`] - pattern matching, matrices and the decision pipeline
//! - [`directory`] - registered actors
//! - [`permission_store`] - direct permission grants
//! - [`emergency`] - break-glass access
//! - [`delegation`] - supervised delegation
//! - [`audit`] - audit entries and the ledger
//! - [`compliance`] - compliance rules, reports and the background scan
//! - [`storage`] - persistence traits, in-memory backend and writer
//! - [`service`] - the [`IamService`] facade
//! - [`tasks`] - background task handles
//! - [`config`] - configuration and loading

pub mod audit;
pub mod compliance;
pub mod config;
pub mod delegation;
pub mod directory;
pub mod emergency;
pub mod error;
pub mod permission_store;
pub mod policy;
pub mod service;
pub mod storage;
pub mod tasks;
pub mod types;

pub use audit::{AuditEntry, AuditEntryBuilder, AuditEventType, AuditLedger, AuditQuery, ComplianceFlag};
pub use compliance::{
    AuditWindow, ComplianceMonitor, ComplianceReport, ComplianceRule, ComplianceStatus,
    ComplianceViolation, Severity,
};
pub use config::{ConfigError, IamConfig};
pub use emergency::EmergencyType;
pub use error::{ErrorCategory, IamError};
pub use permission_store::GrantRequest;
pub use policy::{AccessDecision, AllowBasis, DenyReason, ResourcePattern};
pub use service::{BulkGrantOutcome, HydrationStats, IamService, IamSession};
pub use storage::{DynIamStorage, InMemoryIamStorage, IamStorage};
pub use tasks::BackgroundTasks;
pub use types::{
    AccessContext, AccessLevel, ActorIdentity, ActorType, ContextValue, Permission,
    PermissionMatrix, PermissionScope,
};

/// Type alias for IAM results.
pub type IamResult<T> = Result<T, IamError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use octofhir_iam::prelude::*;
/// ```
pub mod prelude {
    pub use crate::IamResult;
    pub use crate::audit::{AuditEntry, AuditEventType, AuditQuery, ComplianceFlag};
    pub use crate::compliance::{ComplianceReport, ComplianceRule, ComplianceStatus};
    pub use crate::config::IamConfig;
    pub use crate::emergency::EmergencyType;
    pub use crate::error::{ErrorCategory, IamError};
    pub use crate::permission_store::GrantRequest;
    pub use crate::policy::{AccessDecision, ResourcePattern};
    pub use crate::service::{IamService, IamSession};
    pub use crate::types::{
        AccessContext, AccessLevel, ActorIdentity, ActorType, Permission, PermissionMatrix,
        PermissionScope,
    };
}
