//! Core IAM value types.

pub mod access_level;
pub mod actor;
pub mod context;
pub mod matrix;
pub mod permission;

pub use access_level::AccessLevel;
pub use actor::{ActorIdentity, ActorType};
pub use context::{AccessContext, ContextValue, PURPOSE_OF_USE, SUPERVISOR_APPROVED, SUPERVISOR_ID};
pub use matrix::PermissionMatrix;
pub use permission::{
    Permission, PermissionScope, RULE_AUDIT_ALL_ACCESS, RULE_EMERGENCY_APPROVAL,
    RULE_PHYSICIAN_SUPERVISION,
};
