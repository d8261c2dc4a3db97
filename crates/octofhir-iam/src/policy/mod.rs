//! Access policy evaluation.
//!
//! - [`matcher`] - resource pattern matching
//! - [`matrix`] - published role matrices
//! - [`engine`] - the access decision pipeline

pub mod engine;
pub mod matcher;
pub mod matrix;

pub use engine::{AccessDecision, AccessDecisionEngine, AllowBasis, DenyReason};
pub use matcher::{MATCH_ALL, PatternKind, ResourcePattern};
pub use matrix::{PermissionMatrixEngine, RoleGrant};
