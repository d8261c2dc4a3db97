//! IAM error types.
//!
//! Access decisions never surface policy outcomes as errors; they return
//! `false` and write an audit entry instead. The variants below are raised by
//! administrative operations (grant, revoke, delegate) and for malformed
//! input.

use std::fmt;

/// Errors that can occur during IAM operations.
#[derive(Debug, thiserror::Error)]
pub enum IamError {
    /// The actor does not exist or has been deactivated.
    #[error("Actor not found or inactive: {actor_id}")]
    ActorNotFoundOrInactive {
        /// The actor that was looked up.
        actor_id: String,
    },

    /// The actor does not hold a sufficient permission for the operation.
    #[error("Insufficient permissions: {message}")]
    InsufficientPermissions {
        /// Description of what was missing.
        message: String,
    },

    /// The permission is outside its validity window.
    #[error("Permission expired: {permission_id}")]
    PermissionExpired {
        /// The expired permission.
        permission_id: String,
    },

    /// The actor holds no role eligible for break-glass access.
    #[error("Emergency access not authorized for actor: {actor_id}")]
    EmergencyAccessNotAuthorized {
        /// The requesting actor.
        actor_id: String,
    },

    /// A supervising actor is required but missing or not qualified.
    #[error("Supervision required: {message}")]
    SupervisionRequired {
        /// Description of the supervision requirement.
        message: String,
    },

    /// The delegator does not own the permission it tried to delegate.
    #[error("Permission {permission_id} is not owned by actor {actor_id}")]
    DelegationSourceNotOwned {
        /// The source permission.
        permission_id: String,
        /// The actor that attempted the delegation.
        actor_id: String,
    },

    /// An identifier or argument is empty or malformed.
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Description of the invalid input.
        message: String,
    },

    /// No active permission exists with the given ID.
    #[error("Permission not found: {permission_id}")]
    PermissionNotFound {
        /// The missing permission.
        permission_id: String,
    },

    /// No published matrix exists with the given ID.
    #[error("Permission matrix not found: {matrix_id}")]
    MatrixNotFound {
        /// The missing matrix.
        matrix_id: String,
    },

    /// A record with the same identifier already exists.
    #[error("Already exists: {message}")]
    AlreadyExists {
        /// Description of the conflicting record.
        message: String,
    },

    /// The persistence backend failed or is unavailable.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The IAM configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl IamError {
    /// Creates a new `ActorNotFoundOrInactive` error.
    #[must_use]
    pub fn actor_not_found(actor_id: impl Into<String>) -> Self {
        Self::ActorNotFoundOrInactive {
            actor_id: actor_id.into(),
        }
    }

    /// Creates a new `InsufficientPermissions` error.
    #[must_use]
    pub fn insufficient_permissions(message: impl Into<String>) -> Self {
        Self::InsufficientPermissions {
            message: message.into(),
        }
    }

    /// Creates a new `PermissionExpired` error.
    #[must_use]
    pub fn permission_expired(permission_id: impl Into<String>) -> Self {
        Self::PermissionExpired {
            permission_id: permission_id.into(),
        }
    }

    /// Creates a new `EmergencyAccessNotAuthorized` error.
    #[must_use]
    pub fn emergency_not_authorized(actor_id: impl Into<String>) -> Self {
        Self::EmergencyAccessNotAuthorized {
            actor_id: actor_id.into(),
        }
    }

    /// Creates a new `SupervisionRequired` error.
    #[must_use]
    pub fn supervision_required(message: impl Into<String>) -> Self {
        Self::SupervisionRequired {
            message: message.into(),
        }
    }

    /// Creates a new `DelegationSourceNotOwned` error.
    #[must_use]
    pub fn not_owned(permission_id: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self::DelegationSourceNotOwned {
            permission_id: permission_id.into(),
            actor_id: actor_id.into(),
        }
    }

    /// Creates a new `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a new `PermissionNotFound` error.
    #[must_use]
    pub fn permission_not_found(permission_id: impl Into<String>) -> Self {
        Self::PermissionNotFound {
            permission_id: permission_id.into(),
        }
    }

    /// Creates a new `MatrixNotFound` error.
    #[must_use]
    pub fn matrix_not_found(matrix_id: impl Into<String>) -> Self {
        Self::MatrixNotFound {
            matrix_id: matrix_id.into(),
        }
    }

    /// Creates a new `AlreadyExists` error.
    #[must_use]
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::AlreadyExists {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if the caller caused the error (bad input or misuse).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns `true` if this is an infrastructure or internal failure.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. }
        )
    }

    /// Returns `true` if the error reflects an access-policy outcome.
    #[must_use]
    pub fn is_policy_error(&self) -> bool {
        matches!(
            self,
            Self::ActorNotFoundOrInactive { .. }
                | Self::InsufficientPermissions { .. }
                | Self::PermissionExpired { .. }
                | Self::EmergencyAccessNotAuthorized { .. }
                | Self::SupervisionRequired { .. }
                | Self::DelegationSourceNotOwned { .. }
        )
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ActorNotFoundOrInactive { .. } => ErrorCategory::Identity,
            Self::InsufficientPermissions { .. } => ErrorCategory::Authorization,
            Self::PermissionExpired { .. } => ErrorCategory::Authorization,
            Self::EmergencyAccessNotAuthorized { .. } => ErrorCategory::Emergency,
            Self::SupervisionRequired { .. } => ErrorCategory::Supervision,
            Self::DelegationSourceNotOwned { .. } => ErrorCategory::Supervision,
            Self::InvalidInput { .. } => ErrorCategory::Validation,
            Self::PermissionNotFound { .. } => ErrorCategory::Validation,
            Self::MatrixNotFound { .. } => ErrorCategory::Validation,
            Self::AlreadyExists { .. } => ErrorCategory::Validation,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the snake_case reason code recorded in audit details.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ActorNotFoundOrInactive { .. } => "actor_not_found_or_inactive",
            Self::InsufficientPermissions { .. } => "insufficient_permissions",
            Self::PermissionExpired { .. } => "permission_expired",
            Self::EmergencyAccessNotAuthorized { .. } => "emergency_access_not_authorized",
            Self::SupervisionRequired { .. } => "supervision_required",
            Self::DelegationSourceNotOwned { .. } => "delegation_source_not_owned",
            Self::InvalidInput { .. } => "invalid_input",
            Self::PermissionNotFound { .. } => "permission_not_found",
            Self::MatrixNotFound { .. } => "matrix_not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::Storage { .. } => "storage_error",
            Self::Configuration { .. } => "configuration_error",
            Self::Internal { .. } => "internal_error",
        }
    }
}

impl From<crate::config::ConfigError> for IamError {
    fn from(e: crate::config::ConfigError) -> Self {
        Self::configuration(e.to_string())
    }
}

/// Categories of IAM errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Actor identity lookups.
    Identity,
    /// Permission checks.
    Authorization,
    /// Break-glass access.
    Emergency,
    /// Supervision and delegation rules.
    Supervision,
    /// Request validation errors.
    Validation,
    /// Infrastructure/storage errors.
    Infrastructure,
    /// Configuration errors.
    Configuration,
    /// Internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => write!(f, "identity"),
            Self::Authorization => write!(f, "authorization"),
            Self::Emergency => write!(f, "emergency"),
            Self::Supervision => write!(f, "supervision"),
            Self::Validation => write!(f, "validation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Rejects empty or whitespace-only identifiers.
pub(crate) fn require_id(field: &str, value: &str) -> Result<(), IamError> {
    if value.trim().is_empty() {
        return Err(IamError::invalid_input(format!("{field} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IamError::actor_not_found("nurse-1");
        assert_eq!(err.to_string(), "Actor not found or inactive: nurse-1");

        let err = IamError::not_owned("perm-1", "dr-2");
        assert_eq!(
            err.to_string(),
            "Permission perm-1 is not owned by actor dr-2"
        );

        let err = IamError::invalid_input("actor_id must not be empty");
        assert_eq!(err.to_string(), "Invalid input: actor_id must not be empty");
    }

    #[test]
    fn test_error_predicates() {
        let err = IamError::emergency_not_authorized("clerk-1");
        assert!(err.is_client_error());
        assert!(err.is_policy_error());
        assert!(!err.is_server_error());

        let err = IamError::invalid_input("bad");
        assert!(err.is_client_error());
        assert!(!err.is_policy_error());

        let err = IamError::storage("queue closed");
        assert!(err.is_server_error());
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_error_category_and_code() {
        assert_eq!(
            IamError::supervision_required("x").category(),
            ErrorCategory::Supervision
        );
        assert_eq!(
            IamError::permission_expired("p").code(),
            "permission_expired"
        );
        assert_eq!(
            IamError::actor_not_found("a").code(),
            "actor_not_found_or_inactive"
        );
        assert_eq!(ErrorCategory::Emergency.to_string(), "emergency");
    }

    #[test]
    fn test_require_id() {
        assert!(require_id("actor_id", "dr-1").is_ok());
        assert!(matches!(
            require_id("actor_id", "  "),
            Err(IamError::InvalidInput { .. })
        ));
    }
}
