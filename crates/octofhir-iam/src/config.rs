//! IAM engine configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [emergency]
//! grace_window = "1h"
//!
//! [compliance]
//! scan_interval = "15m"
//! lookback_window = "30d"
//!
//! [audit]
//! fail_closed = true
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root IAM configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct IamConfig {
    /// Break-glass access settings.
    pub emergency: EmergencyConfig,

    /// Delegation settings.
    pub delegation: DelegationConfig,

    /// Audit ledger settings.
    pub audit: AuditConfig,

    /// Compliance monitor settings.
    pub compliance: ComplianceConfig,

    /// Persistence queue settings.
    pub storage: StorageConfig,
}

/// Break-glass access configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmergencyConfig {
    /// How long an emergency grant stays valid.
    #[serde(with = "humantime_serde")]
    pub grace_window: Duration,

    /// How often expired emergency grants are swept from the active store.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Expired emergency grants older than this are purged by the sweep.
    #[serde(with = "humantime_serde")]
    pub purge_after: Duration,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            grace_window: Duration::from_secs(3600),   // 1 hour
            sweep_interval: Duration::from_secs(900),  // 15 minutes
            purge_after: Duration::from_secs(24 * 3600), // 1 day
        }
    }
}

/// Delegation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DelegationConfig {
    /// Longest duration a delegation may be requested for.
    #[serde(with = "humantime_serde")]
    pub max_duration: Duration,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(7 * 24 * 3600), // 7 days
        }
    }
}

/// Audit ledger configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Deny when an audit entry cannot be handed to persistence.
    ///
    /// Off by default: decision availability wins over audit durability.
    pub fail_closed: bool,
}

/// Compliance monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ComplianceConfig {
    /// Run the background scan.
    pub enabled: bool,

    /// Interval between background scans.
    #[serde(with = "humantime_serde")]
    pub scan_interval: Duration,

    /// Trailing window of audit history each scan inspects.
    #[serde(with = "humantime_serde")]
    pub lookback_window: Duration,

    /// Emergency access events tolerated within the window.
    pub max_emergency_events: usize,

    /// Failed access attempts tolerated within the window.
    pub max_failed_attempts: usize,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval: Duration::from_secs(3600),               // 1 hour
            lookback_window: Duration::from_secs(30 * 24 * 3600), // 30 days
            max_emergency_events: 5,
            max_failed_attempts: 20,
        }
    }
}

/// Persistence queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Capacity of the write-behind queue.
    pub queue_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// The configuration could not be loaded or parsed.
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl IamConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a duration or capacity is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.emergency.grace_window.is_zero() {
            return Err(ConfigError::InvalidValue(
                "emergency.grace_window must be greater than zero".to_string(),
            ));
        }
        if self.emergency.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "emergency.sweep_interval must be greater than zero".to_string(),
            ));
        }
        if self.delegation.max_duration.is_zero() {
            return Err(ConfigError::InvalidValue(
                "delegation.max_duration must be greater than zero".to_string(),
            ));
        }
        if self.compliance.scan_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "compliance.scan_interval must be greater than zero".to_string(),
            ));
        }
        if self.compliance.lookback_window.is_zero() {
            return Err(ConfigError::InvalidValue(
                "compliance.lookback_window must be greater than zero".to_string(),
            ));
        }
        if self.storage.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "storage.queue_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Converts a configured duration to a `time` span, saturating on overflow.
pub(crate) fn span(duration: Duration) -> time::Duration {
    time::Duration::try_from(duration).unwrap_or(time::Duration::MAX)
}

pub mod loader {
    use super::{ConfigError, IamConfig};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file looked up in the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "octofhir-iam.toml";

    /// Loads configuration from an optional TOML file plus environment overrides.
    ///
    /// Environment variables use the `OCTOFHIR_IAM` prefix and `__` as the
    /// section separator, e.g. `OCTOFHIR_IAM__AUDIT__FAIL_CLOSED=true`.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load_config(path: Option<&str>) -> Result<IamConfig, ConfigError> {
        let mut builder = Config::builder();
        let file = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        }
        builder = builder.add_source(
            Environment::with_prefix("OCTOFHIR_IAM")
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| ConfigError::Load(format!("config build error: {e}")))?;
        let merged: IamConfig = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::Load(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }
}
