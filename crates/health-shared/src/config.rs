//! Configuration
//!
//! One TOML document configures every CareVault component. Every section
//! has defaults, so an empty document is a valid development configuration.
//!
//! ```toml
//! [audit]
//! journal_path = "/var/lib/carevault/audit.jsonl"
//! write_timeout_ms = 2000
//!
//! [consent]
//! scope_resolution = "union"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Top-level configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CareVaultConfig {
    pub audit: AuditConfig,
    pub crypto: CryptoConfig,
    pub consent: ConsentConfig,
    pub access: AccessConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Append-only JSON-lines journal. In-memory chain when unset.
    pub journal_path: Option<PathBuf>,
    /// Bound on queued appends waiting for the single chain writer
    pub queue_depth: usize,
    /// How long a caller waits for its entry to be committed
    pub write_timeout_ms: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            journal_path: None,
            queue_depth: 1024,
            write_timeout_ms: 2_000,
        }
    }
}

impl AuditConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Bound on a single key-provider call (KMS round trip)
    pub key_timeout_ms: u64,
    /// Data keys older than this are due for rotation
    pub key_max_age_days: i64,
    /// Start flagging rotation this many days before the key expires
    pub rotation_lead_days: i64,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            key_timeout_ms: 1_000,
            key_max_age_days: 365,
            rotation_lead_days: 30,
        }
    }
}

impl CryptoConfig {
    pub fn key_timeout(&self) -> Duration {
        Duration::from_millis(self.key_timeout_ms)
    }
}

/// How overlapping effective consents combine their field scopes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeResolution {
    /// Any effective consent may contribute fields
    #[default]
    Union,
    /// Only fields every effective consent permits
    Intersection,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentConfig {
    pub scope_resolution: ScopeResolution,
    pub check_timeout_ms: u64,
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            scope_resolution: ScopeResolution::Union,
            check_timeout_ms: 1_000,
        }
    }
}

impl ConsentConfig {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Bound on decrypting all fields of one response
    pub decrypt_timeout_ms: u64,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            decrypt_timeout_ms: 1_000,
        }
    }
}

impl AccessConfig {
    pub fn decrypt_timeout(&self) -> Duration {
        Duration::from_millis(self.decrypt_timeout_ms)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter directive, e.g. `info` or `carevault_audit=debug,info`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl CareVaultConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CareVaultConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml_str(&content)
    }

    /// Check every section, reporting all problems at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.audit.queue_depth == 0 {
            errors.push("audit.queue_depth must be greater than 0".to_string());
        }
        if self.audit.write_timeout_ms == 0 {
            errors.push("audit.write_timeout_ms must be greater than 0".to_string());
        }
        if self.crypto.key_timeout_ms == 0 {
            errors.push("crypto.key_timeout_ms must be greater than 0".to_string());
        }
        if self.crypto.key_max_age_days <= 0 {
            errors.push("crypto.key_max_age_days must be positive".to_string());
        }
        if self.crypto.rotation_lead_days < 0
            || self.crypto.rotation_lead_days >= self.crypto.key_max_age_days
        {
            errors.push("crypto.rotation_lead_days must be between 0 and key_max_age_days".to_string());
        }
        if self.consent.check_timeout_ms == 0 {
            errors.push("consent.check_timeout_ms must be greater than 0".to_string());
        }
        if self.access.decrypt_timeout_ms == 0 {
            errors.push("access.decrypt_timeout_ms must be greater than 0".to_string());
        }
        if self.logging.level.trim().is_empty() {
            errors.push("logging.level must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}
