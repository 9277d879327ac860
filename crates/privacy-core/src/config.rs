//! Configuration loading and validation.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any required variable is missing or invalid.

use anyhow::{Context, Result};
use serde::Deserialize;

/// Validated privacy subsystem configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Deployment environment stamped into every audit event's context.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// HMAC key for consent token signing, at least 32 bytes. **Required.**
    pub consent_signing_key: String,

    /// TTL (seconds) for cached audit events and records.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// How often (seconds) the retention scheduler runs a cleanup pass.
    #[serde(default = "default_cleanup_interval")]
    pub retention_cleanup_interval_secs: u64,

    /// Fallback retention horizon (days) for the scheduled cleanup.
    #[serde(default = "default_retention_days")]
    pub default_retention_days: u32,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_environment() -> String {
    "development".into()
}
fn default_cache_ttl() -> u64 {
    600
}
fn default_cleanup_interval() -> u64 {
    86_400
}
fn default_retention_days() -> u32 {
    365
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        if self.environment.trim().is_empty() {
            anyhow::bail!("ENVIRONMENT must not be empty");
        }
        if self.consent_signing_key.len() < 32 {
            anyhow::bail!("CONSENT_SIGNING_KEY must be at least 32 bytes");
        }
        if self.cache_ttl_secs == 0 {
            anyhow::bail!("CACHE_TTL_SECS must be > 0");
        }
        if self.retention_cleanup_interval_secs == 0 {
            anyhow::bail!("RETENTION_CLEANUP_INTERVAL_SECS must be > 0");
        }
        if self.default_retention_days == 0 {
            anyhow::bail!("DEFAULT_RETENTION_DAYS must be > 0");
        }
        Ok(())
    }
}
