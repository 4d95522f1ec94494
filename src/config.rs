//! Configuration module for Arbor.

use serde::Deserialize;
use std::path::Path;

use crate::tree::RootCategory;
use crate::{ArborError, Result};

/// Metadata store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Maximum number of pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> String {
    "data/arbor.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Object store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding object bytes for the local backend.
    #[serde(default = "default_storage_path")]
    pub path: String,
    /// Base URL prepended to presigned download links.
    #[serde(default = "default_presign_base_url")]
    pub presign_base_url: String,
    /// Secret used to sign presigned URLs.
    #[serde(default)]
    pub presign_secret: String,
    /// Default lifetime of a presigned URL in seconds.
    #[serde(default = "default_presign_ttl")]
    pub presign_ttl_secs: u64,
    /// Maximum size of a single uploaded file in megabytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size_mb: u64,
}

fn default_storage_path() -> String {
    "data/objects".to_string()
}

fn default_presign_base_url() -> String {
    "http://localhost:8080/objects".to_string()
}

fn default_presign_ttl() -> u64 {
    900
}

fn default_max_upload_size() -> u64 {
    100
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            presign_base_url: default_presign_base_url(),
            presign_secret: String::new(),
            presign_ttl_secs: default_presign_ttl(),
            max_upload_size_mb: default_max_upload_size(),
        }
    }
}

/// Default quota ceilings, in megabytes, per root category.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_personal_quota")]
    pub personal_mb: i64,
    #[serde(default = "default_temporary_quota")]
    pub temporary_mb: i64,
    #[serde(default = "default_organizational_quota")]
    pub organizational_mb: i64,
    #[serde(default = "default_shared_quota")]
    pub shared_mb: i64,
}

fn default_personal_quota() -> i64 {
    1024
}

fn default_temporary_quota() -> i64 {
    256
}

fn default_organizational_quota() -> i64 {
    10 * 1024
}

fn default_shared_quota() -> i64 {
    5 * 1024
}

impl QuotaConfig {
    /// Default ceiling in bytes for a newly created root of the given category.
    pub fn default_max_bytes(&self, category: RootCategory) -> i64 {
        let mb = match category {
            RootCategory::Personal => self.personal_mb,
            RootCategory::PersonalTemporary => self.temporary_mb,
            RootCategory::Organizational => self.organizational_mb,
            RootCategory::Shared => self.shared_mb,
        };
        mb * 1024 * 1024
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            personal_mb: default_personal_quota(),
            temporary_mb: default_temporary_quota(),
            organizational_mb: default_organizational_quota(),
            shared_mb: default_shared_quota(),
        }
    }
}

/// Batch fan-out configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Maximum number of object-store calls in flight per batch.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Timeout for a single object-store call in seconds.
    #[serde(default = "default_object_timeout")]
    pub object_timeout_secs: u64,
}

fn default_max_concurrency() -> usize {
    8
}

fn default_object_timeout() -> u64 {
    30
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            object_timeout_secs: default_object_timeout(),
        }
    }
}

/// Expiry configuration for personal-temporary roots.
#[derive(Debug, Clone, Deserialize)]
pub struct ExpiryConfig {
    /// Lifetime of files uploaded into a temporary root, in hours.
    #[serde(default = "default_temporary_ttl")]
    pub temporary_ttl_hours: i64,
    /// How often the reaper runs, in seconds.
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,
}

fn default_temporary_ttl() -> i64 {
    24
}

fn default_reaper_interval() -> u64 {
    300 // 5 minutes
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            temporary_ttl_hours: default_temporary_ttl(),
            reaper_interval_secs: default_reaper_interval(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/arbor.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Metadata store configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Object store configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Quota defaults.
    #[serde(default)]
    pub quota: QuotaConfig,
    /// Batch fan-out limits.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Temporary-root expiry.
    #[serde(default)]
    pub expiry: ExpiryConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ArborError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| ArborError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `ARBOR_DATABASE_PATH`: Override the database path
    /// - `ARBOR_PRESIGN_SECRET`: Override the presigned URL secret
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("ARBOR_DATABASE_PATH") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
        if let Ok(secret) = std::env::var("ARBOR_PRESIGN_SECRET") {
            if !secret.is_empty() {
                self.storage.presign_secret = secret;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.storage.presign_secret.is_empty() {
            return Err(ArborError::Config(
                "storage.presign_secret is not set. \
                 Set it in config.toml or via ARBOR_PRESIGN_SECRET environment variable."
                    .to_string(),
            ));
        }
        if self.batch.max_concurrency == 0 {
            return Err(ArborError::Config(
                "batch.max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.database.path, "data/arbor.db");
        assert_eq!(config.database.max_connections, 5);

        assert_eq!(config.storage.path, "data/objects");
        assert_eq!(config.storage.presign_ttl_secs, 900);
        assert!(config.storage.presign_secret.is_empty());
        assert_eq!(config.storage.max_upload_size_mb, 100);

        assert_eq!(config.quota.personal_mb, 1024);
        assert_eq!(config.quota.temporary_mb, 256);

        assert_eq!(config.batch.max_concurrency, 8);
        assert_eq!(config.batch.object_timeout_secs, 30);

        assert_eq!(config.expiry.temporary_ttl_hours, 24);
        assert_eq!(config.expiry.reaper_interval_secs, 300);

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file, "logs/arbor.log");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[database]
path = "custom/meta.sqlite"
max_connections = 2

[storage]
path = "custom/objects"
presign_base_url = "https://files.example.com/o"
presign_secret = "s3cret"
presign_ttl_secs = 60
max_upload_size_mb = 5

[quota]
personal_mb = 10
temporary_mb = 1
organizational_mb = 100
shared_mb = 50

[batch]
max_concurrency = 4
object_timeout_secs = 5

[expiry]
temporary_ttl_hours = 2
reaper_interval_secs = 30

[logging]
level = "debug"
file = "custom/logs/app.log"
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.database.path, "custom/meta.sqlite");
        assert_eq!(config.database.max_connections, 2);
        assert_eq!(config.storage.path, "custom/objects");
        assert_eq!(config.storage.presign_base_url, "https://files.example.com/o");
        assert_eq!(config.storage.presign_secret, "s3cret");
        assert_eq!(config.storage.presign_ttl_secs, 60);
        assert_eq!(config.storage.max_upload_size_mb, 5);
        assert_eq!(config.quota.shared_mb, 50);
        assert_eq!(config.batch.max_concurrency, 4);
        assert_eq!(config.batch.object_timeout_secs, 5);
        assert_eq!(config.expiry.temporary_ttl_hours, 2);
        assert_eq!(config.expiry.reaper_interval_secs, 30);
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[batch]
max_concurrency = 2
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.batch.max_concurrency, 2);
        assert_eq!(config.batch.object_timeout_secs, 30);
        assert_eq!(config.database.path, "data/arbor.db");
    }

    #[test]
    fn test_parse_invalid_config() {
        let result = Config::parse("this is not valid toml [[[");

        assert!(result.is_err());
        if let Err(ArborError::Config(msg)) = result {
            assert!(msg.contains("config parse error"));
        } else {
            panic!("Expected Config error");
        }
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load("nonexistent.toml");
        assert!(matches!(result, Err(ArborError::Io(_))));
    }

    #[test]
    fn test_quota_default_max_bytes() {
        let quota = QuotaConfig::default();
        assert_eq!(
            quota.default_max_bytes(RootCategory::Personal),
            1024 * 1024 * 1024
        );
        assert_eq!(
            quota.default_max_bytes(RootCategory::PersonalTemporary),
            256 * 1024 * 1024
        );
    }

    #[test]
    fn test_apply_env_overrides_presign_secret() {
        let original = std::env::var("ARBOR_PRESIGN_SECRET").ok();

        std::env::set_var("ARBOR_PRESIGN_SECRET", "env-secret");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.storage.presign_secret, "env-secret");

        std::env::set_var("ARBOR_PRESIGN_SECRET", "");
        let mut config = Config::default();
        config.storage.presign_secret = "original".to_string();
        config.apply_env_overrides();
        assert_eq!(config.storage.presign_secret, "original");

        if let Some(val) = original {
            std::env::set_var("ARBOR_PRESIGN_SECRET", val);
        } else {
            std::env::remove_var("ARBOR_PRESIGN_SECRET");
        }
    }

    #[test]
    fn test_validate_requires_secret() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(ArborError::Config(_))));
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let mut config = Config::default();
        config.storage.presign_secret = "secret".to_string();
        config.batch.max_concurrency = 0;
        assert!(config.validate().is_err());
    }
}
