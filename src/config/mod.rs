//! Configuration for the dispatch engine.
//!
//! A small serde-typed configuration loaded from YAML with environment
//! overrides on top. Every field has an explicit default so an empty file (or
//! no file at all) yields a runnable configuration; the only value with no
//! sane default is the database URL, which must come from the file or
//! `DATABASE_URL`.
//!
//! ```yaml
//! database:
//!   pool: 10
//! processor:
//!   batch_size: 50
//!   max_attempts: 3
//! executor:
//!   endpoint_url: "https://cloud.example.com/functions/growth-process"
//!   workspace_id: "my-workspace"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{MirrorError, Result};

/// Environment variable naming the YAML config file.
pub const CONFIG_PATH_ENV: &str = "SHADOW_MIRROR_CONFIG";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub database: DatabaseConfig,
    pub processor: ProcessorConfig,
    pub executor: ExecutorConfig,
}

/// Database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres URL. `DATABASE_URL` overrides the file value.
    pub url: Option<String>,
    /// Connection pool size.
    pub pool: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: None, pool: 10 }
    }
}

/// Batch engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Events drained per invocation.
    pub batch_size: i64,
    /// Full processing passes an event may fail before dead-lettering.
    pub max_attempts: i32,
    /// Wall-clock bound on one event's unit of work, so a hung external call
    /// cannot starve the rest of the batch.
    pub event_timeout_seconds: u64,
    /// Per-call bound on the outbound dispatch.
    pub dispatch_timeout_seconds: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_attempts: 3,
            event_timeout_seconds: 30,
            dispatch_timeout_seconds: 10,
        }
    }
}

impl ProcessorConfig {
    #[must_use]
    pub fn event_timeout(&self) -> Duration {
        Duration::from_secs(self.event_timeout_seconds)
    }

    #[must_use]
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_seconds)
    }
}

/// External action executor endpoint and signing material.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// URL the signed dispatch payload is POSTed to.
    pub endpoint_url: String,
    /// HMAC secret shared with the receiver. `SHADOW_MIRROR_SIGNING_SECRET`
    /// overrides the file value.
    pub signing_secret: String,
    /// Caller/tenant identifier sent alongside the signature.
    pub workspace_id: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "http://localhost:54321/functions/v1/growth-process".to_string(),
            signing_secret: String::new(),
            workspace_id: "default".to_string(),
        }
    }
}

impl MirrorConfig {
    /// Load configuration: the file named by `SHADOW_MIRROR_CONFIG` if set,
    /// defaults otherwise, then environment overrides on top.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_yaml_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a YAML config file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MirrorError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw)
            .map_err(|e| MirrorError::Configuration(format!("invalid config YAML: {e}")))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Ok(secret) = std::env::var("SHADOW_MIRROR_SIGNING_SECRET") {
            self.executor.signing_secret = secret;
        }
        if let Ok(url) = std::env::var("SHADOW_MIRROR_EXECUTOR_URL") {
            self.executor.endpoint_url = url;
        }
    }

    /// The database URL, which has no default.
    pub fn database_url(&self) -> Result<&str> {
        self.database.url.as_deref().ok_or_else(|| {
            MirrorError::Configuration(
                "no database URL configured (set database.url or DATABASE_URL)".to_string(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_documentation() {
        let config = MirrorConfig::default();
        assert_eq!(config.processor.batch_size, 50);
        assert_eq!(config.processor.max_attempts, 3);
        assert_eq!(config.processor.event_timeout(), Duration::from_secs(30));
        assert_eq!(config.processor.dispatch_timeout(), Duration::from_secs(10));
        assert_eq!(config.database.pool, 10);
        assert!(config.database.url.is_none());
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let config = MirrorConfig::from_yaml(
            r#"
            processor:
              batch_size: 10
            executor:
              workspace_id: "acme"
            "#,
        )
        .unwrap();
        assert_eq!(config.processor.batch_size, 10);
        assert_eq!(config.processor.max_attempts, 3);
        assert_eq!(config.executor.workspace_id, "acme");
    }

    #[test]
    fn missing_database_url_is_a_configuration_error() {
        let config = MirrorConfig::default();
        assert!(config.database_url().is_err());
    }
}
