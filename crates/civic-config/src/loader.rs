//! Configuration loader with layered sources.

use crate::AppConfig;
use civic_core::CivicError;
use config::{Config, ConfigError, Environment, File};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Environment variable selecting the environment-specific file.
pub const ENVIRONMENT_VAR: &str = "CIVIC_ENVIRONMENT";

/// Configuration loader with runtime refresh support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    config_dir: String,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `{dir}/default.toml` - Default values
    /// 2. `{dir}/{environment}.toml` - Environment-specific overrides
    /// 3. `{dir}/local.toml` - Local overrides
    /// 4. Environment variables with `CIVIC__` prefix, `__` as separator
    pub fn new(config_dir: impl Into<String>) -> Result<Self, CivicError> {
        let config_dir = config_dir.into();
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file loaded: {}", e);
        }
        let environment =
            std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| "development".to_string());
        let config = Self::load_config(&config_dir, &environment)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> Result<Self, CivicError> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk.
    pub async fn reload(&self) -> Result<(), CivicError> {
        let environment = self.config.read().await.app.environment.clone();
        let new_config = Self::load_config(&self.config_dir, &environment)?;
        *self.config.write().await = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Loads and validates configuration for `environment` from `config_dir`.
    pub fn load_config(config_dir: &str, environment: &str) -> Result<AppConfig, CivicError> {
        info!(environment, config_dir, "Loading configuration");

        let mut builder = Config::builder()
            .set_override("app.environment", environment)
            .map_err(config_error)?;

        for name in ["default", environment, "local"] {
            let path = format!("{}/{}.toml", config_dir, name);
            if Path::new(&path).exists() {
                debug!("Loading config from: {}", path);
                builder = builder.add_source(File::with_name(&path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("CIVIC")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let app_config: AppConfig = builder
            .build()
            .map_err(config_error)?
            .try_deserialize()
            .map_err(config_error)?;

        Self::validate_config(&app_config)?;
        Ok(app_config)
    }

    /// Validates the configuration.
    fn validate_config(config: &AppConfig) -> Result<(), CivicError> {
        config.jobs.validate()?;

        if config.app_api.base_url.trim().is_empty() {
            return Err(CivicError::Configuration("App API base URL is required".to_string()));
        }

        if config.app.is_production() && config.app_api.token.is_none() {
            warn!("No app API token configured in production");
        }

        Ok(())
    }

    /// Gets a specific configuration value by key path.
    pub async fn get_value<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let config = self.config.read().await;
        let json = serde_json::to_value(&*config).ok()?;

        let mut current = &json;
        for part in key.split('.') {
            current = current.get(part)?;
        }

        serde_json::from_value(current.clone()).ok()
    }
}

fn config_error(err: ConfigError) -> CivicError {
    CivicError::Configuration(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_missing_directory_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let config = ConfigLoader::load_config(missing.to_str().unwrap(), "test").unwrap();
        assert_eq!(config.app.environment, "test");
        assert_eq!(config.jobs.redis.url, "redis://localhost:6379");
        assert_eq!(config.jobs.queues.notifications.concurrency, 5);
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config");
        let config = ConfigLoader::load_config(dir, "production").unwrap();
        assert!(config.logging.json);
        assert_eq!(config.jobs.queues.report_processing.concurrency, 2);
        assert_eq!(config.jobs.dead_letter.requeue_options().attempts, 3);
        assert_eq!(config.jobs.metrics.refresh_interval_secs, 10);
    }

    #[test]
    fn test_environment_file_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "default.toml",
            "[jobs.redis]\nurl = \"redis://default:6379\"\n\n[server]\nhost = \"127.0.0.1\"\nport = 9000\nrequest_timeout_secs = 10\ncors_enabled = false\n",
        );
        write(
            dir.path(),
            "staging.toml",
            "[jobs.redis]\nurl = \"redis://staging:6379\"\n\n[jobs.queues.report_processing]\nconcurrency = 4\n",
        );

        let config = ConfigLoader::load_config(dir.path().to_str().unwrap(), "staging").unwrap();
        assert_eq!(config.jobs.redis.url, "redis://staging:6379");
        assert_eq!(config.jobs.queues.report_processing.concurrency, 4);
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_local_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "default.toml", "[app_api]\nbase_url = \"http://a\"\ntimeout_secs = 5\n");
        write(dir.path(), "local.toml", "[app_api]\nbase_url = \"http://b\"\ntimeout_secs = 7\n");

        let config = ConfigLoader::load_config(dir.path().to_str().unwrap(), "development").unwrap();
        assert_eq!(config.app_api.base_url, "http://b");
        assert_eq!(config.app_api.timeout_secs, 7);
    }

    #[test]
    fn test_invalid_worker_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "default.toml", "[jobs.queues.notifications]\nconcurrency = 0\n");

        let err = ConfigLoader::load_config(dir.path().to_str().unwrap(), "development").unwrap_err();
        assert!(matches!(err, CivicError::Configuration(_)));
        assert!(err.to_string().contains("notifications"));
    }

    #[tokio::test]
    async fn test_get_value_by_path() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "default.toml", "[jobs.dead_letter]\nkey_prefix = \"test:dlq\"\n");
        let loader = ConfigLoader::new(dir.path().to_str().unwrap()).unwrap();

        let prefix: Option<String> = loader.get_value("jobs.dead_letter.key_prefix").await;
        assert_eq!(prefix.as_deref(), Some("test:dlq"));
        let missing: Option<String> = loader.get_value("jobs.nothing.here").await;
        assert!(missing.is_none());

        loader.reload().await.unwrap();
        assert_eq!(loader.get().await.jobs.dead_letter.key_prefix, "test:dlq");
    }
}
