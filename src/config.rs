//! Configuration management for modelmesh.
//!
//! Loads settings from `~/.config/modelmesh/config.toml` with environment overrides.

use crate::router::RoutingStrategy;
use crate::store::FileConfigStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterConfig {
    #[serde(default)]
    pub strategy: RoutingStrategy,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Model ids in `backend:model` or plain form; plain ids are resolved by the manager.
    #[serde(default)]
    pub enabled_models: Vec<String>,
}

impl RouterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default = "default_verbosity")]
    pub log_verbosity: LogVerbosity,
    #[serde(default)]
    pub json_logs: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogVerbosity {
    Minimal,
    #[default]
    Compact,
    Verbose,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StoreConfig {
    /// Backend store file. Defaults to `~/.config/modelmesh/backends.toml`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(FileConfigStore::default_path)
    }
}

// Default value functions
fn default_max_retries() -> u32 { DEFAULT_MAX_RETRIES }
fn default_timeout_secs() -> u64 { DEFAULT_TIMEOUT_SECS }
fn default_retry_delay_ms() -> u64 { DEFAULT_RETRY_DELAY_MS }
fn default_verbosity() -> LogVerbosity { LogVerbosity::Compact }

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::default(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            retry_delay_ms: default_retry_delay_ms(),
            enabled_models: Vec::new(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_verbosity: default_verbosity(),
            json_logs: false,
        }
    }
}

impl Config {
    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("modelmesh")
            .join("config.toml")
    }

    /// Load config from file, falling back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::default_path())
    }

    /// Load config with environment overrides applied (convenience method).
    pub fn load_with_env() -> Self {
        Self::load().unwrap_or_default().with_env_overrides()
    }

    /// Load config from a specific path.
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    /// Apply environment variable overrides. Unparseable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("MODELMESH_STRATEGY") {
            if let Ok(strategy) = val.parse() {
                self.router.strategy = strategy;
            }
        }
        if let Ok(val) = std::env::var("MODELMESH_MAX_RETRIES") {
            if let Ok(retries) = val.parse() {
                self.router.max_retries = retries;
            }
        }
        if let Ok(val) = std::env::var("MODELMESH_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                self.router.timeout_secs = secs;
            }
        }
        if let Ok(val) = std::env::var("MODELMESH_STORE_PATH") {
            self.store.path = Some(PathBuf::from(val));
        }
        self
    }

    /// Save config to file.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(Self::default_path())
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(&path, content).map_err(ConfigError::Io)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Parse error: {0}")]
    Parse(toml::de::Error),
    #[error("Serialize error: {0}")]
    Serialize(toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn loads_config_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");

        fs::write(&config_path, r#"
[router]
strategy = "fastest_first"
max_retries = 5
enabled_models = ["openrouter:qwen/qwen3-8b:free", "gpt-4o-mini"]

[store]
path = "/tmp/modelmesh/backends.toml"
"#).unwrap();

        let config = Config::load_from(config_path).unwrap();

        assert_eq!(config.router.strategy, RoutingStrategy::FastestFirst);
        assert_eq!(config.router.max_retries, 5);
        assert_eq!(config.router.timeout_secs, 30);
        assert_eq!(config.router.enabled_models.len(), 2);
        assert_eq!(config.store.resolved_path(), PathBuf::from("/tmp/modelmesh/backends.toml"));
    }

    #[test]
    fn returns_defaults_when_file_missing() {
        let config = Config::load_from(PathBuf::from("/nonexistent/path/config.toml")).unwrap();

        assert_eq!(config.router.strategy, RoutingStrategy::RoundRobin);
        assert_eq!(config.router.max_retries, 3);
        assert_eq!(config.router.timeout(), Duration::from_secs(30));
        assert_eq!(config.router.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.app.log_verbosity, LogVerbosity::Compact);
        assert!(!config.app.json_logs);
        assert_eq!(config.store.path, None);
    }

    #[test]
    fn env_overrides_take_precedence_over_file() {
        std::env::remove_var("MODELMESH_MAX_RETRIES");

        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");

        fs::write(&config_path, r#"
[router]
max_retries = 7
"#).unwrap();

        let config_from_file = Config::load_from(config_path.clone()).unwrap();
        assert_eq!(config_from_file.router.max_retries, 7);

        std::env::set_var("MODELMESH_MAX_RETRIES", "2");
        let config = Config::load_from(config_path).unwrap().with_env_overrides();

        assert_eq!(config.router.max_retries, 2);

        std::env::remove_var("MODELMESH_MAX_RETRIES");
    }

    #[test]
    fn overrides_strategy_and_timeout_from_environment() {
        std::env::set_var("MODELMESH_STRATEGY", "least_used");
        std::env::set_var("MODELMESH_TIMEOUT_SECS", "12");

        let config = Config::default().with_env_overrides();

        assert_eq!(config.router.strategy, RoutingStrategy::LeastUsed);
        assert_eq!(config.router.timeout_secs, 12);

        std::env::remove_var("MODELMESH_STRATEGY");
        std::env::remove_var("MODELMESH_TIMEOUT_SECS");
    }

    #[test]
    fn saves_config_to_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");

        let config = Config {
            router: RouterConfig {
                strategy: RoutingStrategy::Failover,
                enabled_models: vec!["m1".to_string(), "m2".to_string()],
                ..RouterConfig::default()
            },
            ..Config::default()
        };

        config.save_to(config_path.clone()).unwrap();

        let loaded = Config::load_from(config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn creates_parent_directories_when_saving() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("nested").join("deep").join("config.toml");

        let config = Config::default();
        config.save_to(config_path.clone()).unwrap();

        assert!(config_path.exists());
    }

    #[test]
    fn parses_all_log_verbosity_levels() {
        let dir = tempfile::tempdir().unwrap();

        for (value, expected) in [
            ("minimal", LogVerbosity::Minimal),
            ("compact", LogVerbosity::Compact),
            ("verbose", LogVerbosity::Verbose),
        ] {
            let config_path = dir.path().join(format!("config_{}.toml", value));
            fs::write(&config_path, format!(r#"
[app]
log_verbosity = "{}"
"#, value)).unwrap();

            let config = Config::load_from(config_path).unwrap();
            assert_eq!(config.app.log_verbosity, expected);
        }
    }

    #[test]
    fn rejects_unknown_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "[router]\nstrategy = \"cheapest\"\n").unwrap();

        assert!(matches!(Config::load_from(config_path), Err(ConfigError::Parse(_))));
    }
}
