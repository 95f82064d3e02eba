// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Configuration management for AgentV.
//!
//! Hierarchical precedence, highest wins:
//! 1. CLI arguments (applied by the caller after [`ConfigLoader::load`])
//! 2. Environment variables (prefixed `AGENTV_`)
//! 3. Config file (`$XDG_CONFIG_HOME/agentv/config.toml`, or a path given
//!    explicitly)
//! 4. Defaults
//!
//! # Examples
//!
//! ```no_run
//! use agentv_core::config::ConfigLoader;
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = ConfigLoader::new().load()?;
//! let config = ConfigLoader::new().with_file("/path/to/config.toml").load()?;
//! # Ok(())
//! # }
//! ```

pub mod models;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde_valid::Validate;
use std::path::{Path, PathBuf};

pub use models::{Config, DispatcherSettings, JudgeProxySettings, JudgeSettings, TargetConfig};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default configuration directory name.
const CONFIG_DIR_NAME: &str = "agentv";

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "AGENTV";

/// Environment variable separator for nested configuration.
/// Example: `AGENTV_DISPATCHER__WORKERS`.
const ENV_SEPARATOR: &str = "__";

/// Configuration loader with builder pattern.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    custom_file: Option<PathBuf>,
    skip_default_file: bool,
    skip_env: bool,
}

impl ConfigLoader {
    /// Creates a new configuration loader with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `path` instead of the default config file location.
    #[must_use]
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.custom_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Skips loading from the default configuration file.
    #[must_use]
    pub fn skip_default_file(mut self) -> Self {
        self.skip_default_file = true;
        self
    }

    /// Skips loading from environment variables.
    #[must_use]
    pub fn skip_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Loads the configuration from all enabled sources, in precedence
    /// order: defaults, config file, environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file fails to parse, an environment
    /// variable has an invalid format, or the merged configuration fails
    /// [`serde_valid::Validate`].
    pub fn load(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::builder();

        let defaults = Config::default();
        let defaults_map = config_to_map(&defaults)?;
        builder = builder.add_source(config::Config::try_from(&defaults_map)?);

        if !self.skip_default_file {
            if let Some(config_path) = self.find_config_file() {
                tracing::debug!(path = %config_path.display(), "loading config file");
                builder = builder.add_source(File::from(config_path).required(false).format(config::FileFormat::Toml));
            } else {
                tracing::debug!("no default config file found");
            }
        }

        if let Some(ref custom_path) = self.custom_file {
            tracing::info!(path = %custom_path.display(), "loading custom config file");
            builder = builder.add_source(File::from(custom_path.as_ref()).required(true).format(config::FileFormat::Toml));
        }

        if !self.skip_env {
            tracing::debug!("loading config from environment variables");
            builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR).try_parsing(true));
        }

        let config_result = builder.build().context("failed to build configuration")?;
        let config: Config = config_result.try_deserialize().context("failed to deserialize configuration")?;

        config.validate().map_err(|e| anyhow::anyhow!("configuration validation failed: {e}"))?;

        tracing::info!("configuration loaded successfully");
        Ok(config)
    }

    /// Finds the default configuration file, preferring the platform config
    /// directory and falling back to the current directory.
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Some(config_path);
            }
        }

        let local_config = PathBuf::from(CONFIG_FILE_NAME);
        if local_config.exists() {
            return Some(local_config);
        }

        None
    }

    /// The platform-specific configuration directory AgentV's config file
    /// lives in.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME))
    }

    /// The full path where the default config file is expected.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
    }
}

fn config_to_map(config: &Config) -> Result<serde_json::Value, ConfigError> {
    serde_json::to_value(config).map_err(|e| ConfigError::Foreign(Box::new(e)))
}

/// Initializes a default configuration file at the standard location.
///
/// # Errors
///
/// Returns an error if the config directory cannot be determined or
/// created, the file already exists, or it cannot be written.
pub fn init_config_file() -> Result<PathBuf> {
    let config_dir = ConfigLoader::default_config_dir().context("could not determine config directory")?;

    std::fs::create_dir_all(&config_dir).context("failed to create config directory")?;

    let config_path = config_dir.join(CONFIG_FILE_NAME);
    if config_path.exists() {
        anyhow::bail!("config file already exists at: {}", config_path.display());
    }

    let default_config = Config::default();
    let toml_content = toml::to_string_pretty(&default_config).context("failed to serialize default config")?;

    std::fs::write(&config_path, toml_content).context("failed to write config file")?;

    Ok(config_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::TempDir;

    #[test]
    fn load_default_config() {
        let loader = ConfigLoader::new().skip_default_file().skip_env();
        let config = loader.load().expect("failed to load default config");

        assert!(config.targets.contains_key("default"));
        assert_eq!(config.dispatcher.workers, 4);
    }

    #[test]
    fn load_from_custom_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.toml");

        let custom_config = r#"
[targets.default]
kind = "http"
base_url = "https://custom.example.com/v1"
api_key_env = "CUSTOM_API_KEY"
model = "custom-model"
timeout_seconds = 60

[dispatcher]
workers = 10
attempt_timeout_ms = 60000
max_retries = 5
retry_base_delay_ms = 500
retry_max_delay_ms = 30000
grace_period_ms = 5000
fail_fast = true

[judge_proxy]
max_calls = 25
shutdown_grace_ms = 2000

[judge]
        "#;

        std::fs::write(&config_path, custom_config).unwrap();

        let loader = ConfigLoader::new().with_file(&config_path).skip_env();
        let config = loader.load().expect("failed to load custom config");

        let default_target = config.targets.get("default").unwrap();
        assert_eq!(default_target.api_key_env.as_deref(), Some("CUSTOM_API_KEY"));
        assert_eq!(default_target.model.as_deref(), Some("custom-model"));
        assert_eq!(default_target.timeout_seconds, 60);

        assert_eq!(config.dispatcher.workers, 10);
        assert!(config.dispatcher.fail_fast);
        assert_eq!(config.judge_proxy.max_calls, 25);
    }

    #[test]
    fn environment_variable_override() {
        env::set_var("AGENTV_DISPATCHER__WORKERS", "20");
        env::set_var("AGENTV_DISPATCHER__FAIL_FAST", "true");
        env::set_var("AGENTV_JUDGE__MODEL", "claude-3-opus");

        let loader = ConfigLoader::new().skip_default_file();
        let config = loader.load().expect("failed to load config with env vars");

        assert_eq!(config.dispatcher.workers, 20);
        assert!(config.dispatcher.fail_fast);
        assert_eq!(config.judge.model.as_deref(), Some("claude-3-opus"));

        env::remove_var("AGENTV_DISPATCHER__WORKERS");
        env::remove_var("AGENTV_DISPATCHER__FAIL_FAST");
        env::remove_var("AGENTV_JUDGE__MODEL");
    }

    #[test]
    fn validation_failure_invalid_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid_config.toml");

        let invalid_config = r#"
[targets.default]
kind = "http"
base_url = "https://api.example.com/v1"
api_key_env = "OPENAI_API_KEY"
model = "gpt-4"
timeout_seconds = 500
        "#;

        std::fs::write(&config_path, invalid_config).unwrap();

        let loader = ConfigLoader::new().with_file(&config_path).skip_env();
        let result = loader.load();

        assert!(result.is_err());
    }

    #[test]
    fn validation_failure_zero_workers() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid_config.toml");

        let invalid_config = r#"
[dispatcher]
workers = 0
attempt_timeout_ms = 120000
max_retries = 2
retry_base_delay_ms = 500
retry_max_delay_ms = 30000
grace_period_ms = 5000
fail_fast = false
        "#;

        std::fs::write(&config_path, invalid_config).unwrap();

        let loader = ConfigLoader::new().with_file(&config_path).skip_env();
        let result = loader.load();

        assert!(result.is_err());
    }

    #[test]
    fn precedence_env_over_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let file_config = r#"
[dispatcher]
workers = 5
attempt_timeout_ms = 120000
max_retries = 2
retry_base_delay_ms = 500
retry_max_delay_ms = 30000
grace_period_ms = 5000
fail_fast = false
        "#;

        std::fs::write(&config_path, file_config).unwrap();

        env::set_var("AGENTV_DISPATCHER__WORKERS", "15");

        let loader = ConfigLoader::new().with_file(&config_path);
        let config = loader.load().expect("failed to load config");

        assert_eq!(config.dispatcher.workers, 15);

        env::remove_var("AGENTV_DISPATCHER__WORKERS");
    }

    #[test]
    fn default_config_dir_contains_agentv() {
        let config_dir = ConfigLoader::default_config_dir();
        assert!(config_dir.is_some());

        if let Some(dir) = config_dir {
            assert!(dir.to_string_lossy().contains("agentv"));
        }
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let config_path = ConfigLoader::default_config_path();
        assert!(config_path.is_some());

        if let Some(path) = config_path {
            assert!(path.to_string_lossy().ends_with("config.toml"));
        }
    }
}
