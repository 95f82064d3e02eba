// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Constructs provider instances from a target's declared configuration.
//!
//! Concrete vendor adapters (Azure, Anthropic, Gemini, CLI, Codex,
//! Claude Code, …) are out of scope for this core; the factory exposes the
//! two reference adapters it does own (`http`, `static`) and fails
//! construction for any other kind, the same way the evaluator factory
//! fails on an unknown [`crate::evaluators::EvaluatorConfig`] tag.

use std::sync::Arc;
use std::time::Duration;

use super::{HttpProvider, HttpProviderConfig, Provider, ProviderError, StaticProvider};
use crate::model::ProviderResponse;

/// Declarative provider configuration, as resolved by the target resolver.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Which adapter to construct (`"http"` or `"static"`).
    pub kind: String,
    /// Base URL, for `http`.
    pub base_url: Option<String>,
    /// Environment variable holding the API key, for `http`.
    pub api_key_env: Option<String>,
    /// Model identifier, for `http`.
    pub model: Option<String>,
    /// Request timeout in seconds, for `http`.
    pub timeout_seconds: u64,
    /// Pre-recorded fixture responses, for `static`.
    pub fixture_responses: Vec<ProviderResponse>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: "http".into(),
            base_url: None,
            api_key_env: None,
            model: None,
            timeout_seconds: 60,
            fixture_responses: Vec::new(),
        }
    }
}

/// Builds [`Provider`] instances by kind.
#[derive(Debug, Default)]
pub struct ProviderFactory;

impl ProviderFactory {
    /// Creates a new factory.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Constructs a provider instance from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidRequest`] for an unknown `kind`, or
    /// [`ProviderError::AuthenticationError`] when `http` is missing its API
    /// key environment variable.
    pub fn create(&self, name: &str, config: &ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> {
        match config.kind.as_str() {
            "http" => {
                let api_key_env = config
                    .api_key_env
                    .as_deref()
                    .ok_or_else(|| ProviderError::InvalidRequest("http provider requires api_key_env".into()))?;
                let api_key = std::env::var(api_key_env)
                    .map_err(|_| ProviderError::AuthenticationError(format!("{api_key_env} is not set")))?;
                let base_url = config
                    .base_url
                    .clone()
                    .ok_or_else(|| ProviderError::InvalidRequest("http provider requires base_url".into()))?;
                let model = config
                    .model
                    .clone()
                    .ok_or_else(|| ProviderError::InvalidRequest("http provider requires model".into()))?;
                let provider = HttpProvider::new(
                    name,
                    HttpProviderConfig {
                        base_url,
                        api_key,
                        model,
                        timeout: Duration::from_secs(config.timeout_seconds),
                    },
                )?;
                Ok(Box::new(provider))
            }
            "static" => Ok(Box::new(StaticProvider::new(name, config.fixture_responses.clone()))),
            other => Err(ProviderError::InvalidRequest(format!(
                "unknown provider kind: {other} (supported: http, static)"
            ))),
        }
    }

    /// Constructs a provider and wraps it for shared ownership across workers.
    ///
    /// # Errors
    ///
    /// See [`ProviderFactory::create`].
    pub fn create_shared(&self, name: &str, config: &ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> {
        Ok(Arc::from(self.create(name, config)?))
    }
}
