// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Configuration data structures for AgentV.
//!
//! Covers dispatcher tunables, judge-proxy defaults, judge-model selection,
//! and declarative target definitions — never suite content, which the
//! (out-of-scope) suite loader owns.

use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration structure for AgentV.
///
/// Configuration sources are merged in this precedence (highest to lowest):
/// 1. CLI arguments
/// 2. Environment variables (`AGENTV_` prefix)
/// 3. Config file (`$XDG_CONFIG_HOME/agentv/config.toml`)
/// 4. Defaults
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Declarative target definitions, keyed by target name.
    pub targets: HashMap<String, TargetConfig>,

    /// Dispatcher scheduling defaults.
    #[validate]
    pub dispatcher: DispatcherSettings,

    /// Judge-proxy defaults (§4.H).
    #[validate]
    pub judge_proxy: JudgeProxySettings,

    /// Judge-model selection, used when an evaluator config doesn't name
    /// its own judge target.
    pub judge: JudgeSettings,

    /// Global timeout override applied to every target lacking its own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_timeout_seconds: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let mut targets = HashMap::new();
        targets.insert(
            "default".to_string(),
            TargetConfig {
                kind: "http".to_string(),
                base_url: Some("https://api.openai.com/v1".to_string()),
                api_key_env: Some("OPENAI_API_KEY".to_string()),
                model: Some("gpt-4-turbo".to_string()),
                timeout_seconds: 60,
                workers: None,
                provider_batching: None,
                judge_target: None,
                workspace_template: None,
                cwd: None,
            },
        );

        Self {
            targets,
            dispatcher: DispatcherSettings::default(),
            judge_proxy: JudgeProxySettings::default(),
            judge: JudgeSettings::default(),
            global_timeout_seconds: None,
        }
    }
}

/// One target's declarative configuration, as consumed by the target
/// resolver (§4.L) to build a [`crate::providers::factory::ProviderConfig`].
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct TargetConfig {
    /// The provider kind to construct (`"http"`, `"static"`; vendor kinds
    /// are named extension points, not implemented by this core).
    #[validate(min_length = 1)]
    pub kind: String,

    /// Base URL, for `http` targets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Environment variable holding the API key, for `http` targets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Model identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Request timeout, in seconds.
    #[validate(minimum = 1)]
    #[validate(maximum = 300)]
    pub timeout_seconds: u64,

    /// Per-target worker override. Falls back to `dispatcher.workers`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Preferred batch size, for providers that support `invoke_batch`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_batching: Option<usize>,

    /// An alternate target to use as the judge provider for this target's
    /// cases, instead of the candidate provider itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judge_target: Option<String>,

    /// Workspace template directory, for targets that materialize one.
    /// Mutually exclusive with `cwd` (§4.L).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_template: Option<PathBuf>,

    /// A fixed working directory, for targets that run in place rather
    /// than a materialized workspace. Mutually exclusive with
    /// `workspace_template`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

/// Dispatcher scheduling defaults (§4.I, §5), overridable per run by CLI
/// flags.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default)]
pub struct DispatcherSettings {
    /// Default worker pool size.
    #[validate(minimum = 1)]
    #[validate(maximum = 256)]
    pub workers: usize,

    /// Per-attempt wall-clock budget, in milliseconds.
    #[validate(minimum = 1000)]
    pub attempt_timeout_ms: u64,

    /// Maximum provider-level retries on a retryable error.
    #[validate(maximum = 10)]
    pub max_retries: u32,

    /// Base retry delay, in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Retry backoff ceiling, in milliseconds.
    pub retry_max_delay_ms: u64,

    /// Grace period given to in-flight work after cancellation, in
    /// milliseconds.
    pub grace_period_ms: u64,

    /// Whether the first failing verdict cancels the remaining run.
    pub fail_fast: bool,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            attempt_timeout_ms: 120_000,
            max_retries: 2,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            grace_period_ms: 5_000,
            fail_fast: false,
        }
    }
}

/// Judge-proxy defaults (§4.H): the loopback HTTP service code-judge
/// subprocesses use to reach the judge provider under a call budget.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default)]
pub struct JudgeProxySettings {
    /// Maximum `/invoke` (or batched-equivalent) calls per code-judge
    /// invocation before the proxy starts returning 429.
    #[validate(minimum = 1)]
    pub max_calls: u32,

    /// Grace period for the proxy to shut down once the evaluator's
    /// cleanup path closes it, in milliseconds.
    pub shutdown_grace_ms: u64,
}

impl Default for JudgeProxySettings {
    fn default() -> Self {
        Self {
            max_calls: 50,
            shutdown_grace_ms: 2_000,
        }
    }
}

/// Judge-model selection: which target (or bare model) LLM-judge, code-
/// judge, and composite evaluators resolve against when a case's own
/// `evaluator_configs` don't name one explicitly.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default)]
pub struct JudgeSettings {
    /// The target name to resolve as the default judge provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// A model identifier override, when the judge target's own model
    /// should not be used verbatim (e.g. a cheaper judge model).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            target: None,
            model: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_config_has_a_default_target() {
        let config = Config::default();
        assert!(config.targets.contains_key("default"));
    }

    #[test]
    fn target_config_validation() {
        let target = TargetConfig {
            kind: "http".to_string(),
            base_url: Some("https://api.example.com".to_string()),
            api_key_env: Some("TEST_KEY".to_string()),
            model: Some("test-model".to_string()),
            timeout_seconds: 30,
            workers: None,
            provider_batching: None,
            judge_target: None,
            workspace_template: None,
            cwd: None,
        };
        assert!(target.validate().is_ok());
    }

    #[test]
    fn dispatcher_settings_default_matches_runtime_defaults() {
        let settings = DispatcherSettings::default();
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.max_retries, 2);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn judge_proxy_settings_default_max_calls_is_fifty() {
        let settings = JudgeProxySettings::default();
        assert_eq!(settings.max_calls, 50);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn config_serialization_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).expect("failed to serialize");
        let deserialized: Config = toml::from_str(&toml_str).expect("failed to deserialize");
        assert_eq!(config, deserialized);
    }
}
