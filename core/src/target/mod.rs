// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Resolves a target name to a concrete, environment-interpolated
//! configuration the dispatcher can hand to [`crate::providers::ProviderFactory`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::TargetConfig;

/// Target kinds that run a local agent process rather than calling an HTTP
/// endpoint; these require exactly one of `workspace_template` or `cwd`.
const WORKSPACE_BACKED_KINDS: &[&str] = &["cli", "claude-code", "codex", "copilot-cli", "pi-coding-agent"];

/// Errors resolving a target's declared configuration.
#[derive(Debug, Error)]
pub enum TargetResolverError {
    /// The named target has no entry in the loaded suite's target map.
    #[error("unknown target: {0}")]
    UnknownTarget(String),
    /// A `${{ VAR_NAME }}` interpolation referenced an unset environment variable.
    #[error("unresolved environment variable in target config: {0}")]
    UnresolvedEnvVar(String),
    /// A workspace-backed target declared both or neither of
    /// `workspaceTemplate` and `cwd`.
    #[error("target {target} ({kind}) must declare exactly one of workspaceTemplate or cwd")]
    ExclusiveWorkspaceField {
        /// The target's name.
        target: String,
        /// The target's kind.
        kind: String,
    },
}

/// A target's declarative configuration, as loaded from a suite file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// The adapter kind (`"http"`, `"static"`, `"cli"`, `"claude-code"`, …).
    pub kind: String,
    /// Free-form, kind-specific configuration, interpolated before use.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Worker-pool override for this target; falls back to the run-wide default.
    #[serde(default)]
    pub workers: Option<usize>,
    /// Whether the dispatcher may batch multiple cases into one provider call.
    #[serde(default, rename = "providerBatching")]
    pub provider_batching: Option<bool>,
    /// The target name to use for judge-model calls, if different from this one.
    #[serde(default, rename = "judgeTarget")]
    pub judge_target: Option<String>,
    /// A directory to clone as the agent's workspace seed.
    #[serde(default, rename = "workspaceTemplate")]
    pub workspace_template: Option<PathBuf>,
    /// An existing directory to run the agent in directly.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl From<&TargetConfig> for TargetDescriptor {
    /// Builds a suite-resolver [`TargetDescriptor`] from a config-file target
    /// entry, collapsing its typed `http`-shaped fields into the free-form
    /// `config` object the resolver interpolates against every other kind.
    fn from(target: &TargetConfig) -> Self {
        let mut config = serde_json::Map::new();
        if let Some(base_url) = &target.base_url {
            config.insert("base_url".to_string(), serde_json::Value::String(base_url.clone()));
        }
        if let Some(api_key_env) = &target.api_key_env {
            config.insert("api_key_env".to_string(), serde_json::Value::String(api_key_env.clone()));
        }
        if let Some(model) = &target.model {
            config.insert("model".to_string(), serde_json::Value::String(model.clone()));
        }
        config.insert("timeout_seconds".to_string(), serde_json::Value::from(target.timeout_seconds));

        Self {
            kind: target.kind.clone(),
            config: serde_json::Value::Object(config),
            workers: target.workers,
            provider_batching: target.provider_batching.map(|n| n > 0),
            judge_target: target.judge_target.clone(),
            workspace_template: target.workspace_template.clone(),
            cwd: target.cwd.clone(),
        }
    }
}

/// A target after environment interpolation and validation.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    /// The adapter kind.
    pub kind: String,
    /// The interpolated, kind-specific configuration.
    pub config: serde_json::Value,
    /// The effective worker count for this target.
    pub workers: Option<usize>,
    /// Whether provider batching is enabled.
    pub provider_batching: bool,
    /// The target name to resolve for judge-model calls, if distinct.
    pub judge_target: Option<String>,
}

/// Resolves target names against a loaded suite's target map.
pub struct TargetResolver {
    targets: BTreeMap<String, TargetDescriptor>,
}

impl TargetResolver {
    /// Builds a resolver over a suite's declared targets.
    #[must_use]
    pub fn new(targets: BTreeMap<String, TargetDescriptor>) -> Self {
        Self { targets }
    }

    /// Resolves `name` into a fully interpolated [`ResolvedTarget`].
    ///
    /// # Errors
    ///
    /// Returns [`TargetResolverError::UnknownTarget`] if `name` isn't
    /// declared, [`TargetResolverError::UnresolvedEnvVar`] if the config
    /// references an environment variable that isn't set, and
    /// [`TargetResolverError::ExclusiveWorkspaceField`] if a workspace-backed
    /// kind declares both or neither of `workspaceTemplate`/`cwd`.
    pub fn resolve(&self, name: &str) -> Result<ResolvedTarget, TargetResolverError> {
        let descriptor = self
            .targets
            .get(name)
            .ok_or_else(|| TargetResolverError::UnknownTarget(name.to_string()))?;

        if WORKSPACE_BACKED_KINDS.contains(&descriptor.kind.as_str())
            && descriptor.workspace_template.is_some() == descriptor.cwd.is_some()
        {
            return Err(TargetResolverError::ExclusiveWorkspaceField {
                target: name.to_string(),
                kind: descriptor.kind.clone(),
            });
        }

        let mut config = interpolate_env(&descriptor.config)?;
        normalize_api_version(&mut config);

        Ok(ResolvedTarget {
            kind: descriptor.kind.clone(),
            config,
            workers: descriptor.workers,
            provider_batching: descriptor.provider_batching.unwrap_or(false),
            judge_target: descriptor.judge_target.clone(),
        })
    }
}

static ENV_VAR_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

fn interpolate_env(value: &serde_json::Value) -> Result<serde_json::Value, TargetResolverError> {
    match value {
        serde_json::Value::String(s) => Ok(serde_json::Value::String(interpolate_string(s)?)),
        serde_json::Value::Array(items) => {
            let resolved: Result<Vec<_>, _> = items.iter().map(interpolate_env).collect();
            Ok(serde_json::Value::Array(resolved?))
        }
        serde_json::Value::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                resolved.insert(k.clone(), interpolate_env(v)?);
            }
            Ok(serde_json::Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn interpolate_string(input: &str) -> Result<String, TargetResolverError> {
    if !ENV_VAR_PATTERN.is_match(input) {
        return Ok(input.to_string());
    }
    let mut unresolved = None;
    let replaced = ENV_VAR_PATTERN.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match std::env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                unresolved.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });
    match unresolved {
        Some(name) => Err(TargetResolverError::UnresolvedEnvVar(name)),
        None => Ok(replaced.into_owned()),
    }
}

/// Strips a pasted `api-version=` query-parameter prefix from an Azure-style
/// version string, e.g. `api-version=2024-02-01` -> `2024-02-01`.
fn normalize_api_version(config: &mut serde_json::Value) {
    let Some(map) = config.as_object_mut() else {
        return;
    };
    for key in ["api_version", "apiVersion"] {
        if let Some(serde_json::Value::String(s)) = map.get_mut(key) {
            if let Some(stripped) = s.strip_prefix("api-version=") {
                *s = stripped.to_string();
            }
        }
    }
}
