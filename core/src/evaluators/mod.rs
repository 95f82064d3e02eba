// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The evaluator interface, its declarative configuration, and the factory
//! that turns one into the other.
//!
//! Evaluators score a candidate answer against a case. They may open
//! external processes or HTTP connections (code-judge, LLM-judge) but MUST
//! release them on every exit path — each evaluator that owns a resource is
//! responsible for its own cleanup, including on the error path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::model::EvaluationContext;

pub mod code_judge;
pub mod composite;
pub mod field_accuracy;
pub mod gates;
pub mod llm_judge;
pub mod tool_trajectory;

pub use code_judge::CodeJudgeEvaluator;
pub use composite::CompositeEvaluator;
pub use field_accuracy::FieldAccuracyEvaluator;
pub use llm_judge::LlmJudgeEvaluator;
pub use tool_trajectory::ToolTrajectoryEvaluator;

/// Errors an [`Evaluator::evaluate`] call can fail with.
#[derive(Debug, Error)]
pub enum EvaluatorError {
    /// The factory was asked to build an evaluator for an unrecognized
    /// [`EvaluatorConfig`] tag.
    #[error("unknown evaluator kind: {0}")]
    UnknownEvaluatorKind(String),

    /// A structured judge response could not be parsed after exhausting
    /// retries.
    #[error("failed to parse evaluator response: {0}")]
    Parse(String),

    /// A code-judge or composite subprocess exited non-zero.
    #[error("evaluator script exited non-zero: {message} (stderr: {stderr_tail})")]
    Script {
        /// A short description of the failure.
        message: String,
        /// The last 2000 characters of the child's stderr.
        stderr_tail: String,
    },

    /// The evaluator's own timeout elapsed (distinct from a provider timeout
    /// or a dispatcher cancellation).
    #[error("evaluator timed out after {0:?}")]
    Timeout(Duration),

    /// A judge-based evaluator ran without a resolved judge provider.
    #[error("evaluator requires a judge provider but none was resolved")]
    MissingJudgeProvider,

    /// An I/O failure while spawning or communicating with a subprocess.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A payload failed to serialize before being handed to a subprocess or
    /// judge provider.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The underlying provider call failed.
    #[error("provider error: {0}")]
    Provider(#[from] crate::providers::ProviderError),
}

/// Evaluates a case's candidate answer against its declared criteria.
///
/// `evaluate` may suspend on external I/O; implementations MUST release any
/// process or connection they open before returning, on every exit path.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Scores one `(case, attempt)` against this evaluator's configuration.
    async fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<crate::model::Score, EvaluatorError>;

    /// This evaluator instance's configured name (distinct from its kind tag).
    fn name(&self) -> &str;

    /// The kind tag this evaluator was constructed from (e.g. `"llm_judge"`).
    fn kind(&self) -> &'static str;
}

/// Declarative evaluator configuration: a tagged record the factory turns
/// into a concrete [`Evaluator`]. Unknown tags fail deserialization before
/// they ever reach the factory; the factory additionally rejects
/// configuration combinations it cannot satisfy (e.g. a composite with zero
/// members).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvaluatorConfig {
    /// §4.E — LLM-judge (freeform / checklist / score-range).
    LlmJudge(llm_judge::LlmJudgeConfig),
    /// §4.E score-range and checklist rubrics, addressed directly.
    Rubric(llm_judge::LlmJudgeConfig),
    /// An LLM-judge driven through the provider's language-model handle
    /// rather than the generic `Invoke` path.
    AgentJudge(llm_judge::LlmJudgeConfig),
    /// §4.F — code-judge subprocess.
    CodeJudge(code_judge::CodeJudgeConfig),
    /// §4.G — composite of nested evaluators.
    Composite(composite::CompositeConfig),
    /// §4.C — tool-trajectory matcher.
    ToolTrajectory(tool_trajectory::ToolTrajectoryConfig),
    /// §4.D — field-accuracy comparator.
    FieldAccuracy(field_accuracy::FieldAccuracyConfig),
    /// A latency gate over the trace summary's `duration_ms`.
    Latency(gates::LatencyConfig),
    /// A cost gate over the trace summary's `cost_usd`.
    Cost(gates::CostConfig),
    /// A token-usage gate over the trace summary's `token_usage`.
    TokenUsage(gates::TokenUsageConfig),
    /// A gate over derived execution metrics (event/tool/error counts).
    ExecutionMetrics(gates::ExecutionMetricsConfig),
}

impl EvaluatorConfig {
    /// The kind tag this config carries, matching its serialized `type` field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            EvaluatorConfig::LlmJudge(_) => "llm_judge",
            EvaluatorConfig::Rubric(_) => "rubric",
            EvaluatorConfig::AgentJudge(_) => "agent_judge",
            EvaluatorConfig::CodeJudge(_) => "code_judge",
            EvaluatorConfig::Composite(_) => "composite",
            EvaluatorConfig::ToolTrajectory(_) => "tool_trajectory",
            EvaluatorConfig::FieldAccuracy(_) => "field_accuracy",
            EvaluatorConfig::Latency(_) => "latency",
            EvaluatorConfig::Cost(_) => "cost",
            EvaluatorConfig::TokenUsage(_) => "token_usage",
            EvaluatorConfig::ExecutionMetrics(_) => "execution_metrics",
        }
    }

    /// The configured name for this evaluator instance, falling back to its
    /// kind tag when the config doesn't carry an explicit one.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            EvaluatorConfig::LlmJudge(c) | EvaluatorConfig::Rubric(c) | EvaluatorConfig::AgentJudge(c) => {
                c.name.clone().unwrap_or_else(|| self.kind().to_string())
            }
            EvaluatorConfig::CodeJudge(c) => c.name.clone().unwrap_or_else(|| self.kind().to_string()),
            EvaluatorConfig::Composite(c) => c.name.clone().unwrap_or_else(|| self.kind().to_string()),
            EvaluatorConfig::ToolTrajectory(c) => c.name.clone().unwrap_or_else(|| self.kind().to_string()),
            EvaluatorConfig::FieldAccuracy(c) => c.name.clone().unwrap_or_else(|| self.kind().to_string()),
            EvaluatorConfig::Latency(c) => c.name.clone().unwrap_or_else(|| self.kind().to_string()),
            EvaluatorConfig::Cost(c) => c.name.clone().unwrap_or_else(|| self.kind().to_string()),
            EvaluatorConfig::TokenUsage(c) => c.name.clone().unwrap_or_else(|| self.kind().to_string()),
            EvaluatorConfig::ExecutionMetrics(c) => c.name.clone().unwrap_or_else(|| self.kind().to_string()),
        }
    }
}

/// Builds a concrete [`Evaluator`] from its declarative configuration.
///
/// This is a small dispatch table keyed by tag — no reflection, matching the
/// source's dynamic-dispatch-by-tag pattern translated to a sealed Rust enum.
///
/// # Errors
///
/// Only fails if a nested composite member itself fails to build; the
/// top-level tag is already guaranteed valid by [`EvaluatorConfig`]'s closed
/// variant set.
pub fn build_evaluator(config: &EvaluatorConfig) -> Result<Box<dyn Evaluator>, EvaluatorError> {
    let name = config.name();
    Ok(match config {
        EvaluatorConfig::LlmJudge(c) | EvaluatorConfig::Rubric(c) | EvaluatorConfig::AgentJudge(c) => {
            Box::new(LlmJudgeEvaluator::new(name, c.clone()))
        }
        EvaluatorConfig::CodeJudge(c) => Box::new(CodeJudgeEvaluator::new(name, c.clone())),
        EvaluatorConfig::Composite(c) => Box::new(CompositeEvaluator::new(name, c.clone())?),
        EvaluatorConfig::ToolTrajectory(c) => Box::new(ToolTrajectoryEvaluator::new(name, c.clone())),
        EvaluatorConfig::FieldAccuracy(c) => Box::new(FieldAccuracyEvaluator::new(name, c.clone())),
        EvaluatorConfig::Latency(c) => Box::new(gates::LatencyEvaluator::new(name, c.clone())),
        EvaluatorConfig::Cost(c) => Box::new(gates::CostEvaluator::new(name, c.clone())),
        EvaluatorConfig::TokenUsage(c) => Box::new(gates::TokenUsageEvaluator::new(name, c.clone())),
        EvaluatorConfig::ExecutionMetrics(c) => Box::new(gates::ExecutionMetricsEvaluator::new(name, c.clone())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_type_tag_fails_deserialization_not_construction() {
        let raw = serde_json::json!({"type": "not_a_real_kind"});
        let result: Result<EvaluatorConfig, _> = serde_json::from_value(raw);
        assert!(result.is_err());
    }

    #[test]
    fn kind_matches_serialized_type_tag() {
        let config = EvaluatorConfig::ToolTrajectory(tool_trajectory::ToolTrajectoryConfig::default());
        assert_eq!(config.kind(), "tool_trajectory");
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["type"], "tool_trajectory");
    }

    #[test]
    fn build_evaluator_falls_back_to_kind_as_name() {
        let config = EvaluatorConfig::ToolTrajectory(tool_trajectory::ToolTrajectoryConfig::default());
        let evaluator = build_evaluator(&config).unwrap();
        assert_eq!(evaluator.name(), "tool_trajectory");
        assert_eq!(evaluator.kind(), "tool_trajectory");
    }
}
