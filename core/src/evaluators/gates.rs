// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Simple pass/fail gates over a work item's [`crate::model::TraceSummary`]:
//! latency, cost, token usage, and derived execution-metric thresholds.
//! Each gate scores 1.0 (pass) or 0.0 (fail) with no partial credit — the
//! trace either stayed within budget or it didn't.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Evaluator, EvaluatorError};
use crate::model::{EvaluationContext, Score, TraceSummary};

fn gate_score(passed: bool, hit: String, miss: String) -> Score {
    let mut score = Score::new(if passed { 1.0 } else { 0.0 }, 1);
    if passed {
        score.hits.push(hit);
    } else {
        score.misses.push(miss);
    }
    score
}

/// Fails a case whose trace-reported duration exceeds `max_duration_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyConfig {
    /// An optional explicit name for this evaluator instance.
    #[serde(default)]
    pub name: Option<String>,
    /// The maximum allowed wall-clock duration, in milliseconds.
    pub max_duration_ms: u64,
}

/// Evaluator for [`LatencyConfig`].
pub struct LatencyEvaluator {
    name: String,
    config: LatencyConfig,
}

impl LatencyEvaluator {
    /// Builds a new evaluator from configuration.
    #[must_use]
    pub fn new(name: String, config: LatencyConfig) -> Self {
        Self { name, config }
    }
}

#[async_trait]
impl Evaluator for LatencyEvaluator {
    async fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<Score, EvaluatorError> {
        let observed = observed_duration_ms(ctx);
        let passed = observed.is_some_and(|ms| ms <= self.config.max_duration_ms);
        Ok(gate_score(
            passed,
            format!("duration within {}ms", self.config.max_duration_ms),
            match observed {
                Some(ms) => format!("duration {ms}ms exceeded {}ms", self.config.max_duration_ms),
                None => "no duration reported in trace summary".to_string(),
            },
        ))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "latency"
    }
}

/// Fails a case whose trace-reported cost exceeds `max_cost_usd`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    /// An optional explicit name for this evaluator instance.
    #[serde(default)]
    pub name: Option<String>,
    /// The maximum allowed cost, in US dollars.
    pub max_cost_usd: f64,
}

/// Evaluator for [`CostConfig`].
pub struct CostEvaluator {
    name: String,
    config: CostConfig,
}

impl CostEvaluator {
    /// Builds a new evaluator from configuration.
    #[must_use]
    pub fn new(name: String, config: CostConfig) -> Self {
        Self { name, config }
    }
}

#[async_trait]
impl Evaluator for CostEvaluator {
    async fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<Score, EvaluatorError> {
        let observed = ctx.trace_summary.as_ref().and_then(|t| t.cost_usd);
        let passed = observed.is_some_and(|cost| cost <= self.config.max_cost_usd);
        Ok(gate_score(
            passed,
            format!("cost within ${:.4}", self.config.max_cost_usd),
            match observed {
                Some(cost) => format!("cost ${cost:.4} exceeded ${:.4}", self.config.max_cost_usd),
                None => "no cost reported in trace summary".to_string(),
            },
        ))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "cost"
    }
}

/// Fails a case whose reported token usage exceeds `max_total_tokens`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageConfig {
    /// An optional explicit name for this evaluator instance.
    #[serde(default)]
    pub name: Option<String>,
    /// The maximum allowed sum of input and output tokens.
    pub max_total_tokens: u64,
}

/// Evaluator for [`TokenUsageConfig`].
pub struct TokenUsageEvaluator {
    name: String,
    config: TokenUsageConfig,
}

impl TokenUsageEvaluator {
    /// Builds a new evaluator from configuration.
    #[must_use]
    pub fn new(name: String, config: TokenUsageConfig) -> Self {
        Self { name, config }
    }
}

#[async_trait]
impl Evaluator for TokenUsageEvaluator {
    async fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<Score, EvaluatorError> {
        let usage = ctx.trace_summary.as_ref().and_then(|t| t.token_usage);
        let total = usage.map(|u| u.input.unwrap_or(0) + u.output.unwrap_or(0));
        let passed = total.is_some_and(|t| t <= self.config.max_total_tokens);
        Ok(gate_score(
            passed,
            format!("token usage within {}", self.config.max_total_tokens),
            match total {
                Some(t) => format!("token usage {t} exceeded {}", self.config.max_total_tokens),
                None => "no token usage reported in trace summary".to_string(),
            },
        ))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "token_usage"
    }
}

/// Fails a case whose derived execution metrics fall outside configured
/// bounds (event count, distinct tool count, error count).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutionMetricsConfig {
    /// An optional explicit name for this evaluator instance.
    #[serde(default)]
    pub name: Option<String>,
    /// Maximum allowed trace event count.
    #[serde(default)]
    pub max_event_count: Option<u64>,
    /// Maximum allowed distinct tool count.
    #[serde(default)]
    pub max_tool_count: Option<u64>,
    /// Maximum allowed error event count.
    #[serde(default)]
    pub max_error_count: Option<u64>,
}

/// Evaluator for [`ExecutionMetricsConfig`].
pub struct ExecutionMetricsEvaluator {
    name: String,
    config: ExecutionMetricsConfig,
}

impl ExecutionMetricsEvaluator {
    /// Builds a new evaluator from configuration.
    #[must_use]
    pub fn new(name: String, config: ExecutionMetricsConfig) -> Self {
        Self { name, config }
    }

    fn check(&self, summary: &TraceSummary) -> Vec<String> {
        let mut misses = Vec::new();
        if let Some(max) = self.config.max_event_count {
            if summary.event_count > max {
                misses.push(format!("event_count {} exceeded {max}", summary.event_count));
            }
        }
        if let Some(max) = self.config.max_tool_count {
            let observed = summary.tool_names.len() as u64;
            if observed > max {
                misses.push(format!("distinct tool count {observed} exceeded {max}"));
            }
        }
        if let Some(max) = self.config.max_error_count {
            if summary.error_count > max {
                misses.push(format!("error_count {} exceeded {max}", summary.error_count));
            }
        }
        misses
    }
}

#[async_trait]
impl Evaluator for ExecutionMetricsEvaluator {
    async fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<Score, EvaluatorError> {
        let Some(summary) = &ctx.trace_summary else {
            return Ok(gate_score(false, String::new(), "no trace summary available".to_string()));
        };
        let misses = self.check(summary);
        let mut score = Score::new(if misses.is_empty() { 1.0 } else { 0.0 }, 1);
        if misses.is_empty() {
            score.hits.push("execution metrics within configured bounds".to_string());
        } else {
            score.misses = misses;
        }
        Ok(score)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "execution_metrics"
    }
}

fn observed_duration_ms(ctx: &EvaluationContext<'_>) -> Option<u64> {
    ctx.trace_summary.as_ref().and_then(|t| t.duration_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EvalCase, TokenUsage};

    fn bare_case() -> EvalCase {
        EvalCase {
            id: "c".into(),
            dataset: "d".into(),
            input_messages: vec![],
            expected_messages: None,
            criteria: String::new(),
            metadata: None,
            evaluator_configs: vec![],
            workspace: None,
        }
    }

    fn ctx_with_summary(case: &EvalCase, summary: TraceSummary) -> EvaluationContext<'_> {
        EvaluationContext {
            eval_case: case,
            candidate: String::new(),
            target: "t".into(),
            attempt: 0,
            prompt_inputs: Default::default(),
            judge_provider: None,
            output_messages: vec![],
            trace_summary: Some(summary),
            file_changes: None,
            workspace_path: None,
        }
    }

    #[tokio::test]
    async fn latency_gate_fails_over_budget() {
        let evaluator = LatencyEvaluator::new("lat".into(), LatencyConfig { name: None, max_duration_ms: 100 });
        let case = bare_case();
        let mut summary = TraceSummary::default();
        summary.duration_ms = Some(200);
        let score = evaluator.evaluate(&ctx_with_summary(&case, summary)).await.unwrap();
        assert_eq!(score.score, 0.0);
    }

    #[tokio::test]
    async fn token_usage_gate_sums_input_and_output() {
        let evaluator = TokenUsageEvaluator::new("tok".into(), TokenUsageConfig { name: None, max_total_tokens: 1000 });
        let case = bare_case();
        let mut summary = TraceSummary::default();
        summary.token_usage = Some(TokenUsage { input: Some(600), output: Some(500), cached: None });
        let score = evaluator.evaluate(&ctx_with_summary(&case, summary)).await.unwrap();
        assert_eq!(score.score, 0.0);
    }

    #[tokio::test]
    async fn execution_metrics_gate_checks_all_configured_bounds() {
        let evaluator = ExecutionMetricsEvaluator::new(
            "exec".into(),
            ExecutionMetricsConfig {
                max_tool_count: Some(1),
                ..Default::default()
            },
        );
        let case = bare_case();
        let mut summary = TraceSummary::default();
        summary.tool_names = vec!["a".into(), "b".into()];
        let score = evaluator.evaluate(&ctx_with_summary(&case, summary)).await.unwrap();
        assert_eq!(score.score, 0.0);
        assert!(score.misses.iter().any(|m| m.contains("distinct tool count")));
    }
}
