// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The tool-trajectory evaluator: matches an agent's actual tool-call
//! sequence against an expected sequence under five ordering/containment
//! modes, with partial-argument matching and per-tool latency assertions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{Evaluator, EvaluatorError};
use crate::model::{ArgsMatch, EvaluationContext, ExpectedToolCall, Score, ToolCall, TrajectoryMode};

/// Declarative configuration for a [`ToolTrajectoryEvaluator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolTrajectoryConfig {
    /// An optional explicit name for this evaluator instance.
    #[serde(default)]
    pub name: Option<String>,
    /// The expected tool-call sequence.
    #[serde(default)]
    pub expected: Vec<ExpectedToolCall>,
    /// Minimum required call counts per tool, used by `any_order`.
    #[serde(default)]
    pub minimums: BTreeMap<String, u32>,
    /// The ordering/containment mode.
    #[serde(default = "default_mode")]
    pub mode: TrajectoryMode,
    /// The default argument-matching mode when an expected item doesn't
    /// override it; falls back to `exact` when absent.
    #[serde(default, rename = "defaultArgsMatch")]
    pub default_args_match: Option<ArgsMatch>,
}

fn default_mode() -> TrajectoryMode {
    TrajectoryMode::InOrder
}

impl Default for ToolTrajectoryConfig {
    fn default() -> Self {
        Self {
            name: None,
            expected: Vec::new(),
            minimums: BTreeMap::new(),
            mode: default_mode(),
            default_args_match: None,
        }
    }
}

/// Matches an agent's actual tool calls against an expected sequence.
pub struct ToolTrajectoryEvaluator {
    name: String,
    config: ToolTrajectoryConfig,
}

impl ToolTrajectoryEvaluator {
    /// Builds a new evaluator from configuration.
    #[must_use]
    pub fn new(name: String, config: ToolTrajectoryConfig) -> Self {
        Self { name, config }
    }
}

#[async_trait]
impl Evaluator for ToolTrajectoryEvaluator {
    async fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<Score, EvaluatorError> {
        let actual = extract_tool_calls(&ctx.output_messages);
        Ok(score_trajectory(&self.config, &actual))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "tool_trajectory"
    }
}

/// Collects every tool call across an ordered output-message sequence, in
/// transcript order.
fn extract_tool_calls(messages: &[crate::model::Message]) -> Vec<ToolCall> {
    messages
        .iter()
        .filter_map(|m| m.tool_calls.as_ref())
        .flat_map(|calls| calls.iter().cloned())
        .collect()
}

fn count_by_name(actual: &[ToolCall]) -> BTreeMap<String, u32> {
    let mut counts = BTreeMap::new();
    for call in actual {
        *counts.entry(call.tool.clone()).or_insert(0u32) += 1;
    }
    counts
}

/// The outcome of matching one expected item against one actual call,
/// carrying enough to drive a subsequent latency assertion.
struct Accumulator {
    hits: Vec<String>,
    misses: Vec<String>,
    sequence_hits: u32,
    sequence_total: u32,
    latency_hits: u32,
    latency_total: u32,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            hits: Vec::new(),
            misses: Vec::new(),
            sequence_hits: 0,
            sequence_total: 0,
            latency_hits: 0,
            latency_total: 0,
        }
    }

    fn record_sequence(&mut self, passed: bool, message: String) {
        self.sequence_total += 1;
        if passed {
            self.sequence_hits += 1;
            self.hits.push(message);
        } else {
            self.misses.push(message);
        }
    }

    fn record_latency(&mut self, expected: &ExpectedToolCall, matched: Option<&ToolCall>) {
        let Some(max_ms) = expected.max_duration_ms else {
            return;
        };
        match matched.and_then(|c| c.duration_ms) {
            Some(actual_ms) => {
                self.latency_total += 1;
                if actual_ms <= max_ms {
                    self.latency_hits += 1;
                    self.hits.push(format!("{}: latency {actual_ms}ms <= {max_ms}ms", expected.tool));
                } else {
                    self.misses
                        .push(format!("{}: latency {actual_ms}ms > {max_ms}ms", expected.tool));
                }
            }
            None => {
                tracing::warn!(tool = %expected.tool, "latency assertion skipped: actual call has no recorded duration");
            }
        }
    }

    fn into_score(mut self) -> Score {
        let denom = (self.sequence_total + self.latency_total).max(1);
        let numer = self.sequence_hits + self.latency_hits;
        let mut score = Score::new(numer as f64 / denom as f64, denom.max(1));
        self.hits.truncate(4);
        self.misses.truncate(4);
        score.hits = self.hits;
        score.misses = self.misses;
        score
    }
}

fn score_trajectory(config: &ToolTrajectoryConfig, actual: &[ToolCall]) -> Score {
    match config.mode {
        TrajectoryMode::AnyOrder => score_any_order(config, actual),
        TrajectoryMode::InOrder => score_in_order(config, actual),
        TrajectoryMode::Exact => score_exact(config, actual),
        TrajectoryMode::Superset => score_superset(config, actual),
        TrajectoryMode::Subset => score_subset(config, actual),
    }
}

fn score_any_order(config: &ToolTrajectoryConfig, actual: &[ToolCall]) -> Score {
    if config.minimums.is_empty() {
        let mut score = Score::new(1.0, 1);
        score.hits.push("no minimum tool-call counts configured".into());
        return score;
    }
    let counts = count_by_name(actual);
    let mut acc = Accumulator::new();
    for (tool, required) in &config.minimums {
        let count = counts.get(tool).copied().unwrap_or(0);
        let passed = count >= *required;
        acc.record_sequence(
            passed,
            format!("{tool}: required >= {required}, observed {count}"),
        );
    }
    acc.into_score()
}

fn score_in_order(config: &ToolTrajectoryConfig, actual: &[ToolCall]) -> Score {
    if config.expected.is_empty() {
        return empty_expected_pass();
    }
    let mut acc = Accumulator::new();
    let mut cursor = 0usize;
    for exp in &config.expected {
        let found = actual[cursor..].iter().position(|c| c.tool == exp.tool);
        match found {
            Some(offset) => {
                let idx = cursor + offset;
                let call = &actual[idx];
                let mode = effective_args_match(exp, config);
                if args_match(exp.args.as_ref(), call.input.as_ref(), &mode) {
                    acc.record_sequence(true, format!("{}: matched at position {idx}", exp.tool));
                    acc.record_latency(exp, Some(call));
                } else {
                    acc.record_sequence(false, format!("{}: name matched but args differed", exp.tool));
                }
                cursor = idx + 1;
            }
            None => {
                acc.record_sequence(false, format!("expected {}, not found", exp.tool));
            }
        }
    }
    acc.into_score()
}

fn score_exact(config: &ToolTrajectoryConfig, actual: &[ToolCall]) -> Score {
    if config.expected.is_empty() {
        return empty_expected_pass();
    }
    let mut acc = Accumulator::new();
    for (i, exp) in config.expected.iter().enumerate() {
        match actual.get(i) {
            Some(call) if call.tool == exp.tool => {
                let mode = effective_args_match(exp, config);
                if args_match(exp.args.as_ref(), call.input.as_ref(), &mode) {
                    acc.record_sequence(true, format!("Position {i}: {} matched", exp.tool));
                    acc.record_latency(exp, Some(call));
                } else {
                    acc.record_sequence(false, format!("Position {i}: {} args mismatched", exp.tool));
                }
            }
            Some(call) => {
                acc.record_sequence(false, format!("Position {i}: expected {}, got {}", exp.tool, call.tool));
            }
            None => {
                acc.record_sequence(false, format!("Position {i}: expected {}, got nothing", exp.tool));
            }
        }
    }
    if actual.len() != config.expected.len() {
        acc.record_sequence(
            false,
            format!("length mismatch: expected {} calls, got {}", config.expected.len(), actual.len()),
        );
    }
    acc.into_score()
}

fn score_superset(config: &ToolTrajectoryConfig, actual: &[ToolCall]) -> Score {
    if config.expected.is_empty() {
        return empty_expected_pass();
    }
    let mut acc = Accumulator::new();
    let mut consumed = vec![false; actual.len()];
    for exp in &config.expected {
        let mode = effective_args_match(exp, config);
        let found = actual.iter().enumerate().position(|(i, call)| {
            !consumed[i] && call.tool == exp.tool && args_match(exp.args.as_ref(), call.input.as_ref(), &mode)
        });
        match found {
            Some(idx) => {
                consumed[idx] = true;
                acc.record_sequence(true, format!("{}: matched unconsumed actual at {idx}", exp.tool));
                acc.record_latency(exp, Some(&actual[idx]));
            }
            None => {
                acc.record_sequence(false, format!("{}: no matching unconsumed actual call", exp.tool));
            }
        }
    }
    acc.into_score()
}

fn score_subset(config: &ToolTrajectoryConfig, actual: &[ToolCall]) -> Score {
    if actual.is_empty() {
        let mut score = Score::new(1.0, 1);
        score.hits.push("no actual tool calls to violate the allowed set".into());
        return score;
    }
    if config.expected.is_empty() {
        let mut score = Score::new(0.0, 1);
        score.misses.push("actual tool calls observed but no allowed set configured".into());
        return score;
    }
    let mut acc = Accumulator::new();
    for call in actual {
        let allowed = config
            .expected
            .iter()
            .find(|exp| exp.tool == call.tool && args_match(exp.args.as_ref(), call.input.as_ref(), &effective_args_match(exp, config)));
        match allowed {
            Some(exp) => {
                acc.record_sequence(true, format!("{}: permitted by allowed set", call.tool));
                acc.record_latency(exp, Some(call));
            }
            None => {
                acc.record_sequence(false, format!("{}: not in allowed set", call.tool));
            }
        }
    }
    acc.into_score()
}

fn empty_expected_pass() -> Score {
    let mut score = Score::new(1.0, 1);
    score.hits.push("expected sequence is empty".into());
    score
}

fn effective_args_match(exp: &ExpectedToolCall, config: &ToolTrajectoryConfig) -> ArgsMatch {
    exp.args_match
        .clone()
        .or_else(|| config.default_args_match.clone())
        .unwrap_or(ArgsMatch::Exact)
}

/// Applies the five argument-matching modes, honoring the `args` shortcut
/// (`None` or the literal string `"any"` always passes).
fn args_match(expected_args: Option<&Value>, actual_args: Option<&Value>, mode: &ArgsMatch) -> bool {
    if is_any(expected_args) {
        return true;
    }
    if matches!(mode, ArgsMatch::Ignore) {
        return true;
    }
    let expected = expected_args.cloned().unwrap_or_else(empty_object);
    let actual = actual_args.cloned().unwrap_or_else(empty_object);

    match mode {
        ArgsMatch::Ignore => true,
        ArgsMatch::Exact => expected == actual,
        ArgsMatch::Superset => object_keys_subset_equal(&expected, &actual),
        ArgsMatch::Subset => object_keys_subset_equal(&actual, &expected),
        ArgsMatch::Fields(paths) => paths.iter().all(|path| match resolve_path(&expected, path) {
            None => true,
            Some(expected_value) => resolve_path(&actual, path) == Some(expected_value),
        }),
    }
}

fn is_any(expected_args: Option<&Value>) -> bool {
    matches!(expected_args, None) || matches!(expected_args, Some(Value::String(s)) if s == "any")
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// True iff every key of `subset_side` exists in `superset_side` with an
/// equal value. Used both directions: `superset` mode calls this with
/// (expected, actual); `subset` mode calls it with (actual, expected).
fn object_keys_subset_equal(subset_side: &Value, superset_side: &Value) -> bool {
    let (Value::Object(sub), Value::Object(sup)) = (subset_side, superset_side) else {
        return subset_side == superset_side;
    };
    sub.iter().all(|(k, v)| sup.get(k) == Some(v))
}

/// Resolves a dotted/bracketed path like `a.b[0].c` against a JSON value.
fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        let (name, indices) = parse_segment(segment);
        if !name.is_empty() {
            current = current.as_object()?.get(name)?;
        }
        for idx in indices {
            current = current.as_array()?.get(idx)?;
        }
    }
    Some(current)
}

fn parse_segment(segment: &str) -> (&str, Vec<usize>) {
    let mut indices = Vec::new();
    let mut name_end = segment.len();
    let mut rest = segment;
    if let Some(bracket) = segment.find('[') {
        name_end = bracket;
        rest = &segment[bracket..];
        while let Some(open) = rest.find('[') {
            let Some(close) = rest[open..].find(']') else { break };
            let idx_str = &rest[open + 1..open + close];
            if let Ok(idx) = idx_str.parse::<usize>() {
                indices.push(idx);
            }
            rest = &rest[open + close + 1..];
        }
    }
    (&segment[..name_end], indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Message;

    fn call(tool: &str, args: Option<Value>) -> ToolCall {
        ToolCall {
            tool: tool.into(),
            input: args,
            output: None,
            id: None,
            duration_ms: None,
        }
    }

    fn expected(tool: &str, args: Option<Value>, args_match: Option<ArgsMatch>) -> ExpectedToolCall {
        ExpectedToolCall {
            tool: tool.into(),
            args,
            args_match,
            max_duration_ms: None,
        }
    }

    fn messages_from(calls: Vec<ToolCall>) -> Vec<Message> {
        vec![Message {
            role: crate::model::Role::Assistant,
            content: None,
            tool_calls: Some(calls),
        }]
    }

    #[tokio::test]
    async fn s1_in_order_with_partial_superset_args() {
        let config = ToolTrajectoryConfig {
            expected: vec![
                expected("search", Some(serde_json::json!({"q": "a"})), Some(ArgsMatch::Superset)),
                expected("fetch", None, None),
            ],
            mode: TrajectoryMode::InOrder,
            ..Default::default()
        };
        let actual = vec![
            call("search", Some(serde_json::json!({"q": "a", "limit": 10}))),
            call("log", None),
            call("fetch", None),
        ];
        let evaluator = ToolTrajectoryEvaluator::new("t".into(), config);
        let messages = messages_from(actual);
        let case = crate::model::EvalCase {
            id: "s1".into(),
            dataset: "d".into(),
            input_messages: vec![],
            expected_messages: None,
            criteria: String::new(),
            metadata: None,
            evaluator_configs: vec![],
            workspace: None,
        };
        let ctx = EvaluationContext {
            eval_case: &case,
            candidate: String::new(),
            target: "t".into(),
            attempt: 0,
            prompt_inputs: Default::default(),
            judge_provider: None,
            output_messages: messages,
            trace_summary: None,
            file_changes: None,
            workspace_path: None,
        };
        let score = evaluator.evaluate(&ctx).await.unwrap();
        assert_eq!(score.score, 1.0);
        assert_eq!(score.verdict, crate::model::Verdict::Pass);
    }

    #[test]
    fn s2_exact_length_mismatch_scores_half() {
        let config = ToolTrajectoryConfig {
            expected: vec![expected("A", None, None), expected("B", None, None)],
            mode: TrajectoryMode::Exact,
            ..Default::default()
        };
        let actual = vec![call("A", None)];
        let score = score_trajectory(&config, &actual);
        assert!((score.score - 0.5).abs() < 1e-9);
        assert!(score.misses.iter().any(|m| m.contains("Position 1: expected B, got nothing")));
    }

    #[test]
    fn any_order_checks_minimum_counts_ignoring_arg_matching() {
        let mut minimums = BTreeMap::new();
        minimums.insert("search".to_string(), 2);
        let config = ToolTrajectoryConfig {
            minimums,
            mode: TrajectoryMode::AnyOrder,
            ..Default::default()
        };
        let actual = vec![call("search", Some(serde_json::json!({"x": 1}))), call("search", None)];
        let score = score_trajectory(&config, &actual);
        assert_eq!(score.score, 1.0);
    }

    #[test]
    fn subset_mode_boundary_behaviours() {
        let empty = ToolTrajectoryConfig {
            mode: TrajectoryMode::Subset,
            ..Default::default()
        };
        assert_eq!(score_trajectory(&empty, &[]).score, 1.0);
        assert_eq!(score_trajectory(&empty, &[call("A", None)]).score, 0.0);

        let with_allowed = ToolTrajectoryConfig {
            expected: vec![expected("A", None, None)],
            mode: TrajectoryMode::Subset,
            ..Default::default()
        };
        assert_eq!(score_trajectory(&with_allowed, &[]).score, 1.0);
    }

    #[test]
    fn superset_is_position_free_and_ignores_extra_actuals() {
        let config = ToolTrajectoryConfig {
            expected: vec![expected("fetch", None, None)],
            mode: TrajectoryMode::Superset,
            ..Default::default()
        };
        let actual = vec![call("log", None), call("fetch", None), call("extra", None)];
        let score = score_trajectory(&config, &actual);
        assert_eq!(score.score, 1.0);
    }

    #[test]
    fn empty_expected_sequence_scores_one_for_non_subset_modes() {
        for mode in [TrajectoryMode::AnyOrder, TrajectoryMode::InOrder, TrajectoryMode::Exact, TrajectoryMode::Superset] {
            let config = ToolTrajectoryConfig {
                mode,
                ..Default::default()
            };
            let actual = vec![call("whatever", None)];
            assert_eq!(score_trajectory(&config, &actual).score, 1.0);
        }
    }

    #[test]
    fn latency_assertion_skipped_when_actual_duration_missing() {
        let config = ToolTrajectoryConfig {
            expected: vec![ExpectedToolCall {
                tool: "fetch".into(),
                args: None,
                args_match: None,
                max_duration_ms: Some(100),
            }],
            mode: TrajectoryMode::InOrder,
            ..Default::default()
        };
        let actual = vec![call("fetch", None)];
        let score = score_trajectory(&config, &actual);
        // sequence hit (1/1), latency skipped entirely (not counted in denominator)
        assert_eq!(score.score, 1.0);
    }

    #[test]
    fn latency_assertion_counts_when_duration_present() {
        let config = ToolTrajectoryConfig {
            expected: vec![ExpectedToolCall {
                tool: "fetch".into(),
                args: None,
                args_match: None,
                max_duration_ms: Some(100),
            }],
            mode: TrajectoryMode::InOrder,
            ..Default::default()
        };
        let actual = vec![call("fetch", None).with_duration_ms(500)];
        let score = score_trajectory(&config, &actual);
        // sequence hit + latency miss => 1 / 2
        assert!((score.score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn fields_mode_skips_paths_missing_in_expected() {
        let expected_args = serde_json::json!({"a": {"b": [1, 2]}});
        let actual_args = serde_json::json!({"a": {"b": [1, 2]}, "extra": true});
        assert!(args_match(
            Some(&expected_args),
            Some(&actual_args),
            &ArgsMatch::Fields(vec!["a.b[0]".to_string(), "missing.path".to_string()])
        ));
    }

    #[test]
    fn any_literal_shortcut_always_passes() {
        assert!(args_match(
            Some(&Value::String("any".into())),
            Some(&serde_json::json!({"whatever": true})),
            &ArgsMatch::Exact
        ));
    }
}
