// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The evaluation data model: cases, messages, traces, scores, and results.
//!
//! Every type here is a plain, concrete record — no duck typing, no optional
//! fields filled in by reflection. Providers and evaluators fill in what they
//! can; absent fields stay absent rather than defaulting to zero, so callers
//! can tell "not reported" from "reported as zero".

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::evaluators::EvaluatorConfig;

/// The role a [`Message`] was authored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A human or test-harness prompt.
    User,
    /// A reply from the agent under test.
    Assistant,
    /// A system prompt or instruction.
    System,
    /// The result of a tool invocation, fed back to the agent.
    Tool,
}

/// The content carried by a [`Message`].
///
/// `content` may be absent (`None`) when a message carries only `tool_calls`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Plain text content.
    Text(String),
    /// A structured object (e.g. a parsed file reference or JSON payload).
    Structured(serde_json::Value),
}

impl Content {
    /// Returns the content as a string if it is textual, rendering structured
    /// content as compact JSON otherwise.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Structured(v) => v.to_string(),
        }
    }
}

/// A single tool invocation recorded within a [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// The tool's name.
    pub tool: String,
    /// The arguments passed to the tool, if recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    /// The tool's result, if recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// A call identifier, when the provider assigns one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Wall-clock duration of the call, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none", rename = "durationMs")]
    pub duration_ms: Option<u64>,
}

impl ToolCall {
    /// Builds a bare tool call with no recorded arguments, output, id, or duration.
    #[must_use]
    pub fn named(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            input: None,
            output: None,
            id: None,
            duration_ms: None,
        }
    }

    /// Attaches arguments to the tool call.
    #[must_use]
    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = Some(input);
        self
    }

    /// Attaches a recorded duration, in milliseconds.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// A message within an input, expected, or output transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who authored the message.
    pub role: Role,
    /// The message content; `None` when the message carries only tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    /// Ordered tool calls attached to this message, if any.
    #[serde(skip_serializing_if = "Option::is_none", rename = "toolCalls")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    /// Builds a plain text message for the given role.
    #[must_use]
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(Content::Text(text.into())),
            tool_calls: None,
        }
    }

    /// Returns the message's textual content, or an empty string when absent.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.content.as_ref().map(Content::as_text).unwrap_or_default()
    }
}

/// Token usage as reported by a provider. Absent fields mean "not reported",
/// never zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input (prompt) tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<u64>,
    /// Output (completion) tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<u64>,
    /// Tokens served from a provider-side cache, if distinguished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<u64>,
}

/// Normalized counts describing what a provider invocation actually did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSummary {
    /// Total number of trace events observed.
    pub event_count: u64,
    /// The sorted set of distinct tool names invoked.
    pub tool_names: Vec<String>,
    /// Count of invocations per tool name.
    pub tool_calls_by_name: BTreeMap<String, u64>,
    /// Number of error events observed in the trace.
    pub error_count: u64,
    /// Number of LLM calls the agent itself made internally, if observable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_call_count: Option<u64>,
    /// Token usage, if observed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    /// Cost in USD, if observed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Wall-clock duration, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl TraceSummary {
    /// Derives a `TraceSummary` from an ordered output-message sequence.
    ///
    /// Tool calls are collected from every message's `tool_calls`; error
    /// events are not inferable from messages alone and are left at zero —
    /// providers that observe their own error stream must overwrite this.
    #[must_use]
    pub fn from_output_messages(messages: &[Message]) -> Self {
        let mut by_name: BTreeMap<String, u64> = BTreeMap::new();
        for m in messages {
            if let Some(calls) = &m.tool_calls {
                for c in calls {
                    *by_name.entry(c.tool.clone()).or_insert(0) += 1;
                }
            }
        }
        let tool_names: Vec<String> = by_name.keys().cloned().collect();
        Self {
            event_count: messages.len() as u64,
            tool_names,
            tool_calls_by_name: by_name,
            error_count: 0,
            llm_call_count: None,
            token_usage: None,
            cost_usd: None,
            duration_ms: None,
        }
    }
}

/// What a [`crate::providers::Provider`] returns from a single invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The ordered, append-only message sequence the provider produced —
    /// the authoritative tool-call record.
    pub output_messages: Vec<Message>,
    /// Token usage, if the provider reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    /// Cost in USD, if the provider reports or can compute it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Wall-clock duration of the invocation, in milliseconds. Providers MUST
    /// report this even when the backend itself does not.
    pub duration_ms: u64,
    /// When the invocation started.
    pub start_time: chrono::DateTime<chrono::Utc>,
    /// When the invocation completed.
    pub end_time: chrono::DateTime<chrono::Utc>,
    /// Opaque, provider-specific raw response blob, kept for debugging.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
    /// Path to a provider-written log file, if one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

/// An ordering/containment mode for [`crate::evaluators::tool_trajectory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrajectoryMode {
    /// Check only minimum call counts per tool, ignoring order.
    AnyOrder,
    /// Walk actual calls with a monotone cursor.
    InOrder,
    /// Match by position; lengths must agree.
    Exact,
    /// Expected items consumed greedily against unconsumed actual calls.
    Superset,
    /// Expected items form a reusable allow-list for every actual call.
    Subset,
}

/// An argument-matching mode, overridable per expected tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgsMatch {
    /// Bidirectional deep equality; no extra keys on either side.
    Exact,
    /// Every key of expected exists in actual with an equal value.
    Superset,
    /// Every key of actual exists in expected; no unexpected keys in actual.
    Subset,
    /// Skip argument comparison entirely.
    Ignore,
    /// Compare only the named dotted field paths.
    Fields(Vec<String>),
}

/// One entry of an expected tool-call sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedToolCall {
    /// The expected tool name.
    pub tool: String,
    /// Expected arguments, or `None`/`"any"` to skip the argument check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
    /// Argument-matching mode; falls back to the evaluator's default, then `exact`.
    #[serde(skip_serializing_if = "Option::is_none", rename = "argsMatch")]
    pub args_match: Option<ArgsMatch>,
    /// An optional maximum duration assertion, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none", rename = "maxDurationMs")]
    pub max_duration_ms: Option<u64>,
}

/// A rendered candidate answer plus everything an evaluator needs to score it.
///
/// Built fresh per `(case, attempt)` immediately before evaluators run, and
/// dropped after the last evaluator returns.
pub struct EvaluationContext<'a> {
    /// The case under evaluation.
    pub eval_case: &'a EvalCase,
    /// The candidate's textual answer (the last assistant message's content).
    pub candidate: String,
    /// The target name this case ran against.
    pub target: String,
    /// Which attempt (0-indexed) this is.
    pub attempt: u32,
    /// Template variables made available to prompt-rendering evaluators.
    pub prompt_inputs: BTreeMap<String, serde_json::Value>,
    /// The judge provider, resolved once per work item, if any evaluator needs one.
    pub judge_provider: Option<std::sync::Arc<dyn crate::providers::Provider>>,
    /// The provider's full output message trace.
    pub output_messages: Vec<Message>,
    /// The normalized trace summary, if computed.
    pub trace_summary: Option<TraceSummary>,
    /// Files the agent modified, if the target tracks workspace state.
    pub file_changes: Option<Vec<PathBuf>>,
    /// The materialized workspace path, if the case declared one.
    pub workspace_path: Option<PathBuf>,
}

/// The verdict category derived from a [`Score`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The candidate satisfied the case.
    Pass,
    /// The candidate neither clearly passed nor clearly failed.
    Borderline,
    /// The candidate failed the case.
    Fail,
}

impl Verdict {
    /// Derives a verdict from a clamped score using the default threshold map:
    /// `score >= 0.8 -> pass`, `score >= 0.6 -> borderline`, else `fail`.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Verdict::Pass
        } else if score >= 0.6 {
            Verdict::Borderline
        } else {
            Verdict::Fail
        }
    }
}

/// Clamps a score into the `[0, 1]` invariant range.
#[must_use]
pub fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 1.0)
}

/// The output of a single evaluator's `Evaluate(ctx)` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    /// The evaluator's score, always in `[0, 1]`.
    pub score: f64,
    /// The derived (or gate-forced) verdict.
    pub verdict: Verdict,
    /// Satisfied aspects, capped at four when surfaced.
    pub hits: Vec<String>,
    /// Unsatisfied aspects, capped at four when surfaced.
    pub misses: Vec<String>,
    /// The number of aspects this evaluator judged, used to weight cross-evaluator means.
    pub expected_aspect_count: u32,
    /// Free-text justification, when the evaluator produces one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// The raw request/response blob sent to an external judge, script, or proxy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluator_raw_request: Option<serde_json::Value>,
    /// Evaluator-specific structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Nested scores, populated by composite evaluators.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_scores: Option<Vec<NamedScore>>,
}

impl Score {
    /// Builds a score, clamping into range and deriving the verdict.
    #[must_use]
    pub fn new(score: f64, expected_aspect_count: u32) -> Self {
        let score = clamp_score(score);
        Self {
            score,
            verdict: Verdict::from_score(score),
            hits: Vec::new(),
            misses: Vec::new(),
            expected_aspect_count: expected_aspect_count.max(1),
            reasoning: None,
            evaluator_raw_request: None,
            details: None,
            child_scores: None,
        }
    }

    /// Forces the verdict to `fail` regardless of score (used by gated rubrics).
    #[must_use]
    pub fn force_fail(mut self) -> Self {
        self.verdict = Verdict::Fail;
        self
    }

    /// Caps `hits` and `misses` at four entries each, per the universal invariant.
    #[must_use]
    pub fn capped(mut self) -> Self {
        self.hits.truncate(4);
        self.misses.truncate(4);
        self
    }
}

/// A [`Score`] tagged with the evaluator name and kind that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedScore {
    /// The evaluator's configured name.
    pub name: String,
    /// The evaluator kind tag (e.g. `"llm_judge"`).
    #[serde(rename = "type")]
    pub kind: String,
    /// The produced score.
    pub score: f64,
    /// The produced verdict.
    pub verdict: Verdict,
    /// Satisfied aspects.
    pub hits: Vec<String>,
    /// Unsatisfied aspects.
    pub misses: Vec<String>,
    /// The weight this evaluator contributed to a composite mean, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Free-text justification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Evaluator-specific structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Nested results, for composite members that are themselves composites.
    #[serde(skip_serializing_if = "Option::is_none", rename = "evaluator_results")]
    pub evaluator_results: Option<Vec<NamedScore>>,
}

/// What a writer consumes: the fully merged result of one `(case, attempt)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// When the result was emitted, RFC3339.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// The evaluated case's id.
    pub test_id: String,
    /// The case's owning dataset, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    /// The merged top-level score.
    pub score: f64,
    /// The merged top-level verdict.
    pub verdict: Verdict,
    /// Merged satisfied aspects, capped at four.
    pub hits: Vec<String>,
    /// Merged unsatisfied aspects, capped at four.
    pub misses: Vec<String>,
    /// Merged free-text justification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// The candidate's textual answer.
    pub candidate_answer: String,
    /// The target this case ran against.
    pub target: String,
    /// The attempt number (0-indexed).
    pub attempt: u32,
    /// The identity this attempt is a repeat of, for multi-trial runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_of: Option<String>,
    /// Per-evaluator scores, in configured order.
    pub evaluator_scores: Vec<NamedScore>,
    /// A dispatcher- or provider-level error, if this work item failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The normalized trace summary, if computed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_summary: Option<TraceSummary>,
    /// The provider's full output message trace, if retained.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_messages: Option<Vec<Message>>,
}

/// A per-case workspace descriptor: seed template plus lifecycle scripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceDescriptor {
    /// Directory to clone as the workspace seed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_path: Option<PathBuf>,
    /// Script run after materialization, before the provider call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_script: Option<String>,
    /// Script run after the provider call and evaluators, best-effort.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_script: Option<String>,
    /// Environment overrides applied to both scripts and the provider call.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// An immutable evaluation case: inputs, criteria, and the evaluator chain
/// that must score it. Created by the suite loader; destroyed with the suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalCase {
    /// Unique within the owning suite.
    pub id: String,
    /// The owning dataset's name.
    pub dataset: String,
    /// Ordered input transcript.
    pub input_messages: Vec<Message>,
    /// Ordered expected transcript, if the suite declares one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_messages: Option<Vec<Message>>,
    /// The desired outcome, in prose.
    pub criteria: String,
    /// Arbitrary suite-author metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
    /// The evaluators that must score this case, in execution order.
    pub evaluator_configs: Vec<EvaluatorConfig>,
    /// An optional per-case workspace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<WorkspaceDescriptor>,
}

impl EvalCase {
    /// The derived reference answer: the content of the last expected
    /// message, or its tool calls serialized, when content is absent.
    #[must_use]
    pub fn reference_answer(&self) -> Option<String> {
        let last = self.expected_messages.as_ref()?.last()?;
        if let Some(content) = &last.content {
            return Some(content.as_text());
        }
        last.tool_calls
            .as_ref()
            .map(|calls| serde_json::to_string(calls).unwrap_or_default())
    }

    /// The rendered question handed to the provider: the last user message's
    /// text, or all input messages joined when none is tagged `user`.
    #[must_use]
    pub fn question(&self) -> String {
        self.input_messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(Message::text_content)
            .unwrap_or_else(|| {
                self.input_messages.iter().map(Message::text_content).collect::<Vec<_>>().join("\n")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_clamps_out_of_range_inputs() {
        assert_eq!(Score::new(1.5, 1).score, 1.0);
        assert_eq!(Score::new(-0.5, 1).score, 0.0);
    }

    #[test]
    fn score_derives_verdict_from_default_thresholds() {
        assert_eq!(Score::new(0.8, 1).verdict, Verdict::Pass);
        assert_eq!(Score::new(0.6, 1).verdict, Verdict::Borderline);
        assert_eq!(Score::new(0.59, 1).verdict, Verdict::Fail);
    }

    #[test]
    fn score_expected_aspect_count_floors_at_one() {
        assert_eq!(Score::new(1.0, 0).expected_aspect_count, 1);
    }

    #[test]
    fn capped_truncates_hits_and_misses_to_four() {
        let mut s = Score::new(1.0, 1);
        s.hits = vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()];
        s.misses = vec!["x".into(), "y".into(), "z".into(), "w".into(), "v".into()];
        let s = s.capped();
        assert_eq!(s.hits.len(), 4);
        assert_eq!(s.misses.len(), 4);
    }

    #[test]
    fn trace_summary_counts_tool_calls_from_output_messages() {
        let messages = vec![
            Message {
                role: Role::Assistant,
                content: None,
                tool_calls: Some(vec![ToolCall::named("search"), ToolCall::named("search")]),
            },
            Message {
                role: Role::Assistant,
                content: Some(Content::Text("done".into())),
                tool_calls: Some(vec![ToolCall::named("fetch")]),
            },
        ];
        let summary = TraceSummary::from_output_messages(&messages);
        assert_eq!(summary.event_count, 2);
        assert_eq!(summary.tool_calls_by_name.get("search"), Some(&2));
        assert_eq!(summary.tool_calls_by_name.get("fetch"), Some(&1));
        assert_eq!(summary.tool_names, vec!["fetch".to_string(), "search".to_string()]);
    }

    #[test]
    fn reference_answer_falls_back_to_serialized_tool_calls() {
        let case = EvalCase {
            id: "c1".into(),
            dataset: "d".into(),
            input_messages: vec![],
            expected_messages: Some(vec![Message {
                role: Role::Assistant,
                content: None,
                tool_calls: Some(vec![ToolCall::named("search").with_input(serde_json::json!({"q": "a"}))]),
            }]),
            criteria: "whatever".into(),
            metadata: None,
            evaluator_configs: vec![],
            workspace: None,
        };
        let reference = case.reference_answer().unwrap();
        assert!(reference.contains("search"));
    }
}
