// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The on-disk suite schema: the flexible, author-facing shape a suite file
//! is written in, before it's resolved into the core crate's `EvalCase`.
//!
//! Authors may write `criteria` or `expected_outcome`, `input_messages` or
//! `input`, a single `evaluator` or an `evaluators` list or sugar `rubrics`,
//! matching §6's suite-input contract.

use agentv_core::evaluators::llm_judge::{ChecklistItem, JudgeMode, LlmJudgeConfig};
use agentv_core::evaluators::EvaluatorConfig;
use agentv_core::model::{EvalCase, Message, Role, WorkspaceDescriptor};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::collections::BTreeMap;

/// A suite file: a named collection of cases sharing a dataset label.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Suite {
    /// The dataset name every case in this file is tagged with, unless a
    /// case overrides it.
    #[validate(min_length = 1)]
    pub name: String,
    /// The suite's cases.
    #[validate(min_items = 1)]
    pub cases: Vec<RawCase>,
}

/// One case as written in a suite file, before resolution into an `EvalCase`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RawCase {
    /// Unique within the suite.
    #[validate(min_length = 1)]
    pub id: String,

    /// The desired outcome, in prose. Accepts the `expected_outcome` alias.
    #[serde(alias = "expected_outcome")]
    pub criteria: String,

    /// The input transcript. Accepts the `input` alias, for a suite that
    /// writes a bare list of messages without naming it `input_messages`.
    #[serde(alias = "input")]
    pub input_messages: Vec<RawMessage>,

    /// The expected transcript, if declared. Accepts `expected_output`.
    #[serde(default, alias = "expected_output")]
    pub expected_messages: Option<Vec<RawMessage>>,

    /// A single evaluator, for the common one-evaluator case.
    #[serde(default)]
    pub evaluator: Option<EvaluatorConfig>,

    /// An explicit evaluator chain, executed in order.
    #[serde(default)]
    pub evaluators: Option<Vec<EvaluatorConfig>>,

    /// Sugar for a single checklist-mode LLM-judge: a bare list of rubric
    /// items, each optionally `required`.
    #[serde(default)]
    pub rubrics: Option<Vec<RawRubric>>,

    /// An optional per-case workspace.
    #[serde(default)]
    pub workspace: Option<WorkspaceDescriptor>,

    /// Arbitrary suite-author metadata.
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

/// One `rubrics[]` entry: sugar for a [`ChecklistItem`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRubric {
    /// The aspect description shown to the judge.
    pub description: String,
    /// This item's contribution to the weighted-average score; defaults to
    /// `1.0` when absent.
    #[serde(default)]
    pub weight: Option<f64>,
    /// When true, this item failing forces the whole score to `fail`.
    #[serde(default)]
    pub required: bool,
}

/// A message as written in a suite file: role plus plain text or a
/// structured payload (e.g. a file reference resolved by the loader).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    /// Who authored the message.
    pub role: Role,
    /// Plain-text content.
    #[serde(default)]
    pub content: Option<String>,
    /// A file path to resolve and inline as this message's content, first
    /// relative to the suite file, then a repo root. Mutually additive with
    /// `content` (if both are set, `file` wins once resolved by the loader).
    #[serde(default)]
    pub file: Option<String>,
}

impl RawCase {
    /// Resolves this raw case into an [`EvalCase`] tagged with `dataset`.
    /// File references in its messages must already be inlined by the
    /// loader before this call.
    #[must_use]
    pub fn into_eval_case(self, dataset: String) -> EvalCase {
        let evaluator_configs = self.resolve_evaluator_configs();
        EvalCase {
            id: self.id,
            dataset,
            input_messages: self.input_messages.into_iter().map(RawMessage::into_message).collect(),
            expected_messages: self
                .expected_messages
                .map(|messages| messages.into_iter().map(RawMessage::into_message).collect()),
            criteria: self.criteria,
            metadata: self.metadata,
            evaluator_configs,
            workspace: self.workspace,
        }
    }

    /// The evaluator chain this case resolves to: an explicit `evaluators`
    /// list wins, then a single `evaluator`, then `rubrics` sugar, then none.
    #[must_use]
    pub fn resolve_evaluator_configs(&self) -> Vec<EvaluatorConfig> {
        if let Some(evaluators) = &self.evaluators {
            return evaluators.clone();
        }
        if let Some(evaluator) = &self.evaluator {
            return vec![evaluator.clone()];
        }
        if let Some(rubrics) = &self.rubrics {
            let items = rubrics
                .iter()
                .enumerate()
                .map(|(i, r)| ChecklistItem {
                    id: format!("rubric_{i}"),
                    description: r.description.clone(),
                    weight: r.weight.unwrap_or(1.0),
                    required: r.required,
                })
                .collect();
            return vec![EvaluatorConfig::Rubric(LlmJudgeConfig {
                name: None,
                mode: JudgeMode::Checklist { items },
                max_retries: 3,
            })];
        }
        Vec::new()
    }
}

impl RawMessage {
    fn into_message(self) -> Message {
        Message::text(self.role, self.content.unwrap_or_default())
    }
}
