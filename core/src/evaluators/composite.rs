// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The composite evaluator: runs a fixed set of member evaluators
//! concurrently and aggregates their scores into one.
//!
//! `weighted_average` combines member scores directly; `code_judge` and
//! `llm_judge` instead hand every member's [`Score`] to an external
//! aggregator — a subprocess or a judge-provider prompt — and use its
//! verdict as the composite's.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::llm_judge::extract_json;
use super::{build_evaluator, Evaluator, EvaluatorConfig, EvaluatorError};
use crate::model::{EvaluationContext, Message, NamedScore, Score};
use crate::providers::ProviderRequest;

/// The tail of captured aggregator stderr kept when it fails, in bytes.
const STDERR_TAIL_BYTES: usize = 2000;

/// How member scores combine into the composite's top-level score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompositeAggregation {
    /// `sum(weight * member_score) / sum(weight)`, weight defaulting to 1.0.
    #[default]
    WeightedAverage,
    /// Serializes `{results: {memberId: Score}}` to [`CompositeConfig::code_judge_aggregator`]'s
    /// subprocess over stdin and uses its code-judge-shaped stdout as the
    /// composite score.
    CodeJudge,
    /// Substitutes `{{EVALUATOR_RESULTS_JSON}}` into
    /// [`CompositeConfig::llm_judge_aggregator`]'s prompt (or a default one)
    /// and sends it to the judge provider.
    LlmJudge,
}

/// Configuration for the `code_judge` aggregation mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeJudgeAggregatorConfig {
    /// The executable to run.
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Maximum wall-clock time to wait for the subprocess.
    #[serde(default = "default_aggregator_timeout_seconds")]
    pub timeout_seconds: u64,
    /// The working directory the subprocess is spawned in.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Additional environment variables, merged over the inherited
    /// environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_aggregator_timeout_seconds() -> u64 {
    30
}

/// Configuration for the `llm_judge` aggregation mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmJudgeAggregatorConfig {
    /// The prompt template sent to the judge provider. Must contain the
    /// literal `{{EVALUATOR_RESULTS_JSON}}` placeholder.
    #[serde(default = "default_aggregator_prompt")]
    pub prompt: String,
}

impl Default for LlmJudgeAggregatorConfig {
    fn default() -> Self {
        Self { prompt: default_aggregator_prompt() }
    }
}

fn default_aggregator_prompt() -> String {
    "You are combining the results of several evaluators into one verdict.\n\
     Respond with a single JSON object: {\"score\": <0.0-1.0>, \"reasoning\": <string>, \"hits\": [...], \"misses\": [...]}.\n\n\
     Evaluator results:\n{{EVALUATOR_RESULTS_JSON}}"
        .to_string()
}

/// One member of a [`CompositeEvaluator`], with its own configuration and
/// contribution weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeMember {
    /// The member's declarative configuration.
    pub evaluator: EvaluatorConfig,
    /// This member's contribution to a `weighted_average` aggregation.
    #[serde(default)]
    pub weight: Option<f64>,
}

/// Declarative configuration for a [`CompositeEvaluator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeConfig {
    /// An optional explicit name for this evaluator instance.
    #[serde(default)]
    pub name: Option<String>,
    /// The member evaluators, run concurrently.
    pub members: Vec<CompositeMember>,
    /// How member scores combine.
    #[serde(default)]
    pub aggregation: CompositeAggregation,
    /// The subprocess aggregator, required when `aggregation` is `code_judge`.
    #[serde(default)]
    pub code_judge_aggregator: Option<CodeJudgeAggregatorConfig>,
    /// The judge-prompt aggregator, used (with a built-in default prompt if
    /// absent) when `aggregation` is `llm_judge`.
    #[serde(default)]
    pub llm_judge_aggregator: Option<LlmJudgeAggregatorConfig>,
}

/// Runs a fixed set of member evaluators concurrently and combines their
/// scores.
pub struct CompositeEvaluator {
    name: String,
    config: CompositeConfig,
    members: Vec<(Box<dyn Evaluator>, Option<f64>)>,
}

impl CompositeEvaluator {
    /// Builds a composite from configuration, constructing every member
    /// evaluator eagerly.
    ///
    /// # Errors
    ///
    /// Fails if `members` is empty, or if any member's own configuration
    /// fails to build (e.g. a nested composite with zero members).
    pub fn new(name: String, config: CompositeConfig) -> Result<Self, EvaluatorError> {
        if config.members.is_empty() {
            return Err(EvaluatorError::Parse("composite evaluator requires at least one member".into()));
        }
        let mut members = Vec::with_capacity(config.members.len());
        for member in &config.members {
            members.push((build_evaluator(&member.evaluator)?, member.weight));
        }
        Ok(Self { name, config, members })
    }
}

#[async_trait]
impl Evaluator for CompositeEvaluator {
    async fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<Score, EvaluatorError> {
        let futures = self.members.iter().map(|(evaluator, weight)| async move {
            let result = evaluator.evaluate(ctx).await;
            (evaluator.name().to_string(), evaluator.kind().to_string(), *weight, result)
        });
        let results = join_all(futures).await;

        let mut child_scores = Vec::with_capacity(results.len());
        let mut member_scores = BTreeMap::new();
        let mut weighted_sum = 0.0f64;
        let mut weight_total = 0.0f64;
        let mut hits = Vec::new();
        let mut misses = Vec::new();

        for (name, kind, weight, result) in results {
            let (score, error) = match result {
                Ok(s) => (s, None),
                Err(e) => (Score::new(0.0, 1).force_fail(), Some(e.to_string())),
            };
            let w = weight.unwrap_or(1.0);
            weighted_sum += w * score.score;
            weight_total += w;
            hits.extend(score.hits.iter().map(|hit| format!("{name}: {hit}")));
            misses.extend(score.misses.iter().map(|miss| format!("{name}: {miss}")));

            child_scores.push(NamedScore {
                name: name.clone(),
                kind,
                score: score.score,
                verdict: score.verdict,
                hits: score.hits.clone(),
                misses: score.misses.clone(),
                weight: Some(w),
                reasoning: error.or_else(|| score.reasoning.clone()),
                details: score.details.clone(),
                evaluator_results: None,
            });
            member_scores.insert(name, score);
        }

        let mut composite = match self.config.aggregation {
            CompositeAggregation::WeightedAverage => {
                let raw = if weight_total > 0.0 { weighted_sum / weight_total } else { 0.0 };
                let mut score = Score::new(raw, self.members.len() as u32);
                score.hits = hits;
                score.misses = misses;
                score
            }
            CompositeAggregation::CodeJudge => self.run_code_judge_aggregator(&member_scores).await?,
            CompositeAggregation::LlmJudge => self.run_llm_judge_aggregator(ctx, &member_scores).await?,
        };
        composite.child_scores = Some(child_scores);
        Ok(composite.capped())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "composite"
    }
}

impl CompositeEvaluator {
    /// Pipes `{results: {memberId: Score}}` to the configured subprocess and
    /// parses its code-judge-shaped stdout into the composite's score.
    async fn run_code_judge_aggregator(&self, member_scores: &BTreeMap<String, Score>) -> Result<Score, EvaluatorError> {
        let aggregator = self.config.code_judge_aggregator.as_ref().ok_or_else(|| {
            EvaluatorError::Parse("code_judge aggregation requires a code_judge_aggregator config".into())
        })?;

        let payload = serde_json::json!({ "results": member_scores });
        let serialized = serde_json::to_vec(&payload)?;

        let mut command = Command::new(&aggregator.command);
        command
            .args(&aggregator.args)
            .envs(&aggregator.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &aggregator.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&serialized).await?;
            stdin.shutdown().await?;
        }

        let timeout = Duration::from_secs(aggregator.timeout_seconds);
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| EvaluatorError::Timeout(timeout))??;

        if !output.status.success() {
            return Err(EvaluatorError::Script {
                message: format!("aggregator exited with {}", output.status),
                stderr_tail: tail(&output.stderr, STDERR_TAIL_BYTES),
            });
        }

        let response: AggregatorResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| EvaluatorError::Parse(format!("malformed composite aggregator output: {e}")))?;

        let mut score = Score::new(response.score, self.members.len() as u32);
        score.reasoning = response.reasoning;
        score.hits = response.hits;
        score.misses = response.misses;
        Ok(score)
    }

    /// Substitutes `{{EVALUATOR_RESULTS_JSON}}` into the configured (or
    /// default) prompt and sends it to the judge provider.
    async fn run_llm_judge_aggregator(
        &self,
        ctx: &EvaluationContext<'_>,
        member_scores: &BTreeMap<String, Score>,
    ) -> Result<Score, EvaluatorError> {
        let provider = ctx.judge_provider.clone().ok_or(EvaluatorError::MissingJudgeProvider)?;
        let template = self
            .config
            .llm_judge_aggregator
            .as_ref()
            .map(|a| a.prompt.clone())
            .unwrap_or_else(default_aggregator_prompt);

        let results_json = serde_json::to_string_pretty(&serde_json::json!({ "results": member_scores }))?;
        let prompt = template.replace("{{EVALUATOR_RESULTS_JSON}}", &results_json);

        let request = ProviderRequest::new(ctx.eval_case.id.clone(), ctx.attempt, prompt);
        let response = provider.invoke(request).await?;
        let text = response.output_messages.last().map(Message::text_content).unwrap_or_default();
        let json_text =
            extract_json(&text).ok_or_else(|| EvaluatorError::Parse("aggregator judge response carried no JSON object".into()))?;
        let parsed: AggregatorResponse =
            serde_json::from_str(json_text).map_err(|e| EvaluatorError::Parse(format!("malformed aggregator judge response: {e}")))?;

        let mut score = Score::new(parsed.score, self.members.len() as u32);
        score.reasoning = parsed.reasoning;
        score.hits = parsed.hits;
        score.misses = parsed.misses;
        Ok(score)
    }
}

#[derive(Debug, Deserialize)]
struct AggregatorResponse {
    score: f64,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    hits: Vec<String>,
    #[serde(default)]
    misses: Vec<String>,
}

fn tail(bytes: &[u8], max_len: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max_len {
        text.into_owned()
    } else {
        text[text.len() - max_len..].to_string()
    }
}
