// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The LLM-judge evaluator: delegates scoring to a judge model in one of
//! three submodes (freeform, checklist, score-range), retrying on malformed
//! judge output.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{Evaluator, EvaluatorError};
use crate::model::{EvaluationContext, Score};
use crate::providers::ProviderRequest;

/// One checklist aspect the judge is asked to evaluate independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistItem {
    /// Stable identifier the judge's response is matched back against.
    pub id: String,
    /// The aspect description shown to the judge.
    pub description: String,
    /// This item's contribution to the weighted-average score.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// When true, this item failing forces the whole score to `fail`
    /// regardless of how many other items passed.
    #[serde(default)]
    pub required: bool,
}

/// One labeled band of a score-range rubric item, e.g. `[8, 10] =>
/// "excellent"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRangeBand {
    /// Inclusive `[min, max]` bounds on the judge's raw 0-10 rating.
    pub score_range: (f64, f64),
    /// Shown to the judge, and surfaced in hits/misses when this band is
    /// the one the judge's rating fell into.
    pub description: String,
}

/// One rubric item scored on a judge-assigned 0-10 scale with labeled bands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRangeItem {
    /// Stable identifier the judge's response is matched back against.
    pub id: String,
    /// The aspect description shown to the judge.
    pub description: String,
    /// This item's contribution to the weighted-average score.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// The labeled bands the judge's 0-10 rating is shown against.
    #[serde(default)]
    pub score_ranges: Vec<ScoreRangeBand>,
    /// The minimum raw (0-10) score required to pass; below it the whole
    /// score is forced to `fail`.
    #[serde(default)]
    pub required_min_score: Option<f64>,
    /// Legacy compatibility: `required: true` with no explicit
    /// `required_min_score` is treated as requiring a perfect 10.
    #[serde(default)]
    pub required: Option<bool>,
}

fn default_weight() -> f64 {
    1.0
}

/// The three ways an LLM judge can be asked to score a candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum JudgeMode {
    /// A single prose criteria statement; the judge returns a `[0, 1]` score.
    Freeform {
        /// The prose criteria the judge is asked to check.
        criteria: String,
    },
    /// A fixed set of independently-judged, weighted aspects.
    Checklist {
        /// The aspects to check, in the order they're presented to the judge.
        items: Vec<ChecklistItem>,
    },
    /// A set of rubric items each rated 0-10 against labeled bands.
    ScoreRange {
        /// The rubric items to check, in the order they're presented to the
        /// judge.
        items: Vec<ScoreRangeItem>,
    },
}

impl Default for JudgeMode {
    fn default() -> Self {
        JudgeMode::Freeform { criteria: String::new() }
    }
}

/// Declarative configuration for an [`LlmJudgeEvaluator`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmJudgeConfig {
    /// An optional explicit name for this evaluator instance.
    #[serde(default)]
    pub name: Option<String>,
    /// Which submode to run.
    #[serde(default)]
    pub mode: JudgeMode,
    /// How many times to re-invoke the judge after a malformed response,
    /// including the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

/// Delegates scoring to a judge model reachable through
/// [`EvaluationContext::judge_provider`].
pub struct LlmJudgeEvaluator {
    name: String,
    config: LlmJudgeConfig,
}

impl LlmJudgeEvaluator {
    /// Builds a new evaluator from configuration.
    #[must_use]
    pub fn new(name: String, config: LlmJudgeConfig) -> Self {
        Self { name, config }
    }

    fn render_prompt(&self, ctx: &EvaluationContext<'_>) -> String {
        let reference = ctx.eval_case.reference_answer().unwrap_or_default();
        match &self.config.mode {
            JudgeMode::Freeform { criteria } => format!(
                "You are judging whether a candidate answer satisfies the following criteria.\n\
                 Criteria: {criteria}\n\
                 Reference answer (if any): {reference}\n\
                 Candidate answer: {}\n\n\
                 Respond with JSON only: {{\"score\": <0..1>, \"reasoning\": <string>, \"hits\": [...], \"misses\": [...]}}",
                ctx.candidate
            ),
            JudgeMode::Checklist { items } => {
                let bullets: String = items
                    .iter()
                    .map(|item| {
                        format!(
                            "[{}] {} (weight={}{})\n",
                            item.id,
                            item.description,
                            item.weight,
                            if item.required { ", REQUIRED" } else { "" }
                        )
                    })
                    .collect();
                format!(
                    "You are judging a candidate answer against this checklist:\n{bullets}\n\
                     Candidate answer: {}\n\n\
                     Respond with JSON only: {{\"results\": [{{\"id\": <string>, \"satisfied\": <bool>, \"reasoning\": <string>}}, ...]}} \
                     with one entry per checklist item, matched by id.",
                    ctx.candidate
                )
            }
            JudgeMode::ScoreRange { items } => {
                let bullets: String = items
                    .iter()
                    .map(|item| {
                        let bands: String = item
                            .score_ranges
                            .iter()
                            .map(|b| format!("    [{}, {}] = {}\n", b.score_range.0, b.score_range.1, b.description))
                            .collect();
                        format!("[{}] {} (weight={})\n{bands}", item.id, item.description, item.weight)
                    })
                    .collect();
                format!(
                    "Rate the candidate answer against each rubric item on a scale from 0 to 10:\n{bullets}\n\
                     Reference answer (if any): {reference}\n\
                     Candidate answer: {}\n\n\
                     Respond with JSON only: {{\"results\": [{{\"id\": <string>, \"score\": <0..10>, \"reasoning\": <string>}}, ...]}} \
                     with one entry per rubric item, matched by id.",
                    ctx.candidate
                )
            }
        }
    }

    fn parse_and_score(&self, text: &str) -> Result<Score, String> {
        let json_text = extract_json(text).ok_or_else(|| "no JSON object found in judge response".to_string())?;
        match &self.config.mode {
            JudgeMode::Freeform { .. } => {
                let parsed: FreeformResponse = serde_json::from_str(json_text).map_err(|e| e.to_string())?;
                let mut score = Score::new(parsed.score, 1);
                score.reasoning = parsed.reasoning;
                score.hits = parsed.hits;
                score.misses = parsed.misses;
                Ok(score.capped())
            }
            JudgeMode::Checklist { items } => {
                let parsed: ChecklistResponse = serde_json::from_str(json_text).map_err(|e| e.to_string())?;
                let mut hits = Vec::new();
                let mut misses = Vec::new();
                let mut weighted_satisfied = 0.0f64;
                let mut weighted_total = 0.0f64;
                let mut any_required_failed = false;
                for item in items {
                    weighted_total += item.weight;
                    let result = parsed.results.iter().find(|r| r.id == item.id);
                    let satisfied = result.is_some_and(|r| r.satisfied);
                    if satisfied {
                        weighted_satisfied += item.weight;
                        hits.push(item.description.clone());
                    } else {
                        misses.push(item.description.clone());
                        if item.required {
                            any_required_failed = true;
                        }
                    }
                }
                let raw_score = if weighted_total > 0.0 { weighted_satisfied / weighted_total } else { 0.0 };
                let mut score = Score::new(raw_score, items.len().max(1) as u32);
                score.hits = hits;
                score.misses = misses;
                score = score.capped();
                if any_required_failed {
                    score = score.force_fail();
                }
                Ok(score)
            }
            JudgeMode::ScoreRange { items } => {
                let parsed: ScoreRangeResponse = serde_json::from_str(json_text).map_err(|e| e.to_string())?;
                let mut hits = Vec::new();
                let mut misses = Vec::new();
                let mut weighted_sum = 0.0f64;
                let mut weighted_total = 0.0f64;
                let mut any_required_failed = false;
                for item in items {
                    weighted_total += item.weight;
                    let Some(result) = parsed.results.iter().find(|r| r.id == item.id) else {
                        misses.push(format!("{}: no judge response", item.description));
                        any_required_failed = any_required_failed || item.required == Some(true) || item.required_min_score.is_some();
                        continue;
                    };
                    weighted_sum += item.weight * (result.score / 10.0);

                    let band = item
                        .score_ranges
                        .iter()
                        .find(|b| result.score >= b.score_range.0 && result.score <= b.score_range.1)
                        .map(|b| b.description.as_str())
                        .unwrap_or("unranged");
                    hits.push(format!("{}: {} ({band})", item.description, result.score));

                    let min_required = item.required_min_score.or(match item.required {
                        Some(true) => Some(10.0),
                        _ => None,
                    });
                    if let Some(min) = min_required {
                        if result.score < min {
                            any_required_failed = true;
                            misses.push(format!("{}: {} below required minimum {min} ({band})", item.description, result.score));
                        }
                    }
                }
                let raw_score = if weighted_total > 0.0 { weighted_sum / weighted_total } else { 0.0 };
                let mut score = Score::new(raw_score, items.len().max(1) as u32);
                score.hits = hits;
                score.misses = misses;
                score = score.capped();
                if any_required_failed {
                    score = score.force_fail();
                }
                Ok(score)
            }
        }
    }
}

#[async_trait]
impl Evaluator for LlmJudgeEvaluator {
    async fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<Score, EvaluatorError> {
        let provider = ctx.judge_provider.clone().ok_or(EvaluatorError::MissingJudgeProvider)?;
        let prompt = self.render_prompt(ctx);
        let mut last_error = String::from("no attempts made");

        for attempt in 0..self.config.max_retries.max(1) {
            let request = ProviderRequest::new(ctx.eval_case.id.clone(), ctx.attempt, prompt.clone());
            let response = provider.invoke(request).await?;
            let text = response
                .output_messages
                .last()
                .map(crate::model::Message::text_content)
                .unwrap_or_default();
            match self.parse_and_score(&text) {
                Ok(score) => return Ok(score),
                Err(err) => {
                    warn!(attempt, error = %err, "judge response failed to parse, retrying");
                    last_error = err;
                }
            }
        }
        Err(EvaluatorError::Parse(last_error))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "llm_judge"
    }
}

#[derive(Debug, Deserialize)]
struct FreeformResponse {
    score: f64,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    hits: Vec<String>,
    #[serde(default)]
    misses: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChecklistResultItem {
    id: String,
    satisfied: bool,
}

#[derive(Debug, Deserialize)]
struct ChecklistResponse {
    results: Vec<ChecklistResultItem>,
}

#[derive(Debug, Deserialize)]
struct ScoreRangeResultItem {
    id: String,
    score: f64,
}

#[derive(Debug, Deserialize)]
struct ScoreRangeResponse {
    results: Vec<ScoreRangeResultItem>,
}

/// Extracts the substring between the first `{` and the last `}`, tolerating
/// judges that wrap JSON in prose or code fences.
pub(crate) fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}
