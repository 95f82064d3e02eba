// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The field-accuracy comparator: checks named fields of a structured
//! candidate answer against an expected reference object.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Evaluator, EvaluatorError};
use crate::model::{EvaluationContext, Score};

/// How two field values are compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldMatchKind {
    /// Deep JSON equality.
    Exact,
    /// Both sides parsed as numbers and compared within `tolerance`.
    NumericTolerance {
        /// The maximum allowed absolute difference.
        tolerance: f64,
    },
    /// Both sides parsed as calendar dates and compared by year/month/day,
    /// ignoring time of day. Tries native ISO8601 first, then
    /// `DD-MMM-YYYY`, then slash-separated `MM/DD/YYYY` / `DD/MM/YYYY`
    /// (disambiguated by `formats`, falling back to the >12 heuristic).
    Date {
        /// Candidate format hints for the slash-separated case, e.g.
        /// `["DD/MM/YYYY"]`. Consulted before the >12 fallback.
        #[serde(default)]
        formats: Option<Vec<String>>,
    },
}

/// One field to check, addressed by a dotted/bracketed path into the
/// candidate and expected JSON objects (see [`super::tool_trajectory`]'s
/// path syntax).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// The field's path, e.g. `"order.total"` or `"items[0].sku"`.
    pub path: String,
    /// How to compare the two sides.
    #[serde(default = "default_match_kind")]
    pub match_kind: FieldMatchKind,
    /// This field's contribution to a `weighted_average` aggregation.
    #[serde(default)]
    pub weight: Option<f64>,
    /// Whether a missing candidate value fails this field (`true`) or is
    /// skipped with zero weight (`false`).
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_match_kind() -> FieldMatchKind {
    FieldMatchKind::Exact
}

fn default_required() -> bool {
    true
}

/// How per-field outcomes combine into one score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Every checked field must match, or the score is 0.
    AllOrNothing,
    /// `sum(weight * matched) / sum(weight)`, weight defaulting to 1.0.
    #[default]
    WeightedAverage,
}

/// Declarative configuration for a [`FieldAccuracyEvaluator`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FieldAccuracyConfig {
    /// An optional explicit name for this evaluator instance.
    #[serde(default)]
    pub name: Option<String>,
    /// The reference object fields are resolved against.
    #[serde(default)]
    pub expected: Value,
    /// The fields to check.
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    /// How per-field outcomes combine.
    #[serde(default)]
    pub aggregation: Aggregation,
}

/// Compares named fields of a JSON candidate answer against a reference.
pub struct FieldAccuracyEvaluator {
    name: String,
    config: FieldAccuracyConfig,
}

impl FieldAccuracyEvaluator {
    /// Builds a new evaluator from configuration.
    #[must_use]
    pub fn new(name: String, config: FieldAccuracyConfig) -> Self {
        Self { name, config }
    }
}

enum FieldOutcome {
    Matched(String),
    Missed(String),
    Skipped,
}

fn check_field(field: &FieldDescriptor, expected_root: &Value, candidate_root: Option<&Value>) -> FieldOutcome {
    let Some(expected_value) = resolve_path(expected_root, &field.path) else {
        return FieldOutcome::Skipped;
    };
    let actual_value = candidate_root.and_then(|root| resolve_path(root, &field.path));
    let Some(actual_value) = actual_value else {
        return if field.required {
            FieldOutcome::Missed(format!("{}: missing from candidate", field.path))
        } else {
            FieldOutcome::Skipped
        };
    };

    let matched = match &field.match_kind {
        FieldMatchKind::Exact => expected_value == actual_value,
        FieldMatchKind::NumericTolerance { tolerance } => {
            match (as_f64(expected_value), as_f64(actual_value)) {
                (Some(e), Some(a)) => (e - a).abs() <= *tolerance,
                _ => false,
            }
        }
        FieldMatchKind::Date { formats } => {
            match (as_date(expected_value, formats.as_deref()), as_date(actual_value, formats.as_deref())) {
                (Some(e), Some(a)) => e == a,
                _ => false,
            }
        }
    };

    if matched {
        FieldOutcome::Matched(format!("{}: matched", field.path))
    } else {
        FieldOutcome::Missed(format!("{}: expected {expected_value}, got {actual_value}", field.path))
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn as_date(value: &Value, formats: Option<&[String]>) -> Option<chrono::NaiveDate> {
    let s = value.as_str()?;
    parse_flexible_date(s, formats)
}

/// Parses a date string via the spec's fallback cascade: native ISO8601
/// (with or without a time component), then `DD-MMM-YYYY`, then
/// slash-separated `MM/DD/YYYY` / `DD/MM/YYYY`.
fn parse_flexible_date(s: &str, formats: Option<&[String]>) -> Option<chrono::NaiveDate> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if let Ok(d) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Some(d) = parse_dd_mmm_yyyy(s) {
        return Some(d);
    }
    parse_slash_date(s, formats)
}

fn parse_dd_mmm_yyyy(s: &str) -> Option<chrono::NaiveDate> {
    let parts: Vec<&str> = s.split('-').collect();
    if parts.len() != 3 {
        return None;
    }
    let day: u32 = parts[0].parse().ok()?;
    let month = month_from_abbr(parts[1])?;
    let year: i32 = parts[2].parse().ok()?;
    chrono::NaiveDate::from_ymd_opt(year, month, day)
}

fn month_from_abbr(s: &str) -> Option<u32> {
    const MONTHS: [&str; 12] =
        ["jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec"];
    let lower = s.to_lowercase();
    MONTHS.iter().position(|m| *m == lower).map(|i| i as u32 + 1)
}

/// Parses a slash-separated date, disambiguating month/day order via
/// `formats` first, then the >12 heuristic (whichever of the first two
/// numbers exceeds 12 must be the day), defaulting to `MM/DD/YYYY`.
fn parse_slash_date(s: &str, formats: Option<&[String]>) -> Option<chrono::NaiveDate> {
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() != 3 {
        return None;
    }
    let a: u32 = parts[0].parse().ok()?;
    let b: u32 = parts[1].parse().ok()?;
    let year: i32 = parts[2].parse().ok()?;

    let wants_dmy = formats.is_some_and(|fs| fs.iter().any(|f| f.eq_ignore_ascii_case("DD/MM/YYYY")));
    let wants_mdy = formats.is_some_and(|fs| fs.iter().any(|f| f.eq_ignore_ascii_case("MM/DD/YYYY")));

    let (month, day) = if wants_dmy {
        (b, a)
    } else if wants_mdy {
        (a, b)
    } else if a > 12 {
        (b, a)
    } else if b > 12 {
        (a, b)
    } else {
        (a, b)
    };
    chrono::NaiveDate::from_ymd_opt(year, month, day)
}

#[async_trait]
impl Evaluator for FieldAccuracyEvaluator {
    async fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<Score, EvaluatorError> {
        let candidate_root: Option<Value> = serde_json::from_str(&ctx.candidate).ok();

        let mut hits = Vec::new();
        let mut misses = Vec::new();
        let mut checked = 0u32;
        let mut matched = 0u32;
        let mut weighted_matched = 0.0f64;
        let mut weighted_total = 0.0f64;

        for field in &self.config.fields {
            match check_field(field, &self.config.expected, candidate_root.as_ref()) {
                FieldOutcome::Matched(msg) => {
                    checked += 1;
                    matched += 1;
                    weighted_matched += field.weight.unwrap_or(1.0);
                    weighted_total += field.weight.unwrap_or(1.0);
                    hits.push(msg);
                }
                FieldOutcome::Missed(msg) => {
                    checked += 1;
                    weighted_total += field.weight.unwrap_or(1.0);
                    misses.push(msg);
                }
                FieldOutcome::Skipped => {}
            }
        }

        let raw_score = match self.config.aggregation {
            Aggregation::AllOrNothing => {
                if checked == 0 || matched == checked {
                    1.0
                } else {
                    0.0
                }
            }
            Aggregation::WeightedAverage => {
                if weighted_total == 0.0 {
                    1.0
                } else {
                    weighted_matched / weighted_total
                }
            }
        };

        let mut score = Score::new(raw_score, checked.max(1));
        hits.truncate(4);
        misses.truncate(4);
        score.hits = hits;
        score.misses = misses;
        Ok(score)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "field_accuracy"
    }
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
    use crate::model::EvalCase;

    fn ctx<'a>(case: &'a EvalCase, candidate: String) -> EvaluationContext<'a> {
        EvaluationContext {
            eval_case: case,
            candidate,
            target: "t".into(),
            attempt: 0,
            prompt_inputs: Default::default(),
            judge_provider: None,
            output_messages: vec![],
            trace_summary: None,
            file_changes: None,
            workspace_path: None,
        }
    }

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

    #[tokio::test]
    async fn s3_weighted_average_over_mixed_match_kinds() {
        let config = FieldAccuracyConfig {
            expected: serde_json::json!({"total": 100.0, "currency": "USD", "placed_at": "2024-01-01T00:00:00Z"}),
            fields: vec![
                FieldDescriptor {
                    path: "total".into(),
                    match_kind: FieldMatchKind::NumericTolerance { tolerance: 0.5 },
                    weight: Some(2.0),
                    required: true,
                },
                FieldDescriptor {
                    path: "currency".into(),
                    match_kind: FieldMatchKind::Exact,
                    weight: Some(1.0),
                    required: true,
                },
                FieldDescriptor {
                    path: "placed_at".into(),
                    match_kind: FieldMatchKind::Date { formats: None },
                    weight: Some(1.0),
                    required: true,
                },
            ],
            aggregation: Aggregation::WeightedAverage,
            ..Default::default()
        };
        let evaluator = FieldAccuracyEvaluator::new("f".into(), config);
        let case = bare_case();
        let candidate = serde_json::json!({"total": 100.2, "currency": "EUR", "placed_at": "2024-01-01T00:00:00.000Z"}).to_string();
        let score = evaluator.evaluate(&ctx(&case, candidate)).await.unwrap();
        // total matches (2.0), currency mismatches (1.0), date matches (1.0) => 3/4
        assert!((score.score - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_expected_field_is_skipped_not_penalized() {
        let config = FieldAccuracyConfig {
            expected: serde_json::json!({"a": 1}),
            fields: vec![FieldDescriptor {
                path: "b".into(),
                match_kind: FieldMatchKind::Exact,
                weight: None,
                required: true,
            }],
            aggregation: Aggregation::WeightedAverage,
            ..Default::default()
        };
        let evaluator = FieldAccuracyEvaluator::new("f".into(), config);
        let case = bare_case();
        let score = evaluator.evaluate(&ctx(&case, serde_json::json!({}).to_string())).await.unwrap();
        assert_eq!(score.score, 1.0);
    }

    #[tokio::test]
    async fn missing_required_candidate_field_fails_all_or_nothing() {
        let config = FieldAccuracyConfig {
            expected: serde_json::json!({"a": 1, "b": 2}),
            fields: vec![
                FieldDescriptor {
                    path: "a".into(),
                    match_kind: FieldMatchKind::Exact,
                    weight: None,
                    required: true,
                },
                FieldDescriptor {
                    path: "b".into(),
                    match_kind: FieldMatchKind::Exact,
                    weight: None,
                    required: true,
                },
            ],
            aggregation: Aggregation::AllOrNothing,
            ..Default::default()
        };
        let evaluator = FieldAccuracyEvaluator::new("f".into(), config);
        let case = bare_case();
        let score = evaluator.evaluate(&ctx(&case, serde_json::json!({"a": 1}).to_string())).await.unwrap();
        assert_eq!(score.score, 0.0);
        assert!(score.misses.iter().any(|m| m.contains("b")));
    }

    #[tokio::test]
    async fn non_required_missing_candidate_field_is_skipped() {
        let config = FieldAccuracyConfig {
            expected: serde_json::json!({"a": 1, "b": 2}),
            fields: vec![FieldDescriptor {
                path: "b".into(),
                match_kind: FieldMatchKind::Exact,
                weight: None,
                required: false,
            }],
            aggregation: Aggregation::WeightedAverage,
            ..Default::default()
        };
        let evaluator = FieldAccuracyEvaluator::new("f".into(), config);
        let case = bare_case();
        let score = evaluator.evaluate(&ctx(&case, serde_json::json!({"a": 1}).to_string())).await.unwrap();
        assert_eq!(score.score, 1.0);
    }

    #[test]
    fn path_resolution_handles_nested_array_indices() {
        let v = serde_json::json!({"items": [{"sku": "A"}, {"sku": "B"}]});
        assert_eq!(resolve_path(&v, "items[1].sku").unwrap(), "B");
    }

    #[tokio::test]
    async fn s3_field_accuracy_mixed_kinds_with_dd_mmm_date() {
        let config = FieldAccuracyConfig {
            expected: serde_json::json!({"invoice_number": "INV-1", "net_total": 1889, "invoice_date": "15-JAN-2025"}),
            fields: vec![
                FieldDescriptor {
                    path: "invoice_number".into(),
                    match_kind: FieldMatchKind::Exact,
                    weight: Some(2.0),
                    required: true,
                },
                FieldDescriptor {
                    path: "net_total".into(),
                    match_kind: FieldMatchKind::NumericTolerance { tolerance: 1.0 },
                    weight: Some(1.0),
                    required: true,
                },
                FieldDescriptor {
                    path: "invoice_date".into(),
                    match_kind: FieldMatchKind::Date { formats: None },
                    weight: Some(1.0),
                    required: true,
                },
            ],
            aggregation: Aggregation::WeightedAverage,
            ..Default::default()
        };
        let evaluator = FieldAccuracyEvaluator::new("f".into(), config);
        let case = bare_case();
        let candidate = serde_json::json!({
            "invoice_number": "INV-1",
            "net_total": 1889.5,
            "invoice_date": "2025-01-15",
        })
        .to_string();
        let score = evaluator.evaluate(&ctx(&case, candidate)).await.unwrap();
        assert_eq!(score.score, 1.0);
    }

    #[test]
    fn dd_mm_yyyy_disambiguated_by_formats_hint() {
        let formats = vec!["DD/MM/YYYY".to_string()];
        let d = parse_flexible_date("03/04/2025", Some(&formats)).unwrap();
        assert_eq!(d, chrono::NaiveDate::from_ymd_opt(2025, 4, 3).unwrap());
    }

    #[test]
    fn ambiguous_slash_date_falls_back_to_gt_12_heuristic() {
        // 13 cannot be a month, so it must be the day: DD/MM/YYYY.
        let d = parse_flexible_date("13/02/2025", None).unwrap();
        assert_eq!(d, chrono::NaiveDate::from_ymd_opt(2025, 2, 13).unwrap());
    }

    #[test]
    fn date_comparison_ignores_time_of_day() {
        let a = parse_flexible_date("2024-01-01T23:59:59Z", None).unwrap();
        let b = parse_flexible_date("2024-01-01T00:00:00Z", None).unwrap();
        assert_eq!(a, b);
    }
}
