// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A single JSON document written once, on close: the full result array
//! plus aggregate pass/fail/borderline counts and the mean score.

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;

use super::{ResultWriter, WriterError};
use crate::model::{EvaluationResult, Verdict};

/// Buffers every appended result and writes one aggregate JSON document on
/// close.
pub struct JsonWriter {
    path: PathBuf,
    results: Option<Vec<EvaluationResult>>,
}

impl JsonWriter {
    /// Builds a writer targeting `path`; nothing is written until `close`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            results: Some(Vec::new()),
        }
    }
}

#[derive(Serialize)]
struct Summary {
    total: usize,
    passed: usize,
    borderline: usize,
    failed: usize,
    mean_score: f64,
}

#[derive(Serialize)]
struct Document<'a> {
    summary: Summary,
    results: &'a [EvaluationResult],
}

fn summarize(results: &[EvaluationResult]) -> Summary {
    let total = results.len();
    let passed = results.iter().filter(|r| r.verdict == Verdict::Pass).count();
    let borderline = results.iter().filter(|r| r.verdict == Verdict::Borderline).count();
    let failed = results.iter().filter(|r| r.verdict == Verdict::Fail).count();
    let mean_score = if total == 0 {
        0.0
    } else {
        results.iter().map(|r| r.score).sum::<f64>() / total as f64
    };
    Summary {
        total,
        passed,
        borderline,
        failed,
        mean_score,
    }
}

#[async_trait]
impl ResultWriter for JsonWriter {
    async fn append(&mut self, result: &EvaluationResult) -> Result<(), WriterError> {
        let results = self.results.as_mut().ok_or(WriterError::AlreadyClosed)?;
        results.push(result.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), WriterError> {
        let Some(results) = self.results.take() else {
            return Ok(());
        };
        let document = Document {
            summary: summarize(&results),
            results: &results,
        };
        let body = serde_json::to_vec_pretty(&document)?;
        tokio::fs::write(&self.path, body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NamedScore;

    fn sample(verdict: Verdict, score: f64) -> EvaluationResult {
        EvaluationResult {
            timestamp: chrono::Utc::now(),
            test_id: "t".into(),
            dataset: None,
            score,
            verdict,
            hits: vec![],
            misses: vec![],
            reasoning: None,
            candidate_answer: String::new(),
            target: "t".into(),
            attempt: 0,
            trial_of: None,
            evaluator_scores: vec![NamedScore {
                name: "e".into(),
                kind: "llm_judge".into(),
                score,
                verdict,
                hits: vec![],
                misses: vec![],
                weight: None,
                reasoning: None,
                details: None,
                evaluator_results: None,
            }],
            error: None,
            trace_summary: None,
            output_messages: None,
        }
    }

    #[tokio::test]
    async fn writes_aggregate_document_only_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let mut writer = JsonWriter::new(path.clone());
        writer.append(&sample(Verdict::Pass, 1.0)).await.unwrap();
        writer.append(&sample(Verdict::Fail, 0.0)).await.unwrap();
        assert!(!path.exists());
        writer.close().await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["summary"]["total"], 2);
        assert_eq!(parsed["summary"]["passed"], 1);
        assert_eq!(parsed["summary"]["failed"], 1);
        assert_eq!(parsed["summary"]["mean_score"], 0.5);
    }

    #[tokio::test]
    async fn append_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let mut writer = JsonWriter::new(path);
        writer.close().await.unwrap();
        let err = writer.append(&sample(Verdict::Pass, 1.0)).await.unwrap_err();
        assert!(matches!(err, WriterError::AlreadyClosed));
    }
}
