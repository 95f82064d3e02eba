// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A YAML document written once, on close, mirroring [`super::json::JsonWriter`]'s
//! aggregate shape.

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;

use super::{ResultWriter, WriterError};
use crate::model::{EvaluationResult, Verdict};

/// Buffers every appended result and writes one aggregate YAML document on
/// close.
pub struct YamlWriter {
    path: PathBuf,
    results: Option<Vec<EvaluationResult>>,
}

impl YamlWriter {
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
struct Document {
    summary: Summary,
    results: Vec<EvaluationResult>,
}

#[async_trait]
impl ResultWriter for YamlWriter {
    async fn append(&mut self, result: &EvaluationResult) -> Result<(), WriterError> {
        let results = self.results.as_mut().ok_or(WriterError::AlreadyClosed)?;
        results.push(result.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), WriterError> {
        let Some(results) = self.results.take() else {
            return Ok(());
        };
        let total = results.len();
        let passed = results.iter().filter(|r| r.verdict == Verdict::Pass).count();
        let borderline = results.iter().filter(|r| r.verdict == Verdict::Borderline).count();
        let failed = results.iter().filter(|r| r.verdict == Verdict::Fail).count();
        let mean_score = if total == 0 {
            0.0
        } else {
            results.iter().map(|r| r.score).sum::<f64>() / total as f64
        };
        let document = Document {
            summary: Summary {
                total,
                passed,
                borderline,
                failed,
                mean_score,
            },
            results,
        };
        let body = serde_yaml::to_string(&document)?;
        tokio::fs::write(&self.path, body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NamedScore;

    fn sample() -> EvaluationResult {
        EvaluationResult {
            timestamp: chrono::Utc::now(),
            test_id: "t".into(),
            dataset: None,
            score: 1.0,
            verdict: Verdict::Pass,
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
                score: 1.0,
                verdict: Verdict::Pass,
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
    async fn writes_valid_yaml_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.yaml");
        let mut writer = YamlWriter::new(path.clone());
        writer.append(&sample()).await.unwrap();
        writer.close().await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&contents).unwrap();
        assert_eq!(parsed["summary"]["total"], 1);
    }
}
