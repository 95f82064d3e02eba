// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Fans every append out to a fixed set of writers, so one run can emit
//! `.jsonl`, `.json`, and `.xml` simultaneously.

use async_trait::async_trait;

use super::{ResultWriter, WriterError};
use crate::model::EvaluationResult;

/// Forwards every call to a fixed set of sub-writers.
pub struct MultiplexWriter {
    writers: Vec<Box<dyn ResultWriter>>,
}

impl MultiplexWriter {
    /// Builds a multiplexer over `writers`, in the order they'll be called.
    #[must_use]
    pub fn new(writers: Vec<Box<dyn ResultWriter>>) -> Self {
        Self { writers }
    }
}

#[async_trait]
impl ResultWriter for MultiplexWriter {
    async fn append(&mut self, result: &EvaluationResult) -> Result<(), WriterError> {
        for writer in &mut self.writers {
            writer.append(result).await?;
        }
        Ok(())
    }

    /// Closes every sub-writer in LIFO order, continuing even if an earlier
    /// one fails; the first error encountered is returned after every
    /// sub-writer has had a chance to flush.
    async fn close(&mut self) -> Result<(), WriterError> {
        let mut first_error = None;
        for writer in self.writers.iter_mut().rev() {
            if let Err(e) = writer.close().await {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NamedScore, Verdict};
    use crate::writers::JsonlWriter;

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
    async fn appends_to_every_sub_writer() {
        let dir = tempfile::tempdir().unwrap();
        let a = JsonlWriter::create(&dir.path().join("a.jsonl")).await.unwrap();
        let b = JsonlWriter::create(&dir.path().join("b.jsonl")).await.unwrap();
        let mut multi = MultiplexWriter::new(vec![Box::new(a), Box::new(b)]);
        multi.append(&sample()).await.unwrap();
        multi.close().await.unwrap();
        let a_contents = tokio::fs::read_to_string(dir.path().join("a.jsonl")).await.unwrap();
        let b_contents = tokio::fs::read_to_string(dir.path().join("b.jsonl")).await.unwrap();
        assert_eq!(a_contents.lines().count(), 1);
        assert_eq!(b_contents.lines().count(), 1);
    }
}
