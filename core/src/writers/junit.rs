// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A JUnit XML document, for CI systems that only understand that format.
//! Results are grouped into one `<testsuite>` per dataset.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;

use super::{ResultWriter, WriterError};
use crate::model::{EvaluationResult, Verdict};

/// Buffers every appended result and writes one JUnit XML document, grouped
/// by dataset, on close.
pub struct JunitWriter {
    path: PathBuf,
    results: Option<Vec<EvaluationResult>>,
}

impl JunitWriter {
    /// Builds a writer targeting `path`; nothing is written until `close`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            results: Some(Vec::new()),
        }
    }
}

#[async_trait]
impl ResultWriter for JunitWriter {
    async fn append(&mut self, result: &EvaluationResult) -> Result<(), WriterError> {
        let results = self.results.as_mut().ok_or(WriterError::AlreadyClosed)?;
        results.push(result.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), WriterError> {
        let Some(results) = self.results.take() else {
            return Ok(());
        };
        let xml = render(&results);
        tokio::fs::write(&self.path, xml).await?;
        Ok(())
    }
}

fn render(results: &[EvaluationResult]) -> String {
    let mut by_dataset: BTreeMap<String, Vec<&EvaluationResult>> = BTreeMap::new();
    for r in results {
        by_dataset
            .entry(r.dataset.clone().unwrap_or_else(|| "default".to_string()))
            .or_default()
            .push(r);
    }

    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<testsuites>\n");
    for (dataset, cases) in &by_dataset {
        let failures = cases.iter().filter(|r| r.verdict == Verdict::Fail).count();
        let _ = writeln!(
            out,
            "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{failures}\">",
            escape_xml(dataset),
            cases.len()
        );
        for case in cases {
            let _ = write!(out, "    <testcase name=\"{}\" classname=\"{}\"", escape_xml(&case.test_id), escape_xml(dataset));
            if case.verdict == Verdict::Fail {
                let _ = writeln!(out, ">");
                let message = case.reasoning.clone().unwrap_or_else(|| "evaluation failed".to_string());
                let _ = writeln!(out, "      <failure message=\"{}\">{}</failure>", escape_xml(&message), escape_xml(&case.misses.join("; ")));
                out.push_str("    </testcase>\n");
            } else {
                let _ = writeln!(out, "/>");
            }
        }
        out.push_str("  </testsuite>\n");
    }
    out.push_str("</testsuites>\n");
    out
}

fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}
