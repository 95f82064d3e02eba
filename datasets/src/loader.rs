// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Suite loading: reads a suite file (`.json`, `.yaml`/`.yml`, or `.jsonl`)
//! into `EvalCase`s, resolving `file` message references first against the
//! suite file's own directory, then against a repo root.
//!
//! A thin reference implementation, not a hardened parser — see §10.

use crate::schema::{RawCase, Suite};
use crate::DatasetError;
use agentv_core::model::EvalCase;
use serde_valid::Validate;
use std::path::{Path, PathBuf};

/// Loads suite files into resolved [`EvalCase`]s.
pub struct SuiteLoader {
    /// Fallback root for `file` references that don't resolve relative to
    /// the suite file itself.
    repo_root: Option<PathBuf>,
}

impl SuiteLoader {
    /// Builds a loader with no repo-root fallback; `file` references must
    /// resolve relative to the suite file.
    #[must_use]
    pub fn new() -> Self {
        Self { repo_root: None }
    }

    /// Builds a loader that falls back to `repo_root` for `file` references
    /// that don't exist relative to the suite file.
    #[must_use]
    pub fn with_repo_root(repo_root: impl Into<PathBuf>) -> Self {
        Self { repo_root: Some(repo_root.into()) }
    }

    /// Loads a suite file, auto-detecting its format by extension
    /// (`.json`, `.yaml`/`.yml`, `.jsonl`).
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::InvalidFormat`] for an unrecognized
    /// extension, a parse error from the underlying format, or
    /// [`DatasetError::ValidationError`] if the suite fails schema
    /// validation.
    pub fn load(&self, path: &Path) -> Result<Vec<EvalCase>, DatasetError> {
        let suite_dir = path.parent().unwrap_or_else(|| Path::new("."));
        match path.extension().and_then(|s| s.to_str()) {
            Some("jsonl") => self.load_jsonl(path, suite_dir),
            Some("yaml" | "yml") => self.load_whole(path, suite_dir, |content| {
                serde_yaml::from_str(content).map_err(DatasetError::from)
            }),
            Some("json") => self.load_whole(path, suite_dir, |content| {
                serde_json::from_str(content).map_err(DatasetError::from)
            }),
            other => Err(DatasetError::InvalidFormat(format!(
                "unrecognized suite file extension: {:?}",
                other
            ))),
        }
    }

    fn load_whole(
        &self,
        path: &Path,
        suite_dir: &Path,
        parse: impl FnOnce(&str) -> Result<Suite, DatasetError>,
    ) -> Result<Vec<EvalCase>, DatasetError> {
        let content = std::fs::read_to_string(path)?;
        let suite = parse(&content)?;
        suite
            .validate()
            .map_err(|e| DatasetError::ValidationError(format!("suite {} failed validation: {e}", suite.name)))?;

        suite
            .cases
            .into_iter()
            .map(|case| self.resolve_case(case, suite_dir, &suite.name))
            .collect()
    }

    /// JSONL suites have no wrapping `name`/`cases` envelope: one case per
    /// line, dataset-tagged by the file's stem.
    fn load_jsonl(&self, path: &Path, suite_dir: &Path) -> Result<Vec<EvalCase>, DatasetError> {
        let dataset_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("suite")
            .to_string();
        let content = std::fs::read_to_string(path)?;

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                let case: RawCase = serde_json::from_str(line)?;
                case.validate()
                    .map_err(|e| DatasetError::ValidationError(format!("case {} failed validation: {e}", case.id)))?;
                self.resolve_case(case, suite_dir, &dataset_name)
            })
            .collect()
    }

    fn resolve_case(&self, mut case: RawCase, suite_dir: &Path, dataset: &str) -> Result<EvalCase, DatasetError> {
        for message in case.input_messages.iter_mut().chain(case.expected_messages.iter_mut().flatten()) {
            if let Some(file_ref) = message.file.take() {
                message.content = Some(self.read_file_ref(&file_ref, suite_dir)?);
            }
        }
        Ok(case.into_eval_case(dataset.to_string()))
    }

    fn read_file_ref(&self, file_ref: &str, suite_dir: &Path) -> Result<String, DatasetError> {
        let local = suite_dir.join(file_ref);
        if local.exists() {
            return Ok(std::fs::read_to_string(local)?);
        }
        if let Some(root) = &self.repo_root {
            let from_root = root.join(file_ref);
            if from_root.exists() {
                return Ok(std::fs::read_to_string(from_root)?);
            }
        }
        Err(DatasetError::NotFound(format!(
            "referenced file not found relative to suite directory or repo root: {file_ref}"
        )))
    }
}

impl Default for SuiteLoader {
    fn default() -> Self {
        Self::new()
    }
}
