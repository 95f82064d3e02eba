// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The code-judge evaluator: scores a candidate by handing it to an
//! external subprocess and parsing back a JSON verdict.
//!
//! The dispatcher is responsible for injecting judge-proxy credentials
//! (`AGENTV_TARGET_PROXY_URL` / `AGENTV_TARGET_PROXY_TOKEN`) into
//! [`CodeJudgeConfig::env`] before spawn, when [`CodeJudgeConfig::target`] is
//! set; this evaluator only forwards whatever environment it's given.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{Evaluator, EvaluatorError};
use crate::model::{EvaluationContext, Score};

/// `output_messages` serialized above this size is spilled to a sibling
/// temp file and replaced in the stdin payload with `{output_path}`, rather
/// than inflating the pipe the child must drain before it can reply.
const OUTPUT_MESSAGES_SPILL_THRESHOLD_BYTES: usize = 50_000;

/// The tail of captured stderr kept when a subprocess fails, in bytes.
const STDERR_TAIL_BYTES: usize = 2000;

/// Declarative configuration for a [`CodeJudgeEvaluator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeJudgeConfig {
    /// An optional explicit name for this evaluator instance.
    #[serde(default)]
    pub name: Option<String>,
    /// The executable to run.
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Maximum wall-clock time to wait for the subprocess.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// The working directory the subprocess is spawned in.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Additional environment variables, merged over the inherited
    /// environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// When set, the dispatcher starts a judge proxy bound to this target
    /// before spawning the subprocess, and exports its URL/token.
    #[serde(default)]
    pub target: Option<String>,
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Default for CodeJudgeConfig {
    fn default() -> Self {
        Self {
            name: None,
            command: String::new(),
            args: Vec::new(),
            timeout_seconds: default_timeout_seconds(),
            working_dir: None,
            env: BTreeMap::new(),
            target: None,
        }
    }
}

/// Scores a candidate by delegating to an external subprocess.
pub struct CodeJudgeEvaluator {
    name: String,
    config: CodeJudgeConfig,
}

impl CodeJudgeEvaluator {
    /// Builds a new evaluator from configuration.
    #[must_use]
    pub fn new(name: String, config: CodeJudgeConfig) -> Self {
        Self { name, config }
    }

    /// Builds the stdin payload per the evaluator's wire contract, spilling
    /// `output_messages` to `spill_path` in place of the inline array when
    /// it's been written there for being too large.
    fn build_payload(&self, ctx: &EvaluationContext<'_>, spill_path: Option<&std::path::Path>) -> serde_json::Value {
        let metadata = ctx.eval_case.metadata.as_ref();
        let guideline_files = metadata
            .and_then(|m| m.get("guideline_files"))
            .cloned()
            .unwrap_or_else(|| serde_json::json!([]));
        let input_files = metadata.and_then(|m| m.get("input_files")).cloned().unwrap_or_else(|| serde_json::json!([]));

        let output_messages = match spill_path {
            Some(path) => serde_json::json!({ "output_path": path }),
            None => serde_json::to_value(&ctx.output_messages).unwrap_or_default(),
        };

        serde_json::json!({
            "question": ctx.eval_case.question(),
            "criteria": ctx.eval_case.criteria,
            "expected_outcome": ctx.eval_case.criteria,
            "expected_messages": ctx.eval_case.expected_messages,
            "reference_answer": ctx.eval_case.reference_answer(),
            "candidate_answer": ctx.candidate,
            "output_messages": output_messages,
            "trace_summary": ctx.trace_summary,
            "guideline_files": guideline_files,
            "input_files": input_files,
            "input_messages": ctx.eval_case.input_messages,
            "config": &self.config,
            "workspace_path": ctx.workspace_path,
        })
    }
}

#[async_trait]
impl Evaluator for CodeJudgeEvaluator {
    async fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<Score, EvaluatorError> {
        let output_messages_json = serde_json::to_vec(&ctx.output_messages)?;
        let mut spill_file = None;
        let spill_path = if output_messages_json.len() > OUTPUT_MESSAGES_SPILL_THRESHOLD_BYTES {
            let file = tempfile::NamedTempFile::new()?;
            std::fs::write(file.path(), &output_messages_json)?;
            let path = file.path().to_path_buf();
            spill_file = Some(file);
            Some(path)
        } else {
            None
        };

        let payload = self.build_payload(ctx, spill_path.as_deref());
        let serialized = serde_json::to_vec(&payload)?;

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&serialized).await?;
            stdin.shutdown().await?;
        }

        let timeout = Duration::from_secs(self.config.timeout_seconds);
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| EvaluatorError::Timeout(timeout))??;
        drop(spill_file);

        if !output.status.success() {
            let stderr_tail = tail(&output.stderr, STDERR_TAIL_BYTES);
            return Err(EvaluatorError::Script {
                message: format!("exit status {}", output.status),
                stderr_tail,
            });
        }

        let response: CodeJudgeResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| EvaluatorError::Parse(format!("malformed code-judge output: {e}")))?;

        let mut score = Score::new(response.score, 1);
        score.reasoning = response.reasoning;
        score.hits = response.hits;
        score.misses = response.misses;
        score.details = response.details;
        Ok(score.capped())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "code_judge"
    }
}

#[derive(Debug, Deserialize)]
struct CodeJudgeResponse {
    score: f64,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    hits: Vec<String>,
    #[serde(default)]
    misses: Vec<String>,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

fn tail(bytes: &[u8], max_len: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max_len {
        text.into_owned()
    } else {
        text[text.len() - max_len..].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EvalCase;

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

    fn ctx(case: &EvalCase) -> EvaluationContext<'_> {
        EvaluationContext {
            eval_case: case,
            candidate: "42".into(),
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

    #[tokio::test]
    async fn nonexistent_command_surfaces_as_io_error() {
        let config = CodeJudgeConfig {
            command: "/nonexistent/agentv-code-judge-fixture".into(),
            ..Default::default()
        };
        let evaluator = CodeJudgeEvaluator::new("cj".into(), config);
        let case = bare_case();
        let err = evaluator.evaluate(&ctx(&case)).await.unwrap_err();
        assert!(matches!(err, EvaluatorError::Io(_)));
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_stderr_tail() {
        let config = CodeJudgeConfig {
            command: "sh".into(),
            args: vec!["-c".into(), "cat >/dev/null; echo bad-input 1>&2; exit 1".into()],
            ..Default::default()
        };
        let evaluator = CodeJudgeEvaluator::new("cj".into(), config);
        let case = bare_case();
        let err = evaluator.evaluate(&ctx(&case)).await.unwrap_err();
        match err {
            EvaluatorError::Script { stderr_tail, .. } => assert!(stderr_tail.contains("bad-input")),
            other => panic!("expected Script error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn successful_run_parses_score_json_from_stdout() {
        let config = CodeJudgeConfig {
            command: "sh".into(),
            args: vec!["-c".into(), r#"cat >/dev/null; echo '{"score": 1.0, "reasoning": "ok"}'"#.into()],
            ..Default::default()
        };
        let evaluator = CodeJudgeEvaluator::new("cj".into(), config);
        let case = bare_case();
        let score = evaluator.evaluate(&ctx(&case)).await.unwrap();
        assert_eq!(score.score, 1.0);
        assert_eq!(score.reasoning.as_deref(), Some("ok"));
    }

    #[test]
    fn tail_truncates_to_max_length() {
        let long = "x".repeat(5000);
        let truncated = tail(long.as_bytes(), 2000);
        assert_eq!(truncated.len(), 2000);
    }

    #[test]
    fn payload_carries_the_wire_contract_fields() {
        let evaluator = CodeJudgeEvaluator::new("cj".into(), CodeJudgeConfig::default());
        let mut case = bare_case();
        case.input_messages = vec![crate::model::Message::text(crate::model::Role::User, "what is 2+2?")];
        let payload = evaluator.build_payload(&ctx(&case), None);
        let obj = payload.as_object().unwrap();
        for key in [
            "question",
            "criteria",
            "expected_outcome",
            "expected_messages",
            "reference_answer",
            "candidate_answer",
            "output_messages",
            "trace_summary",
            "guideline_files",
            "input_files",
            "input_messages",
            "config",
            "workspace_path",
        ] {
            assert!(obj.contains_key(key), "payload missing {key}");
        }
        assert_eq!(obj["question"], "what is 2+2?");
    }

    #[test]
    fn spilled_output_messages_replace_the_inline_array_with_a_path() {
        let evaluator = CodeJudgeEvaluator::new("cj".into(), CodeJudgeConfig::default());
        let case = bare_case();
        let spill_path = std::path::Path::new("/tmp/agentv-spill.json");
        let payload = evaluator.build_payload(&ctx(&case), Some(spill_path));
        assert_eq!(payload["output_messages"]["output_path"], spill_path.to_string_lossy().as_ref());
    }

    #[tokio::test]
    async fn large_output_messages_spill_to_a_file_not_stdin() {
        let config = CodeJudgeConfig {
            command: "sh".into(),
            args: vec!["-c".into(), r#"payload=$(cat); echo "$payload" | grep -q output_path && echo '{"score": 1.0}' || echo '{"score": 0.0}'"#.into()],
            ..Default::default()
        };
        let evaluator = CodeJudgeEvaluator::new("cj".into(), config);
        let mut case = bare_case();
        case.input_messages = vec![];
        let big_text = "x".repeat(OUTPUT_MESSAGES_SPILL_THRESHOLD_BYTES + 1000);
        let mut context = ctx(&case);
        context.output_messages = vec![crate::model::Message::text(crate::model::Role::Assistant, big_text)];
        let score = evaluator.evaluate(&context).await.unwrap();
        assert_eq!(score.score, 1.0);
    }
}
