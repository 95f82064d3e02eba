// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The per-work-item pipeline: workspace setup, provider invocation, trace
//! normalization, judge resolution, sequential evaluator execution, merge,
//! and workspace teardown.
//!
//! One [`WorkItem`] is exactly one `(case, attempt)` pair; running it never
//! touches any other work item's workspace, provider call, or evaluator
//! state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::evaluators::{build_evaluator, code_judge::CodeJudgeConfig, CodeJudgeEvaluator, EvaluatorConfig};
use crate::model::{EvalCase, EvaluationContext, EvaluationResult, Message, NamedScore, Role, Score, TraceSummary, Verdict};
use crate::providers::{Provider, ProviderRequest};
use crate::proxy::{self, JudgeProxyConfig, TargetProviderResolver};

use super::retry::invoke_with_retry;
use super::workspace;

/// One `(case, attempt)` unit of work. Attempts are independent trials, not
/// retries — each gets its own provider invocation and its own result.
#[derive(Clone)]
pub struct WorkItem {
    /// The case being evaluated.
    pub case: Arc<EvalCase>,
    /// The 0-indexed attempt number.
    pub attempt: u32,
    /// The identity this attempt is a repeat of, set whenever a suite runs
    /// more than one trial per case.
    pub trial_of: Option<String>,
}

/// The fixed, per-run context every work item executes against.
pub struct PipelineContext {
    /// The target name cases are evaluated against.
    pub target_name: String,
    /// The candidate provider.
    pub provider: Arc<dyn Provider>,
    /// The judge provider, if distinct from `provider`.
    pub judge_provider: Option<Arc<dyn Provider>>,
    /// The per-attempt timeout, enforced by the dispatcher around this
    /// entire pipeline, not by this module itself.
    pub attempt_timeout: Duration,
    /// Maximum provider-level retries for a retryable error.
    pub max_retries: u32,
    /// The base delay before the first retry.
    pub retry_base_delay: Duration,
    /// The backoff ceiling.
    pub retry_max_delay: Duration,
    /// Resolves a named target to its provider, for a code-judge evaluator
    /// that declares [`CodeJudgeConfig::target`]. `None` means no such
    /// evaluator can be satisfied and it fails with an explanatory error.
    pub target_resolver: Option<Arc<dyn TargetProviderResolver>>,
}

/// Runs one work item end to end, never propagating a panic or unhandled
/// error out — every failure mode is captured as a failed
/// [`EvaluationResult`] instead, per the error-handling design: an
/// individual work item never aborts the run.
pub async fn run_work_item(ctx: &PipelineContext, item: WorkItem, cancellation: CancellationToken) -> EvaluationResult {
    let started = chrono::Utc::now();

    let workspace = match &item.case.workspace {
        Some(descriptor) => match workspace::materialize(descriptor).await {
            Ok(ws) => Some(ws),
            Err(e) => return error_result(ctx, &item, started, format!("workspace setup failed: {e}")),
        },
        None => None,
    };

    let outcome = run_inner(ctx, &item, workspace.as_ref().map(|w| w.path.clone()), cancellation).await;

    if let (Some(descriptor), Some(ws)) = (&item.case.workspace, &workspace) {
        if let Err(e) = workspace::teardown(descriptor, &ws.path).await {
            warn!(case = %item.case.id, error = %e, "workspace teardown failed");
        }
    }

    match outcome {
        Ok(result) => result,
        Err(message) => error_result(ctx, &item, started, message),
    }
}

/// Builds the [`EvaluationResult`] the dispatcher emits when `item`'s
/// per-attempt timeout elapses before [`run_work_item`] returns.
#[must_use]
pub fn timeout_result(ctx: &PipelineContext, item: &WorkItem) -> EvaluationResult {
    error_result(ctx, item, chrono::Utc::now(), format!("attempt timed out after {:?}", ctx.attempt_timeout))
}

async fn run_inner(
    ctx: &PipelineContext,
    item: &WorkItem,
    workspace_path: Option<std::path::PathBuf>,
    cancellation: CancellationToken,
) -> Result<EvaluationResult, String> {
    let request = build_provider_request(&item.case, item.attempt, cancellation);
    let response = invoke_with_retry(
        ctx.provider.as_ref(),
        &request,
        ctx.max_retries,
        ctx.retry_base_delay,
        ctx.retry_max_delay,
    )
    .await
    .map_err(|e| e.to_string())?;

    let mut trace_summary = TraceSummary::from_output_messages(&response.output_messages);
    trace_summary.token_usage = response.token_usage;
    trace_summary.cost_usd = response.cost_usd;
    trace_summary.duration_ms = Some(response.duration_ms);

    let candidate = response
        .output_messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .map(Message::text_content)
        .unwrap_or_default();

    let judge_provider = ctx.judge_provider.clone().or_else(|| Some(Arc::clone(&ctx.provider)));

    let eval_ctx = EvaluationContext {
        eval_case: &item.case,
        candidate: candidate.clone(),
        target: ctx.target_name.clone(),
        attempt: item.attempt,
        prompt_inputs: BTreeMap::new(),
        judge_provider,
        output_messages: response.output_messages.clone(),
        trace_summary: Some(trace_summary.clone()),
        file_changes: None,
        workspace_path: workspace_path.clone(),
    };

    let evaluator_scores = run_evaluators(ctx, &item.case, &eval_ctx).await;
    let merged = merge_scores(&evaluator_scores);

    Ok(EvaluationResult {
        timestamp: chrono::Utc::now(),
        test_id: item.case.id.clone(),
        dataset: Some(item.case.dataset.clone()),
        score: merged.score,
        verdict: merged.verdict,
        hits: merged.hits,
        misses: merged.misses,
        reasoning: merged.reasoning,
        candidate_answer: candidate,
        target: ctx.target_name.clone(),
        attempt: item.attempt,
        trial_of: item.trial_of.clone(),
        evaluator_scores,
        error: None,
        trace_summary: Some(trace_summary),
        output_messages: Some(response.output_messages),
    })
}

/// Renders a case's input transcript into a single [`ProviderRequest`]: any
/// system message becomes the system prompt, the final message becomes the
/// question, and everything in between is prior context.
fn build_provider_request(case: &EvalCase, attempt: u32, cancellation: CancellationToken) -> ProviderRequest {
    let mut system_prompt = None;
    let mut context = Vec::new();
    let mut question = String::new();
    let last_index = case.input_messages.len().saturating_sub(1);

    for (i, message) in case.input_messages.iter().enumerate() {
        match message.role {
            Role::System => system_prompt.get_or_insert_with(|| message.text_content()),
            _ if i == last_index => {
                question = message.text_content();
                continue;
            }
            _ => {
                context.push(message.clone());
                continue;
            }
        };
    }

    let mut request = ProviderRequest::new(case.id.clone(), attempt, question);
    request.system_prompt = system_prompt;
    request.messages = context;
    request.cancellation = cancellation;
    request
}

async fn run_evaluators(ctx: &PipelineContext, case: &EvalCase, eval_ctx: &EvaluationContext<'_>) -> Vec<NamedScore> {
    let mut scores = Vec::with_capacity(case.evaluator_configs.len());
    for config in &case.evaluator_configs {
        let name = config.name();
        let kind = config.kind();

        let (score, error) = match run_one_evaluator(ctx, config, eval_ctx).await {
            Ok(s) => (s, None),
            Err(e) => (Score::new(0.0, 1).force_fail(), Some(e)),
        };

        scores.push(NamedScore {
            name,
            kind: kind.to_string(),
            score: score.score,
            verdict: score.verdict,
            hits: score.hits,
            misses: score.misses,
            weight: Some(f64::from(score.expected_aspect_count)),
            reasoning: error.or(score.reasoning),
            details: score.details,
            evaluator_results: score.child_scores,
        });
    }
    scores
}

/// Runs one evaluator, special-casing a code-judge that names a
/// [`CodeJudgeConfig::target`]: such an evaluator runs behind a judge proxy
/// bound to that target's provider rather than through the generic
/// `build_evaluator`/`evaluate` path.
async fn run_one_evaluator(ctx: &PipelineContext, config: &EvaluatorConfig, eval_ctx: &EvaluationContext<'_>) -> Result<Score, String> {
    if let EvaluatorConfig::CodeJudge(code_judge_config) = config {
        if let Some(target_name) = &code_judge_config.target {
            return run_code_judge_behind_proxy(ctx, config.name(), code_judge_config, target_name, eval_ctx).await;
        }
    }

    let evaluator = build_evaluator(config).map_err(|e| e.to_string())?;
    evaluator.evaluate(eval_ctx).await.map_err(|e| e.to_string())
}

/// Starts a judge proxy bound to `target_name`'s provider, runs the
/// code-judge subprocess with `AGENTV_TARGET_PROXY_URL`/
/// `AGENTV_TARGET_PROXY_TOKEN` exported into its environment, and tears the
/// proxy down whether the subprocess succeeds or fails.
async fn run_code_judge_behind_proxy(
    ctx: &PipelineContext,
    name: String,
    config: &CodeJudgeConfig,
    target_name: &str,
    eval_ctx: &EvaluationContext<'_>,
) -> Result<Score, String> {
    let resolver = ctx
        .target_resolver
        .as_ref()
        .ok_or_else(|| format!("code-judge target {target_name:?} requires a target resolver, but none is configured"))?;
    let provider = resolver.resolve(target_name)?;

    let handle = proxy::spawn(JudgeProxyConfig::default(), provider, ctx.target_resolver.clone())
        .await
        .map_err(|e| e.to_string())?;

    let mut proxied = config.clone();
    proxied.env.insert("AGENTV_TARGET_PROXY_URL".to_string(), handle.url.clone());
    proxied.env.insert("AGENTV_TARGET_PROXY_TOKEN".to_string(), handle.token.clone());

    let evaluator = CodeJudgeEvaluator::new(name, proxied);
    let result = evaluator.evaluate(eval_ctx).await.map_err(|e| e.to_string());
    handle.shutdown().await;
    result
}

/// Combines per-evaluator scores into one top-level [`Score`]: a
/// weighted mean using each evaluator's `expected_aspect_count` as its
/// weight, forced to `fail` if any constituent evaluator failed.
fn merge_scores(scores: &[NamedScore]) -> Score {
    if scores.is_empty() {
        return Score::new(0.0, 1);
    }

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    let mut any_fail = false;
    let mut hits = Vec::new();
    let mut misses = Vec::new();

    for s in scores {
        let weight = s.weight.unwrap_or(1.0);
        weighted_sum += weight * s.score;
        weight_total += weight;
        any_fail |= s.verdict == Verdict::Fail;
        hits.extend(s.hits.iter().cloned());
        misses.extend(s.misses.iter().cloned());
    }

    let merged_score = if weight_total > 0.0 { weighted_sum / weight_total } else { 0.0 };
    let mut score = Score::new(merged_score, scores.len() as u32);
    if any_fail {
        score = score.force_fail();
    }
    score.hits = hits;
    score.misses = misses;
    score.capped()
}

fn error_result(ctx: &PipelineContext, item: &WorkItem, timestamp: chrono::DateTime<chrono::Utc>, message: String) -> EvaluationResult {
    EvaluationResult {
        timestamp,
        test_id: item.case.id.clone(),
        dataset: Some(item.case.dataset.clone()),
        score: 0.0,
        verdict: Verdict::Fail,
        hits: Vec::new(),
        misses: Vec::new(),
        reasoning: None,
        candidate_answer: String::new(),
        target: ctx.target_name.clone(),
        attempt: item.attempt,
        trial_of: item.trial_of.clone(),
        evaluator_scores: Vec::new(),
        error: Some(message),
        trace_summary: None,
        output_messages: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Content, ProviderResponse, ToolCall};
    use crate::providers::{ProviderError, StaticProvider};

    fn case_with_messages(messages: Vec<Message>) -> EvalCase {
        EvalCase {
            id: "c1".into(),
            dataset: "d".into(),
            input_messages: messages,
            expected_messages: None,
            criteria: "whatever".into(),
            metadata: None,
            evaluator_configs: vec![],
            workspace: None,
        }
    }

    #[test]
    fn build_provider_request_splits_system_context_and_question() {
        let messages = vec![
            Message::text(Role::System, "be terse"),
            Message::text(Role::User, "earlier turn"),
            Message::text(Role::User, "final question"),
        ];
        let case = case_with_messages(messages);
        let request = build_provider_request(&case, 0, CancellationToken::new());
        assert_eq!(request.system_prompt.as_deref(), Some("be terse"));
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].text_content(), "earlier turn");
        assert_eq!(request.question, "final question");
    }

    #[test]
    fn merge_scores_weights_by_expected_aspect_count() {
        let scores = vec![
            NamedScore {
                name: "a".into(),
                kind: "field_accuracy".into(),
                score: 1.0,
                verdict: Verdict::Pass,
                hits: vec![],
                misses: vec![],
                weight: Some(3.0),
                reasoning: None,
                details: None,
                evaluator_results: None,
            },
            NamedScore {
                name: "b".into(),
                kind: "field_accuracy".into(),
                score: 0.0,
                verdict: Verdict::Fail,
                hits: vec![],
                misses: vec![],
                weight: Some(1.0),
                reasoning: None,
                details: None,
                evaluator_results: None,
            },
        ];
        let merged = merge_scores(&scores);
        assert!((merged.score - 0.75).abs() < 1e-9);
        assert_eq!(merged.verdict, Verdict::Fail);
    }

    #[tokio::test]
    async fn run_work_item_emits_a_result_for_a_case_with_no_evaluators() {
        let case = Arc::new(case_with_messages(vec![Message::text(Role::User, "hi")]));
        let provider: Arc<dyn Provider> = Arc::new(StaticProvider::new(
            "fixture",
            vec![fixture_response("hello back", vec![])],
        ));
        let ctx = PipelineContext {
            target_name: "t".into(),
            provider,
            judge_provider: None,
            attempt_timeout: Duration::from_secs(5),
            max_retries: 0,
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(10),
            target_resolver: None,
        };
        let item = WorkItem {
            case,
            attempt: 0,
            trial_of: None,
        };
        let result = run_work_item(&ctx, item, CancellationToken::new()).await;
        assert!(result.error.is_none());
        assert_eq!(result.candidate_answer, "hello back");
    }

    #[tokio::test]
    async fn provider_error_produces_a_failed_result_with_the_error_recorded() {
        let case = Arc::new(case_with_messages(vec![Message::text(Role::User, "hi")]));
        struct AlwaysFails;
        #[async_trait::async_trait]
        impl Provider for AlwaysFails {
            fn name(&self) -> &str {
                "fails"
            }
            async fn invoke(&self, _req: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
                Err(ProviderError::InvalidRequest("bad model".into()))
            }
        }
        let ctx = PipelineContext {
            target_name: "t".into(),
            provider: Arc::new(AlwaysFails),
            judge_provider: None,
            attempt_timeout: Duration::from_secs(5),
            max_retries: 0,
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(10),
            target_resolver: None,
        };
        let item = WorkItem {
            case,
            attempt: 0,
            trial_of: None,
        };
        let result = run_work_item(&ctx, item, CancellationToken::new()).await;
        assert_eq!(result.verdict, Verdict::Fail);
        assert!(result.error.unwrap().contains("bad model"));
    }

    fn fixture_response(text: &str, tool_calls: Vec<ToolCall>) -> ProviderResponse {
        let now = chrono::Utc::now();
        ProviderResponse {
            output_messages: vec![Message {
                role: Role::Assistant,
                content: Some(Content::Text(text.to_string())),
                tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            }],
            token_usage: None,
            cost_usd: None,
            duration_ms: 0,
            start_time: now,
            end_time: now,
            raw: None,
            log_file: None,
        }
    }
}
