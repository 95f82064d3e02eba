// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The evaluation dispatcher: a bounded worker pool that drains a queue of
//! `(case, attempt)` work items, runs each through the [`pipeline`], and
//! streams results to a single [`crate::writers::ResultWriter`].
//!
//! ```text
//!               ┌─▶ worker 1 ─┐
//! work queue ───┼─▶ worker 2 ─┼──▶ results channel ──▶ writer task
//!               └─▶ worker N ─┘
//! ```
//!
//! Workers never touch the writer directly — only the writer task calls
//! `append`, so a suite with `workers > 1` still produces a well-formed
//! output stream with no interleaved writes.

pub mod error;
pub mod pipeline;
pub mod retry;
pub mod workspace;

pub use error::DispatcherError;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::model::{EvalCase, EvaluationResult, Verdict};
use crate::providers::Provider;
use crate::writers::ResultWriter;

use pipeline::{run_work_item, timeout_result, PipelineContext, WorkItem};
use retry::{DEFAULT_BASE_DELAY, MAX_BACKOFF};

/// Tunables for a single [`Dispatcher::run`] call.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Requested worker pool size. Coerced to 1 when the target provider
    /// requires a single worker.
    pub workers: usize,
    /// Per-attempt wall-clock budget, covering workspace setup, the
    /// provider call (including retries), and every evaluator.
    pub attempt_timeout: Duration,
    /// Maximum provider-level retries on a retryable error.
    pub max_retries: u32,
    /// The base delay before the first retry.
    pub retry_base_delay: Duration,
    /// The backoff ceiling.
    pub retry_max_delay: Duration,
    /// How long an in-flight work item gets to finish after cancellation
    /// before its result is recorded as a timeout.
    pub grace_period: Duration,
    /// Whether the first `fail` verdict cancels every remaining work item.
    pub fail_fast: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            attempt_timeout: Duration::from_secs(120),
            max_retries: 2,
            retry_base_delay: DEFAULT_BASE_DELAY,
            retry_max_delay: MAX_BACKOFF,
            grace_period: Duration::from_secs(5),
            fail_fast: false,
        }
    }
}

/// Aggregate counts for a completed (or cancelled) dispatch run.
#[derive(Debug, Clone, Default)]
pub struct DispatchSummary {
    /// Total work items dispatched.
    pub total: u32,
    /// Items whose merged verdict was `pass`.
    pub passed: u32,
    /// Items whose merged verdict was `borderline`.
    pub borderline: u32,
    /// Items whose merged verdict was `fail`.
    pub failed: u32,
    /// Whether the run ended early via cancellation (fail-fast or external).
    pub cancelled: bool,
}

impl DispatchSummary {
    /// The process exit code this summary implies: `1` if any item failed,
    /// `0` otherwise. A run that could not complete at all returns
    /// [`DispatcherError`] instead and never reaches this method.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(self.failed > 0)
    }

    fn record(&mut self, verdict: Verdict) {
        self.total += 1;
        match verdict {
            Verdict::Pass => self.passed += 1,
            Verdict::Borderline => self.borderline += 1,
            Verdict::Fail => self.failed += 1,
        }
    }
}

/// Runs a suite's cases against one target, fanning out across a bounded
/// worker pool and serializing results through a single writer.
pub struct Dispatcher {
    target_name: String,
    provider: Arc<dyn Provider>,
    judge_provider: Option<Arc<dyn Provider>>,
    config: DispatcherConfig,
    target_resolver: Option<Arc<dyn pipeline::TargetProviderResolver>>,
}

impl Dispatcher {
    /// Builds a dispatcher for one target. `judge_provider` falls back to
    /// `provider` itself at evaluation time when absent.
    #[must_use]
    pub fn new(
        target_name: impl Into<String>,
        provider: Arc<dyn Provider>,
        judge_provider: Option<Arc<dyn Provider>>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            target_name: target_name.into(),
            provider,
            judge_provider,
            config,
            target_resolver: None,
        }
    }

    /// Attaches a resolver a code-judge evaluator can use to reach an
    /// alternate target's provider through a judge proxy, per its
    /// configured `target` name.
    #[must_use]
    pub fn with_target_resolver(mut self, resolver: Arc<dyn pipeline::TargetProviderResolver>) -> Self {
        self.target_resolver = Some(resolver);
        self
    }

    /// Runs every case for `trials` trials, writing each [`EvaluationResult`]
    /// to `writer` as it completes.
    ///
    /// # Errors
    ///
    /// Returns [`DispatcherError::InvalidConfig`] if `trials` is zero, or
    /// [`DispatcherError::Writer`] if the writer fails to append or close.
    pub async fn run(
        &self,
        cases: Vec<EvalCase>,
        trials: u32,
        mut writer: Box<dyn ResultWriter>,
        cancellation: CancellationToken,
    ) -> Result<DispatchSummary, DispatcherError> {
        if trials == 0 {
            return Err(DispatcherError::InvalidConfig("trials must be at least 1".into()));
        }

        let items = build_work_items(&cases, trials);
        let total_items = items.len();
        let effective_workers = if self.provider.requires_single_worker() {
            1
        } else {
            self.config.workers.max(1)
        };

        let ctx = Arc::new(PipelineContext {
            target_name: self.target_name.clone(),
            provider: Arc::clone(&self.provider),
            judge_provider: self.judge_provider.clone(),
            attempt_timeout: self.config.attempt_timeout,
            max_retries: self.config.max_retries,
            retry_base_delay: self.config.retry_base_delay,
            retry_max_delay: self.config.retry_max_delay,
            target_resolver: self.target_resolver.clone(),
        });

        let queue = Arc::new(Mutex::new(items.into_iter()));
        let (results_tx, mut results_rx) = mpsc::channel::<EvaluationResult>(effective_workers.max(1));

        let mut worker_handles = Vec::with_capacity(effective_workers);
        for _ in 0..effective_workers {
            let queue = Arc::clone(&queue);
            let ctx = Arc::clone(&ctx);
            let results_tx = results_tx.clone();
            let cancellation = cancellation.clone();
            let grace_period = self.config.grace_period;
            let attempt_timeout = self.config.attempt_timeout;

            worker_handles.push(tokio::spawn(async move {
                loop {
                    let item = {
                        let mut queue = queue.lock().await;
                        queue.next()
                    };
                    let Some(item) = item else { break };

                    let result = run_one(Arc::clone(&ctx), item, cancellation.clone(), attempt_timeout, grace_period).await;
                    if results_tx.send(result).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(results_tx);

        let fail_fast = self.config.fail_fast;
        let writer_cancellation = cancellation.clone();
        let writer_handle = tokio::spawn(async move {
            let mut summary = DispatchSummary::default();
            while let Some(result) = results_rx.recv().await {
                let verdict = result.verdict;
                summary.record(verdict);
                writer.append(&result).await?;
                if fail_fast && verdict == Verdict::Fail {
                    writer_cancellation.cancel();
                }
            }
            writer.close().await?;
            Ok::<DispatchSummary, DispatcherError>(summary)
        });

        for handle in worker_handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "dispatcher worker task panicked");
            }
        }

        let mut summary = writer_handle
            .await
            .map_err(|e| DispatcherError::Internal(e.to_string()))??;

        summary.cancelled = cancellation.is_cancelled();
        if summary.total < total_items as u32 {
            summary.cancelled = true;
        }

        info!(
            total = summary.total,
            passed = summary.passed,
            borderline = summary.borderline,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "dispatch run complete"
        );

        Ok(summary)
    }
}

/// Runs one work item to completion, bounded by `attempt_timeout`.
///
/// On cancellation, the in-flight attempt is not dropped immediately — it
/// keeps running on its own task and gets up to `grace_period` to finish
/// before being aborted and recorded as a timeout.
async fn run_one(
    ctx: Arc<PipelineContext>,
    item: WorkItem,
    cancellation: CancellationToken,
    attempt_timeout: Duration,
    grace_period: Duration,
) -> EvaluationResult {
    if cancellation.is_cancelled() {
        return timeout_result(&ctx, &item);
    }

    let task_item = item.clone();
    let task_cancellation = cancellation.clone();
    let mut handle = tokio::spawn({
        let ctx = Arc::clone(&ctx);
        async move { tokio::time::timeout(attempt_timeout, run_work_item(&ctx, task_item, task_cancellation)).await }
    });

    tokio::select! {
        joined = &mut handle => {
            match joined {
                Ok(Ok(result)) => result,
                _ => timeout_result(&ctx, &item),
            }
        }
        () = cancellation.cancelled() => {
            match tokio::time::timeout(grace_period, &mut handle).await {
                Ok(Ok(Ok(result))) => result,
                _ => {
                    handle.abort();
                    timeout_result(&ctx, &item)
                }
            }
        }
    }
}

fn build_work_items(cases: &[EvalCase], trials: u32) -> Vec<WorkItem> {
    let mut items = Vec::with_capacity(cases.len() * trials as usize);
    for case in cases {
        let case = Arc::new(case.clone());
        for attempt in 0..trials {
            items.push(WorkItem {
                case: Arc::clone(&case),
                attempt,
                trial_of: if trials > 1 { Some(case.id.clone()) } else { None },
            });
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Content, Message, ProviderResponse, Role};
    use crate::providers::{ProviderError, ProviderRequest, StaticProvider};
    use crate::writers::WriterError;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    fn case(id: &str) -> EvalCase {
        EvalCase {
            id: id.into(),
            dataset: "d".into(),
            input_messages: vec![Message::text(Role::User, "hi")],
            expected_messages: None,
            criteria: "whatever".into(),
            metadata: None,
            evaluator_configs: vec![],
            workspace: None,
        }
    }

    fn fixture(text: &str) -> ProviderResponse {
        let now = chrono::Utc::now();
        ProviderResponse {
            output_messages: vec![Message {
                role: Role::Assistant,
                content: Some(Content::Text(text.to_string())),
                tool_calls: None,
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

    struct RecordingWriter {
        results: StdMutex<Vec<EvaluationResult>>,
    }

    #[async_trait]
    impl ResultWriter for RecordingWriter {
        async fn append(&mut self, result: &EvaluationResult) -> Result<(), WriterError> {
            self.results.lock().unwrap().push(result.clone());
            Ok(())
        }

        async fn close(&mut self) -> Result<(), WriterError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn runs_every_case_once_per_trial_and_tallies_verdicts() {
        let cases = vec![case("a"), case("b")];
        let provider: Arc<dyn Provider> = Arc::new(StaticProvider::new(
            "fixture",
            vec![fixture("ok"), fixture("ok")],
        ));
        let dispatcher = Dispatcher::new("t", provider, None, DispatcherConfig { workers: 2, ..Default::default() });
        let writer = Box::new(RecordingWriter { results: StdMutex::new(Vec::new()) });
        let summary = dispatcher.run(cases, 1, writer, CancellationToken::new()).await.unwrap();
        assert_eq!(summary.total, 2);
        assert!(!summary.cancelled);
    }

    #[tokio::test]
    async fn zero_trials_is_an_invalid_configuration() {
        let provider: Arc<dyn Provider> = Arc::new(StaticProvider::new("fixture", vec![]));
        let dispatcher = Dispatcher::new("t", provider, None, DispatcherConfig::default());
        let writer = Box::new(RecordingWriter { results: StdMutex::new(Vec::new()) });
        let err = dispatcher.run(vec![case("a")], 0, writer, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DispatcherError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn multiple_trials_tag_results_with_trial_of() {
        let cases = vec![case("a")];
        let provider: Arc<dyn Provider> = Arc::new(StaticProvider::new(
            "fixture",
            vec![fixture("ok"), fixture("ok"), fixture("ok")],
        ));
        let dispatcher = Dispatcher::new("t", provider, None, DispatcherConfig { workers: 1, ..Default::default() });
        let writer = Box::new(RecordingWriter { results: StdMutex::new(Vec::new()) });
        let summary = dispatcher.run(cases, 3, writer, CancellationToken::new()).await.unwrap();
        assert_eq!(summary.total, 3);
    }

    #[tokio::test]
    async fn single_worker_provider_is_coerced_regardless_of_requested_workers() {
        struct SingleWorkerOnly;
        #[async_trait]
        impl Provider for SingleWorkerOnly {
            fn name(&self) -> &str {
                "single"
            }
            async fn invoke(&self, req: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
                let now = chrono::Utc::now();
                Ok(ProviderResponse {
                    output_messages: vec![Message::text(Role::Assistant, req.question)],
                    token_usage: None,
                    cost_usd: None,
                    duration_ms: 0,
                    start_time: now,
                    end_time: now,
                    raw: None,
                    log_file: None,
                })
            }
            fn requires_single_worker(&self) -> bool {
                true
            }
        }
        let provider: Arc<dyn Provider> = Arc::new(SingleWorkerOnly);
        let dispatcher = Dispatcher::new("t", provider, None, DispatcherConfig { workers: 16, ..Default::default() });
        let writer = Box::new(RecordingWriter { results: StdMutex::new(Vec::new()) });
        let summary = dispatcher
            .run(vec![case("a"), case("b"), case("c")], 1, writer, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.total, 3);
    }
}
