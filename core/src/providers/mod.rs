// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Provider adapters: the seam between the dispatcher and a concrete backend.
//!
//! ```text
//! Dispatcher ──Invoke(req)──▶ dyn Provider ──▶ backend (HTTP / subprocess / fixture)
//!                  ▲                               │
//!                  └──────── ProviderResponse ◀─────┘
//! ```
//!
//! A provider is responsible only for turning a [`ProviderRequest`] into a
//! [`crate::model::ProviderResponse`] (or a [`ProviderError`]); it does not
//! know about evaluators, scoring, or writers.

pub mod error;
pub mod factory;
pub mod http_provider;
pub mod static_provider;

pub use error::ProviderError;
pub use factory::ProviderFactory;
pub use http_provider::HttpProvider;
pub use static_provider::StaticProvider;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::model::{Message, ProviderResponse};

/// A single invocation request sent to a [`Provider`].
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// The case this request was built for.
    pub eval_case_id: String,
    /// Which attempt this is.
    pub attempt: u32,
    /// The rendered question/prompt.
    pub question: String,
    /// An optional system prompt.
    pub system_prompt: Option<String>,
    /// Prior message context (input transcript), ordered.
    pub messages: Vec<Message>,
    /// Maximum output tokens, if bounded.
    pub max_output_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// A token the provider should observe to abort in-flight work.
    pub cancellation: CancellationToken,
}

impl ProviderRequest {
    /// Builds a minimal request with no prior context and default sampling.
    #[must_use]
    pub fn new(eval_case_id: impl Into<String>, attempt: u32, question: impl Into<String>) -> Self {
        Self {
            eval_case_id: eval_case_id.into(),
            attempt,
            question: question.into(),
            system_prompt: None,
            messages: Vec::new(),
            max_output_tokens: None,
            temperature: None,
            cancellation: CancellationToken::new(),
        }
    }
}

/// A streaming/structured-output model handle some evaluators can drive
/// directly, bypassing the generic [`Provider::invoke`] path.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Sends a single prompt and returns the raw textual completion.
    async fn complete(&self, system_prompt: Option<&str>, prompt: &str) -> Result<String, ProviderError>;
}

/// The uniform adapter between the dispatcher and one specific backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A short, stable identifier for this provider instance (used in logs
    /// and error messages).
    fn name(&self) -> &str;

    /// Invokes the backend with a single request.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::BackendUnavailable`], [`ProviderError::Timeout`],
    /// [`ProviderError::InvalidOutput`], or [`ProviderError::QuotaExceeded`].
    async fn invoke(&self, req: ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Invokes the backend with a batch of requests, when the provider
    /// advertises batching support via [`Provider::supports_batching`].
    ///
    /// The returned map is keyed by `eval_case_id`; any id present in `reqs`
    /// but missing from the result fails the whole batch. The default
    /// implementation invokes requests one at a time.
    async fn invoke_batch(
        &self,
        reqs: Vec<ProviderRequest>,
    ) -> Result<BTreeMap<String, ProviderResponse>, ProviderError> {
        let mut out = BTreeMap::new();
        for req in reqs {
            let id = req.eval_case_id.clone();
            let resp = self.invoke(req).await?;
            out.insert(id, resp);
        }
        Ok(out)
    }

    /// Whether this provider supports [`Provider::invoke_batch`] for real
    /// (rather than the sequential default).
    fn supports_batching(&self) -> bool {
        false
    }

    /// The batch size this provider prefers, when batching is supported.
    fn preferred_batch_size(&self) -> usize {
        1
    }

    /// Whether this provider requires a single, non-concurrent worker
    /// (e.g. a focused editor window). When `true` the dispatcher coerces
    /// the effective worker count for this target to 1.
    fn requires_single_worker(&self) -> bool {
        false
    }

    /// Exposes a [`LanguageModel`] handle, for evaluators that need to drive
    /// the backend directly (LLM-judge, agent-judge).
    fn as_language_model(&self) -> Option<Arc<dyn LanguageModel>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    struct Echo;

    #[async_trait]
    impl Provider for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, req: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            let now = chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0).unwrap();
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
    }

    #[tokio::test]
    async fn default_invoke_batch_falls_back_to_sequential_invoke() {
        let provider = Echo;
        let reqs = vec![
            ProviderRequest::new("a", 0, "hello"),
            ProviderRequest::new("b", 0, "world"),
        ];
        let out = provider.invoke_batch(reqs).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out["a"].output_messages[0].text_content(), "hello");
        assert_eq!(out["b"].output_messages[0].text_content(), "world");
    }

    #[test]
    fn default_capability_flags_are_conservative() {
        let provider = Echo;
        assert!(!provider.supports_batching());
        assert!(!provider.requires_single_worker());
        assert!(provider.as_language_model().is_none());
    }
}
