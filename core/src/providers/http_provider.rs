// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A generic OpenAI-chat-compatible HTTP provider.
//!
//! Works against any endpoint speaking the `/chat/completions` shape
//! (OpenAI itself, and most self-hosted and gateway-fronted backends).
//! Vendor-specific adapters (Azure's api-version quirks, Anthropic's
//! message format, Bedrock's SigV4 signing, …) are explicitly out of scope
//! for this core and are left as unimplemented extension points behind
//! [`super::ProviderFactory`].

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Provider, ProviderError, ProviderRequest};
use crate::model::{Message, ProviderResponse, Role, TokenUsage};

/// Configuration for an [`HttpProvider`] instance.
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Bearer token sent as `Authorization: Bearer <token>`.
    pub api_key: String,
    /// Model identifier sent in the request body.
    pub model: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// A provider that speaks the OpenAI chat-completions wire format over HTTP.
pub struct HttpProvider {
    name: String,
    client: reqwest::Client,
    config: HttpProviderConfig,
}

impl HttpProvider {
    /// Builds a new HTTP provider.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::InternalError`] if the underlying HTTP client
    /// cannot be constructed, and [`ProviderError::AuthenticationError`] if
    /// `api_key` is empty.
    pub fn new(name: impl Into<String>, config: HttpProviderConfig) -> Result<Self, ProviderError> {
        if config.api_key.is_empty() {
            return Err(ProviderError::AuthenticationError("missing API key".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::InternalError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            name: name.into(),
            client,
            config,
        })
    }

    fn build_body(&self, req: &ProviderRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &req.system_prompt {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        for m in &req.messages {
            messages.push(serde_json::json!({
                "role": role_str(m.role),
                "content": m.text_content(),
            }));
        }
        messages.push(serde_json::json!({"role": "user", "content": req.question}));

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
        });
        if let Some(max) = req.max_output_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        body
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, req: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let start = chrono::Utc::now();
        let body = self.build_body(&req);
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        debug!(provider = %self.name, eval_case_id = %req.eval_case_id, "invoking http provider");

        let result = tokio::select! {
            resp = self.client
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&body)
                .send() => resp,
            () = req.cancellation.cancelled() => {
                return Err(ProviderError::BackendUnavailable("invocation cancelled".into()));
            }
        };

        let response = result.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.config.timeout)
            } else {
                ProviderError::BackendUnavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::QuotaExceeded { retry_after: None });
        }
        if status.is_server_error() {
            return Err(ProviderError::BackendUnavailable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::InvalidRequest(format!("HTTP {status}: {text}")));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidOutput(format!("malformed chat completion response: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidOutput("no choices in response".into()))?;

        let token_usage = parsed.usage.map(|u| TokenUsage {
            input: u.prompt_tokens,
            output: u.completion_tokens,
            cached: None,
        });
        if token_usage.is_none() {
            warn!(provider = %self.name, "backend did not report token usage");
        }

        let end = chrono::Utc::now();
        Ok(ProviderResponse {
            output_messages: vec![Message::text(Role::Assistant, text)],
            token_usage,
            cost_usd: None,
            duration_ms: (end - start).num_milliseconds().max(0) as u64,
            start_time: start,
            end_time: end,
            raw: None,
            log_file: None,
        })
    }
}
