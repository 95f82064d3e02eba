// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Provider-level retry policy: exponential backoff, capped, and only for
//! errors [`ProviderError::is_retryable`] marks as transient.
//!
//! Evaluator-level retries (an LLM-judge reparsing a malformed response) are
//! handled inside the evaluator itself and never touch this module.

use std::time::Duration;

use crate::model::ProviderResponse;
use crate::providers::{Provider, ProviderError, ProviderRequest};

/// The default starting delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// The ceiling every backoff is clamped to, regardless of attempt count.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Computes the delay before retry number `attempt` (0-indexed), doubling
/// `base` each attempt and clamping to `cap`.
#[must_use]
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let shift = attempt.min(16);
    let factor = 1u32.checked_shl(shift).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap)
}

/// Invokes `provider`, retrying up to `max_retries` times on a retryable
/// error with exponential backoff. A non-retryable error, or exhausting
/// `max_retries`, returns the last error.
pub async fn invoke_with_retry(
    provider: &dyn Provider,
    request: &ProviderRequest,
    max_retries: u32,
    base_delay: Duration,
    cap: Duration,
) -> Result<ProviderResponse, ProviderError> {
    let mut attempt = 0;
    loop {
        match provider.invoke(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(e) if attempt < max_retries && e.is_retryable() => {
                tokio::time::sleep(backoff_delay(attempt, base_delay, cap)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_each_attempt_until_capped() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_secs(1);
        assert_eq!(backoff_delay(0, base, cap), Duration::from_millis(100));
        assert_eq!(backoff_delay(1, base, cap), Duration::from_millis(200));
        assert_eq!(backoff_delay(2, base, cap), Duration::from_millis(400));
        assert_eq!(backoff_delay(10, base, cap), cap);
    }

    #[tokio::test]
    async fn retries_only_retryable_errors_up_to_the_limit() {
        use crate::model::{Message, Role};
        use async_trait::async_trait;
        use std::sync::atomic::{AtomicU32, Ordering};

        struct FlakyThenOk {
            failures_left: AtomicU32,
        }

        #[async_trait]
        impl Provider for FlakyThenOk {
            fn name(&self) -> &str {
                "flaky"
            }

            async fn invoke(&self, req: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
                if self.failures_left.fetch_sub(1, Ordering::SeqCst) > 0 {
                    return Err(ProviderError::Timeout(Duration::from_millis(1)));
                }
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
        }

        let provider = FlakyThenOk {
            failures_left: AtomicU32::new(2),
        };
        let request = ProviderRequest::new("case-1", 0, "hi");
        let response = invoke_with_retry(&provider, &request, 2, Duration::from_millis(1), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(response.output_messages[0].text_content(), "hi");
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        use async_trait::async_trait;

        struct AlwaysInvalid;

        #[async_trait]
        impl Provider for AlwaysInvalid {
            fn name(&self) -> &str {
                "invalid"
            }

            async fn invoke(&self, _req: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
                Err(ProviderError::InvalidRequest("bad model".into()))
            }
        }

        let request = ProviderRequest::new("case-1", 0, "hi");
        let err = invoke_with_retry(&AlwaysInvalid, &request, 5, Duration::from_millis(1), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }
}
