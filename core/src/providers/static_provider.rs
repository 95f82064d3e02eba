// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A fixture provider that replays pre-recorded responses.
//!
//! Used by tests, dry runs, and suites built from static traces — the
//! `target resolver`'s "static trace" target kind.

use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;

use super::{Provider, ProviderError, ProviderRequest};
use crate::model::ProviderResponse;

/// Replays a fixed queue of [`ProviderResponse`]s, one per `invoke` call,
/// regardless of the request.
pub struct StaticProvider {
    name: String,
    responses: Mutex<VecDeque<ProviderResponse>>,
}

impl StaticProvider {
    /// Builds a provider that replays `responses` in order.
    #[must_use]
    pub fn new(name: impl Into<String>, responses: Vec<ProviderResponse>) -> Self {
        Self {
            name: name.into(),
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, _req: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut queue = self.responses.lock().await;
        queue
            .pop_front()
            .ok_or_else(|| ProviderError::InvalidOutput("static provider fixture queue exhausted".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Message, Role};
    use chrono::Utc;

    fn fixture(text: &str) -> ProviderResponse {
        let now = Utc::now();
        ProviderResponse {
            output_messages: vec![Message::text(Role::Assistant, text)],
            token_usage: None,
            cost_usd: None,
            duration_ms: 1,
            start_time: now,
            end_time: now,
            raw: None,
            log_file: None,
        }
    }

    #[tokio::test]
    async fn replays_responses_in_order() {
        let provider = StaticProvider::new("fixture", vec![fixture("first"), fixture("second")]);
        let r1 = provider.invoke(ProviderRequest::new("c", 0, "q")).await.unwrap();
        let r2 = provider.invoke(ProviderRequest::new("c", 1, "q")).await.unwrap();
        assert_eq!(r1.output_messages[0].text_content(), "first");
        assert_eq!(r2.output_messages[0].text_content(), "second");
    }

    #[tokio::test]
    async fn exhausted_queue_is_invalid_output() {
        let provider = StaticProvider::new("fixture", vec![]);
        let err = provider.invoke(ProviderRequest::new("c", 0, "q")).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidOutput(_)));
    }
}
