// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types for the [`Provider`](super::Provider) trait.
//!
//! Every provider implementation maps its backend-specific failures onto
//! these four kinds; the dispatcher only ever reasons about `ProviderError`.

use std::time::Duration;
use thiserror::Error;

/// Errors a [`Provider`](super::Provider) invocation can fail with.
///
/// # Examples
///
/// ```
/// use agentv_core::providers::error::ProviderError;
/// use std::time::Duration;
///
/// let error = ProviderError::Timeout(Duration::from_secs(30));
/// assert!(error.to_string().contains("timed out"));
/// ```
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The backend could not be reached or returned a transient failure
    /// (connection refused, 5xx, DNS failure).
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The invocation exceeded its allotted time.
    #[error("provider invocation timed out after {0:?}")]
    Timeout(Duration),

    /// The backend responded, but its output could not be parsed into a
    /// well-formed [`crate::model::ProviderResponse`].
    #[error("invalid provider output: {0}")]
    InvalidOutput(String),

    /// The account's quota, credits, or rate limit has been exhausted.
    #[error("quota exceeded{}", .retry_after.map(|d| format!(", retry after {d:?}")).unwrap_or_default())]
    QuotaExceeded {
        /// When the backend suggests retrying, if it said so.
        retry_after: Option<Duration>,
    },

    /// Credentials were missing or rejected by the backend.
    #[error("authentication failed: {0}")]
    AuthenticationError(String),

    /// The request itself was malformed (bad model name, invalid parameters).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A network-level transport error, distinct from a backend-reported failure.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// Failed to parse a JSON payload.
    #[error("JSON parsing error: {0}")]
    ParseError(#[from] serde_json::Error),

    /// An unexpected internal error in the provider implementation itself.
    #[error("provider internal error: {0}")]
    InternalError(String),
}

impl ProviderError {
    /// Whether the dispatcher may retry the invocation that produced this error.
    ///
    /// Only `BackendUnavailable` and `Timeout` are retried per the dispatcher's
    /// retry policy; `QuotaExceeded` is not retried automatically since the
    /// exhausted resource will not have replenished within `maxRetries`'
    /// backoff window.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::BackendUnavailable(_) | ProviderError::Timeout(_) | ProviderError::NetworkError(_)
        )
    }

    /// Returns `true` if this is an authentication-related error.
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        matches!(self, ProviderError::AuthenticationError(_))
    }
}
