// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The judge proxy: a loopback-only HTTP service that lets a code-judge
//! subprocess call back into a judge model without ever holding its own
//! API credentials.
//!
//! Every invocation gets its own bearer token and call budget; the proxy is
//! bound to `127.0.0.1` on an ephemeral port and torn down when the
//! evaluator that spawned it is done, successfully or not.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use rand::RngCore;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::providers::{Provider, ProviderError, ProviderRequest};

/// Errors constructing or running a [`JudgeProxy`].
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The loopback listener could not be bound.
    #[error("failed to bind judge proxy listener: {0}")]
    BindFailed(#[source] std::io::Error),
}

/// Resolves a named target to the provider that backs it, so an `/invoke`
/// call can route to a target other than the proxy's default one.
pub trait TargetProviderResolver: Send + Sync {
    /// Resolves `name` into a usable provider.
    ///
    /// # Errors
    ///
    /// Returns a message describing why the name couldn't be resolved.
    fn resolve(&self, name: &str) -> Result<Arc<dyn Provider>, String>;
}

/// Configuration for a single judge-proxy invocation.
#[derive(Debug, Clone)]
pub struct JudgeProxyConfig {
    /// The maximum number of `/invoke` or `/batch` calls this instance will
    /// service before returning `429` on every further call.
    pub max_calls: u32,
}

impl Default for JudgeProxyConfig {
    fn default() -> Self {
        Self { max_calls: 50 }
    }
}

struct AppState {
    token: String,
    call_count: AtomicU32,
    max_calls: u32,
    provider: Arc<dyn Provider>,
    target_resolver: Option<Arc<dyn TargetProviderResolver>>,
}

/// A running judge proxy instance: its reachable address, its bearer token,
/// and a handle to shut it down.
pub struct JudgeProxyHandle {
    /// The base URL a subprocess should call, e.g. `http://127.0.0.1:41823`.
    pub url: String,
    /// The bearer token the subprocess must present.
    pub token: String,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl JudgeProxyHandle {
    /// Signals the server to stop and waits for it to exit. Safe to call
    /// more than once, or concurrently — only the first call has any effect.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown.lock().await.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.join_handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "judge proxy server task panicked during shutdown");
            }
        }
    }
}

/// Spawns a loopback judge-proxy server backed by `provider`. `target_resolver`,
/// when set, lets an `/invoke` or `/batch` call that names a `target` route
/// to that target's provider instead of the default one.
///
/// # Errors
///
/// Returns [`ProxyError::BindFailed`] if no loopback port is available.
pub async fn spawn(
    config: JudgeProxyConfig,
    provider: Arc<dyn Provider>,
    target_resolver: Option<Arc<dyn TargetProviderResolver>>,
) -> Result<JudgeProxyHandle, ProxyError> {
    let token = generate_token();
    let state = Arc::new(AppState {
        token: token.clone(),
        call_count: AtomicU32::new(0),
        max_calls: config.max_calls,
        provider,
        target_resolver,
    });

    let app = Router::new()
        .route("/invoke", post(invoke_handler))
        .route("/batch", post(batch_handler))
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], 0));
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(ProxyError::BindFailed)?;
    let local_addr = listener.local_addr().map_err(ProxyError::BindFailed)?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let server = axum::serve(listener, app.into_make_service()).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });

    info!(addr = %local_addr, "judge proxy listening");
    let join_handle = tokio::spawn(async move {
        if let Err(e) = server.await {
            warn!(error = %e, "judge proxy server exited with an error");
        }
    });

    Ok(JudgeProxyHandle {
        url: format!("http://{local_addr}"),
        token,
        shutdown: Mutex::new(Some(shutdown_tx)),
        join_handle: Mutex::new(Some(join_handle)),
    })
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn authorized(headers: &HeaderMap, expected: &str) -> bool {
    let Some(value) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Some(presented) = value.strip_prefix("Bearer ") else {
        return false;
    };
    constant_time_eq(presented.as_bytes(), expected.as_bytes())
}

/// Compares two byte strings in constant time with respect to their
/// content, to avoid leaking the token through response-timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[derive(serde::Deserialize)]
struct InvokeRequest {
    question: String,
    #[serde(default)]
    system_prompt: Option<String>,
    /// Routes this call to a target other than the proxy's default
    /// provider. `404` if the name isn't known to the resolver.
    #[serde(default)]
    target: Option<String>,
}

/// Resolves the provider a request should be dispatched against: `state`'s
/// default unless `target` names one the resolver knows.
fn resolve_target_provider(state: &AppState, target: Option<&str>) -> Result<Arc<dyn Provider>, Response> {
    let Some(name) = target else {
        return Ok(Arc::clone(&state.provider));
    };
    let Some(resolver) = &state.target_resolver else {
        return Err((StatusCode::NOT_FOUND, format!("unknown target: {name}")).into_response());
    };
    resolver
        .resolve(name)
        .map_err(|_| (StatusCode::NOT_FOUND, format!("unknown target: {name}")).into_response())
}

async fn invoke_handler(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(body): Json<InvokeRequest>) -> Response {
    if !authorized(&headers, &state.token) {
        return (StatusCode::UNAUTHORIZED, "invalid or missing bearer token").into_response();
    }
    if !reserve_call(&state) {
        return (StatusCode::TOO_MANY_REQUESTS, "judge proxy call budget exhausted").into_response();
    }

    let provider = match resolve_target_provider(&state, body.target.as_deref()) {
        Ok(provider) => provider,
        Err(response) => return response,
    };

    let mut request = ProviderRequest::new("judge-proxy", 0, body.question);
    request.system_prompt = body.system_prompt;
    match provider.invoke(request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => provider_error_response(&e),
    }
}

async fn batch_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(bodies): Json<Vec<InvokeRequest>>,
) -> Response {
    if !authorized(&headers, &state.token) {
        return (StatusCode::UNAUTHORIZED, "invalid or missing bearer token").into_response();
    }
    if !reserve_call(&state) {
        return (StatusCode::TOO_MANY_REQUESTS, "judge proxy call budget exhausted").into_response();
    }

    if bodies.iter().all(|b| b.target.is_none()) {
        let requests: Vec<ProviderRequest> = bodies
            .into_iter()
            .enumerate()
            .map(|(i, body)| {
                let mut req = ProviderRequest::new(format!("judge-proxy-batch-{i}"), 0, body.question);
                req.system_prompt = body.system_prompt;
                req
            })
            .collect();

        return match state.provider.invoke_batch(requests).await {
            Ok(responses) => Json(responses).into_response(),
            Err(e) => provider_error_response(&e),
        };
    }

    let calls = bodies.into_iter().enumerate().map(|(i, body)| {
        let state = Arc::clone(&state);
        async move {
            let provider = resolve_target_provider(&state, body.target.as_deref())?;
            let mut request = ProviderRequest::new(format!("judge-proxy-batch-{i}"), 0, body.question);
            request.system_prompt = body.system_prompt;
            provider.invoke(request).await.map_err(|e| provider_error_response(&e))
        }
    });

    let results = futures::future::join_all(calls).await;
    let mut responses = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(response) => responses.push(response),
            Err(response) => return response,
        }
    }
    Json(responses).into_response()
}

/// Atomically consumes one unit of call budget; returns `false` (and leaves
/// the counter at its ceiling) once `max_calls` invocations have already
/// been serviced.
fn reserve_call(state: &AppState) -> bool {
    let previous = state.call_count.fetch_add(1, Ordering::SeqCst);
    previous < state.max_calls
}

fn provider_error_response(e: &ProviderError) -> Response {
    let status = match e {
        ProviderError::AuthenticationError(_) => StatusCode::UNAUTHORIZED,
        ProviderError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        ProviderError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ProviderError::InvalidRequest(_) | ProviderError::ParseError(_) | ProviderError::InvalidOutput(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, e.to_string()).into_response()
}
