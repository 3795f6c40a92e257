//! OpenAI client configuration with sensible defaults.

use crate::config::RetrySettings;
use async_openai::{config::OpenAIConfig, error::OpenAIError, Client};
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::time::Duration;
use tracing::warn;

/// Default timeout for OpenAI API requests (5 minutes).
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Create an OpenAI client with configured timeout.
///
/// Uses a 5-minute timeout by default to prevent hung API calls.
pub fn create_client() -> Client<OpenAIConfig> {
    create_client_with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
}

/// Create an OpenAI client with a custom timeout.
pub fn create_client_with_timeout(timeout: Duration) -> Client<OpenAIConfig> {
    let http_client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!("Failed to configure HTTP client, using defaults: {}", e);
            reqwest::Client::new()
        });

    Client::with_config(OpenAIConfig::default()).with_http_client(http_client)
}

/// A client that makes exactly one attempt per request, leaving retries to
/// the caller's [`RetrySettings`].
pub fn create_single_attempt_client() -> Client<OpenAIConfig> {
    create_client().with_backoff(no_retries())
}

/// Backoff that gives up immediately. Replaces the client's built-in rate
/// limit retries.
fn no_retries() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_max_elapsed_time(Some(Duration::ZERO))
        .build()
}

/// Whether a failed request is worth another attempt under `retry`.
///
/// Rate limits surface as typed API errors. Gateway failures (502-504) come
/// back without a status code, either as an untyped API error or as a body
/// that is not JSON, so they count as server errors.
pub fn is_retryable(err: &OpenAIError, retry: &RetrySettings) -> bool {
    match err {
        OpenAIError::Reqwest(e) => match e.status() {
            Some(status) => retry.retries_status(status.as_u16()),
            None => (e.is_timeout() || e.is_connect()) && retry.retries_server_errors(),
        },
        OpenAIError::ApiError(api) => match api.r#type.as_deref() {
            Some("insufficient_quota") => false,
            Some("rate_limit_exceeded") | Some("requests") | Some("tokens") => {
                retry.retries_status(429)
            }
            Some("server_error") | None => retry.retries_server_errors(),
            _ => false,
        },
        OpenAIError::JSONDeserialize(_) => retry.retries_server_errors(),
        _ => false,
    }
}
