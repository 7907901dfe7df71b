//! Shared HTTP plumbing for hosted embedding and text-generation providers.

use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

/// Default endpoint of a local Ollama runtime.
pub(crate) const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

const RATE_LIMIT_MARKERS: [&str; 4] = [
    "rate limit",
    "rate_limit",
    "too many requests",
    "resource_exhausted",
];

/// Non-success response returned by a provider, already classified.
#[derive(Debug)]
pub(crate) enum FailedResponse {
    /// HTTP 429 or an error body that announces rate limiting.
    RateLimited(Option<Duration>),
    /// Any other non-success status.
    Status { status: StatusCode, body: String },
}

/// Build the HTTP client shared by one provider adapter.
pub(crate) fn http_client(user_agent: &str) -> Result<Client, reqwest::Error> {
    Client::builder().user_agent(user_agent).build()
}

/// Pass successful responses through; classify everything else.
pub(crate) async fn check_response(response: Response) -> Result<Response, FailedResponse> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let delay = retry_after(&response);
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::TOO_MANY_REQUESTS || mentions_rate_limit(&body) {
        return Err(FailedResponse::RateLimited(delay));
    }
    Err(FailedResponse::Status { status, body })
}

/// Parse a `retry-after` header expressed in (possibly fractional) seconds.
pub(crate) fn retry_after(response: &Response) -> Option<Duration> {
    let value = response.headers().get("retry-after")?.to_str().ok()?;
    let seconds: f64 = value.trim().parse().ok()?;
    if seconds.is_finite() && seconds >= 0.0 {
        Some(Duration::from_secs_f64(seconds))
    } else {
        None
    }
}

/// Whether an error message carries one of the provider rate-limit markers.
pub(crate) fn mentions_rate_limit(message: &str) -> bool {
    let lowered = message.to_lowercase();
    RATE_LIMIT_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

pub(crate) fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
