//! Single retry for rate-limited provider calls.

use crate::embedding::EmbeddingClientError;
use crate::generation::GenerationClientError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Delay applied when a rate-limited response carries no retry hint.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Classifies provider errors for [`with_rate_limit_retry`].
pub trait RetryHint {
    /// Whether the provider rejected the call because of rate limiting.
    fn is_rate_limited(&self) -> bool;

    /// Delay the provider asked for, when it sent one.
    fn retry_after(&self) -> Option<Duration>;
}

impl RetryHint for EmbeddingClientError {
    fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl RetryHint for GenerationClientError {
    fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Run `call`; when it fails with a rate-limit error, wait once and run it again.
///
/// Errors of any other kind, and a failure of the second attempt, are returned unchanged.
pub async fn with_rate_limit_retry<T, E, F, Fut>(operation: &str, mut call: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryHint + Display,
{
    match call().await {
        Err(error) if error.is_rate_limited() => {
            let delay = error.retry_after().unwrap_or(DEFAULT_RETRY_DELAY);
            tracing::warn!(
                operation,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Provider rate limited the call; retrying once"
            );
            tokio::time::sleep(delay).await;
            call().await
        }
        outcome => outcome,
    }
}
