//! Sliding-window limiter for provider calls.
//!
//! The limiter keeps the admission times (and token estimates) of the last sixty seconds.
//! `acquire` waits until one more request fits under both the request and token budgets,
//! then records it. One limiter is created per document run and shared by every chunk call
//! of that run.

use super::types::ProviderLimits;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

const WINDOW: Duration = Duration::from_secs(60);

/// Rolling one-minute request and token limiter.
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_minute: usize,
    tokens_per_minute: Option<u64>,
    window: Option<Mutex<Window>>,
}

#[derive(Debug, Default)]
struct Window {
    requests: VecDeque<Instant>,
    tokens: VecDeque<(Instant, u64)>,
    token_total: u64,
}

impl Window {
    fn prune(&mut self, now: Instant) {
        while let Some(admitted) = self.requests.front() {
            if now.saturating_duration_since(*admitted) < WINDOW {
                break;
            }
            self.requests.pop_front();
        }
        while let Some((admitted, tokens)) = self.tokens.front() {
            if now.saturating_duration_since(*admitted) < WINDOW {
                break;
            }
            self.token_total -= tokens;
            self.tokens.pop_front();
        }
    }

    /// Time until the request fits, or `None` when it fits now.
    fn wait_time(&self, now: Instant, rpm: usize, tpm: Option<u64>, tokens: u64) -> Option<Duration> {
        let mut wait = None;
        if self.requests.len() >= rpm {
            wait = self.requests.front().map(|oldest| *oldest + WINDOW - now);
        }
        if let Some(limit) = tpm {
            // An oversized request is admitted once the window has drained.
            if self.token_total + tokens > limit && !self.tokens.is_empty() {
                let token_wait = self.tokens.front().map(|(oldest, _)| *oldest + WINDOW - now);
                wait = wait.max(token_wait);
            }
        }
        wait
    }

    fn record(&mut self, now: Instant, tokens: u64) {
        self.requests.push_back(now);
        self.tokens.push_back((now, tokens));
        self.token_total += tokens;
    }
}

impl RateLimiter {
    /// Build a limiter; a disabled limiter admits every call immediately.
    pub fn new(requests_per_minute: u32, tokens_per_minute: Option<u64>, enabled: bool) -> Self {
        Self {
            requests_per_minute: requests_per_minute.max(1) as usize,
            tokens_per_minute: tokens_per_minute.filter(|limit| *limit > 0),
            window: enabled.then(|| Mutex::new(Window::default())),
        }
    }

    /// Limiter matching a provider's configured limits.
    pub fn from_limits(limits: &ProviderLimits) -> Self {
        Self::new(
            limits.requests_per_minute,
            limits.tokens_per_minute,
            limits.rate_limit_enabled,
        )
    }

    /// Whether calls are being throttled.
    pub fn is_enabled(&self) -> bool {
        self.window.is_some()
    }

    /// Wait until a request carrying `estimated_tokens` fits in the window, then record it.
    pub async fn acquire(&self, estimated_tokens: u64) {
        let Some(window) = &self.window else {
            return;
        };

        loop {
            let wait = {
                let mut window = window.lock().await;
                let now = Instant::now();
                window.prune(now);
                match window.wait_time(
                    now,
                    self.requests_per_minute,
                    self.tokens_per_minute,
                    estimated_tokens,
                ) {
                    None => {
                        window.record(now, estimated_tokens);
                        return;
                    }
                    Some(wait) => wait,
                }
            };
            tracing::debug!(
                wait_ms = wait.as_millis() as u64,
                estimated_tokens,
                "Rate limit window full; waiting"
            );
            sleep(wait).await;
        }
    }
}
