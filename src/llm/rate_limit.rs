//! Client-side rate limiting for LLM calls.
//!
//! Two limits share a sliding one-minute window: number of calls and
//! estimated tokens. A semaphore additionally bounds in-flight requests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};

/// Limits applied by [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Calls allowed per window.
    pub calls_per_window: u32,
    /// Estimated tokens allowed per window.
    pub tokens_per_window: u32,
    /// Maximum requests in flight at once.
    pub max_in_flight: usize,
    /// Window length (one minute in production).
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            calls_per_window: 10,
            tokens_per_window: 20_000,
            max_in_flight: 4,
            window: Duration::from_secs(60),
        }
    }
}

/// Sliding-window limiter over calls and tokens.
pub struct RateLimiter {
    config: RateLimitConfig,
    usage: Mutex<VecDeque<(Instant, u32)>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            usage: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until a call with `estimated_tokens` fits, then record it.
    ///
    /// A single request larger than the whole token budget is admitted once
    /// the window is empty.
    pub async fn acquire(&self, estimated_tokens: u32) {
        loop {
            let wait = {
                let mut usage = self.usage.lock().await;
                let now = Instant::now();
                while let Some((at, _)) = usage.front() {
                    if now.duration_since(*at) >= self.config.window {
                        usage.pop_front();
                    } else {
                        break;
                    }
                }

                let calls_ok = (usage.len() as u64) < u64::from(self.config.calls_per_window);
                let used: u64 = usage.iter().map(|(_, t)| u64::from(*t)).sum();
                let tokens_ok = usage.is_empty()
                    || used + u64::from(estimated_tokens) <= u64::from(self.config.tokens_per_window);

                if calls_ok && tokens_ok {
                    usage.push_back((now, estimated_tokens));
                    return;
                }

                let oldest = usage.front().map(|(at, _)| *at).unwrap_or(now);
                self.config
                    .window
                    .saturating_sub(now.duration_since(oldest))
                    .max(Duration::from_millis(1))
            };

            info!(
                wait_ms = wait.as_millis() as u64,
                estimated_tokens, "LLM rate limit reached, waiting"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Calls currently counted in the window.
    pub async fn calls_in_window(&self) -> usize {
        let usage = self.usage.lock().await;
        let now = Instant::now();
        usage
            .iter()
            .filter(|(at, _)| now.duration_since(*at) < self.config.window)
            .count()
    }
}

/// Provider wrapper applying a [`RateLimiter`] and an in-flight bound.
pub struct RateLimitedProvider {
    inner: Arc<dyn LlmProvider>,
    limiter: RateLimiter,
    permits: Semaphore,
}

impl RateLimitedProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, config: RateLimitConfig) -> Self {
        let permits = Semaphore::new(config.max_in_flight.max(1));
        Self {
            inner,
            limiter: RateLimiter::new(config),
            permits,
        }
    }
}

#[async_trait]
impl LlmProvider for RateLimitedProvider {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.inner.model_name().to_string(),
                reason: format!("concurrency limiter closed: {e}"),
            })?;

        let estimated = request.estimated_tokens();
        self.limiter.acquire(estimated).await;
        debug!(
            model = self.inner.model_name(),
            estimated_tokens = estimated,
            "Querying LLM"
        );
        self.inner.complete(request).await
    }
}
