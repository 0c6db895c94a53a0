//! Retry with exponential backoff for transient LLM failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{error, warn};

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};

/// Backoff settings.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each attempt.
    pub base_delay: Duration,
    /// Upper bound on a computed backoff. A provider's `retry_after`
    /// hint is honored even when longer.
    pub max_delay: Duration,
    /// Random jitter added to each delay, up to this amount.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32, error: &LlmError) -> Duration {
        let backoff = match error {
            LlmError::RateLimited {
                retry_after: Some(after),
                ..
            } => *after,
            _ => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt))
                .min(self.max_delay),
        };
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        backoff + jitter
    }
}

/// Provider wrapper that retries retriable failures.
pub struct RetryProvider {
    inner: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmProvider for RetryProvider {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if !e.is_retriable() => return Err(e),
                Err(e) if attempt >= self.policy.max_retries => {
                    error!(
                        model = self.inner.model_name(),
                        attempts = attempt + 1,
                        error = %e,
                        "LLM call failed after all retries"
                    );
                    return Err(LlmError::RetriesExhausted {
                        provider: self.inner.model_name().to_string(),
                        attempts: attempt + 1,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.policy.delay_for(attempt, &e);
                    warn!(
                        model = self.inner.model_name(),
                        attempt = attempt + 1,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "LLM call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::llm::provider::{ChatMessage, FinishReason};

    /// Fails with the queued errors, then succeeds.
    struct FlakyLlm {
        failures: Mutex<Vec<LlmError>>,
        calls: Mutex<u32>,
    }

    impl FlakyLlm {
        fn new(failures: Vec<LlmError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl LlmProvider for FlakyLlm {
        fn model_name(&self) -> &str {
            "flaky"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            *self.calls.lock().unwrap() += 1;
            let next = self.failures.lock().unwrap().pop();
            match next {
                Some(e) => Err(e),
                None => Ok(CompletionResponse {
                    content: "done".into(),
                    input_tokens: 1,
                    output_tokens: 1,
                    finish_reason: FinishReason::Stop,
                    response_id: None,
                }),
            }
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: Duration::ZERO,
        }
    }

    fn rate_limited() -> LlmError {
        LlmError::RateLimited {
            provider: "flaky".into(),
            retry_after: None,
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new(vec![ChatMessage::user("go")])
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let inner = Arc::new(FlakyLlm::new(vec![rate_limited(), rate_limited()]));
        let provider = RetryProvider::new(inner.clone(), fast_policy(3));
        let response = provider.complete(request()).await.unwrap();
        assert_eq!(response.content, "done");
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let inner = Arc::new(FlakyLlm::new(vec![
            rate_limited(),
            rate_limited(),
            rate_limited(),
        ]));
        let provider = RetryProvider::new(inner.clone(), fast_policy(2));
        match provider.complete(request()).await {
            Err(LlmError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn does_not_retry_auth_failures() {
        let inner = Arc::new(FlakyLlm::new(vec![LlmError::AuthFailed {
            provider: "flaky".into(),
        }]));
        let provider = RetryProvider::new(inner.clone(), fast_policy(3));
        assert!(matches!(
            provider.complete(request()).await,
            Err(LlmError::AuthFailed { .. })
        ));
        assert_eq!(inner.calls(), 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            jitter: Duration::ZERO,
        };
        let err = rate_limited();
        assert_eq!(policy.delay_for(0, &err), Duration::from_secs(5));
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(10));
        assert_eq!(policy.delay_for(2, &err), Duration::from_secs(20));
        assert_eq!(policy.delay_for(3, &err), Duration::from_secs(30));
    }

    #[test]
    fn retry_after_overrides_backoff() {
        let policy = RetryPolicy {
            jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        let err = LlmError::RateLimited {
            provider: "x".into(),
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(policy.delay_for(4, &err), Duration::from_secs(2));
    }

    #[test]
    fn retry_after_is_not_capped() {
        let policy = RetryPolicy {
            jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        let err = LlmError::RateLimited {
            provider: "x".into(),
            retry_after: Some(Duration::from_secs(90)),
        };
        assert_eq!(policy.delay_for(0, &err), Duration::from_secs(90));
    }
}
