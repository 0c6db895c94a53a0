//! Failover across several providers.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};

/// Tries each provider in order, moving on only for retriable errors.
pub struct FailoverProvider {
    providers: Vec<Arc<dyn LlmProvider>>,
}

impl FailoverProvider {
    /// Returns `None` when `providers` is empty.
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>) -> Option<Self> {
        if providers.is_empty() {
            None
        } else {
            Some(Self { providers })
        }
    }
}

#[async_trait]
impl LlmProvider for FailoverProvider {
    fn model_name(&self) -> &str {
        self.providers[0].model_name()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut last_error = None;
        for (index, provider) in self.providers.iter().enumerate() {
            match provider.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retriable() || matches!(e, LlmError::RetriesExhausted { .. }) => {
                    warn!(
                        model = provider.model_name(),
                        position = index,
                        error = %e,
                        "Provider failed, failing over"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| LlmError::RequestFailed {
            provider: "failover".to_string(),
            reason: "no providers configured".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::llm::provider::{ChatMessage, FinishReason};

    struct Fixed {
        name: &'static str,
        result: fn() -> Result<CompletionResponse, LlmError>,
    }

    #[async_trait]
    impl LlmProvider for Fixed {
        fn model_name(&self) -> &str {
            self.name
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            (self.result)()
        }
    }

    fn ok() -> Result<CompletionResponse, LlmError> {
        Ok(CompletionResponse {
            content: "from backup".into(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }

    fn down() -> Result<CompletionResponse, LlmError> {
        Err(LlmError::RequestFailed {
            provider: "primary".into(),
            reason: "503".into(),
        })
    }

    fn unauthorized() -> Result<CompletionResponse, LlmError> {
        Err(LlmError::AuthFailed {
            provider: "primary".into(),
        })
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new(vec![ChatMessage::user("hi")])
    }

    #[test]
    fn empty_provider_list_is_rejected() {
        assert!(FailoverProvider::new(vec![]).is_none());
    }

    #[tokio::test]
    async fn falls_over_to_next_provider() {
        let failover = FailoverProvider::new(vec![
            Arc::new(Fixed { name: "primary", result: down }),
            Arc::new(Fixed { name: "backup", result: ok }),
        ])
        .unwrap();
        assert_eq!(failover.model_name(), "primary");
        let response = failover.complete(request()).await.unwrap();
        assert_eq!(response.content, "from backup");
    }

    #[tokio::test]
    async fn stops_on_non_retriable_error() {
        let failover = FailoverProvider::new(vec![
            Arc::new(Fixed { name: "primary", result: unauthorized }),
            Arc::new(Fixed { name: "backup", result: ok }),
        ])
        .unwrap();
        assert!(matches!(
            failover.complete(request()).await,
            Err(LlmError::AuthFailed { .. })
        ));
    }
}
