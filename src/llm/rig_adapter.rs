//! Bridges rig-core's `CompletionModel` to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::completion::{AssistantContent, CompletionError, CompletionModel, Message};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};

/// Completion budget used when the request leaves it open. Anthropic rejects
/// requests without one.
const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Adapter wrapping any rig completion model.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: &'static str,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str, provider: &'static str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider,
        }
    }

    fn map_error(&self, err: CompletionError) -> LlmError {
        let reason = err.to_string();
        let lower = reason.to_lowercase();
        if lower.contains("429") || lower.contains("rate limit") {
            LlmError::RateLimited {
                provider: self.provider.to_string(),
                retry_after: None,
            }
        } else if lower.contains("401") || lower.contains("unauthorized") {
            LlmError::AuthFailed {
                provider: self.provider.to_string(),
            }
        } else {
            LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason,
            }
        }
    }
}

/// Split our flat message list into rig's preamble, history and prompt.
fn split_messages(
    messages: Vec<ChatMessage>,
) -> Option<(Option<String>, Vec<Message>, Message)> {
    let mut preamble: Vec<String> = Vec::new();
    let mut history = Vec::new();
    for message in messages {
        match message.role {
            Role::System => preamble.push(message.content),
            Role::User => history.push(Message::user(message.content)),
            Role::Assistant => history.push(Message::assistant(message.content)),
        }
    }
    let prompt = history.pop()?;
    let preamble = if preamble.is_empty() {
        None
    } else {
        Some(preamble.join("\n\n"))
    };
    Some((preamble, history, prompt))
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (preamble, history, prompt) =
            split_messages(request.messages).ok_or_else(|| LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason: "request has no user message".to_string(),
            })?;

        let mut builder = self.model.completion_request(prompt).messages(history);
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        builder = builder.max_tokens(
            request
                .max_tokens
                .map(u64::from)
                .unwrap_or(DEFAULT_MAX_TOKENS),
        );

        let response = builder.send().await.map_err(|e| self.map_error(e))?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|part| match part {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.to_string(),
                reason: "model returned no text content".to_string(),
            });
        }

        Ok(CompletionResponse {
            content,
            input_tokens: u32::try_from(response.usage.input_tokens).unwrap_or(u32::MAX),
            output_tokens: u32::try_from(response.usage.output_tokens).unwrap_or(u32::MAX),
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}
