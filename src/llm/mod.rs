//! LLM integration for fix-the-exit.
//!
//! Supports:
//! - **Anthropic**: direct API access via rig-core
//! - **OpenAI**: direct API access via rig-core
//! - **Mistral**: chat-completions over `reqwest`
//!
//! Every backend is wrapped in a [`RateLimitedProvider`] and a
//! [`RetryProvider`] before the agents see it.

pub mod failover;
pub mod json;
pub mod mistral;
pub mod provider;
pub mod rate_limit;
pub mod retry;
mod rig_adapter;

pub use failover::FailoverProvider;
pub use mistral::MistralProvider;
pub use provider::*;
pub use rate_limit::{RateLimitConfig, RateLimitedProvider, RateLimiter};
pub use retry::{RetryPolicy, RetryProvider};
pub use rig_adapter::RigAdapter;

use std::str::FromStr;
use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::{ConfigError, LlmError};

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
    Mistral,
}

impl LlmBackend {
    /// Environment variable holding this backend's API key.
    pub fn api_key_var(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Mistral => "MISTRAL_API_KEY",
        }
    }

    /// Model used when none is configured.
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::OpenAi => "gpt-4o",
            Self::Mistral => "mistral-large-latest",
        }
    }
}

impl FromStr for LlmBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" | "open_ai" | "gpt" => Ok(Self::OpenAi),
            "mistral" => Ok(Self::Mistral),
            other => Err(ConfigError::InvalidValue {
                key: "backend".to_string(),
                message: format!("unknown LLM backend '{other}'"),
            }),
        }
    }
}

impl std::fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAi => write!(f, "openai"),
            Self::Mistral => write!(f, "mistral"),
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.backend {
        LlmBackend::Anthropic => create_anthropic_provider(config),
        LlmBackend::OpenAi => create_openai_provider(config),
        LlmBackend::Mistral => {
            tracing::info!("Using Mistral (model: {})", config.model);
            Ok(Arc::new(MistralProvider::new(
                config.api_key.clone(),
                &config.model,
            )?))
        }
    }
}

fn create_anthropic_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, &config.model, "anthropic")))
}

fn create_openai_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, &config.model, "openai")))
}

/// Wrap a raw provider with rate limiting and retries.
///
/// Retries sit outside the limiter so every attempt is counted against the
/// window.
pub fn with_resilience(
    provider: Arc<dyn LlmProvider>,
    limits: RateLimitConfig,
    retry: RetryPolicy,
) -> Arc<dyn LlmProvider> {
    let limited: Arc<dyn LlmProvider> = Arc::new(RateLimitedProvider::new(provider, limits));
    Arc::new(RetryProvider::new(limited, retry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_provider_missing_key_still_constructs() {
        // rig-core clients accept any string as API key at construction time.
        // The actual auth failure happens when making a request.
        let config = LlmConfig {
            backend: LlmBackend::Anthropic,
            api_key: secrecy::SecretString::from("test-key"),
            model: "claude-3-5-sonnet-latest".to_string(),
        };
        let provider = create_provider(&config);
        assert!(provider.is_ok());
        assert_eq!(provider.unwrap().model_name(), "claude-3-5-sonnet-latest");
    }

    #[test]
    fn test_create_openai_provider() {
        let config = LlmConfig {
            backend: LlmBackend::OpenAi,
            api_key: secrecy::SecretString::from("sk-test"),
            model: "gpt-4o".to_string(),
        };
        let provider = create_provider(&config);
        assert!(provider.is_ok());
        assert_eq!(provider.unwrap().model_name(), "gpt-4o");
    }

    #[test]
    fn test_create_mistral_provider() {
        let config = LlmConfig {
            backend: LlmBackend::Mistral,
            api_key: secrecy::SecretString::from("m-test"),
            model: "mistral-large-latest".to_string(),
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "mistral-large-latest");
    }

    #[test]
    fn backend_parses_aliases() {
        assert_eq!("Claude".parse::<LlmBackend>().unwrap(), LlmBackend::Anthropic);
        assert_eq!("openai".parse::<LlmBackend>().unwrap(), LlmBackend::OpenAi);
        assert_eq!(" MISTRAL ".parse::<LlmBackend>().unwrap(), LlmBackend::Mistral);
        assert!("gemini".parse::<LlmBackend>().is_err());
    }

    #[test]
    fn resilient_stack_keeps_model_name() {
        let config = LlmConfig {
            backend: LlmBackend::Mistral,
            api_key: secrecy::SecretString::from("m-test"),
            model: "mistral-small-latest".to_string(),
        };
        let provider = with_resilience(
            create_provider(&config).unwrap(),
            RateLimitConfig::default(),
            RetryPolicy::default(),
        );
        assert_eq!(provider.model_name(), "mistral-small-latest");
    }
}
