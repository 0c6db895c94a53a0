//! Error types for fix-the-exit.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid conversion pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Context length exceeded: {used} tokens used, {limit} allowed")]
    ContextLengthExceeded { used: usize, limit: usize },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("All {attempts} attempts against {provider} failed: {last}")]
    RetriesExhausted {
        provider: String,
        attempts: u32,
        last: Box<LlmError>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether a retry could plausibly succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::RequestFailed { .. } | Self::InvalidResponse { .. }
        )
    }
}

/// Input data errors (ingest, preprocessing, windows).
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("Record {index} is not a JSON object")]
    NotAnObject { index: usize },

    #[error("Input contains no records")]
    Empty,

    #[error("No usable interaction events after preprocessing ({input_records} records read)")]
    NoUsableEvents { input_records: usize },

    #[error("Analysis window must span 7 to 14 days, got {days:.1} days")]
    InvalidWindow { days: f64 },
}

/// Errors raised by an individual analysis agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("{agent} failed: LLM error: {source}")]
    Llm {
        agent: &'static str,
        #[source]
        source: LlmError,
    },

    #[error("{agent} failed: {reason}")]
    Failed { agent: &'static str, reason: String },
}

impl AgentError {
    /// Name of the agent that produced the error.
    pub fn agent(&self) -> &'static str {
        match self {
            Self::Llm { agent, .. } | Self::Failed { agent, .. } => agent,
        }
    }
}

/// Judge evaluation errors.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Cannot evaluate: {0} is empty")]
    EmptyInput(&'static str),

    #[error("Judge response is missing the '{0}' dimension")]
    MissingDimension(String),

    #[error("Invalid judge response: {0}")]
    InvalidResponse(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Pipeline-level errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Preprocessing failed: {0}")]
    Data(#[from] DataError),

    #[error("Agent stage failed: {0}")]
    Agent(#[from] AgentError),

    #[error("Evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Background task failed: {0}")]
    Join(String),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
