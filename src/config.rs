//! Configuration types.

use std::time::Duration;

use regex::Regex;
use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig, RateLimitConfig, RetryPolicy};

/// Page patterns that mark a session as converted when no explicit
/// purchase event exists.
pub const DEFAULT_CONVERSION_PATTERNS: &[&str] = &[
    r"(?i)checkout/(complete|success|thank)",
    r"(?i)order[-_ ]?(confirm|complete|received)",
    r"(?i)thank[-_ +]?you",
    r"(?i)purchase[-_ ]?complete",
    r"(?i)/confirmation\b",
];

/// Analysis configuration.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Records sampled for column recommendation.
    pub sample_size: usize,
    /// Projected rows shown to each agent as evidence.
    pub excerpt_rows: usize,
    /// Length of the trailing analysis window in days (7..=14).
    pub window_days: u32,
    /// Inactivity gap that splits derived sessions.
    pub session_timeout: Duration,
    /// How many entries each ranked list keeps.
    pub top_n: usize,
    /// Steps kept when printing a navigation path.
    pub max_path_steps: usize,
    /// Sampling temperature for agent prompts.
    pub temperature: f32,
    /// Completion budget per agent call.
    pub max_tokens: u32,
    /// Regexes matched against page paths to detect conversions.
    pub conversion_patterns: Vec<String>,
    /// Client-side rate limits.
    pub rate_limit: RateLimitConfig,
    /// Backoff for transient LLM failures.
    pub retry: RetryPolicy,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            sample_size: 2,
            excerpt_rows: 20,
            window_days: 14,
            session_timeout: Duration::from_secs(30 * 60),
            top_n: 10,
            max_path_steps: 6,
            temperature: 0.2,
            max_tokens: 4096,
            conversion_patterns: DEFAULT_CONVERSION_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl AnalyzerConfig {
    /// Load from `FIX_THE_EXIT_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "FIX_THE_EXIT_SAMPLE_SIZE")? {
            config.sample_size = v;
        }
        if let Some(v) = parse_var(&lookup, "FIX_THE_EXIT_EXCERPT_ROWS")? {
            config.excerpt_rows = v;
        }
        if let Some(v) = parse_var(&lookup, "FIX_THE_EXIT_WINDOW_DAYS")? {
            config.window_days = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "FIX_THE_EXIT_SESSION_TIMEOUT_MIN")? {
            config.session_timeout = Duration::from_secs(v * 60);
        }
        if let Some(v) = parse_var(&lookup, "FIX_THE_EXIT_TOP_N")? {
            config.top_n = v;
        }
        if let Some(v) = parse_var(&lookup, "FIX_THE_EXIT_TEMPERATURE")? {
            config.temperature = v;
        }
        if let Some(v) = parse_var(&lookup, "FIX_THE_EXIT_MAX_TOKENS")? {
            config.max_tokens = v;
        }
        if let Some(v) = parse_var(&lookup, "FIX_THE_EXIT_MAX_WORKERS")? {
            config.rate_limit.max_in_flight = v;
        }
        if let Some(v) = parse_var(&lookup, "FIX_THE_EXIT_CALLS_PER_MINUTE")? {
            config.rate_limit.calls_per_window = v;
        }
        if let Some(v) = parse_var(&lookup, "FIX_THE_EXIT_TOKENS_PER_MINUTE")? {
            config.rate_limit.tokens_per_window = v;
        }
        if let Some(v) = parse_var(&lookup, "FIX_THE_EXIT_MAX_RETRIES")? {
            config.retry.max_retries = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "FIX_THE_EXIT_RETRY_BASE_SECS")? {
            config.retry.base_delay = Duration::from_secs(v);
        }
        if let Some(raw) = lookup("FIX_THE_EXIT_CONVERSION_PATTERNS") {
            let patterns: Vec<String> = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !patterns.is_empty() {
                config.conversion_patterns = patterns;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(7..=14).contains(&self.window_days) {
            return Err(invalid("window_days", "must be between 7 and 14"));
        }
        if self.sample_size == 0 {
            return Err(invalid("sample_size", "must be at least 1"));
        }
        if self.top_n == 0 {
            return Err(invalid("top_n", "must be at least 1"));
        }
        if self.max_path_steps < 2 {
            return Err(invalid("max_path_steps", "must be at least 2"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid("temperature", "must be between 0.0 and 2.0"));
        }
        if self.rate_limit.calls_per_window == 0 {
            return Err(invalid("calls_per_minute", "must be at least 1"));
        }
        if self.rate_limit.max_in_flight == 0 {
            return Err(invalid("max_workers", "must be at least 1"));
        }
        if self.session_timeout.is_zero() {
            return Err(invalid("session_timeout", "must be positive"));
        }
        self.compiled_patterns()?;
        Ok(())
    }

    /// Compile the conversion patterns.
    pub fn compiled_patterns(&self) -> Result<Vec<Regex>, ConfigError> {
        self.conversion_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidPattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

impl LlmConfig {
    /// Read backend, model and API key from the environment.
    ///
    /// `FIX_THE_EXIT_BACKEND` defaults to `anthropic`; `FIX_THE_EXIT_MODEL`
    /// defaults to the backend's default model.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend: LlmBackend = match lookup("FIX_THE_EXIT_BACKEND") {
            Some(raw) => raw.parse()?,
            None => LlmBackend::Anthropic,
        };
        let api_key = lookup(backend.api_key_var())
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(backend.api_key_var().to_string()))?;
        let model = lookup("FIX_THE_EXIT_MODEL")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| backend.default_model().to_string());
        Ok(Self {
            backend,
            api_key: SecretString::from(api_key),
            model,
        })
    }

    /// Secondary backend named by `FIX_THE_EXIT_FALLBACK_BACKEND`, with an
    /// optional `FIX_THE_EXIT_FALLBACK_MODEL`.
    pub fn fallback_from_env() -> Result<Option<Self>, ConfigError> {
        Self::fallback_from_lookup(|key| std::env::var(key).ok())
    }

    pub fn fallback_from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        let Some(backend) =
            lookup("FIX_THE_EXIT_FALLBACK_BACKEND").filter(|b| !b.trim().is_empty())
        else {
            return Ok(None);
        };
        Self::from_lookup(|key| match key {
            "FIX_THE_EXIT_BACKEND" => Some(backend.clone()),
            "FIX_THE_EXIT_MODEL" => lookup("FIX_THE_EXIT_FALLBACK_MODEL"),
            other => lookup(other),
        })
        .map(Some)
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}': {e}"),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = AnalyzerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sample_size, 2);
        assert_eq!(config.rate_limit.calls_per_window, 10);
        assert_eq!(config.rate_limit.tokens_per_window, 20_000);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn env_overrides_defaults() {
        let config = AnalyzerConfig::from_lookup(lookup_from(&[
            ("FIX_THE_EXIT_WINDOW_DAYS", "7"),
            ("FIX_THE_EXIT_MAX_WORKERS", "2"),
            ("FIX_THE_EXIT_SESSION_TIMEOUT_MIN", "15"),
            ("FIX_THE_EXIT_CONVERSION_PATTERNS", "/done, /paid"),
        ]))
        .unwrap();
        assert_eq!(config.window_days, 7);
        assert_eq!(config.rate_limit.max_in_flight, 2);
        assert_eq!(config.session_timeout, Duration::from_secs(900));
        assert_eq!(config.conversion_patterns, vec!["/done", "/paid"]);
    }

    #[test]
    fn window_outside_range_is_rejected() {
        let err = AnalyzerConfig::from_lookup(lookup_from(&[("FIX_THE_EXIT_WINDOW_DAYS", "30")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "window_days"));
    }

    #[test]
    fn unparsable_number_is_rejected() {
        let err = AnalyzerConfig::from_lookup(lookup_from(&[("FIX_THE_EXIT_TOP_N", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("FIX_THE_EXIT_TOP_N"));
    }

    #[test]
    fn bad_pattern_is_rejected() {
        let config = AnalyzerConfig {
            conversion_patterns: vec!["(unclosed".into()],
            ..AnalyzerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn llm_config_requires_backend_key() {
        let err = LlmConfig::from_lookup(lookup_from(&[("FIX_THE_EXIT_BACKEND", "mistral")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref v) if v == "MISTRAL_API_KEY"));

        let config = LlmConfig::from_lookup(lookup_from(&[
            ("FIX_THE_EXIT_BACKEND", "mistral"),
            ("MISTRAL_API_KEY", "secret"),
        ]))
        .unwrap();
        assert_eq!(config.backend, LlmBackend::Mistral);
        assert_eq!(config.model, "mistral-large-latest");
    }

    #[test]
    fn fallback_backend_is_optional() {
        let none = LlmConfig::fallback_from_lookup(lookup_from(&[("ANTHROPIC_API_KEY", "k")]))
            .unwrap();
        assert!(none.is_none());

        let fallback = LlmConfig::fallback_from_lookup(lookup_from(&[
            ("FIX_THE_EXIT_BACKEND", "anthropic"),
            ("FIX_THE_EXIT_MODEL", "primary-model"),
            ("FIX_THE_EXIT_FALLBACK_BACKEND", "openai"),
            ("OPENAI_API_KEY", "k"),
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(fallback.backend, LlmBackend::OpenAi);
        assert_eq!(fallback.model, LlmBackend::OpenAi.default_model());
    }
}
