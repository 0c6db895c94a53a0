//! Analysis agents.
//!
//! Each analyzer computes exact metrics from the session model, then asks
//! the LLM to interpret them. The Column Recommender and the three
//! analyzers are independent; the Orchestrator merges their output.

pub mod columns;
pub mod device;
pub mod journey;
pub mod orchestrator;
pub mod stats;
pub mod traffic;

pub use columns::{AnalysisPurpose, ColumnRecommender, ColumnSelection};
pub use device::{DeviceAnalysis, DeviceAnalyzer, DeviceMetrics, DeviceNarrative};
pub use journey::{JourneyAnalysis, JourneyMapper, JourneyMetrics, JourneyNarrative};
pub use orchestrator::{ActionItem, Findings, Orchestrator, Priority};
pub use stats::SegmentStats;
pub use traffic::{TrafficAnalysis, TrafficAnalyzer, TrafficMetrics, TrafficNarrative};

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AnalyzerConfig;
use crate::data::{ConversionRules, Dataset, RawRecord};
use crate::error::{AgentError, ConfigError};
use crate::llm::json::{parse_lenient, snippet};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

/// The website being analyzed, as described by the operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebsiteProfile {
    pub website_type: String,
    pub specific_issues: Vec<String>,
}

impl WebsiteProfile {
    pub fn new(website_type: impl Into<String>, specific_issues: Vec<String>) -> Self {
        Self {
            website_type: website_type.into(),
            specific_issues,
        }
    }

    /// Header block shared by every agent prompt.
    pub fn prompt_header(&self) -> String {
        let issues = if self.specific_issues.is_empty() {
            "none reported".to_string()
        } else {
            self.specific_issues.join("; ")
        };
        format!(
            "Website Type: {}\nSpecific Issues: {}",
            self.website_type, issues
        )
    }
}

/// Everything an agent reads. Shared read-only across concurrent agents.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub dataset: Arc<Dataset>,
    pub website: WebsiteProfile,
    pub config: AnalyzerConfig,
    rules: ConversionRules,
}

impl AnalysisContext {
    pub fn new(
        dataset: Arc<Dataset>,
        website: WebsiteProfile,
        config: AnalyzerConfig,
    ) -> Result<Self, ConfigError> {
        let rules = ConversionRules::new(config.compiled_patterns()?);
        Ok(Self {
            dataset,
            website,
            config,
            rules,
        })
    }

    pub fn rules(&self) -> &ConversionRules {
        &self.rules
    }

    /// Evidence rows for a purpose, projected onto its default columns.
    pub fn evidence(&self, purpose: AnalysisPurpose) -> Vec<RawRecord> {
        let available = self.dataset.columns();
        let columns = columns::defaults_for(purpose, &available);
        if columns.is_empty() {
            return Vec::new();
        }
        self.dataset.excerpt(&columns, self.config.excerpt_rows)
    }
}

/// Send a system/user prompt pair and return the raw completion text.
pub(crate) async fn ask(
    llm: &dyn LlmProvider,
    agent: &'static str,
    system: String,
    user: String,
    config: &AnalyzerConfig,
) -> Result<String, AgentError> {
    let request = CompletionRequest::new(vec![ChatMessage::system(system), ChatMessage::user(user)])
        .with_temperature(config.temperature)
        .with_max_tokens(config.max_tokens);

    let response = llm
        .complete(request)
        .await
        .map_err(|source| AgentError::Llm { agent, source })?;

    debug!(
        agent,
        input_tokens = response.input_tokens,
        output_tokens = response.output_tokens,
        "Agent completion received"
    );
    Ok(response.content)
}

/// Parse model output, falling back to `fallback` when it is unusable.
pub(crate) fn parse_or_else<T: DeserializeOwned>(
    agent: &'static str,
    raw: &str,
    fallback: impl FnOnce() -> T,
) -> T {
    match parse_lenient::<T>(raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(
                agent,
                error = %e,
                response = %snippet(raw),
                "Failed to parse agent response, using computed fallback"
            );
            fallback()
        }
    }
}

/// Pretty JSON for prompts. Serialization of plain data cannot fail, but
/// an empty object is sent rather than aborting if it ever does.
pub(crate) fn to_prompt_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}
