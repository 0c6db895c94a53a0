//! Device Analyzer: device classes, browsers and locations.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::stats::{SegmentStats, pct, segment_by};
use super::{AnalysisContext, AnalysisPurpose, ask, parse_or_else, to_prompt_json};
use crate::data::{ConversionRules, Session};
use crate::error::AgentError;
use crate::llm::LlmProvider;

pub use crate::data::DeviceClass;

const AGENT: &str = "device_analyzer";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetrics {
    pub total_sessions: usize,
    pub by_device: Vec<SegmentStats>,
    pub by_browser: Vec<SegmentStats>,
    pub top_countries: Vec<SegmentStats>,
}

impl DeviceMetrics {
    pub fn compute(sessions: &[Session], rules: &ConversionRules, top_n: usize) -> Self {
        let by_device = segment_by(sessions, rules, |s| Some(s.device_class().to_string()));
        let mut by_browser = segment_by(sessions, rules, Session::browser);
        by_browser.truncate(top_n);
        let mut top_countries = segment_by(sessions, rules, |s| s.country().map(String::from));
        top_countries.truncate(top_n);
        Self {
            total_sessions: sessions.len(),
            by_device,
            by_browser,
            top_countries,
        }
    }

    pub fn device(&self, class: DeviceClass) -> Option<&SegmentStats> {
        let key = class.to_string();
        self.by_device.iter().find(|s| s.key == key)
    }
}

/// Model interpretation of the device metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceNarrative {
    pub summary: String,
    pub device_breakdown: BTreeMap<String, Value>,
    pub location_insights: Vec<String>,
    pub browser_stats: BTreeMap<String, Value>,
}

impl DeviceNarrative {
    pub fn from_metrics(m: &DeviceMetrics) -> Self {
        let summary = match m.by_device.first() {
            Some(top) => format!(
                "{} is the largest device class with {} of {} sessions (bounce rate {}, conversion rate {}).",
                top.key,
                pct(top.share),
                m.total_sessions,
                pct(top.bounce_rate),
                pct(top.conversion_rate)
            ),
            None => format!("{} sessions carried no device information.", m.total_sessions),
        };
        let breakdown = |segments: &[SegmentStats]| -> BTreeMap<String, Value> {
            segments
                .iter()
                .map(|s| (s.key.clone(), Value::String(pct(s.share))))
                .collect()
        };
        let location_insights = m
            .top_countries
            .iter()
            .take(3)
            .map(|c| {
                format!(
                    "{}: {} of sessions, bounce rate {}, conversion rate {}",
                    c.key,
                    pct(c.share),
                    pct(c.bounce_rate),
                    pct(c.conversion_rate)
                )
            })
            .collect();
        Self {
            summary,
            device_breakdown: breakdown(&m.by_device),
            location_insights,
            browser_stats: breakdown(&m.by_browser),
        }
    }

    fn is_empty(&self) -> bool {
        self.summary.trim().is_empty()
            && self.device_breakdown.is_empty()
            && self.location_insights.is_empty()
            && self.browser_stats.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAnalysis {
    pub metrics: DeviceMetrics,
    pub narrative: DeviceNarrative,
}

pub struct DeviceAnalyzer {
    llm: Arc<dyn LlmProvider>,
}

impl DeviceAnalyzer {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    pub async fn analyze(&self, ctx: &AnalysisContext) -> Result<DeviceAnalysis, AgentError> {
        let metrics = DeviceMetrics::compute(&ctx.dataset.sessions, ctx.rules(), ctx.config.top_n);
        info!(
            devices = metrics.by_device.len(),
            browsers = metrics.by_browser.len(),
            countries = metrics.top_countries.len(),
            "Device metrics computed"
        );

        let user = format!(
            "{header}\n\nDevice and Location Metrics:\n{metrics}\n\nDevice and Location Data (excerpt):\n{evidence}",
            header = ctx.website.prompt_header(),
            metrics = to_prompt_json(&metrics),
            evidence = to_prompt_json(&ctx.evidence(AnalysisPurpose::DeviceLocation)),
        );
        let raw = ask(self.llm.as_ref(), AGENT, build_system_prompt(), user, &ctx.config).await?;

        let mut narrative = parse_or_else(AGENT, &raw, || DeviceNarrative::from_metrics(&metrics));
        if narrative.is_empty() {
            narrative = DeviceNarrative::from_metrics(&metrics);
        }
        Ok(DeviceAnalysis { metrics, narrative })
    }
}

fn build_system_prompt() -> String {
    "You are a Device and Location Analysis Agent. You analyze device types, browsers, \
     geographic locations and technical aspects of website visits.\n\n\
     You receive exact per-segment metrics computed from the full dataset and a small \
     excerpt of raw rows. Base every statement on the metrics; never invent numbers.\n\n\
     Respond with a JSON object:\n\
     {\n\
       \"summary\": \"A clear summary of device and location patterns\",\n\
       \"device_breakdown\": {\"Desktop\": \"share and behaviour\", \"Mobile\": \"...\"},\n\
       \"location_insights\": [\"Insight about a country or region\"],\n\
       \"browser_stats\": {\"Chrome\": \"share and behaviour\"}\n\
     }\n\n\
     Point out devices, browsers or regions where users struggle. \
     ONLY output the JSON object."
        .to_string()
}
