//! Traffic Analyzer: channels, sources, campaigns and engagement.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::stats::{SegmentStats, pct, rate, round, segment_by};
use super::{AnalysisContext, AnalysisPurpose, ask, parse_or_else, to_prompt_json};
use crate::data::{ConversionRules, Session};
use crate::error::AgentError;
use crate::llm::LlmProvider;

pub use crate::data::TrafficChannel;

const AGENT: &str = "traffic_analyzer";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficMetrics {
    pub total_sessions: usize,
    pub by_channel: Vec<SegmentStats>,
    pub by_source: Vec<SegmentStats>,
    pub campaigns: Vec<SegmentStats>,
    /// Share of first visits among sessions whose visitor status is known.
    pub new_visitor_share: Option<f64>,
    pub returning_visitor_share: Option<f64>,
    pub avg_time_on_site_secs: Option<f64>,
}

impl TrafficMetrics {
    pub fn compute(sessions: &[Session], rules: &ConversionRules, top_n: usize) -> Self {
        let by_channel = segment_by(sessions, rules, |s| Some(s.channel().to_string()));
        let mut by_source = segment_by(sessions, rules, |s| Some(s.traffic().source_name()));
        by_source.truncate(top_n);
        let mut campaigns = segment_by(sessions, rules, |s| s.traffic().campaign.clone());
        campaigns.truncate(top_n);

        let known: Vec<bool> = sessions.iter().filter_map(Session::is_new_visitor).collect();
        let (new_visitor_share, returning_visitor_share) = if known.is_empty() {
            (None, None)
        } else {
            let new = known.iter().filter(|n| **n).count();
            (
                Some(rate(new, known.len())),
                Some(rate(known.len() - new, known.len())),
            )
        };

        let durations: Vec<f64> = sessions
            .iter()
            .filter_map(Session::duration)
            .map(|d| d.as_secs_f64())
            .collect();
        let avg_time_on_site_secs = (!durations.is_empty())
            .then(|| round(durations.iter().sum::<f64>() / durations.len() as f64));

        Self {
            total_sessions: sessions.len(),
            by_channel,
            by_source,
            campaigns,
            new_visitor_share,
            returning_visitor_share,
            avg_time_on_site_secs,
        }
    }

    pub fn channel(&self, channel: TrafficChannel) -> Option<&SegmentStats> {
        let key = channel.to_string();
        self.by_channel.iter().find(|s| s.key == key)
    }
}

/// Model interpretation of the traffic metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficNarrative {
    pub summary: String,
    pub key_metrics: BTreeMap<String, Value>,
    pub findings: Vec<String>,
}

impl TrafficNarrative {
    pub fn from_metrics(m: &TrafficMetrics) -> Self {
        let summary = match m.by_channel.first() {
            Some(top) => format!(
                "{} sessions arrived through {} channels; {} leads with {} of traffic.",
                m.total_sessions,
                m.by_channel.len(),
                top.key,
                pct(top.share)
            ),
            None => format!("{} sessions with no traffic attribution.", m.total_sessions),
        };

        let mut key_metrics = BTreeMap::new();
        key_metrics.insert("Total Sessions".to_string(), Value::from(m.total_sessions));
        if let Some(secs) = m.avg_time_on_site_secs {
            key_metrics.insert(
                "Average Time on Site".to_string(),
                Value::String(format!("{secs:.0}s")),
            );
        }
        if let Some(share) = m.new_visitor_share {
            key_metrics.insert("New Visitors".to_string(), Value::String(pct(share)));
        }

        let findings = m
            .by_channel
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
            .chain(m.campaigns.first().map(|c| {
                format!(
                    "Top campaign '{}' brought {} sessions converting at {}",
                    c.key,
                    c.sessions,
                    pct(c.conversion_rate)
                )
            }))
            .collect();

        Self {
            summary,
            key_metrics,
            findings,
        }
    }

    fn is_empty(&self) -> bool {
        self.summary.trim().is_empty() && self.key_metrics.is_empty() && self.findings.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficAnalysis {
    pub metrics: TrafficMetrics,
    pub narrative: TrafficNarrative,
}

pub struct TrafficAnalyzer {
    llm: Arc<dyn LlmProvider>,
}

impl TrafficAnalyzer {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    pub async fn analyze(&self, ctx: &AnalysisContext) -> Result<TrafficAnalysis, AgentError> {
        let metrics = TrafficMetrics::compute(&ctx.dataset.sessions, ctx.rules(), ctx.config.top_n);
        info!(
            channels = metrics.by_channel.len(),
            campaigns = metrics.campaigns.len(),
            "Traffic metrics computed"
        );

        let user = format!(
            "{header}\n\nTraffic and Engagement Metrics:\n{metrics}\n\nTraffic Data (excerpt):\n{evidence}",
            header = ctx.website.prompt_header(),
            metrics = to_prompt_json(&metrics),
            evidence = to_prompt_json(&ctx.evidence(AnalysisPurpose::TrafficEngagement)),
        );
        let raw = ask(self.llm.as_ref(), AGENT, build_system_prompt(), user, &ctx.config).await?;

        let mut narrative = parse_or_else(AGENT, &raw, || TrafficNarrative::from_metrics(&metrics));
        if narrative.is_empty() {
            narrative = TrafficNarrative::from_metrics(&metrics);
        }
        Ok(TrafficAnalysis { metrics, narrative })
    }
}

fn build_system_prompt() -> String {
    "You are a Traffic and Engagement Analysis Agent. You analyze website traffic \
     sources, campaigns, engagement metrics and overall activity.\n\n\
     You receive exact per-channel metrics computed from the full dataset and a small \
     excerpt of raw rows. Base every statement on the metrics; never invent numbers.\n\n\
     Respond with a JSON object:\n\
     {\n\
       \"summary\": \"A clear summary of traffic and engagement patterns\",\n\
       \"key_metrics\": {\"Metric name\": \"value\"},\n\
       \"findings\": [\"Specific finding about a channel, source or campaign\"]\n\
     }\n\n\
     Highlight channels that bring visitors who leave without converting. \
     ONLY output the JSON object."
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::WebsiteProfile;
    use crate::agents::testing::ScriptedLlm;
    use crate::config::AnalyzerConfig;
    use crate::data::{Preprocessor, RawRecord};
    use serde_json::json;

    fn context() -> AnalysisContext {
        let records: Vec<RawRecord> = json!([
            {"fullVisitorId": "1", "visitId": "1", "navigationFlow": "/home -> /product", "channelGrouping": "Organic Search", "source": "google", "medium": "organic", "timeOnSite": "120", "newVisits": "1"},
            {"fullVisitorId": "2", "visitId": "2", "navigationFlow": "/home", "channelGrouping": "Organic Search", "source": "google", "medium": "organic", "timeOnSite": "10", "newVisits": "1"},
            {"fullVisitorId": "3", "visitId": "3", "navigationFlow": "/sale -> /cart", "source": "newsletter", "medium": "email", "campaign": "spring", "timeOnSite": "200", "visitNumber": "4", "transactions": "1"},
            {"fullVisitorId": "4", "visitId": "4", "navigationFlow": "/home", "source": "(direct)", "medium": "(none)"}
        ])
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect();
        let config = AnalyzerConfig::default();
        let dataset = Preprocessor::from_config(&config).run(records).unwrap();
        AnalysisContext::new(Arc::new(dataset), WebsiteProfile::new("retail", vec![]), config)
            .unwrap()
    }

    #[test]
    fn metrics_attribute_channels_and_campaigns() {
        let ctx = context();
        let m = TrafficMetrics::compute(&ctx.dataset.sessions, ctx.rules(), 10);
        assert_eq!(m.total_sessions, 4);

        let organic = m.channel(TrafficChannel::OrganicSearch).unwrap();
        assert_eq!(organic.sessions, 2);
        assert_eq!(organic.bounce_rate, 0.5);
        let email = m.channel(TrafficChannel::Email).unwrap();
        assert_eq!(email.conversion_rate, 1.0);
        assert_eq!(m.channel(TrafficChannel::Direct).unwrap().sessions, 1);

        assert_eq!(m.by_source[0].key, "google");
        assert_eq!(m.campaigns.len(), 1);
        assert_eq!(m.campaigns[0].key, "spring");

        assert_eq!(m.new_visitor_share, Some(0.6667));
        assert_eq!(m.returning_visitor_share, Some(0.3333));
        assert_eq!(m.avg_time_on_site_secs, Some(110.0));
    }

    #[test]
    fn fallback_narrative_has_key_metrics() {
        let ctx = context();
        let m = TrafficMetrics::compute(&ctx.dataset.sessions, ctx.rules(), 10);
        let n = TrafficNarrative::from_metrics(&m);
        assert_eq!(n.key_metrics["Total Sessions"], json!(4));
        assert!(n.summary.contains("Organic Search leads with 50.0%"));
        assert!(n.findings.iter().any(|f| f.contains("spring")));
    }

    #[tokio::test]
    async fn analyze_passes_metrics_and_website_to_model() {
        let llm = Arc::new(ScriptedLlm::replying(
            r#"{"summary": "Search drives traffic", "key_metrics": {"Sessions": 4}, "findings": ["Email converts best"]}"#,
        ));
        let analysis = TrafficAnalyzer::new(llm.clone()).analyze(&context()).await.unwrap();
        assert_eq!(analysis.narrative.findings, vec!["Email converts best"]);
        let prompt = llm.last_user_prompt();
        assert!(prompt.starts_with("Website Type: retail"));
        assert!(prompt.contains("\"by_channel\""));
        assert!(prompt.contains("channelGrouping"));
    }

    #[tokio::test]
    async fn analyze_propagates_llm_failure() {
        let err = TrafficAnalyzer::new(Arc::new(ScriptedLlm::failing()))
            .analyze(&context())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Llm { agent: "traffic_analyzer", .. }
        ));
    }
}
