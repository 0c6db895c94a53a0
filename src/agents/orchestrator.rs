//! Orchestrator: merges agent outputs into the report body.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::columns::ColumnSelection;
use super::device::DeviceAnalysis;
use super::journey::JourneyAnalysis;
use super::stats::pct;
use super::traffic::TrafficAnalysis;
use super::{AnalysisContext, ask, to_prompt_json};
use crate::error::AgentError;
use crate::llm::LlmProvider;
use crate::llm::json::{parse_lenient, snippet};

const AGENT: &str = "orchestrator";

/// Urgency of an action. Sorts High first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Case-insensitive; anything unrecognized is Medium.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" | "critical" | "urgent" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

/// Accept strings, numbers and booleans where a display string is wanted.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kpi {
    #[serde(deserialize_with = "lenient_string")]
    pub metric: String,
    #[serde(deserialize_with = "lenient_string")]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryData {
    #[serde(deserialize_with = "lenient_string")]
    pub category: String,
    #[serde(deserialize_with = "lenient_string")]
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub problem: String,
    #[serde(default)]
    pub supporting_data: Vec<String>,
    #[serde(default)]
    pub corrective_measures: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
}

/// The synthesized report body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Findings {
    pub key_performance_metrics: Vec<Kpi>,
    pub core_issues: Vec<String>,
    pub user_behavior_insights: Vec<String>,
    pub device_location_data: Vec<CategoryData>,
    pub prioritized_action_plan: Vec<ActionItem>,
}

impl Findings {
    pub const MAX_KPIS: usize = 5;
    pub const MAX_ISSUES: usize = 5;
    pub const MAX_INSIGHTS: usize = 5;
    pub const MAX_DEVICE_LOCATION: usize = 4;
    pub const MAX_ACTIONS: usize = 4;
    pub const MAX_ACTION_DETAILS: usize = 3;

    /// Drop blank entries, enforce section limits and order the action
    /// plan by priority (stable within a priority).
    pub fn normalized(mut self) -> Self {
        fn clean(items: &mut Vec<String>, max: usize) {
            items.retain(|s| !s.trim().is_empty());
            items.truncate(max);
        }

        self.key_performance_metrics
            .retain(|k| !k.metric.trim().is_empty());
        self.key_performance_metrics.truncate(Self::MAX_KPIS);
        clean(&mut self.core_issues, Self::MAX_ISSUES);
        clean(&mut self.user_behavior_insights, Self::MAX_INSIGHTS);
        self.device_location_data
            .retain(|d| !d.category.trim().is_empty());
        self.device_location_data.truncate(Self::MAX_DEVICE_LOCATION);

        self.prioritized_action_plan
            .retain(|a| !a.problem.trim().is_empty());
        self.prioritized_action_plan.sort_by_key(|a| a.priority);
        self.prioritized_action_plan.truncate(Self::MAX_ACTIONS);
        for action in &mut self.prioritized_action_plan {
            clean(&mut action.supporting_data, Self::MAX_ACTION_DETAILS);
            clean(&mut action.corrective_measures, Self::MAX_ACTION_DETAILS);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.key_performance_metrics.is_empty()
            && self.core_issues.is_empty()
            && self.user_behavior_insights.is_empty()
            && self.device_location_data.is_empty()
            && self.prioritized_action_plan.is_empty()
    }

    /// Report body built from the computed metrics alone.
    pub fn from_analyses(
        journey: &JourneyAnalysis,
        device: &DeviceAnalysis,
        traffic: &TrafficAnalysis,
    ) -> Self {
        let jm = &journey.metrics;

        let mut kpis = vec![
            kpi("Total Sessions", jm.total_sessions.to_string()),
            kpi("Bounce Rate", pct(jm.bounce_rate)),
            kpi("Conversion Rate", pct(jm.conversion_rate)),
            kpi("Average Pages per Session", format!("{:.1}", jm.avg_pages_per_session)),
        ];
        if let Some(secs) = jm.avg_duration_secs {
            kpis.push(kpi("Average Session Duration", format!("{secs:.0}s")));
        }

        let mut core_issues: Vec<String> = jm
            .drop_off_points
            .iter()
            .take(3)
            .map(|d| {
                format!(
                    "{} of sessions reaching {} leave there without converting ({} exits)",
                    pct(d.exit_rate),
                    d.page,
                    d.exits
                )
            })
            .collect();
        if jm.bounce_rate >= 0.4 {
            core_issues.push(format!("High bounce rate: {}", pct(jm.bounce_rate)));
        }
        if let Some(worst) = device
            .metrics
            .by_device
            .iter()
            .filter(|s| s.sessions > 1)
            .max_by(|a, b| a.bounce_rate.total_cmp(&b.bounce_rate))
            && worst.bounce_rate > jm.bounce_rate
        {
            core_issues.push(format!(
                "{} sessions bounce at {} against {} overall",
                worst.key,
                pct(worst.bounce_rate),
                pct(jm.bounce_rate)
            ));
        }

        let user_behavior_insights = journey
            .narrative
            .path_patterns
            .iter()
            .chain(journey.narrative.conversion_insights.iter())
            .cloned()
            .collect();

        let mut device_location_data: Vec<CategoryData> = device
            .metrics
            .by_device
            .iter()
            .take(2)
            .map(|s| CategoryData {
                category: format!("Device: {}", s.key),
                data: format!(
                    "{} of sessions, bounce rate {}",
                    pct(s.share),
                    pct(s.bounce_rate)
                ),
            })
            .collect();
        if let Some(country) = device.metrics.top_countries.first() {
            device_location_data.push(CategoryData {
                category: format!("Top Country: {}", country.key),
                data: format!("{} of sessions", pct(country.share)),
            });
        }
        if let Some(channel) = traffic.metrics.by_channel.first() {
            device_location_data.push(CategoryData {
                category: format!("Top Channel: {}", channel.key),
                data: format!(
                    "{} of sessions, conversion rate {}",
                    pct(channel.share),
                    pct(channel.conversion_rate)
                ),
            });
        }

        let mut prioritized_action_plan: Vec<ActionItem> = jm
            .drop_off_points
            .iter()
            .take(3)
            .map(|d| ActionItem {
                problem: format!("Visitors abandon their journey at {}", d.page),
                supporting_data: vec![
                    format!("{} non-converting sessions exit at {}", d.exits, d.page),
                    format!("Exit rate {} of {} sessions reaching it", pct(d.exit_rate), d.sessions_reaching),
                ],
                corrective_measures: vec![
                    format!("Audit {} for friction: load time, unclear calls to action, form errors", d.page),
                    format!("A/B test the layout and messaging of {}", d.page),
                ],
                priority: if d.exit_rate >= 0.5 {
                    Priority::High
                } else if d.exit_rate >= 0.25 {
                    Priority::Medium
                } else {
                    Priority::Low
                },
            })
            .collect();
        if jm.bounce_rate >= 0.4
            && let Some(landing) = jm.top_landing_pages.first()
        {
            prioritized_action_plan.push(ActionItem {
                problem: "Many visitors leave after a single page".to_string(),
                supporting_data: vec![
                    format!("Bounce rate {}", pct(jm.bounce_rate)),
                    format!("Top landing page {} ({} sessions)", landing.page, landing.sessions),
                ],
                corrective_measures: vec![
                    format!("Align {} content with the campaigns and queries that lead to it", landing.page),
                    "Surface a clear next step above the fold".to_string(),
                ],
                priority: Priority::High,
            });
        }

        Self {
            key_performance_metrics: kpis,
            core_issues,
            user_behavior_insights,
            device_location_data,
            prioritized_action_plan,
        }
        .normalized()
    }
}

fn kpi(metric: &str, value: String) -> Kpi {
    Kpi {
        metric: metric.to_string(),
        value,
    }
}

pub struct Orchestrator {
    llm: Arc<dyn LlmProvider>,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Merge the analyses. Evidence rows are projected onto the
    /// recommended columns.
    pub async fn synthesize(
        &self,
        ctx: &AnalysisContext,
        columns: &ColumnSelection,
        journey: &JourneyAnalysis,
        device: &DeviceAnalysis,
        traffic: &TrafficAnalysis,
    ) -> Result<Findings, AgentError> {
        let evidence = ctx
            .dataset
            .excerpt(&columns.all_columns(), ctx.config.excerpt_rows);
        let user = format!(
            "{header}\n\nTraffic and Engagement Analysis:\n{traffic}\n\n\
             User Journey Analysis:\n{journey}\n\n\
             Device and Location Analysis:\n{device}\n\n\
             Recommended Columns:\n{columns}\n\n\
             Evidence Rows:\n{evidence}",
            header = ctx.website.prompt_header(),
            traffic = to_prompt_json(traffic),
            journey = to_prompt_json(journey),
            device = to_prompt_json(device),
            columns = to_prompt_json(columns),
            evidence = to_prompt_json(&evidence),
        );
        let raw = ask(self.llm.as_ref(), AGENT, build_system_prompt(), user, &ctx.config).await?;

        let findings = match parse_findings(&raw) {
            Ok(findings) => findings,
            Err(e) => {
                warn!(error = %e, response = %snippet(&raw), "Orchestrator output unusable, building report from metrics");
                Findings::from_analyses(journey, device, traffic)
            }
        };
        info!(
            issues = findings.core_issues.len(),
            actions = findings.prioritized_action_plan.len(),
            "Findings synthesized"
        );
        Ok(findings)
    }
}

fn parse_findings(raw: &str) -> Result<Findings, String> {
    let findings: Findings = parse_lenient(raw).map_err(|e| e.to_string())?;
    let findings = findings.normalized();
    if findings.is_empty() {
        return Err("response contained no findings".to_string());
    }
    Ok(findings)
}

fn build_system_prompt() -> String {
    format!(
        "You are an Orchestrator Agent. Synthesize the analyses from the specialized agents \
         into a concise, actionable report that would fit on three printed pages.\n\n\
         Respond with a JSON object:\n\
         {{\n\
           \"key_performance_metrics\": [{{\"metric\": \"Metric name\", \"value\": \"Value\"}}],\n\
           \"core_issues\": [\"Critical problem\"],\n\
           \"user_behavior_insights\": [\"Key user journey pattern\"],\n\
           \"device_location_data\": [{{\"category\": \"Category name\", \"data\": \"Key statistic\"}}],\n\
           \"prioritized_action_plan\": [{{\n\
             \"problem\": \"One-sentence definition of the issue\",\n\
             \"supporting_data\": [\"Data point\"],\n\
             \"corrective_measures\": [\"Specific action\"],\n\
             \"priority\": \"high | medium | low\"\n\
           }}]\n\
         }}\n\n\
         Limits: at most {kpis} metrics, {issues} core issues, {insights} insights, \
         {device} device/location statistics and {actions} actions with at most {details} \
         data points and {details} measures each. Use only numbers present in the analyses. \
         ONLY output the JSON object.",
        kpis = Findings::MAX_KPIS,
        issues = Findings::MAX_ISSUES,
        insights = Findings::MAX_INSIGHTS,
        device = Findings::MAX_DEVICE_LOCATION,
        actions = Findings::MAX_ACTIONS,
        details = Findings::MAX_ACTION_DETAILS,
    )
}
