//! Column Recommender: decides which input columns serve which analysis.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{AnalysisContext, ask, to_prompt_json};
use crate::error::AgentError;
use crate::llm::LlmProvider;
use crate::llm::json::{parse_lenient, snippet};

const AGENT: &str = "column_recommender";

/// What a group of columns is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisPurpose {
    TrafficEngagement,
    UserJourney,
    DeviceLocation,
}

impl AnalysisPurpose {
    pub const ALL: [Self; 3] = [Self::TrafficEngagement, Self::UserJourney, Self::DeviceLocation];

    /// Columns used when nothing better is known.
    pub fn default_columns(self) -> &'static [&'static str] {
        match self {
            Self::TrafficEngagement => &[
                "source",
                "medium",
                "channelGrouping",
                "timeOnSite",
                "bounces",
                "visits",
            ],
            Self::UserJourney => &[
                "navigationFlow",
                "pageTitleFlow",
                "landingScreenName",
                "exitScreenName",
                "pageviews",
            ],
            Self::DeviceLocation => &[
                "deviceCategory",
                "isMobile",
                "browser",
                "country",
                "continent",
                "city",
            ],
        }
    }

    /// Key used in the model's JSON answer.
    fn response_key(self) -> &'static str {
        match self {
            Self::TrafficEngagement => "traffic_engagement_columns",
            Self::UserJourney => "user_journey_columns",
            Self::DeviceLocation => "device_location_columns",
        }
    }
}

impl fmt::Display for AnalysisPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrafficEngagement => write!(f, "Traffic & Engagement"),
            Self::UserJourney => write!(f, "User Journey"),
            Self::DeviceLocation => write!(f, "Device & Location"),
        }
    }
}

/// Default columns for `purpose` that exist in the data, compared
/// case-insensitively and returned with the data's spelling.
pub fn defaults_for(purpose: AnalysisPurpose, available: &BTreeSet<String>) -> Vec<String> {
    purpose
        .default_columns()
        .iter()
        .filter_map(|wanted| {
            available
                .iter()
                .find(|have| have.eq_ignore_ascii_case(wanted))
                .cloned()
        })
        .collect()
}

/// Columns assigned to each analysis purpose. Produced once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSelection {
    columns: BTreeMap<AnalysisPurpose, Vec<String>>,
}

impl ColumnSelection {
    /// Keep only columns present in `available` (top-level name, before
    /// any `.child` suffix). Empty purposes get their defaults, filtered
    /// to what exists, or unfiltered when none exist.
    pub fn from_candidates(
        mut candidates: BTreeMap<AnalysisPurpose, Vec<String>>,
        available: &BTreeSet<String>,
    ) -> Self {
        let mut columns = BTreeMap::new();
        for purpose in AnalysisPurpose::ALL {
            let mut kept: Vec<String> = Vec::new();
            for column in candidates.remove(&purpose).unwrap_or_default() {
                let top = column.split('.').next().unwrap_or(&column);
                if available.contains(top) && !kept.contains(&column) {
                    kept.push(column);
                }
            }
            if kept.is_empty() {
                kept = defaults_for(purpose, available);
            }
            if kept.is_empty() {
                kept = purpose
                    .default_columns()
                    .iter()
                    .map(|c| c.to_string())
                    .collect();
            }
            columns.insert(purpose, kept);
        }
        Self { columns }
    }

    /// Default selection for the given available columns.
    pub fn defaults(available: &BTreeSet<String>) -> Self {
        Self::from_candidates(BTreeMap::new(), available)
    }

    pub fn get(&self, purpose: AnalysisPurpose) -> &[String] {
        self.columns.get(&purpose).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (AnalysisPurpose, &[String])> {
        self.columns.iter().map(|(p, c)| (*p, c.as_slice()))
    }

    /// Union of all selected columns, sorted.
    pub fn all_columns(&self) -> Vec<String> {
        self.columns
            .values()
            .flatten()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Asks the LLM to map available columns to analysis purposes.
pub struct ColumnRecommender {
    llm: Arc<dyn LlmProvider>,
}

impl ColumnRecommender {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    pub async fn recommend(&self, ctx: &AnalysisContext) -> Result<ColumnSelection, AgentError> {
        let sample = ctx.dataset.sample(ctx.config.sample_size);
        let available: BTreeSet<String> = ctx.dataset.columns();

        let user = build_user_prompt(ctx, &available, &to_prompt_json(&sample));
        let raw = ask(self.llm.as_ref(), AGENT, build_system_prompt(), user, &ctx.config).await?;

        let selection = match parse_recommendation(&raw) {
            Ok(candidates) => ColumnSelection::from_candidates(candidates, &available),
            Err(e) => {
                warn!(error = %e, response = %snippet(&raw), "Column recommendation unusable, using defaults");
                ColumnSelection::defaults(&available)
            }
        };

        info!(
            traffic = selection.get(AnalysisPurpose::TrafficEngagement).len(),
            journey = selection.get(AnalysisPurpose::UserJourney).len(),
            device = selection.get(AnalysisPurpose::DeviceLocation).len(),
            "Column recommendations ready"
        );
        Ok(selection)
    }
}

fn build_system_prompt() -> String {
    "You are a Column Recommendation Agent. Analyze sample rows of website analytics \
     data and recommend which columns each specialized analysis should use.\n\n\
     Analyses:\n\
     1. Traffic and Engagement: traffic sources, engagement metrics, overall activity.\n\
     2. User Journey and Navigation: navigation paths, conversion funnels, user flow.\n\
     3. Device and Location: device types, geographic locations, technical aspects.\n\n\
     Respond with a JSON object:\n\
     {\"traffic_engagement_columns\": [\"...\"], \"user_journey_columns\": [\"...\"], \
     \"device_location_columns\": [\"...\"]}\n\n\
     Only use column names from the available list. A column may serve several analyses. \
     ONLY output the JSON object."
        .to_string()
}

fn build_user_prompt(ctx: &AnalysisContext, available: &BTreeSet<String>, sample_json: &str) -> String {
    let columns: Vec<&str> = available.iter().map(String::as_str).collect();
    format!(
        "{header}\n\nAvailable Columns: {columns}\n\nSample Data:\n{sample_json}",
        header = ctx.website.prompt_header(),
        columns = columns.join(", "),
    )
}

fn parse_recommendation(raw: &str) -> Result<BTreeMap<AnalysisPurpose, Vec<String>>, String> {
    let value: serde_json::Value = parse_lenient(raw).map_err(|e| e.to_string())?;
    let object = value
        .as_object()
        .ok_or_else(|| "response is not a JSON object".to_string())?;

    let mut out = BTreeMap::new();
    for purpose in AnalysisPurpose::ALL {
        let list = object
            .get(purpose.response_key())
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        out.insert(purpose, list);
    }
    if out.values().all(Vec::is_empty) {
        return Err("no column lists in response".to_string());
    }
    Ok(out)
}
