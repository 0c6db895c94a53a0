//! Journey Mapper: navigation paths, conversion and drop-off.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::stats::{pct, rate, round, top_counts};
use super::{AnalysisContext, AnalysisPurpose, ask, parse_or_else, to_prompt_json};
use crate::data::{ConversionRules, Session, collapse_repeats};
use crate::error::AgentError;
use crate::llm::LlmProvider;

const AGENT: &str = "journey_mapper";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathCount {
    pub path: Vec<String>,
    pub sessions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageCount {
    pub page: String,
    pub sessions: usize,
}

/// A page where non-converting sessions end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropOff {
    pub page: String,
    /// Non-converting sessions that exited here.
    pub exits: usize,
    /// Sessions that viewed this page at all.
    pub sessions_reaching: usize,
    pub exit_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneyMetrics {
    pub total_sessions: usize,
    pub bounce_rate: f64,
    pub conversion_rate: f64,
    pub avg_pages_per_session: f64,
    pub avg_duration_secs: Option<f64>,
    pub top_paths: Vec<PathCount>,
    pub top_landing_pages: Vec<PageCount>,
    pub drop_off_points: Vec<DropOff>,
    /// Fraction of sessions that went back to a page seen earlier.
    pub revisit_share: f64,
}

impl JourneyMetrics {
    pub fn compute(
        sessions: &[Session],
        rules: &ConversionRules,
        top_n: usize,
        max_path_steps: usize,
    ) -> Self {
        let total = sessions.len();
        let bounces = sessions.iter().filter(|s| s.is_bounce()).count();
        let conversions = sessions.iter().filter(|s| s.converted(rules)).count();
        let revisits = sessions.iter().filter(|s| s.has_revisits()).count();
        let pages: usize = sessions.iter().map(Session::page_views).sum();

        let durations: Vec<f64> = sessions
            .iter()
            .filter_map(Session::duration)
            .map(|d| d.as_secs_f64())
            .collect();
        let avg_duration_secs = if durations.is_empty() {
            None
        } else {
            Some(round(durations.iter().sum::<f64>() / durations.len() as f64))
        };

        let top_paths = top_counts(
            sessions.iter().filter_map(|s| {
                let pages = s.pages();
                if pages.is_empty() {
                    return None;
                }
                let mut path = collapse_repeats(&pages);
                path.truncate(max_path_steps);
                Some(path.into_iter().map(String::from).collect::<Vec<_>>())
            }),
            top_n,
        )
        .into_iter()
        .map(|(path, sessions)| PathCount { path, sessions })
        .collect();

        let top_landing_pages = top_counts(
            sessions
                .iter()
                .filter_map(|s| s.landing_page().map(String::from)),
            top_n,
        )
        .into_iter()
        .map(|(page, sessions)| PageCount { page, sessions })
        .collect();

        Self {
            total_sessions: total,
            bounce_rate: rate(bounces, total),
            conversion_rate: rate(conversions, total),
            avg_pages_per_session: if total == 0 {
                0.0
            } else {
                round(pages as f64 / total as f64)
            },
            avg_duration_secs,
            top_paths,
            top_landing_pages,
            drop_off_points: drop_off_points(sessions, rules, top_n),
            revisit_share: rate(revisits, total),
        }
    }
}

/// Exit pages of non-converting sessions, most exits first.
fn drop_off_points(sessions: &[Session], rules: &ConversionRules, top_n: usize) -> Vec<DropOff> {
    let mut reaching: HashMap<&str, usize> = HashMap::new();
    for session in sessions {
        let mut pages = session.pages();
        pages.sort_unstable();
        pages.dedup();
        for page in pages {
            *reaching.entry(page).or_default() += 1;
        }
    }

    let exits = top_counts(
        sessions
            .iter()
            .filter(|s| !s.converted(rules))
            .filter_map(|s| s.exit_page().map(String::from)),
        top_n,
    );

    exits
        .into_iter()
        .map(|(page, exits)| {
            let sessions_reaching = reaching.get(page.as_str()).copied().unwrap_or(exits);
            DropOff {
                exit_rate: rate(exits, sessions_reaching),
                page,
                exits,
                sessions_reaching,
            }
        })
        .collect()
}

/// Model interpretation of the journey metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JourneyNarrative {
    pub summary: String,
    pub journey_maps: Vec<String>,
    pub path_patterns: Vec<String>,
    pub conversion_insights: Vec<String>,
}

impl JourneyNarrative {
    /// Plain statements derived from the metrics alone.
    pub fn from_metrics(m: &JourneyMetrics) -> Self {
        let summary = format!(
            "{} sessions viewed {:.1} pages on average; {} bounced and {} converted.",
            m.total_sessions,
            m.avg_pages_per_session,
            pct(m.bounce_rate),
            pct(m.conversion_rate)
        );
        let journey_maps = m
            .top_paths
            .iter()
            .take(3)
            .map(|p| format!("{} -> Exit ({} sessions)", p.path.join(" -> "), p.sessions))
            .collect();
        let path_patterns = m
            .top_landing_pages
            .iter()
            .take(3)
            .map(|p| format!("{} sessions land on {}", p.sessions, p.page))
            .chain((m.revisit_share > 0.0).then(|| {
                format!(
                    "{} of sessions return to a page they already viewed",
                    pct(m.revisit_share)
                )
            }))
            .collect();
        let conversion_insights = m
            .drop_off_points
            .iter()
            .take(3)
            .map(|d| {
                format!(
                    "{} non-converting sessions exit at {} ({} of sessions reaching it)",
                    d.exits,
                    d.page,
                    pct(d.exit_rate)
                )
            })
            .collect();
        Self {
            summary,
            journey_maps,
            path_patterns,
            conversion_insights,
        }
    }

    fn is_empty(&self) -> bool {
        self.summary.trim().is_empty()
            && self.journey_maps.is_empty()
            && self.path_patterns.is_empty()
            && self.conversion_insights.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneyAnalysis {
    pub metrics: JourneyMetrics,
    pub narrative: JourneyNarrative,
}

pub struct JourneyMapper {
    llm: Arc<dyn LlmProvider>,
}

impl JourneyMapper {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    pub async fn analyze(&self, ctx: &AnalysisContext) -> Result<JourneyAnalysis, AgentError> {
        let metrics = JourneyMetrics::compute(
            &ctx.dataset.sessions,
            ctx.rules(),
            ctx.config.top_n,
            ctx.config.max_path_steps,
        );
        info!(
            sessions = metrics.total_sessions,
            bounce_rate = metrics.bounce_rate,
            conversion_rate = metrics.conversion_rate,
            "Journey metrics computed"
        );

        let user = format!(
            "{header}\n\nJourney Metrics:\n{metrics}\n\nUser Journey Data (excerpt):\n{evidence}",
            header = ctx.website.prompt_header(),
            metrics = to_prompt_json(&metrics),
            evidence = to_prompt_json(&ctx.evidence(AnalysisPurpose::UserJourney)),
        );
        let raw = ask(self.llm.as_ref(), AGENT, build_system_prompt(), user, &ctx.config).await?;

        let mut narrative = parse_or_else(AGENT, &raw, || JourneyNarrative::from_metrics(&metrics));
        if narrative.is_empty() {
            narrative = JourneyNarrative::from_metrics(&metrics);
        }
        Ok(JourneyAnalysis { metrics, narrative })
    }
}

fn build_system_prompt() -> String {
    "You are a User Journey and Navigation Agent. You analyze navigation paths, \
     conversion funnels and user flow through a website.\n\n\
     You receive exact journey metrics computed from the full dataset and a small \
     excerpt of raw rows. Base every statement on the metrics; never invent numbers.\n\n\
     Respond with a JSON object:\n\
     {\n\
       \"summary\": \"A clear summary of user journey patterns\",\n\
       \"journey_maps\": [\"Page -> Page -> Exit\"],\n\
       \"path_patterns\": [\"Common pattern and what it suggests\"],\n\
       \"conversion_insights\": [\"Insight about conversion points or drop-offs\"]\n\
     }\n\n\
     Focus on problem areas in the journey and potential improvements. \
     ONLY output the JSON object."
        .to_string()
}
