//! The analysis report.

pub mod markdown;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agents::{
    ColumnSelection, DeviceAnalysis, Findings, JourneyAnalysis, TrafficAnalysis, WebsiteProfile,
};
use crate::data::{AnalysisWindow, PreprocessStats};

/// Inputs for [`Report::from_parts`].
#[derive(Debug, Clone)]
pub struct ReportParts {
    pub website: WebsiteProfile,
    pub window: Option<AnalysisWindow>,
    pub stats: PreprocessStats,
    pub columns: ColumnSelection,
    pub journey: JourneyAnalysis,
    pub device: DeviceAnalysis,
    pub traffic: TrafficAnalysis,
    pub findings: Findings,
    pub model: String,
}

/// A finished analysis. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    id: Uuid,
    generated_at: DateTime<Utc>,
    website: WebsiteProfile,
    window: Option<AnalysisWindow>,
    stats: PreprocessStats,
    columns: ColumnSelection,
    journey: JourneyAnalysis,
    device: DeviceAnalysis,
    traffic: TrafficAnalysis,
    findings: Findings,
    model: String,
}

impl Report {
    pub fn from_parts(parts: ReportParts) -> Self {
        Self {
            id: Uuid::new_v4(),
            generated_at: Utc::now(),
            website: parts.website,
            window: parts.window,
            stats: parts.stats,
            columns: parts.columns,
            journey: parts.journey,
            device: parts.device,
            traffic: parts.traffic,
            findings: parts.findings,
            model: parts.model,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn website(&self) -> &WebsiteProfile {
        &self.website
    }

    pub fn window(&self) -> Option<&AnalysisWindow> {
        self.window.as_ref()
    }

    pub fn stats(&self) -> &PreprocessStats {
        &self.stats
    }

    pub fn columns(&self) -> &ColumnSelection {
        &self.columns
    }

    pub fn journey(&self) -> &JourneyAnalysis {
        &self.journey
    }

    pub fn device(&self) -> &DeviceAnalysis {
        &self.device
    }

    pub fn traffic(&self) -> &TrafficAnalysis {
        &self.traffic
    }

    pub fn findings(&self) -> &Findings {
        &self.findings
    }

    /// Model that produced the narratives.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn to_markdown(&self) -> String {
        markdown::render(self)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// `{website type with spaces as underscores}_{suffix}.md`
pub fn file_name(website_type: &str, suffix: &str) -> String {
    let stem: String = website_type
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| !matches!(c, '/' | '\\'))
        .collect();
    let stem = if stem.is_empty() { "website".to_string() } else { stem };
    format!("{stem}_{suffix}.md")
}

pub fn report_file_name(website_type: &str) -> String {
    file_name(website_type, "analysis_report")
}

pub fn error_file_name(website_type: &str) -> String {
    file_name(website_type, "error_report")
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::collections::BTreeSet;

    use super::*;
    use crate::agents::orchestrator::{ActionItem, CategoryData, Kpi, Priority};
    use crate::agents::{
        DeviceMetrics, DeviceNarrative, JourneyMetrics, JourneyNarrative, TrafficMetrics,
        TrafficNarrative,
    };

    pub fn report() -> Report {
        let journey = JourneyMetrics::compute(&[], &Default::default(), 10, 6);
        let device = DeviceMetrics::compute(&[], &Default::default(), 10);
        let traffic = TrafficMetrics::compute(&[], &Default::default(), 10);
        Report::from_parts(ReportParts {
            website: WebsiteProfile::new("online store", vec!["cart abandonment".into()]),
            window: None,
            stats: PreprocessStats {
                input_records: 12,
                sessions: 3,
                events: 12,
                ..Default::default()
            },
            columns: ColumnSelection::defaults(&BTreeSet::new()),
            journey: JourneyAnalysis {
                narrative: JourneyNarrative::from_metrics(&journey),
                metrics: journey,
            },
            device: DeviceAnalysis {
                narrative: DeviceNarrative::from_metrics(&device),
                metrics: device,
            },
            traffic: TrafficAnalysis {
                narrative: TrafficNarrative::from_metrics(&traffic),
                metrics: traffic,
            },
            findings: Findings {
                key_performance_metrics: vec![Kpi {
                    metric: "Conversion Rate".into(),
                    value: "2.1%".into(),
                }],
                core_issues: vec!["Checkout exits".into()],
                user_behavior_insights: vec!["Users compare products twice".into()],
                device_location_data: vec![CategoryData {
                    category: "Mobile".into(),
                    data: "64% of sessions".into(),
                }],
                prioritized_action_plan: vec![
                    ActionItem {
                        problem: "Shipping costs surprise buyers".into(),
                        supporting_data: vec!["40% exit at /checkout".into()],
                        corrective_measures: vec!["Show shipping on product pages".into()],
                        priority: Priority::High,
                    },
                    ActionItem {
                        problem: "Search returns nothing".into(),
                        supporting_data: vec![],
                        corrective_measures: vec!["Add synonyms".into()],
                        priority: Priority::Low,
                    },
                ],
            },
            model: "test-model".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_replace_spaces() {
        assert_eq!(report_file_name("online store"), "online_store_analysis_report.md");
        assert_eq!(error_file_name("SaaS"), "SaaS_error_report.md");
        assert_eq!(report_file_name("a/b"), "ab_analysis_report.md");
        assert_eq!(report_file_name("  "), "website_analysis_report.md");
    }

    #[test]
    fn report_round_trips_through_json() {
        let report = fixtures::report();
        let json = report.to_json().unwrap();
        let back: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(back.to_json().unwrap(), json);
        assert_eq!(back.id(), report.id());
        assert_eq!(back.model(), "test-model");
    }
}
