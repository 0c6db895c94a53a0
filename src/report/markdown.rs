//! Markdown rendering.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use super::Report;
use crate::agents::WebsiteProfile;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn render(report: &Report) -> String {
    let mut md = String::from("# Agentic Analysis Report\n\n");
    let website = report.website();
    let findings = report.findings();

    md.push_str("## Overview\n");
    let _ = writeln!(md, "- **Analysis Date**: {}", report.generated_at().format(DATE_FORMAT));
    let _ = writeln!(md, "- **Website Type**: {}", website.website_type);
    if !website.specific_issues.is_empty() {
        let _ = writeln!(md, "- **Issues Analyzed**: {}", website.specific_issues.join(", "));
    }
    if let Some(window) = report.window() {
        let _ = writeln!(md, "- **Analysis Window**: {window}");
    }
    let _ = writeln!(md, "- **Sessions Analyzed**: {}", report.stats().sessions);
    md.push('\n');

    md.push_str("## Prioritized Action Plan\n");
    for (i, action) in findings.prioritized_action_plan.iter().enumerate() {
        let _ = writeln!(
            md,
            "### {}. {} [PRIORITY: {}]\n",
            i + 1,
            action.problem,
            action.priority
        );
        md.push_str("#### Supporting Data:\n");
        bullets(&mut md, &action.supporting_data);
        md.push_str("#### Corrective Measures:\n");
        bullets(&mut md, &action.corrective_measures);
    }
    md.push('\n');

    md.push_str("## Core Issues\n");
    bullets(&mut md, &findings.core_issues);

    md.push_str("## User Behavior Insights\n");
    bullets(&mut md, &findings.user_behavior_insights);

    md.push_str("## Device & Location Data\n");
    for d in &findings.device_location_data {
        let _ = writeln!(md, "- **{}**: {}", d.category, d.data);
    }
    md.push('\n');

    md.push_str("## Key Performance Metrics\n");
    for k in &findings.key_performance_metrics {
        let _ = writeln!(md, "- **{}**: {}", k.metric, k.value);
    }
    md.push('\n');

    md
}

fn bullets(md: &mut String, items: &[String]) {
    for item in items {
        let _ = writeln!(md, "- {item}");
    }
    md.push('\n');
}

/// Emergency report written when an analysis fails.
pub fn render_error(website: &WebsiteProfile, error: &str, at: DateTime<Utc>) -> String {
    format!(
        "# Website Analysis Report - Error\n\n\
         ## Error Information\n\
         An error occurred during the analysis: {error}\n\n\
         ## Overview\n\
         - **Website Type**: {website_type}\n\
         - **Analysis Date**: {date}\n\n\
         ## Recommendations\n\
         - Check the input data format\n\
         - Ensure all required environment variables are set\n\
         - Check API connectivity\n\
         - Review the logs for more details\n",
        website_type = website.website_type,
        date = at.format(DATE_FORMAT),
    )
}
