//! Report evaluation with an LLM judge.

pub mod judge;

pub use judge::JudgeEvaluator;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Quality dimensions a report is scored on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Accuracy,
    Completeness,
    Actionability,
    Clarity,
    Relevance,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Self::Accuracy,
        Self::Completeness,
        Self::Actionability,
        Self::Clarity,
        Self::Relevance,
    ];

    /// What the judge is asked to check for this dimension.
    pub fn description(self) -> &'static str {
        match self {
            Self::Accuracy => "Findings and numbers agree with the reference analysis",
            Self::Completeness => "Covers the problems and insights the reference identifies",
            Self::Actionability => "Corrective measures are concrete and implementable",
            Self::Clarity => "Well structured and easy to follow",
            Self::Relevance => "Focused on the website type and the reported issues",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(name))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accuracy => "Accuracy",
            Self::Completeness => "Completeness",
            Self::Actionability => "Actionability",
            Self::Clarity => "Clarity",
            Self::Relevance => "Relevance",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension: Dimension,
    /// 1 to 10.
    pub score: u8,
    pub rationale: String,
}

impl DimensionScore {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    /// Rounds and clamps a raw judge score onto the 1..=10 scale.
    pub fn new(dimension: Dimension, raw: f64, rationale: impl Into<String>) -> Self {
        let score = if raw.is_nan() {
            Self::MIN
        } else {
            raw.round().clamp(Self::MIN as f64, Self::MAX as f64) as u8
        };
        Self {
            dimension,
            score,
            rationale: rationale.into(),
        }
    }
}

/// Judge verdict for one report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationScore {
    pub report_id: Option<Uuid>,
    /// One entry per [`Dimension`], in [`Dimension::ALL`] order.
    pub dimensions: Vec<DimensionScore>,
    /// Mean of the dimension scores.
    pub overall: f64,
    pub judged_at: DateTime<Utc>,
    pub model: String,
}

impl EvaluationScore {
    pub fn new(report_id: Option<Uuid>, dimensions: Vec<DimensionScore>, model: impl Into<String>) -> Self {
        let overall = if dimensions.is_empty() {
            0.0
        } else {
            let sum: u32 = dimensions.iter().map(|d| u32::from(d.score)).sum();
            (sum as f64 / dimensions.len() as f64 * 100.0).round() / 100.0
        };
        Self {
            report_id,
            dimensions,
            overall,
            judged_at: Utc::now(),
            model: model.into(),
        }
    }

    pub fn score(&self, dimension: Dimension) -> Option<u8> {
        self.dimensions
            .iter()
            .find(|d| d.dimension == dimension)
            .map(|d| d.score)
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::from("# Report Evaluation\n\n");
        if let Some(id) = self.report_id {
            md.push_str(&format!("- **Report**: {id}\n"));
        }
        md.push_str(&format!(
            "- **Judged**: {}\n- **Model**: {}\n- **Overall**: {:.2}/10\n\n",
            self.judged_at.format("%Y-%m-%d %H:%M:%S"),
            self.model,
            self.overall
        ));
        md.push_str("| Dimension | Score | Rationale |\n|---|---|---|\n");
        for d in &self.dimensions {
            md.push_str(&format!(
                "| {} | {} | {} |\n",
                d.dimension,
                d.score,
                d.rationale.replace('|', "/").replace('\n', " ")
            ));
        }
        md
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dimension_names_case_insensitively() {
        assert_eq!(Dimension::parse(" actionability "), Some(Dimension::Actionability));
        assert_eq!(Dimension::parse("CLARITY"), Some(Dimension::Clarity));
        assert_eq!(Dimension::parse("style"), None);
    }

    #[test]
    fn scores_are_clamped_to_scale() {
        assert_eq!(DimensionScore::new(Dimension::Accuracy, 14.0, "").score, 10);
        assert_eq!(DimensionScore::new(Dimension::Accuracy, 0.0, "").score, 1);
        assert_eq!(DimensionScore::new(Dimension::Accuracy, 7.6, "").score, 8);
        assert_eq!(DimensionScore::new(Dimension::Accuracy, f64::NAN, "").score, 1);
    }

    #[test]
    fn overall_is_the_mean() {
        let dims = vec![
            DimensionScore::new(Dimension::Accuracy, 8.0, "a"),
            DimensionScore::new(Dimension::Clarity, 7.0, "b"),
            DimensionScore::new(Dimension::Relevance, 6.0, "c"),
        ];
        let score = EvaluationScore::new(None, dims, "judge");
        assert_eq!(score.overall, 7.0);
        assert_eq!(score.score(Dimension::Clarity), Some(7));
        assert_eq!(score.score(Dimension::Completeness), None);
        assert!(score.to_markdown().contains("| Accuracy | 8 | a |"));
    }
}
