//! Fix the Exit: multi-agent analysis of website interaction logs.

pub mod agents;
pub mod config;
pub mod data;
pub mod error;
pub mod evaluation;
pub mod llm;
pub mod pipeline;
pub mod report;

pub use agents::WebsiteProfile;
pub use config::AnalyzerConfig;
pub use error::{Error, Result};
pub use evaluation::{Dimension, EvaluationScore, JudgeEvaluator};
pub use pipeline::Pipeline;
pub use report::Report;
