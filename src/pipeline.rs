//! End-to-end analysis: preprocess, run the agents, assemble the report.

use std::path::Path;
use std::sync::Arc;

use tracing::{Instrument, info, info_span};

use crate::agents::{
    AnalysisContext, ColumnRecommender, DeviceAnalyzer, JourneyMapper, Orchestrator,
    TrafficAnalyzer, WebsiteProfile,
};
use crate::config::AnalyzerConfig;
use crate::data::{self, Dataset, Preprocessor, RawRecord};
use crate::error::PipelineError;
use crate::evaluation::{EvaluationScore, JudgeEvaluator};
use crate::llm::LlmProvider;
use crate::report::{Report, ReportParts};

pub struct Pipeline {
    llm: Arc<dyn LlmProvider>,
    config: AnalyzerConfig,
}

impl Pipeline {
    pub fn new(llm: Arc<dyn LlmProvider>, config: AnalyzerConfig) -> Self {
        Self { llm, config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Load `path` and analyze it.
    pub async fn run_file(
        &self,
        path: &Path,
        website: WebsiteProfile,
    ) -> Result<Report, PipelineError> {
        let records = data::load_file(path)
            .instrument(info_span!("pipeline", stage = "ingest"))
            .await?;
        self.run(records, website).await
    }

    pub async fn run(
        &self,
        records: Vec<RawRecord>,
        website: WebsiteProfile,
    ) -> Result<Report, PipelineError> {
        self.config.validate()?;
        info!(
            records = records.len(),
            website_type = %website.website_type,
            "Starting analysis"
        );

        let dataset = self.preprocess(records).await?;
        let ctx = AnalysisContext::new(Arc::new(dataset), website, self.config.clone())?;

        let recommender = ColumnRecommender::new(Arc::clone(&self.llm));
        let mapper = JourneyMapper::new(Arc::clone(&self.llm));
        let device_analyzer = DeviceAnalyzer::new(Arc::clone(&self.llm));
        let traffic_analyzer = TrafficAnalyzer::new(Arc::clone(&self.llm));

        let (columns, journey, device, traffic) = tokio::try_join!(
            recommender
                .recommend(&ctx)
                .instrument(info_span!("pipeline", stage = "column_recommendation")),
            mapper
                .analyze(&ctx)
                .instrument(info_span!("pipeline", stage = "journey")),
            device_analyzer
                .analyze(&ctx)
                .instrument(info_span!("pipeline", stage = "device")),
            traffic_analyzer
                .analyze(&ctx)
                .instrument(info_span!("pipeline", stage = "traffic")),
        )?;
        info!("Agent analyses complete");

        let findings = Orchestrator::new(Arc::clone(&self.llm))
            .synthesize(&ctx, &columns, &journey, &device, &traffic)
            .instrument(info_span!("pipeline", stage = "orchestration"))
            .await?;

        let report = Report::from_parts(ReportParts {
            website: ctx.website.clone(),
            window: ctx.dataset.window,
            stats: ctx.dataset.stats.clone(),
            columns,
            journey,
            device,
            traffic,
            findings,
            model: self.llm.model_name().to_string(),
        });
        info!(
            report_id = %report.id(),
            actions = report.findings().prioritized_action_plan.len(),
            "Report assembled"
        );
        Ok(report)
    }

    /// Score a report against a human-written reference.
    pub async fn evaluate(
        &self,
        report: &Report,
        reference: &str,
    ) -> Result<EvaluationScore, PipelineError> {
        let score = JudgeEvaluator::new(Arc::clone(&self.llm))
            .evaluate(&report.to_markdown(), reference, Some(report.id()))
            .instrument(info_span!("pipeline", stage = "evaluation"))
            .await?;
        Ok(score)
    }

    async fn preprocess(&self, records: Vec<RawRecord>) -> Result<Dataset, PipelineError> {
        let preprocessor = Preprocessor::from_config(&self.config);
        let span = info_span!("pipeline", stage = "preprocess");
        let dataset = tokio::task::spawn_blocking(move || span.in_scope(|| preprocessor.run(records)))
            .await
            .map_err(|e| PipelineError::Join(e.to_string()))??;
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::ScriptedLlm;
    use crate::error::{AgentError, DataError};
    use serde_json::json;

    fn records() -> Vec<RawRecord> {
        json!([
            {"session_id": "a", "page": "/home", "timestamp": "2024-03-01T10:00:00Z"},
            {"session_id": "a", "page": "/cart", "timestamp": "2024-03-01T10:01:00Z"},
            {"session_id": "b", "page": "/home", "timestamp": "2024-03-02T09:00:00Z"}
        ])
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect()
    }

    #[tokio::test]
    async fn run_builds_report_from_fallbacks() {
        // Unparsable replies leave every agent on its computed fallback.
        let llm = Arc::new(ScriptedLlm::replying("no json here"));
        let pipeline = Pipeline::new(llm.clone(), AnalyzerConfig::default());
        let report = pipeline
            .run(records(), WebsiteProfile::new("online store", vec![]))
            .await
            .unwrap();

        assert_eq!(report.stats().sessions, 2);
        assert_eq!(report.model(), "scripted");
        assert_eq!(report.journey().metrics.total_sessions, 2);
        assert!(!report.findings().is_empty());
        assert!(report.window().is_some());
        // Recommender, three analyzers and the orchestrator.
        assert_eq!(llm.requests.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn run_names_the_failing_agent() {
        let pipeline = Pipeline::new(Arc::new(ScriptedLlm::failing()), AnalyzerConfig::default());
        let err = pipeline
            .run(records(), WebsiteProfile::new("blog", vec![]))
            .await
            .unwrap_err();
        match err {
            PipelineError::Agent(AgentError::Llm { agent, .. }) => assert!(!agent.is_empty()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn run_rejects_unusable_input() {
        let pipeline = Pipeline::new(Arc::new(ScriptedLlm::replying("{}")), AnalyzerConfig::default());
        let junk = vec![json!({"colour": "blue"}).as_object().cloned().unwrap()];
        let err = pipeline
            .run(junk, WebsiteProfile::new("blog", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Data(DataError::NoUsableEvents { .. })));
    }

    #[tokio::test]
    async fn run_validates_config() {
        let config = AnalyzerConfig {
            window_days: 30,
            ..Default::default()
        };
        let pipeline = Pipeline::new(Arc::new(ScriptedLlm::replying("{}")), config);
        let err = pipeline
            .run(records(), WebsiteProfile::new("blog", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
