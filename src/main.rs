use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use fix_the_exit::agents::WebsiteProfile;
use fix_the_exit::config::AnalyzerConfig;
use fix_the_exit::evaluation::JudgeEvaluator;
use fix_the_exit::llm::{FailoverProvider, LlmConfig, LlmProvider, create_provider, with_resilience};
use fix_the_exit::report::{self, Report, markdown};
use fix_the_exit::Pipeline;

#[derive(Parser)]
#[command(name = "fix-the-exit", version)]
#[command(about = "Explain where website visitors drop off and what to fix", long_about = None)]
struct Cli {
    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true, env = "FIX_THE_EXIT_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze an interaction log and write a report
    Analyze {
        /// JSON, JSON Lines or CSV file of interaction records
        #[arg(long)]
        input: PathBuf,
        /// e.g. "e-commerce", "SaaS", "blog"
        #[arg(long)]
        website_type: String,
        /// Known problem to focus on (repeatable)
        #[arg(long = "issue")]
        issues: Vec<String>,
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
        /// Also write the full report as JSON
        #[arg(long)]
        json: bool,
        /// Reference report to score the result against
        #[arg(long)]
        reference: Option<PathBuf>,
    },
    /// Score an existing report against a reference
    Evaluate {
        /// Markdown report, or a JSON report written with --json
        #[arg(long)]
        report: PathBuf,
        #[arg(long)]
        reference: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_deref());

    match cli.command {
        Commands::Analyze {
            input,
            website_type,
            issues,
            output_dir,
            json,
            reference,
        } => {
            let website = WebsiteProfile::new(website_type, issues);
            analyze(&input, website, &output_dir, json, reference.as_deref()).await
        }
        Commands::Evaluate { report, reference } => evaluate(&report, &reference).await,
    }
}

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "fix-the-exit.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

/// Provider stack: primary (plus optional fallback) behind rate limiting
/// and retries.
fn build_llm(config: &AnalyzerConfig) -> Result<Arc<dyn LlmProvider>> {
    let primary = create_provider(&LlmConfig::from_env()?)?;
    let provider = match LlmConfig::fallback_from_env()? {
        Some(fallback_config) => {
            info!(backend = %fallback_config.backend, "Fallback provider enabled");
            let fallback = create_provider(&fallback_config)?;
            let failover = FailoverProvider::new(vec![primary, fallback])
                .context("no providers configured")?;
            Arc::new(failover) as Arc<dyn LlmProvider>
        }
        None => primary,
    };
    Ok(with_resilience(
        provider,
        config.rate_limit.clone(),
        config.retry.clone(),
    ))
}

async fn analyze(
    input: &Path,
    website: WebsiteProfile,
    output_dir: &Path,
    json: bool,
    reference: Option<&Path>,
) -> Result<()> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("creating {}", output_dir.display()))?;

    let (pipeline, report) = match run_analysis(input, website.clone()).await {
        Ok(done) => done,
        Err(e) => {
            let path = output_dir.join(report::error_file_name(&website.website_type));
            let body = markdown::render_error(&website, &format!("{e:#}"), Utc::now());
            tokio::fs::write(&path, body)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            error!(error = %e, path = %path.display(), "Analysis failed, error report written");
            return Err(e);
        }
    };

    let path = output_dir.join(report::report_file_name(&website.website_type));
    tokio::fs::write(&path, report.to_markdown())
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "Report written");

    if json {
        let json_path = path.with_extension("json");
        tokio::fs::write(&json_path, report.to_json()?)
            .await
            .with_context(|| format!("writing {}", json_path.display()))?;
        info!(path = %json_path.display(), "JSON report written");
    }

    if let Some(reference) = reference {
        let reference = read_text(reference).await?;
        let score = pipeline.evaluate(&report, &reference).await?;
        let score_path = output_dir.join(report::file_name(&website.website_type, "evaluation"));
        tokio::fs::write(&score_path, score.to_markdown())
            .await
            .with_context(|| format!("writing {}", score_path.display()))?;
        info!(overall = score.overall, path = %score_path.display(), "Evaluation written");
    }

    println!("{}", path.display());
    Ok(())
}

async fn run_analysis(input: &Path, website: WebsiteProfile) -> Result<(Pipeline, Report)> {
    let config = AnalyzerConfig::from_env()?;
    let llm = build_llm(&config)?;
    let pipeline = Pipeline::new(llm, config);
    let report = pipeline.run_file(input, website).await?;
    Ok((pipeline, report))
}

async fn evaluate(report_path: &Path, reference_path: &Path) -> Result<()> {
    let config = AnalyzerConfig::from_env()?;
    let llm = build_llm(&config)?;

    let raw = read_text(report_path).await?;
    let (generated, report_id) = if report_path.extension().is_some_and(|e| e == "json") {
        let report: Report = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", report_path.display()))?;
        (report.to_markdown(), Some(report.id()))
    } else {
        (raw, None)
    };
    let reference = read_text(reference_path).await?;

    let score = JudgeEvaluator::new(llm)
        .evaluate(&generated, &reference, report_id)
        .await?;
    println!("{}", score.to_markdown());
    Ok(())
}

async fn read_text(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}
