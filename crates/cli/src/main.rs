use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, ValueEnum};
use sentinel_core::{DiffSource, Orchestrator, PreviousReviewData, ProgressEmitter, RiskLevel};

/// Runs a multi-agent LLM review over a diff and prints the result.
#[derive(Parser)]
#[command(name = "review", about = "Multi-agent LLM code review", version)]
#[command(group(ArgGroup::new("diff_source").args(["source_ref", "diff_text", "diff_file", "commits"]).multiple(false)))]
struct Cli {
    /// Base ref to diff from (paired with --target)
    #[arg(long, requires = "target_ref")]
    source_ref: Option<String>,

    /// Ref to diff to (paired with --source-ref)
    #[arg(long)]
    target_ref: Option<String>,

    /// Read unified-diff text directly from this argument instead of git
    #[arg(long)]
    diff_text: Option<String>,

    /// Read unified-diff text from a file
    #[arg(long)]
    diff_file: Option<PathBuf>,

    /// Review the combined patch of these commit hashes
    #[arg(long, num_args = 1..)]
    commits: Vec<String>,

    /// JSON file of previously reported issues, for fix verification
    #[arg(long)]
    previous: Option<PathBuf>,

    /// Provider to use (overrides config default)
    #[arg(short, long)]
    provider: Option<String>,

    /// Root of the project under review
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Markdown)]
    format: OutputFormat,

    /// Strip evidence from JSON output
    #[arg(long)]
    strip_evidence: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Markdown,
    Summary,
    PrComments,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let global_config = sentinel_config::ReviewConfig::load()?;
    let project_root = cli
        .project_root
        .canonicalize()
        .unwrap_or_else(|_| cli.project_root.clone());

    let config = match sentinel_config::ReviewConfig::load_project(&project_root)? {
        Some(project_config) => sentinel_config::ReviewConfig::merge(&global_config, &project_config),
        None => global_config,
    };

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("sentinel={}", config.logging.level).parse()?);
    if config.logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).with_target(false).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }

    match run(cli, config, project_root).await {
        Ok(risk) => {
            std::process::exit(if risk == RiskLevel::High { 1 } else { 0 });
        }
        Err(err) => {
            eprintln!("review failed: {err:#}");
            std::process::exit(2);
        }
    }
}

async fn run(cli: Cli, config: sentinel_config::ReviewConfig, project_root: PathBuf) -> Result<RiskLevel> {
    let diff_source = diff_source_from_args(&cli)?;
    let previous = cli
        .previous
        .as_ref()
        .map(|path| -> Result<PreviousReviewData> {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading previous review data from {}", path.display()))?;
            serde_json::from_str(&content).context("parsing previous review data as JSON")
        })
        .transpose()?;

    let provider_name = cli.provider.clone().unwrap_or_else(|| config.provider.default.clone());
    let provider = sentinel_provider::create_provider(&provider_name, &config.provider)
        .with_context(|| format!("initializing provider '{provider_name}'"))?;
    let provider: Arc<dyn sentinel_provider::Provider> = Arc::from(provider);

    let orchestrator = Orchestrator::new(config, provider, project_root);
    let progress = ProgressEmitter::new(None);

    let report = orchestrator
        .run(diff_source, previous, &progress)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    match cli.format {
        OutputFormat::Json => {
            let value = sentinel_core::render::to_json(&report, cli.strip_evidence);
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Markdown => {
            println!("{}", sentinel_core::render::to_markdown(&report));
        }
        OutputFormat::Summary => {
            println!("{}", sentinel_core::render::to_summary(&report));
        }
        OutputFormat::PrComments => {
            let comments = sentinel_core::render::to_pr_comments(&report);
            println!("{}", serde_json::to_string_pretty(&comments)?);
        }
    }

    Ok(report.risk_level)
}

fn diff_source_from_args(cli: &Cli) -> Result<DiffSource> {
    if let Some(source_ref) = &cli.source_ref {
        let target_ref = cli
            .target_ref
            .clone()
            .context("--source-ref requires --target-ref")?;
        return Ok(DiffSource::Refs {
            source_ref: source_ref.clone(),
            target_ref,
        });
    }
    if let Some(text) = &cli.diff_text {
        return Ok(DiffSource::Text(text.clone()));
    }
    if let Some(path) = &cli.diff_file {
        return Ok(DiffSource::File(path.clone()));
    }
    if !cli.commits.is_empty() {
        return Ok(DiffSource::Commits(cli.commits.clone()));
    }
    anyhow::bail!("one of --source-ref/--target-ref, --diff-text, --diff-file, or --commits is required")
}
