use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dr_core::{
    HandoffStore, ProgressHandler, Provider, ResearchAgent, ResearchOutcome, ResearchReport,
};
use dr_providers::OpenAIProvider;
use dr_tools::{research_registry, SearchConfig, SqliteHandoffStore, TavilySearch};

mod config;
mod progress;
mod transcript;

use config::{expand_path, Config};
use progress::{ProgressFanout, TerminalProgress};
use transcript::TranscriptLog;

pub const BEST_EFFORT_FOOTER: &str = "quality threshold not met, best effort";

/// Log level for tracing output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Most verbose: all tracing
    Trace,
    /// Verbose: every round and tool call
    Debug,
    /// Standard: session start and end
    Info,
    /// Quiet: timeouts, rejections and forced submissions
    Warn,
    /// Minimal: only errors
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Parser)]
#[command(name = "dr")]
#[command(author, version, about = "Deep-research: a local research assistant", long_about = None)]
pub struct Cli {
    /// Question to research
    pub question: Vec<String>,

    /// Config file (default: ~/.config/dr/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Model to use (overrides config)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Base URL for the chat API (overrides config)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Iteration ceiling (overrides the step-budget default)
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Minimum words in an accepted answer
    #[arg(long)]
    pub min_words: Option<usize>,

    /// Minimum distinct cited URLs in an accepted answer
    #[arg(long)]
    pub min_citations: Option<usize>,

    /// SQLite file for question/report handoff (overrides config)
    #[arg(long)]
    pub handoff_db: Option<PathBuf>,

    /// Write progress snapshots and the outcome to file (JSON-lines format)
    #[arg(long)]
    pub transcript: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_enum, default_value = "warn")]
    pub log_level: LogLevel,

    /// Enable debug logging (shorthand for --log-level debug)
    #[arg(short, long)]
    pub debug: bool,

    /// Write tracing logs to file (JSON-lines format)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Resolve log level: --debug overrides --log-level
    let log_level = if cli.debug {
        LogLevel::Debug
    } else {
        cli.log_level
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.as_filter()));

    if let Some(log_path) = &cli.log_file {
        let file = std::fs::File::create(log_path)
            .with_context(|| format!("Failed to create log file: {:?}", log_path))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::sync::Mutex::new(file)))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let mut config = Config::load(cli.config.as_deref())?;
    apply_cli_overrides(&mut config, &cli);
    config
        .research
        .validate()
        .context("Invalid research settings")?;

    match &cli.command {
        Some(Commands::Config) => show_config(&config),
        None => {
            let question = cli.question.join(" ");
            if question.trim().is_empty() {
                anyhow::bail!("No question given. Usage: dr [OPTIONS] <QUESTION...>");
            }
            research_mode(&cli, &config, question.trim()).await
        }
    }
}

/// CLI flags are the last configuration layer.
fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(model) = &cli.model {
        config.provider.model = model.clone();
    }
    if let Some(base_url) = &cli.base_url {
        config.provider.base_url = base_url.clone();
    }
    if let Some(max) = cli.max_iterations {
        config.research.max_iterations = Some(max);
    }
    if let Some(words) = cli.min_words {
        config.research.validator.min_words = words;
    }
    if let Some(citations) = cli.min_citations {
        config.research.validator.min_citations = citations;
    }
    if let Some(db) = &cli.handoff_db {
        config.handoff.db = Some(db.display().to_string());
    }
}

fn show_config(config: &Config) -> Result<()> {
    let path = Config::config_path()?;
    println!("# Config file: {}", path.display());
    if !path.exists() {
        println!("# (not found, using defaults)");
    }
    print!("{}", toml::to_string_pretty(&config.redacted())?);
    Ok(())
}

fn build_provider(config: &Config) -> Arc<dyn Provider> {
    let mut provider = OpenAIProvider::new()
        .with_base_url(&config.provider.base_url)
        .with_default_model(&config.provider.model);
    if let Some(key) = &config.provider.api_key {
        provider = provider.with_api_key(key);
    }
    Arc::new(provider)
}

fn build_handoff(config: &Config) -> Result<Option<Arc<dyn HandoffStore>>> {
    match config.handoff_path() {
        Some(path) => {
            let store = SqliteHandoffStore::new(&path)
                .with_context(|| format!("Failed to open handoff store: {}", path.display()))?;
            Ok(Some(Arc::new(store)))
        }
        None => Ok(None),
    }
}

async fn research_mode(cli: &Cli, config: &Config, question: &str) -> Result<()> {
    let search_key = config.search.api_key.as_deref().filter(|k| !k.is_empty()).ok_or_else(|| {
        anyhow::anyhow!(
            "No search API key configured. Set TAVILY_API_KEY or add to {}:\n\n\
             [search]\n\
             api_key = \"tvly-...\"\n",
            Config::config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "config.toml".to_string())
        )
    })?;

    let search = TavilySearch::new(search_key, config.research.search_timeout())
        .context("Failed to set up the search client")?
        .with_base_url(&config.search.base_url);
    let search_config = SearchConfig::from_research(&config.research)
        .with_topic(config.search.topic)
        .with_raw_content(config.search.include_raw_content);
    let tools = Arc::new(research_registry(Arc::new(search), search_config));

    let transcript = match &cli.transcript {
        Some(path) => Some(Arc::new(
            TranscriptLog::new(&expand_path(&path.display().to_string()))
                .with_context(|| format!("Failed to create transcript file: {:?}", path))?,
        )),
        None => None,
    };

    let mut handlers: Vec<Arc<dyn ProgressHandler>> = Vec::new();
    if !cli.quiet {
        handlers.push(Arc::new(TerminalProgress::new()));
    }
    if let Some(log) = &transcript {
        log.log_question(question);
        handlers.push(log.clone());
    }
    let fanout = ProgressFanout::new(handlers);

    let cancel = CancellationToken::new();
    let mut agent = ResearchAgent::new(build_provider(config), tools, config.research.clone())?
        .with_model(&config.provider.model)
        .with_temperature(config.provider.temperature)
        .with_extra(config.provider.parameters.clone())
        .with_cancellation(cancel.clone());
    if !fanout.is_empty() {
        agent = agent.with_progress(Arc::new(fanout));
    }
    if let Some(store) = build_handoff(config)? {
        agent = agent.with_handoff(store);
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, stopping after the current round...");
            cancel.cancel();
        }
    });

    tracing::info!(
        model = %config.provider.model,
        base_url = %config.provider.base_url,
        "Starting research"
    );

    let outcome = agent.run(question).await;
    if let Some(log) = &transcript {
        log.log_outcome(&outcome);
    }

    match outcome {
        ResearchOutcome::Done(report) => {
            println!("{}", render_report(&report));
            Ok(())
        }
        ResearchOutcome::Failed(failure) => Err(anyhow::Error::new(failure.error).context(format!(
            "Research failed after {} rounds ({} searches, {} reflections)",
            failure.state.iteration_count, failure.state.search_count, failure.state.reflection_count
        ))),
    }
}

fn render_report(report: &ResearchReport) -> String {
    let mut out = if report.answer.trim().is_empty() {
        "(no answer was produced)".to_string()
    } else {
        report.answer.trim_end().to_string()
    };

    if report.quality_warning {
        out.push_str(&format!(
            "\n\n---\nWarning: {} ({})",
            BEST_EFFORT_FOOTER, report.validation.reason
        ));
        if let Some(reason) = report.forced {
            out.push_str(&format!("\nSubmission forced: {}", reason));
        }
    }
    out
}
