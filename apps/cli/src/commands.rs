//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use docmodern_core::{CancellationSignal, PipelineOrchestrator, ProgressReporter};
use docmodern_fetcher::HttpFetcher;
use docmodern_llm::OpenRouterClient;
use docmodern_shared::{
    AppConfig, PipelineConfig, PipelineState, PipelineStatus, StageError, StageName,
    init_config, load_config, validate_api_key,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docmodern: turn outdated documentation into a modernized markdown page.
#[derive(Parser)]
#[command(
    name = "docmodern",
    version,
    about = "Modernize a technical documentation page and score the result.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the modernization pipeline for one documentation URL.
    Run {
        /// Documentation URL to modernize.
        url: String,

        /// Directory the output bundle is written under.
        #[arg(short, long, default_value = "docmodern-out")]
        out: PathBuf,

        /// Print results only; write no files.
        #[arg(long)]
        no_write: bool,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Per-run overrides of config file values.
#[derive(clap::Args, Debug, Default)]
pub(crate) struct Overrides {
    /// Completion model identifier.
    #[arg(long, env = "DOCMODERN_MODEL")]
    pub model: Option<String>,

    /// Retries after a transient network or service failure.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Timeout in seconds for each completion call.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docmodern=warn",
        1 => "docmodern=info",
        2 => "docmodern=debug",
        _ => "docmodern=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            url,
            out,
            no_write,
            overrides,
        } => cmd_run(&url, &out, no_write, &overrides).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

/// Apply command-line overrides on top of the loaded config.
fn apply_overrides(config: &mut AppConfig, overrides: &Overrides) {
    if let Some(model) = &overrides.model {
        config.llm.model = model.clone();
    }
    if let Some(max_retries) = overrides.max_retries {
        config.pipeline.max_retries = max_retries;
    }
    if let Some(timeout) = overrides.timeout {
        config.pipeline.stage_timeout_secs = timeout;
    }
}

async fn cmd_run(url: &str, out: &Path, no_write: bool, overrides: &Overrides) -> Result<()> {
    let mut config = load_config()?;
    apply_overrides(&mut config, overrides);

    // Validate API key before doing anything
    validate_api_key(&config)?;

    let client = OpenRouterClient::from_config(&config)?;
    let fetcher = HttpFetcher::new()?;
    let orchestrator = PipelineOrchestrator::new(
        PipelineConfig::from(&config),
        Arc::new(fetcher),
        Arc::new(client),
    );

    let cancel = CancellationSignal::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current stage");
                cancel.cancel();
            }
        }
    });

    info!(url, model = %config.llm.model, "starting run");

    let reporter = CliProgress::new();
    let state = orchestrator.run_with(url, &cancel, &reporter).await;

    print_summary(&state);

    if !no_write {
        let bundle = docmodern_artifacts::write_bundle(out, &state)?;
        println!("  Output: {}", bundle.dir.display());
        if let Some(path) = bundle.modernized_path() {
            println!("  Modernized document: {}", path.display());
        }
        println!();
    }

    match state.stage_errors().last() {
        Some(error) if state.status() == PipelineStatus::Failed => Err(eyre!(
            "run failed at {}: {} {}",
            error.stage,
            error.kind,
            error.message
        )),
        _ => Ok(()),
    }
}

fn print_summary(state: &PipelineState) {
    let usage = state.usage();

    println!();
    println!("  Run:      {}", state.run_id());
    println!("  Source:   {}", state.source_url());
    println!("  Status:   {}", state.status());

    if let Some(findings) = state.findings() {
        println!("  Findings: {}", findings.len());
        for f in findings {
            println!("    {} [{}] {}: {}", f.id, f.severity, f.category, f.description);
        }
    }
    if let Some(recs) = state.recommendations() {
        println!("  Recommendations: {}", recs.len());
    }
    if let Some(report) = state.quality_report() {
        println!(
            "  Quality:  {} (average {:.2})",
            report.verdict, report.average_score
        );
        for (dimension, score) in &report.scores {
            println!("    {dimension:<14} {score:.2}");
        }
    }
    for e in state.stage_errors() {
        println!("  Error:    {} {} ({} attempts): {}", e.stage, e.kind, e.attempts, e.message);
    }
    println!(
        "  Usage:    {} completion calls, {} retries, {} tokens in, {} tokens out",
        usage.completion_calls, usage.retries, usage.tokens_in, usage.tokens_out
    );
    println!();
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

fn stage_message(stage: StageName) -> &'static str {
    match stage {
        StageName::Fetch => "Fetching document",
        StageName::Analyze => "Analyzing for outdated content",
        StageName::Research => "Researching current practices",
        StageName::Generate => "Generating modernized document",
        StageName::QualityCheck => "Checking quality",
    }
}

impl ProgressReporter for CliProgress {
    fn stage_started(&self, stage: StageName) {
        self.spinner.set_message(stage_message(stage));
    }

    fn stage_finished(&self, stage: StageName, elapsed: Duration) {
        self.spinner
            .println(format!("  ✓ {stage} ({:.1}s)", elapsed.as_secs_f64()));
    }

    fn stage_failed(&self, stage: StageName, error: &StageError) {
        self.spinner
            .println(format!("  ✗ {stage}: {} {}", error.kind, error.message));
    }

    fn done(&self, _state: &PipelineState) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "docmodern",
            "run",
            "https://docs.example.com/guide",
            "--no-write",
            "--model",
            "openai/gpt-4o",
            "--max-retries",
            "1",
            "--timeout",
            "30",
        ])
        .unwrap();

        let Command::Run {
            url,
            no_write,
            overrides,
            out,
        } = cli.command
        else {
            panic!("expected run command");
        };
        assert_eq!(url, "https://docs.example.com/guide");
        assert!(no_write);
        assert_eq!(out, PathBuf::from("docmodern-out"));
        assert_eq!(overrides.max_retries, Some(1));
        assert_eq!(overrides.timeout, Some(30));
    }

    #[test]
    fn overrides_replace_config_values() {
        let mut config = AppConfig::default();
        let overrides = Overrides {
            model: Some("openai/gpt-4o".into()),
            max_retries: Some(0),
            timeout: Some(15),
        };

        apply_overrides(&mut config, &overrides);

        assert_eq!(config.llm.model, "openai/gpt-4o");
        assert_eq!(config.pipeline.max_retries, 0);
        assert_eq!(config.pipeline.stage_timeout_secs, 15);
        assert_eq!(config.pipeline.fetch_timeout_secs, 30);
    }

    #[test]
    fn empty_overrides_keep_config() {
        let mut config = AppConfig::default();
        apply_overrides(&mut config, &Overrides::default());
        assert_eq!(config.pipeline.max_retries, 3);
    }
}
