//! Run command implementation

use crate::batch::config::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_ATTEMPTS, DEFAULT_RATE_LIMIT_PER_SECOND, MAX_BATCH_SIZE,
    MAX_CONCURRENCY,
};
use crate::batch::{BatchExecutor, BatchReport, EngineConfig};
use crate::fetcher::http::{HttpRecordFetcher, DEFAULT_BASE_URL};
use crate::identifier::{normalize_ids, Identifier};
use crate::shutdown::SharedShutdown;
use crate::store::csv::CsvRecordStore;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::CliError;

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

/// Batch fetch CLI
#[derive(Parser, Debug)]
#[command(name = "batch-fetch")]
#[command(about = "Fetch and persist records for a batch of account handles", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Number of concurrent workers (default: 5, max: 20)
    ///
    /// Every worker draws from the same rate limiter, so raising this beyond
    /// the rate limit only adds queueing.
    #[arg(long, global = true, default_value_t = DEFAULT_CONCURRENCY, value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Batch deadline in seconds (0 means the 300 second default)
    #[arg(long, global = true, default_value = "300")]
    pub timeout_seconds: u64,

    /// Fetch attempts per identifier, first attempt included (default: 5, range: 1-20)
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_attempts: u32,

    /// Upstream requests allowed per second across all workers
    #[arg(long, global = true, default_value_t = DEFAULT_RATE_LIMIT_PER_SECOND, value_parser = clap::value_parser!(u32).range(1..))]
    pub rate_limit: u32,

    /// Serve Prometheus metrics on this address (e.g., 127.0.0.1:9090)
    #[arg(long, global = true, env = "FETCH_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

impl Cli {
    /// Engine tunables selected by the global flags
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            rate_limit_per_second: self.rate_limit,
            max_attempts: self.max_attempts,
            ..EngineConfig::default()
        }
    }

    /// Batch deadline selected by `--timeout-seconds`
    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch and persist a record for every identifier
    Run(RunArgs),

    /// Print the normalized, deduplicated identifier list without fetching
    Validate(super::ValidateCommand),
}

/// Where identifiers come from
#[derive(Args, Debug, Default)]
pub struct IdArgs {
    /// Account handles
    pub ids: Vec<String>,

    /// File with one handle per line (blank lines and `#` comments ignored)
    #[arg(long)]
    pub ids_file: Option<PathBuf>,
}

impl IdArgs {
    /// Raw identifiers from the arguments followed by the file
    pub fn collect(&self) -> Result<Vec<String>, CliError> {
        let mut raw = self.ids.clone();

        if let Some(path) = &self.ids_file {
            raw.extend(read_ids_file(path)?);
        }

        if raw.is_empty() {
            return Err(CliError::InvalidArgument(
                "no identifiers given: pass handles or --ids-file".to_string(),
            ));
        }

        Ok(raw)
    }

    /// Normalized identifiers, bounded by the batch size limit
    pub fn normalized(&self) -> Result<Vec<Identifier>, CliError> {
        let ids = normalize_ids(&self.collect()?)?;

        if ids.len() > MAX_BATCH_SIZE {
            return Err(CliError::InvalidArgument(format!(
                "{} identifiers exceeds maximum batch size of {}",
                ids.len(),
                MAX_BATCH_SIZE
            )));
        }

        Ok(ids)
    }
}

fn read_ids_file(path: &Path) -> Result<Vec<String>, CliError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CliError::InvalidArgument(format!("Failed to read {}: {}", path.display(), e))
    })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Run command arguments
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Identifiers to fetch
    #[command(flatten)]
    pub input: IdArgs,

    /// Upstream API base URL
    #[arg(long, env = "FETCH_API_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub api_base_url: String,

    /// Upstream API key
    #[arg(long, env = "FETCH_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// CSV file records are upserted into
    #[arg(long, default_value = "records.csv")]
    pub store: PathBuf,
}

impl RunArgs {
    /// Execute the run command
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let ids = self.input.normalized()?;

        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                CliError::ConfigurationError(
                    "missing API key: pass --api-key or set FETCH_API_KEY".to_string(),
                )
            })?;

        let fetcher = HttpRecordFetcher::new(&self.api_base_url, api_key)?;
        let store = CsvRecordStore::new(&self.store)?;
        let executor = BatchExecutor::new(Arc::new(fetcher), Arc::new(store))
            .with_config(cli.engine_config());

        info!(
            items = ids.len(),
            concurrency = cli.concurrency,
            store = %self.store.display(),
            "Starting batch"
        );

        let spinner = create_spinner(ids.len(), cli.output_format);
        let result = executor
            .run_batch_cancellable(&ids, cli.concurrency, cli.timeout(), shutdown.token())
            .await;
        spinner.finish_and_clear();

        let report = result?;
        if shutdown.is_shutdown_requested() {
            warn!("Batch cancelled before completion");
        }

        match cli.output_format {
            OutputFormat::Json => output_json(&report)?,
            OutputFormat::Human => output_human(&report, &self.store),
        }

        Ok(())
    }
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

fn create_spinner(items: usize, format: OutputFormat) -> ProgressBar {
    // Keep stdout clean for JSON consumers
    if format == OutputFormat::Json {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
    {
        pb.set_style(style);
    }
    pb.set_message(format!("Fetching {items} records..."));
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Output the report as a single JSON document
fn output_json(report: &BatchReport) -> Result<(), CliError> {
    let json = serde_json::to_string(report)
        .map_err(|e| CliError::OutputError(format!("Failed to encode report: {e}")))?;
    println!("{json}");
    Ok(())
}

/// Output the report in human-readable format
fn output_human(report: &BatchReport, store: &Path) {
    println!("\nBatch completed in {:.1}s", report.duration().as_secs_f64());
    println!("Store: {}", store.display());
    println!("Identifiers: {}", report.total);
    println!("Fetched: {}", report.successful);
    println!("Failed: {}", report.failed);
    if report.persist_failures > 0 {
        println!("Fetched but not persisted: {}", report.persist_failures);
    }

    if !report.errors.is_empty() {
        eprintln!("\nErrors:");
        for err in &report.errors {
            eprintln!("  - {err}");
        }
    }

    if report.failed > 0 {
        error!(
            failed = report.failed,
            total = report.total,
            "Some identifiers could not be fetched"
        );
    }
}
