//! ingest CLI: run a resumable statement ingestion and inspect its checkpoint.

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use secrecy::ExposeSecret;
use statement_ingest::config::{Config, RunConfig};
use statement_ingest::db::Db;
use statement_ingest::engine::{Ingestor, QueueMode};
use statement_ingest::progress::ProgressStore;
use statement_ingest::source::HttpStatementSource;
use statement_ingest::telemetry::{TelemetryConfig, init_telemetry};
use statement_ingest::universe::{Universe, UniverseCache, fetch_universe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ingest", about = "Resumable bulk ingestion of financial statements")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch and store statements for every code not yet completed
    Run(RunArgs),
    /// Show checkpoint counts
    Status {
        #[arg(long, default_value = "progress.json")]
        progress: PathBuf,
    },
    /// List failed codes with their last error
    Failed {
        #[arg(long, default_value = "progress.json")]
        progress: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Concurrent workers
    #[arg(long)]
    workers: Option<usize>,
    /// Pause after this many recorded outcomes (0 disables)
    #[arg(long)]
    batch_size: Option<usize>,
    /// Pause length in seconds
    #[arg(long)]
    batch_pause: Option<u64>,
    /// Only process the first N queued codes
    #[arg(long)]
    limit: Option<usize>,
    /// Per-call timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Retries after the first attempt
    #[arg(long)]
    max_retries: Option<u32>,
    /// Run settings file
    #[arg(long, default_value = "ingest.toml")]
    config: PathBuf,
    /// Progress checkpoint file
    #[arg(long, default_value = "progress.json")]
    progress: PathBuf,
    /// Read codes from this file instead of the upstream listing
    #[arg(long)]
    universe_file: Option<PathBuf>,
    /// Cache for the upstream listing
    #[arg(long, default_value = "universe_cache.json")]
    universe_cache: PathBuf,
    /// Process completed codes again
    #[arg(long, conflicts_with = "only_failed")]
    no_resume: bool,
    /// Only retry codes that failed in earlier runs
    #[arg(long)]
    only_failed: bool,
}

impl RunArgs {
    fn run_config(&self) -> anyhow::Result<RunConfig> {
        let mut config = RunConfig::load(&self.config)?;
        if let Some(n) = self.workers {
            config.worker_count = n;
        }
        if let Some(n) = self.batch_size {
            config.batch_size = n;
        }
        if let Some(s) = self.batch_pause {
            config.batch_pause_seconds = s;
        }
        if let Some(n) = self.limit {
            config.limit = Some(n);
        }
        if let Some(s) = self.timeout {
            config.per_call_timeout_seconds = s;
        }
        if let Some(n) = self.max_retries {
            config.max_retries = n;
        }
        config.validate()?;
        Ok(config)
    }

    fn mode(&self) -> QueueMode {
        if self.only_failed {
            QueueMode::OnlyFailed
        } else if self.no_resume {
            QueueMode::Fresh
        } else {
            QueueMode::Resume
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => cmd_run(args).await,
        Command::Status { progress } => cmd_status(&progress).await,
        Command::Failed { progress } => cmd_failed(&progress).await,
    }
}

async fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let run_config = args.run_config()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        default_filter: config.log_level.clone(),
        ..TelemetryConfig::default()
    })?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;

    let source = HttpStatementSource::new(&config.api_url, config.api_token.clone())?
        .with_request_delay(run_config.request_delay());

    let progress = ProgressStore::open(&args.progress)
        .await
        .context("progress checkpoint is unusable")?;

    let universe = match args.universe_file {
        Some(ref path) => Universe::from_file(path)?,
        None => {
            let cache = UniverseCache::new(&args.universe_cache);
            fetch_universe(&source, Some(&cache)).await?
        }
    };

    let ingestor = Ingestor::new(
        Arc::new(source),
        Arc::new(db),
        Arc::new(progress),
        run_config,
    );
    let signals = ingestor.shutdown_handle().listen_for_signals();

    let report = ingestor.run(&universe, args.mode()).await;
    signals.abort();
    let report = report.context("ingestion run aborted")?;

    println!("{}", report.summary);
    if report.drained {
        println!("run interrupted; rerun to resume from {}", args.progress.display());
    }
    if report.summary.failed > 0 {
        println!("failed codes: ingest failed --progress {}", args.progress.display());
    }
    Ok(())
}

async fn cmd_status(path: &Path) -> anyhow::Result<()> {
    let state = ProgressStore::load(path).await?;
    println!("progress file:  {}", path.display());
    println!("completed:      {}", state.completed.len());
    println!("failed:         {}", state.failed.len());
    println!("last planned:   {}", state.total_planned);
    println!("last updated:   {}", state.last_updated.to_rfc3339());
    Ok(())
}

async fn cmd_failed(path: &Path) -> anyhow::Result<()> {
    let state = ProgressStore::load(path).await?;
    if state.failed.is_empty() {
        println!("No failed codes.");
        return Ok(());
    }

    println!("{:<10}  ERROR", "CODE");
    println!("{}", "-".repeat(60));
    for (code, detail) in &state.failed {
        println!("{code:<10}  {detail}");
    }
    println!("\n{} failed code(s)", state.failed.len());
    Ok(())
}
