//! Jobfeed Ingest - job feed ingestion tool

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use jobfeed_common::logging::{init_logging, LogConfig, LogLevel};
use jobfeed_ingest::{
    FeedScheduler, FeedSource, FileFeedSource, HttpFeedSource, IngestConfig, IngestOrchestrator,
    MemorySink, UpsertSink, ValidatingSink,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "jobfeed-ingest")]
#[command(author, version, about = "Job feed ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Ingest the feed once
    Run {
        /// Feed URL (overrides JOBFEED_FEED_URL)
        #[arg(long, conflicts_with = "file")]
        url: Option<String>,

        /// Replay a saved feed document instead of fetching
        #[arg(long)]
        file: Option<PathBuf>,

        /// Parse and count without touching the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Ingest periodically until interrupted
    Schedule {
        /// Feed URL (overrides JOBFEED_FEED_URL)
        #[arg(long)]
        url: Option<String>,
    },

    /// Delete documents older than the retention window
    Purge,

    /// Show one page of stored jobs, newest first
    List {
        #[arg(long, default_value_t = jobfeed_common::types::DEFAULT_PAGE)]
        page: u32,

        #[arg(long, default_value_t = jobfeed_common::types::DEFAULT_PAGE_LIMIT)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("jobfeed-ingest")
        .build();

    // Environment variables take precedence
    let log_config = LogConfig::from_env_with(log_config).context("Invalid LOG_* settings")?;
    let _log_guard = init_logging(&log_config)?;

    let config = IngestConfig::load().context("Failed to load configuration")?;

    match cli.command {
        Command::Run { url, file, dry_run } => {
            let source = build_source(&config, url, file)?;
            let sink = if dry_run {
                info!("Dry run: records are kept in memory only");
                finish_sink(MemorySink::new(), &config)
            } else {
                database_sink(&config).await?
            };

            let orchestrator = Arc::new(IngestOrchestrator::new(config.pipeline_settings(), sink));
            let scheduler = FeedScheduler::new(orchestrator, source, config.schedule_settings());

            let cancel = CancellationToken::new();
            spawn_shutdown_listener(cancel.clone());

            let summary = scheduler.trigger_once(&cancel).await?;
            info!(
                summary = %serde_json::to_string(&summary)?,
                success_rate = summary.success_rate(),
                "Ingestion complete"
            );
        },
        Command::Schedule { url } => {
            let source = build_source(&config, url, None)?;
            let sink = database_sink(&config).await?;

            let orchestrator = Arc::new(IngestOrchestrator::new(config.pipeline_settings(), sink));
            let scheduler = FeedScheduler::new(orchestrator, source, config.schedule_settings());

            let cancel = CancellationToken::new();
            spawn_shutdown_listener(cancel.clone());

            scheduler.run(cancel).await;
        },
        Command::Purge => purge(&config).await?,
        Command::List { page, limit } => list(&config, page, limit).await?,
    }

    Ok(())
}

fn build_source(
    config: &IngestConfig,
    url: Option<String>,
    file: Option<PathBuf>,
) -> Result<Arc<dyn FeedSource>> {
    if let Some(path) = file {
        return Ok(Arc::new(FileFeedSource::new(path)));
    }

    let url = url
        .or_else(|| config.feed_url.clone())
        .context("No feed URL given; pass --url or set JOBFEED_FEED_URL")?;
    Ok(Arc::new(HttpFeedSource::new(url, config.request_timeout())?))
}

/// Apply required-field validation when any fields are configured.
fn finish_sink<S: UpsertSink + 'static>(sink: S, config: &IngestConfig) -> Arc<dyn UpsertSink> {
    if config.required_fields.is_empty() {
        Arc::new(sink)
    } else {
        Arc::new(ValidatingSink::new(sink, config.required_fields.clone()))
    }
}

#[cfg(feature = "database")]
async fn connect(config: &IngestConfig) -> Result<jobfeed_ingest::PgSink> {
    let sink = jobfeed_ingest::PgSink::connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    sink.migrate().await.context("Failed to run migrations")?;
    Ok(sink)
}

#[cfg(feature = "database")]
async fn database_sink(config: &IngestConfig) -> Result<Arc<dyn UpsertSink>> {
    Ok(finish_sink(connect(config).await?, config))
}

#[cfg(not(feature = "database"))]
async fn database_sink(_config: &IngestConfig) -> Result<Arc<dyn UpsertSink>> {
    anyhow::bail!("Built without database support; use `run --dry-run`")
}

#[cfg(feature = "database")]
async fn purge(config: &IngestConfig) -> Result<()> {
    let sink = connect(config).await?;
    let expired = sink.purge_expired(config.retention()).await?;
    info!(expired, retention_secs = config.retention_secs, "Purge complete");
    Ok(())
}

#[cfg(not(feature = "database"))]
async fn purge(_config: &IngestConfig) -> Result<()> {
    anyhow::bail!("Built without database support")
}

#[cfg(feature = "database")]
async fn list(config: &IngestConfig, page: u32, limit: u32) -> Result<()> {
    let sink = connect(config).await?;
    let pagination = jobfeed_common::Pagination::new(page, limit);
    let jobs = sink.list_page(pagination).await?;

    info!(page = pagination.page, limit = pagination.limit, count = jobs.len(), "Stored jobs");
    for job in &jobs {
        info!(job = %serde_json::to_string(job)?, "Stored job");
    }
    Ok(())
}

#[cfg(not(feature = "database"))]
async fn list(_config: &IngestConfig, _page: u32, _limit: u32) -> Result<()> {
    anyhow::bail!("Built without database support")
}

/// Cancel `token` on Ctrl+C or SIGTERM.
fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                },
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                },
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                warn!("Received Ctrl+C, finishing in-flight writes");
            },
            _ = terminate => {
                warn!("Received terminate signal, finishing in-flight writes");
            },
        }

        token.cancel();
    });
}
