use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tenderbot::config::AppConfig;
use tenderbot::fetcher::{BrowserFetcher, BrowserOptions, FileFetcher, HttpFetcher, RetryPolicy, RoutingFetcher};
use tenderbot::models::SourceConfig;
use tenderbot::notify::{EmailNotifier, WebhookNotifier};
use tenderbot::relevance::RelevanceFilter;
use tenderbot::store::{SqliteStore, TenderStore};
use tenderbot::utils::{logging, telemetry};
use tenderbot::{PassScheduler, Pipeline, RunMode};

const CONFIG_ERROR: u8 = 2;
/// 128 + SIGINT, what a shell reports for an interrupted process.
const FORCED_EXIT: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "tenderbot", version, about = "Collects new tender listings from procurement portals")]
struct Cli {
    /// Repeat passes every SECONDS until interrupted; without a value the
    /// configured interval is used, 0 runs once
    #[arg(long = "loop", value_name = "SECONDS", num_args = 0..=1)]
    loop_secs: Option<Option<u64>>,

    /// Check database connectivity and schema, then exit
    #[arg(long)]
    init_db: bool,

    /// Apply the bundled schema before checking it
    #[arg(long, requires = "init_db")]
    migrate: bool,

    /// Config file to use instead of the config/ directory layers
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Only run the named source (repeatable)
    #[arg(long = "source", value_name = "NAME")]
    sources: Vec<String>,
}

impl Cli {
    fn run_mode(&self, config: &AppConfig) -> RunMode {
        match self.loop_secs {
            None | Some(Some(0)) => RunMode::Once,
            Some(None) => RunMode::Loop(config.scheduler.interval()),
            Some(Some(secs)) => RunMode::Loop(Duration::from_secs(secs)),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(CONFIG_ERROR);
        }
    };

    let _log_guard = match logging::init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(CONFIG_ERROR);
        }
    };

    let sources = match config.active_sources(&cli.sources) {
        Ok(sources) => sources,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::from(CONFIG_ERROR);
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), "Starting TenderBot");

    match run(&cli, &config, sources).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, config: &AppConfig, sources: Vec<SourceConfig>) -> Result<ExitCode> {
    telemetry::install_metrics_exporter(&config.metrics)?;

    let store = SqliteStore::connect(&config.database)
        .await
        .with_context(|| format!("connecting to database {}", config.database.url))?;

    if cli.init_db {
        return init_db(&store, cli.migrate).await;
    }

    if !store.health_check().await {
        anyhow::bail!("database health check failed");
    }
    store
        .verify_schema()
        .await
        .context("database schema check failed, run with --init-db --migrate")?;

    let fetcher = RoutingFetcher::new(
        BrowserFetcher::new(BrowserOptions::from_config(&config.scraper)),
        HttpFetcher::new(&config.scraper).context("building HTTP client")?,
        FileFetcher,
    );

    let mut pipeline = Pipeline::new(
        sources,
        Arc::new(fetcher),
        Arc::new(store),
        RetryPolicy::from_config(&config.scraper),
        config.scraper.max_items_per_source,
    )
    .with_relevance(RelevanceFilter::new(&config.relevance.keywords));

    if let Some(notifier) = WebhookNotifier::from_config(&config.notifications) {
        pipeline = pipeline.with_notifier(Arc::new(notifier));
    }
    if let Some(notifier) = EmailNotifier::from_config(&config.notifications).context("setting up e-mail delivery")? {
        pipeline = pipeline.with_notifier(Arc::new(notifier));
    }

    let scheduler = PassScheduler::new(pipeline, cli.run_mode(config), config.scheduler.fail_on);

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_shutdown(shutdown.clone()));

    let last = scheduler.run(shutdown).await;

    if scheduler.is_success(last.as_ref()) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

async fn init_db(store: &SqliteStore, migrate: bool) -> Result<ExitCode> {
    if migrate {
        store.migrate().await.context("applying migrations")?;
    }

    if !store.health_check().await {
        error!("Database health check failed");
        return Ok(ExitCode::FAILURE);
    }

    match store.verify_schema().await {
        Ok(()) => {
            info!("Database connection and schema OK");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(error = %e, "Schema check failed, run with --init-db --migrate");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn wait_for_shutdown(token: CancellationToken) {
    handle_signals(token, wait_for_signal, || {
        std::process::exit(FORCED_EXIT);
    })
    .await;
}

/// First signal cancels the token so the pass winds down; a second one
/// calls `force_exit`.
async fn handle_signals<S, F, X>(token: CancellationToken, mut next_signal: S, force_exit: X)
where
    S: FnMut() -> F,
    F: Future<Output = ()>,
    X: FnOnce(),
{
    next_signal().await;
    info!("Shutdown requested, finishing current source (signal again to force exit)");
    token.cancel();

    next_signal().await;
    warn!("Second shutdown signal, exiting immediately");
    force_exit();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Could not install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
