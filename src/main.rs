use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crawl_orchestrator::{
    config::Config,
    database::Database,
    scheduler::SchedulerDriver,
    utils::{SharedClock, SystemClock},
    web::{AppState, WebServer},
    worker::{HttpFetcher, WorkerPool},
};

#[derive(Parser)]
#[command(name = "crawl-orchestrator")]
#[command(version)]
#[command(about = "Crawl orchestration core: request queue, proxy rotation, jobs and cron schedules")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Number of in-process fetch workers (overrides config file)
    #[arg(short = 'w', long, value_name = "N")]
    workers: Option<usize>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = if cli.log_level == "trace" {
        format!("crawl_orchestrator={},tower_http=trace", cli.log_level)
    } else {
        format!("crawl_orchestrator={}", cli.log_level)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting crawl orchestrator v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }
    if let Some(workers) = cli.workers {
        config.worker.concurrency = workers;
    }

    info!("Using database: {}", config.database.url);
    let database = Database::new(&config.database).await?;
    database.migrate().await?;
    info!("Database connection established and migrations applied");

    let clock: SharedClock = Arc::new(SystemClock);
    let state = AppState::new(database, config.clone(), clock.clone());
    let shutdown = CancellationToken::new();
    let mut background = Vec::new();

    if config.scheduler.enabled {
        let driver = SchedulerDriver::new(state.scheduler.clone(), state.jobs().clone(), clock);
        let token = shutdown.clone();
        background.push(tokio::spawn(async move { driver.run(token).await }));
    } else {
        info!("Scheduler driver disabled by configuration");
    }

    if config.worker.concurrency > 0 {
        let fetcher = Arc::new(HttpFetcher::new(&config.worker)?);
        let pool = WorkerPool::new(state.engine.clone(), fetcher, config.worker.clone());
        background.extend(pool.spawn(shutdown.clone()));
    }

    let web_server = WebServer::new(state)?;
    info!(
        "Starting web server on {}:{}",
        web_server.host(),
        web_server.port()
    );

    let token = shutdown.clone();
    web_server
        .serve(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            token.cancel();
        })
        .await?;

    shutdown.cancel();
    for handle in background {
        if let Err(e) = handle.await {
            error!("Background task ended abnormally: {}", e);
        }
    }
    info!("Crawl orchestrator stopped");
    Ok(())
}
