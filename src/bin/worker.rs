//! Visit worker process.
//!
//! Consumes visit events from the broker and persists them to PostgreSQL.
//!
//! # Usage
//!
//! ```bash
//! # Run with settings from the environment
//! cargo run --bin visit-worker
//!
//! # Eight task threads, requeueing messages left in flight by a crashed worker
//! cargo run --bin visit-worker -- --concurrency 8 --recover
//! ```
//!
//! # Shutdown
//!
//! On SIGINT or SIGTERM the task threads stop pulling messages, the execution
//! loop drains in-flight inserts, and the connection pool is closed. The process
//! exits with a failure status if the loop cannot be joined within
//! `WORKER_SHUTDOWN_TIMEOUT`.

use shortlink_telemetry::config::Config;
use shortlink_telemetry::domain::repositories::VisitRepository;
use shortlink_telemetry::error::PersistenceError;
use shortlink_telemetry::infrastructure::persistence::{PgVisitRepository, connect_pool};
use shortlink_telemetry::infrastructure::queue::{RedisTaskConsumer, TaskConsumer};
use shortlink_telemetry::logging;
use shortlink_telemetry::server::shutdown_signal;
use shortlink_telemetry::worker::WorkerProcess;

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

/// Visit worker for shortlink-telemetry.
#[derive(Parser)]
#[command(name = "visit-worker")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of task threads (overrides WORKER_CONCURRENCY)
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Broker queue to consume (overrides VISIT_QUEUE_NAME)
    #[arg(short, long)]
    queue: Option<String>,

    /// Requeue messages left in flight by a previous worker before starting
    #[arg(long)]
    recover: bool,

    /// Record each broker delivery at most once (overrides WORKER_DEDUPLICATE)
    #[arg(long)]
    deduplicate: bool,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    logging::init(&config.log_level, &config.log_format);
    config.print_summary();

    match run(config, cli.recover) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Worker failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Environment configuration with command-line overrides applied.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_env()?;

    if let Some(concurrency) = cli.concurrency {
        config.worker.concurrency = concurrency;
    }
    if let Some(queue) = &cli.queue {
        config.queue_name = queue.clone();
    }
    if cli.deduplicate {
        config.worker.deduplicate = true;
    }

    config.validate()?;
    Ok(config)
}

fn run(config: Config, recover: bool) -> Result<()> {
    let mut consumers = (0..config.worker.concurrency)
        .map(|_| RedisTaskConsumer::connect(&config.redis_url, &config.queue_name))
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to connect to broker")?;

    if recover && let Some(consumer) = consumers.first_mut() {
        let moved = consumer
            .recover()
            .context("Failed to requeue in-flight messages")?;
        tracing::info!("Requeued {} in-flight messages", moved);
    }

    let database_url = config.database_url.clone();
    let pool_config = config.pool.clone();
    let connect = move || async move {
        let pool = connect_pool(&database_url, &pool_config).await?;
        let visits: Arc<dyn VisitRepository> = Arc::new(PgVisitRepository::new(pool));
        Ok::<_, PersistenceError>(visits)
    };

    let process = WorkerProcess::start(&config.worker, connect, consumers)?;

    wait_for_shutdown()?;

    process
        .stop()
        .context("Worker did not shut down cleanly")?;

    Ok(())
}

/// Blocks the main thread until SIGINT or SIGTERM.
fn wait_for_shutdown() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;

    runtime.block_on(shutdown_signal());
    Ok(())
}
