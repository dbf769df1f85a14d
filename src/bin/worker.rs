//! Standalone worker binary.
//!
//! Consumes a queue with a registry built by the embedding application; this
//! binary ships with an empty registry and exists as the scaffold for a
//! deployment-specific build (link your tasks in `build_registry`).

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use courierq::config::WorkerConfig;
use courierq::error::CourierResult;
use courierq::registry::TaskRegistry;
use courierq::worker::WorkerPool;

#[derive(Parser, Debug)]
#[command(name = "courierq-worker", about = "Run a courierq task worker")]
struct Args {
    /// Queue to consume from
    #[arg(long, default_value = "celery")]
    queue: String,

    /// Number of concurrent consumers
    #[arg(long, default_value_t = 2)]
    concurrency: usize,

    /// Broker connection URI
    #[arg(long, default_value = "amqp://localhost//")]
    broker: String,
}

fn build_registry() -> Arc<TaskRegistry> {
    Arc::new(TaskRegistry::builder().build())
}

#[tokio::main]
async fn main() -> CourierResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let registry = build_registry();

    let task_names = registry.task_names();
    info!(
        queue = %args.queue,
        concurrency = args.concurrency,
        tasks = ?task_names,
        "starting worker"
    );

    let config = WorkerConfig::new(args.broker)
        .with_queue(args.queue)
        .with_concurrency(args.concurrency);
    let pool = WorkerPool::start(config, registry).await?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| courierq::CourierError::internal(format!("signal handler failed: {e}")))?;
    info!("shutdown requested, draining in-flight tasks");
    pool.join().await;
    pool.shutdown().await;
    Ok(())
}
