//! Subscriber binary entry point.
//!
//! Usage: alert-subscriber [--redis-url <url>] [--queue <name>] [--db-path <file>]
//!
//! Settings come from the environment first; flags override them.

use alert_core::{listen_for_signals, Shutdown, Supervisor};
use alert_queue::RedisBroker;
use alert_store::AlertStore;
use alert_subscriber::{spawn_console_reporter, Subscriber, SubscriberConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Consumes alerts from a durable queue and stores each one exactly once.
#[derive(Parser, Debug)]
#[command(name = "alert-subscriber")]
#[command(about = "Consumes alerts from a durable queue into SQLite")]
struct Args {
    /// Broker connection URL.
    #[arg(long)]
    redis_url: Option<String>,

    /// Queue to consume.
    #[arg(long)]
    queue: Option<String>,

    /// SQLite database file.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Consumer name; keep it stable so pending messages are recovered.
    #[arg(long)]
    consumer_name: Option<String>,

    /// Milliseconds to wait before reconnecting after a failure.
    #[arg(long)]
    reconnect_delay_ms: Option<u64>,

    /// Also write JSONL logs to this file.
    #[arg(long, env = "LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(&self, config: &mut SubscriberConfig) {
        if let Some(url) = &self.redis_url {
            config.redis_url = url.clone();
        }
        if let Some(queue) = &self.queue {
            config.queue_name = queue.clone();
        }
        if let Some(path) = &self.db_path {
            config.db_path = path.clone();
        }
        if let Some(name) = &self.consumer_name {
            config.consumer_name = name.clone();
        }
        if let Some(ms) = self.reconnect_delay_ms {
            config.reconnect_delay = Duration::from_millis(ms);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    observability::init_with_config(observability::LogConfig {
        service_name: "alert-subscriber".into(),
        default_level: args.log_level.clone(),
        log_path: args.log_file.clone(),
        also_stderr: true,
    })?;

    let mut config = SubscriberConfig::from_env();
    args.apply(&mut config);
    config.validate()?;

    info!(
        redis_url = %config.redis_url,
        queue = %config.queue_name,
        db_path = %config.db_path.display(),
        consumer = %config.consumer_name,
        "Configuration loaded"
    );

    let store = AlertStore::open(&config.db_path).await?;
    store.health_check().await?;

    // Subscribed before the listener starts so an early signal is kept.
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let shutdown = Shutdown::new(shutdown_rx);
    tokio::spawn(listen_for_signals(shutdown_tx));

    let supervisor = Supervisor::new("subscriber", config.reconnect_delay);
    let broker = Arc::new(RedisBroker::new(config.redis_options()));
    let mut subscriber = Subscriber::new(broker, store, config);
    let reporter = spawn_console_reporter(subscriber.subscribe());

    let report = supervisor.run(&mut subscriber, shutdown).await;
    info!(attempts = report.attempts, failures = report.failures, "Supervisor stopped");

    subscriber.finish().await?;

    // All senders are gone; the reporter drains what is left and exits.
    if let Err(e) = reporter.await {
        warn!(error = %e, "Console reporter task failed");
    }

    info!("Subscriber stopped");
    Ok(())
}
