//! Producer binary entry point.
//!
//! Usage: alert-producer [--redis-url <url>] [--queue <name>] [--interval-ms <ms>]
//!
//! Settings come from the environment first; flags override them.

use alert_core::{listen_for_signals, RandomAlertGenerator, Shutdown, Supervisor};
use alert_producer::{Producer, ProducerConfig};
use alert_queue::RedisBroker;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

/// Publishes a synthetic alert to a durable queue on a fixed cadence.
#[derive(Parser, Debug)]
#[command(name = "alert-producer")]
#[command(about = "Publishes synthetic alerts to a durable queue")]
struct Args {
    /// Broker connection URL.
    #[arg(long)]
    redis_url: Option<String>,

    /// Queue to publish to.
    #[arg(long)]
    queue: Option<String>,

    /// Milliseconds between alerts.
    #[arg(long)]
    interval_ms: Option<u64>,

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
    fn apply(&self, config: &mut ProducerConfig) {
        if let Some(url) = &self.redis_url {
            config.redis_url = url.clone();
        }
        if let Some(queue) = &self.queue {
            config.queue_name = queue.clone();
        }
        if let Some(ms) = self.interval_ms {
            config.publish_interval = Duration::from_millis(ms);
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
        service_name: "alert-producer".into(),
        default_level: args.log_level.clone(),
        log_path: args.log_file.clone(),
        also_stderr: true,
    })?;

    let mut config = ProducerConfig::from_env();
    args.apply(&mut config);
    config.validate()?;

    info!(
        redis_url = %config.redis_url,
        queue = %config.queue_name,
        consumer_group = %config.consumer_group,
        interval_ms = config.publish_interval.as_millis() as u64,
        reconnect_delay_ms = config.reconnect_delay.as_millis() as u64,
        "Configuration loaded"
    );

    // Subscribed before the listener starts so an early signal is kept.
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let shutdown = Shutdown::new(shutdown_rx);
    tokio::spawn(listen_for_signals(shutdown_tx));

    let supervisor = Supervisor::new("producer", config.reconnect_delay);
    let mut producer = Producer::new(
        Arc::new(RedisBroker::new(config.redis_options())),
        Box::new(RandomAlertGenerator::new()),
        config,
    );

    let report = supervisor.run(&mut producer, shutdown).await;
    let stats = producer.stats();

    info!(
        attempts = report.attempts,
        published = stats.published,
        failed = stats.failed,
        "Producer stopped"
    );

    Ok(())
}
