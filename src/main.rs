//! Probe Relay - on-device sensing pipeline
//!
//! Samples configured probes, transmits and persists their batches,
//! evaluates triggers and runs remotely defined prediction models.
//!
//! # Usage
//!
//! ```bash
//! # Run with ./probe_relay.toml (or $PROBE_RELAY_CONFIG)
//! probe-relay
//!
//! # Drive a headless device from JSON lines
//! replay_sensors.py | probe-relay --stdin --config bench.toml
//!
//! # Print the cache key of a model URI
//! probe-relay model-key https://models.example.org/activity.json
//! ```
//!
//! # Environment Variables
//!
//! - `PROBE_RELAY_CONFIG`: Path to the configuration file
//! - `RUST_LOG`: Logging level (default: info)
//! - `RESET_DATA`: Set to "true" to wipe persisted readings and cached models on startup

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use probe_relay::acquisition::{Clock, SystemClock};
use probe_relay::commands::LoggingActuator;
use probe_relay::config::defaults::PROBE_DB_NAME;
use probe_relay::config::watcher::run_config_watcher;
use probe_relay::models::{model_key, HttpModelFetcher, ModelCache, ModelRegistry};
use probe_relay::output::{ChannelOutput, FanOut, LogOutput, OutputSink, Transmission};
use probe_relay::pipeline::{build_probes, Dispatcher, StdinFeed};
use probe_relay::probes::{CategoryTable, ProbeContext};
use probe_relay::storage::{SledStorage, Storage};
use probe_relay::triggers::TriggerEngine;
use probe_relay::types::Value;
use probe_relay::workers::WorkerPool;
use probe_relay::ConfigStore;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "probe-relay")]
#[command(about = "On-device sensing pipeline: probes, triggers and model predictions")]
#[command(version)]
struct CliArgs {
    /// Configuration file (overrides the standard search order)
    #[arg(short, long, env = "PROBE_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Read samples, foreground reports and commands from stdin (JSON lines)
    #[arg(long)]
    stdin: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Override the periodic trigger check interval (seconds)
    #[arg(long, value_name = "SECS")]
    periodic_secs: Option<u64>,

    /// Wipe persisted readings and cached models on startup.
    /// Can also be set via RESET_DATA=true.
    #[arg(long)]
    reset_data: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Print the cache identity key of a model source URI
    ModelKey {
        uri: String,
    },
}

// ============================================================================
// Data Reset
// ============================================================================

/// Check if a data reset is requested via CLI flag or environment variable.
fn should_reset_data(cli_flag: bool) -> bool {
    if cli_flag {
        return true;
    }
    std::env::var("RESET_DATA")
        .map(|val| matches!(val.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

fn reset_data_directory(data_dir: &Path) -> Result<()> {
    if !data_dir.exists() {
        info!(path = %data_dir.display(), "Data directory does not exist, nothing to reset");
        return Ok(());
    }
    warn!(path = %data_dir.display(), "Reset requested, removing persisted readings and cached models");
    std::fs::remove_dir_all(data_dir)
        .with_context(|| format!("Failed to remove data directory {}", data_dir.display()))?;
    Ok(())
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    Dispatcher,
    ConfigWatcher,
    Feed,
    OutputConsumer,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dispatcher => write!(f, "Dispatcher"),
            Self::ConfigWatcher => write!(f, "ConfigWatcher"),
            Self::Feed => write!(f, "Feed"),
            Self::OutputConsumer => write!(f, "OutputConsumer"),
        }
    }
}

/// Write every transmission to stdout as one JSON line.
async fn consume_output(
    mut rx: mpsc::UnboundedReceiver<Transmission>,
    cancel: CancellationToken,
) -> Result<TaskName> {
    loop {
        let transmission = tokio::select! {
            () = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(t) => t,
                None => break,
            },
        };
        let line = serde_json::json!({
            "source": transmission.source,
            "payload": Value::Record(transmission.payload).to_json(),
        });
        println!("{line}");
    }
    Ok(TaskName::OutputConsumer)
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!(tasks = task_set.len(), "Supervisor monitoring tasks");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task))) => info!(task = %task, "Task completed"),
                    Some(Ok(Err(e))) => {
                        error!(error = %e, "Task failed");
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Task panicked");
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {e}"));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    // Give tasks a moment to observe cancellation and report stats
    while let Ok(Some(result)) =
        tokio::time::timeout(Duration::from_secs(2), task_set.join_next()).await
    {
        if let Ok(Ok(task)) = result {
            info!(task = %task, "Task stopped");
        }
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    if let Some(SubCommand::ModelKey { uri }) = &args.command {
        println!("{}", model_key(uri));
        return Ok(());
    }

    let store = Arc::new(match &args.config {
        Some(path) => ConfigStore::open(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ConfigStore::load(),
    });
    let startup = store.snapshot();
    let document = startup.config();
    info!(
        device = %document.device.name,
        probes = document.probes.len(),
        triggers = document.triggers.len(),
        models = document.models.len(),
        "Probe Relay starting"
    );

    // Reset check, before any storage is opened
    if should_reset_data(args.reset_data) {
        reset_data_directory(&document.storage.data_dir)?;
    }

    let workers = WorkerPool::new(document.workers.max_concurrent)?;
    let database = Arc::new(
        SledStorage::open(&document.storage.data_dir.join(PROBE_DB_NAME))
            .context("Failed to open probe database")?,
    );
    let storage: Arc<dyn Storage> = Arc::clone(&database) as Arc<dyn Storage>;

    let (channel_output, output_rx) = ChannelOutput::new();
    let output: Arc<dyn OutputSink> = Arc::new(
        FanOut::new()
            .with(Arc::new(channel_output))
            .with(Arc::new(LogOutput)),
    );

    let registry = Arc::new(ModelRegistry::new(
        Arc::new(HttpModelFetcher::new().context("Failed to build HTTP client")?),
        ModelCache::new(document.storage.models_dir()),
        workers.clone(),
    ));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let ctx = ProbeContext {
        output: Arc::clone(&output),
        storage,
        workers: workers.clone(),
        events: events_tx.clone(),
        clock: Arc::clone(&clock),
    };
    let categories = Arc::new(CategoryTable::from(document.app_categories.clone()));
    let (probes, inputs) = build_probes(&startup, &ctx, categories);

    let mut dispatcher = Dispatcher::new(
        Arc::clone(&store),
        Arc::new(TriggerEngine::default()),
        registry,
        probes,
        Arc::new(LoggingActuator),
        output,
    );
    if let Some(secs) = args.periodic_secs {
        dispatcher = dispatcher.with_periodic_interval(Duration::from_secs(secs.max(1)));
    }

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown");
        shutdown_token.cancel();
    });

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    let dispatch_cancel = cancel_token.clone();
    task_set.spawn(async move {
        dispatcher.run(events_rx, dispatch_cancel).await;
        Ok(TaskName::Dispatcher)
    });

    task_set.spawn(consume_output(output_rx, cancel_token.clone()));

    if let Some(path) = store.source().map(Path::to_path_buf) {
        let watcher_tx = events_tx.clone();
        let watcher_cancel = cancel_token.clone();
        task_set.spawn(async move {
            run_config_watcher(path, watcher_tx, watcher_cancel).await;
            Ok(TaskName::ConfigWatcher)
        });
    } else {
        info!("No configuration file in use, hot reload disabled");
    }

    if args.stdin {
        let feed = StdinFeed::stdin(inputs, events_tx.clone(), clock);
        let feed_cancel = cancel_token.clone();
        task_set.spawn(async move {
            let applied = feed.run(feed_cancel).await;
            info!(applied, "Feed finished");
            Ok(TaskName::Feed)
        });
    }
    drop(events_tx);

    run_supervisor(&mut task_set, cancel_token).await?;
    workers.wait_idle().await;
    if let Err(e) = database.flush() {
        warn!(error = %e, "Failed to flush probe database");
    }

    info!("Probe Relay shutdown complete");
    Ok(())
}
