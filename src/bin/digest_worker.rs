//! Digest Worker - windowed notification aggregation runtime
//!
//! This binary:
//! - Loads configuration and opens one SQLite store per region
//! - Reads JSON-lines events from stdin into the ingestion channel
//! - Runs the periodic flush scheduler across all regions
//! - On Ctrl-C or end of input, runs a final flush pass (bounded drain)
//!
//! Usage:
//!   cargo run --release --bin digest_worker < events.jsonl
//!
//! Environment variables: see `PipelineConfig::from_env`.

use digestflow::pipeline::{
    ingestion::start_event_ingestion, system_clock, Aggregator, Event, FlushExecutor,
    FlushScheduler, InMemoryBucketStore, PipelineConfig, Region, RegionRegistry,
    SqliteNotificationStore,
};
use dotenv::dotenv;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Digest Worker starting");

    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Refusing to start: {}", e);
            return Err(e.into());
        }
    };

    info!("📊 Configuration:");
    info!("   ├─ Regions: {:?}", config.regions);
    info!("   ├─ Database dir: {}", config.db_dir.display());
    info!("   ├─ Window: {}s (grace {}s)", config.window_secs, config.close_grace_secs);
    info!("   ├─ Flush interval: {}ms", config.flush_interval_ms);
    info!("   ├─ Sample cap: {}", config.sample_cap);
    info!("   └─ Concurrent regions: {}", config.concurrent_regions);

    std::fs::create_dir_all(&config.db_dir)?;

    let clock = system_clock();
    let mut regions = Vec::with_capacity(config.regions.len());
    for code in &config.regions {
        let db_path = config.db_path_for(code);
        let store = SqliteNotificationStore::open(&db_path)?;
        info!("   ├─ Region {} -> {}", code, db_path.display());
        regions.push(Region::new(
            code.as_str(),
            Arc::new(InMemoryBucketStore::new(clock.clone())),
            Arc::new(store),
        ));
    }
    let registry = Arc::new(RegionRegistry::new(regions)?);
    info!("✅ Region registry ready ({} regions)", registry.len());

    let settings = config.aggregator_settings()?;
    let aggregator = Arc::new(Aggregator::new(registry.clone(), settings, clock.clone()));
    let executor = Arc::new(FlushExecutor::new(registry, settings.sample_cap, clock.clone()));
    let scheduler = Arc::new(FlushScheduler::new(
        aggregator.clone(),
        executor,
        config.scheduler_config(),
        clock,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    let (tx, rx) = mpsc::channel::<Event>(config.channel_buffer);
    let ingestion_task = tokio::spawn(start_event_ingestion(rx, aggregator));
    let reader_task = tokio::spawn(read_stdin_events(tx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Ctrl-C received, shutting down");
        }
        result = reader_task => {
            if let Err(e) = result {
                error!("❌ Stdin reader failed: {}", e);
            }
            info!("📭 Input exhausted, waiting for ingestion to finish");
            if let Err(e) = ingestion_task.await {
                error!("❌ Ingestion task failed: {}", e);
            }
        }
    }

    // The scheduler finishes its in-flight pass, then runs a final pass;
    // both are abandoned only after the drain window
    shutdown_tx.send(true).ok();
    let drain = Duration::from_millis(config.shutdown_drain_ms);
    match tokio::time::timeout(drain, scheduler_task).await {
        Ok(Ok(())) => info!("✅ Flush scheduler drained"),
        Ok(Err(e)) => error!("❌ Flush scheduler task failed: {}", e),
        Err(_) => warn!("⚠️  Drain timeout ({}ms) elapsed, exiting", config.shutdown_drain_ms),
    }

    info!("✅ Digest Worker stopped");
    Ok(())
}

/// Forward JSON-lines events from stdin; malformed lines are skipped
async fn read_stdin_events(tx: mpsc::Sender<Event>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0u64;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("❌ Failed to read stdin: {}", e);
                break;
            }
        };
        line_no += 1;

        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Event>(&line) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    warn!("⚠️  Ingestion channel closed, stopping stdin reader");
                    break;
                }
            }
            Err(e) => warn!("⚠️  Skipping malformed event on line {}: {}", line_no, e),
        }
    }
}
