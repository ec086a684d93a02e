//! Event ingestion - async channel processor for producer events
//!
//! Producers that cannot call `Aggregator::record` inline (stdin feeds,
//! queue consumers) push events into an mpsc channel; this loop drains it.

use super::aggregator::Aggregator;
use super::types::Event;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Counters returned when the channel closes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionStats {
    pub recorded: u64,
    pub dropped: u64,
}

/// Record every event from `rx` until the channel closes
///
/// A failed `record()` drops that one event and is logged; bucket state is
/// never partially applied.
pub async fn start_event_ingestion(
    mut rx: mpsc::Receiver<Event>,
    aggregator: Arc<Aggregator>,
) -> IngestionStats {
    log::info!("🚀 Starting event ingestion");

    let mut stats = IngestionStats::default();
    let mut window_count = 0u64;
    let mut last_log_time = Instant::now();

    while let Some(event) = rx.recv().await {
        match aggregator.record(&event).await {
            Ok(_) => {
                stats.recorded += 1;
                window_count += 1;
            }
            Err(e) => {
                stats.dropped += 1;
                log::warn!(
                    "⚠️  Dropped {} event for {} in {}: {}",
                    event.event_type,
                    event.subject_id,
                    event.region,
                    e
                );
            }
        }

        // Log throughput every 10 seconds
        if last_log_time.elapsed().as_secs() >= 10 {
            let per_sec = window_count as f64 / last_log_time.elapsed().as_secs_f64();
            log::info!(
                "📊 Ingestion rate: {:.1} events/sec (total: {}, dropped: {})",
                per_sec,
                stats.recorded,
                stats.dropped
            );
            last_log_time = Instant::now();
            window_count = 0;
        }
    }

    log::warn!(
        "⚠️  Event channel closed, stopping ingestion (recorded: {}, dropped: {})",
        stats.recorded,
        stats.dropped
    );
    stats
}
