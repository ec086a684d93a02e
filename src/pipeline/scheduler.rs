//! Flush scheduler - periodic flush passes across every region
//!
//! One timer drives passes. Each pass walks every region (sequentially or
//! concurrently) and flushes every closed bucket it reports. A failing region
//! is logged and skipped; its buckets stay in the store for the next tick.

use super::aggregator::Aggregator;
use super::clock::Clock;
use super::error::Error;
use super::flush::{FlushExecutor, FlushOutcome};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, Duration, MissedTickBehavior};

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub flush_interval: Duration,
    pub concurrent_regions: bool,
}

/// Outcome of one region within a pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionReport {
    pub region: String,
    pub created: usize,
    pub duplicates: usize,
    /// Events discarded because their window already had a notification
    pub suppressed_events: u64,
    pub gone: usize,
    pub failed: usize,
    /// Set when the region could not be (fully) scanned this pass
    pub unavailable: Option<String>,
}

impl RegionReport {
    fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            ..Self::default()
        }
    }

    pub fn flushed(&self) -> usize {
        self.created + self.duplicates + self.gone
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.unavailable.is_none()
    }
}

/// Outcome of one pass over all regions, in registry order
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub now: i64,
    pub regions: Vec<RegionReport>,
}

impl PassReport {
    pub fn region(&self, code: &str) -> Option<&RegionReport> {
        self.regions.iter().find(|r| r.region == code)
    }

    pub fn created(&self) -> usize {
        self.regions.iter().map(|r| r.created).sum()
    }

    pub fn failed_regions(&self) -> Vec<&str> {
        self.regions
            .iter()
            .filter(|r| r.unavailable.is_some())
            .map(|r| r.region.as_str())
            .collect()
    }
}

pub struct FlushScheduler {
    aggregator: Arc<Aggregator>,
    executor: Arc<FlushExecutor>,
    config: SchedulerConfig,
    now_fn: Clock,
}

impl FlushScheduler {
    pub fn new(
        aggregator: Arc<Aggregator>,
        executor: Arc<FlushExecutor>,
        config: SchedulerConfig,
        now_fn: Clock,
    ) -> Self {
        Self {
            aggregator,
            executor,
            config,
            now_fn,
        }
    }

    /// Run one flush pass over every configured region
    pub async fn run_pass(&self, now: i64) -> PassReport {
        let regions = self.aggregator.registry().regions().to_vec();
        log::info!(
            "⏰ Flush pass started (now: {}, regions: {})",
            now,
            regions.len()
        );

        let reports = if self.config.concurrent_regions {
            self.run_regions_concurrently(&regions, now).await
        } else {
            let mut reports = Vec::with_capacity(regions.len());
            for region in &regions {
                reports.push(flush_region(&self.aggregator, &self.executor, region, now).await);
            }
            reports
        };

        let report = PassReport {
            now,
            regions: reports,
        };

        let unavailable = report.failed_regions();
        if !unavailable.is_empty() {
            log::warn!(
                "⚠️  {} of {} regions unavailable this pass: {:?}",
                unavailable.len(),
                report.regions.len(),
                unavailable
            );
        }

        report
    }

    async fn run_regions_concurrently(&self, regions: &[String], now: i64) -> Vec<RegionReport> {
        let mut tasks = JoinSet::new();
        for (index, region) in regions.iter().enumerate() {
            let aggregator = Arc::clone(&self.aggregator);
            let executor = Arc::clone(&self.executor);
            let region = region.clone();
            tasks.spawn(async move {
                (index, flush_region(&aggregator, &executor, &region, now).await)
            });
        }

        let mut slots: Vec<Option<RegionReport>> = vec![None; regions.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, report)) => slots[index] = Some(report),
                Err(e) => log::error!("❌ Region flush task panicked: {}", e),
            }
        }

        slots
            .into_iter()
            .zip(regions)
            .map(|(slot, region)| {
                slot.unwrap_or_else(|| RegionReport {
                    unavailable: Some("flush task panicked".to_string()),
                    ..RegionReport::new(region)
                })
            })
            .collect()
    }

    /// Run passes on a fixed interval until `shutdown` flips to true
    ///
    /// Shutdown is only observed between passes, so an in-flight pass always
    /// runs to completion. One final pass runs after shutdown so that windows
    /// which closed since the last tick are persisted before exit.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        log::info!(
            "⏰ Starting flush scheduler (interval: {}ms, concurrent regions: {})",
            self.config.flush_interval.as_millis(),
            self.config.concurrent_regions
        );

        let mut timer = interval(self.config.flush_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = timer.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let now = (self.now_fn)();
            self.run_pass(now).await;
        }

        log::info!("🔄 Performing final flush pass...");
        let report = self.run_pass((self.now_fn)()).await;
        log::info!(
            "✅ Flush scheduler stopped (final pass created {} notifications)",
            report.created()
        );
    }
}

async fn flush_region(
    aggregator: &Aggregator,
    executor: &FlushExecutor,
    region: &str,
    now: i64,
) -> RegionReport {
    let started = std::time::Instant::now();
    let mut report = RegionReport::new(region);

    let mut scan = match aggregator.list_closed_buckets(region, now) {
        Ok(scan) => scan,
        Err(e) => {
            report.unavailable = Some(e.to_string());
            return report;
        }
    };

    while let Some(next) = scan.next().await {
        let identity = match next {
            Ok(identity) => identity,
            Err(e) => {
                let err = Error::RegionUnavailable {
                    region: region.to_string(),
                    reason: e.to_string(),
                };
                log::warn!("⚠️  {} - retrying next tick", err);
                report.unavailable = Some(e.to_string());
                break;
            }
        };

        match executor.flush(&identity).await {
            Ok(FlushOutcome::Created { .. }) => report.created += 1,
            Ok(FlushOutcome::Duplicate { suppressed_events }) => {
                report.duplicates += 1;
                report.suppressed_events += suppressed_events;
            }
            Ok(FlushOutcome::BucketGone) => report.gone += 1,
            Err(e) => {
                report.failed += 1;
                log::warn!("⚠️  Flush failed for {}: {}", identity, e);
            }
        }
    }

    log::info!(
        "📊 Region {} flushed: {} created, {} duplicates ({} events suppressed), {} gone, \
         {} failed | {}ms",
        region,
        report.created,
        report.duplicates,
        report.suppressed_events,
        report.gone,
        report.failed,
        started.elapsed().as_millis()
    );

    report
}
