//! Aggregator - accumulation API called synchronously by event producers
//!
//! ## Architecture
//!
//! ```text
//! Event
//!     ↓
//! Aggregator::record()          (window mapping + atomic upsert)
//!     ↓
//! BucketStore (region partition)
//!     ↓
//! Aggregator::list_closed_buckets()   (lazy, paged scan)
//!     ↓
//! FlushExecutor::flush()
//! ```
//!
//! `record()` never touches the durable store and takes no lock of its own;
//! atomicity comes from the bucket store's upsert.

use super::bucket_store::{BucketStore, ScanPage};
use super::clock::Clock;
use super::error::Result;
use super::region::RegionRegistry;
use super::types::{BucketIdentity, BucketIncrement, BucketKey, BucketSnapshot, Event};
use super::windows::WindowPolicy;
use std::collections::VecDeque;
use std::sync::Arc;

pub const DEFAULT_SAMPLE_CAP: usize = 5;
pub const DEFAULT_BUCKET_TTL_WINDOWS: i64 = 5;
pub const DEFAULT_SCAN_PAGE_SIZE: usize = 256;

/// Tunables for the aggregator
#[derive(Debug, Clone, Copy)]
pub struct AggregatorSettings {
    pub window: WindowPolicy,
    /// Maximum distinct actors kept per bucket for display
    pub sample_cap: usize,
    /// Safety TTL, in window lengths, for buckets the flush path never reaches
    pub bucket_ttl_windows: i64,
    pub scan_page_size: usize,
}

impl AggregatorSettings {
    pub fn new(window: WindowPolicy) -> Self {
        Self {
            window,
            sample_cap: DEFAULT_SAMPLE_CAP,
            bucket_ttl_windows: DEFAULT_BUCKET_TTL_WINDOWS,
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
        }
    }

    pub fn bucket_ttl_secs(&self) -> i64 {
        self.window.length_secs() * self.bucket_ttl_windows
    }
}

pub struct Aggregator {
    registry: Arc<RegionRegistry>,
    settings: AggregatorSettings,
    now_fn: Clock,
}

impl Aggregator {
    pub fn new(registry: Arc<RegionRegistry>, settings: AggregatorSettings, now_fn: Clock) -> Self {
        Self {
            registry,
            settings,
            now_fn,
        }
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<RegionRegistry> {
        &self.registry
    }

    /// Absorb one event into its window's bucket
    ///
    /// Fails only when the region is unknown or the bucket store is
    /// unreachable. A failed call leaves the bucket as it was, so the
    /// producer may retry or drop the event.
    pub async fn record(&self, event: &Event) -> Result<BucketSnapshot> {
        let handles = self.registry.handles_for(&event.region)?;
        let window_start = self.settings.window.window_start(event.timestamp);
        let identity = BucketIdentity::new(
            event.region.as_str(),
            event.subject_id.as_str(),
            event.event_type,
            window_start,
        );
        let key = identity.key();

        let snapshot = handles
            .bucket_store
            .upsert_increment(
                &key,
                BucketIncrement {
                    actor_id: event.actor_id.clone(),
                    at: (self.now_fn)(),
                    window_length: self.settings.window.length_secs(),
                    sample_cap: self.settings.sample_cap,
                },
            )
            .await?;

        if snapshot.count == 1 {
            // The increment is already applied; surfacing this error would make
            // a retrying producer double count.
            let ttl = self.settings.bucket_ttl_secs();
            match handles.bucket_store.set_expiry(&key, ttl).await {
                Ok(true) => {}
                Ok(false) => log::debug!("Bucket {} vanished before expiry was set", identity),
                Err(e) => log::warn!("⚠️  Failed to set expiry on {}: {}", identity, e),
            }
        }

        Ok(snapshot)
    }

    /// Lazily list every bucket in `region` whose window closed by `now`
    ///
    /// Nothing is fetched until the first `next()`. Dropping the scan midway
    /// loses nothing: unflushed buckets stay in the store for the next pass.
    pub fn list_closed_buckets(&self, region: &str, now: i64) -> Result<ClosedBucketScan> {
        let handles = self.registry.handles_for(region)?;
        Ok(ClosedBucketScan {
            store: Arc::clone(&handles.bucket_store),
            region: region.to_string(),
            window: self.settings.window,
            now,
            cutoff: self.settings.window.close_cutoff(now),
            page_size: self.settings.scan_page_size.max(1),
            buffer: VecDeque::new(),
            cursor: None,
            exhausted: false,
        })
    }
}

/// Finite, restartable sequence of closed bucket identities
pub struct ClosedBucketScan {
    store: Arc<dyn BucketStore>,
    region: String,
    window: WindowPolicy,
    now: i64,
    cutoff: i64,
    page_size: usize,
    buffer: VecDeque<BucketIdentity>,
    cursor: Option<BucketKey>,
    exhausted: bool,
}

impl ClosedBucketScan {
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Next identity, fetching another page when the buffer runs dry
    ///
    /// After an error the scan is finished; restart on the next tick.
    /// Identities whose window is still open at `now` are never yielded,
    /// whatever the store returned.
    pub async fn next(&mut self) -> Option<Result<BucketIdentity>> {
        loop {
            while let Some(identity) = self.buffer.pop_front() {
                if self.window.is_closed(identity.window_start, self.now) {
                    return Some(Ok(identity));
                }
                log::debug!("Store listed open bucket {}, skipping", identity);
            }
            if self.exhausted {
                return None;
            }

            match self
                .store
                .scan_closed(&self.region, self.cutoff, self.cursor.as_ref(), self.page_size)
                .await
            {
                Ok(ScanPage { identities, next }) => {
                    self.exhausted = next.is_none();
                    self.cursor = next;
                    self.buffer.extend(identities);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
    }

    /// Drain the rest of the scan into a Vec
    pub async fn collect(mut self) -> Result<Vec<BucketIdentity>> {
        let mut identities = Vec::new();
        while let Some(identity) = self.next().await {
            identities.push(identity?);
        }
        Ok(identities)
    }
}
