//! Bucket store: ephemeral, low-latency storage for in-progress buckets
//!
//! The trait mirrors a Redis-like contract (atomic upsert, cursor scan, get,
//! delete, expiry) so a networked store can stand behind it. The in-memory
//! implementation is the default partition for each region.

use super::clock::Clock;
use super::error::{Error, Result};
use super::types::{BucketIdentity, BucketIncrement, BucketKey, BucketSnapshot};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};

/// Result of a delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Absent,
}

/// One page of a closed-bucket scan
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub identities: Vec<BucketIdentity>,
    /// Cursor for the next page; None when the scan is exhausted
    pub next: Option<BucketKey>,
}

/// Contract for the ephemeral bucket store (one partition per region)
///
/// Implementations must make `upsert_increment` atomic: concurrent calls for
/// the same key never lose an increment.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Create the bucket with count 1, or increment it
    ///
    /// Appends `actor_id` to the sample if not present and below the cap.
    async fn upsert_increment(
        &self,
        key: &BucketKey,
        increment: BucketIncrement,
    ) -> Result<BucketSnapshot>;

    /// List buckets of `region` whose `window_start <= cutoff`, in key order,
    /// strictly after `after`, at most `limit` per page
    async fn scan_closed(
        &self,
        region: &str,
        cutoff: i64,
        after: Option<&BucketKey>,
        limit: usize,
    ) -> Result<ScanPage>;

    /// Read a bucket. Expired buckets read as absent.
    async fn get(&self, key: &BucketKey) -> Result<Option<BucketSnapshot>>;

    async fn delete(&self, key: &BucketKey) -> Result<DeleteOutcome>;

    /// Set a time-to-live. Returns false if the key does not exist.
    async fn set_expiry(&self, key: &BucketKey, ttl_secs: i64) -> Result<bool>;
}

#[derive(Debug, Clone)]
struct StoredBucket {
    snapshot: BucketSnapshot,
    expires_at: Option<i64>,
}

impl StoredBucket {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }
}

/// In-process bucket store
///
/// A single mutex serializes every operation, which is what makes
/// `upsert_increment` atomic. Callers never take a lock of their own.
pub struct InMemoryBucketStore {
    buckets: Mutex<BTreeMap<String, StoredBucket>>,
    now_fn: Clock,
}

impl InMemoryBucketStore {
    pub fn new(now_fn: Clock) -> Self {
        Self {
            buckets: Mutex::new(BTreeMap::new()),
            now_fn,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, StoredBucket>>> {
        self.buckets
            .lock()
            .map_err(|_| Error::bucket_store("bucket store lock poisoned"))
    }

    /// Number of live (unexpired) buckets
    pub fn len(&self) -> usize {
        let now = (self.now_fn)();
        self.lock()
            .map(|buckets| buckets.values().filter(|b| !b.is_expired(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries held, expired or not
    #[cfg(test)]
    fn stored_len(&self) -> usize {
        self.lock().map(|buckets| buckets.len()).unwrap_or(0)
    }
}

#[async_trait]
impl BucketStore for InMemoryBucketStore {
    async fn upsert_increment(
        &self,
        key: &BucketKey,
        increment: BucketIncrement,
    ) -> Result<BucketSnapshot> {
        let now = (self.now_fn)();
        let identity = key
            .parse()
            .ok_or_else(|| Error::bucket_store(format!("malformed bucket key: {}", key)))?;

        let mut buckets = self.lock()?;

        // An expired bucket is gone; the next event starts a fresh one
        if buckets.get(key.as_str()).map_or(false, |b| b.is_expired(now)) {
            buckets.remove(key.as_str());
        }

        let stored = buckets
            .entry(key.as_str().to_string())
            .and_modify(|b| b.snapshot.count += 1)
            .or_insert_with(|| StoredBucket {
                snapshot: BucketSnapshot {
                    count: 1,
                    sample_actor_ids: Vec::with_capacity(increment.sample_cap),
                    window_start: identity.window_start,
                    window_length: increment.window_length,
                    last_updated_at: increment.at,
                },
                expires_at: None,
            });

        let snapshot = &mut stored.snapshot;
        if snapshot.sample_actor_ids.len() < increment.sample_cap
            && !snapshot.sample_actor_ids.contains(&increment.actor_id)
        {
            snapshot.sample_actor_ids.push(increment.actor_id);
        }
        snapshot.last_updated_at = snapshot.last_updated_at.max(increment.at);

        Ok(snapshot.clone())
    }

    async fn scan_closed(
        &self,
        region: &str,
        cutoff: i64,
        after: Option<&BucketKey>,
        limit: usize,
    ) -> Result<ScanPage> {
        let now = (self.now_fn)();
        let prefix = BucketKey::region_prefix(region);
        let mut buckets = self.lock()?;

        let lower = match after {
            Some(cursor) => Bound::Excluded(cursor.as_str().to_string()),
            None => Bound::Included(prefix.clone()),
        };

        let mut page = ScanPage::default();
        let mut expired = Vec::new();
        for (raw, stored) in buckets.range((lower, Bound::Unbounded)) {
            if !raw.starts_with(&prefix) {
                break;
            }
            if stored.is_expired(now) {
                expired.push(raw.clone());
                continue;
            }
            if stored.snapshot.window_start > cutoff {
                continue;
            }
            let key = BucketKey::from_raw(raw.as_str());
            let Some(identity) = key.parse() else {
                continue;
            };
            page.identities.push(identity);
            if page.identities.len() >= limit {
                page.next = Some(key);
                break;
            }
        }

        // Expired buckets are reclaimed as the scan passes over them
        for raw in &expired {
            buckets.remove(raw);
        }
        if !expired.is_empty() {
            log::debug!("Reclaimed {} expired buckets in {}", expired.len(), region);
        }

        Ok(page)
    }

    async fn get(&self, key: &BucketKey) -> Result<Option<BucketSnapshot>> {
        let now = (self.now_fn)();
        let mut buckets = self.lock()?;

        match buckets.get(key.as_str()) {
            Some(stored) if stored.is_expired(now) => {
                buckets.remove(key.as_str());
                Ok(None)
            }
            Some(stored) => Ok(Some(stored.snapshot.clone())),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &BucketKey) -> Result<DeleteOutcome> {
        let mut buckets = self.lock()?;
        match buckets.remove(key.as_str()) {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::Absent),
        }
    }

    async fn set_expiry(&self, key: &BucketKey, ttl_secs: i64) -> Result<bool> {
        let now = (self.now_fn)();
        let mut buckets = self.lock()?;
        match buckets.get_mut(key.as_str()) {
            Some(stored) if !stored.is_expired(now) => {
                stored.expires_at = Some(now + ttl_secs);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::clock::ManualClock;
    use crate::pipeline::types::EventType;
    use std::sync::Arc;

    fn increment(actor: &str, at: i64, cap: usize) -> BucketIncrement {
        BucketIncrement {
            actor_id: actor.to_string(),
            at,
            window_length: 120,
            sample_cap: cap,
        }
    }

    fn key(region: &str, subject: &str, window_start: i64) -> BucketKey {
        BucketIdentity::new(region, subject, EventType::Like, window_start).key()
    }

    #[tokio::test]
    async fn test_upsert_creates_then_increments() {
        let clock = ManualClock::new(1_000);
        let store = InMemoryBucketStore::new(clock.clock());
        let k = key("us", "post-1", 960);

        let first = store.upsert_increment(&k, increment("alice", 1_000, 5)).await.unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(first.sample_actor_ids, vec!["alice"]);
        assert_eq!(first.window_start, 960);

        store.upsert_increment(&k, increment("bob", 1_010, 5)).await.unwrap();
        let third = store.upsert_increment(&k, increment("alice", 1_005, 5)).await.unwrap();

        assert_eq!(third.count, 3);
        assert_eq!(third.sample_actor_ids, vec!["alice", "bob"]);
        assert_eq!(third.last_updated_at, 1_010);
    }

    #[tokio::test]
    async fn test_sample_respects_cap() {
        let store = InMemoryBucketStore::new(ManualClock::new(0).clock());
        let k = key("us", "post-1", 0);

        for actor in ["a", "b", "c", "d"] {
            store.upsert_increment(&k, increment(actor, 0, 2)).await.unwrap();
        }

        let snapshot = store.get(&k).await.unwrap().unwrap();
        assert_eq!(snapshot.count, 4);
        assert_eq!(snapshot.sample_actor_ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_lose_nothing() {
        let store = Arc::new(InMemoryBucketStore::new(ManualClock::new(0).clock()));
        let k = key("us", "hot-post", 0);

        let mut handles = Vec::new();
        for i in 0..50 {
            let store = Arc::clone(&store);
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                store
                    .upsert_increment(&k, increment(&format!("user{}", i % 7), 0, 5))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = store.get(&k).await.unwrap().unwrap();
        assert_eq!(snapshot.count, 50);
        assert_eq!(snapshot.sample_actor_ids.len(), 5);
    }

    #[tokio::test]
    async fn test_scan_filters_region_and_cutoff() {
        let store = InMemoryBucketStore::new(ManualClock::new(0).clock());
        store.upsert_increment(&key("us", "p1", 0), increment("a", 0, 5)).await.unwrap();
        store.upsert_increment(&key("us", "p2", 120), increment("a", 120, 5)).await.unwrap();
        store.upsert_increment(&key("usa", "p3", 0), increment("a", 0, 5)).await.unwrap();
        store.upsert_increment(&key("eu", "p4", 0), increment("a", 0, 5)).await.unwrap();

        let page = store.scan_closed("us", 0, None, 10).await.unwrap();

        assert_eq!(page.identities.len(), 1);
        assert_eq!(page.identities[0].subject_id, "p1");
        assert!(page.next.is_none());
    }

    #[tokio::test]
    async fn test_scan_pages_with_cursor() {
        let store = InMemoryBucketStore::new(ManualClock::new(0).clock());
        for i in 0..5 {
            let k = key("us", &format!("post-{}", i), 0);
            store.upsert_increment(&k, increment("a", 0, 5)).await.unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor: Option<BucketKey> = None;
        loop {
            let page = store.scan_closed("us", 0, cursor.as_ref(), 2).await.unwrap();
            seen.extend(page.identities.into_iter().map(|i| i.subject_id));
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        assert_eq!(seen, vec!["post-0", "post-1", "post-2", "post-3", "post-4"]);
    }

    #[tokio::test]
    async fn test_expired_bucket_reads_absent() {
        let clock = ManualClock::new(100);
        let store = InMemoryBucketStore::new(clock.clock());
        let k = key("us", "p1", 0);

        store.upsert_increment(&k, increment("a", 100, 5)).await.unwrap();
        assert!(store.set_expiry(&k, 600).await.unwrap());

        clock.advance(599);
        assert!(store.get(&k).await.unwrap().is_some());

        clock.advance(1);
        assert!(store.get(&k).await.unwrap().is_none());
        assert!(store.scan_closed("us", 0, None, 10).await.unwrap().identities.is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_scan_reclaims_expired_entries() {
        // Test: expired buckets are removed from the map, not just hidden
        let clock = ManualClock::new(0);
        let store = InMemoryBucketStore::new(clock.clock());
        for i in 0..1000 {
            let k = key("us", &format!("post-{}", i), 0);
            store.upsert_increment(&k, increment("a", 0, 5)).await.unwrap();
            store.set_expiry(&k, 600).await.unwrap();
        }

        clock.advance(10_000);
        let other_region = key("eu", "post-0", 0);
        let fresh = key("us", "fresh", 9_960);
        store.upsert_increment(&other_region, increment("a", 10_000, 5)).await.unwrap();
        store.upsert_increment(&fresh, increment("a", 10_000, 5)).await.unwrap();
        assert_eq!(store.stored_len(), 1002);

        for _ in 0..10 {
            let mut cursor: Option<BucketKey> = None;
            loop {
                let page = store.scan_closed("us", 0, cursor.as_ref(), 10).await.unwrap();
                assert!(page.identities.is_empty());
                match page.next {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
        }

        // Only the live buckets remain
        assert_eq!(store.stored_len(), 2);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_page_boundary_reclaims_only_scanned_range() {
        let clock = ManualClock::new(0);
        let store = InMemoryBucketStore::new(clock.clock());
        for subject in ["p0", "p1", "p2"] {
            store.upsert_increment(&key("us", subject, 0), increment("a", 0, 5)).await.unwrap();
        }
        let stale = key("us", "p3", 0);
        store.upsert_increment(&stale, increment("a", 0, 5)).await.unwrap();
        store.set_expiry(&stale, 10).await.unwrap();

        clock.advance(10);
        let page = store.scan_closed("us", 0, None, 2).await.unwrap();
        assert_eq!(page.identities.len(), 2);
        assert_eq!(store.stored_len(), 4);

        let page = store.scan_closed("us", 0, page.next.as_ref(), 2).await.unwrap();
        assert_eq!(page.identities.len(), 1);
        assert!(page.next.is_none());
        assert_eq!(store.stored_len(), 3);
    }

    #[tokio::test]
    async fn test_delete_and_missing_expiry() {
        let store = InMemoryBucketStore::new(ManualClock::new(0).clock());
        let k = key("us", "p1", 0);

        assert!(!store.set_expiry(&k, 10).await.unwrap());
        store.upsert_increment(&k, increment("a", 0, 5)).await.unwrap();

        assert_eq!(store.delete(&k).await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(store.delete(&k).await.unwrap(), DeleteOutcome::Absent);
    }
}
