//! Flush executor - turns one closed bucket into one durable notification
//!
//! Protocol per bucket:
//! 1. Read the snapshot from the bucket store
//! 2. Absent: already flushed or expired, nothing to do
//! 3. Compose the summary message
//! 4. Idempotent durable write keyed by `(region, subject, event type, window start)`
//! 5. Delete the bucket
//!
//! A crash or delete failure between 4 and 5 re-offers the bucket on a later
//! pass, where step 4 reports a duplicate and step 5 is retried.

use super::clock::Clock;
use super::db::UpsertOutcome;
use super::error::Result;
use super::message::compose_message;
use super::region::RegionRegistry;
use super::types::{BucketIdentity, NotificationPayload};
use std::sync::Arc;

/// Successful outcome of a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// A new notification row was written
    Created { notification_id: i64 },
    /// The natural key already existed; the bucket's events were discarded
    ///
    /// `suppressed_events` counts the events in the re-offered bucket. They
    /// are either a replay of the existing row or late arrivals into a window
    /// that had already been flushed.
    Duplicate { suppressed_events: u64 },
    /// The bucket no longer existed
    BucketGone,
}

pub struct FlushExecutor {
    registry: Arc<RegionRegistry>,
    sample_cap: usize,
    now_fn: Clock,
}

impl FlushExecutor {
    pub fn new(registry: Arc<RegionRegistry>, sample_cap: usize, now_fn: Clock) -> Self {
        Self {
            registry,
            sample_cap,
            now_fn,
        }
    }

    /// Flush one bucket
    ///
    /// Errors are transient: a durable write failure leaves the bucket intact,
    /// a delete failure after the write leaves it for the duplicate check.
    pub async fn flush(&self, identity: &BucketIdentity) -> Result<FlushOutcome> {
        let handles = self.registry.handles_for(&identity.region)?;
        let key = identity.key();

        let Some(snapshot) = handles.bucket_store.get(&key).await? else {
            log::debug!("Bucket {} already gone, skipping", identity);
            return Ok(FlushOutcome::BucketGone);
        };

        let payload = NotificationPayload {
            aggregated_count: snapshot.count,
            message: compose_message(
                identity.event_type,
                snapshot.count,
                &snapshot.sample_actor_ids,
                self.sample_cap,
            ),
            sample_actor_ids: snapshot.sample_actor_ids,
            created_at: (self.now_fn)(),
        };

        let outcome = handles
            .notification_store
            .upsert_notification_if_absent(&identity.natural_key(), &payload)
            .await?;

        handles.bucket_store.delete(&key).await?;

        Ok(match outcome {
            UpsertOutcome::Created(notification_id) => {
                log::debug!(
                    "✅ Flushed {} (count: {}) -> notification {}",
                    identity,
                    payload.aggregated_count,
                    notification_id
                );
                FlushOutcome::Created { notification_id }
            }
            UpsertOutcome::AlreadyExists => {
                log::warn!(
                    "⚠️  Notification for {} already exists, discarded {} events",
                    identity,
                    payload.aggregated_count
                );
                FlushOutcome::Duplicate {
                    suppressed_events: payload.aggregated_count,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::bucket_store::{BucketStore, InMemoryBucketStore};
    use crate::pipeline::clock::ManualClock;
    use crate::pipeline::db::{NotificationStore, SqliteNotificationStore};
    use crate::pipeline::region::Region;
    use crate::pipeline::types::{BucketIncrement, EventType};

    struct Fixture {
        executor: FlushExecutor,
        buckets: Arc<InMemoryBucketStore>,
        notifications: Arc<SqliteNotificationStore>,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::new(1_000);
        let buckets = Arc::new(InMemoryBucketStore::new(clock.clock()));
        let notifications = Arc::new(SqliteNotificationStore::open_in_memory().unwrap());
        let registry = RegionRegistry::new(vec![Region::new(
            "us-east",
            buckets.clone(),
            notifications.clone(),
        )])
        .unwrap();
        Fixture {
            executor: FlushExecutor::new(Arc::new(registry), 5, clock.clock()),
            buckets,
            notifications,
        }
    }

    async fn seed(buckets: &InMemoryBucketStore, identity: &BucketIdentity, actors: &[&str]) {
        for actor in actors {
            buckets
                .upsert_increment(
                    &identity.key(),
                    BucketIncrement {
                        actor_id: actor.to_string(),
                        at: identity.window_start,
                        window_length: 120,
                        sample_cap: 5,
                    },
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_flush_writes_and_deletes() {
        let f = fixture();
        let identity = BucketIdentity::new("us-east", "post-1", EventType::Like, 0);
        seed(&f.buckets, &identity, &["Alice", "Bob", "Cara"]).await;

        let outcome = f.executor.flush(&identity).await.unwrap();

        assert!(matches!(outcome, FlushOutcome::Created { .. }));
        assert!(f.buckets.is_empty());
        let rows = f.notifications.notifications_for_subject("post-1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].aggregated_count, 3);
        assert_eq!(rows[0].message, "Alice and 2 others liked your post");
        assert_eq!(rows[0].created_at, 1_000);
    }

    #[tokio::test]
    async fn test_second_flush_is_noop() {
        let f = fixture();
        let identity = BucketIdentity::new("us-east", "post-1", EventType::Like, 0);
        seed(&f.buckets, &identity, &["Alice"]).await;

        f.executor.flush(&identity).await.unwrap();
        let second = f.executor.flush(&identity).await.unwrap();

        assert_eq!(second, FlushOutcome::BucketGone);
        assert_eq!(f.notifications.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reflush_after_lost_delete_is_duplicate() {
        // Durable write done, delete never happened: the bucket is re-offered
        let f = fixture();
        let identity = BucketIdentity::new("us-east", "post-1", EventType::Comment, 0);
        seed(&f.buckets, &identity, &["Alice"]).await;
        f.executor.flush(&identity).await.unwrap();
        seed(&f.buckets, &identity, &["Alice"]).await;

        let outcome = f.executor.flush(&identity).await.unwrap();

        assert_eq!(outcome, FlushOutcome::Duplicate { suppressed_events: 1 });
        assert_eq!(f.notifications.count().unwrap(), 1);
        assert!(f.buckets.is_empty());
    }

    #[tokio::test]
    async fn test_late_events_into_flushed_window_are_counted() {
        // Test: events arriving after the window was flushed are reported, not lost silently
        let f = fixture();
        let identity = BucketIdentity::new("us-east", "post-2", EventType::Like, 0);
        seed(&f.buckets, &identity, &["Alice", "Bob"]).await;
        f.executor.flush(&identity).await.unwrap();
        seed(&f.buckets, &identity, &["Cara", "Dan", "Eve"]).await;

        let outcome = f.executor.flush(&identity).await.unwrap();

        assert_eq!(outcome, FlushOutcome::Duplicate { suppressed_events: 3 });
        let rows = f.notifications.notifications_for_subject("post-2").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].aggregated_count, 2);
    }

    #[tokio::test]
    async fn test_single_event_singular_message() {
        let f = fixture();
        let identity = BucketIdentity::new("us-east", "post-9", EventType::Like, 0);
        seed(&f.buckets, &identity, &["Alice"]).await;

        f.executor.flush(&identity).await.unwrap();

        let rows = f.notifications.notifications_for_subject("post-9").await.unwrap();
        assert_eq!(rows[0].message, "Alice liked your post");
    }
}
