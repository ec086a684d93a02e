//! Core data structures for the digest pipeline
//!
//! - `Event` - raw producer input, never persisted on its own
//! - `BucketIdentity` / `BucketKey` - identity of one aggregation window
//! - `BucketSnapshot` - accumulated state of a bucket
//! - `Notification` - durable summary row

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of low-value event being aggregated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Like,
    Comment,
    Mention,
    Follow,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Like => "like",
            EventType::Comment => "comment",
            EventType::Mention => "mention",
            EventType::Follow => "follow",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "like" => Some(EventType::Like),
            "comment" => Some(EventType::Comment),
            "mention" => Some(EventType::Mention),
            "follow" => Some(EventType::Follow),
            _ => None,
        }
    }

    /// Verb phrase used in summary messages
    pub fn verb_phrase(&self) -> &'static str {
        match self {
            EventType::Like => "liked your post",
            EventType::Comment => "commented on your post",
            EventType::Mention => "mentioned you",
            EventType::Follow => "followed you",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw event submitted by a producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub region: String,
    pub subject_id: String,
    pub event_type: EventType,
    pub actor_id: String,
    /// Unix seconds
    pub timestamp: i64,
}

/// Identity of one aggregation bucket: `(region, subject, event type, window start)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketIdentity {
    pub region: String,
    pub subject_id: String,
    pub event_type: EventType,
    pub window_start: i64,
}

const KEY_PREFIX: &str = "bucket";

impl BucketIdentity {
    pub fn new(
        region: impl Into<String>,
        subject_id: impl Into<String>,
        event_type: EventType,
        window_start: i64,
    ) -> Self {
        Self {
            region: region.into(),
            subject_id: subject_id.into(),
            event_type,
            window_start,
        }
    }

    /// Opaque bucket-store key for this identity
    pub fn key(&self) -> BucketKey {
        BucketKey(format!(
            "{}:{}:{}:{}:{}",
            KEY_PREFIX,
            self.region,
            self.event_type.as_str(),
            self.window_start,
            self.subject_id
        ))
    }

    /// Durable natural key for the notification produced from this bucket
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            region: self.region.clone(),
            subject_id: self.subject_id.clone(),
            event_type: self.event_type,
            window_start: self.window_start,
        }
    }
}

impl fmt::Display for BucketIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}@{}",
            self.region, self.subject_id, self.event_type, self.window_start
        )
    }
}

/// Bucket-store key: `bucket:{region}:{event_type}:{window_start}:{subject_id}`
///
/// The subject comes last so subject ids may contain `:`. Region codes never do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey(String);

impl BucketKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix shared by every key of one region
    pub fn region_prefix(region: &str) -> String {
        format!("{}:{}:", KEY_PREFIX, region)
    }

    /// Wraps a raw key read back from a store.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        BucketKey(raw.into())
    }

    /// Recover the identity tuple. Returns None for keys this crate did not write.
    pub fn parse(&self) -> Option<BucketIdentity> {
        let mut parts = self.0.splitn(5, ':');
        if parts.next()? != KEY_PREFIX {
            return None;
        }
        let region = parts.next()?;
        let event_type = EventType::from_str(parts.next()?)?;
        let window_start = parts.next()?.parse().ok()?;
        let subject_id = parts.next()?;
        if region.is_empty() || subject_id.is_empty() {
            return None;
        }
        Some(BucketIdentity::new(region, subject_id, event_type, window_start))
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fields applied by one `record()` call
#[derive(Debug, Clone)]
pub struct BucketIncrement {
    pub actor_id: String,
    pub at: i64,
    pub window_length: i64,
    pub sample_cap: usize,
}

/// Accumulated state of one bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSnapshot {
    pub count: u64,
    /// Distinct actors in first-seen order, capped
    pub sample_actor_ids: Vec<String>,
    pub window_start: i64,
    pub window_length: i64,
    pub last_updated_at: i64,
}

impl BucketSnapshot {
    pub fn closes_at(&self) -> i64 {
        self.window_start + self.window_length
    }
}

/// Business identity that suppresses duplicate durable writes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    pub region: String,
    pub subject_id: String,
    pub event_type: EventType,
    pub window_start: i64,
}

/// Content written for a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    pub aggregated_count: u64,
    pub sample_actor_ids: Vec<String>,
    pub message: String,
    pub created_at: i64,
}

/// Read state owned by the delivery subsystem after creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Unread,
    Read,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Unread => "unread",
            NotificationStatus::Read => "read",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unread" => Some(NotificationStatus::Unread),
            "read" => Some(NotificationStatus::Read),
            _ => None,
        }
    }
}

/// Durable, user-visible notification row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub region: String,
    pub subject_id: String,
    pub event_type: EventType,
    pub window_start: i64,
    pub aggregated_count: u64,
    pub sample_actor_ids: Vec<String>,
    pub message: String,
    pub created_at: i64,
    pub status: NotificationStatus,
}
