//! # Windowed Digest Pipeline
//!
//! Condenses high-volume, low-value events into one summary notification per
//! subject and window.
//!
//! ## Architecture
//!
//! **Key Principle:** Raw events are NEVER persisted individually.
//!
//! Instead:
//! 1. Producers call `Aggregator::record()` (or feed the ingestion channel)
//! 2. Each event lands in the bucket for `(region, subject, event type, window)`
//! 3. A periodic pass lists closed buckets in every region
//! 4. Each closed bucket becomes exactly one durable notification
//! 5. The bucket is deleted, or expires by TTL if the flush never runs
//!
//! Regions are independent failure domains: one region's outage never stops
//! another region's flush.
//!
//! ## Module Organization
//!
//! - `types` - Event, bucket identity/snapshot, notification
//! - `windows` - Tumbling window policy
//! - `bucket_store` - Ephemeral bucket store trait + in-memory store
//! - `aggregator` - record / list closed buckets
//! - `message` - Summary phrasing
//! - `db` - Durable notification store (SQLite)
//! - `flush` - Idempotent flush of one bucket
//! - `scheduler` - Periodic flush passes across regions
//! - `region` - Region registry
//! - `ingestion` - Channel-fed event recording
//! - `config` - Environment configuration

pub mod aggregator;
pub mod bucket_store;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod flush;
pub mod ingestion;
pub mod message;
pub mod region;
pub mod scheduler;
pub mod types;
pub mod windows;

// Re-export commonly used types
pub use aggregator::{Aggregator, AggregatorSettings, ClosedBucketScan};
pub use bucket_store::{BucketStore, DeleteOutcome, InMemoryBucketStore, ScanPage};
pub use clock::{system_clock, Clock, ManualClock};
pub use config::PipelineConfig;
pub use db::{NotificationStore, SqliteNotificationStore, UpsertOutcome};
pub use error::{Error, Result};
pub use flush::{FlushExecutor, FlushOutcome};
pub use region::{Region, RegionHandles, RegionRegistry};
pub use scheduler::{FlushScheduler, PassReport, RegionReport, SchedulerConfig};
pub use types::{BucketIdentity, BucketKey, BucketSnapshot, Event, EventType, Notification};
pub use windows::WindowPolicy;
