//! digestflow - time-windowed notification digests
//!
//! Absorbs high-volume, low-value events ("like", "comment") into per-window
//! buckets and periodically flushes each closed bucket into one durable
//! summary notification per region.

pub mod pipeline;
