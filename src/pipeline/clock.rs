//! Injectable wall clock (Unix seconds)

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Timestamp function shared by stores, aggregator and scheduler.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// System time via `chrono::Utc::now()`.
pub fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp())
}

/// Manually advanced clock for deterministic tests and replays.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    pub fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    /// A [`Clock`] reading this manual clock.
    pub fn clock(&self) -> Clock {
        let now = Arc::clone(&self.now);
        Arc::new(move || now.load(Ordering::SeqCst))
    }
}
