//! Tumbling window policy
//!
//! Every event maps to exactly one fixed-length window:
//! `window_start = floor(timestamp / length) * length`. A window is closed once
//! `now >= window_start + length`.

use super::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    length_secs: i64,
    close_grace_secs: i64,
}

impl WindowPolicy {
    pub fn new(length_secs: i64) -> Result<Self> {
        Self::with_grace(length_secs, 0)
    }

    /// `close_grace_secs` delays flushing past the window end, narrowing the
    /// race with late increments on a bucket being flushed.
    pub fn with_grace(length_secs: i64, close_grace_secs: i64) -> Result<Self> {
        if length_secs <= 0 {
            return Err(Error::config(format!(
                "window length must be positive, got {}s",
                length_secs
            )));
        }
        if close_grace_secs < 0 {
            return Err(Error::config(format!(
                "close grace must not be negative, got {}s",
                close_grace_secs
            )));
        }
        Ok(Self {
            length_secs,
            close_grace_secs,
        })
    }

    pub fn length_secs(&self) -> i64 {
        self.length_secs
    }

    pub fn window_start(&self, timestamp: i64) -> i64 {
        // div_euclid floors for pre-epoch timestamps too
        timestamp.div_euclid(self.length_secs) * self.length_secs
    }

    pub fn closes_at(&self, window_start: i64) -> i64 {
        window_start + self.length_secs
    }

    pub fn is_closed(&self, window_start: i64, now: i64) -> bool {
        now >= self.closes_at(window_start) + self.close_grace_secs
    }

    /// Largest window start that is eligible for flush at `now`
    pub fn close_cutoff(&self, now: i64) -> i64 {
        now - self.length_secs - self.close_grace_secs
    }
}
