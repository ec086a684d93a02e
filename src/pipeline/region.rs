//! Region registry
//!
//! Static, ordered set of independent regions. Each resolves to one bucket
//! store partition and one durable notification store. Built once at startup
//! and never mutated.

use super::bucket_store::BucketStore;
use super::db::NotificationStore;
use super::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Store handles for one region
#[derive(Clone)]
pub struct RegionHandles {
    pub bucket_store: Arc<dyn BucketStore>,
    pub notification_store: Arc<dyn NotificationStore>,
}

/// One configured region
#[derive(Clone)]
pub struct Region {
    pub code: String,
    pub handles: RegionHandles,
}

impl Region {
    pub fn new(
        code: impl Into<String>,
        bucket_store: Arc<dyn BucketStore>,
        notification_store: Arc<dyn NotificationStore>,
    ) -> Self {
        Self {
            code: code.into(),
            handles: RegionHandles {
                bucket_store,
                notification_store,
            },
        }
    }
}

pub struct RegionRegistry {
    order: Vec<String>,
    handles: HashMap<String, RegionHandles>,
}

impl RegionRegistry {
    /// Validate and freeze the region list
    ///
    /// Fails with `FatalConfig` on an empty list, duplicate codes, or codes
    /// outside `[a-z0-9_-]` (codes are embedded in bucket keys).
    pub fn new(regions: Vec<Region>) -> Result<Self> {
        if regions.is_empty() {
            return Err(Error::config("at least one region must be configured"));
        }

        let mut order = Vec::with_capacity(regions.len());
        let mut handles = HashMap::with_capacity(regions.len());

        for region in regions {
            validate_code(&region.code)?;
            if handles.contains_key(&region.code) {
                return Err(Error::config(format!(
                    "duplicate region code: {}",
                    region.code
                )));
            }
            order.push(region.code.clone());
            handles.insert(region.code, region.handles);
        }

        Ok(Self { order, handles })
    }

    /// Region codes in configured order
    pub fn regions(&self) -> &[String] {
        &self.order
    }

    pub fn handles_for(&self, region: &str) -> Result<&RegionHandles> {
        self.handles.get(region).ok_or_else(|| Error::UnknownRegion {
            region: region.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

fn validate_code(code: &str) -> Result<()> {
    let valid = !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::config(format!("invalid region code: {:?}", code)))
    }
}
