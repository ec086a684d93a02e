//! Pipeline configuration from environment variables

use super::aggregator::{AggregatorSettings, DEFAULT_SCAN_PAGE_SIZE};
use super::error::{Error, Result};
use super::scheduler::SchedulerConfig;
use super::windows::WindowPolicy;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the digest worker
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Region codes, in flush order
    pub regions: Vec<String>,

    /// Directory holding one SQLite database per region
    pub db_dir: PathBuf,

    /// Tumbling window length in seconds
    pub window_secs: i64,

    /// Flush pass interval in milliseconds (must not exceed the window)
    pub flush_interval_ms: u64,

    /// Distinct actors kept per bucket
    pub sample_cap: usize,

    /// Bucket safety TTL, in window lengths
    pub bucket_ttl_windows: i64,

    /// Extra seconds a window stays open past its end before flush
    pub close_grace_secs: i64,

    /// Flush regions in parallel within a pass
    pub concurrent_regions: bool,

    /// How long shutdown waits for an in-flight pass
    pub shutdown_drain_ms: u64,

    /// Channel buffer size for event ingestion
    pub channel_buffer: usize,
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `DIGEST_REGIONS` (default: us-east,eu-west)
    /// - `DIGEST_DB_DIR` (default: /var/lib/digestflow)
    /// - `DIGEST_WINDOW_SECS` (default: 120)
    /// - `DIGEST_FLUSH_INTERVAL_MS` (default: 30000)
    /// - `DIGEST_SAMPLE_CAP` (default: 5)
    /// - `DIGEST_BUCKET_TTL_WINDOWS` (default: 5)
    /// - `DIGEST_CLOSE_GRACE_SECS` (default: 0)
    /// - `DIGEST_CONCURRENT_REGIONS` (default: false)
    /// - `DIGEST_SHUTDOWN_DRAIN_MS` (default: 10000)
    /// - `DIGEST_CHANNEL_BUFFER` (default: 10000)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source and validate
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let regions = lookup("DIGEST_REGIONS")
            .unwrap_or_else(|| "us-east,eu-west".to_string())
            .split(',')
            .map(|code| code.trim().to_string())
            .filter(|code| !code.is_empty())
            .collect();

        let config = Self {
            regions,
            db_dir: lookup("DIGEST_DB_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/var/lib/digestflow")),
            window_secs: parse_var(&lookup, "DIGEST_WINDOW_SECS", 120)?,
            flush_interval_ms: parse_var(&lookup, "DIGEST_FLUSH_INTERVAL_MS", 30_000)?,
            sample_cap: parse_var(&lookup, "DIGEST_SAMPLE_CAP", 5)?,
            bucket_ttl_windows: parse_var(&lookup, "DIGEST_BUCKET_TTL_WINDOWS", 5)?,
            close_grace_secs: parse_var(&lookup, "DIGEST_CLOSE_GRACE_SECS", 0)?,
            concurrent_regions: parse_var(&lookup, "DIGEST_CONCURRENT_REGIONS", false)?,
            shutdown_drain_ms: parse_var(&lookup, "DIGEST_SHUTDOWN_DRAIN_MS", 10_000)?,
            channel_buffer: parse_var(&lookup, "DIGEST_CHANNEL_BUFFER", 10_000)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.regions.is_empty() {
            return Err(Error::config("DIGEST_REGIONS lists no regions"));
        }
        if self.window_secs <= 0 {
            return Err(Error::config("DIGEST_WINDOW_SECS must be positive"));
        }
        if self.flush_interval_ms == 0 {
            return Err(Error::config("DIGEST_FLUSH_INTERVAL_MS must be positive"));
        }
        if self.flush_interval_ms > self.window_secs as u64 * 1_000 {
            return Err(Error::config(format!(
                "flush interval {}ms exceeds window length {}s",
                self.flush_interval_ms, self.window_secs
            )));
        }
        if self.sample_cap == 0 {
            return Err(Error::config("DIGEST_SAMPLE_CAP must be at least 1"));
        }
        if self.bucket_ttl_windows < 2 {
            return Err(Error::config(
                "DIGEST_BUCKET_TTL_WINDOWS must be at least 2 window lengths",
            ));
        }
        if self.close_grace_secs < 0 {
            return Err(Error::config("DIGEST_CLOSE_GRACE_SECS must not be negative"));
        }
        if self.channel_buffer == 0 {
            return Err(Error::config("DIGEST_CHANNEL_BUFFER must be positive"));
        }
        Ok(())
    }

    pub fn window_policy(&self) -> Result<WindowPolicy> {
        WindowPolicy::with_grace(self.window_secs, self.close_grace_secs)
    }

    pub fn aggregator_settings(&self) -> Result<AggregatorSettings> {
        Ok(AggregatorSettings {
            window: self.window_policy()?,
            sample_cap: self.sample_cap,
            bucket_ttl_windows: self.bucket_ttl_windows,
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
        })
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            concurrent_regions: self.concurrent_regions,
        }
    }

    /// SQLite file for one region
    pub fn db_path_for(&self, region: &str) -> PathBuf {
        self.db_dir.join(format!("{}.db", region))
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::config(format!("{} has invalid value {:?}", name, raw))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<PipelineConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_config() {
        // Test: Default configuration when no env vars set
        let config = config_from(&[]).unwrap();

        assert_eq!(config.regions, vec!["us-east", "eu-west"]);
        assert_eq!(config.db_dir, PathBuf::from("/var/lib/digestflow"));
        assert_eq!(config.window_secs, 120);
        assert_eq!(config.flush_interval_ms, 30_000);
        assert_eq!(config.sample_cap, 5);
        assert_eq!(config.bucket_ttl_windows, 5);
        assert_eq!(config.close_grace_secs, 0);
        assert!(!config.concurrent_regions);
        assert_eq!(config.shutdown_drain_ms, 10_000);
        assert_eq!(config.channel_buffer, 10_000);
    }

    #[test]
    fn test_custom_config() {
        // Test: Custom configuration from env vars
        let config = config_from(&[
            ("DIGEST_REGIONS", " us , ap-south ,, eu "),
            ("DIGEST_DB_DIR", "/tmp/digest"),
            ("DIGEST_WINDOW_SECS", "60"),
            ("DIGEST_FLUSH_INTERVAL_MS", "60000"),
            ("DIGEST_CONCURRENT_REGIONS", "true"),
        ])
        .unwrap();

        assert_eq!(config.regions, vec!["us", "ap-south", "eu"]);
        assert_eq!(config.db_path_for("us"), PathBuf::from("/tmp/digest/us.db"));
        assert_eq!(config.window_secs, 60);
        assert!(config.scheduler_config().concurrent_regions);
        assert_eq!(
            config.scheduler_config().flush_interval,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_interval_longer_than_window_rejected() {
        let err = config_from(&[
            ("DIGEST_WINDOW_SECS", "60"),
            ("DIGEST_FLUSH_INTERVAL_MS", "60001"),
        ])
        .unwrap_err();

        assert!(matches!(err, Error::FatalConfig { .. }));
    }

    #[test]
    fn test_malformed_values_rejected() {
        assert!(config_from(&[("DIGEST_WINDOW_SECS", "two minutes")]).is_err());
        assert!(config_from(&[("DIGEST_REGIONS", " , ")]).is_err());
        assert!(config_from(&[("DIGEST_SAMPLE_CAP", "0")]).is_err());
        assert!(config_from(&[("DIGEST_BUCKET_TTL_WINDOWS", "1")]).is_err());
        assert!(config_from(&[("DIGEST_CONCURRENT_REGIONS", "yes")]).is_err());
    }
}
