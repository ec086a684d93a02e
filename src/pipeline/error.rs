//! Error types for the digest pipeline.
//!
//! "Bucket gone" and "duplicate notification" are not errors here: the flush
//! path reports them as successful [`FlushOutcome`](super::flush::FlushOutcome)
//! variants.

use std::fmt;

/// The result type used throughout the pipeline.
pub type Result<T> = std::result::Result<T, Error>;

/// Which store a transient failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Ephemeral bucket store.
    Bucket,
    /// Regional durable notification store.
    Durable,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Bucket => write!(f, "bucket store"),
            StoreKind::Durable => write!(f, "durable store"),
        }
    }
}

/// Errors that can occur while recording or flushing events.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network, timeout or I/O failure on a store. Retried on the next tick.
    #[error("{store} error: {message}")]
    TransientStore {
        /// The store that failed.
        store: StoreKind,
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A whole region could not be scanned during a pass.
    #[error("region {region} unavailable: {reason}")]
    RegionUnavailable {
        /// Region code.
        region: String,
        /// Why the region was skipped.
        reason: String,
    },

    /// An event or bucket named a region the registry does not know.
    #[error("unknown region: {region}")]
    UnknownRegion {
        /// Region code that failed to resolve.
        region: String,
    },

    /// Malformed configuration. The process must not start.
    #[error("invalid configuration: {message}")]
    FatalConfig {
        /// Description of the problem.
        message: String,
    },
}

impl Error {
    /// Creates a bucket-store failure without an underlying cause.
    pub fn bucket_store(message: impl Into<String>) -> Self {
        Error::TransientStore {
            store: StoreKind::Bucket,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a durable-store failure without an underlying cause.
    pub fn durable_store(message: impl Into<String>) -> Self {
        Error::TransientStore {
            store: StoreKind::Durable,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::FatalConfig {
            message: message.into(),
        }
    }

    /// Returns true for errors that the next scheduled pass may clear.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::TransientStore { .. } | Error::RegionUnavailable { .. }
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::TransientStore {
            store: StoreKind::Durable,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::TransientStore {
            store: StoreKind::Durable,
            message: format!("serialization: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::bucket_store("timeout").is_transient());
        assert!(Error::RegionUnavailable {
            region: "eu-west".to_string(),
            reason: "connection refused".to_string(),
        }
        .is_transient());
        assert!(!Error::config("no regions").is_transient());
        assert!(!Error::UnknownRegion {
            region: "mars".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_display_names_store() {
        let err = Error::durable_store("disk full");
        assert_eq!(err.to_string(), "durable store error: disk full");
    }
}
