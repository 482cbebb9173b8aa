//! Cache-layer error kinds.
//!
//! Read paths downgrade most of these to an absent value at the public
//! boundary; write, delete and destroy paths propagate them so callers know
//! a write did not take effect.

use thiserror::Error;

use crate::store::backend::BackendError;

#[derive(Error, Debug)]
pub enum CacheError {
    /// Unsupported access type, malformed option, or a strategy attached to
    /// the wrong kind of region. Fatal at construction, never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Backend operation '{operation}' failed: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// A second write reached a key cached under a read-only strategy.
    #[error("Can't write to a read-only object in region '{region}'")]
    ReadOnlyViolation { region: String },

    #[error("Region '{0}' has been destroyed")]
    RegionDestroyed(String),

    /// The per-key compare-and-swap kept losing to other writers.
    #[error("Gave up acquiring a soft lock in region '{region}' after repeated contention")]
    LockContention { region: String },
}

impl CacheError {
    /// Wrap a backend failure with the store operation it interrupted.
    pub fn backend(operation: &'static str, source: BackendError) -> Self {
        CacheError::Backend { operation, source }
    }
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
