//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::application::config::CacheConfig;
use crate::domain::record::{CachedResponse, CounterRecord};
use crate::domain::signature::RequestSignature;
use crate::domain::window::WindowState;
use bytes::Bytes;
use http::Response;
use std::fmt::Debug;
use std::time::{Duration, SystemTime};

/// Error type used for failures of injected collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error raised by a storage adapter.
///
/// Expired or missing entries are never errors; they are reported as `None`.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The external cache backend failed
    #[error("cache backend failure: {0}")]
    Backend(#[source] BoxError),
    /// A value could not be encoded for the backend
    #[error("failed to encode stored value: {0}")]
    Encode(#[from] bincode::Error),
}

impl StorageError {
    /// Wrap any backend error.
    pub fn backend(error: impl Into<BoxError>) -> Self {
        StorageError::Backend(error.into())
    }
}

/// Port for obtaining current time.
///
/// Wall-clock time is used so that expiry instants can be persisted by an
/// external backend and read back by another process.
/// Infrastructure provides concrete implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Get the current time.
    fn now(&self) -> SystemTime;
}

/// Port for request counters and cached responses.
///
/// Counters are addressed by `(host, key)`, responses by request signature.
/// Implementations must treat an expired entry exactly like a missing one and
/// must never expose a partially written record to a concurrent reader.
pub trait Storage: Send + Sync + Debug {
    /// Store the request count for `(host, key)` for the lifetime of `window`.
    fn save_counter(
        &self,
        host: &str,
        key: &str,
        count: u64,
        window: &WindowState,
    ) -> Result<(), StorageError>;

    /// Get the live counter for `(host, key)`.
    fn get_counter(&self, host: &str, key: &str) -> Result<Option<CounterRecord>, StorageError>;

    /// Store a response under `signature` using the configured TTL.
    ///
    /// Does nothing when the body is empty and `allow_empty` is disabled.
    fn save_response(
        &self,
        signature: &RequestSignature,
        response: &Response<Bytes>,
    ) -> Result<(), StorageError>;

    /// Get the live response stored under `signature`.
    fn get_response(
        &self,
        signature: &RequestSignature,
    ) -> Result<Option<CachedResponse>, StorageError>;

    /// The cache configuration this adapter was built with.
    fn cache_config(&self) -> &CacheConfig;
}

/// Port for an external key-value cache with TTL support.
///
/// This is the collaborator behind [`BackendStorage`](crate::BackendStorage).
/// The backend only sees opaque byte values; serialization and expiry
/// bookkeeping stay in the adapter.
pub trait CacheBackend: Send + Sync + Debug {
    /// Store `value` under `key` for `ttl`.
    fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StorageError>;

    /// Read the value under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Remove the value under `key`.
    fn forget(&self, key: &str) -> Result<(), StorageError>;
}
