//! Redis cache backend.
//!
//! Lets several application instances share counters and cached responses by
//! plugging Redis into [`BackendStorage`](crate::BackendStorage).
//!
//! ## Architecture
//!
//! - Values are opaque bytes written with `SET ... EX`
//! - Connection pooling via `redis::aio::ConnectionManager`
//! - The [`CacheBackend`] port is synchronous, so calls are driven with
//!   `block_in_place` on a multi-threaded tokio runtime, or on a temporary
//!   runtime when no runtime is running
//!
//! Calling from inside a current-thread runtime is not supported;
//! `block_in_place` panics there.
//!
//! ## Example
//!
//! ```rust,ignore
//! use advanced_throttle::{BackendStorage, CacheConfig, RedisBackend};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = RedisBackend::connect("redis://127.0.0.1/")
//!         .await
//!         .expect("Failed to connect to Redis");
//!
//!     let storage = BackendStorage::new(Arc::new(backend), CacheConfig::default());
//! }
//! ```

use crate::application::ports::{CacheBackend, StorageError};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// [`CacheBackend`] talking to a Redis server.
#[derive(Clone)]
pub struct RedisBackend {
    connection: ConnectionManager,
}

impl fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBackend").finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Connect to Redis.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1/")
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }

    /// Delete every key starting with `prefix`. Returns how many were removed.
    pub async fn clear_prefix(&self, prefix: &str) -> Result<usize, RedisError> {
        let pattern = format!("{}*", prefix);
        let mut conn = self.connection.clone();
        let mut cursor = 0u64;
        let mut removed = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                removed += conn.del::<_, usize>(&keys).await?;
            }

            if next == 0 {
                return Ok(removed);
            }
            cursor = next;
        }
    }

    /// Drive a Redis future to completion from synchronous code.
    fn block_on<T, F>(&self, future: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            tokio::task::block_in_place(|| handle.block_on(future)).map_err(StorageError::backend)
        } else {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(StorageError::backend)?;
            rt.block_on(future).map_err(StorageError::backend)
        }
    }
}

impl CacheBackend for RedisBackend {
    fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let ttl_secs = ttl.as_secs().max(1);
        self.block_on(async move { conn.set_ex::<_, _, ()>(key, value, ttl_secs).await })
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let mut conn = self.connection.clone();
        self.block_on(async move { conn.get::<_, Option<Vec<u8>>>(key).await })
    }

    fn forget(&self, key: &str) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        self.block_on(async move { conn.del::<_, ()>(key).await })
    }
}
