//! In-process storage adapter.
//!
//! Keeps counters and cached responses in concurrent sharded maps for the
//! lifetime of the process. Nothing is persisted.

use crate::application::config::CacheConfig;
use crate::application::ports::{Clock, Storage, StorageError};
use crate::domain::record::{CachedResponse, CounterRecord};
use crate::domain::signature::RequestSignature;
use crate::domain::window::{is_expired_at, WindowState};
use crate::infrastructure::clock::SystemClock;
use bytes::Bytes;
use dashmap::DashMap;
use http::Response;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Response lifetime used when the configuration leaves `ttl` unset.
pub const DEFAULT_MEMORY_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
struct StoredCounter {
    count: u64,
    expires_at: SystemTime,
}

/// Thread-safe in-memory storage backed by DashMap.
///
/// DashMap provides fine-grained locking per shard, so a reader never sees a
/// half-written entry and unrelated keys do not contend. Expired entries are
/// dropped lazily when they are read, or in bulk with
/// [`purge_expired`](Self::purge_expired).
#[derive(Debug)]
pub struct MemoryStorage {
    counters: DashMap<(String, String), StoredCounter>,
    responses: DashMap<RequestSignature, CachedResponse>,
    config: CacheConfig,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryStorage {
    /// Create storage with the default configuration and the system clock.
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Create storage with a custom configuration.
    pub fn with_config(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Create storage reading time from `clock`.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let ttl = config.ttl_or(DEFAULT_MEMORY_TTL);
        Self {
            counters: DashMap::new(),
            responses: DashMap::new(),
            config,
            ttl,
            clock,
        }
    }

    /// Lifetime given to stored responses.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of counters held, including expired ones not yet purged.
    pub fn counter_len(&self) -> usize {
        self.counters.len()
    }

    /// Number of responses held, including expired ones not yet purged.
    pub fn response_len(&self) -> usize {
        self.responses.len()
    }

    /// Drop every expired counter and response. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.counters.len() + self.responses.len();

        self.counters
            .retain(|_, counter| !is_expired_at(counter.expires_at, now));
        self.responses.retain(|_, response| !response.is_expired(now));

        before.saturating_sub(self.counters.len() + self.responses.len())
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.counters.clear();
        self.responses.clear();
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn save_counter(
        &self,
        host: &str,
        key: &str,
        count: u64,
        window: &WindowState,
    ) -> Result<(), StorageError> {
        self.counters.insert(
            (host.to_string(), key.to_string()),
            StoredCounter {
                count,
                expires_at: window.expires_at(),
            },
        );
        Ok(())
    }

    fn get_counter(&self, host: &str, key: &str) -> Result<Option<CounterRecord>, StorageError> {
        let now = self.clock.now();
        let map_key = (host.to_string(), key.to_string());

        let stored = match self.counters.get(&map_key) {
            Some(entry) => *entry.value(),
            None => return Ok(None),
        };

        if is_expired_at(stored.expires_at, now) {
            self.counters
                .remove_if(&map_key, |_, counter| is_expired_at(counter.expires_at, now));
            return Ok(None);
        }

        Ok(Some(CounterRecord::new(
            host,
            key,
            stored.count,
            stored.expires_at,
            now,
        )))
    }

    fn save_response(
        &self,
        signature: &RequestSignature,
        response: &Response<Bytes>,
    ) -> Result<(), StorageError> {
        if response.body().is_empty() && !self.config.allow_empty {
            tracing::debug!(%signature, "Not caching response with empty body");
            return Ok(());
        }

        let cached =
            CachedResponse::from_response(signature.clone(), response, self.clock.now(), self.ttl);
        self.responses.insert(signature.clone(), cached);
        Ok(())
    }

    fn get_response(
        &self,
        signature: &RequestSignature,
    ) -> Result<Option<CachedResponse>, StorageError> {
        let now = self.clock.now();

        let cached = match self.responses.get(signature) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };

        if cached.is_expired(now) {
            self.responses
                .remove_if(signature, |_, response| response.is_expired(now));
            return Ok(None);
        }

        Ok(Some(cached))
    }

    fn cache_config(&self) -> &CacheConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockClock;

    fn storage(config: CacheConfig) -> (MemoryStorage, MockClock) {
        let clock = MockClock::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        (MemoryStorage::with_clock(config, Arc::new(clock.clone())), clock)
    }

    fn response(body: &'static str) -> Response<Bytes> {
        Response::new(Bytes::from_static(body.as_bytes()))
    }

    #[test]
    fn test_default_ttl() {
        assert_eq!(MemoryStorage::new().ttl(), DEFAULT_MEMORY_TTL);
        assert_eq!(
            MemoryStorage::with_config(CacheConfig::default().with_ttl(Duration::from_secs(5)))
                .ttl(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_expired_counter_is_removed_on_read() {
        let (storage, clock) = storage(CacheConfig::default());
        let window = WindowState::start(Duration::from_secs(10), clock.now());

        storage.save_counter("test", "key", 4, &window).unwrap();
        assert_eq!(storage.counter_len(), 1);

        clock.advance(Duration::from_secs(10));
        assert!(storage.get_counter("test", "key").unwrap().is_none());
        assert_eq!(storage.counter_len(), 0);
    }

    #[test]
    fn test_counters_are_scoped_by_host_and_key() {
        let (storage, clock) = storage(CacheConfig::default());
        let window = WindowState::start(Duration::from_secs(10), clock.now());

        storage.save_counter("a", "key", 1, &window).unwrap();
        storage.save_counter("b", "key", 2, &window).unwrap();

        assert_eq!(
            storage.get_counter("a", "key").unwrap().unwrap().request_count,
            1
        );
        assert_eq!(
            storage.get_counter("b", "key").unwrap().unwrap().request_count,
            2
        );
        assert!(storage.get_counter("a", "other").unwrap().is_none());
    }

    #[test]
    fn test_purge_expired() {
        let (storage, clock) = storage(CacheConfig::default().with_ttl(Duration::from_secs(30)));
        let short = WindowState::start(Duration::from_secs(10), clock.now());
        let long = WindowState::start(Duration::from_secs(60), clock.now());

        storage.save_counter("test", "short", 1, &short).unwrap();
        storage.save_counter("test", "long", 1, &long).unwrap();
        storage
            .save_response(&RequestSignature::from_hex("a"), &response("body"))
            .unwrap();

        clock.advance(Duration::from_secs(45));
        assert_eq!(storage.purge_expired(), 2);
        assert_eq!(storage.counter_len(), 1);
        assert_eq!(storage.response_len(), 0);
    }

    #[test]
    fn test_empty_body_skipped_by_default() {
        let (storage, _clock) = storage(CacheConfig::default());

        storage
            .save_response(&RequestSignature::from_hex("a"), &response(""))
            .unwrap();

        assert_eq!(storage.response_len(), 0);
    }

    #[test]
    fn test_clear() {
        let (storage, clock) = storage(CacheConfig::default());
        let window = WindowState::start(Duration::from_secs(10), clock.now());
        storage.save_counter("test", "key", 1, &window).unwrap();
        storage
            .save_response(&RequestSignature::from_hex("a"), &response("body"))
            .unwrap();

        storage.clear();
        assert_eq!(storage.counter_len(), 0);
        assert_eq!(storage.response_len(), 0);
    }

    #[test]
    fn test_concurrent_writes_and_reads() {
        use std::thread;

        let storage = Arc::new(MemoryStorage::new());
        let window = WindowState::start(Duration::from_secs(60), SystemTime::now());

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let storage = Arc::clone(&storage);
                thread::spawn(move || {
                    for j in 0..100u64 {
                        let key = format!("key_{}_{}", i, j);
                        storage.save_counter("test", &key, j, &window).unwrap();
                        let record = storage.get_counter("test", &key).unwrap().unwrap();
                        assert_eq!(record.request_count, j);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(storage.counter_len(), 1000);
    }
}
