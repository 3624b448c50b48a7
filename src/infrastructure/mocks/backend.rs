//! In-memory cache backend for testing the delegating storage adapter.

use crate::application::ports::{CacheBackend, StorageError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock external cache.
///
/// Keeps values in a map and records the TTL of every `put`. Backend TTLs are
/// not enforced here; the adapter under test must do its own expiry checks.
/// Failures can be switched on to simulate an outage.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    inner: Arc<MockBackendInner>,
}

#[derive(Debug, Default)]
struct MockBackendInner {
    entries: Mutex<HashMap<String, (Vec<u8>, Duration)>>,
    failing: AtomicBool,
    puts: AtomicUsize,
}

impl MockBackend {
    /// Create an empty, healthy backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Overwrite a raw value, bypassing the adapter.
    pub fn insert_raw(&self, key: &str, value: Vec<u8>) {
        self.entries()
            .insert(key.to_string(), (value, Duration::from_secs(60)));
    }

    /// TTL passed with the last `put` of `key`.
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.entries().get(key).map(|(_, ttl)| *ttl)
    }

    /// Keys currently held.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of successful `put` calls.
    pub fn put_count(&self) -> usize {
        self.inner.puts.load(Ordering::SeqCst)
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Vec<u8>, Duration)>> {
        self.inner
            .entries
            .lock()
            .expect("MockBackend mutex poisoned - a test thread panicked while holding the lock")
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(StorageError::backend("mock backend unavailable"));
        }
        Ok(())
    }
}

impl CacheBackend for MockBackend {
    fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StorageError> {
        self.check()?;
        self.entries().insert(key.to_string(), (value, ttl));
        self.inner.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.check()?;
        Ok(self.entries().get(key).map(|(value, _)| value.clone()))
    }

    fn forget(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.entries().remove(key);
        Ok(())
    }
}
