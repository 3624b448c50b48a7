//! Storage adapter delegating to an external cache backend.
//!
//! ## Architecture
//!
//! The adapter uses a simple key-value model on top of [`CacheBackend`]:
//! - Keys: `{prefix}counter:{host}:{key}` and `{prefix}response:{signature}`
//! - Values: bincode envelopes carrying the payload and its expiry instant
//! - TTL: remaining lifetime rounded up to whole seconds, so the backend can
//!   reclaim space on its own
//!
//! Expiry is always decided by this adapter's clock from the envelope, which
//! keeps the observable behavior identical to [`MemoryStorage`](crate::MemoryStorage)
//! whatever TTL granularity the backend offers.
//!
//! ## Error Handling
//!
//! - Backend failures are returned as [`StorageError::Backend`]
//! - Corrupted payloads are logged, deleted, and reported as a miss

use crate::application::config::CacheConfig;
use crate::application::ports::{CacheBackend, Clock, Storage, StorageError};
use crate::domain::record::{CachedResponse, CounterRecord};
use crate::domain::signature::RequestSignature;
use crate::domain::window::{is_expired_at, remaining_until, WindowState};
use crate::infrastructure::clock::SystemClock;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Response, StatusCode, Version};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Response lifetime used when the configuration leaves `ttl` unset.
pub const DEFAULT_BACKEND_TTL: Duration = Duration::from_secs(900);

/// Serializable timestamp, split like `Duration` to keep full precision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Timestamp {
    secs: u64,
    nanos: u32,
}

impl Timestamp {
    fn from_system_time(time: SystemTime) -> Self {
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        Self {
            secs: since_epoch.as_secs(),
            nanos: since_epoch.subsec_nanos(),
        }
    }

    /// `None` for out-of-range values, which only corrupted payloads contain.
    fn to_system_time(self) -> Option<SystemTime> {
        if self.nanos >= 1_000_000_000 {
            return None;
        }
        UNIX_EPOCH.checked_add(Duration::new(self.secs, self.nanos))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CounterEnvelope {
    count: u64,
    expires_at: Timestamp,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResponseEnvelope {
    status: u16,
    version: String,
    headers: Vec<(String, Vec<u8>)>,
    body: Vec<u8>,
    stored_at: Timestamp,
    expires_at: Timestamp,
}

impl ResponseEnvelope {
    fn from_cached(cached: &CachedResponse) -> Self {
        Self {
            status: cached.status.as_u16(),
            version: format!("{:?}", cached.version),
            headers: cached
                .headers
                .iter()
                .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
                .collect(),
            body: cached.body.to_vec(),
            stored_at: Timestamp::from_system_time(cached.stored_at),
            expires_at: Timestamp::from_system_time(cached.expires_at),
        }
    }

    /// Rebuild the cached response; `None` if any part is malformed.
    fn into_cached(self, signature: RequestSignature) -> Option<CachedResponse> {
        let status = StatusCode::from_u16(self.status).ok()?;
        let version = match self.version.as_str() {
            "HTTP/0.9" => Version::HTTP_09,
            "HTTP/1.0" => Version::HTTP_10,
            "HTTP/1.1" => Version::HTTP_11,
            "HTTP/2.0" => Version::HTTP_2,
            "HTTP/3.0" => Version::HTTP_3,
            _ => return None,
        };

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
            let value = HeaderValue::from_bytes(&value).ok()?;
            headers.append(name, value);
        }

        Some(CachedResponse {
            signature,
            status,
            version,
            headers,
            body: Bytes::from(self.body),
            stored_at: self.stored_at.to_system_time()?,
            expires_at: self.expires_at.to_system_time()?,
        })
    }
}

/// Storage that persists through an injected [`CacheBackend`].
pub struct BackendStorage {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for BackendStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendStorage")
            .field("backend", &self.backend)
            .field("config", &self.config)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl BackendStorage {
    /// Create an adapter over `backend` using the system clock.
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(SystemClock::new()))
    }

    /// Create an adapter reading time from `clock`.
    pub fn with_clock(
        backend: Arc<dyn CacheBackend>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ttl = config.ttl_or(DEFAULT_BACKEND_TTL);
        Self {
            backend,
            config,
            ttl,
            clock,
        }
    }

    /// Lifetime given to stored responses.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Backend key of a counter.
    pub fn counter_key(&self, host: &str, key: &str) -> String {
        format!("{}counter:{}:{}", self.config.key_prefix, host, key)
    }

    /// Backend key of a cached response.
    pub fn response_key(&self, signature: &RequestSignature) -> String {
        format!("{}response:{}", self.config.key_prefix, signature)
    }

    /// Write `value` until `expires_at`, or drop the key if that is already past.
    fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        expires_at: SystemTime,
        now: SystemTime,
    ) -> Result<(), StorageError> {
        let remaining = remaining_until(expires_at, now);
        if remaining.is_zero() {
            return self.backend.forget(key);
        }

        let bytes = bincode::serialize(value)?;
        self.backend.put(key, bytes, backend_ttl(remaining))
    }

    /// Read and decode `key`; corrupted payloads are deleted and read as absent.
    fn fetch<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let Some(bytes) = self.backend.get(key)? else {
            return Ok(None);
        };

        match bincode::deserialize::<T>(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Discarding corrupted cache entry");
                self.forget_quietly(key);
                Ok(None)
            }
        }
    }

    fn forget_quietly(&self, key: &str) {
        if let Err(e) = self.backend.forget(key) {
            tracing::warn!(error = %e, key = %key, "Failed to delete cache entry");
        }
    }
}

/// Whole seconds, rounded up, never below one.
fn backend_ttl(remaining: Duration) -> Duration {
    let mut secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs += 1;
    }
    Duration::from_secs(secs.max(1))
}

impl Storage for BackendStorage {
    fn save_counter(
        &self,
        host: &str,
        key: &str,
        count: u64,
        window: &WindowState,
    ) -> Result<(), StorageError> {
        let envelope = CounterEnvelope {
            count,
            expires_at: Timestamp::from_system_time(window.expires_at()),
        };
        self.put(
            &self.counter_key(host, key),
            &envelope,
            window.expires_at(),
            self.clock.now(),
        )
    }

    fn get_counter(&self, host: &str, key: &str) -> Result<Option<CounterRecord>, StorageError> {
        let backend_key = self.counter_key(host, key);
        let Some(envelope) = self.fetch::<CounterEnvelope>(&backend_key)? else {
            return Ok(None);
        };

        let Some(expires_at) = envelope.expires_at.to_system_time() else {
            tracing::warn!(key = %backend_key, "Discarding malformed counter");
            self.forget_quietly(&backend_key);
            return Ok(None);
        };

        let now = self.clock.now();
        if is_expired_at(expires_at, now) {
            self.forget_quietly(&backend_key);
            return Ok(None);
        }

        Ok(Some(CounterRecord::new(
            host,
            key,
            envelope.count,
            expires_at,
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

        let now = self.clock.now();
        let cached = CachedResponse::from_response(signature.clone(), response, now, self.ttl);
        self.put(
            &self.response_key(signature),
            &ResponseEnvelope::from_cached(&cached),
            cached.expires_at,
            now,
        )
    }

    fn get_response(
        &self,
        signature: &RequestSignature,
    ) -> Result<Option<CachedResponse>, StorageError> {
        let backend_key = self.response_key(signature);
        let Some(envelope) = self.fetch::<ResponseEnvelope>(&backend_key)? else {
            return Ok(None);
        };

        let Some(cached) = envelope.into_cached(signature.clone()) else {
            tracing::warn!(key = %backend_key, "Discarding malformed cached response");
            self.forget_quietly(&backend_key);
            return Ok(None);
        };

        // Left for the backend TTL to reclaim: a concurrent miss may already
        // have stored a fresh response under the same key.
        if cached.is_expired(self.clock.now()) {
            return Ok(None);
        }

        Ok(Some(cached))
    }

    fn cache_config(&self) -> &CacheConfig {
        &self.config
    }
}
