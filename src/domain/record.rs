//! Records held by the storage port.

use crate::domain::signature::RequestSignature;
use crate::domain::window::{expiry_after, is_expired_at, remaining_until};
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode, Version};
use std::time::{Duration, SystemTime};

/// Request counter for one rule of one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterRecord {
    /// Host pattern the counter belongs to
    pub host: String,
    /// Rule key within the host
    pub key: String,
    /// Requests counted in the current window
    pub request_count: u64,
    /// Time left in the window when the record was read
    pub remaining: Duration,
    /// End of the window
    pub expires_at: SystemTime,
}

impl CounterRecord {
    /// Build a record as seen at `now`.
    pub fn new(
        host: &str,
        key: &str,
        request_count: u64,
        expires_at: SystemTime,
        now: SystemTime,
    ) -> Self {
        Self {
            host: host.to_string(),
            key: key.to_string(),
            request_count,
            remaining: remaining_until(expires_at, now),
            expires_at,
        }
    }
}

/// A response stored for later reuse.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// Signature of the request that produced the response
    pub signature: RequestSignature,
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// When the response was stored
    pub stored_at: SystemTime,
    /// When the entry stops being served
    pub expires_at: SystemTime,
}

impl CachedResponse {
    /// Capture a response for storage.
    pub fn from_response(
        signature: RequestSignature,
        response: &Response<Bytes>,
        stored_at: SystemTime,
        ttl: Duration,
    ) -> Self {
        Self {
            signature,
            status: response.status(),
            version: response.version(),
            headers: response.headers().clone(),
            body: response.body().clone(),
            stored_at,
            expires_at: expiry_after(stored_at, ttl),
        }
    }

    /// Whether the entry is gone at `now`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        is_expired_at(self.expires_at, now)
    }

    /// Rebuild an `http::Response` from the stored parts.
    pub fn to_response(&self) -> Response<Bytes> {
        let mut response = Response::new(self.body.clone());
        *response.status_mut() = self.status;
        *response.version_mut() = self.version;
        *response.headers_mut() = self.headers.clone();
        response
    }

    /// Consume the entry into an `http::Response`.
    pub fn into_response(self) -> Response<Bytes> {
        let mut response = Response::new(self.body);
        *response.status_mut() = self.status;
        *response.version_mut() = self.version;
        *response.headers_mut() = self.headers;
        response
    }
}
