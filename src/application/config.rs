//! Cache configuration.
//!
//! Mirrors the `cache` section of a client configuration document:
//!
//! ```json
//! { "ttl": 900, "allow_empty": false, "key_headers": ["accept"] }
//! ```
//!
//! Storage adapters read the configuration once at construction.

use crate::domain::rule::seconds;
use http::header::HeaderName;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default key prefix used by the backend adapter.
pub const DEFAULT_KEY_PREFIX: &str = "advanced-throttle:";

/// Options for response caching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of cached responses in seconds; `None` uses the adapter default
    #[serde(with = "seconds::option")]
    pub ttl: Option<Duration>,
    /// Store responses with an empty body
    pub allow_empty: bool,
    /// Request headers that take part in the request signature
    pub key_headers: Vec<String>,
    /// Prefix for keys written to an external cache backend
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: None,
            allow_empty: false,
            key_headers: Vec::new(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl CacheConfig {
    /// Set the response TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Allow or refuse storing responses with an empty body.
    pub fn with_allow_empty(mut self, allow_empty: bool) -> Self {
        self.allow_empty = allow_empty;
        self
    }

    /// Include the given request headers in request signatures.
    pub fn with_key_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Set the backend key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// The configured TTL, or `default` when unset.
    pub fn ttl_or(&self, default: Duration) -> Duration {
        self.ttl.unwrap_or(default)
    }

    /// Parse `key_headers` into header names.
    ///
    /// On failure, returns the first entry that is not a valid header name.
    pub fn header_names(&self) -> Result<Vec<HeaderName>, &str> {
        self.key_headers
            .iter()
            .map(|name| HeaderName::from_bytes(name.as_bytes()).map_err(|_| name.as_str()))
            .collect()
    }
}
