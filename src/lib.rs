//! # advanced-throttle
//!
//! Per-host rate limiting and response caching for outgoing HTTP requests.
//!
//! A [`Ruleset`] sits between your code and your HTTP client. Every request
//! goes through a cache strategy and, when a fresh response is needed, through
//! the host's rate limit rules before your forward callback sends it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use advanced_throttle::{Rule, Ruleset, ThrottleError};
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let ruleset = Ruleset::builder()
//!     .rules(
//!         "https://api.example.com",
//!         vec![
//!             Rule::new(20, Duration::from_secs(1))?,
//!             Rule::new(600, Duration::from_secs(60))?,
//!         ],
//!     )
//!     .cache_strategy("cache")
//!     .build()?;
//!
//! let request = Request::get("https://api.example.com/users")
//!     .body(Bytes::new())?;
//!
//! let result = ruleset
//!     .cache(request, |_request| async move {
//!         // Send the request with your HTTP client here.
//!         Ok::<_, std::io::Error>(Response::new(Bytes::from_static(b"[]")))
//!     })
//!     .await;
//!
//! match result {
//!     Ok(response) => println!("status: {}", response.status()),
//!     Err(ThrottleError::TooManyRequests { host, retry_after }) => {
//!         println!("{host} is busy, retry in {retry_after:?}");
//!     }
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Rules
//!
//! A [`Rule`] allows at most `max_requests` requests per `request_interval`.
//! All rules of a host must allow a request for it to be sent, and a denied
//! request does not count against any rule. Hosts without rules are never
//! limited.
//!
//! Rules can also be loaded from a JSON document, e.g. a configuration file:
//!
//! ```rust
//! use advanced_throttle::Ruleset;
//! use serde_json::json;
//!
//! let ruleset = Ruleset::builder()
//!     .rules_from_value(json!({
//!         "api.example.com": [{ "max_requests": 100, "request_interval": 60 }]
//!     }))
//!     .build()
//!     .unwrap();
//! ```
//!
//! Keys must be host names; a JSON array or a numeric key is rejected with
//! [`ConfigError::HostNotDefined`].
//!
//! ## Cache Strategies
//!
//! - **`no-cache`** (default): every request is forwarded
//! - **`cache`**: a live stored response is returned without forwarding;
//!   otherwise the request is forwarded and its response stored
//! - **`force-cache`**: every request is forwarded and its response stored;
//!   when the rate limit is reached, the stored response is returned instead
//!
//! Responses served from storage never consume request budget.
//!
//! ## Storage
//!
//! - **`memory`** (default, alias `array`): [`MemoryStorage`], in-process,
//!   response TTL 300s
//! - **`backend`**: [`BackendStorage`] over any [`CacheBackend`], response TTL
//!   900s. With the `redis-storage` feature, `RedisBackend` shares state
//!   between processes.
//!
//! Both read [`CacheConfig`] for the response TTL, whether empty bodies are
//! cached, which request headers are part of the cache key, and the key prefix.
//!
//! ## Observability
//!
//! Storage faults never fail a request on their own: they are logged with
//! `tracing` at `WARN` and counted in [`Metrics`].
//!
//! ```rust,no_run
//! # use advanced_throttle::Ruleset;
//! # let ruleset = Ruleset::builder().build().unwrap();
//! let snapshot = ruleset.metrics().snapshot();
//! println!("denied: {}", snapshot.requests_denied);
//! println!("hit rate: {:.2}%", snapshot.hit_rate() * 100.0);
//! ```

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    record::{CachedResponse, CounterRecord},
    rule::{HostError, HostPattern, Rule, RuleError},
    signature::RequestSignature,
    window::WindowState,
};

pub use application::{
    config::CacheConfig,
    error::{ConfigError, ThrottleError},
    limiter::{LimitDecision, RequestLimitGroup, RequestLimiter, RuleCheck},
    metrics::{Metrics, MetricsSnapshot},
    ports::{BoxError, CacheBackend, Clock, Storage, StorageError},
    ruleset::{Ruleset, RulesetBuilder, CACHE_STRATEGIES, STORAGE_ADAPTERS},
    strategy::{Cache, CacheStrategy, ForceCache, NoCache, Strategy},
    time_keeper::{TimeKeeper, WindowError},
};

pub use infrastructure::{
    backend_storage::BackendStorage, clock::SystemClock, storage::MemoryStorage,
};

#[cfg(feature = "redis-storage")]
pub use infrastructure::redis_backend::RedisBackend;
