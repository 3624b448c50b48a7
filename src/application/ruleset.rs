//! Ruleset: ties rules, storage and cache strategy together.
//!
//! A [`RulesetBuilder`] collects host rules and picks a storage adapter and a
//! cache strategy by name. [`RulesetBuilder::build`] validates everything and
//! returns a ready [`Ruleset`], or a [`ConfigError`] and nothing else.
//!
//! ```
//! use advanced_throttle::{Rule, Ruleset};
//! use std::time::Duration;
//!
//! let ruleset = Ruleset::builder()
//!     .rules("api.example.com", vec![Rule::new(20, Duration::from_secs(1)).unwrap()])
//!     .cache_strategy("cache")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(ruleset.strategy_name(), "cache");
//! assert_eq!(ruleset.storage_name(), "memory");
//! ```

use crate::application::config::CacheConfig;
use crate::application::error::{ConfigError, ThrottleError};
use crate::application::limiter::{LimitDecision, RequestLimitGroup};
use crate::application::metrics::Metrics;
use crate::application::ports::{BoxError, CacheBackend, Clock, Storage};
use crate::application::strategy::{Cache, CacheStrategy, ForceCache, NoCache, Strategy};
use crate::domain::rule::{HostPattern, Rule};
use crate::infrastructure::backend_storage::BackendStorage;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::storage::MemoryStorage;
use bytes::Bytes;
use http::header::HeaderName;
use http::{Request, Response};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Builds a storage adapter from the ruleset's configuration.
pub type StorageFactory = fn(
    CacheConfig,
    Arc<dyn Clock>,
    Option<Arc<dyn CacheBackend>>,
) -> Result<Arc<dyn Storage>, ConfigError>;

/// Builds a cache strategy over a storage adapter.
pub type StrategyFactory = fn(Arc<dyn Storage>, Vec<HeaderName>, Metrics) -> Strategy;

/// Storage adapters selectable by name.
///
/// `"array"` is an alias of `"memory"`.
pub static STORAGE_ADAPTERS: &[(&str, StorageFactory)] = &[
    ("memory", memory_storage as StorageFactory),
    ("backend", backend_storage as StorageFactory),
    ("array", memory_storage as StorageFactory),
];

/// Cache strategies selectable by name.
pub static CACHE_STRATEGIES: &[(&str, StrategyFactory)] = &[
    ("no-cache", no_cache as StrategyFactory),
    ("cache", cache as StrategyFactory),
    ("force-cache", force_cache as StrategyFactory),
];

/// Storage adapter used when none is named.
pub const DEFAULT_STORAGE_ADAPTER: &str = "memory";

/// Cache strategy used when none is named.
pub const DEFAULT_CACHE_STRATEGY: &str = "no-cache";

fn memory_storage(
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    _backend: Option<Arc<dyn CacheBackend>>,
) -> Result<Arc<dyn Storage>, ConfigError> {
    Ok(Arc::new(MemoryStorage::with_clock(config, clock)))
}

fn backend_storage(
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    backend: Option<Arc<dyn CacheBackend>>,
) -> Result<Arc<dyn Storage>, ConfigError> {
    let backend = backend.ok_or(ConfigError::MissingCacheBackend)?;
    Ok(Arc::new(BackendStorage::with_clock(backend, config, clock)))
}

fn no_cache(
    _storage: Arc<dyn Storage>,
    _key_headers: Vec<HeaderName>,
    _metrics: Metrics,
) -> Strategy {
    NoCache::new().into()
}

fn cache(storage: Arc<dyn Storage>, key_headers: Vec<HeaderName>, metrics: Metrics) -> Strategy {
    Cache::new(storage, key_headers, metrics).into()
}

fn force_cache(
    storage: Arc<dyn Storage>,
    key_headers: Vec<HeaderName>,
    metrics: Metrics,
) -> Strategy {
    ForceCache::new(storage, key_headers, metrics).into()
}

fn names<T>(registry: &[(&'static str, T)]) -> Vec<&'static str> {
    registry.iter().map(|(name, _)| *name).collect()
}

/// Builder for configuring a [`Ruleset`].
#[derive(Debug, Default)]
pub struct RulesetBuilder {
    rules: Vec<(String, Vec<Rule>)>,
    documents: Vec<Value>,
    cache_strategy: Option<String>,
    storage_adapter: Option<String>,
    storage: Option<Arc<dyn Storage>>,
    cache_backend: Option<Arc<dyn CacheBackend>>,
    config: CacheConfig,
    clock: Option<Arc<dyn Clock>>,
}

impl RulesetBuilder {
    /// Create a builder with no rules and the default strategy and adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add rules for `host`.
    ///
    /// `host` is a bare host (`api.example.com`, `api.example.com:8443`) or an
    /// origin (`https://api.example.com`). Rules added for the same host are
    /// combined.
    pub fn rules(mut self, host: impl Into<String>, rules: Vec<Rule>) -> Self {
        self.rules.push((host.into(), rules));
        self
    }

    /// Add every host of a rule document.
    ///
    /// The document maps host names to rule lists:
    ///
    /// ```
    /// use advanced_throttle::Ruleset;
    /// use serde_json::json;
    ///
    /// let ruleset = Ruleset::builder()
    ///     .rules_from_value(json!({
    ///         "https://api.example.com": [
    ///             { "max_requests": 20, "request_interval": 1 },
    ///             { "max_requests": 600, "request_interval": 60 }
    ///         ]
    ///     }))
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(ruleset.request_limit_group().host_count(), 1);
    /// ```
    ///
    /// The document is validated by [`build`](Self::build).
    pub fn rules_from_value(mut self, document: Value) -> Self {
        self.documents.push(document);
        self
    }

    /// Select the cache strategy by name (default `"no-cache"`).
    pub fn cache_strategy(mut self, name: impl Into<String>) -> Self {
        self.cache_strategy = Some(name.into());
        self
    }

    /// Select the storage adapter by name (default `"memory"`).
    pub fn storage_adapter(mut self, name: impl Into<String>) -> Self {
        self.storage_adapter = Some(name.into());
        self
    }

    /// Use an already constructed storage, bypassing the adapter registry.
    ///
    /// The storage's own cache configuration is used for request signatures.
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the external cache used by the `"backend"` adapter.
    pub fn cache_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.cache_backend = Some(backend);
        self
    }

    /// Set the cache configuration passed to the storage adapter.
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the clock used by storage and rate limiting.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the ruleset.
    ///
    /// # Errors
    /// Returns `ConfigError` if a name is unknown, a host key is not a host,
    /// a rule has a zero limit or interval, a key header is invalid, or the
    /// `"backend"` adapter is chosen without a cache backend.
    pub fn build(self) -> Result<Ruleset, ConfigError> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let metrics = Metrics::new();

        let mut entries = self.rules;
        for document in self.documents {
            entries.extend(parse_document(document)?);
        }

        let mut hosts = Vec::with_capacity(entries.len());
        for (host, rules) in entries {
            let pattern = HostPattern::parse(&host)
                .map_err(|_| ConfigError::HostNotDefined { key: host.clone() })?;
            for rule in &rules {
                rule.validate().map_err(|reason| ConfigError::InvalidRule {
                    host: host.clone(),
                    reason,
                })?;
            }
            hosts.push((pattern, rules));
        }

        let strategy_name = self
            .cache_strategy
            .unwrap_or_else(|| DEFAULT_CACHE_STRATEGY.to_string());
        let strategy_factory = CACHE_STRATEGIES
            .iter()
            .find(|(name, _)| *name == strategy_name)
            .map(|(_, factory)| *factory)
            .ok_or_else(|| ConfigError::UnknownCacheStrategy {
                name: strategy_name.clone(),
                known: names(CACHE_STRATEGIES),
            })?;

        let (storage, storage_name) = match self.storage {
            Some(storage) => (storage, "custom".to_string()),
            None => {
                let name = self
                    .storage_adapter
                    .unwrap_or_else(|| DEFAULT_STORAGE_ADAPTER.to_string());
                let factory = STORAGE_ADAPTERS
                    .iter()
                    .find(|(known, _)| *known == name)
                    .map(|(_, factory)| *factory)
                    .ok_or_else(|| ConfigError::UnknownStorageAdapter {
                        name: name.clone(),
                        known: names(STORAGE_ADAPTERS),
                    })?;
                (
                    factory(self.config, Arc::clone(&clock), self.cache_backend)?,
                    name,
                )
            }
        };

        let key_headers = storage
            .cache_config()
            .header_names()
            .map_err(|name| ConfigError::InvalidKeyHeader {
                name: name.to_string(),
            })?;

        let mut group = RequestLimitGroup::new(Arc::clone(&storage), clock, metrics.clone());
        for (pattern, rules) in hosts {
            group.add_rules(pattern, rules);
        }

        let strategy = strategy_factory(Arc::clone(&storage), key_headers, metrics.clone());

        tracing::info!(
            strategy = strategy.name(),
            storage = %storage_name,
            hosts = group.host_count(),
            "Request ruleset built"
        );

        Ok(Ruleset {
            strategy,
            group,
            storage,
            storage_name,
            metrics,
        })
    }
}

/// Split a rule document into `(host, rules)` entries.
fn parse_document(document: Value) -> Result<Vec<(String, Vec<Rule>)>, ConfigError> {
    if let Value::Array(items) = &document {
        // Array positions are integer keys, never host names.
        if items.is_empty() {
            return Ok(Vec::new());
        }
        return Err(ConfigError::HostNotDefined {
            key: "0".to_string(),
        });
    }

    let hosts: BTreeMap<String, Value> =
        serde_json::from_value(document).map_err(ConfigError::InvalidDocument)?;

    hosts
        .into_iter()
        .map(|(host, rules)| {
            if HostPattern::parse(&host).is_err() {
                return Err(ConfigError::HostNotDefined { key: host });
            }
            let rules: Vec<Rule> =
                serde_json::from_value(rules).map_err(ConfigError::InvalidDocument)?;
            Ok((host, rules))
        })
        .collect()
}

/// Configured rate limiting and caching for outgoing requests.
///
/// `Ruleset` is `Send + Sync`; share it behind an `Arc` between tasks.
#[derive(Debug)]
pub struct Ruleset {
    strategy: Strategy,
    group: RequestLimitGroup,
    storage: Arc<dyn Storage>,
    storage_name: String,
    metrics: Metrics,
}

impl Ruleset {
    /// Create a builder.
    pub fn builder() -> RulesetBuilder {
        RulesetBuilder::new()
    }

    /// Send `request` through the cache strategy and the rate limiter.
    ///
    /// `forward` performs the actual request. It only runs when the strategy
    /// needs a fresh response and the host's rules allow another request, so
    /// answers served from storage never consume request budget.
    ///
    /// # Errors
    /// - [`ThrottleError::TooManyRequests`] when the host's budget is exhausted
    ///   and no stored response can stand in
    /// - [`ThrottleError::Forward`] when `forward` fails
    /// - [`ThrottleError::Storage`] when the `"force-cache"` strategy cannot
    ///   store the fresh response
    pub async fn cache<F, Fut, E>(
        &self,
        request: Request<Bytes>,
        forward: F,
    ) -> Result<Response<Bytes>, ThrottleError>
    where
        F: FnOnce(Request<Bytes>) -> Fut + Send,
        Fut: Future<Output = Result<Response<Bytes>, E>> + Send,
        E: Into<BoxError>,
    {
        let group = &self.group;
        let guarded = move |request: Request<Bytes>| async move {
            match group.can_request(request.uri()) {
                LimitDecision::Allow => forward(request).await.map_err(ThrottleError::forward),
                LimitDecision::Deny { host, retry_after } => {
                    Err(ThrottleError::TooManyRequests { host, retry_after })
                }
            }
        };

        self.strategy.request(request, guarded).await
    }

    /// The rules of every configured host.
    pub fn request_limit_group(&self) -> &RequestLimitGroup {
        &self.group
    }

    /// Counters for decisions and cache lookups.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// The storage shared by the rate limiter and the cache strategy.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Registry name of the cache strategy.
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Registry name of the storage adapter, or `"custom"` for an injected one.
    pub fn storage_name(&self) -> &str {
        &self.storage_name
    }
}
