//! Cache strategies.
//!
//! A strategy decides whether a request is answered from storage or by
//! running the forward callback, and what is written back afterwards:
//!
//! - **NoCache**: always forward, never touch storage
//! - **Cache**: serve a stored response when one is live, otherwise forward
//!   and store the result
//! - **ForceCache**: always forward and refresh the stored response; when the
//!   forward is denied by the rate limiter, fall back to the stored response
//!
//! Storage is never locked while the forward callback runs.

use crate::application::error::ThrottleError;
use crate::application::metrics::Metrics;
use crate::application::ports::Storage;
use crate::domain::signature::RequestSignature;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::HeaderName;
use http::{Request, Response};
use std::future::Future;
use std::sync::Arc;

/// Trait for answering a request, possibly from storage.
#[async_trait]
pub trait CacheStrategy: Send + Sync {
    /// Handle `request`, calling `forward` at most once.
    async fn request<F, Fut>(
        &self,
        request: Request<Bytes>,
        forward: F,
    ) -> Result<Response<Bytes>, ThrottleError>
    where
        F: FnOnce(Request<Bytes>) -> Fut + Send,
        Fut: Future<Output = Result<Response<Bytes>, ThrottleError>> + Send;
}

/// Always forward. Storage is never read or written.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl NoCache {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CacheStrategy for NoCache {
    async fn request<F, Fut>(
        &self,
        request: Request<Bytes>,
        forward: F,
    ) -> Result<Response<Bytes>, ThrottleError>
    where
        F: FnOnce(Request<Bytes>) -> Fut + Send,
        Fut: Future<Output = Result<Response<Bytes>, ThrottleError>> + Send,
    {
        forward(request).await
    }
}

/// Shared state of the storage-backed strategies.
#[derive(Debug, Clone)]
struct CacheContext {
    storage: Arc<dyn Storage>,
    key_headers: Arc<[HeaderName]>,
    metrics: Metrics,
}

impl CacheContext {
    fn signature(&self, request: &Request<Bytes>) -> RequestSignature {
        RequestSignature::with_headers(request, &self.key_headers)
    }

    /// Read a live response; read failures are reported and treated as a miss.
    fn lookup(&self, signature: &RequestSignature) -> Option<Response<Bytes>> {
        match self.storage.get_response(signature) {
            Ok(Some(cached)) => Some(cached.into_response()),
            Ok(None) => None,
            Err(e) => {
                self.metrics.record_storage_fault();
                tracing::warn!(
                    error = %e,
                    %signature,
                    "Failed to read cached response, treating as miss"
                );
                None
            }
        }
    }
}

/// Serve live stored responses, forward and store on a miss.
#[derive(Debug, Clone)]
pub struct Cache {
    context: CacheContext,
}

impl Cache {
    /// Create a strategy over `storage`.
    ///
    /// `key_headers` join method and URI in the request signature.
    pub fn new(storage: Arc<dyn Storage>, key_headers: Vec<HeaderName>, metrics: Metrics) -> Self {
        Self {
            context: CacheContext {
                storage,
                key_headers: key_headers.into(),
                metrics,
            },
        }
    }
}

#[async_trait]
impl CacheStrategy for Cache {
    async fn request<F, Fut>(
        &self,
        request: Request<Bytes>,
        forward: F,
    ) -> Result<Response<Bytes>, ThrottleError>
    where
        F: FnOnce(Request<Bytes>) -> Fut + Send,
        Fut: Future<Output = Result<Response<Bytes>, ThrottleError>> + Send,
    {
        let context = &self.context;
        let signature = context.signature(&request);

        if let Some(response) = context.lookup(&signature) {
            context.metrics.record_hit();
            tracing::debug!(%signature, "Serving cached response");
            return Ok(response);
        }

        context.metrics.record_miss();
        tracing::debug!(%signature, "Cache miss, forwarding request");

        let response = forward(request).await?;

        if let Err(e) = context.storage.save_response(&signature, &response) {
            context.metrics.record_storage_fault();
            tracing::warn!(error = %e, %signature, "Failed to store response");
        }

        Ok(response)
    }
}

/// Always forward and overwrite the stored response.
///
/// The stored copy is only served when the rate limiter denies the forward.
#[derive(Debug, Clone)]
pub struct ForceCache {
    context: CacheContext,
}

impl ForceCache {
    /// Create a strategy over `storage`.
    pub fn new(storage: Arc<dyn Storage>, key_headers: Vec<HeaderName>, metrics: Metrics) -> Self {
        Self {
            context: CacheContext {
                storage,
                key_headers: key_headers.into(),
                metrics,
            },
        }
    }
}

#[async_trait]
impl CacheStrategy for ForceCache {
    async fn request<F, Fut>(
        &self,
        request: Request<Bytes>,
        forward: F,
    ) -> Result<Response<Bytes>, ThrottleError>
    where
        F: FnOnce(Request<Bytes>) -> Fut + Send,
        Fut: Future<Output = Result<Response<Bytes>, ThrottleError>> + Send,
    {
        let context = &self.context;
        let signature = context.signature(&request);

        match forward(request).await {
            Ok(response) => {
                context.storage.save_response(&signature, &response)?;
                Ok(response)
            }
            Err(err) if err.is_too_many_requests() => match context.lookup(&signature) {
                Some(response) => {
                    context.metrics.record_hit();
                    tracing::debug!(%signature, "Request limit reached, serving cached response");
                    Ok(response)
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }
}

/// Strategy selected by name when a ruleset is built.
#[derive(Debug, Clone)]
pub enum Strategy {
    NoCache(NoCache),
    Cache(Cache),
    ForceCache(ForceCache),
}

impl Strategy {
    /// Registry name of the strategy.
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::NoCache(_) => "no-cache",
            Strategy::Cache(_) => "cache",
            Strategy::ForceCache(_) => "force-cache",
        }
    }
}

#[async_trait]
impl CacheStrategy for Strategy {
    async fn request<F, Fut>(
        &self,
        request: Request<Bytes>,
        forward: F,
    ) -> Result<Response<Bytes>, ThrottleError>
    where
        F: FnOnce(Request<Bytes>) -> Fut + Send,
        Fut: Future<Output = Result<Response<Bytes>, ThrottleError>> + Send,
    {
        match self {
            Strategy::NoCache(s) => s.request(request, forward).await,
            Strategy::Cache(s) => s.request(request, forward).await,
            Strategy::ForceCache(s) => s.request(request, forward).await,
        }
    }
}

impl From<NoCache> for Strategy {
    fn from(strategy: NoCache) -> Self {
        Strategy::NoCache(strategy)
    }
}

impl From<Cache> for Strategy {
    fn from(strategy: Cache) -> Self {
        Strategy::Cache(strategy)
    }
}

impl From<ForceCache> for Strategy {
    fn from(strategy: ForceCache) -> Self {
        Strategy::ForceCache(strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::config::CacheConfig;
    use crate::infrastructure::mocks::MockClock;
    use crate::infrastructure::storage::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn storage(clock: &MockClock) -> Arc<MemoryStorage> {
        Arc::new(MemoryStorage::with_clock(
            CacheConfig::default().with_ttl(Duration::from_secs(60)),
            Arc::new(clock.clone()),
        ))
    }

    fn get(uri: &str) -> Request<Bytes> {
        Request::get(uri).body(Bytes::new()).unwrap()
    }

    /// Forward that answers with `body` and counts its calls.
    fn counting(
        calls: &Arc<AtomicUsize>,
        body: &'static str,
    ) -> impl FnOnce(Request<Bytes>) -> std::future::Ready<Result<Response<Bytes>, ThrottleError>> + Send
    {
        let calls = Arc::clone(calls);
        move |_request| {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(Response::new(Bytes::from_static(body.as_bytes()))))
        }
    }

    fn denied(
        _request: Request<Bytes>,
    ) -> std::future::Ready<Result<Response<Bytes>, ThrottleError>> {
        std::future::ready(Err(ThrottleError::TooManyRequests {
            host: "api.test".to_string(),
            retry_after: Duration::from_secs(1),
        }))
    }

    #[tokio::test]
    async fn test_no_cache_always_forwards() {
        let calls = Arc::new(AtomicUsize::new(0));
        let strategy = NoCache::new();

        for _ in 0..3 {
            strategy
                .request(get("https://api.test/a"), counting(&calls, "body"))
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cache_serves_second_request_from_storage() {
        let clock = MockClock::starting_now();
        let metrics = Metrics::new();
        let strategy = Cache::new(storage(&clock), vec![], metrics.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let first = strategy
            .request(get("https://api.test/a"), counting(&calls, "first"))
            .await
            .unwrap();
        let second = strategy
            .request(get("https://api.test/a"), counting(&calls, "second"))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.body(), &Bytes::from_static(b"first"));
        assert_eq!(second.body(), &Bytes::from_static(b"first"));
        assert_eq!(metrics.cache_hits(), 1);
        assert_eq!(metrics.cache_misses(), 1);
    }

    #[tokio::test]
    async fn test_cache_forwards_again_after_expiry() {
        let clock = MockClock::starting_now();
        let strategy = Cache::new(storage(&clock), vec![], Metrics::new());
        let calls = Arc::new(AtomicUsize::new(0));

        strategy
            .request(get("https://api.test/a"), counting(&calls, "first"))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(60));
        let refreshed = strategy
            .request(get("https://api.test/a"), counting(&calls, "second"))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(refreshed.body(), &Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn test_cache_keys_on_configured_headers() {
        let clock = MockClock::starting_now();
        let strategy = Cache::new(
            storage(&clock),
            vec![HeaderName::from_static("accept-language")],
            Metrics::new(),
        );
        let calls = Arc::new(AtomicUsize::new(0));

        let english = Request::get("https://api.test/a")
            .header("accept-language", "en")
            .body(Bytes::new())
            .unwrap();
        let german = Request::get("https://api.test/a")
            .header("accept-language", "de")
            .body(Bytes::new())
            .unwrap();

        strategy.request(english, counting(&calls, "en")).await.unwrap();
        let response = strategy.request(german, counting(&calls, "de")).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(response.body(), &Bytes::from_static(b"de"));
    }

    #[tokio::test]
    async fn test_cache_propagates_denial() {
        let clock = MockClock::starting_now();
        let strategy = Cache::new(storage(&clock), vec![], Metrics::new());

        let err = strategy
            .request(get("https://api.test/a"), denied)
            .await
            .unwrap_err();

        assert!(err.is_too_many_requests());
    }

    #[tokio::test]
    async fn test_force_cache_always_forwards_and_overwrites() {
        let clock = MockClock::starting_now();
        let storage = storage(&clock);
        let strategy = ForceCache::new(storage.clone(), vec![], Metrics::new());
        let calls = Arc::new(AtomicUsize::new(0));

        strategy
            .request(get("https://api.test/a"), counting(&calls, "first"))
            .await
            .unwrap();
        let second = strategy
            .request(get("https://api.test/a"), counting(&calls, "second"))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(second.body(), &Bytes::from_static(b"second"));

        let signature = RequestSignature::of(&get("https://api.test/a"));
        let stored = storage.get_response(&signature).unwrap().unwrap();
        assert_eq!(stored.body, Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn test_force_cache_falls_back_when_denied() {
        let clock = MockClock::starting_now();
        let strategy = ForceCache::new(storage(&clock), vec![], Metrics::new());
        let calls = Arc::new(AtomicUsize::new(0));

        strategy
            .request(get("https://api.test/a"), counting(&calls, "warm"))
            .await
            .unwrap();
        let fallback = strategy
            .request(get("https://api.test/a"), denied)
            .await
            .unwrap();

        assert_eq!(fallback.body(), &Bytes::from_static(b"warm"));

        let err = strategy
            .request(get("https://api.test/other"), denied)
            .await
            .unwrap_err();
        assert!(err.is_too_many_requests());
    }

    #[test]
    fn test_strategy_names() {
        let clock = MockClock::starting_now();
        let storage: Arc<dyn Storage> = storage(&clock);

        assert_eq!(Strategy::from(NoCache::new()).name(), "no-cache");
        assert_eq!(
            Strategy::from(Cache::new(storage.clone(), vec![], Metrics::new())).name(),
            "cache"
        );
        assert_eq!(
            Strategy::from(ForceCache::new(storage, vec![], Metrics::new())).name(),
            "force-cache"
        );
    }
}
