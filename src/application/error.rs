//! Errors raised while building a ruleset or handling a request.

use crate::application::ports::{BoxError, StorageError};
use crate::domain::rule::RuleError;
use std::time::Duration;

/// Error returned when building a [`Ruleset`](crate::Ruleset) fails.
///
/// No partially configured ruleset is ever returned alongside these.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No storage adapter is registered under `name`
    #[error("unknown storage adapter `{name}`, expected one of: {}", known.join(", "))]
    UnknownStorageAdapter {
        name: String,
        known: Vec<&'static str>,
    },
    /// No cache strategy is registered under `name`
    #[error("unknown cache strategy `{name}`, expected one of: {}", known.join(", "))]
    UnknownCacheStrategy {
        name: String,
        known: Vec<&'static str>,
    },
    /// A rule document key does not name a host
    #[error("rules must be keyed by host name, got `{key}`")]
    HostNotDefined { key: String },
    /// A rule has a zero limit or interval
    #[error("invalid rule for host `{host}`: {reason}")]
    InvalidRule { host: String, reason: RuleError },
    /// The `backend` storage adapter was chosen without a cache backend
    #[error("storage adapter `backend` requires a cache backend")]
    MissingCacheBackend,
    /// A header name in `key_headers` is not valid
    #[error("invalid key header `{name}`")]
    InvalidKeyHeader { name: String },
    /// A rule document could not be read
    #[error("invalid rule document: {0}")]
    InvalidDocument(#[source] serde_json::Error),
}

/// Error returned when handling a request.
#[derive(Debug, thiserror::Error)]
pub enum ThrottleError {
    /// The host's request budget is exhausted
    #[error("too many requests to `{host}`, retry after {retry_after:?}")]
    TooManyRequests { host: String, retry_after: Duration },
    /// A storage operation failed and could not be recovered from
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The forward callback failed
    #[error("forwarding the request failed: {0}")]
    Forward(#[source] BoxError),
}

impl ThrottleError {
    /// Check if the request was denied by the rate limiter.
    pub fn is_too_many_requests(&self) -> bool {
        matches!(self, ThrottleError::TooManyRequests { .. })
    }

    /// Time to wait before the request may be retried, for denials.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ThrottleError::TooManyRequests { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Wrap an error from the forward callback.
    pub fn forward(error: impl Into<BoxError>) -> Self {
        ThrottleError::Forward(error.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_adapter_lists_known_names() {
        let err = ConfigError::UnknownStorageAdapter {
            name: "bogus".to_string(),
            known: vec!["memory", "backend"],
        };
        assert_eq!(
            err.to_string(),
            "unknown storage adapter `bogus`, expected one of: memory, backend"
        );
    }

    #[test]
    fn test_retry_after_only_for_denials() {
        let denied = ThrottleError::TooManyRequests {
            host: "api.test".to_string(),
            retry_after: Duration::from_secs(3),
        };
        assert!(denied.is_too_many_requests());
        assert_eq!(denied.retry_after(), Some(Duration::from_secs(3)));

        let failed = ThrottleError::forward("connection reset");
        assert!(!failed.is_too_many_requests());
        assert_eq!(failed.retry_after(), None);
    }
}
