//! Request limit rules and host patterns.
//!
//! A rule caps how many requests may be sent to a host within a fixed window.
//! Rules are grouped by host pattern in a rule document:
//!
//! ```json
//! {
//!     "https://api.example.com": [
//!         { "max_requests": 20, "request_interval": 1 },
//!         { "max_requests": 600, "request_interval": 60 }
//!     ]
//! }
//! ```

use http::Uri;
use serde::{Deserialize, Serialize};
use std::fmt;
use crate::domain::window::MAX_WINDOW;
use std::time::Duration;

/// Error returned when a rule has an unusable limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    /// `max_requests` was zero
    #[error("max_requests must be greater than 0")]
    ZeroMaxRequests,
    /// `request_interval` was zero
    #[error("request_interval must be greater than 0")]
    ZeroInterval,
    /// `request_interval` exceeds [`MAX_WINDOW`]
    #[error("request_interval must be at most {} seconds", MAX_WINDOW.as_secs())]
    IntervalTooLong,
}

/// Allow at most `max_requests` requests per `request_interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    /// Requests allowed per window
    pub max_requests: u64,
    /// Window length, in whole seconds when (de)serialized
    #[serde(with = "seconds")]
    pub request_interval: Duration,
}

impl Rule {
    /// Create a rule, rejecting zero limits.
    ///
    /// # Example
    /// ```
    /// use advanced_throttle::Rule;
    /// use std::time::Duration;
    ///
    /// let rule = Rule::new(3, Duration::from_secs(60)).unwrap();
    /// assert_eq!(rule.max_requests, 3);
    ///
    /// assert!(Rule::new(0, Duration::from_secs(60)).is_err());
    /// ```
    pub fn new(max_requests: u64, request_interval: Duration) -> Result<Self, RuleError> {
        let rule = Self {
            max_requests,
            request_interval,
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Check the rule's invariants.
    ///
    /// Deserialized rules bypass [`Rule::new`], so the ruleset validates them again.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.max_requests == 0 {
            return Err(RuleError::ZeroMaxRequests);
        }
        if self.request_interval.is_zero() {
            return Err(RuleError::ZeroInterval);
        }
        if self.request_interval > MAX_WINDOW {
            return Err(RuleError::IntervalTooLong);
        }
        Ok(())
    }

    /// Counter key for this rule, unique among the rules of one host.
    pub fn storage_key(&self) -> String {
        format!(
            "{}/{}ms",
            self.max_requests,
            self.request_interval.as_millis()
        )
    }
}

/// Error returned when a rule document key does not name a host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("`{0}` is not a host name")]
pub struct HostError(pub String);

/// A host a group of rules applies to.
///
/// Accepts either a bare host (`api.example.com`, `api.example.com:8443`) or
/// an origin (`https://api.example.com`). Paths are ignored. Keys that are
/// empty or purely numeric are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPattern {
    raw: String,
    scheme: Option<String>,
    host: String,
    port: Option<u16>,
}

impl HostPattern {
    /// Parse a rule document key.
    pub fn parse(raw: &str) -> Result<Self, HostError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.parse::<i64>().is_ok() {
            return Err(HostError(raw.to_string()));
        }

        let (scheme, rest) = match trimmed.split_once("://") {
            Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
            None => (None, trimmed),
        };
        let authority = rest.split('/').next().unwrap_or_default();

        // A bracketed IPv6 literal without a port ends with `]`.
        let port_split = if authority.ends_with(']') {
            None
        } else {
            authority.rsplit_once(':')
        };
        let (host, port) = match port_split {
            Some((host, port)) => match port.parse::<u16>() {
                Ok(port) => (host, Some(port)),
                Err(_) => return Err(HostError(raw.to_string())),
            },
            None => (authority, None),
        };

        if host.is_empty() {
            return Err(HostError(raw.to_string()));
        }

        Ok(Self {
            raw: trimmed.to_string(),
            scheme,
            host: host.to_ascii_lowercase(),
            port,
        })
    }

    /// The key as written in the rule document.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Check whether a request URI targets this host.
    pub fn matches(&self, uri: &Uri) -> bool {
        let Some(host) = uri.host() else {
            return false;
        };
        if !host.eq_ignore_ascii_case(&self.host) {
            return false;
        }

        if let Some(scheme) = &self.scheme {
            match uri.scheme_str() {
                Some(s) if s.eq_ignore_ascii_case(scheme) => {}
                _ => return false,
            }
        }

        match self.port {
            Some(port) => effective_port(uri) == Some(port),
            None => true,
        }
    }
}

impl fmt::Display for HostPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn effective_port(uri: &Uri) -> Option<u16> {
    uri.port_u16().or_else(|| match uri.scheme_str() {
        Some("http") => Some(80),
        Some("https") => Some(443),
        _ => None,
    })
}

/// Serde helpers encoding a `Duration` as whole seconds.
pub(crate) mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }

    /// Same encoding for optional durations.
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(duration) => serializer.serialize_some(&duration.as_secs()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
        }
    }
}
