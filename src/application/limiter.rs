//! Rate limiter coordination logic.
//!
//! A [`RequestLimiter`] enforces one rule of one host against the stored
//! counter. A [`RequestLimitGroup`] holds the limiters of every configured
//! host and decides whether a request may be sent.

use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, Storage, StorageError};
use crate::domain::rule::{HostPattern, Rule};
use crate::domain::window::WindowState;
use http::Uri;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

/// Decision about whether a request may be forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitDecision {
    /// Send the request
    Allow,
    /// The host's budget is exhausted
    Deny {
        /// Host pattern whose rules denied the request
        host: String,
        /// Time until every failing rule has reset
        retry_after: Duration,
    },
}

impl LimitDecision {
    /// Check if the request may be sent.
    pub fn is_allow(&self) -> bool {
        matches!(self, LimitDecision::Allow)
    }

    /// Check if the request was denied.
    pub fn is_deny(&self) -> bool {
        !self.is_allow()
    }
}

/// Outcome of checking one rule, before anything is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleCheck {
    /// The rule allows the request; `count` and `window` are what to commit
    Allow { count: u64, window: WindowState },
    /// The rule is exhausted for `remaining` more time
    Deny { remaining: Duration },
}

/// Enforces a single rule for a single host.
#[derive(Debug, Clone)]
pub struct RequestLimiter {
    host: String,
    rule: Rule,
    key: String,
}

impl RequestLimiter {
    /// Create a limiter for `rule` on `host`.
    pub fn new(host: impl Into<String>, rule: Rule) -> Self {
        Self {
            host: host.into(),
            key: rule.storage_key(),
            rule,
        }
    }

    /// Host pattern this limiter belongs to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The enforced rule.
    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Counter key within the host.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Evaluate the rule against the stored counter without writing.
    ///
    /// A missing or expired counter opens a new window starting at `now`.
    pub fn check(&self, storage: &dyn Storage, now: SystemTime) -> Result<RuleCheck, StorageError> {
        let Some(record) = storage.get_counter(&self.host, &self.key)? else {
            return Ok(RuleCheck::Allow {
                count: 1,
                window: WindowState::start(self.rule.request_interval, now),
            });
        };

        if record.request_count >= self.rule.max_requests {
            return Ok(RuleCheck::Deny {
                remaining: record.remaining,
            });
        }

        // Keep the existing window; only the count moves.
        let started_at = record
            .expires_at
            .checked_sub(self.rule.request_interval)
            .unwrap_or(now);
        Ok(RuleCheck::Allow {
            count: record.request_count + 1,
            window: WindowState::start(self.rule.request_interval, started_at),
        })
    }

    /// Persist an allowed check.
    pub fn commit(
        &self,
        storage: &dyn Storage,
        count: u64,
        window: &WindowState,
    ) -> Result<(), StorageError> {
        storage.save_counter(&self.host, &self.key, count, window)
    }
}

/// Limiters of one host pattern, evaluated under one lock.
struct HostLimits {
    pattern: HostPattern,
    limiters: Vec<RequestLimiter>,
    lock: Mutex<()>,
}

impl HostLimits {
    fn lock(&self) -> MutexGuard<'_, ()> {
        // The guarded data is `()`, so a poisoned lock carries no broken state.
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// All configured hosts and their rules.
///
/// Built once by the ruleset and read-only afterwards. Rules of a host are
/// combined with AND: a request is allowed only if every rule allows it, and
/// counters are only advanced when the request is allowed.
pub struct RequestLimitGroup {
    hosts: Vec<HostLimits>,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl fmt::Debug for RequestLimitGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestLimitGroup")
            .field(
                "hosts",
                &self
                    .hosts
                    .iter()
                    .map(|host| host.pattern.as_str())
                    .collect::<Vec<_>>(),
            )
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

impl RequestLimitGroup {
    /// Create an empty group.
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, metrics: Metrics) -> Self {
        Self {
            hosts: Vec::new(),
            storage,
            clock,
            metrics,
        }
    }

    /// Add rules for `pattern`, appending to any rules it already has.
    pub fn add_rules(&mut self, pattern: HostPattern, rules: impl IntoIterator<Item = Rule>) {
        let limiters = rules
            .into_iter()
            .map(|rule| RequestLimiter::new(pattern.as_str(), rule));

        if let Some(existing) = self.hosts.iter_mut().find(|h| h.pattern == pattern) {
            existing.limiters.extend(limiters);
            return;
        }

        self.hosts.push(HostLimits {
            limiters: limiters.collect(),
            pattern,
            lock: Mutex::new(()),
        });
    }

    /// Number of configured host patterns.
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Limiters that apply to `uri`, in configuration order.
    pub fn limiters_for(&self, uri: &Uri) -> Vec<&RequestLimiter> {
        self.hosts
            .iter()
            .filter(|host| host.pattern.matches(uri))
            .flat_map(|host| host.limiters.iter())
            .collect()
    }

    /// Decide whether a request to `uri` may be sent, and count it if so.
    ///
    /// Requests to hosts without rules are always allowed. Storage failures
    /// fail open: the request is allowed and a warning is logged.
    pub fn can_request(&self, uri: &Uri) -> LimitDecision {
        let matching: Vec<&HostLimits> = self
            .hosts
            .iter()
            .filter(|host| host.pattern.matches(uri))
            .collect();

        if matching.is_empty() {
            self.metrics.record_allowed();
            return LimitDecision::Allow;
        }

        // Locks are always taken in configuration order.
        let _guards: Vec<_> = matching.iter().map(|host| host.lock()).collect();

        let decision = match self.evaluate(&matching) {
            Ok(decision) => decision,
            Err(e) => {
                self.metrics.record_storage_fault();
                tracing::warn!(
                    error = %e,
                    uri = %uri,
                    "Failed to evaluate request limits, allowing request"
                );
                LimitDecision::Allow
            }
        };

        match &decision {
            LimitDecision::Allow => self.metrics.record_allowed(),
            LimitDecision::Deny { host, retry_after } => {
                self.metrics.record_denied();
                tracing::debug!(
                    host = %host,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Request limit reached"
                );
            }
        }

        decision
    }

    /// Check every rule, then commit only if all of them allow.
    fn evaluate(&self, matching: &[&HostLimits]) -> Result<LimitDecision, StorageError> {
        let now = self.clock.now();
        let storage = self.storage.as_ref();

        let mut allowed = Vec::new();
        let mut denied: Option<(&str, Duration)> = None;

        for limiter in matching.iter().flat_map(|host| host.limiters.iter()) {
            match limiter.check(storage, now)? {
                RuleCheck::Allow { count, window } => allowed.push((limiter, count, window)),
                RuleCheck::Deny { remaining } => {
                    denied = match denied {
                        Some((host, longest)) if longest >= remaining => Some((host, longest)),
                        _ => Some((limiter.host(), remaining)),
                    };
                }
            }
        }

        if let Some((host, retry_after)) = denied {
            return Ok(LimitDecision::Deny {
                host: host.to_string(),
                retry_after,
            });
        }

        for (limiter, count, window) in allowed {
            limiter.commit(storage, count, &window)?;
        }

        Ok(LimitDecision::Allow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::config::CacheConfig;
    use crate::infrastructure::mocks::MockClock;
    use crate::infrastructure::storage::MemoryStorage;

    fn group(rules: &[(&str, Vec<Rule>)]) -> (RequestLimitGroup, Arc<MemoryStorage>, MockClock) {
        let clock = MockClock::starting_now();
        let storage = Arc::new(MemoryStorage::with_clock(
            CacheConfig::default(),
            Arc::new(clock.clone()),
        ));
        let mut group = RequestLimitGroup::new(
            storage.clone(),
            Arc::new(clock.clone()),
            Metrics::new(),
        );
        for (host, rules) in rules {
            group.add_rules(HostPattern::parse(host).unwrap(), rules.clone());
        }
        (group, storage, clock)
    }

    fn rule(max: u64, secs: u64) -> Rule {
        Rule::new(max, Duration::from_secs(secs)).unwrap()
    }

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn test_allows_up_to_limit_then_denies() {
        let (group, _storage, _clock) = group(&[("api.test", vec![rule(3, 60)])]);
        let target = uri("https://api.test/users");

        for _ in 0..3 {
            assert!(group.can_request(&target).is_allow());
        }

        match group.can_request(&target) {
            LimitDecision::Deny { host, retry_after } => {
                assert_eq!(host, "api.test");
                assert_eq!(retry_after, Duration::from_secs(60));
            }
            LimitDecision::Allow => panic!("fourth request should be denied"),
        }
    }

    #[test]
    fn test_window_resets_after_interval() {
        let (group, _storage, clock) = group(&[("api.test", vec![rule(2, 10)])]);
        let target = uri("https://api.test/");

        assert!(group.can_request(&target).is_allow());
        assert!(group.can_request(&target).is_allow());
        assert!(group.can_request(&target).is_deny());

        clock.advance(Duration::from_secs(10));
        assert!(group.can_request(&target).is_allow());
    }

    #[test]
    fn test_counting_keeps_original_window() {
        let (group, storage, clock) = group(&[("api.test", vec![rule(5, 10)])]);
        let target = uri("https://api.test/");

        assert!(group.can_request(&target).is_allow());
        clock.advance(Duration::from_secs(4));
        assert!(group.can_request(&target).is_allow());

        let record = storage
            .get_counter("api.test", &rule(5, 10).storage_key())
            .unwrap()
            .unwrap();
        assert_eq!(record.request_count, 2);
        assert_eq!(record.remaining, Duration::from_secs(6));
    }

    #[test]
    fn test_unknown_host_is_allowed_without_storage() {
        let (group, storage, _clock) = group(&[("api.test", vec![rule(1, 60)])]);

        for _ in 0..5 {
            assert!(group.can_request(&uri("https://other.test/")).is_allow());
        }
        assert_eq!(storage.counter_len(), 0);
    }

    #[test]
    fn test_all_rules_must_allow() {
        let (group, storage, _clock) =
            group(&[("api.test", vec![rule(5, 60), rule(2, 10)])]);
        let target = uri("https://api.test/");

        assert!(group.can_request(&target).is_allow());
        assert!(group.can_request(&target).is_allow());
        assert!(group.can_request(&target).is_deny());

        // The denied request did not advance the looser rule.
        let loose = storage
            .get_counter("api.test", &rule(5, 60).storage_key())
            .unwrap()
            .unwrap();
        assert_eq!(loose.request_count, 2);
    }

    #[test]
    fn test_retry_after_is_longest_failing_window() {
        let (group, _storage, clock) = group(&[("api.test", vec![rule(1, 10), rule(1, 30)])]);
        let target = uri("https://api.test/");

        assert!(group.can_request(&target).is_allow());
        clock.advance(Duration::from_secs(5));

        assert_eq!(
            group.can_request(&target),
            LimitDecision::Deny {
                host: "api.test".to_string(),
                retry_after: Duration::from_secs(25),
            }
        );
    }

    #[test]
    fn test_hosts_are_limited_independently() {
        let (group, _storage, _clock) =
            group(&[("a.test", vec![rule(1, 60)]), ("b.test", vec![rule(1, 60)])]);

        assert!(group.can_request(&uri("https://a.test/")).is_allow());
        assert!(group.can_request(&uri("https://a.test/")).is_deny());
        assert!(group.can_request(&uri("https://b.test/")).is_allow());
    }

    #[test]
    fn test_metrics_recorded() {
        let metrics = Metrics::new();
        let clock = MockClock::starting_now();
        let mut group = RequestLimitGroup::new(
            Arc::new(MemoryStorage::with_clock(
                CacheConfig::default(),
                Arc::new(clock.clone()),
            )),
            Arc::new(clock),
            metrics.clone(),
        );
        group.add_rules(HostPattern::parse("api.test").unwrap(), vec![rule(1, 60)]);

        group.can_request(&uri("https://api.test/"));
        group.can_request(&uri("https://api.test/"));

        assert_eq!(metrics.requests_allowed(), 1);
        assert_eq!(metrics.requests_denied(), 1);
    }

    #[test]
    fn test_add_rules_merges_same_host() {
        let (mut group, _storage, _clock) = group(&[("api.test", vec![rule(1, 60)])]);
        group.add_rules(HostPattern::parse("api.test").unwrap(), vec![rule(5, 10)]);

        assert_eq!(group.host_count(), 1);
        assert_eq!(group.limiters_for(&uri("https://api.test/")).len(), 2);
    }
}
