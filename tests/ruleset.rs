//! Building rulesets from names and rule documents.

use advanced_throttle::infrastructure::mocks::{MockBackend, MockCaptureLayer};
use advanced_throttle::{
    CacheConfig, ConfigError, Rule, RuleError, Ruleset, CACHE_STRATEGIES, STORAGE_ADAPTERS,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;

#[test]
fn test_every_registered_name_builds() {
    for (storage, _) in STORAGE_ADAPTERS {
        for (strategy, _) in CACHE_STRATEGIES {
            let ruleset = Ruleset::builder()
                .storage_adapter(*storage)
                .cache_strategy(*strategy)
                .cache_backend(Arc::new(MockBackend::new()))
                .build()
                .unwrap();

            assert_eq!(ruleset.storage_name(), *storage);
            assert_eq!(ruleset.strategy_name(), *strategy);
        }
    }
}

#[test]
fn test_unknown_storage_adapter() {
    let err = Ruleset::builder()
        .storage_adapter("bogus")
        .build()
        .unwrap_err();

    match err {
        ConfigError::UnknownStorageAdapter { name, known } => {
            assert_eq!(name, "bogus");
            assert_eq!(known, vec!["memory", "backend", "array"]);
        }
        other => panic!("expected UnknownStorageAdapter, got {other:?}"),
    }
}

#[test]
fn test_unknown_cache_strategy() {
    let err = Ruleset::builder()
        .cache_strategy("bogus")
        .build()
        .unwrap_err();

    match err {
        ConfigError::UnknownCacheStrategy { name, known } => {
            assert_eq!(name, "bogus");
            assert_eq!(known, vec!["no-cache", "cache", "force-cache"]);
        }
        other => panic!("expected UnknownCacheStrategy, got {other:?}"),
    }
}

#[test]
fn test_backend_adapter_requires_backend() {
    let err = Ruleset::builder()
        .storage_adapter("backend")
        .build()
        .unwrap_err();

    assert!(matches!(err, ConfigError::MissingCacheBackend));
}

#[test]
fn test_integer_host_key() {
    let err = Ruleset::builder()
        .rules("12", vec![Rule::new(1, Duration::from_secs(1)).unwrap()])
        .build()
        .unwrap_err();

    assert!(matches!(err, ConfigError::HostNotDefined { ref key } if key == "12"));
}

#[test]
fn test_empty_host_key() {
    let err = Ruleset::builder()
        .rules_from_value(json!({ "": [{ "max_requests": 1, "request_interval": 1 }] }))
        .build()
        .unwrap_err();

    assert!(matches!(err, ConfigError::HostNotDefined { .. }));
}

#[test]
fn test_rules_without_hosts() {
    let err = Ruleset::builder()
        .rules_from_value(json!([
            { "max_requests": 20, "request_interval": 1 },
            { "max_requests": 100, "request_interval": 120 }
        ]))
        .build()
        .unwrap_err();

    assert!(matches!(err, ConfigError::HostNotDefined { .. }));
}

#[test]
fn test_document_with_several_hosts() {
    let ruleset = Ruleset::builder()
        .rules_from_value(json!({
            "https://www.test.com": [
                { "max_requests": 20, "request_interval": 1 },
                { "max_requests": 100, "request_interval": 120 }
            ],
            "api.test.com:8443": [
                { "max_requests": 5, "request_interval": 10 }
            ]
        }))
        .build()
        .unwrap();

    let group = ruleset.request_limit_group();
    assert_eq!(group.host_count(), 2);
    assert_eq!(
        group
            .limiters_for(&"https://www.test.com/users".parse().unwrap())
            .len(),
        2
    );
    assert_eq!(
        group
            .limiters_for(&"https://api.test.com:8443/".parse().unwrap())
            .len(),
        1
    );
    assert!(group
        .limiters_for(&"https://api.test.com/".parse().unwrap())
        .is_empty());
}

#[test]
fn test_zero_interval_in_document() {
    let err = Ruleset::builder()
        .rules_from_value(json!({ "www.test.com": [{ "max_requests": 5, "request_interval": 0 }] }))
        .build()
        .unwrap_err();

    assert!(matches!(err, ConfigError::InvalidRule { .. }));
    assert_eq!(
        err.to_string(),
        "invalid rule for host `www.test.com`: request_interval must be greater than 0"
    );
}

#[test]
fn test_unbounded_interval_in_document() {
    let err = Ruleset::builder()
        .rules_from_value(json!({ "www.test.com": [{ "max_requests": 3, "request_interval": u64::MAX }] }))
        .build()
        .unwrap_err();

    assert!(matches!(
        err,
        ConfigError::InvalidRule {
            reason: RuleError::IntervalTooLong,
            ..
        }
    ));
}

#[test]
fn test_array_is_an_alias_of_memory() {
    let ruleset = Ruleset::builder().storage_adapter("array").build().unwrap();

    assert_eq!(ruleset.storage_name(), "array");
    assert_eq!(ruleset.storage().cache_config(), &CacheConfig::default());
}

#[test]
fn test_config_is_passed_to_adapter() {
    let config = CacheConfig::default()
        .with_ttl(Duration::from_secs(42))
        .with_allow_empty(true);

    let ruleset = Ruleset::builder().config(config.clone()).build().unwrap();

    assert_eq!(ruleset.storage().cache_config(), &config);
}

#[test]
fn test_build_is_logged() {
    let capture = MockCaptureLayer::new();
    let subscriber = tracing_subscriber::registry().with(capture.clone());

    tracing::subscriber::with_default(subscriber, || {
        Ruleset::builder()
            .rules("www.test.com", vec![Rule::new(1, Duration::from_secs(1)).unwrap()])
            .cache_strategy("cache")
            .build()
            .unwrap();
    });

    let events = capture.at_level(Level::INFO);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].fields["strategy"], "cache");
    assert_eq!(events[0].fields["storage"], "memory");
    assert_eq!(events[0].fields["hosts"], "1");
}
