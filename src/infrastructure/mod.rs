//! Infrastructure layer - external adapters and integrations.
//!
//! This layer provides adapters for:
//! - Clock abstraction (system time vs mock)
//! - Storage implementations (in-process maps, external cache backends)
//! - Redis as an external cache backend

pub mod backend_storage;
pub mod clock;
pub mod storage;

#[cfg(feature = "redis-storage")]
pub mod redis_backend;

/// Mock implementations for testing.
///
/// This module is only available when the `test-helpers` feature is enabled,
/// or during test builds. It provides a controllable clock, an in-memory
/// cache backend with failure injection, and a log-capturing layer.
///
/// To use these mocks in integration tests, add to your `Cargo.toml`:
/// ```toml
/// [dev-dependencies]
/// advanced-throttle = { version = "*", features = ["test-helpers"] }
/// ```
#[cfg(any(test, feature = "test-helpers"))]
pub mod mocks;
