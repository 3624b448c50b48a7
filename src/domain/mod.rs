//! Domain layer - pure values with no I/O and no clock.
//!
//! This layer contains the core concepts of request throttling and caching:
//! - Time windows and expiry arithmetic
//! - Request limit rules and host patterns
//! - Request signatures for cache keys
//! - Counter and cached response records
//!
//! Every time-dependent query takes `now` as an argument.

pub mod record;
pub mod rule;
pub mod signature;
pub mod window;
