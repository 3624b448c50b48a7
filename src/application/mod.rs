//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain logic and manages the runtime behavior:
//! - Time keeper (window tracking against a clock)
//! - Rate limiter (decision making across rules and hosts)
//! - Cache strategies (answering from storage or forwarding)
//! - Ruleset (configuration and name registries)
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod config;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod ports;
pub mod ruleset;
pub mod strategy;
pub mod time_keeper;
