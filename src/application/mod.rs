//! Application layer - the stateful gateway components.
//!
//! This layer owns all runtime state and coordinates the domain logic:
//! - Rule registry (copy-on-write rule set and matching)
//! - Rate limiter (fixed-window counters)
//! - Circuit breaker (per-rule failure state machine)
//! - Response cache (TTL store)
//! - Metrics and health (running aggregates, health verdict)
//! - Dispatcher (per-request orchestration)
//! - Sweeper (periodic eviction)
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod cache;
pub mod circuit_breaker;
pub mod dispatcher;
pub mod health;
pub mod limiter;
pub mod metrics;
pub mod ports;
pub mod registry;
pub mod sweeper;
