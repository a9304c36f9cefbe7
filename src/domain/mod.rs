//! Domain layer - pure types with no runtime state.
//!
//! This layer contains the vocabulary of the gateway:
//! - Path-pattern grammar used for rule matching
//! - Rules and their rate-limit, cache and breaker configuration
//! - Request context and caller identity
//! - Deny reasons, rate-limit info and reported outcomes
//!
//! All types in this layer are pure and easily testable.

pub mod decision;
pub mod request;
pub mod route;
pub mod rule;
pub mod time;
