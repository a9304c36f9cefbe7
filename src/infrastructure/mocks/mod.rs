//! Test doubles for the gateway's ports and its log output.
//!
//! `MockClock` drives windows, TTLs and breaker timeouts deterministically;
//! `MockCaptureLayer` records the structured events the gateway emits.

pub mod clock;
pub mod layer;

pub use clock::MockClock;
pub use layer::{CapturedEvent, MockCaptureLayer};
