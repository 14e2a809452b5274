//! Environment abstraction.
//!
//! The runtime never reads the clock or sleeps directly. Production uses the
//! system clock with tokio timers; tests use tokio's paused clock or turmoil's
//! simulated time so reconnect delays and heartbeats run instantly and
//! deterministically.

use std::{
    future::Future,
    time::{Duration, Instant},
};

/// Source of time for the agent runtime.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Sleep for `duration`.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}
