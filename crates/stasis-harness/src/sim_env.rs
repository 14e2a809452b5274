//! Simulated environment.

use std::{
    future::Future,
    time::{Duration, Instant},
};

use stasis_core::Environment;

/// Environment backed by tokio's clock.
///
/// Under `#[tokio::test(start_paused = true)]` or inside a turmoil
/// simulation the clock is virtual, so timers and timeouts resolve
/// instantly and deterministically.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimEnv;

impl SimEnv {
    /// Create a simulated environment.
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn clock_follows_virtual_time() {
        let env = SimEnv::new();
        let start = env.now();

        env.sleep(Duration::from_secs(30)).await;

        assert_eq!(env.now() - start, Duration::from_secs(30));
    }
}
