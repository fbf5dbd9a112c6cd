//! Time source for settle delays, poll intervals and lease expiry.

use std::time::{Duration, Instant};

/// Blocking sleep plus a monotonic reading.
///
/// Every delay in the engine goes through this trait so tests can run the
/// full state machines against virtual time.
pub trait Clock: Send + Sync {
    /// Block the current thread for `duration`.
    fn sleep(&self, duration: Duration);

    /// Monotonic time since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// Wall-clock implementation backed by [`std::thread::sleep`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}
