use std::thread;
use std::time::{Duration, Instant};

use cycler_core::clock::Clock;

use crate::interrupt::StopFlag;

/// Longest uninterrupted sleep, bounding how late a stop request is noticed.
pub const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Monotonic wall clock whose sleeps end early once a stop is requested.
///
/// Instants are offsets from the moment the clock was created.
#[derive(Clone, Debug)]
pub struct HostClock {
    origin: Instant,
    stop: StopFlag,
}

impl HostClock {
    #[must_use]
    pub fn new(stop: StopFlag) -> Self {
        Self {
            origin: Instant::now(),
            stop,
        }
    }
}

impl Clock for HostClock {
    type Instant = Duration;

    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.stop.is_requested() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(SLEEP_SLICE));
        }
    }
}
