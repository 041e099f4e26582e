//! Time source used by the control loops.
//!
//! Controllers never read the wall clock directly. The bench supplies a
//! monotonic host clock whose sleep can be cut short by an operator stop; the
//! emulator supplies a virtual clock whose sleep advances the simulated cell.

use core::time::Duration;

use crate::telemetry::TelemetryInstant;

/// Target interval between two samples.
pub const SAMPLE_PERIOD: Duration = Duration::from_secs(1);

/// Monotonic time source plus a blocking delay.
pub trait Clock {
    type Instant: TelemetryInstant;

    /// Returns the current instant.
    fn now(&self) -> Self::Instant;

    /// Blocks for `duration`. Implementations may return early when a stop was requested.
    fn sleep(&mut self, duration: Duration);
}

impl<T> Clock for &mut T
where
    T: Clock + ?Sized,
{
    type Instant = T::Instant;

    fn now(&self) -> Self::Instant {
        (**self).now()
    }

    fn sleep(&mut self, duration: Duration) {
        (**self).sleep(duration);
    }
}

/// Remaining part of `period` after `spent`, or `None` when nothing is left.
#[must_use]
pub fn residual_delay(period: Duration, spent: Duration) -> Option<Duration> {
    period.checked_sub(spent).filter(|delay| !delay.is_zero())
}

/// Sleeps whatever is left of `period` since `started`.
///
/// Returns the delay that was slept, if any.
pub fn pace<C>(clock: &mut C, started: C::Instant, period: Duration) -> Option<Duration>
where
    C: Clock + ?Sized,
{
    let spent = clock.now().saturating_duration_since(started);
    let delay = residual_delay(period, spent)?;
    clock.sleep(delay);
    Some(delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StepClock {
        now: Duration,
        slept: alloc::vec::Vec<Duration>,
    }

    impl Clock for StepClock {
        type Instant = Duration;

        fn now(&self) -> Duration {
            self.now
        }

        fn sleep(&mut self, duration: Duration) {
            self.slept.push(duration);
            self.now += duration;
        }
    }

    #[test]
    fn residual_is_period_minus_spent() {
        assert_eq!(
            residual_delay(SAMPLE_PERIOD, Duration::from_millis(300)),
            Some(Duration::from_millis(700))
        );
    }

    #[test]
    fn residual_never_negative() {
        assert_eq!(residual_delay(SAMPLE_PERIOD, Duration::from_millis(1500)), None);
        assert_eq!(residual_delay(SAMPLE_PERIOD, SAMPLE_PERIOD), None);
    }

    #[test]
    fn pace_sleeps_only_the_remainder() {
        let mut clock = StepClock {
            now: Duration::from_millis(250),
            slept: alloc::vec::Vec::new(),
        };

        let slept = pace(&mut clock, Duration::ZERO, SAMPLE_PERIOD);
        assert_eq!(slept, Some(Duration::from_millis(750)));
        assert_eq!(clock.now, SAMPLE_PERIOD);

        clock.now = Duration::from_millis(2500);
        assert_eq!(pace(&mut clock, SAMPLE_PERIOD, SAMPLE_PERIOD), None);
        assert_eq!(clock.slept.len(), 1);
    }
}
