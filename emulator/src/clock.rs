use std::rc::Rc;
use std::time::Duration;

use cycler_core::clock::Clock;

use crate::instruments::SimHandle;

/// Clock reading the simulator's virtual time; sleeping advances the simulation.
#[derive(Clone, Debug)]
pub struct VirtualClock {
    sim: SimHandle,
}

impl VirtualClock {
    #[must_use]
    pub fn new(sim: &SimHandle) -> Self {
        Self { sim: Rc::clone(sim) }
    }
}

impl Clock for VirtualClock {
    type Instant = Duration;

    fn now(&self) -> Duration {
        self.sim.borrow().now()
    }

    fn sleep(&mut self, duration: Duration) {
        self.sim.borrow_mut().advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{CellParams, SimulatedCell};
    use crate::instruments::Simulator;
    use cycler_core::clock::{SAMPLE_PERIOD, pace};
    use cycler_core::cycle::ChargeWiring;

    #[test]
    fn sleeping_moves_the_simulation() {
        let sim = Simulator::new(
            SimulatedCell::new(&CellParams::default()),
            ChargeWiring::isolated(),
        )
        .into_handle();
        let mut clock = VirtualClock::new(&sim);

        let started = clock.now();
        sim.borrow_mut().advance(Duration::from_millis(250));
        let slept = pace(&mut clock, started, SAMPLE_PERIOD);

        assert_eq!(slept, Some(Duration::from_millis(750)));
        assert_eq!(clock.now(), SAMPLE_PERIOD);
    }
}
