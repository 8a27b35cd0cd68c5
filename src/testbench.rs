use crate::prelude::*;

/*
 * CLOCK
 */
/// Free-running clock driver. By default the low phase comes first, so the
/// first rising edge happens half a period after start. A clock built with
/// [`Clock::start_high`] rises as soon as it starts.
#[derive(Clone, Copy, Debug)]
pub struct Clock {
    signal: SimObject,
    high_steps: u64,
    low_steps: u64,
    start_high: bool,
}

impl Clock {
    pub fn new(signal: SimObject, period: f64, unit: TimeUnit) -> Self {
        let period_steps = SIM_IF.get_sim_steps(period, unit).max(2);
        let high_steps = period_steps / 2;
        let low_steps = period_steps - high_steps;
        if period_steps % 2 != 0 {
            log::warn!(
                "Clock period {}{} not dividable by 2 in simulation steps. \
                 High time will be {} steps; low time will be {} steps.",
                period,
                unit,
                high_steps,
                low_steps
            );
        }
        Clock {
            signal,
            high_steps,
            low_steps,
            start_high: false,
        }
    }

    pub fn start_high(mut self) -> Self {
        self.start_high = true;
        self
    }

    pub fn period_steps(&self) -> u64 {
        self.high_steps + self.low_steps
    }

    pub async fn run(self) -> TbResult {
        if self.start_high {
            self.signal.set(1);
            Trigger::timer_steps(self.high_steps).await;
        }
        loop {
            self.signal.set(0);
            Trigger::timer_steps(self.low_steps).await;
            self.signal.set(1);
            Trigger::timer_steps(self.high_steps).await;
        }
    }

    /// Forks the clock; it runs until the test ends.
    pub fn start(self) -> JoinHandle {
        log::debug!(
            "Starting clock on {} with period {} steps",
            self.signal.name(),
            self.period_steps()
        );
        Task::fork(self.run())
    }
}
