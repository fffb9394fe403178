use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub cycles: u64,
    pub overruns: u64,
    pub max_cycle: Duration,
}

impl CycleStats {
    fn record(&mut self, elapsed: Duration, period: Duration) -> bool {
        self.cycles += 1;
        if elapsed > self.max_cycle {
            self.max_cycle = elapsed;
        }
        let overrun = elapsed > period;
        if overrun {
            self.overruns += 1;
        }
        overrun
    }
}

/// Calls a cycle body at a fixed period until stopped.
///
/// Wake-ups are scheduled on absolute deadlines so that the period does not
/// drift. After an overrun the schedule restarts from the current time.
#[derive(Debug)]
pub struct CycleTask {
    period: Duration,
    running: Arc<AtomicBool>,
    stats: CycleStats,
}

impl CycleTask {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            running: Arc::new(AtomicBool::new(true)),
            stats: CycleStats::default(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Flag checked before every cycle, storing `false` stops the task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Runs `body` once per period, with the index of the cycle.
    ///
    /// Returns when the task is stopped or on the first error of `body`.
    pub fn run<F, E>(&mut self, mut body: F) -> Result<(), E>
    where
        F: FnMut(u64) -> Result<(), E>,
    {
        log::info!("Starting cycle task, period {:?}", self.period);

        let mut deadline = Instant::now();
        while self.is_running() {
            let start = Instant::now();
            body(self.stats.cycles)?;
            let elapsed = start.elapsed();

            if self.stats.record(elapsed, self.period) {
                log::warn!(
                    "Cycle {} overrun: {:?} > {:?}",
                    self.stats.cycles,
                    elapsed,
                    self.period
                );
            }

            deadline += self.period;
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            } else {
                deadline = now;
            }
        }

        log::info!(
            "Cycle task stopped after {} cycles ({} overruns, longest {:?})",
            self.stats.cycles,
            self.stats.overruns,
            self.stats.max_cycle
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_until_stopped() {
        let mut task = CycleTask::new(Duration::from_micros(200));
        let stop = task.stop_handle();

        let mut seen = vec![];
        task.run(|cycle| -> Result<(), ()> {
            seen.push(cycle);
            if cycle == 4 {
                stop.store(false, Ordering::SeqCst);
            }
            Ok(())
        })
        .unwrap();

        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(task.stats().cycles, 5);
        assert!(!task.is_running());
    }

    #[test]
    fn keeps_the_period() {
        let mut task = CycleTask::new(Duration::from_millis(2));
        let stop = task.stop_handle();

        let start = Instant::now();
        task.run(|cycle| -> Result<(), ()> {
            if cycle == 9 {
                stop.store(false, Ordering::SeqCst);
            }
            Ok(())
        })
        .unwrap();

        // ten periods, the last sleep included
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn stops_on_the_first_error() {
        let mut task = CycleTask::new(Duration::from_micros(100));

        let result = task.run(|cycle| if cycle == 2 { Err(cycle) } else { Ok(()) });

        assert_eq!(result, Err(2));
        assert_eq!(task.stats().cycles, 2);
        assert!(task.is_running());
    }

    #[test]
    fn stopped_task_does_not_run() {
        let mut task = CycleTask::new(Duration::from_micros(100));
        task.stop();

        task.run(|_| -> Result<(), ()> { panic!("cycle body called") })
            .unwrap();
        assert_eq!(task.stats(), &CycleStats::default());
    }

    #[test]
    fn overruns_are_counted() {
        let mut stats = CycleStats::default();
        let period = Duration::from_millis(1);

        assert!(!stats.record(Duration::from_micros(400), period));
        assert!(stats.record(Duration::from_micros(1500), period));
        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.overruns, 1);
        assert_eq!(stats.max_cycle, Duration::from_micros(1500));
    }
}
