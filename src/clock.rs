use std::time::{SystemTime, UNIX_EPOCH};

use crate::timestamp::Timestamp;

/// A source of record times for the writer.
///
/// Messages that carry no timestamp of their own are stamped from the
/// writer's clock at log time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time via `std::time::SystemTime`.
///
/// Susceptible to NTP adjustments, which is what the writer's clock skew
/// handling exists for.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        wall_clock_now()
    }
}

/// TSC-based clock via the `quanta` crate.
///
/// Anchors to wall time once at construction and advances with TSC ticks, so
/// it never runs backwards within a process.
#[derive(Debug, Clone)]
pub struct QuantaClock {
    clock: quanta::Clock,
    start_wall: Timestamp,
    start_instant: quanta::Instant,
}

impl Default for QuantaClock {
    fn default() -> Self {
        let clock = quanta::Clock::new();
        let start_instant = clock.now();
        Self {
            clock,
            start_wall: wall_clock_now(),
            start_instant,
        }
    }
}

impl QuantaClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for QuantaClock {
    fn now(&self) -> Timestamp {
        let delta = self.clock.now().duration_since(self.start_instant);
        let micros = i64::try_from(delta.as_micros()).unwrap_or(i64::MAX);
        self.start_wall.add_micros(micros)
    }
}

fn wall_clock_now() -> Timestamp {
    // Before-epoch wall clocks are reported as negative offsets.
    let micros = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(since) => i64::try_from(since.as_micros()).unwrap_or(i64::MAX),
        Err(err) => -i64::try_from(err.duration().as_micros()).unwrap_or(i64::MAX),
    };
    Timestamp::from_micros(micros)
}
