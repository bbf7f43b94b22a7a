//! Fixed-rate tick pacing.
//!
//! [`Pacer`] keeps an absolute deadline `next_t` and advances it by one
//! period per tick.  When a tick overruns its slot the pacer does not sleep
//! and resynchronizes `next_t` to the current time, so missed slots are
//! dropped rather than replayed in a burst.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use armpilot_types::PilotError;
use spin_sleep::{SpinSleeper, SpinStrategy};

/// Monotonic time source the control loop sleeps against.
pub trait Clock {
    fn now(&self) -> Instant;

    /// Block until `deadline`.  Returns immediately if it already passed.
    fn sleep_until(&mut self, deadline: Instant);
}

// ─────────────────────────────────────────────────────────────────────────────
// Clocks
// ─────────────────────────────────────────────────────────────────────────────

/// Wall clock backed by a [`SpinSleeper`] for sub-millisecond wake-up
/// accuracy.
pub struct SystemClock {
    sleeper: SpinSleeper,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            sleeper: SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&mut self, deadline: Instant) {
        let now = Instant::now();
        if deadline > now {
            self.sleeper.sleep(deadline - now);
        }
    }
}

/// A virtual clock that only moves when slept on or advanced explicitly.
///
/// Clones share the same time, so a test collaborator holding a clone can
/// simulate slow work inside a tick.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        let origin = Instant::now();
        Self {
            origin,
            now: Arc::new(Mutex::new(origin)),
        }
    }

    /// Simulate time spent doing work.
    pub fn advance(&self, by: Duration) {
        *self.lock() += by;
    }

    /// Virtual time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        *self.lock() - self.origin
    }

    fn lock(&self) -> MutexGuard<'_, Instant> {
        self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.lock()
    }

    fn sleep_until(&mut self, deadline: Instant) {
        let mut now = self.lock();
        if deadline > *now {
            *now = deadline;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pacer
// ─────────────────────────────────────────────────────────────────────────────

/// What happened at the end of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    /// Slept until the next slot.
    OnTime,
    /// The tick ran past its slot; the deadline was resynchronized.
    Overrun { behind: Duration },
}

#[derive(Debug, Clone)]
pub struct Pacer {
    period: Duration,
    next_t: Instant,
}

impl Pacer {
    /// Start pacing at `freq_hz` ticks per second from `start`.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::Config`] when `freq_hz` is zero.
    pub fn new(freq_hz: u32, start: Instant) -> Result<Self, PilotError> {
        if freq_hz == 0 {
            return Err(PilotError::Config("loop frequency must be positive".to_string()));
        }
        Ok(Self {
            period: Duration::from_secs(1) / freq_hz,
            next_t: start,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_t
    }

    /// Close the current tick: advance the deadline, then sleep or resync.
    pub fn wait<C: Clock + ?Sized>(&mut self, clock: &mut C) -> Pace {
        self.next_t += self.period;
        let now = clock.now();
        if now > self.next_t {
            let behind = now - self.next_t;
            self.next_t = now;
            Pace::Overrun { behind }
        } else {
            clock.sleep_until(self.next_t);
            Pace::OnTime
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_time_ticks_follow_the_period() {
        let mut clock = ManualClock::new();
        let mut pacer = Pacer::new(10, clock.now()).unwrap();
        for _ in 0..5 {
            clock.advance(Duration::from_millis(20));
            assert_eq!(pacer.wait(&mut clock), Pace::OnTime);
        }
        assert_eq!(clock.elapsed(), Duration::from_millis(500));
    }

    #[test]
    fn overrun_skips_sleep_and_resyncs() {
        let mut clock = ManualClock::new();
        let mut pacer = Pacer::new(10, clock.now()).unwrap();

        clock.advance(Duration::from_millis(250));
        assert_eq!(
            pacer.wait(&mut clock),
            Pace::Overrun {
                behind: Duration::from_millis(150)
            }
        );
        assert_eq!(pacer.next_deadline(), clock.now());

        // The next tick gets a full period from the resync point, not a burst.
        clock.advance(Duration::from_millis(10));
        assert_eq!(pacer.wait(&mut clock), Pace::OnTime);
        assert_eq!(clock.elapsed(), Duration::from_millis(350));
    }

    #[test]
    fn zero_frequency_is_rejected() {
        assert!(Pacer::new(0, Instant::now()).is_err());
    }

    #[test]
    fn system_clock_sleeps_at_least_until_deadline() {
        let mut clock = SystemClock::new();
        let deadline = clock.now() + Duration::from_millis(5);
        clock.sleep_until(deadline);
        assert!(Instant::now() >= deadline);
    }
}
