//! Monotonic time source shared by the node state machines.
//!
//! State machines take `now` as an argument; runtimes read it from a [`Clock`].
//! `SystemClock` uses the embassy time driver, `ManualClock` is stepped by hand
//! for deterministic tests and simulations.

use core::cell::Cell;

use embassy_time::{Duration, Instant};

pub trait Clock {
    fn now(&self) -> Instant;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Clock backed by the embassy time driver
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Default)]
pub struct ManualClock {
    now_ms: Cell<u64>,
}

impl ManualClock {
    pub const fn new(start_ms: u64) -> Self {
        ManualClock {
            now_ms: Cell::new(start_ms),
        }
    }

    pub fn set_ms(&self, now_ms: u64) {
        self.now_ms.set(now_ms);
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.set(self.now_ms.get() + by.as_millis());
    }

    pub fn advance_ms(&self, by_ms: u64) {
        self.advance(Duration::from_millis(by_ms));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        Instant::from_millis(self.now_ms.get())
    }
}
