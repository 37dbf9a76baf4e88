//! Wall Clock
//!
//! Monotonic milliseconds for network pacing (aim/move throttles, effects
//! batching) and turn-duration logging. The simulation itself never reads
//! this clock; it advances on its own fixed-step time.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Injectable monotonic clock.
pub trait Clock {
    /// Milliseconds since an arbitrary, fixed origin.
    fn now_ms(&self) -> u64;
}

/// Real clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Hand-driven clock for tests and the loopback demo.
///
/// Clones share the same time, so one handle can drive several sessions.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self { now: Rc::new(Cell::new(start_ms)) }
    }

    /// Jump to an absolute time. Time never runs backwards.
    pub fn set(&self, ms: u64) {
        self.now.set(self.now.get().max(ms));
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}
