//! Time sources for the routing core.
//!
//! Every component reads time through the [`Clock`] trait so the same code
//! runs against wall-clock time in a server and against a [`ManualClock`] in
//! the simulator and in tests, where time only moves when told to.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Millisecond time source shared by all components.
pub trait Clock: Send + Sync {
    /// Milliseconds since the clock's origin.
    fn now_ms(&self) -> u64;
}

/// Monotonic wall clock, origin at construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
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
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Virtual clock.
///
/// Time is tracked in microseconds internally for precision, but the
/// [`Clock`] interface exposes milliseconds. Interior mutability lets one
/// instance be shared behind an `Arc` by every component of a cluster.
#[derive(Debug, Default)]
pub struct ManualClock {
    current_us: AtomicU64,
}

impl ManualClock {
    /// Create a new clock starting at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock starting at a specific time in milliseconds.
    pub fn starting_at_ms(ms: u64) -> Self {
        Self {
            current_us: AtomicU64::new(ms * 1000),
        }
    }

    /// Current time in microseconds.
    pub fn now_us(&self) -> u64 {
        self.current_us.load(Ordering::Acquire)
    }

    /// Advance the clock to a specific time in milliseconds.
    ///
    /// # Panics
    ///
    /// Panics in debug mode if `ms` is in the past.
    pub fn advance_to_ms(&self, ms: u64) {
        self.advance_to_us(ms * 1000);
    }

    /// Advance the clock to a specific time in microseconds.
    pub fn advance_to_us(&self, us: u64) {
        let previous = self.current_us.swap(us, Ordering::AcqRel);
        debug_assert!(
            us >= previous,
            "Cannot move clock backwards: current={}us, target={}us",
            previous,
            us,
        );
    }

    /// Advance the clock by a duration in milliseconds.
    pub fn advance_by_ms(&self, delta_ms: u64) {
        self.current_us.fetch_add(delta_ms * 1000, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_us() / 1000
    }
}
