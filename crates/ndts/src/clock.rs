//! Injectable time source.
//!
//! Partition metadata stamps `updatedAt` from a `Clock` so tests can pin
//! wall time instead of asserting against `SystemTime`.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Wall time as microseconds since the Unix epoch.
    fn wall_micros(&self) -> i64;
    /// Monotonic nanoseconds since an arbitrary origin.
    fn monotonic_nanos(&self) -> u64;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        SystemClock::new()
    }
}

impl Clock for SystemClock {
    fn wall_micros(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0)
    }

    fn monotonic_nanos(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Manually advanced clock for tests.
#[derive(Default)]
pub struct ManualClock {
    micros: AtomicI64,
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new(wall_micros: i64) -> Self {
        ManualClock {
            micros: AtomicI64::new(wall_micros),
            nanos: AtomicU64::new(0),
        }
    }

    pub fn advance_micros(&self, delta: i64) {
        self.micros.fetch_add(delta, Ordering::Relaxed);
        self.nanos
            .fetch_add((delta.max(0) as u64) * 1_000, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn wall_micros(&self) -> i64 {
        self.micros.load(Ordering::Relaxed)
    }

    fn monotonic_nanos(&self) -> u64 {
        self.nanos.load(Ordering::Relaxed)
    }
}
