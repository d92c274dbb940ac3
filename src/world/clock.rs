//! Monotonic time source abstraction.
//!
//! The scheduler never reads the OS clock directly; everything time-based
//! (token refill, breaker open windows, startup phases) goes through this
//! trait so tests can drive time by hand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Monotonic millisecond source.
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary fixed origin. Monotone non-decreasing.
    fn now_ms(&self) -> u64;

    /// Wall-clock unix timestamp in seconds.
    fn now_timestamp(&self) -> u64;
}

/// Production clock backed by `Instant`.
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

    fn now_timestamp(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Hand-driven clock for deterministic tests.
pub struct ManualClock {
    ms: AtomicU64,
    epoch_secs: u64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { ms: AtomicU64::new(0), epoch_secs: 1_700_000_000 }
    }

    pub fn advance(&self, delta_ms: u64) {
        self.ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.ms.store(ms, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.ms.load(Ordering::SeqCst)
    }

    fn now_timestamp(&self) -> u64 {
        self.epoch_secs + self.ms.load(Ordering::SeqCst) / 1000
    }
}
