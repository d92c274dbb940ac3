//! Global spawn statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic spawn counters. Relaxed ordering is sufficient; these are
/// telemetry, never control flow.
#[derive(Debug, Default)]
pub struct GlobalStats {
    pub total_spawned: AtomicU64,
    pub total_despawned: AtomicU64,
    pub peak_concurrent: AtomicU64,
    pub failed_spawns: AtomicU64,
    pub spawn_attempts: AtomicU64,
}

/// Plain-value copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_spawned: u64,
    pub total_despawned: u64,
    pub currently_active: u64,
    pub peak_concurrent: u64,
    pub failed_spawns: u64,
    pub spawn_attempts: u64,
}

impl GlobalStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) {
        self.spawn_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed spawn and fold the new active count into the peak.
    pub fn record_spawned(&self, active_now: u64) {
        self.total_spawned.fetch_add(1, Ordering::Relaxed);
        self.peak_concurrent.fetch_max(active_now, Ordering::Relaxed);
    }

    pub fn record_despawned(&self) {
        self.total_despawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_spawns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, currently_active: u64) -> StatsSnapshot {
        StatsSnapshot {
            total_spawned: self.total_spawned.load(Ordering::Relaxed),
            total_despawned: self.total_despawned.load(Ordering::Relaxed),
            currently_active,
            peak_concurrent: self.peak_concurrent.load(Ordering::Relaxed),
            failed_spawns: self.failed_spawns.load(Ordering::Relaxed),
            spawn_attempts: self.spawn_attempts.load(Ordering::Relaxed),
        }
    }
}
