//! Spawn circuit breaker.
//!
//! Vetoes spawn work while the recent failure rate indicates systemic
//! trouble. Checked by the throttler only; callers never consult it
//! directly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use tracing::warn;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BreakerState {
    /// Normal operation; outcomes tracked in a sliding window.
    Closed = 0,
    /// Tripped; all spawn attempts rejected until the open window elapses.
    Open = 1,
    /// Probing; a small fixed number of trial spawns allowed.
    HalfOpen = 2,
}

impl BreakerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => BreakerState::Closed,
            1 => BreakerState::Open,
            _ => BreakerState::HalfOpen,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failure fraction over the window that trips the breaker.
    pub failure_threshold: f32,
    /// Sliding window size in outcomes.
    pub window: usize,
    /// Minimum outcomes in the window before the breaker may trip.
    pub min_samples: usize,
    /// How long the breaker stays open before probing.
    pub open_duration_ms: u64,
    /// Trial spawns allowed in half-open.
    pub half_open_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            window: 32,
            min_samples: 10,
            open_duration_ms: 30_000,
            half_open_probes: 3,
        }
    }
}

struct BreakerInner {
    outcomes: VecDeque<bool>,
    opened_at_ms: u64,
    probes_issued: u32,
    probes_succeeded: u32,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    state: AtomicU8,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(BreakerState::Closed as u8),
            inner: Mutex::new(BreakerInner {
                outcomes: VecDeque::new(),
                opened_at_ms: 0,
                probes_issued: 0,
                probes_succeeded: 0,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Whether a spawn attempt may proceed. In half-open this consumes one
    /// probe slot; in open it transitions to half-open once the open window
    /// has elapsed.
    pub fn allow_request(&self, now_ms: u64) -> bool {
        match self.state() {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let mut inner = self.inner.lock();
                if now_ms.saturating_sub(inner.opened_at_ms) >= self.config.open_duration_ms {
                    self.state.store(BreakerState::HalfOpen as u8, Ordering::Relaxed);
                    inner.probes_issued = 1;
                    inner.probes_succeeded = 0;
                    warn!("spawn circuit breaker half-open, probing");
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                let mut inner = self.inner.lock();
                if inner.probes_issued < self.config.half_open_probes {
                    inner.probes_issued += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, _now_ms: u64) {
        match self.state() {
            BreakerState::Closed => {
                let mut inner = self.inner.lock();
                Self::push_outcome(&mut inner, self.config.window, true);
            }
            BreakerState::HalfOpen => {
                let mut inner = self.inner.lock();
                inner.probes_succeeded += 1;
                if inner.probes_succeeded >= self.config.half_open_probes {
                    inner.outcomes.clear();
                    inner.probes_issued = 0;
                    inner.probes_succeeded = 0;
                    self.state.store(BreakerState::Closed as u8, Ordering::Relaxed);
                    warn!("spawn circuit breaker closed after successful probes");
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self, reason: &str, now_ms: u64) {
        match self.state() {
            BreakerState::Closed => {
                let mut inner = self.inner.lock();
                Self::push_outcome(&mut inner, self.config.window, false);

                let total = inner.outcomes.len();
                if total < self.config.min_samples {
                    return;
                }
                let failures = inner.outcomes.iter().filter(|ok| !**ok).count();
                let failure_rate = failures as f32 / total as f32;
                if failure_rate >= self.config.failure_threshold {
                    inner.opened_at_ms = now_ms;
                    self.state.store(BreakerState::Open as u8, Ordering::Relaxed);
                    warn!(
                        failure_rate,
                        window = total,
                        reason,
                        "spawn circuit breaker tripped open"
                    );
                }
            }
            BreakerState::HalfOpen => {
                // Any probe failure re-opens with a fresh timer.
                let mut inner = self.inner.lock();
                inner.opened_at_ms = now_ms;
                inner.probes_issued = 0;
                inner.probes_succeeded = 0;
                self.state.store(BreakerState::Open as u8, Ordering::Relaxed);
                warn!(reason, "spawn circuit breaker re-opened by failed probe");
            }
            BreakerState::Open => {}
        }
    }

    fn push_outcome(inner: &mut BreakerInner, window: usize, ok: bool) {
        inner.outcomes.push_back(ok);
        while inner.outcomes.len() > window {
            inner.outcomes.pop_front();
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
