//! Adaptive spawn rate limiting.
//!
//! Turns resource pressure, circuit-breaker state and recent spawn outcomes
//! into a token-bucket rate. The breaker is owned here and consulted on
//! every permit check; callers never talk to it directly.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::spawn::breaker::{BreakerState, CircuitBreaker};
use crate::spawn::monitor::PressureLevel;

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Inclusive permitted-rate bounds, bots per second.
    pub rate_min: f64,
    pub rate_max: f64,
    /// Rate at bring-up.
    pub initial_rate: f64,
    /// Multiplicative widening per success.
    pub growth_factor: f64,
    /// Multiplicative narrowing per failure.
    pub shrink_factor: f64,
    /// Outcome window used for the success-ratio telemetry.
    pub outcome_window: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            rate_min: 0.2,
            rate_max: 20.0,
            initial_rate: 1.0,
            growth_factor: 1.05,
            shrink_factor: 0.8,
            outcome_window: 32,
        }
    }
}

fn pressure_ceiling_factor(pressure: PressureLevel) -> f64 {
    match pressure {
        PressureLevel::None => 1.0,
        PressureLevel::Low => 0.6,
        PressureLevel::Medium => 0.35,
        PressureLevel::High => 0.15,
        PressureLevel::Critical => 0.0,
    }
}

struct ThrottleInner {
    /// Learned base rate, adjusted by outcomes.
    rate: f64,
    tokens: f64,
    last_refill_ms: u64,
    /// Smoothing anchor: the rate may at most double within one second.
    anchor_ms: u64,
    anchor_rate: f64,
    outcomes: VecDeque<bool>,
}

/// Pressure- and outcome-driven spawn rate limiter.
pub struct SpawnThrottler {
    config: ThrottleConfig,
    breaker: CircuitBreaker,
    inner: Mutex<ThrottleInner>,
}

impl SpawnThrottler {
    pub fn new(config: ThrottleConfig, breaker: CircuitBreaker) -> Self {
        let initial = config.initial_rate.clamp(config.rate_min, config.rate_max);
        Self {
            breaker,
            inner: Mutex::new(ThrottleInner {
                rate: initial,
                tokens: initial.max(1.0),
                last_refill_ms: 0,
                anchor_ms: 0,
                anchor_rate: initial,
                outcomes: VecDeque::new(),
            }),
            config,
        }
    }

    /// Permitted rate under the given pressure, bots per second.
    pub fn permitted_rate(&self, pressure: PressureLevel) -> f64 {
        if pressure == PressureLevel::Critical {
            return 0.0;
        }
        let inner = self.inner.lock();
        let ceiling = self.config.rate_max * pressure_ceiling_factor(pressure);
        inner.rate.min(ceiling).max(self.config.rate_min.min(ceiling))
    }

    /// Refill tokens; called once per scheduler tick.
    pub fn tick(&self, now_ms: u64, pressure: PressureLevel) {
        let rate = self.permitted_rate(pressure);
        let mut inner = self.inner.lock();
        let elapsed = now_ms.saturating_sub(inner.last_refill_ms);
        inner.last_refill_ms = now_ms;
        if rate > 0.0 {
            let burst = rate.max(1.0);
            inner.tokens = (inner.tokens + rate * elapsed as f64 / 1000.0).min(burst);
        }
        if now_ms.saturating_sub(inner.anchor_ms) >= 1000 {
            inner.anchor_ms = now_ms;
            inner.anchor_rate = inner.rate;
        }
    }

    /// Consume one spawn permit if available right now.
    ///
    /// False when the breaker is open, pressure is critical, or the bucket
    /// is empty. The breaker check comes last so half-open probe slots are
    /// only consumed by attempts that would otherwise proceed.
    pub fn can_spawn_now(&self, now_ms: u64, pressure: PressureLevel) -> bool {
        if pressure == PressureLevel::Critical {
            return false;
        }
        {
            let inner = self.inner.lock();
            if inner.tokens < 1.0 {
                return false;
            }
        }
        if !self.breaker.allow_request(now_ms) {
            return false;
        }
        let mut inner = self.inner.lock();
        if inner.tokens < 1.0 {
            return false;
        }
        inner.tokens -= 1.0;
        true
    }

    pub fn record_success(&self, now_ms: u64) {
        self.breaker.record_success(now_ms);
        let mut inner = self.inner.lock();
        Self::push_outcome(&mut inner, self.config.outcome_window, true);
        let widened = inner.rate * self.config.growth_factor;
        // Never more than double within a second.
        let smoothed = widened.min(inner.anchor_rate * 2.0);
        inner.rate = smoothed.clamp(self.config.rate_min, self.config.rate_max);
    }

    pub fn record_failure(&self, reason: &str, now_ms: u64) {
        self.breaker.record_failure(reason, now_ms);
        let mut inner = self.inner.lock();
        Self::push_outcome(&mut inner, self.config.outcome_window, false);
        let narrowed = inner.rate * self.config.shrink_factor;
        inner.rate = narrowed.clamp(self.config.rate_min, self.config.rate_max);
    }

    fn push_outcome(inner: &mut ThrottleInner, window: usize, ok: bool) {
        inner.outcomes.push_back(ok);
        while inner.outcomes.len() > window {
            inner.outcomes.pop_front();
        }
    }

    /// Success fraction over the recent outcome window; 1.0 with no data.
    pub fn success_ratio(&self) -> f64 {
        let inner = self.inner.lock();
        if inner.outcomes.is_empty() {
            return 1.0;
        }
        let ok = inner.outcomes.iter().filter(|o| **o).count();
        ok as f64 / inner.outcomes.len() as f64
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}
