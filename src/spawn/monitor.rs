//! Host resource pressure monitoring.
//!
//! Discretizes raw host samples (CPU, memory, database backlog, world tick
//! latency, active bot count) into a pressure level the throttler consumes.
//! The level tracks the worst individual signal and is damped so a single
//! outlier sample cannot flap it.

use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;

/// Discrete host pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PressureLevel {
    None = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl PressureLevel {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PressureLevel::None,
            1 => PressureLevel::Low,
            2 => PressureLevel::Medium,
            3 => PressureLevel::High,
            _ => PressureLevel::Critical,
        }
    }
}

/// One host sample. Fields the host cannot measure stay zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostSample {
    pub cpu_percent: f32,
    pub memory_mb: u32,
    pub db_queue_len: u32,
    pub world_tick_ms: u32,
    pub active_bots: u32,
}

/// High-water marks per signal. A signal at or past its mark is critical.
#[derive(Debug, Clone)]
pub struct ResourceThresholds {
    pub cpu_high_percent: f32,
    pub memory_high_mb: u32,
    pub db_queue_high: u32,
    pub world_tick_high_ms: u32,
    pub active_bots_high: u32,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            cpu_high_percent: 90.0,
            memory_high_mb: 12_288,
            db_queue_high: 500,
            world_tick_high_ms: 400,
            active_bots_high: 5_500,
        }
    }
}

// Fraction-of-high-water bands for the sub-critical levels.
const LOW_BAND: f32 = 0.5;
const MEDIUM_BAND: f32 = 0.7;
const HIGH_BAND: f32 = 0.85;

/// How many consecutive samples a new level must hold before publishing.
const CONFIRM_SAMPLES: u32 = 2;

struct MonitorState {
    candidate: PressureLevel,
    candidate_streak: u32,
    last_sample: HostSample,
}

/// Samples host pressure once per scheduler tick.
pub struct ResourceMonitor {
    thresholds: ResourceThresholds,
    published: AtomicU8,
    state: Mutex<MonitorState>,
}

impl ResourceMonitor {
    pub fn new(thresholds: ResourceThresholds) -> Self {
        Self {
            thresholds,
            published: AtomicU8::new(PressureLevel::None as u8),
            state: Mutex::new(MonitorState {
                candidate: PressureLevel::None,
                candidate_streak: 0,
                last_sample: HostSample::default(),
            }),
        }
    }

    fn level_for_fraction(fraction: f32) -> PressureLevel {
        if fraction >= 1.0 {
            PressureLevel::Critical
        } else if fraction >= HIGH_BAND {
            PressureLevel::High
        } else if fraction >= MEDIUM_BAND {
            PressureLevel::Medium
        } else if fraction >= LOW_BAND {
            PressureLevel::Low
        } else {
            PressureLevel::None
        }
    }

    fn classify(&self, sample: &HostSample) -> PressureLevel {
        let t = &self.thresholds;
        let fractions = [
            sample.cpu_percent / t.cpu_high_percent,
            sample.memory_mb as f32 / t.memory_high_mb as f32,
            sample.db_queue_len as f32 / t.db_queue_high as f32,
            sample.world_tick_ms as f32 / t.world_tick_high_ms as f32,
            sample.active_bots as f32 / t.active_bots_high as f32,
        ];
        // Level follows the worst individual signal.
        fractions
            .iter()
            .map(|f| Self::level_for_fraction(*f))
            .max()
            .unwrap_or(PressureLevel::None)
    }

    /// Feed one sample; called once per scheduler tick.
    pub fn sample(&self, sample: HostSample) {
        let level = self.classify(&sample);
        let mut state = self.state.lock();
        state.last_sample = sample;

        if level as u8 == self.published.load(Ordering::Relaxed) {
            state.candidate = level;
            state.candidate_streak = 0;
            return;
        }

        if level == state.candidate {
            state.candidate_streak += 1;
        } else {
            state.candidate = level;
            state.candidate_streak = 1;
        }

        if state.candidate_streak >= CONFIRM_SAMPLES {
            self.published.store(level as u8, Ordering::Relaxed);
            state.candidate_streak = 0;
        }
    }

    /// Currently published pressure level.
    pub fn pressure(&self) -> PressureLevel {
        PressureLevel::from_u8(self.published.load(Ordering::Relaxed))
    }

    /// Last raw sample, with the bot count the core fed back.
    pub fn last_sample(&self) -> HostSample {
        self.state.lock().last_sample
    }

    pub fn active_bot_count(&self) -> u32 {
        self.state.lock().last_sample.active_bots
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new(ResourceThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_sample(cpu: f32) -> HostSample {
        HostSample { cpu_percent: cpu, ..Default::default() }
    }

    #[test]
    fn test_idle_is_none() {
        let monitor = ResourceMonitor::default();
        monitor.sample(HostSample::default());
        monitor.sample(HostSample::default());
        assert_eq!(monitor.pressure(), PressureLevel::None);
    }

    #[test]
    fn test_worst_signal_wins() {
        let monitor = ResourceMonitor::default();
        // CPU fine, database backlog at high-water.
        let sample = HostSample { cpu_percent: 10.0, db_queue_len: 500, ..Default::default() };
        monitor.sample(sample);
        monitor.sample(sample);
        assert_eq!(monitor.pressure(), PressureLevel::Critical);
    }

    #[test]
    fn test_single_sample_does_not_flap() {
        let monitor = ResourceMonitor::default();
        // One hot sample, then back to idle: level must hold.
        monitor.sample(cpu_sample(95.0));
        assert_eq!(monitor.pressure(), PressureLevel::None);
        monitor.sample(cpu_sample(5.0));
        monitor.sample(cpu_sample(5.0));
        assert_eq!(monitor.pressure(), PressureLevel::None);
    }

    #[test]
    fn test_sustained_crossing_raises_level() {
        let monitor = ResourceMonitor::default();
        monitor.sample(cpu_sample(95.0));
        monitor.sample(cpu_sample(95.0));
        assert_eq!(monitor.pressure(), PressureLevel::Critical);
    }

    #[test]
    fn test_graduated_bands() {
        let monitor = ResourceMonitor::default();
        // 60% of the 90% CPU mark: 54% CPU -> Low band.
        let sample = cpu_sample(90.0 * 0.6);
        monitor.sample(sample);
        monitor.sample(sample);
        assert_eq!(monitor.pressure(), PressureLevel::Low);

        let sample = cpu_sample(90.0 * 0.75);
        monitor.sample(sample);
        monitor.sample(sample);
        assert_eq!(monitor.pressure(), PressureLevel::Medium);

        let sample = cpu_sample(90.0 * 0.9);
        monitor.sample(sample);
        monitor.sample(sample);
        assert_eq!(monitor.pressure(), PressureLevel::High);
    }

    #[test]
    fn test_monotone_in_worst_signal() {
        let monitor = ResourceMonitor::default();
        let mut previous = PressureLevel::None;
        for cpu in [30.0, 50.0, 65.0, 80.0, 95.0] {
            let sample = cpu_sample(cpu);
            monitor.sample(sample);
            monitor.sample(sample);
            let level = monitor.pressure();
            assert!(level >= previous);
            previous = level;
        }
        assert_eq!(previous, PressureLevel::Critical);
    }

    #[test]
    fn test_active_bot_count_feedback() {
        let monitor = ResourceMonitor::default();
        let sample = HostSample { active_bots: 6000, ..Default::default() };
        monitor.sample(sample);
        monitor.sample(sample);
        assert_eq!(monitor.active_bot_count(), 6000);
        assert_eq!(monitor.pressure(), PressureLevel::Critical);
    }
}
