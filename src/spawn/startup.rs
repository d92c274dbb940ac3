//! Phased startup orchestration.
//!
//! Applies a graduated per-second spawn budget for a bounded wall-clock
//! window after engagement, so a cold server does not stampede the
//! database. After the final phase the throttler alone governs the rate.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::info;

/// Phase boundaries (elapsed since engagement) and per-second budgets.
#[derive(Debug, Clone)]
pub struct StartupPhases {
    pub phase1_until_ms: u64,
    pub phase1_per_second: u32,
    pub phase2_until_ms: u64,
    pub phase2_per_second: u32,
    pub phase3_until_ms: u64,
    pub phase3_per_second: u32,
}

impl Default for StartupPhases {
    fn default() -> Self {
        Self {
            phase1_until_ms: 60_000,
            phase1_per_second: 1,
            phase2_until_ms: 180_000,
            phase2_per_second: 3,
            phase3_until_ms: 300_000,
            phase3_per_second: 5,
        }
    }
}

struct SecondBudget {
    second_start_ms: u64,
    spent: u32,
}

/// Graduated bring-up state machine.
///
/// Disarmed orchestrators report phase 0 and deny all spawns; the scheduler
/// engages them either at init (spawn-on-server-start) or at the first real
/// player arrival.
pub struct StartupOrchestrator {
    phases: StartupPhases,
    engaged: AtomicBool,
    engaged_at_ms: AtomicU64,
    budget: Mutex<SecondBudget>,
}

impl StartupOrchestrator {
    pub fn new(phases: StartupPhases) -> Self {
        Self {
            phases,
            engaged: AtomicBool::new(false),
            engaged_at_ms: AtomicU64::new(0),
            budget: Mutex::new(SecondBudget { second_start_ms: 0, spent: 0 }),
        }
    }

    /// Begin the phased window. Idempotent.
    pub fn engage(&self, now_ms: u64) {
        if self
            .engaged
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.engaged_at_ms.store(now_ms, Ordering::SeqCst);
            info!("startup orchestrator engaged, phased spawn window begins");
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }

    /// Current phase: 0 disengaged, 1..=3 graduated, 4 unrestricted.
    pub fn phase(&self, now_ms: u64) -> u8 {
        if !self.is_engaged() {
            return 0;
        }
        let elapsed = now_ms.saturating_sub(self.engaged_at_ms.load(Ordering::SeqCst));
        if elapsed < self.phases.phase1_until_ms {
            1
        } else if elapsed < self.phases.phase2_until_ms {
            2
        } else if elapsed < self.phases.phase3_until_ms {
            3
        } else {
            4
        }
    }

    fn budget_for_phase(&self, phase: u8) -> Option<u32> {
        match phase {
            1 => Some(self.phases.phase1_per_second),
            2 => Some(self.phases.phase2_per_second),
            3 => Some(self.phases.phase3_per_second),
            _ => None,
        }
    }

    /// Whether the current second's phase budget has headroom.
    pub fn should_spawn_next(&self, now_ms: u64) -> bool {
        let phase = self.phase(now_ms);
        if phase == 0 {
            return false;
        }
        let Some(per_second) = self.budget_for_phase(phase) else {
            // Phase 4: defer entirely to the throttler.
            return true;
        };

        let mut budget = self.budget.lock();
        if now_ms.saturating_sub(budget.second_start_ms) >= 1000 {
            budget.second_start_ms = now_ms;
            budget.spent = 0;
        }
        budget.spent < per_second
    }

    /// Charge one spawn against the current second's budget.
    pub fn on_bot_spawned(&self, now_ms: u64) {
        let mut budget = self.budget.lock();
        if now_ms.saturating_sub(budget.second_start_ms) >= 1000 {
            budget.second_start_ms = now_ms;
            budget.spent = 0;
        }
        budget.spent += 1;
    }
}

impl Default for StartupOrchestrator {
    fn default() -> Self {
        Self::new(StartupPhases::default())
    }
}
