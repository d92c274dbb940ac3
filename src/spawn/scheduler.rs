//! Spawner core.
//!
//! Owns the queue, throttler, breaker, monitor and orchestrator, enforces
//! the global population cap with an atomic reservation, and runs the
//! asynchronous character selection / session creation pipeline on the
//! runtime. The host drives it with `update()` once per tick; exceptions
//! never escape that boundary.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::config::SpawnConfig;
use crate::metrics::Metrics;
use crate::spawn::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use crate::spawn::creation::CharacterFactory;
use crate::spawn::error::SpawnError;
use crate::spawn::monitor::{HostSample, PressureLevel, ResourceMonitor, ResourceThresholds};
use crate::spawn::population::{PopulationTracker, TargetParams};
use crate::spawn::queue::{QueueMetrics, SpawnQueue};
use crate::spawn::request::{PrioritySpawnRequest, SpawnKind, SpawnPriority, SpawnRequest};
use crate::spawn::startup::{StartupOrchestrator, StartupPhases};
use crate::spawn::stats::{GlobalStats, StatsSnapshot};
use crate::spawn::throttle::{SpawnThrottler, ThrottleConfig};
use crate::world::accounts::AccountSource;
use crate::world::cache::CharacterCache;
use crate::world::clock::Clock;
use crate::world::distribution::CharacterDistribution;
use crate::world::ids::{AccountId, CharacterGuid, MapId, ZoneId};
use crate::world::names::NameAllocator;
use crate::world::persistence::{CharacterRow, Persistence};
#[cfg(feature = "jit_registry")]
use crate::world::persistence::{Database, TxStatement};
use crate::world::session::SessionManager;

/// Failed zone/random spawns re-enqueue at most this many times.
const MAX_SPAWN_RETRIES: u32 = 3;

/// Why a bot is being removed from the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DespawnReason {
    /// Explicit caller request.
    Requested,
    /// Zone population above target.
    Excess,
    /// Scheduler shutdown.
    Shutdown,
}

/// External collaborators consumed by the scheduler.
pub struct SchedulerDeps {
    pub accounts: Arc<dyn AccountSource>,
    pub names: Arc<dyn NameAllocator>,
    pub distribution: Arc<dyn CharacterDistribution>,
    pub persistence: Arc<dyn Persistence>,
    pub sessions: Arc<dyn SessionManager>,
    pub cache: Arc<dyn CharacterCache>,
    pub clock: Arc<dyn Clock>,
}

/// Component tuning, overridable for tests and special deployments.
#[derive(Debug, Clone, Default)]
pub struct SchedulerTuning {
    pub breaker: BreakerConfig,
    pub throttle: ThrottleConfig,
    pub phases: StartupPhases,
    pub thresholds: ResourceThresholds,
}

/// Result of one finished pipeline run, reported back to `update()`.
struct SpawnOutcome {
    result: Result<CharacterGuid, SpawnError>,
    retry: Option<SpawnRequest>,
    retry_count: u32,
    reason: String,
}

/// Shared state the async pipeline tasks need.
struct PipelineCtx {
    population: Arc<PopulationTracker>,
    stats: Arc<GlobalStats>,
    accounts: Arc<dyn AccountSource>,
    persistence: Arc<dyn Persistence>,
    sessions: Arc<dyn SessionManager>,
    factory: Arc<CharacterFactory>,
    outcome_tx: Sender<SpawnOutcome>,
    auto_create: bool,
}

/// RAII release for an atomic busy flag acquired with compare-and-set.
/// Dropping the guard clears the flag, including during unwinding.
struct FlagGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlagGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then_some(Self { flag })
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// The bot spawn scheduler.
pub struct BotScheduler {
    config: SpawnConfig,
    queue: SpawnQueue,
    monitor: ResourceMonitor,
    throttler: SpawnThrottler,
    orchestrator: StartupOrchestrator,
    population: Arc<PopulationTracker>,
    stats: Arc<GlobalStats>,
    pipeline: Arc<PipelineCtx>,
    deps: SchedulerDeps,
    metrics: Arc<Metrics>,
    runtime: Handle,
    outcome_rx: Receiver<SpawnOutcome>,
    host_sample: Mutex<HostSample>,
    enabled: AtomicBool,
    /// Exclusive queue-drain flag; at most one drain body runs at a time.
    drain_flag: AtomicBool,
    /// Reentrancy guard for the player-arrival activation check.
    activation_flag: AtomicBool,
    last_reconcile_ms: AtomicU64,
    last_spawn_ms: AtomicU64,
}

impl BotScheduler {
    /// Build a scheduler with default component tuning. Must be called from
    /// within a tokio runtime; pipeline tasks are spawned onto it.
    pub fn new(config: SpawnConfig, deps: SchedulerDeps, metrics: Arc<Metrics>) -> Arc<Self> {
        Self::with_tuning(config, deps, metrics, SchedulerTuning::default())
    }

    pub fn with_tuning(
        config: SpawnConfig,
        deps: SchedulerDeps,
        metrics: Arc<Metrics>,
        tuning: SchedulerTuning,
    ) -> Arc<Self> {
        let (outcome_tx, outcome_rx) = unbounded();
        let population = Arc::new(PopulationTracker::new());
        let stats = Arc::new(GlobalStats::new());
        let factory = Arc::new(CharacterFactory::new(
            deps.accounts.clone(),
            deps.names.clone(),
            deps.distribution.clone(),
            deps.persistence.clone(),
            deps.cache.clone(),
        ));

        let orchestrator = StartupOrchestrator::new(tuning.phases);
        if config.spawn_on_server_start {
            orchestrator.engage(deps.clock.now_ms());
        }

        let pipeline = Arc::new(PipelineCtx {
            population: population.clone(),
            stats: stats.clone(),
            accounts: deps.accounts.clone(),
            persistence: deps.persistence.clone(),
            sessions: deps.sessions.clone(),
            factory,
            outcome_tx,
            auto_create: config.auto_create_characters,
        });

        info!(
            max_bots = config.max_bots_total,
            dynamic = config.dynamic_spawning,
            on_start = config.spawn_on_server_start,
            "bot spawn scheduler initialized"
        );

        Arc::new(Self {
            queue: SpawnQueue::new(),
            monitor: ResourceMonitor::new(tuning.thresholds),
            throttler: SpawnThrottler::new(tuning.throttle, CircuitBreaker::new(tuning.breaker)),
            orchestrator,
            population,
            stats,
            pipeline,
            deps,
            metrics,
            runtime: Handle::current(),
            outcome_rx,
            host_sample: Mutex::new(HostSample::default()),
            enabled: AtomicBool::new(true),
            drain_flag: AtomicBool::new(false),
            activation_flag: AtomicBool::new(false),
            last_reconcile_ms: AtomicU64::new(0),
            last_spawn_ms: AtomicU64::new(0),
            config,
        })
    }

    // ------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------

    /// Spawn one bot. Returns true once the request passed validation and
    /// the cap reservation and its pipeline was launched; the eventual
    /// outcome surfaces through the request callback and the stats.
    pub fn spawn_bot(&self, mut request: SpawnRequest) -> bool {
        self.stats.record_attempt();

        if let Err(err) = self.validate(&request) {
            debug!(?request, %err, "spawn request rejected");
            request.complete(false, None);
            return false;
        }

        // Atomic reservation against the global cap. From here on exactly
        // one rollback happens on any failure path.
        if !self.population.reserve_slot(
            self.config.max_bots_total,
            self.config.respect_population_caps,
            request.bypass_global_cap,
        ) {
            debug!("spawn rejected: global bot cap reached");
            request.complete(false, None);
            return false;
        }

        // Per-zone/per-map checks are best-effort only: they read counts
        // that are not atomic with the global reservation.
        if let Err(err) = self.check_regional_caps(&request) {
            self.population.release_slot();
            debug!(%err, "spawn rejected by regional cap");
            request.complete(false, None);
            return false;
        }

        self.launch_pipeline(request, 0, "direct");
        true
    }

    /// Enqueue a batch of requests with derived priorities. Returns how
    /// many were accepted; duplicates and invalid requests subtract.
    pub fn spawn_bots(&self, requests: Vec<SpawnRequest>) -> usize {
        let now = self.deps.clock.now_ms();
        let mut accepted = 0;

        for mut request in requests {
            self.stats.record_attempt();
            if let Err(err) = self.validate(&request) {
                debug!(?request, %err, "batch spawn request rejected");
                request.complete(false, None);
                continue;
            }
            let guid = request.character;
            let prioritized = PrioritySpawnRequest::new(request, "batch");
            if self.queue.enqueue(prioritized, now) {
                accepted += 1;
            } else {
                debug!(?guid, "duplicate spawn request suppressed");
            }
        }

        accepted
    }

    /// One host tick. Drains pipeline outcomes, samples pressure, refills
    /// the rate bucket, drains the queue and periodically reconciles zone
    /// populations. Panics are contained: the scheduler disables itself
    /// rather than poisoning the host tick.
    pub fn update(&self, tick_delta_ms: u64) {
        if !self.enabled.load(Ordering::Acquire) {
            return;
        }

        let result = catch_unwind(AssertUnwindSafe(|| self.update_inner(tick_delta_ms)));
        if let Err(panic) = result {
            self.enabled.store(false, Ordering::Release);
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(%message, "spawn scheduler disabled by panic in update");
        }
    }

    /// Remove one bot from the world. Returns false when the guid was not
    /// an active bot.
    pub fn despawn_bot(&self, guid: CharacterGuid, reason: DespawnReason) -> bool {
        let Some((zone, _map)) = self.population.remove(guid) else {
            return false;
        };

        if !self.deps.sessions.destroy_session(guid) {
            warn!(%guid, "despawned bot had no live session");
        }
        self.clear_jit_mirror(guid);
        self.stats.record_despawned();
        debug!(%guid, zone, ?reason, "bot despawned");
        true
    }

    /// Despawn everything: both tracking maps are swapped out atomically
    /// and the isolated snapshot is released without holding any lock.
    pub fn despawn_all_bots(&self) -> usize {
        let drained = self.population.drain_all();
        let count = drained.len();

        for (guid, _zone, _map) in drained {
            if !self.deps.sessions.destroy_session(guid) {
                warn!(%guid, "mass despawn found no live session");
            }
            self.clear_jit_mirror(guid);
            self.stats.record_despawned();
        }

        info!(count, "all bots despawned");
        count
    }

    /// Cancel a still-queued named-character request.
    pub fn remove_request(&self, guid: CharacterGuid) -> bool {
        self.queue.remove(guid)
    }

    /// Latest host resource sample; the live bot count is folded in by the
    /// scheduler itself each tick.
    pub fn submit_host_sample(&self, sample: HostSample) {
        *self.host_sample.lock() = sample;
    }

    /// Report the real-player count observed in a zone.
    pub fn set_zone_players(&self, zone: ZoneId, map: MapId, players: u32) {
        self.population
            .set_zone_players(zone, map, players, self.deps.clock.now_ms());
    }

    /// Register a zone the scheduler should populate.
    pub fn observe_zone(&self, zone: ZoneId, map: MapId, level_min: u8, level_max: u8, density: f32) {
        self.population
            .observe_zone(zone, map, level_min, level_max, density, self.deps.clock.now_ms());
    }

    // ------------------------------------------------------------------
    // Telemetry accessors
    // ------------------------------------------------------------------

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn active_bot_count(&self) -> u32 {
        self.population.active_count()
    }

    pub fn population(&self) -> &PopulationTracker {
        &self.population
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.population.active_count() as u64)
    }

    pub fn queue_metrics(&self) -> QueueMetrics {
        self.queue.metrics()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn pressure(&self) -> PressureLevel {
        self.monitor.pressure()
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.throttler.breaker_state()
    }

    pub fn permitted_rate(&self) -> f64 {
        self.throttler.permitted_rate(self.monitor.pressure())
    }

    pub fn startup_phase(&self) -> u8 {
        self.orchestrator.phase(self.deps.clock.now_ms())
    }

    // ------------------------------------------------------------------
    // Tick internals
    // ------------------------------------------------------------------

    fn update_inner(&self, _tick_delta_ms: u64) {
        let now = self.deps.clock.now_ms();

        self.drain_outcomes(now);

        // Feed the live bot count back into the pressure monitor.
        let mut sample = *self.host_sample.lock();
        sample.active_bots = self.population.active_count();
        self.monitor.sample(sample);

        self.throttler.tick(now, self.monitor.pressure());

        self.check_player_activation(now);

        self.drain_queue(now);

        let last = self.last_reconcile_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) >= self.config.reconcile_interval_ms
            && self
                .last_reconcile_ms
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            self.reconcile_populations(now);
        }

        self.publish_metrics();
    }

    fn drain_outcomes(&self, now_ms: u64) {
        while let Ok(outcome) = self.outcome_rx.try_recv() {
            match &outcome.result {
                Ok(_) => self.throttler.record_success(now_ms),
                Err(err) if err.counts_as_failure() => {
                    self.throttler.record_failure(&err.to_string(), now_ms)
                }
                Err(_) => {}
            }

            if let Some(request) = outcome.retry {
                if outcome.retry_count < MAX_SPAWN_RETRIES {
                    let mut prioritized = PrioritySpawnRequest::new(request, outcome.reason)
                        .with_priority(SpawnPriority::Low);
                    prioritized.retry_count = outcome.retry_count + 1;
                    let retry_count = prioritized.retry_count;
                    if self.queue.enqueue(prioritized, now_ms) {
                        debug!(retry_count, "failed spawn re-enqueued");
                    }
                }
            }
        }
    }

    /// Engage dynamic spawning once real players are present. Protected by
    /// a dedicated reentrancy flag: overlapping calls return immediately.
    fn check_player_activation(&self, now_ms: u64) {
        let Some(_guard) = FlagGuard::try_acquire(&self.activation_flag) else {
            return;
        };

        if self.orchestrator.is_engaged() {
            return;
        }
        if self.population.total_players() > 0 {
            info!("first real player observed, engaging bot spawning");
            self.orchestrator.engage(now_ms);
        }
    }

    /// Drain up to a batch of queued requests, gated by the orchestrator,
    /// the inter-spawn spacing and the throttler. At most one drain body
    /// runs at any instant; the flag is released on every exit path.
    fn drain_queue(&self, now_ms: u64) {
        let Some(_guard) = FlagGuard::try_acquire(&self.drain_flag) else {
            return;
        };

        let phase = self.orchestrator.phase(now_ms);
        // Graduated phases drain one request per tick; afterwards the
        // configured batch applies.
        let batch = if (1..=3).contains(&phase) {
            1
        } else {
            self.config.spawn_batch_size
        };

        let mut spawned = 0u32;
        while spawned < batch {
            if self.queue.is_empty() {
                break;
            }
            if !self.orchestrator.should_spawn_next(now_ms) {
                break;
            }
            if self.config.spawn_delay_ms > 0 {
                let last = self.last_spawn_ms.load(Ordering::Relaxed);
                if last != 0 && now_ms.saturating_sub(last) < self.config.spawn_delay_ms {
                    break;
                }
            }
            // Consumes a rate token; checked after the cheap gates so the
            // token is only spent when a dequeue will follow.
            if !self.throttler.can_spawn_now(now_ms, self.monitor.pressure()) {
                break;
            }
            let Some(prioritized) = self.queue.dequeue(now_ms) else {
                break;
            };

            if self.try_spawn_queued(prioritized) {
                spawned += 1;
                self.orchestrator.on_bot_spawned(now_ms);
                self.last_spawn_ms.store(now_ms, Ordering::Relaxed);
            }
        }
    }

    /// Validation and cap reservation for a dequeued request, then the
    /// pipeline launch. A false return means the request was consumed
    /// without launching (its callback already fired).
    fn try_spawn_queued(&self, prioritized: PrioritySpawnRequest) -> bool {
        let PrioritySpawnRequest { retry_count, reason, mut request, .. } = prioritized;

        self.stats.record_attempt();
        if let Err(err) = self.validate(&request) {
            debug!(%err, %reason, "queued spawn request rejected");
            request.complete(false, None);
            return false;
        }
        if !self.population.reserve_slot(
            self.config.max_bots_total,
            self.config.respect_population_caps,
            request.bypass_global_cap,
        ) {
            debug!(%reason, "queued spawn rejected: global bot cap reached");
            request.complete(false, None);
            return false;
        }
        if let Err(err) = self.check_regional_caps(&request) {
            self.population.release_slot();
            debug!(%err, %reason, "queued spawn rejected by regional cap");
            request.complete(false, None);
            return false;
        }

        self.launch_pipeline(request, retry_count, reason);
        true
    }

    fn launch_pipeline(&self, request: SpawnRequest, retry_count: u32, reason: impl Into<String>) {
        if let Some(zone) = request.zone {
            self.population.note_inflight(zone);
        }
        let ctx = self.pipeline.clone();
        let reason = reason.into();
        self.runtime.spawn(async move {
            run_pipeline(ctx, request, retry_count, reason).await;
        });
    }

    /// Coarse-interval zone reconciliation: enqueue deficit spawns, retire
    /// surplus bots.
    fn reconcile_populations(&self, now_ms: u64) {
        if !self.orchestrator.is_engaged() {
            return;
        }

        let params = TargetParams {
            bot_to_player_ratio: self.config.bot_to_player_ratio,
            minimum_bots_per_zone: self.config.minimum_bots_per_zone,
            max_bots_per_zone: self.config.max_bots_per_zone,
            dynamic: self.config.dynamic_spawning,
        };

        let directives = self.population.recompute_targets(&params, now_ms);
        for directive in directives {
            if directive.deficit > 0 {
                let pending = self.queue.pending_for_zone(directive.zone) as u32;
                let wanted = directive.deficit.saturating_sub(pending);
                for _ in 0..wanted {
                    let request = SpawnRequest::for_zone(directive.zone, directive.map)
                        .with_levels(directive.level_min, directive.level_max);
                    let prioritized = PrioritySpawnRequest::new(request, "zone-reconcile");
                    self.queue.enqueue(prioritized, now_ms);
                }
                if wanted > 0 {
                    debug!(zone = directive.zone, wanted, "zone below target, spawns enqueued");
                }
            }
            for guid in directive.surplus {
                self.despawn_bot(guid, DespawnReason::Excess);
            }
        }
        self.metrics.reconcile_runs_total.fetch_add(1, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Validation and caps
    // ------------------------------------------------------------------

    fn validate(&self, request: &SpawnRequest) -> Result<(), SpawnError> {
        if !self.enabled.load(Ordering::Acquire) {
            return Err(SpawnError::Disabled);
        }
        if request.kind == SpawnKind::SpecificCharacter && request.character.is_none() {
            return Err(SpawnError::Validation("specific-character request without guid"));
        }
        if let Some(guid) = request.character {
            if !guid.is_player() {
                return Err(SpawnError::Validation("character guid is not a player"));
            }
            if let Some(account) = request.account {
                match self.deps.persistence.account_of_character(guid) {
                    Some(owner) if owner == account => {}
                    _ => {
                        return Err(SpawnError::Validation(
                            "character does not belong to the requested account",
                        ))
                    }
                }
            }
        }
        if request.level_max != 0 && request.level_min > request.level_max {
            return Err(SpawnError::Validation("inverted level range"));
        }
        Ok(())
    }

    fn check_regional_caps(&self, request: &SpawnRequest) -> Result<(), SpawnError> {
        if !self.config.respect_population_caps || request.bypass_global_cap {
            return Ok(());
        }
        if let Some(zone) = request.zone {
            if self.population.bots_in_zone(zone) >= self.config.max_bots_per_zone {
                return Err(SpawnError::ZoneCapExceeded(zone));
            }
        }
        if let Some(map) = request.map {
            if self.population.bots_on_map(map) >= self.config.max_bots_per_map {
                return Err(SpawnError::MapCapExceeded(map));
            }
        }
        Ok(())
    }

    #[cfg(feature = "jit_registry")]
    fn clear_jit_mirror(&self, guid: CharacterGuid) {
        let mut tx = self.deps.persistence.begin_tx(Database::Characters);
        tx.append(TxStatement::ClearJitBot(guid));
        if let Err(err) = self.deps.persistence.commit_tx(tx) {
            debug!(%guid, %err, "jit registry clear failed");
        }
    }

    #[cfg(not(feature = "jit_registry"))]
    fn clear_jit_mirror(&self, _guid: CharacterGuid) {}

    fn publish_metrics(&self) {
        let m = &self.metrics;
        let stats = self.stats();
        m.bots_active.store(stats.currently_active, Ordering::Relaxed);
        m.bots_peak.store(stats.peak_concurrent, Ordering::Relaxed);
        m.spawns_total.store(stats.total_spawned, Ordering::Relaxed);
        m.despawns_total.store(stats.total_despawned, Ordering::Relaxed);
        m.spawn_failures_total.store(stats.failed_spawns, Ordering::Relaxed);
        m.spawn_attempts_total.store(stats.spawn_attempts, Ordering::Relaxed);

        let queue = self.queue.metrics();
        m.queue_depth.store(queue.depth as u64, Ordering::Relaxed);
        m.queue_depth_critical.store(
            queue.depth_by_priority[SpawnPriority::Critical as usize] as u64,
            Ordering::Relaxed,
        );
        m.queue_depth_high.store(
            queue.depth_by_priority[SpawnPriority::High as usize] as u64,
            Ordering::Relaxed,
        );
        m.queue_depth_normal.store(
            queue.depth_by_priority[SpawnPriority::Normal as usize] as u64,
            Ordering::Relaxed,
        );
        m.queue_depth_low.store(
            queue.depth_by_priority[SpawnPriority::Low as usize] as u64,
            Ordering::Relaxed,
        );
        m.queue_dequeued_total.store(queue.dequeued_total, Ordering::Relaxed);
        m.queue_wait_avg_ms.store(queue.avg_wait_ms, Ordering::Relaxed);

        m.pressure_level
            .store(self.monitor.pressure() as u8 as u64, Ordering::Relaxed);
        m.breaker_state
            .store(self.throttler.breaker_state() as u8 as u64, Ordering::Relaxed);
        m.permitted_rate_millis
            .store((self.permitted_rate() * 1000.0) as u64, Ordering::Relaxed);
        m.startup_phase
            .store(self.startup_phase() as u64, Ordering::Relaxed);
        m.zones_tracked
            .store(self.population.zone_count() as u64, Ordering::Relaxed);
    }
}

// ----------------------------------------------------------------------
// Async spawn pipeline
// ----------------------------------------------------------------------

/// The reservation made by the launcher is either converted into a tracked
/// bot or rolled back here, exactly once.
async fn run_pipeline(
    ctx: Arc<PipelineCtx>,
    mut request: SpawnRequest,
    retry_count: u32,
    reason: String,
) {
    let result = pipeline_body(&ctx, &request).await;
    if let Some(zone) = request.zone {
        ctx.population.clear_inflight(zone);
    }
    match result {
        Ok((guid, zone, map)) => {
            ctx.population.insert(guid, zone, map);
            register_jit_mirror(&ctx, &request, guid);
            ctx.stats.record_spawned(ctx.population.active_count() as u64);
            request.complete(true, Some(guid));
            let _ = ctx.outcome_tx.send(SpawnOutcome {
                result: Ok(guid),
                retry: None,
                retry_count,
                reason,
            });
        }
        Err(err) => {
            ctx.population.release_slot();
            if err.counts_as_failure() {
                ctx.stats.record_failure();
            }
            debug!(%err, %reason, "spawn pipeline failed");
            request.complete(false, None);

            let retryable_kind =
                matches!(request.kind, SpawnKind::SpecificZone | SpawnKind::Random);
            let retry = (err.is_retryable() && retryable_kind)
                .then(|| request.clone_for_retry());
            let _ = ctx.outcome_tx.send(SpawnOutcome {
                result: Err(err),
                retry,
                retry_count,
                reason,
            });
        }
    }
}

async fn pipeline_body(
    ctx: &PipelineCtx,
    request: &SpawnRequest,
) -> Result<(CharacterGuid, ZoneId, MapId), SpawnError> {
    let (guid, mut row) = match request.character {
        Some(guid) => (guid, None),
        None => select_character(ctx, request).await?,
    };

    // Resolve the owning account.
    let account: AccountId = match request.account {
        Some(account) => account,
        None => match row.as_ref().map(|r: &CharacterRow| r.account) {
            Some(account) => account,
            None => ctx
                .persistence
                .account_of_character(guid)
                .ok_or(SpawnError::NoCandidate)?,
        },
    };

    if row.is_none() {
        row = ctx
            .persistence
            .characters_by_account(account)
            .ok()
            .and_then(|rows| rows.into_iter().find(|r| r.guid == guid));
    }

    if !ctx
        .sessions
        .create_session(account, guid, request.bypass_global_cap)
    {
        return Err(SpawnError::SessionCreationFailed);
    }

    // Placement: the requested zone wins, else the character's own.
    let zone = request
        .zone
        .or_else(|| row.as_ref().map(|r| r.position.zone))
        .unwrap_or(0);
    let map = request
        .map
        .or_else(|| row.as_ref().map(|r| r.position.map))
        .unwrap_or(0);

    Ok((guid, zone, map))
}

/// Asynchronous character selection: existing characters on the account
/// first (deterministically lowest guid, minimizing duplicate-session
/// races), creation as the fallback.
async fn select_character(
    ctx: &PipelineCtx,
    request: &SpawnRequest,
) -> Result<(CharacterGuid, Option<CharacterRow>), SpawnError> {
    let account = match request.account {
        Some(account) => account,
        None => {
            let account = ctx.accounts.acquire_account();
            if account == 0 {
                return Err(SpawnError::NoCandidate);
            }
            account
        }
    };

    let rows = ctx.persistence.characters_by_account(account)?;
    let mut candidates: Vec<CharacterRow> = rows
        .into_iter()
        .filter(|row| request.level_in_range(row.level))
        .filter(|row| request.race.map_or(true, |race| row.race == race as u8))
        .filter(|row| request.class.map_or(true, |class| row.class == class as u8))
        .collect();
    candidates.sort_by_key(|row| row.guid);

    for row in candidates {
        if !ctx.population.is_active(row.guid) {
            return Ok((row.guid, Some(row)));
        }
    }

    if ctx.auto_create {
        let guid = ctx.factory.create_character(account, request).await?;
        return Ok((guid, None));
    }

    Err(SpawnError::NoCandidate)
}

#[cfg(feature = "jit_registry")]
fn register_jit_mirror(ctx: &PipelineCtx, request: &SpawnRequest, guid: CharacterGuid) {
    // Only on-demand population spawns are JIT; named spawns stay out of
    // the registry so orphan cleanup never touches them.
    if matches!(request.kind, SpawnKind::SpecificZone | SpawnKind::Random) {
        let mut tx = ctx.persistence.begin_tx(Database::Characters);
        tx.append(TxStatement::RegisterJitBot(guid));
        if let Err(err) = ctx.persistence.commit_tx(tx) {
            debug!(%guid, %err, "jit registry insert failed");
        }
    }
}

#[cfg(not(feature = "jit_registry"))]
fn register_jit_mirror(_ctx: &PipelineCtx, _request: &SpawnRequest, _guid: CharacterGuid) {}
