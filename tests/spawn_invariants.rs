//! End-to-end scheduler scenarios: cap enforcement under contention,
//! duplicate suppression, breaker trips and mass-despawn safety.

use std::sync::Arc;
use std::time::Duration;

use botrealm_server::config::SpawnConfig;
use botrealm_server::metrics::Metrics;
use botrealm_server::spawn::breaker::{BreakerConfig, BreakerState};
use botrealm_server::spawn::startup::StartupPhases;
use botrealm_server::spawn::throttle::ThrottleConfig;
use botrealm_server::spawn::{BotScheduler, DespawnReason, SchedulerDeps, SchedulerTuning, SpawnRequest};
use botrealm_server::world::accounts::BotAccountPool;
use botrealm_server::world::cache::InMemoryCharacterCache;
use botrealm_server::world::clock::ManualClock;
use botrealm_server::world::distribution::WeightedDistribution;
use botrealm_server::world::ids::CharacterGuid;
use botrealm_server::world::names::SyllableNameAllocator;
use botrealm_server::world::persistence::{CharacterRow, InMemoryPersistence};
use botrealm_server::world::reference::Position;
use botrealm_server::world::session::SimSessionManager;

struct Harness {
    scheduler: Arc<BotScheduler>,
    persistence: Arc<InMemoryPersistence>,
    sessions: Arc<SimSessionManager>,
    clock: Arc<ManualClock>,
}

fn tuning(breaker: BreakerConfig) -> SchedulerTuning {
    SchedulerTuning {
        breaker,
        throttle: ThrottleConfig {
            rate_min: 0.2,
            rate_max: 10_000.0,
            initial_rate: 10_000.0,
            ..Default::default()
        },
        // Skip straight to the unrestricted phase.
        phases: StartupPhases {
            phase1_until_ms: 0,
            phase1_per_second: 1,
            phase2_until_ms: 0,
            phase2_per_second: 1,
            phase3_until_ms: 0,
            phase3_per_second: 1,
        },
        ..Default::default()
    }
}

fn harness(config: SpawnConfig, breaker: BreakerConfig) -> Harness {
    let persistence = Arc::new(InMemoryPersistence::new());
    let sessions = Arc::new(SimSessionManager::new());
    let clock = Arc::new(ManualClock::new());
    clock.set(1);

    let deps = SchedulerDeps {
        accounts: Arc::new(BotAccountPool::new(10_000, 1024)),
        names: Arc::new(SyllableNameAllocator::new()),
        distribution: Arc::new(WeightedDistribution::default()),
        persistence: persistence.clone(),
        sessions: sessions.clone(),
        cache: Arc::new(InMemoryCharacterCache::new()),
        clock: clock.clone(),
    };

    let scheduler =
        BotScheduler::with_tuning(config, deps, Arc::new(Metrics::new()), tuning(breaker));
    Harness { scheduler, persistence, sessions, clock }
}

fn seeded_row(counter: u64, account: u32, zone: u32) -> CharacterRow {
    CharacterRow {
        guid: CharacterGuid::player(counter),
        account,
        name: format!("Seed{}", counter),
        level: 10,
        race: 1,
        class: 1,
        gender: 0,
        position: Position { map: 0, zone, x: 1.0, y: 2.0, z: 3.0, orientation: 0.0 },
    }
}

async fn settle(scheduler: &BotScheduler, expected: u32) {
    for _ in 0..600 {
        if scheduler.active_bot_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "bot count did not settle at {} (got {})",
        expected,
        scheduler.active_bot_count()
    );
}

/// Scenario: cold start with dynamic spawning disabled. One zone with a
/// static floor of 10 against a global cap of 10: the queue drains to
/// exactly the cap and stays there.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cold_start_fills_static_floor_and_stops() {
    let hx = harness(
        SpawnConfig {
            max_bots_total: 10,
            minimum_bots_per_zone: 10,
            dynamic_spawning: false,
            spawn_on_server_start: true,
            spawn_delay_ms: 0,
            spawn_batch_size: 50,
            reconcile_interval_ms: 0,
            ..Default::default()
        },
        BreakerConfig::default(),
    );
    hx.scheduler.observe_zone(12, 0, 1, 10, 1.0);

    // First tick computes targets and enqueues, second drains.
    hx.clock.advance(100);
    hx.scheduler.update(100);
    hx.clock.advance(100);
    hx.scheduler.update(100);

    settle(&hx.scheduler, 10).await;
    assert_eq!(hx.scheduler.population().bots_in_zone(12), 10);

    // Steady state: later ticks spawn nothing further.
    for _ in 0..5 {
        hx.clock.advance(1000);
        hx.scheduler.update(100);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(hx.scheduler.active_bot_count(), 10);
    assert_eq!(hx.scheduler.stats().total_spawned, 10);
}

/// Scenario: 32 producer threads hammer SpawnBot against a cap of 100.
/// Exactly 100 calls win the reservation; the count never exceeds the cap.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn cap_race_allows_exactly_cap_spawns() {
    let hx = harness(
        SpawnConfig {
            max_bots_total: 100,
            spawn_on_server_start: true,
            spawn_delay_ms: 0,
            ..Default::default()
        },
        BreakerConfig::default(),
    );

    let mut producers = Vec::new();
    for _ in 0..32 {
        let scheduler = hx.scheduler.clone();
        producers.push(std::thread::spawn(move || {
            let mut accepted = 0u32;
            for _ in 0..1000 {
                if scheduler.spawn_bot(SpawnRequest::random()) {
                    accepted += 1;
                }
            }
            accepted
        }));
    }

    let accepted: u32 = producers.into_iter().map(|t| t.join().unwrap()).sum();
    assert_eq!(accepted, 100);

    settle(&hx.scheduler, 100).await;
    let stats = hx.scheduler.stats();
    assert_eq!(stats.total_spawned, 100);
    assert_eq!(stats.currently_active, 100);
    assert!(stats.peak_concurrent <= 100);
    assert_eq!(stats.spawn_attempts, 32_000);
}

/// Scenario: two identical named-character requests collapse into one
/// queued entry; anonymous zone requests never collide with named ones.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_suppression_and_coexistence() {
    let hx = harness(
        SpawnConfig { spawn_on_server_start: true, ..Default::default() },
        BreakerConfig::default(),
    );
    hx.persistence.seed_character(seeded_row(77, 10_000, 12));

    let guid = CharacterGuid::player(77);
    let accepted = hx.scheduler.spawn_bots(vec![
        SpawnRequest::for_character(guid),
        SpawnRequest::for_character(guid),
    ]);
    assert_eq!(accepted, 1);
    assert_eq!(hx.scheduler.queue_len(), 1);
    hx.scheduler.remove_request(guid);

    // 500 zone requests (no identity) and 500 distinct named requests all
    // enqueue together.
    let mut requests = Vec::with_capacity(1000);
    for _ in 0..500 {
        requests.push(SpawnRequest::for_zone(12, 0));
    }
    for counter in 0..500 {
        hx.persistence.seed_character(seeded_row(1000 + counter, 10_000, 12));
        requests.push(SpawnRequest::for_character(CharacterGuid::player(1000 + counter)));
    }
    assert_eq!(hx.scheduler.spawn_bots(requests), 1000);
    assert_eq!(hx.scheduler.queue_len(), 1000);
}

/// Scenario: sustained persistence failures trip the breaker; after the
/// open window one successful probe closes it again.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn breaker_trips_and_recovers() {
    let hx = harness(
        SpawnConfig {
            max_bots_total: 1000,
            spawn_on_server_start: true,
            spawn_delay_ms: 0,
            spawn_batch_size: 50,
            ..Default::default()
        },
        BreakerConfig {
            failure_threshold: 0.5,
            window: 16,
            min_samples: 5,
            open_duration_ms: 5000,
            half_open_probes: 1,
        },
    );
    hx.persistence.set_fail_queries(true);

    // Drive failing spawns through the pipeline until the breaker trips.
    for _ in 0..10 {
        hx.scheduler.spawn_bot(SpawnRequest::random());
        tokio::time::sleep(Duration::from_millis(20)).await;
        hx.clock.advance(50);
        hx.scheduler.update(50);
        if hx.scheduler.breaker_state() == BreakerState::Open {
            break;
        }
    }
    assert_eq!(hx.scheduler.breaker_state(), BreakerState::Open);
    assert!(hx.scheduler.stats().failed_spawns >= 5);

    // While open the permitted rate is irrelevant: queued work stalls.
    // (Failed random spawns may still sit re-queued at LOW priority.)
    hx.scheduler.spawn_bots(vec![SpawnRequest::for_zone(12, 0)]);
    hx.clock.advance(100);
    hx.scheduler.update(100);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(hx.scheduler.queue_len() >= 1);
    assert_eq!(hx.scheduler.active_bot_count(), 0);

    // Heal the backend and wait out the open window: the queued request
    // becomes the half-open probe and its success closes the breaker.
    hx.persistence.set_fail_queries(false);
    hx.clock.advance(6000);
    hx.scheduler.update(100);
    settle(&hx.scheduler, 1).await;
    hx.clock.advance(100);
    hx.scheduler.update(100);
    assert_eq!(hx.scheduler.breaker_state(), BreakerState::Closed);
}

/// Scenario: mass despawn racing individual despawns. Every session is
/// released exactly once and the count reaches zero.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn mass_despawn_races_individual_despawns() {
    let hx = harness(
        SpawnConfig {
            max_bots_total: 2000,
            spawn_on_server_start: true,
            spawn_delay_ms: 0,
            ..Default::default()
        },
        BreakerConfig::default(),
    );

    for _ in 0..1000 {
        assert!(hx.scheduler.spawn_bot(SpawnRequest::random()));
    }
    settle(&hx.scheduler, 1000).await;
    assert_eq!(hx.sessions.created_total(), 1000);

    let victims: Vec<CharacterGuid> = hx
        .scheduler
        .population()
        .active_guids()
        .into_iter()
        .take(100)
        .collect();

    let all = {
        let scheduler = hx.scheduler.clone();
        std::thread::spawn(move || scheduler.despawn_all_bots())
    };
    let singles: Vec<_> = victims
        .into_iter()
        .map(|guid| {
            let scheduler = hx.scheduler.clone();
            std::thread::spawn(move || scheduler.despawn_bot(guid, DespawnReason::Requested))
        })
        .collect();

    let drained = all.join().unwrap();
    let individually: usize = singles
        .into_iter()
        .map(|t| usize::from(t.join().unwrap()))
        .sum();

    assert_eq!(hx.scheduler.active_bot_count(), 0);
    assert_eq!(drained + individually, 1000);
    // No double release: every session was destroyed exactly once.
    assert_eq!(hx.sessions.destroyed_total(), 1000);
    assert_eq!(hx.sessions.session_count(), 0);
    assert_eq!(hx.scheduler.stats().total_despawned, 1000);
}

/// Tracking invariants hold through a mixed spawn/despawn sequence.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tracking_maps_stay_consistent() {
    let hx = harness(
        SpawnConfig { spawn_on_server_start: true, spawn_delay_ms: 0, ..Default::default() },
        BreakerConfig::default(),
    );

    for counter in 1..=20 {
        hx.persistence.seed_character(seeded_row(counter, 10_000, 12));
        hx.scheduler
            .spawn_bot(SpawnRequest::for_character(CharacterGuid::player(counter)));
    }
    settle(&hx.scheduler, 20).await;

    for counter in 1..=7 {
        hx.scheduler
            .despawn_bot(CharacterGuid::player(counter), DespawnReason::Requested);
    }

    let population = hx.scheduler.population();
    let guids = population.active_guids();
    assert_eq!(population.active_count() as usize, guids.len());
    for guid in &guids {
        let zone = population.zone_of(*guid).unwrap();
        assert_eq!(zone, 12);
    }
    assert_eq!(population.bots_in_zone(12) as usize, guids.len());
}
