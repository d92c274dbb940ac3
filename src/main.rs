mod config;
mod metrics;
mod spawn;
mod world;

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, Level};

use crate::config::SpawnConfig;
use crate::metrics::Metrics;
use crate::spawn::{BotScheduler, HostSample, SchedulerDeps};
use crate::world::accounts::BotAccountPool;
use crate::world::cache::InMemoryCharacterCache;
use crate::world::clock::SystemClock;
use crate::world::distribution::{DistributionDocument, WeightedDistribution};
use crate::world::names::SyllableNameAllocator;
use crate::world::persistence::InMemoryPersistence;
use crate::world::reference::{starting_position, Race};
use crate::world::session::SimSessionManager;

/// Scheduler tick cadence.
const TICK_MS: u64 = 100;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!("Botrealm Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = SpawnConfig::load_or_default();
    info!(
        "Configuration loaded: max_bots={}, dynamic={}, on_start={}",
        config.max_bots_total, config.dynamic_spawning, config.spawn_on_server_start
    );

    // Initialize metrics
    let metrics = Arc::new(Metrics::new());

    // Start metrics server on port 9090 (configurable via METRICS_PORT)
    let metrics_port: u16 = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9090);

    let metrics_clone = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Zone distribution: operator document or built-in defaults.
    let distribution_doc = match std::env::var("SPAWN_DISTRIBUTION_PATH") {
        Ok(path) => match std::fs::read_to_string(&path) {
            Ok(json) => DistributionDocument::from_json(&json).unwrap_or_else(|e| {
                error!("Invalid distribution document {}: {}", path, e);
                DistributionDocument::default()
            }),
            Err(e) => {
                error!("Cannot read distribution document {}: {}", path, e);
                DistributionDocument::default()
            }
        },
        Err(_) => DistributionDocument::default(),
    };

    // Collaborators. The in-memory implementations stand in for the game
    // server's auth, character and world subsystems.
    let deps = SchedulerDeps {
        accounts: Arc::new(BotAccountPool::new(10_000, 1024)),
        names: Arc::new(SyllableNameAllocator::new()),
        distribution: Arc::new(WeightedDistribution::from_document(&distribution_doc)),
        persistence: Arc::new(InMemoryPersistence::new()),
        sessions: Arc::new(SimSessionManager::new()),
        cache: Arc::new(InMemoryCharacterCache::new()),
        clock: Arc::new(SystemClock::new()),
    };

    let scheduler = BotScheduler::new(config, deps, metrics.clone());

    // Seed the zone table with every race's starting region.
    for race in Race::ALL {
        let pos = starting_position(race);
        scheduler.observe_zone(pos.zone, pos.map, 1, 10, 1.0);
    }

    info!("Bot spawn scheduler running, tick every {}ms", TICK_MS);

    // Shutdown signal handler
    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Shutdown signal received");
    };

    // Drive the scheduler from a fixed-interval tick loop.
    let tick_scheduler = scheduler.clone();
    let tick_metrics = metrics.clone();
    let tick_loop = async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(TICK_MS));
        loop {
            interval.tick().await;
            let started = Instant::now();

            // Host sample: only the signals this process can observe
            // itself; the scheduler folds in the live bot count.
            tick_scheduler.submit_host_sample(HostSample::default());
            tick_scheduler.update(TICK_MS);

            tick_metrics.record_tick_time(started.elapsed());
            if !tick_scheduler.is_enabled() {
                error!("Scheduler disabled itself; stopping tick loop");
                break;
            }
        }
    };

    tokio::select! {
        _ = tick_loop => {}
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    // Cleanup
    let despawned = scheduler.despawn_all_bots();
    info!(despawned, "Server stopped");

    Ok(())
}
