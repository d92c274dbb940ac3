use std::env;

/// Spawn scheduler configuration. Immutable once loaded for the server
/// lifetime.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Hard global bot cap.
    pub max_bots_total: u32,
    /// Per-zone bot cap (best-effort enforcement).
    pub max_bots_per_zone: u32,
    /// Per-map bot cap (best-effort enforcement).
    pub max_bots_per_map: u32,
    /// Maximum queue dequeues per tick outside the graduated startup phases.
    pub spawn_batch_size: u32,
    /// Minimum inter-spawn spacing baseline.
    pub spawn_delay_ms: u64,
    /// Player-driven spawning when true, static zone floors when false.
    pub dynamic_spawning: bool,
    /// When false all caps become advisory.
    pub respect_population_caps: bool,
    /// Arm the phased startup orchestrator at init instead of waiting for
    /// the first real player.
    pub spawn_on_server_start: bool,
    /// Bots per real player when computing zone targets.
    pub bot_to_player_ratio: f32,
    /// Zone floor applied while players are present.
    pub minimum_bots_per_zone: u32,
    /// Permit character creation when no candidate exists.
    pub auto_create_characters: bool,
    /// Zone target recompute cadence.
    pub reconcile_interval_ms: u64,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            max_bots_total: 5000,
            max_bots_per_zone: 200,
            max_bots_per_map: 1000,
            spawn_batch_size: 8,
            spawn_delay_ms: 250,
            dynamic_spawning: true,
            respect_population_caps: true,
            spawn_on_server_start: false,
            bot_to_player_ratio: 2.0,
            minimum_bots_per_zone: 5,
            auto_create_characters: true,
            reconcile_interval_ms: 5000,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(raw) = env::var(key) {
        if let Ok(parsed) = raw.parse() {
            *target = parsed;
        }
    }
}

impl SpawnConfig {
    /// Load config from environment or use defaults.
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        env_parse("SPAWN_MAX_TOTAL", &mut config.max_bots_total);
        env_parse("SPAWN_MAX_PER_ZONE", &mut config.max_bots_per_zone);
        env_parse("SPAWN_MAX_PER_MAP", &mut config.max_bots_per_map);
        env_parse("SPAWN_BATCH_SIZE", &mut config.spawn_batch_size);
        env_parse("SPAWN_DELAY_MS", &mut config.spawn_delay_ms);
        env_parse("SPAWN_DYNAMIC", &mut config.dynamic_spawning);
        env_parse("SPAWN_RESPECT_CAPS", &mut config.respect_population_caps);
        env_parse("SPAWN_ON_SERVER_START", &mut config.spawn_on_server_start);
        env_parse("SPAWN_BOT_TO_PLAYER_RATIO", &mut config.bot_to_player_ratio);
        env_parse("MINIMUM_BOTS_PER_ZONE", &mut config.minimum_bots_per_zone);
        env_parse("AUTO_CREATE_CHARACTERS", &mut config.auto_create_characters);
        env_parse("SPAWN_RECONCILE_INTERVAL_MS", &mut config.reconcile_interval_ms);

        config
    }
}
