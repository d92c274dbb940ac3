//! Zone population model and live bot tracking.
//!
//! Two mappings are maintained under short write locks: character -> zone
//! placement and zone -> placed characters, plus an atomic active count
//! kept equal to the placement map size for O(1) hot-path cap checks.
//! Writers always acquire `active` before `by_zone` before `map_counts`.

use std::sync::atomic::{AtomicU32, Ordering};

use hashbrown::HashMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::world::ids::{CharacterGuid, MapId, ZoneId};

/// Per-zone population record.
#[derive(Debug, Clone)]
pub struct ZonePopulation {
    pub zone: ZoneId,
    pub map: MapId,
    pub players: u32,
    pub bots: u32,
    pub target_bots: u32,
    pub level_min: u8,
    pub level_max: u8,
    /// Relative spawn weight for this zone, 1.0 = neutral.
    pub density: f32,
    pub updated_at_ms: u64,
}

/// Inputs for the periodic target recompute.
#[derive(Debug, Clone)]
pub struct TargetParams {
    pub bot_to_player_ratio: f32,
    pub minimum_bots_per_zone: u32,
    pub max_bots_per_zone: u32,
    /// Player-driven targets when true, static floors when false.
    pub dynamic: bool,
}

/// Outcome of a recompute for one zone: how many bots to add, and which to
/// retire (newest placements first).
#[derive(Debug, Clone)]
pub struct ZoneDirective {
    pub zone: ZoneId,
    pub map: MapId,
    pub deficit: u32,
    pub surplus: Vec<CharacterGuid>,
    pub level_min: u8,
    pub level_max: u8,
}

/// Live bot placement tracking plus the zone population table.
pub struct PopulationTracker {
    active: RwLock<HashMap<CharacterGuid, (ZoneId, MapId)>>,
    by_zone: RwLock<HashMap<ZoneId, Vec<CharacterGuid>>>,
    map_counts: RwLock<FxHashMap<MapId, u32>>,
    zones: RwLock<HashMap<ZoneId, ZonePopulation>>,
    /// Launched-but-unplaced spawns per zone, so target recomputes do not
    /// double-request bots whose pipelines have not landed yet.
    inflight: RwLock<FxHashMap<ZoneId, u32>>,
    active_count: AtomicU32,
}

impl PopulationTracker {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            by_zone: RwLock::new(HashMap::new()),
            map_counts: RwLock::new(FxHashMap::default()),
            zones: RwLock::new(HashMap::new()),
            inflight: RwLock::new(FxHashMap::default()),
            active_count: AtomicU32::new(0),
        }
    }

    /// Atomically reserve one slot against the global cap.
    ///
    /// The counter is incremented first; a losing reservation rolls it back
    /// and returns false. Exactly one increment happens per spawn attempt
    /// and it is this one.
    pub fn reserve_slot(&self, max_total: u32, respect_caps: bool, bypass: bool) -> bool {
        let old = self.active_count.fetch_add(1, Ordering::AcqRel);
        if respect_caps && !bypass && old >= max_total {
            self.active_count.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Roll back a reservation whose spawn did not complete.
    pub fn release_slot(&self) {
        self.active_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// Place a spawned bot. The slot was already reserved, so the counter
    /// is not touched here.
    pub fn insert(&self, guid: CharacterGuid, zone: ZoneId, map: MapId) {
        let mut active = self.active.write();
        let mut by_zone = self.by_zone.write();
        let mut map_counts = self.map_counts.write();

        if active.insert(guid, (zone, map)).is_none() {
            let placements = by_zone.entry(zone).or_default();
            if !placements.contains(&guid) {
                placements.push(guid);
            }
            *map_counts.entry(map).or_insert(0) += 1;
        }
    }

    /// Remove a bot, decrementing the active count exactly once. `None`
    /// when the guid was not tracked (already despawned or drained).
    pub fn remove(&self, guid: CharacterGuid) -> Option<(ZoneId, MapId)> {
        let mut active = self.active.write();
        let mut by_zone = self.by_zone.write();
        let mut map_counts = self.map_counts.write();

        let (zone, map) = active.remove(&guid)?;
        if let Some(placements) = by_zone.get_mut(&zone) {
            placements.retain(|g| *g != guid);
            if placements.is_empty() {
                by_zone.remove(&zone);
            }
        }
        if let Some(count) = map_counts.get_mut(&map) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                map_counts.remove(&map);
            }
        }
        self.active_count.fetch_sub(1, Ordering::AcqRel);
        Some((zone, map))
    }

    /// Swap both tracking maps with empty ones and return the isolated
    /// snapshot. Concurrent removals of already-drained guids become no-ops.
    pub fn drain_all(&self) -> Vec<(CharacterGuid, ZoneId, MapId)> {
        let mut active = self.active.write();
        let mut by_zone = self.by_zone.write();
        let mut map_counts = self.map_counts.write();

        let snapshot = std::mem::take(&mut *active);
        by_zone.clear();
        map_counts.clear();
        self.active_count.store(0, Ordering::Release);

        snapshot
            .into_iter()
            .map(|(guid, (zone, map))| (guid, zone, map))
            .collect()
    }

    pub fn active_count(&self) -> u32 {
        self.active_count.load(Ordering::Acquire)
    }

    pub fn zone_of(&self, guid: CharacterGuid) -> Option<ZoneId> {
        self.active.read().get(&guid).map(|(zone, _)| *zone)
    }

    pub fn is_active(&self, guid: CharacterGuid) -> bool {
        self.active.read().contains_key(&guid)
    }

    pub fn active_guids(&self) -> Vec<CharacterGuid> {
        self.active.read().keys().copied().collect()
    }

    /// Mark a launched spawn headed for a zone.
    pub fn note_inflight(&self, zone: ZoneId) {
        *self.inflight.write().entry(zone).or_insert(0) += 1;
    }

    /// Clear an in-flight mark once the spawn landed or failed.
    pub fn clear_inflight(&self, zone: ZoneId) {
        let mut inflight = self.inflight.write();
        if let Some(count) = inflight.get_mut(&zone) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                inflight.remove(&zone);
            }
        }
    }

    pub fn inflight_in_zone(&self, zone: ZoneId) -> u32 {
        self.inflight.read().get(&zone).copied().unwrap_or(0)
    }

    pub fn bots_in_zone(&self, zone: ZoneId) -> u32 {
        self.by_zone.read().get(&zone).map(|v| v.len() as u32).unwrap_or(0)
    }

    pub fn bots_on_map(&self, map: MapId) -> u32 {
        self.map_counts.read().get(&map).copied().unwrap_or(0)
    }

    /// Register or refresh a zone entry.
    pub fn observe_zone(
        &self,
        zone: ZoneId,
        map: MapId,
        level_min: u8,
        level_max: u8,
        density: f32,
        now_ms: u64,
    ) {
        let mut zones = self.zones.write();
        zones
            .entry(zone)
            .and_modify(|entry| {
                entry.level_min = level_min;
                entry.level_max = level_max;
                entry.density = density;
                entry.updated_at_ms = now_ms;
            })
            .or_insert(ZonePopulation {
                zone,
                map,
                players: 0,
                bots: 0,
                target_bots: 0,
                level_min,
                level_max,
                density,
                updated_at_ms: now_ms,
            });
    }

    /// Update the real-player count for a zone, creating the entry on first
    /// observation.
    pub fn set_zone_players(&self, zone: ZoneId, map: MapId, players: u32, now_ms: u64) {
        let mut zones = self.zones.write();
        zones
            .entry(zone)
            .and_modify(|entry| {
                entry.players = players;
                entry.updated_at_ms = now_ms;
            })
            .or_insert(ZonePopulation {
                zone,
                map,
                players,
                bots: 0,
                target_bots: 0,
                level_min: 0,
                level_max: 0,
                density: 1.0,
                updated_at_ms: now_ms,
            });
    }

    pub fn total_players(&self) -> u32 {
        self.zones.read().values().map(|z| z.players).sum()
    }

    pub fn zone_count(&self) -> usize {
        self.zones.read().len()
    }

    pub fn zone_snapshot(&self) -> Vec<ZonePopulation> {
        self.zones.read().values().cloned().collect()
    }

    /// Refresh per-zone bot counts and targets, returning a directive per
    /// zone whose population deviates from its target.
    pub fn recompute_targets(&self, params: &TargetParams, now_ms: u64) -> Vec<ZoneDirective> {
        let mut directives = Vec::new();
        let by_zone = self.by_zone.read();
        let inflight = self.inflight.read();
        let mut zones = self.zones.write();

        for entry in zones.values_mut() {
            let placements = by_zone.get(&entry.zone);
            let placed = placements.map(|v| v.len() as u32).unwrap_or(0);
            // Count launched-but-unplaced spawns toward the deficit side so
            // two recomputes in a row do not double-request.
            let current = placed + inflight.get(&entry.zone).copied().unwrap_or(0);

            let target = if params.dynamic {
                if entry.players == 0 {
                    0
                } else {
                    let scaled =
                        (entry.players as f32 * params.bot_to_player_ratio * entry.density)
                            .round() as u32;
                    scaled
                        .max(params.minimum_bots_per_zone)
                        .min(params.max_bots_per_zone)
                }
            } else {
                params.minimum_bots_per_zone.min(params.max_bots_per_zone)
            };

            entry.bots = placed;
            entry.target_bots = target;
            entry.updated_at_ms = now_ms;

            if current < target {
                directives.push(ZoneDirective {
                    zone: entry.zone,
                    map: entry.map,
                    deficit: target - current,
                    surplus: Vec::new(),
                    level_min: entry.level_min,
                    level_max: entry.level_max,
                });
            } else if placed > target {
                let excess = (placed - target) as usize;
                let surplus = placements
                    .map(|v| v.iter().rev().take(excess).copied().collect())
                    .unwrap_or_default();
                directives.push(ZoneDirective {
                    zone: entry.zone,
                    map: entry.map,
                    deficit: 0,
                    surplus,
                    level_min: entry.level_min,
                    level_max: entry.level_max,
                });
            }
        }

        directives
    }
}

impl Default for PopulationTracker {
    fn default() -> Self {
        Self::new()
    }
}
