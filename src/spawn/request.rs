//! Spawn request types and scheduling priorities.

use std::cmp::Ordering;
use std::fmt;

use crate::world::ids::{AccountId, CharacterGuid, MapId, ZoneId};
use crate::world::reference::{Class, Race};

/// What kind of spawn the caller is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnKind {
    /// Bring a specific existing character into the world.
    SpecificCharacter,
    /// Fill a group slot; treated like a named spawn for scheduling.
    GroupMember,
    /// Place a bot somewhere in a given zone.
    SpecificZone,
    /// Anywhere, any character.
    Random,
}

/// Scheduling priority. Lower ordinal dequeues first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SpawnPriority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl SpawnPriority {
    /// Priority derived from the request kind. Critical is reserved for
    /// future explicit callers.
    pub fn from_kind(kind: SpawnKind) -> Self {
        match kind {
            SpawnKind::SpecificCharacter | SpawnKind::GroupMember => SpawnPriority::High,
            SpawnKind::SpecificZone => SpawnPriority::Normal,
            SpawnKind::Random => SpawnPriority::Low,
        }
    }

    pub const ALL: [SpawnPriority; 4] = [
        SpawnPriority::Critical,
        SpawnPriority::High,
        SpawnPriority::Normal,
        SpawnPriority::Low,
    ];
}

/// Completion callback: success flag plus the spawned character, if any.
pub type SpawnCallback = Box<dyn FnOnce(bool, Option<CharacterGuid>) + Send + Sync>;

/// Caller-facing spawn intent.
pub struct SpawnRequest {
    pub kind: SpawnKind,
    pub character: Option<CharacterGuid>,
    pub account: Option<AccountId>,
    pub zone: Option<ZoneId>,
    pub map: Option<MapId>,
    /// Inclusive level range. `level_max == 0` means unbounded.
    pub level_min: u8,
    pub level_max: u8,
    pub race: Option<Race>,
    pub class: Option<Class>,
    /// Privileged spawns (pool warmup) skip the global cap.
    pub bypass_global_cap: bool,
    pub callback: Option<SpawnCallback>,
}

impl SpawnRequest {
    pub fn random() -> Self {
        Self {
            kind: SpawnKind::Random,
            character: None,
            account: None,
            zone: None,
            map: None,
            level_min: 0,
            level_max: 0,
            race: None,
            class: None,
            bypass_global_cap: false,
            callback: None,
        }
    }

    pub fn for_zone(zone: ZoneId, map: MapId) -> Self {
        Self {
            kind: SpawnKind::SpecificZone,
            zone: Some(zone),
            map: Some(map),
            ..Self::random()
        }
    }

    pub fn for_character(guid: CharacterGuid) -> Self {
        Self {
            kind: SpawnKind::SpecificCharacter,
            character: Some(guid),
            ..Self::random()
        }
    }

    pub fn with_levels(mut self, min: u8, max: u8) -> Self {
        self.level_min = min;
        self.level_max = max;
        self
    }

    pub fn with_account(mut self, account: AccountId) -> Self {
        self.account = Some(account);
        self
    }

    pub fn with_callback(mut self, callback: SpawnCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Whether a candidate level passes the request's range filter.
    pub fn level_in_range(&self, level: u8) -> bool {
        if self.level_min != 0 && level < self.level_min {
            return false;
        }
        if self.level_max != 0 && level > self.level_max {
            return false;
        }
        true
    }

    /// Copy of this request without the callback, used when a failed
    /// zone/random spawn is re-enqueued.
    pub fn clone_for_retry(&self) -> Self {
        Self {
            kind: self.kind,
            character: self.character,
            account: self.account,
            zone: self.zone,
            map: self.map,
            level_min: self.level_min,
            level_max: self.level_max,
            race: self.race,
            class: self.class,
            bypass_global_cap: self.bypass_global_cap,
            callback: None,
        }
    }

    /// Invoke and consume the completion callback, if one was attached.
    pub fn complete(&mut self, success: bool, guid: Option<CharacterGuid>) {
        if let Some(callback) = self.callback.take() {
            callback(success, guid);
        }
    }
}

impl fmt::Debug for SpawnRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnRequest")
            .field("kind", &self.kind)
            .field("character", &self.character)
            .field("account", &self.account)
            .field("zone", &self.zone)
            .field("map", &self.map)
            .field("levels", &(self.level_min, self.level_max))
            .field("bypass_global_cap", &self.bypass_global_cap)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Scheduling wrapper around a [`SpawnRequest`].
#[derive(Debug)]
pub struct PrioritySpawnRequest {
    pub priority: SpawnPriority,
    /// Set by the queue at acceptance when zero.
    pub enqueue_time_ms: u64,
    pub retry_count: u32,
    /// Human-readable origin tag for logs and metrics.
    pub reason: String,
    pub request: SpawnRequest,
}

impl PrioritySpawnRequest {
    pub fn new(request: SpawnRequest, reason: impl Into<String>) -> Self {
        Self {
            priority: SpawnPriority::from_kind(request.kind),
            enqueue_time_ms: 0,
            retry_count: 0,
            reason: reason.into(),
            request,
        }
    }

    pub fn with_priority(mut self, priority: SpawnPriority) -> Self {
        self.priority = priority;
        self
    }
}

// Ordering is strictly (priority, enqueue time); nothing else about the
// request may influence dequeue order.
impl PartialEq for PrioritySpawnRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.enqueue_time_ms == other.enqueue_time_ms
    }
}

impl Eq for PrioritySpawnRequest {}

impl PartialOrd for PrioritySpawnRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrioritySpawnRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.enqueue_time_ms.cmp(&other.enqueue_time_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_from_kind() {
        assert_eq!(
            SpawnPriority::from_kind(SpawnKind::SpecificCharacter),
            SpawnPriority::High
        );
        assert_eq!(SpawnPriority::from_kind(SpawnKind::GroupMember), SpawnPriority::High);
        assert_eq!(SpawnPriority::from_kind(SpawnKind::SpecificZone), SpawnPriority::Normal);
        assert_eq!(SpawnPriority::from_kind(SpawnKind::Random), SpawnPriority::Low);
    }

    #[test]
    fn test_ordering_by_priority_then_time() {
        let mut high = PrioritySpawnRequest::new(SpawnRequest::random(), "test");
        high.priority = SpawnPriority::High;
        high.enqueue_time_ms = 200;

        let mut low_early = PrioritySpawnRequest::new(SpawnRequest::random(), "test");
        low_early.priority = SpawnPriority::Low;
        low_early.enqueue_time_ms = 100;

        assert!(high < low_early);

        let mut low_late = PrioritySpawnRequest::new(SpawnRequest::random(), "test");
        low_late.priority = SpawnPriority::Low;
        low_late.enqueue_time_ms = 300;

        assert!(low_early < low_late);
    }

    #[test]
    fn test_kind_does_not_affect_ordering() {
        let mut zone = PrioritySpawnRequest::new(SpawnRequest::for_zone(1, 0), "test");
        zone.priority = SpawnPriority::Normal;
        zone.enqueue_time_ms = 50;

        let mut named =
            PrioritySpawnRequest::new(SpawnRequest::for_character(CharacterGuid::player(1)), "test");
        named.priority = SpawnPriority::Normal;
        named.enqueue_time_ms = 50;

        assert_eq!(zone, named);
    }

    #[test]
    fn test_level_range_filter() {
        let req = SpawnRequest::random().with_levels(10, 20);
        assert!(!req.level_in_range(9));
        assert!(req.level_in_range(10));
        assert!(req.level_in_range(20));
        assert!(!req.level_in_range(21));

        let unbounded = SpawnRequest::random().with_levels(5, 0);
        assert!(unbounded.level_in_range(200));
        assert!(!unbounded.level_in_range(4));
    }

    #[test]
    fn test_callback_consumed_once() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let mut req = SpawnRequest::random().with_callback(Box::new(move |success, _| {
            assert!(success);
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));

        req.complete(true, Some(CharacterGuid::player(1)));
        req.complete(true, Some(CharacterGuid::player(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clone_for_retry_drops_callback() {
        let req = SpawnRequest::for_zone(12, 0)
            .with_levels(1, 60)
            .with_callback(Box::new(|_, _| {}));
        let retry = req.clone_for_retry();
        assert!(retry.callback.is_none());
        assert_eq!(retry.zone, Some(12));
        assert_eq!(retry.kind, SpawnKind::SpecificZone);
    }
}
