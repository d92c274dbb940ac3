//! In-world session creation and teardown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::world::ids::{AccountId, CharacterGuid};

/// Materializes and releases in-world sessions for (account, character).
pub trait SessionManager: Send + Sync {
    /// Bring the character into the world. `bypass_queue` skips login-queue
    /// limits for privileged spawns.
    fn create_session(&self, account: AccountId, guid: CharacterGuid, bypass_queue: bool) -> bool;

    /// Tear the session down. Returns false when no session existed, so
    /// callers can detect double release.
    fn destroy_session(&self, guid: CharacterGuid) -> bool;
}

/// A live simulated session.
#[derive(Debug, Clone)]
pub struct WorldSession {
    pub token: Uuid,
    pub account: AccountId,
    pub guid: CharacterGuid,
}

/// In-memory session manager for simulation and tests.
pub struct SimSessionManager {
    sessions: RwLock<FxHashMap<CharacterGuid, WorldSession>>,
    refuse: AtomicBool,
    created_total: AtomicU64,
    destroyed_total: AtomicU64,
}

impl SimSessionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(FxHashMap::default()),
            refuse: AtomicBool::new(false),
            created_total: AtomicU64::new(0),
            destroyed_total: AtomicU64::new(0),
        }
    }

    /// Make subsequent create_session calls fail.
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn created_total(&self) -> u64 {
        self.created_total.load(Ordering::Relaxed)
    }

    pub fn destroyed_total(&self) -> u64 {
        self.destroyed_total.load(Ordering::Relaxed)
    }

    pub fn session_for(&self, guid: CharacterGuid) -> Option<WorldSession> {
        self.sessions.read().get(&guid).cloned()
    }
}

impl Default for SimSessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager for SimSessionManager {
    fn create_session(&self, account: AccountId, guid: CharacterGuid, _bypass_queue: bool) -> bool {
        if self.refuse.load(Ordering::SeqCst) {
            return false;
        }
        let session = WorldSession { token: Uuid::new_v4(), account, guid };
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&guid) {
            // Duplicate login for the same character is refused.
            return false;
        }
        sessions.insert(guid, session);
        self.created_total.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn destroy_session(&self, guid: CharacterGuid) -> bool {
        let removed = self.sessions.write().remove(&guid).is_some();
        if removed {
            self.destroyed_total.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }
}
