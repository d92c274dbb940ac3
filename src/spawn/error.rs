//! Spawn failure taxonomy.

use crate::world::ids::{MapId, ZoneId};
use crate::world::persistence::PersistenceError;

/// Why a spawn attempt did not produce a bot.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SpawnError {
    #[error("global bot cap reached")]
    CapExceeded,
    #[error("zone {0} bot cap reached")]
    ZoneCapExceeded(ZoneId),
    #[error("map {0} bot cap reached")]
    MapCapExceeded(MapId),
    #[error("invalid spawn request: {0}")]
    Validation(&'static str),
    #[error("no candidate character available")]
    NoCandidate,
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("session creation refused")]
    SessionCreationFailed,
    #[error("circuit breaker open")]
    BreakerOpen,
    #[error("resource pressure critical")]
    PressureCritical,
    #[error("spawn rate throttled")]
    Throttled,
    #[error("spawn scheduler disabled")]
    Disabled,
}

impl SpawnError {
    /// Whether this outcome counts against the circuit breaker. Cap and
    /// validation rejections are local decisions, not systemic failures;
    /// transient refusals leave the request queued and are not outcomes at
    /// all.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            SpawnError::NoCandidate
                | SpawnError::Persistence(_)
                | SpawnError::SessionCreationFailed
        )
    }

    /// Whether a zone/random request may be re-enqueued after this failure.
    pub fn is_retryable(&self) -> bool {
        self.counts_as_failure()
    }
}
