//! Bot character creation.
//!
//! Builds a brand-new persisted character when selection finds no existing
//! candidate: race/class sampling, name allocation, customization,
//! two-database persistence and the bounded existence poll confirming the
//! async commit landed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use smallvec::SmallVec;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::spawn::error::SpawnError;
use crate::spawn::request::SpawnRequest;
use crate::world::accounts::AccountSource;
use crate::world::cache::{CachedCharacter, CharacterCache};
use crate::world::distribution::CharacterDistribution;
use crate::world::ids::{AccountId, CharacterGuid};
use crate::world::names::NameAllocator;
use crate::world::persistence::{
    CharacterRow, Database, Persistence, PersistenceError, TxStatement,
};
use crate::world::reference::{
    customization_options, is_valid_combo, starting_position, Class, Gender, Position, Race,
};

/// Hard per-account character limit.
pub const MAX_CHARACTERS_PER_ACCOUNT: u32 = 10;

/// Bounded poll confirming the async character commit landed.
const EXISTENCE_POLL_RETRIES: u32 = 100;
const EXISTENCE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Resample budget when the request filters one side of the pair.
const SAMPLE_ATTEMPTS: u32 = 8;

/// One chosen appearance value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomizationChoice {
    pub option_id: u8,
    pub choice: u8,
}

/// Transient session a character is bound to during creation. It never
/// enters the world; persistence is its only consumer.
struct ProvisioningSession {
    account: AccountId,
    #[allow(dead_code)]
    token: Uuid,
}

impl ProvisioningSession {
    fn new(account: AccountId) -> Self {
        Self { account, token: Uuid::new_v4() }
    }

    /// Build the character row bound to this session and run its creation,
    /// resolving a degenerate position to the canonical start.
    fn create_character(
        &self,
        guid: CharacterGuid,
        name: &str,
        level: u8,
        race: Race,
        class: Class,
        gender: Gender,
        _customization: &[CustomizationChoice],
    ) -> CharacterRow {
        let mut row = CharacterRow {
            guid,
            account: self.account,
            name: name.to_string(),
            level,
            race: race as u8,
            class: class as u8,
            gender: gender as u8,
            position: Position::ZERO,
        };
        if row.position.is_degenerate() {
            row.position = starting_position(race);
        }
        row
    }
}

/// Creates persisted bot characters on demand.
pub struct CharacterFactory {
    accounts: Arc<dyn AccountSource>,
    names: Arc<dyn NameAllocator>,
    distribution: Arc<dyn CharacterDistribution>,
    persistence: Arc<dyn Persistence>,
    cache: Arc<dyn CharacterCache>,
    next_counter: AtomicU64,
}

impl CharacterFactory {
    pub fn new(
        accounts: Arc<dyn AccountSource>,
        names: Arc<dyn NameAllocator>,
        distribution: Arc<dyn CharacterDistribution>,
        persistence: Arc<dyn Persistence>,
        cache: Arc<dyn CharacterCache>,
    ) -> Self {
        Self {
            accounts,
            names,
            distribution,
            persistence,
            cache,
            // Fresh bot guids start well above any seeded character.
            next_counter: AtomicU64::new(1_000_000),
        }
    }

    fn next_guid(&self) -> CharacterGuid {
        CharacterGuid::player(self.next_counter.fetch_add(1, Ordering::Relaxed))
    }

    fn pick_race_class(&self, req: &SpawnRequest) -> Result<(Race, Class), SpawnError> {
        if let (Some(race), Some(class)) = (req.race, req.class) {
            if !is_valid_combo(race, class) {
                return Err(SpawnError::Validation("invalid race/class combination"));
            }
            return Ok((race, class));
        }

        for _ in 0..SAMPLE_ATTEMPTS {
            let Some((race, class)) = self.distribution.sample_race_class() else {
                return Err(SpawnError::NoCandidate);
            };
            if req.race.is_some_and(|r| r != race) {
                continue;
            }
            if req.class.is_some_and(|c| c != class) {
                continue;
            }
            return Ok((race, class));
        }
        Err(SpawnError::NoCandidate)
    }

    fn pick_level(req: &SpawnRequest) -> u8 {
        let min = req.level_min.max(1);
        if req.level_max != 0 && req.level_max > min {
            rand::thread_rng().gen_range(min..=req.level_max)
        } else {
            min
        }
    }

    fn pick_customization(race: Race, gender: Gender) -> SmallVec<[CustomizationChoice; 8]> {
        let mut rng = rand::thread_rng();
        customization_options(race, gender)
            .iter()
            .map(|option| CustomizationChoice {
                option_id: option.option_id,
                choice: option.choices[rng.gen_range(0..option.choices.len())],
            })
            .collect()
    }

    fn persist(&self, row: &CharacterRow) -> Result<(), PersistenceError> {
        let mut char_tx = self.persistence.begin_tx(Database::Characters);
        char_tx.append(TxStatement::InsertCharacter(row.clone()));
        self.persistence.commit_tx(char_tx)?;

        let mut account_tx = self.persistence.begin_tx(Database::Accounts);
        account_tx.append(TxStatement::IncrementRealmCharacterCount(row.account));
        self.persistence.commit_tx(account_tx)
    }

    async fn confirm_exists(&self, guid: CharacterGuid) -> bool {
        for _ in 0..EXISTENCE_POLL_RETRIES {
            if self.persistence.character_exists(guid) {
                return true;
            }
            tokio::time::sleep(EXISTENCE_POLL_INTERVAL).await;
        }
        false
    }

    /// Create a character on the account, honoring the request's race,
    /// class and level filters. Any step's failure releases the allocated
    /// name and reports an error.
    pub async fn create_character(
        &self,
        account: AccountId,
        req: &SpawnRequest,
    ) -> Result<CharacterGuid, SpawnError> {
        if !self.accounts.account_exists(account) {
            return Err(SpawnError::NoCandidate);
        }
        if self.persistence.characters_on_account(account) >= MAX_CHARACTERS_PER_ACCOUNT {
            debug!(account, "account at character limit");
            return Err(SpawnError::NoCandidate);
        }

        let (race, class) = self.pick_race_class(req)?;
        let gender = if rand::thread_rng().gen_bool(0.5) {
            Gender::Male
        } else {
            Gender::Female
        };

        let guid = self.next_guid();
        let Some(name) = self.names.allocate(gender, guid.counter()) else {
            warn!(account, "character name pool exhausted");
            return Err(SpawnError::NoCandidate);
        };

        // The name is reserved from here on; every failure path returns it.
        let level = Self::pick_level(req);
        let customization = Self::pick_customization(race, gender);

        let session = ProvisioningSession::new(account);
        let row = session.create_character(guid, &name, level, race, class, gender, &customization);

        if let Err(err) = self.persist(&row) {
            self.names.release(&name);
            return Err(err.into());
        }

        if !self.confirm_exists(guid).await {
            self.names.release(&name);
            return Err(SpawnError::Persistence(PersistenceError::QueryFailed(
                "character existence poll timed out",
            )));
        }

        self.cache.register(CachedCharacter {
            guid,
            name: name.clone(),
            level,
            race: race as u8,
            class: class as u8,
            gender: gender as u8,
        });

        debug!(%guid, %name, level, ?race, ?class, "created bot character");
        Ok(guid)
    }
}
