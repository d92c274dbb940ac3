//! Persistence contracts consumed by the scheduler.
//!
//! The scheduler only depends on a handful of prepared queries and a two
//! database transaction API; the in-memory implementation backs the
//! simulation wiring and tests, including fault injection for breaker
//! scenarios.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::world::ids::{AccountId, CharacterGuid};
use crate::world::reference::Position;

/// Which database a transaction targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Database {
    Characters,
    Accounts,
}

/// Persisted character row, as returned by the character queries.
#[derive(Debug, Clone)]
pub struct CharacterRow {
    pub guid: CharacterGuid,
    pub account: AccountId,
    pub name: String,
    pub level: u8,
    pub race: u8,
    pub class: u8,
    pub gender: u8,
    pub position: Position,
}

/// Prepared statement appended to a transaction.
#[derive(Debug, Clone)]
pub enum TxStatement {
    InsertCharacter(CharacterRow),
    IncrementRealmCharacterCount(AccountId),
    RegisterJitBot(CharacterGuid),
    ClearJitBot(CharacterGuid),
}

/// An open transaction: statements buffered until commit.
#[derive(Debug)]
pub struct Transaction {
    db: Database,
    statements: Vec<TxStatement>,
}

impl Transaction {
    pub fn append(&mut self, stmt: TxStatement) {
        self.statements.push(stmt);
    }

    pub fn database(&self) -> Database {
        self.db
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PersistenceError {
    #[error("query failed: {0}")]
    QueryFailed(&'static str),
    #[error("transaction commit failed on {0:?} database")]
    CommitFailed(Database),
}

/// Prepared queries and transactions against the character/account stores.
pub trait Persistence: Send + Sync {
    /// All characters owned by an account. Prepared, parameterized.
    fn characters_by_account(
        &self,
        account: AccountId,
    ) -> Result<Vec<CharacterRow>, PersistenceError>;

    /// Owning account of a character, or `None` when unknown.
    fn account_of_character(&self, guid: CharacterGuid) -> Option<AccountId>;

    /// Realm-wide character count for an account.
    fn characters_on_account(&self, account: AccountId) -> u32;

    /// Whether the character row is visible yet.
    fn character_exists(&self, guid: CharacterGuid) -> bool;

    fn begin_tx(&self, db: Database) -> Transaction;

    fn commit_tx(&self, tx: Transaction) -> Result<(), PersistenceError>;
}

/// In-memory two-database store with fault injection.
pub struct InMemoryPersistence {
    characters: RwLock<FxHashMap<CharacterGuid, CharacterRow>>,
    realm_counts: RwLock<FxHashMap<AccountId, u32>>,
    jit_bots: RwLock<FxHashSet<CharacterGuid>>,
    fail_queries: AtomicBool,
    fail_commits: AtomicBool,
    // Committed rows stay invisible to character_exists for this many calls,
    // modelling async replication lag for the existence-poll loop.
    visibility_lag: AtomicU32,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            characters: RwLock::new(FxHashMap::default()),
            realm_counts: RwLock::new(FxHashMap::default()),
            jit_bots: RwLock::new(FxHashSet::default()),
            fail_queries: AtomicBool::new(false),
            fail_commits: AtomicBool::new(false),
            visibility_lag: AtomicU32::new(0),
        }
    }

    /// Seed a character row directly, bypassing the transaction API.
    pub fn seed_character(&self, row: CharacterRow) {
        let account = row.account;
        self.characters.write().insert(row.guid, row);
        *self.realm_counts.write().entry(account).or_insert(0) += 1;
    }

    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Make newly committed rows invisible for the next `polls` existence
    /// checks.
    pub fn set_visibility_lag(&self, polls: u32) {
        self.visibility_lag.store(polls, Ordering::SeqCst);
    }

    pub fn character_count(&self) -> usize {
        self.characters.read().len()
    }

    pub fn jit_bot_count(&self) -> usize {
        self.jit_bots.read().len()
    }

    pub fn is_jit_bot(&self, guid: CharacterGuid) -> bool {
        self.jit_bots.read().contains(&guid)
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl Persistence for InMemoryPersistence {
    fn characters_by_account(
        &self,
        account: AccountId,
    ) -> Result<Vec<CharacterRow>, PersistenceError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(PersistenceError::QueryFailed("characters_by_account"));
        }
        let characters = self.characters.read();
        Ok(characters
            .values()
            .filter(|row| row.account == account)
            .cloned()
            .collect())
    }

    fn account_of_character(&self, guid: CharacterGuid) -> Option<AccountId> {
        self.characters.read().get(&guid).map(|row| row.account)
    }

    fn characters_on_account(&self, account: AccountId) -> u32 {
        self.realm_counts.read().get(&account).copied().unwrap_or(0)
    }

    fn character_exists(&self, guid: CharacterGuid) -> bool {
        let lag = self.visibility_lag.load(Ordering::SeqCst);
        if lag > 0 {
            self.visibility_lag.store(lag - 1, Ordering::SeqCst);
            return false;
        }
        self.characters.read().contains_key(&guid)
    }

    fn begin_tx(&self, db: Database) -> Transaction {
        Transaction { db, statements: Vec::new() }
    }

    fn commit_tx(&self, tx: Transaction) -> Result<(), PersistenceError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(PersistenceError::CommitFailed(tx.db));
        }
        for stmt in tx.statements {
            match stmt {
                TxStatement::InsertCharacter(row) => {
                    self.characters.write().insert(row.guid, row);
                }
                TxStatement::IncrementRealmCharacterCount(account) => {
                    *self.realm_counts.write().entry(account).or_insert(0) += 1;
                }
                TxStatement::RegisterJitBot(guid) => {
                    self.jit_bots.write().insert(guid);
                }
                TxStatement::ClearJitBot(guid) => {
                    self.jit_bots.write().remove(&guid);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(counter: u64, account: AccountId) -> CharacterRow {
        CharacterRow {
            guid: CharacterGuid::player(counter),
            account,
            name: format!("Bot{}", counter),
            level: 10,
            race: 1,
            class: 1,
            gender: 0,
            position: Position::ZERO,
        }
    }

    #[test]
    fn test_seed_and_query() {
        let store = InMemoryPersistence::new();
        store.seed_character(row(1, 10));
        store.seed_character(row(2, 10));
        store.seed_character(row(3, 11));

        let chars = store.characters_by_account(10).unwrap();
        assert_eq!(chars.len(), 2);
        assert_eq!(store.characters_on_account(10), 2);
        assert_eq!(store.characters_on_account(11), 1);
    }

    #[test]
    fn test_account_of_character() {
        let store = InMemoryPersistence::new();
        store.seed_character(row(5, 42));
        assert_eq!(store.account_of_character(CharacterGuid::player(5)), Some(42));
        assert_eq!(store.account_of_character(CharacterGuid::player(6)), None);
    }

    #[test]
    fn test_transaction_commit() {
        let store = InMemoryPersistence::new();
        let mut tx = store.begin_tx(Database::Characters);
        tx.append(TxStatement::InsertCharacter(row(7, 1)));
        assert_eq!(tx.len(), 1);
        store.commit_tx(tx).unwrap();

        let mut tx = store.begin_tx(Database::Accounts);
        tx.append(TxStatement::IncrementRealmCharacterCount(1));
        store.commit_tx(tx).unwrap();

        assert!(store.character_exists(CharacterGuid::player(7)));
        assert_eq!(store.characters_on_account(1), 1);
    }

    #[test]
    fn test_commit_failure_applies_nothing() {
        let store = InMemoryPersistence::new();
        store.set_fail_commits(true);

        let mut tx = store.begin_tx(Database::Characters);
        tx.append(TxStatement::InsertCharacter(row(8, 1)));
        assert!(store.commit_tx(tx).is_err());
        assert!(!store.character_exists(CharacterGuid::player(8)));
    }

    #[test]
    fn test_query_fault_injection() {
        let store = InMemoryPersistence::new();
        store.set_fail_queries(true);
        assert!(store.characters_by_account(1).is_err());
        store.set_fail_queries(false);
        assert!(store.characters_by_account(1).is_ok());
    }

    #[test]
    fn test_visibility_lag() {
        let store = InMemoryPersistence::new();
        store.seed_character(row(9, 1));
        store.set_visibility_lag(2);

        let guid = CharacterGuid::player(9);
        assert!(!store.character_exists(guid));
        assert!(!store.character_exists(guid));
        assert!(store.character_exists(guid));
    }

    #[test]
    fn test_jit_registry() {
        let store = InMemoryPersistence::new();
        let guid = CharacterGuid::player(11);

        let mut tx = store.begin_tx(Database::Characters);
        tx.append(TxStatement::RegisterJitBot(guid));
        store.commit_tx(tx).unwrap();
        assert!(store.is_jit_bot(guid));
        assert_eq!(store.jit_bot_count(), 1);

        let mut tx = store.begin_tx(Database::Characters);
        tx.append(TxStatement::ClearJitBot(guid));
        store.commit_tx(tx).unwrap();
        assert!(!store.is_jit_bot(guid));
    }
}
