//! Unique character name allocation.

use parking_lot::Mutex;
use rand::Rng;
use rustc_hash::FxHashSet;

use crate::world::reference::Gender;

/// Atomically reserves and releases unique character names.
pub trait NameAllocator: Send + Sync {
    /// Reserve a fresh name. `None` when the pool is exhausted.
    ///
    /// The guid hint keeps retries deterministic per character and is folded
    /// into the fallback suffix on collision.
    fn allocate(&self, gender: Gender, guid_hint: u64) -> Option<String>;

    /// Return a previously reserved name to the pool.
    fn release(&self, name: &str);
}

const NAME_PREFIXES: &[&str] = &[
    "Bran", "Kel", "Mor", "Thal", "Ver", "Gor", "Ael", "Dur", "Fen", "Lor",
    "Nar", "Ryn", "Sor", "Tar", "Ulf", "Wyn",
];

const MALE_SUFFIXES: &[&str] = &["dor", "gar", "ric", "mund", "grim", "thar", "wulf", "bane"];
const FEMALE_SUFFIXES: &[&str] = &["wen", "lyn", "ara", "iel", "issa", "enna", "yra", "ona"];

/// How many random draws before falling back to the guid-derived suffix.
const RANDOM_ATTEMPTS: u32 = 16;

/// In-memory allocator combining syllable pools with a reservation set.
pub struct SyllableNameAllocator {
    reserved: Mutex<FxHashSet<String>>,
}

impl SyllableNameAllocator {
    pub fn new() -> Self {
        Self { reserved: Mutex::new(FxHashSet::default()) }
    }

    pub fn reserved_count(&self) -> usize {
        self.reserved.lock().len()
    }

    fn compose(prefix: &str, suffix: &str) -> String {
        let mut name = String::with_capacity(prefix.len() + suffix.len());
        name.push_str(prefix);
        name.push_str(suffix);
        name
    }
}

impl Default for SyllableNameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl NameAllocator for SyllableNameAllocator {
    fn allocate(&self, gender: Gender, guid_hint: u64) -> Option<String> {
        let suffixes = match gender {
            Gender::Male => MALE_SUFFIXES,
            Gender::Female => FEMALE_SUFFIXES,
        };

        let mut rng = rand::thread_rng();
        let mut reserved = self.reserved.lock();

        for _ in 0..RANDOM_ATTEMPTS {
            let prefix = NAME_PREFIXES[rng.gen_range(0..NAME_PREFIXES.len())];
            let suffix = suffixes[rng.gen_range(0..suffixes.len())];
            let name = Self::compose(prefix, suffix);
            if reserved.insert(name.clone()) {
                return Some(name);
            }
        }

        // Collision-heavy pool: derive a unique tail from the guid hint.
        let prefix = NAME_PREFIXES[(guid_hint as usize) % NAME_PREFIXES.len()];
        let suffix = suffixes[(guid_hint as usize / NAME_PREFIXES.len()) % suffixes.len()];
        let name = format!("{}{}", Self::compose(prefix, suffix), guid_hint % 10_000);
        if reserved.insert(name.clone()) {
            return Some(name);
        }

        None
    }

    fn release(&self, name: &str) {
        self.reserved.lock().remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_unique() {
        let allocator = SyllableNameAllocator::new();
        let a = allocator.allocate(Gender::Male, 1).unwrap();
        let b = allocator.allocate(Gender::Male, 2).unwrap();
        assert_ne!(a, b);
        assert_eq!(allocator.reserved_count(), 2);
    }

    #[test]
    fn test_release_frees_name() {
        let allocator = SyllableNameAllocator::new();
        let name = allocator.allocate(Gender::Female, 1).unwrap();
        allocator.release(&name);
        assert_eq!(allocator.reserved_count(), 0);
    }

    #[test]
    fn test_many_allocations_stay_unique() {
        let allocator = SyllableNameAllocator::new();
        let mut seen = std::collections::HashSet::new();
        for i in 0..500 {
            let name = allocator
                .allocate(Gender::Male, i)
                .expect("pool should not exhaust at 500 names");
            assert!(seen.insert(name));
        }
    }
}
