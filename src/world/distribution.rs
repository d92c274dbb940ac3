//! Weighted race/class sampling for auto-created characters.
//!
//! The weight table is operator-editable and ships as a JSON document; the
//! built-in defaults give every valid combination equal weight.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::world::reference::{is_valid_combo, Class, Race};

/// Samples a (race, class) pair from a weighted distribution.
pub trait CharacterDistribution: Send + Sync {
    /// `None` signals an exhausted or empty distribution.
    fn sample_race_class(&self) -> Option<(Race, Class)>;
}

/// One weight entry as persisted in the distribution document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceClassWeight {
    pub race: u8,
    pub class: u8,
    pub weight: u32,
}

/// Operator-editable distribution document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionDocument {
    pub weights: Vec<RaceClassWeight>,
}

impl DistributionDocument {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for DistributionDocument {
    fn default() -> Self {
        let mut weights = Vec::new();
        for race in Race::ALL {
            for class in [
                Class::Warrior,
                Class::Paladin,
                Class::Hunter,
                Class::Rogue,
                Class::Priest,
                Class::Shaman,
                Class::Mage,
                Class::Warlock,
                Class::Druid,
            ] {
                if is_valid_combo(race, class) {
                    weights.push(RaceClassWeight {
                        race: race as u8,
                        class: class as u8,
                        weight: 10,
                    });
                }
            }
        }
        Self { weights }
    }
}

/// Weighted sampler over validated (race, class) pairs.
pub struct WeightedDistribution {
    entries: Vec<(Race, Class, u32)>,
    total_weight: u64,
}

impl WeightedDistribution {
    /// Build from a document, dropping invalid or zero-weight rows.
    pub fn from_document(doc: &DistributionDocument) -> Self {
        let mut entries = Vec::with_capacity(doc.weights.len());
        let mut total_weight = 0u64;

        for row in &doc.weights {
            let parsed = Race::from_u8(row.race).zip(Class::from_u8(row.class));
            match parsed {
                Some((race, class)) if is_valid_combo(race, class) && row.weight > 0 => {
                    entries.push((race, class, row.weight));
                    total_weight += row.weight as u64;
                }
                _ => {
                    warn!(
                        race = row.race,
                        class = row.class,
                        weight = row.weight,
                        "dropping invalid distribution row"
                    );
                }
            }
        }

        Self { entries, total_weight }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

impl Default for WeightedDistribution {
    fn default() -> Self {
        Self::from_document(&DistributionDocument::default())
    }
}

impl CharacterDistribution for WeightedDistribution {
    fn sample_race_class(&self) -> Option<(Race, Class)> {
        if self.total_weight == 0 {
            return None;
        }

        let mut roll = rand::thread_rng().gen_range(0..self.total_weight);
        for (race, class, weight) in &self.entries {
            if roll < *weight as u64 {
                return Some((*race, *class));
            }
            roll -= *weight as u64;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_distribution_samples() {
        let dist = WeightedDistribution::default();
        let (race, class) = dist.sample_race_class().unwrap();
        assert!(is_valid_combo(race, class));
    }

    #[test]
    fn test_empty_document_exhausted() {
        let dist = WeightedDistribution::from_document(&DistributionDocument { weights: vec![] });
        assert!(dist.sample_race_class().is_none());
    }

    #[test]
    fn test_invalid_rows_dropped() {
        let doc = DistributionDocument {
            weights: vec![
                RaceClassWeight { race: 2, class: 2, weight: 10 }, // orc paladin: invalid
                RaceClassWeight { race: 1, class: 1, weight: 0 },  // zero weight
                RaceClassWeight { race: 1, class: 8, weight: 5 },
            ],
        };
        let dist = WeightedDistribution::from_document(&doc);
        assert_eq!(dist.entry_count(), 1);
        assert_eq!(dist.sample_race_class(), Some((Race::Human, Class::Mage)));
    }

    #[test]
    fn test_single_entry_always_sampled() {
        let doc = DistributionDocument {
            weights: vec![RaceClassWeight { race: 5, class: 9, weight: 1 }],
        };
        let dist = WeightedDistribution::from_document(&doc);
        for _ in 0..50 {
            assert_eq!(dist.sample_race_class(), Some((Race::Undead, Class::Warlock)));
        }
    }

    #[test]
    fn test_json_round_trip() {
        let json = r#"{"weights":[{"race":1,"class":1,"weight":30}]}"#;
        let doc = DistributionDocument::from_json(json).unwrap();
        assert_eq!(doc.weights.len(), 1);
        let dist = WeightedDistribution::from_document(&doc);
        assert_eq!(dist.sample_race_class(), Some((Race::Human, Class::Warrior)));
    }
}
