//! Static reference tables for character creation.
//!
//! Mirrors the subset of the game's DBC-style reference data that character
//! creation depends on: the valid race/class matrix, canonical starting
//! positions, and per-race customization options.

use crate::world::ids::{MapId, ZoneId};

/// Playable races.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Race {
    Human = 1,
    Orc = 2,
    Dwarf = 3,
    Elf = 4,
    Undead = 5,
    Troll = 8,
}

impl Race {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Race::Human),
            2 => Some(Race::Orc),
            3 => Some(Race::Dwarf),
            4 => Some(Race::Elf),
            5 => Some(Race::Undead),
            8 => Some(Race::Troll),
            _ => None,
        }
    }

    pub const ALL: [Race; 6] = [
        Race::Human,
        Race::Orc,
        Race::Dwarf,
        Race::Elf,
        Race::Undead,
        Race::Troll,
    ];
}

/// Playable classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Class {
    Warrior = 1,
    Paladin = 2,
    Hunter = 3,
    Rogue = 4,
    Priest = 5,
    Shaman = 7,
    Mage = 8,
    Warlock = 9,
    Druid = 11,
}

impl Class {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Class::Warrior),
            2 => Some(Class::Paladin),
            3 => Some(Class::Hunter),
            4 => Some(Class::Rogue),
            5 => Some(Class::Priest),
            7 => Some(Class::Shaman),
            8 => Some(Class::Mage),
            9 => Some(Class::Warlock),
            11 => Some(Class::Druid),
            _ => None,
        }
    }
}

/// Character gender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Gender {
    Male = 0,
    Female = 1,
}

/// A world position with orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub map: MapId,
    pub zone: ZoneId,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub orientation: f32,
}

impl Position {
    pub const ZERO: Position = Position {
        map: 0,
        zone: 0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
        orientation: 0.0,
    };

    /// A freshly built character row carries an all-zero position until the
    /// starting location is resolved.
    pub fn is_degenerate(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }
}

/// Valid classes per race. Creation rejects any pair outside this matrix.
const RACE_CLASS_MATRIX: &[(Race, &[Class])] = &[
    (
        Race::Human,
        &[
            Class::Warrior,
            Class::Paladin,
            Class::Rogue,
            Class::Priest,
            Class::Mage,
            Class::Warlock,
        ],
    ),
    (
        Race::Orc,
        &[
            Class::Warrior,
            Class::Hunter,
            Class::Rogue,
            Class::Shaman,
            Class::Warlock,
        ],
    ),
    (
        Race::Dwarf,
        &[
            Class::Warrior,
            Class::Paladin,
            Class::Hunter,
            Class::Rogue,
            Class::Priest,
        ],
    ),
    (
        Race::Elf,
        &[
            Class::Warrior,
            Class::Hunter,
            Class::Rogue,
            Class::Priest,
            Class::Druid,
        ],
    ),
    (
        Race::Undead,
        &[
            Class::Warrior,
            Class::Rogue,
            Class::Priest,
            Class::Mage,
            Class::Warlock,
        ],
    ),
    (
        Race::Troll,
        &[
            Class::Warrior,
            Class::Hunter,
            Class::Rogue,
            Class::Priest,
            Class::Shaman,
            Class::Mage,
        ],
    ),
];

/// Canonical starting positions per race.
const STARTING_POSITIONS: &[(Race, Position)] = &[
    (
        Race::Human,
        Position { map: 0, zone: 12, x: -8949.9, y: -132.5, z: 83.5, orientation: 0.0 },
    ),
    (
        Race::Orc,
        Position { map: 1, zone: 14, x: -618.5, y: -4251.7, z: 38.7, orientation: 0.0 },
    ),
    (
        Race::Dwarf,
        Position { map: 0, zone: 1, x: -6240.3, y: 331.0, z: 382.7, orientation: 6.2 },
    ),
    (
        Race::Elf,
        Position { map: 1, zone: 141, x: 10311.3, y: 832.4, z: 1326.4, orientation: 5.7 },
    ),
    (
        Race::Undead,
        Position { map: 0, zone: 85, x: 1676.3, y: 1677.4, z: 121.7, orientation: 2.7 },
    ),
    (
        Race::Troll,
        Position { map: 1, zone: 14, x: -618.5, y: -4251.7, z: 38.7, orientation: 0.0 },
    ),
];

/// One customization option with its valid choices.
#[derive(Debug, Clone, Copy)]
pub struct CustomizationOption {
    pub option_id: u8,
    pub choices: &'static [u8],
}

// Option ids follow the character-appearance table: 1 skin, 2 face,
// 3 hair style, 4 hair color, 5 facial style.
const BASE_OPTIONS: &[CustomizationOption] = &[
    CustomizationOption { option_id: 1, choices: &[0, 1, 2, 3, 4, 5] },
    CustomizationOption { option_id: 2, choices: &[0, 1, 2, 3, 4, 5, 6, 7] },
    CustomizationOption { option_id: 3, choices: &[0, 1, 2, 3, 4, 5, 6] },
    CustomizationOption { option_id: 4, choices: &[0, 1, 2, 3] },
];

const MALE_FACIAL_OPTION: CustomizationOption =
    CustomizationOption { option_id: 5, choices: &[0, 1, 2, 3, 4] };

/// Whether the (race, class) pair is creatable.
pub fn is_valid_combo(race: Race, class: Class) -> bool {
    RACE_CLASS_MATRIX
        .iter()
        .find(|(r, _)| *r == race)
        .map(|(_, classes)| classes.contains(&class))
        .unwrap_or(false)
}

/// Canonical starting position for a race.
pub fn starting_position(race: Race) -> Position {
    STARTING_POSITIONS
        .iter()
        .find(|(r, _)| *r == race)
        .map(|(_, p)| *p)
        .expect("every race has a starting position")
}

/// Customization options defined for a race and gender. Every option listed
/// here requires at least one choice at creation.
pub fn customization_options(_race: Race, gender: Gender) -> Vec<CustomizationOption> {
    let mut options: Vec<CustomizationOption> = BASE_OPTIONS.to_vec();
    if gender == Gender::Male {
        options.push(MALE_FACIAL_OPTION);
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_combo() {
        assert!(is_valid_combo(Race::Human, Class::Paladin));
        assert!(is_valid_combo(Race::Orc, Class::Shaman));
    }

    #[test]
    fn test_invalid_combo() {
        assert!(!is_valid_combo(Race::Orc, Class::Paladin));
        assert!(!is_valid_combo(Race::Human, Class::Druid));
    }

    #[test]
    fn test_every_race_has_starting_position() {
        for race in Race::ALL {
            let pos = starting_position(race);
            assert!(!pos.is_degenerate());
            assert!(pos.zone != 0);
        }
    }

    #[test]
    fn test_customization_options_nonempty() {
        for race in Race::ALL {
            for gender in [Gender::Male, Gender::Female] {
                let options = customization_options(race, gender);
                assert!(!options.is_empty());
                for option in options {
                    assert!(!option.choices.is_empty());
                }
            }
        }
    }

    #[test]
    fn test_male_has_facial_option() {
        let male = customization_options(Race::Human, Gender::Male);
        let female = customization_options(Race::Human, Gender::Female);
        assert_eq!(male.len(), female.len() + 1);
    }

    #[test]
    fn test_race_class_round_trip() {
        assert_eq!(Race::from_u8(Race::Troll as u8), Some(Race::Troll));
        assert_eq!(Class::from_u8(Class::Druid as u8), Some(Class::Druid));
        assert_eq!(Race::from_u8(0), None);
        assert_eq!(Class::from_u8(6), None);
    }
}
