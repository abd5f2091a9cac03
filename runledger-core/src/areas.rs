//! Area classification tables and area-modifier extraction.
//!
//! The tables carry the subset of world areas the pipeline needs to make
//! decisions about: boundary suppression, reporting buckets, and the special
//! NPC names cross-referenced during finalization.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Reporting bucket a run's zone belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AreaType {
    Town,
    NormalMap,
    UniqueMap,
    BlightedMap,
    Labyrinth,
    LabTrial,
    VaalSideArea,
    DelveMine,
    Heist,
    GrandHeist,
    Simulacrum,
    Other,
}

impl AreaType {
    /// Human-readable bucket label for reports.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Town => "Towns",
            Self::NormalMap => "Maps",
            Self::UniqueMap => "Unique Maps",
            Self::BlightedMap => "Blighted Maps",
            Self::Labyrinth => "Labyrinth",
            Self::LabTrial => "Lab Trials",
            Self::VaalSideArea => "Vaal Side Areas",
            Self::DelveMine => "Delve",
            Self::Heist => "Heists",
            Self::GrandHeist => "Grand Heists",
            Self::Simulacrum => "Simulacrum",
            Self::Other => "Other",
        }
    }
}

const TOWNS: &[&str] = &[
    "Lioneye's Watch",
    "The Forest Encampment",
    "The Sarn Encampment",
    "Highgate",
    "Overseer's Tower",
    "Oriath Docks",
    "Oriath",
    "The Bridge Encampment",
    "Karui Shores",
    "Kingsmarch",
    "The Rogue Harbour",
    "The Menagerie",
    "Azurite Mine Encampment",
    "Tane's Laboratory",
    "The Sacred Grove",
    "Aspirants' Plaza",
    "The Templar Laboratory",
];

const HIDEOUT_SUFFIX: &str = "Hideout";

const VAAL_SIDE_AREAS: &[&str] = &[
    "Ancient Catacombs",
    "Arcane Chambers",
    "Desecrated Chambers",
    "Flooded Complex",
    "Forbidden Chamber",
    "Forgotten Conduit",
    "Inner Grounds",
    "Neglected Cellar",
    "Ruined Square",
    "Sealed Basement",
    "Sealed Corridors",
    "Shifting Chambers",
    "Twisted Inquisitorium",
];

const UNIQUE_MAPS: &[&str] = &[
    "Acton's Nightmare",
    "Caer Blaidd, Wolfpack's Den",
    "Death and Taxes",
    "Hallowed Ground",
    "Maelström of Chaos",
    "Mao Kun",
    "Oba's Cursed Trove",
    "Olmec's Sanctum",
    "Pillars of Arun",
    "Poorjoy's Asylum",
    "The Coward's Trial",
    "The Putrid Cloister",
    "The Twilight Temple",
    "The Vinktar Square",
    "Vaults of Atziri",
];

/// The Maven's invitation arena.
pub const MAVEN_CRUCIBLE: &str = "The Maven's Crucible";

/// The final Maven battle arena.
pub const MAVEN_ARENA: &str = "Absence of Mercy and Empathy";

/// Fragment and pinnacle arenas that host tracked boss encounters.
const BOSS_ARENAS: &[&str] = &[
    "The Shaper's Realm",
    MAVEN_ARENA,
    MAVEN_CRUCIBLE,
    "Eye of the Storm",
    "The Feral Lair",
    "Mastermind's Lair",
    "Cortex",
    "Absence of Value and Meaning",
];

/// The delve mine instance name.
pub const DELVE_MINE: &str = "Azurite Mine";

/// The abyssal side-area entered through hollows.
pub const ABYSSAL_DEPTHS: &str = "Abyssal Depths";

/// Heist contracts and blueprints both load into this area.
pub const HEIST_AREA: &str = "Laboratory";

const SIMULACRUM: &str = "The Simulacrum";

/// Elder guardians matched against area-modifier suffixes.
pub const ELDER_GUARDIANS: &[&str] = &[
    "The Enslaver",
    "The Eradicator",
    "The Constrictor",
    "The Purifier",
];

/// Conqueror boss names and the exalted orb each one can drop.
pub const CONQUEROR_ORBS: &[(&str, &str)] = &[
    ("Al-Hezmin, the Hunter", "Hunter's Exalted Orb"),
    ("Drox, the Warlord", "Warlord's Exalted Orb"),
    ("Veritania, the Redeemer", "Redeemer's Exalted Orb"),
    ("Baran, the Crusader", "Crusader's Exalted Orb"),
];

/// Orb dropped by a completed Sirus fight.
pub const AWAKENER_ORB: &str = "Awakener's Orb";

/// Metamorph organ sample names as they appear in drop tallies.
pub const METAMORPH_ORGANS: &[&str] = &["brain", "lung", "heart", "eye", "liver"];

/// Whether the area is a town, hideout, or other safe staging zone.
#[must_use]
pub fn is_town(area: &str) -> bool {
    TOWNS.contains(&area) || area.ends_with(HIDEOUT_SUFFIX)
}

/// Whether the area is part of a labyrinth instance.
#[must_use]
pub fn is_lab_area(area: &str) -> bool {
    area.starts_with("Estate ") || area == "Aspirant's Trial" || area == "The Labyrinth"
}

/// Whether the area is a labyrinth trial.
#[must_use]
pub fn is_lab_trial(area: &str) -> bool {
    area.starts_with("Trial of ")
}

/// Whether the area is a corrupted Vaal side area.
#[must_use]
pub fn is_vaal_side_area(area: &str) -> bool {
    VAAL_SIDE_AREAS.contains(&area)
}

/// Classify an area into its reporting bucket.
///
/// Heist and blighted-map classification need run context (rogue count,
/// blight lane density) and are applied as overrides by the record builder;
/// this function covers what the name alone can decide.
#[must_use]
pub fn area_type(area: &str) -> AreaType {
    if is_town(area) {
        return AreaType::Town;
    }
    if is_lab_trial(area) {
        return AreaType::LabTrial;
    }
    if is_lab_area(area) {
        return AreaType::Labyrinth;
    }
    if is_vaal_side_area(area) {
        return AreaType::VaalSideArea;
    }
    if area == DELVE_MINE || area == ABYSSAL_DEPTHS {
        return AreaType::DelveMine;
    }
    if area == SIMULACRUM {
        return AreaType::Simulacrum;
    }
    if UNIQUE_MAPS.contains(&area) || BOSS_ARENAS.contains(&area) {
        return AreaType::UniqueMap;
    }
    if area == HEIST_AREA {
        return AreaType::Heist;
    }
    // Without a full world-area table, any remaining combat zone reports as
    // a normal map.
    AreaType::NormalMap
}

/// Item quantity/rarity/pack-size scalars parsed from area modifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaModifiers {
    pub item_quantity: u32,
    pub item_rarity: u32,
    pub pack_size: u32,
}

fn leading_number() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[0-9]+").expect("valid literal regex"))
}

fn first_number(modifier: &str) -> u32 {
    leading_number()
        .find(modifier)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Extract quantity/rarity/pack-size scalars from an area's modifier list.
#[must_use]
pub fn extract_modifiers(modifiers: &[String]) -> AreaModifiers {
    let mut stats = AreaModifiers::default();
    for modifier in modifiers {
        if modifier.ends_with("% increased Rarity of Items found in this Area") {
            stats.item_rarity = first_number(modifier);
        } else if modifier.ends_with("% increased Quantity of Items found in this Area") {
            stats.item_quantity = first_number(modifier);
        } else if modifier.ends_with("% increased Pack size") {
            stats.pack_size = first_number(modifier);
        }
    }
    stats
}

/// Find the elder guardian named by an area's modifier list, if any.
#[must_use]
pub fn elder_guardian_in(modifiers: &[String]) -> Option<&'static str> {
    ELDER_GUARDIANS
        .iter()
        .find(|guardian| modifiers.iter().any(|modifier| modifier.ends_with(*guardian)))
        .copied()
}
