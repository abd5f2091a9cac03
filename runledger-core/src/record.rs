//! Frozen run records.
//!
//! A [`RunRecord`] is the immutable, serializable snapshot a finished run is
//! frozen into. Freezing consumes the [`RunAccumulator`] arena and replaces
//! every interval log with a plain interval list, so a persisted record can
//! never be mutated by later events.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::areas::{AreaModifiers, AreaType};
use crate::dialogue::Master;
use crate::interval::EncounterInterval;
use crate::reducer::{
    BeastCaptures, BlightMarker, GuardianEntry, MemberFight, RunAccumulator, TempleRoom,
    WaveMarker,
};

/// Frozen bestiary record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeastRecord {
    pub captured: BeastCaptures,
    pub crafted: Vec<EncounterInterval>,
}

/// Frozen betrayal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetrayalRecord {
    pub fights: Vec<MemberFight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boss: Option<String>,
    pub boss_fights: Vec<EncounterInterval>,
}

/// Frozen boss record used by every paired-fight mechanic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BossRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boss: Option<String>,
    pub fights: Vec<EncounterInterval>,
}

/// Frozen incursion record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncursionRecord {
    pub unlocks: Vec<EncounterInterval>,
    pub rooms: Vec<TempleRoom>,
}

/// Frozen labyrinth record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabyrinthRecord {
    pub argus_kills: Vec<NaiveDateTime>,
    pub boss_fights: Vec<EncounterInterval>,
}

/// Frozen maven record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MavenRecord {
    pub witnesses: Vec<EncounterInterval>,
    pub boss_kills: BossRecord,
}

/// Frozen shaper record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShaperRecord {
    pub guardians: Vec<GuardianEntry>,
    pub boss_fights: BossRecord,
}

/// Frozen delve record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelveRecord {
    pub niko: bool,
    pub sulphite_nodes: u32,
}

/// Loot attributed to a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LootRecord {
    pub count: u64,
    /// Total value in the reference currency.
    pub total_value: f64,
    /// High-value drop names with per-name counts.
    pub important_drops: BTreeMap<String, u32>,
}

/// A conqueror defeat with the exalted orb it drops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConquerorDefeat {
    pub boss: String,
    pub orb: String,
    pub orb_dropped: bool,
}

/// The immutable record of one finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub area: String,
    pub area_type: AreaType,
    pub first_event: NaiveDateTime,
    pub last_event: NaiveDateTime,
    pub level: Option<u32>,
    pub deaths: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience_delta: Option<i64>,
    pub loot: LootRecord,
    /// Seconds spent per area visited during the run, towns excluded.
    pub area_times: BTreeMap<String, i64>,
    pub abyssal_depths: bool,
    pub vaal_side_areas: bool,
    pub abnormal_disconnects: u32,
    pub modifiers: AreaModifiers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elder_guardian: Option<String>,

    pub envoy_words: u32,
    pub strange_voice: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delve: Option<DelveRecord>,
    pub masters: BTreeSet<Master>,
    pub heist_rogues: BTreeSet<String>,
    pub metamorph_organs: BTreeMap<String, u32>,
    pub conqueror_defeats: Vec<ConquerorDefeat>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beasts: Option<BeastRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub betrayal: Option<BetrayalRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blight: Option<Vec<BlightMarker>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conquerors: Option<BossRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delirium: Option<Vec<WaveMarker>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elder: Option<BossRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harvest: Option<BossRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incursion: Option<IncursionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labyrinth: Option<LabyrinthRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legion: Option<BossRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maven: Option<MavenRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shaper: Option<ShaperRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shrines: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sirus: Option<BossRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<BossRecord>,
}

impl RunRecord {
    /// Wall-clock length of the run in seconds, clamped at zero.
    #[must_use]
    pub fn duration_seconds(&self) -> i64 {
        self.last_event
            .signed_duration_since(self.first_event)
            .num_seconds()
            .max(0)
    }

    /// Freeze a finished accumulator into an immutable record.
    #[must_use]
    pub fn freeze(header: RunHeader, acc: RunAccumulator) -> Self {
        let RunHeader {
            area,
            area_type,
            first_event,
            last_event,
            level,
            deaths,
            kill_count,
            experience_delta,
            loot,
            area_times,
            abyssal_depths,
            vaal_side_areas,
            abnormal_disconnects,
            modifiers,
            elder_guardian,
            metamorph_organs,
            conqueror_defeats,
        } = header;

        Self {
            area,
            area_type,
            first_event,
            last_event,
            level,
            deaths,
            kill_count,
            experience_delta,
            loot,
            area_times,
            abyssal_depths,
            vaal_side_areas,
            abnormal_disconnects,
            modifiers,
            elder_guardian,
            envoy_words: acc.envoy_words,
            strange_voice: acc.strange_voice,
            delve: acc.delve.map(|d| DelveRecord {
                niko: d.niko,
                sulphite_nodes: d.sulphite_nodes,
            }),
            masters: acc.masters.into_keys().collect(),
            heist_rogues: acc.heist_rogues,
            metamorph_organs,
            conqueror_defeats,
            beasts: acc.beasts.map(|b| BeastRecord {
                captured: b.captured,
                crafted: b.crafted.into_intervals(),
            }),
            betrayal: acc.betrayal.map(|b| BetrayalRecord {
                fights: b.fights,
                boss: b.boss,
                boss_fights: b.boss_fights.into_intervals(),
            }),
            blight: acc.blight,
            conquerors: acc.conquerors.map(|c| BossRecord {
                boss: c.boss,
                fights: c.fights.into_intervals(),
            }),
            delirium: acc.delirium,
            elder: acc.elder.map(|e| BossRecord {
                boss: e.boss,
                fights: e.fights.into_intervals(),
            }),
            harvest: acc.harvest.map(|h| BossRecord {
                boss: h.boss,
                fights: h.fights.into_intervals(),
            }),
            incursion: acc.incursion.map(|i| IncursionRecord {
                unlocks: i.unlocks.into_intervals(),
                rooms: i.rooms,
            }),
            labyrinth: acc.labyrinth.map(|l| LabyrinthRecord {
                argus_kills: l.argus_kills,
                boss_fights: l.boss_fights.into_intervals(),
            }),
            legion: acc.legion.map(|l| BossRecord {
                boss: l.boss,
                fights: l.fights.into_intervals(),
            }),
            maven: acc.maven.map(|m| MavenRecord {
                witnesses: m.witnesses,
                boss_kills: BossRecord {
                    boss: m.boss_kills.boss,
                    fights: m.boss_kills.fights.into_intervals(),
                },
            }),
            shaper: acc.shaper.map(|s| ShaperRecord {
                guardians: s.guardians,
                boss_fights: BossRecord {
                    boss: s.boss_fights.boss,
                    fights: s.boss_fights.fights.into_intervals(),
                },
            }),
            shrines: acc.shrines,
            sirus: acc.sirus.map(|s| BossRecord {
                boss: s.boss,
                fights: s.fights.into_intervals(),
            }),
            synthesis: acc.synthesis.map(|s| BossRecord {
                boss: s.boss,
                fights: s.fights.into_intervals(),
            }),
        }
    }
}

/// Everything the record builder computes outside the event fold.
#[derive(Debug, Clone, PartialEq)]
pub struct RunHeader {
    pub area: String,
    pub area_type: AreaType,
    pub first_event: NaiveDateTime,
    pub last_event: NaiveDateTime,
    pub level: Option<u32>,
    pub deaths: u32,
    pub kill_count: Option<u64>,
    pub experience_delta: Option<i64>,
    pub loot: LootRecord,
    pub area_times: BTreeMap<String, i64>,
    pub abyssal_depths: bool,
    pub vaal_side_areas: bool,
    pub abnormal_disconnects: u32,
    pub modifiers: AreaModifiers,
    pub elder_guardian: Option<String>,
    pub metamorph_organs: BTreeMap<String, u32>,
    pub conqueror_defeats: Vec<ConquerorDefeat>,
}

impl RunHeader {
    /// A minimal header for an area and its event window.
    #[must_use]
    pub fn new(
        area: impl Into<String>,
        area_type: AreaType,
        first_event: NaiveDateTime,
        last_event: NaiveDateTime,
    ) -> Self {
        Self {
            area: area.into(),
            area_type,
            first_event,
            last_event,
            level: None,
            deaths: 0,
            kill_count: None,
            experience_delta: None,
            loot: LootRecord::default(),
            area_times: BTreeMap::new(),
            abyssal_depths: false,
            vaal_side_areas: false,
            abnormal_disconnects: 0,
            modifiers: AreaModifiers::default(),
            elder_guardian: None,
            metamorph_organs: BTreeMap::new(),
            conqueror_defeats: Vec::new(),
        }
    }
}

/// Digest of a finished run, returned by finalization and pushed to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub name: String,
    pub gained: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience_delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_count: Option<u64>,
    pub first_event: NaiveDateTime,
    pub last_event: NaiveDateTime,
}

impl RunSummary {
    /// Build the digest for a frozen record.
    #[must_use]
    pub fn of(record: &RunRecord) -> Self {
        Self {
            name: record.area.clone(),
            gained: record.loot.total_value,
            experience_delta: record.experience_delta,
            kill_count: record.kill_count,
            first_event: record.first_event,
            last_event: record.last_event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EncounterEvent, PairAction};
    use chrono::NaiveDate;

    fn ts(seconds: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .expect("valid date")
            .and_hms_opt(12, 0, 0)
            .expect("valid time")
            + chrono::Duration::seconds(i64::from(seconds))
    }

    #[test]
    fn freeze_drops_untouched_mechanics() {
        let header = RunHeader::new("Strand", AreaType::NormalMap, ts(0), ts(30));
        let record = RunRecord::freeze(header, RunAccumulator::default());
        assert!(record.beasts.is_none());
        assert!(record.maven.is_none());
        assert!(record.shrines.is_empty());
    }

    #[test]
    fn freeze_preserves_interval_order() {
        let mut acc = RunAccumulator::default();
        acc.apply(
            ts(0),
            EncounterEvent::BeastCraft {
                action: PairAction::Start,
            },
        );
        acc.apply(
            ts(10),
            EncounterEvent::BeastCraft {
                action: PairAction::Finish,
            },
        );
        acc.apply(
            ts(20),
            EncounterEvent::BeastCraft {
                action: PairAction::Start,
            },
        );

        let header = RunHeader::new("Strand", AreaType::NormalMap, ts(0), ts(30));
        let record = RunRecord::freeze(header, acc);
        let crafted = &record.beasts.expect("beasts").crafted;
        assert_eq!(crafted.len(), 2);
        assert_eq!(crafted[0].duration_seconds(), Some(10));
        assert!(crafted[1].is_open());
    }

    #[test]
    fn record_json_round_trips() {
        let mut acc = RunAccumulator::default();
        acc.apply(
            ts(5),
            EncounterEvent::ShrineActivation {
                name: "Diamond Shrine".to_string(),
            },
        );
        let header = RunHeader::new("Dunes", AreaType::NormalMap, ts(0), ts(300));
        let record = RunRecord::freeze(header, acc);

        let json = serde_json::to_string(&record).expect("serialize");
        let back: RunRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, record);
    }

    #[test]
    fn summary_reports_the_area_as_its_name() {
        let header = RunHeader::new("Dunes", AreaType::NormalMap, ts(0), ts(300));
        let record = RunRecord::freeze(header, RunAccumulator::default());
        let summary = RunSummary::of(&record);
        assert_eq!(summary.name, "Dunes");

        let json = serde_json::to_value(&summary).expect("serialize");
        assert_eq!(json["name"], "Dunes");
        assert!(json.get("area").is_none());
    }

    #[test]
    fn duration_clamps_backwards_clock_to_zero() {
        let header = RunHeader::new("Dunes", AreaType::NormalMap, ts(30), ts(0));
        let record = RunRecord::freeze(header, RunAccumulator::default());
        assert_eq!(record.duration_seconds(), 0);
    }
}
