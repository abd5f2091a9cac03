//! Statistics rollups over finished runs.
//!
//! [`aggregate`] folds a set of [`RunRecord`]s and a league's loot into one
//! ephemeral [`Statistics`] value: global per-mechanic counters, a per-area
//! breakdown with running profit per hour, and per-boss timing tallies. The
//! rollup is recomputed in full on every call and never persisted. Counters
//! start at zero and every minimum-time field stays absent until a real
//! sample arrives.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::areas::{AreaType, MAVEN_ARENA, MAVEN_CRUCIBLE};
use crate::dialogue::Master;
use crate::interval::EncounterInterval;
use crate::record::RunRecord;

/// Chaos-per-hour style rate; zero elapsed time yields zero, never NaN.
#[must_use]
pub fn profit_per_hour(gained: f64, elapsed_seconds: i64) -> f64 {
    if elapsed_seconds <= 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let hours = elapsed_seconds as f64 / 3600.0;
    gained / hours
}

/// One loot item of the league-wide set handed to the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LootItem {
    pub name: String,
    pub value: f64,
}

/// League-wide loot rollup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LootStats {
    pub count: u64,
    pub total_value: f64,
    /// Total value expressed in the reference currency.
    pub reference_value: f64,
}

/// Timing tally for one boss or entity name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BossTally {
    pub count: u64,
    pub total_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fastest: Option<i64>,
    pub deaths: u64,
}

impl BossTally {
    /// Fold one run's encounter span into the tally.
    ///
    /// The run's whole death count is credited to the entry; attribution is
    /// deliberately coarse and not limited to the fight window.
    fn record(&mut self, span: Option<i64>, run_deaths: u32) {
        self.count += 1;
        self.deaths += u64::from(run_deaths);
        if let Some(span) = span {
            self.total_time += span;
            self.fastest = Some(self.fastest.map_or(span, |f| f.min(span)));
        }
    }
}

/// Per-boss-category aggregates keyed by boss or entity name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BossStats {
    pub shaper_guardians: BTreeMap<String, BossTally>,
    pub elder_guardians: BTreeMap<String, BossTally>,
    pub conquerors: BTreeMap<String, BossTally>,
    pub shaper: BTreeMap<String, BossTally>,
    pub elder: BTreeMap<String, BossTally>,
    pub sirus: BTreeMap<String, BossTally>,
    pub maven: BTreeMap<String, BossTally>,
    pub synthesis: BTreeMap<String, BossTally>,
    pub legion: BTreeMap<String, BossTally>,
    pub betrayal: BTreeMap<String, BossTally>,
    pub harvest: BTreeMap<String, BossTally>,
}

/// Shrine activations, total plus per-type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShrineStats {
    pub total: u64,
    pub types: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyStats {
    pub encounters: u64,
    pub words: u64,
}

/// Started/completed pair for an encounter that can be failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncounterProgress {
    pub started: u64,
    pub completed: u64,
}

/// Maven arenas tallied apart from witnessed map bosses: crucible
/// invitations and the final battle each get a started/completed pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MavenStats {
    pub crucible: EncounterProgress,
    pub battle: EncounterProgress,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulacrumStats {
    pub encounters: u64,
    pub waves: u64,
    pub highest_wave: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabyrinthStats {
    pub started: u64,
    pub completed: u64,
    pub argus_kills: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fastest: Option<i64>,
}

/// Legion general encounters across all runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegionStats {
    pub encounters: u64,
    pub kills: u64,
}

/// Syndicate member encounter tally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyndicateMemberStats {
    pub encounters: u64,
    pub defeated: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlightStats {
    pub encounters: u64,
    pub total_lanes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BestiaryStats {
    pub yellow_captured: u64,
    pub red_captured: u64,
    pub crafted: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fastest_craft: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncursionStats {
    pub unlocks: u64,
    pub rooms: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelveStats {
    pub runs: u64,
    pub sulphite_nodes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeistStats {
    pub heists: u64,
    pub grand_heists: u64,
    pub rogues: BTreeMap<String, u64>,
}

/// Global counters not tied to a specific area or boss breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiscStats {
    pub experience_gained: i64,
    pub kills: u64,
    pub deaths: u64,
    pub abnormal_disconnects: u64,
    pub shrines: ShrineStats,
    pub envoy: EnvoyStats,
    pub strange_voice_encounters: u64,
    pub maven: MavenStats,
    pub simulacrum: SimulacrumStats,
    pub labyrinth: LabyrinthStats,
    pub legion: LegionStats,
    pub masters: BTreeMap<Master, u64>,
    pub syndicate: BTreeMap<String, SyndicateMemberStats>,
    pub blight: BlightStats,
    pub bestiary: BestiaryStats,
    pub incursion: IncursionStats,
    pub delve: DelveStats,
    pub metamorph_organs: BTreeMap<String, u64>,
    pub heist: HeistStats,
}

/// Rollup for one named area.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaStats {
    pub count: u64,
    pub gained: f64,
    pub kills: u64,
    pub deaths: u64,
    pub time: i64,
    pub profit_per_hour: f64,
}

/// Rollup for one area-type bucket, with its per-area breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaTypeStats {
    pub count: u64,
    pub gained: f64,
    pub kills: u64,
    pub deaths: u64,
    pub time: i64,
    pub profit_per_hour: f64,
    pub areas: BTreeMap<String, AreaStats>,
}

/// The full ephemeral rollup returned to the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub runs: u64,
    pub misc: MiscStats,
    pub loot: LootStats,
    pub areas: BTreeMap<AreaType, AreaTypeStats>,
    pub bosses: BossStats,
}

/// Fold runs and the league loot set into one [`Statistics`] value.
#[must_use]
pub fn aggregate(records: &[RunRecord], loot: &[LootItem], reference_price: f64) -> Statistics {
    let mut stats = Statistics {
        runs: records.len() as u64,
        ..Statistics::default()
    };

    for item in loot {
        stats.loot.count += 1;
        stats.loot.total_value += item.value;
    }
    stats.loot.reference_value = if reference_price > 0.0 {
        stats.loot.total_value / reference_price
    } else {
        0.0
    };

    for record in records {
        fold_misc(&mut stats.misc, record);
        fold_area(&mut stats.areas, record);
        fold_bosses(&mut stats.bosses, record);
    }

    stats
}

fn fold_misc(misc: &mut MiscStats, record: &RunRecord) {
    misc.experience_gained += record.experience_delta.unwrap_or(0);
    misc.kills += record.kill_count.unwrap_or(0);
    misc.deaths += u64::from(record.deaths);
    misc.abnormal_disconnects += u64::from(record.abnormal_disconnects);

    for shrine in &record.shrines {
        misc.shrines.total += 1;
        *misc.shrines.types.entry(shrine.clone()).or_insert(0) += 1;
    }

    if record.envoy_words > 0 {
        misc.envoy.encounters += 1;
        misc.envoy.words += u64::from(record.envoy_words);
    }
    if record.strange_voice {
        misc.strange_voice_encounters += 1;
    }

    if let Some(maven) = record.maven.as_ref() {
        // The Maven's own arenas, distinguished by the run's area name;
        // witnessed map bosses stay out of these counters.
        let defeated = maven
            .boss_kills
            .fights
            .iter()
            .any(|f| f.finished.is_some());
        match record.area.as_str() {
            MAVEN_CRUCIBLE => {
                misc.maven.crucible.started += 1;
                if defeated {
                    misc.maven.crucible.completed += 1;
                }
            }
            MAVEN_ARENA => {
                misc.maven.battle.started += 1;
                if defeated {
                    misc.maven.battle.completed += 1;
                }
            }
            _ => {}
        }
    }

    if let Some(waves) = record.delirium.as_ref() {
        if record.area_type == AreaType::Simulacrum {
            misc.simulacrum.encounters += 1;
            misc.simulacrum.waves += waves.len() as u64;
            let highest = waves.iter().map(|w| w.wave).max().unwrap_or(0);
            misc.simulacrum.highest_wave = misc.simulacrum.highest_wave.max(highest);
        }
    }

    if let Some(labyrinth) = record.labyrinth.as_ref() {
        misc.labyrinth.started += 1;
        misc.labyrinth.argus_kills += labyrinth.argus_kills.len() as u64;
        if labyrinth
            .boss_fights
            .iter()
            .any(|fight| fight.finished.is_some())
        {
            misc.labyrinth.completed += 1;
            let span = record.duration_seconds();
            misc.labyrinth.fastest =
                Some(misc.labyrinth.fastest.map_or(span, |f| f.min(span)));
        }
    } else if record.area_type == AreaType::Labyrinth {
        misc.labyrinth.started += 1;
    }

    if let Some(legion) = record.legion.as_ref() {
        misc.legion.encounters += legion.fights.len() as u64;
        misc.legion.kills += legion
            .fights
            .iter()
            .filter(|f| f.finished.is_some())
            .count() as u64;
    }

    for master in &record.masters {
        *misc.masters.entry(*master).or_insert(0) += 1;
    }

    if let Some(betrayal) = record.betrayal.as_ref() {
        for fight in &betrayal.fights {
            let member = misc
                .syndicate
                .entry(fight.npc.clone())
                .or_default();
            member.encounters += 1;
            if fight.action == "defeated" || fight.action == "killed" {
                member.defeated += 1;
            }
        }
    }

    if let Some(markers) = record.blight.as_ref() {
        if !markers.is_empty() {
            misc.blight.encounters += 1;
            misc.blight.total_lanes += markers.len() as u64;
        }
    }

    if let Some(beasts) = record.beasts.as_ref() {
        misc.bestiary.yellow_captured += u64::from(beasts.captured.yellow);
        misc.bestiary.red_captured += u64::from(beasts.captured.red);
        for craft in &beasts.crafted {
            misc.bestiary.crafted += 1;
            if let Some(span) = craft.duration_seconds() {
                misc.bestiary.fastest_craft =
                    Some(misc.bestiary.fastest_craft.map_or(span, |f| f.min(span)));
            }
        }
    }

    if let Some(incursion) = record.incursion.as_ref() {
        misc.incursion.unlocks += incursion.unlocks.len() as u64;
        for room in &incursion.rooms {
            *misc
                .incursion
                .rooms
                .entry(room.room_name.clone())
                .or_insert(0) += 1;
        }
    }

    if let Some(delve) = record.delve.as_ref() {
        misc.delve.runs += 1;
        misc.delve.sulphite_nodes += u64::from(delve.sulphite_nodes);
    }

    for (organ, count) in &record.metamorph_organs {
        *misc.metamorph_organs.entry(organ.clone()).or_insert(0) += u64::from(*count);
    }

    match record.area_type {
        AreaType::Heist => misc.heist.heists += 1,
        AreaType::GrandHeist => misc.heist.grand_heists += 1,
        _ => {}
    }
    for rogue in &record.heist_rogues {
        *misc.heist.rogues.entry(rogue.clone()).or_insert(0) += 1;
    }
}

fn fold_area(areas: &mut BTreeMap<AreaType, AreaTypeStats>, record: &RunRecord) {
    let gained = record.loot.total_value;
    let kills = record.kill_count.unwrap_or(0);
    let deaths = u64::from(record.deaths);
    let time = record.duration_seconds();

    let bucket = areas.entry(record.area_type).or_default();
    bucket.count += 1;
    bucket.gained += gained;
    bucket.kills += kills;
    bucket.deaths += deaths;
    bucket.time += time;
    bucket.profit_per_hour = profit_per_hour(bucket.gained, bucket.time);

    let area = bucket.areas.entry(record.area.clone()).or_default();
    area.count += 1;
    area.gained += gained;
    area.kills += kills;
    area.deaths += deaths;
    area.time += time;
    area.profit_per_hour = profit_per_hour(area.gained, area.time);
}

fn fold_bosses(bosses: &mut BossStats, record: &RunRecord) {
    let deaths = record.deaths;

    if let Some(shaper) = record.shaper.as_ref() {
        // A guardian fight's span is the Maven witness window around it,
        // falling back to the run's own endpoints for a missing edge.
        let witness_span = witness_window_seconds(record);
        for guardian in &shaper.guardians {
            let tally = bosses
                .shaper_guardians
                .entry(guardian.guardian.clone())
                .or_default();
            tally.count += 1;
            tally.deaths += u64::from(guardian.deaths);
            if let Some(span) = witness_span {
                tally.total_time += span;
                if span > 0 {
                    tally.fastest = Some(tally.fastest.map_or(span, |f| f.min(span)));
                }
            }
        }
        roll_category(
            &mut bosses.shaper,
            shaper.boss_fights.boss.as_deref(),
            &shaper.boss_fights.fights,
            deaths,
        );
    }

    if let Some(guardian) = record.elder_guardian.as_deref() {
        bosses
            .elder_guardians
            .entry(guardian.to_string())
            .or_default()
            .record(None, deaths);
    }
    if let Some(elder) = record.elder.as_ref() {
        roll_category(&mut bosses.elder, elder.boss.as_deref(), &elder.fights, deaths);
    }
    if let Some(conquerors) = record.conquerors.as_ref() {
        roll_category(
            &mut bosses.conquerors,
            conquerors.boss.as_deref(),
            &conquerors.fights,
            deaths,
        );
    }
    if let Some(sirus) = record.sirus.as_ref() {
        roll_category(&mut bosses.sirus, sirus.boss.as_deref(), &sirus.fights, deaths);
    }
    if let Some(maven) = record.maven.as_ref() {
        roll_category(
            &mut bosses.maven,
            maven.boss_kills.boss.as_deref(),
            &maven.boss_kills.fights,
            deaths,
        );
    }
    if let Some(synthesis) = record.synthesis.as_ref() {
        roll_category(
            &mut bosses.synthesis,
            synthesis.boss.as_deref(),
            &synthesis.fights,
            deaths,
        );
    }
    if let Some(legion) = record.legion.as_ref() {
        // Legion runs meet several generals; tally each fight under its
        // own label rather than the last general seen.
        for fight in &legion.fights {
            let name = fight.label.as_deref().unwrap_or("Unknown");
            bosses.legion.entry(name.to_string()).or_default().count += 1;
        }
    }
    if let Some(betrayal) = record.betrayal.as_ref() {
        roll_category(
            &mut bosses.betrayal,
            betrayal.boss.as_deref(),
            &betrayal.boss_fights,
            deaths,
        );
    }
    if let Some(harvest) = record.harvest.as_ref() {
        roll_category(&mut bosses.harvest, harvest.boss.as_deref(), &harvest.fights, deaths);
    }
}

/// Fold one run's interval list for a boss category into its tally.
///
/// The encounter span runs from the category's first `started` to its last
/// `finished` within the run.
fn roll_category(
    tallies: &mut BTreeMap<String, BossTally>,
    boss: Option<&str>,
    intervals: &[EncounterInterval],
    run_deaths: u32,
) {
    if intervals.is_empty() {
        return;
    }
    let name = boss.unwrap_or("Unknown").to_string();
    tallies
        .entry(name)
        .or_default()
        .record(category_span(intervals), run_deaths);
}

/// Seconds between the first witness marker opening and the last one
/// closing, using the run's endpoints when a marker lacks one side.
fn witness_window_seconds(record: &RunRecord) -> Option<i64> {
    let witnesses = &record.maven.as_ref()?.witnesses;
    let first = witnesses.first()?;
    let last = witnesses.last()?;
    let opened = first.started.unwrap_or(record.first_event);
    let closed = last.finished.unwrap_or(record.last_event);
    Some(closed.signed_duration_since(opened).num_seconds().max(0))
}

fn category_span(intervals: &[EncounterInterval]) -> Option<i64> {
    let started: Option<NaiveDateTime> = intervals.iter().filter_map(|i| i.started).min();
    let finished: Option<NaiveDateTime> = intervals.iter().filter_map(|i| i.finished).max();
    match (started, finished) {
        (Some(started), Some(finished)) => {
            Some(finished.signed_duration_since(started).num_seconds().max(0))
        }
        _ => None,
    }
}
