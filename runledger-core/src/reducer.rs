//! The per-run event reducer.
//!
//! [`RunAccumulator`] is the mutable arena a run is folded into, one
//! [`EncounterEvent`] at a time. Reduction is pure with respect to its
//! inputs: same events in, same accumulator out. Sub-accumulators are
//! created lazily on the first event of their mechanic, so an untouched
//! mechanic stays `None` in the frozen record.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::dialogue::{DialogueCue, Master};
use crate::event::{BeastColor, EncounterEvent, PairAction};
use crate::interval::{EncounterInterval, IntervalLog};

/// Captured beast tallies keyed by color.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeastCaptures {
    pub yellow: u32,
    pub red: u32,
}

/// Bestiary state: captures plus crafting windows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BeastAcc {
    pub captured: BeastCaptures,
    pub crafted: IntervalLog,
}

/// One syndicate member fight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberFight {
    pub npc: String,
    pub action: String,
    pub timestamp: NaiveDateTime,
}

/// Betrayal state: member fights plus the Catarina fight windows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BetrayalAcc {
    pub fights: Vec<MemberFight>,
    pub boss: Option<String>,
    pub boss_fights: IntervalLog,
}

/// One blight lane/encounter marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlightMarker {
    pub action: String,
    pub timestamp: NaiveDateTime,
}

/// One simulacrum wave marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveMarker {
    pub wave: u32,
    pub started: NaiveDateTime,
}

/// Generic paired boss-fight state shared by several mechanics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BossFightAcc {
    pub boss: Option<String>,
    pub fights: IntervalLog,
}

impl BossFightAcc {
    fn open(&mut self, boss: String, started: NaiveDateTime, phase: Option<u32>) {
        self.boss = Some(boss.clone());
        self.fights.push_start(
            EncounterInterval::opened(started)
                .with_label(boss)
                .with_phase(phase),
        );
    }

    fn close(&mut self, finished: NaiveDateTime) {
        self.fights.close_last_open(finished);
    }

    fn kill(&mut self, boss: String, finished: NaiveDateTime) {
        self.boss = Some(boss.clone());
        self.fights
            .push_terminal(EncounterInterval::finished_only(finished).with_label(boss));
    }
}

/// One temple room entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TempleRoom {
    pub room_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub timestamp: NaiveDateTime,
}

/// Incursion state: unlock windows plus temple room entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncursionAcc {
    pub unlocks: IntervalLog,
    pub rooms: Vec<TempleRoom>,
}

/// Labyrinth state: Argus kills plus Izaro phase windows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabyrinthAcc {
    pub argus_kills: Vec<NaiveDateTime>,
    pub boss_fights: IntervalLog,
}

/// One shaper guardian arena entry, time-correlated with maven witnesses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardianEntry {
    pub guardian: String,
    pub started: NaiveDateTime,
    #[serde(default)]
    pub deaths: u32,
}

/// Shaper state: guardian entries plus the Shaper fight windows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShaperAcc {
    pub guardians: Vec<GuardianEntry>,
    pub boss_fights: BossFightAcc,
}

/// Maven state: positional witness markers plus terminal boss kills.
///
/// Witness markers are reconciled by position, not by pairing: each event
/// appends either a started-only or a finished-only entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MavenAcc {
    pub witnesses: Vec<EncounterInterval>,
    pub boss_kills: BossFightAcc,
}

impl MavenAcc {
    /// Whether the most recent witness marker opened and was never answered.
    #[must_use]
    pub fn witness_open(&self) -> bool {
        self.witnesses.last().is_some_and(EncounterInterval::is_open)
    }
}

/// Delve state driven by Niko's dialogue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelveAcc {
    pub niko: bool,
    pub sulphite_nodes: u32,
}

/// The mutable per-run arena every event is folded into.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunAccumulator {
    pub beasts: Option<BeastAcc>,
    pub betrayal: Option<BetrayalAcc>,
    pub blight: Option<Vec<BlightMarker>>,
    pub conquerors: Option<BossFightAcc>,
    pub delirium: Option<Vec<WaveMarker>>,
    pub elder: Option<BossFightAcc>,
    pub harvest: Option<BossFightAcc>,
    pub incursion: Option<IncursionAcc>,
    pub labyrinth: Option<LabyrinthAcc>,
    pub legion: Option<BossFightAcc>,
    pub maven: Option<MavenAcc>,
    pub shaper: Option<ShaperAcc>,
    pub shrines: Vec<String>,
    pub sirus: Option<BossFightAcc>,
    pub synthesis: Option<BossFightAcc>,

    // Dialogue-driven state.
    pub envoy_words: u32,
    pub strange_voice: bool,
    pub delve: Option<DelveAcc>,
    pub masters: BTreeMap<Master, bool>,
    pub heist_rogues: BTreeSet<String>,
}

impl RunAccumulator {
    /// Fold one encounter event into the accumulator.
    ///
    /// Unrecognized pairs and synthesis no-ops leave the accumulator
    /// structurally unchanged.
    pub fn apply(&mut self, timestamp: NaiveDateTime, event: EncounterEvent) {
        match event {
            EncounterEvent::BeastCapture { color } => {
                let beasts = self.beasts.get_or_insert_default();
                match color {
                    BeastColor::Yellow => beasts.captured.yellow += 1,
                    BeastColor::Red => beasts.captured.red += 1,
                }
            }
            EncounterEvent::BeastCraft { action } => {
                let beasts = self.beasts.get_or_insert_default();
                match action {
                    PairAction::Start => beasts
                        .crafted
                        .push_start(EncounterInterval::opened(timestamp)),
                    PairAction::Finish => beasts.crafted.close_last_open(timestamp),
                }
            }
            EncounterEvent::BetrayalFight { npc, action } => {
                self.betrayal.get_or_insert_default().fights.push(MemberFight {
                    npc,
                    action,
                    timestamp,
                });
            }
            EncounterEvent::BetrayalBoss { boss, action, phase } => {
                let betrayal = self.betrayal.get_or_insert_default();
                match action {
                    PairAction::Start => {
                        betrayal.boss = Some(boss.clone());
                        betrayal.boss_fights.push_start(
                            EncounterInterval::opened(timestamp)
                                .with_label(boss)
                                .with_phase(phase),
                        );
                    }
                    PairAction::Finish => betrayal.boss_fights.close_last_open(timestamp),
                }
            }
            EncounterEvent::BlightEvent { action } => {
                self.blight.get_or_insert_default().push(BlightMarker {
                    action,
                    timestamp,
                });
            }
            EncounterEvent::ConquerorBoss { boss, action, stones } => {
                let conquerors = self.conquerors.get_or_insert_default();
                match action {
                    PairAction::Start => {
                        conquerors.boss = Some(boss.clone());
                        let mut interval =
                            EncounterInterval::opened(timestamp).with_label(boss);
                        interval.stones = stones;
                        conquerors.fights.push_start(interval);
                    }
                    PairAction::Finish => conquerors.close(timestamp),
                }
            }
            EncounterEvent::DeliriumWave { wave } => {
                self.delirium.get_or_insert_default().push(WaveMarker {
                    wave,
                    started: timestamp,
                });
            }
            EncounterEvent::ElderBossKill { boss } => {
                self.elder.get_or_insert_default().kill(boss, timestamp);
            }
            EncounterEvent::HarvestBoss { boss, action } => {
                let harvest = self.harvest.get_or_insert_default();
                match action {
                    PairAction::Start => harvest.open(boss, timestamp, None),
                    PairAction::Finish => harvest.close(timestamp),
                }
            }
            EncounterEvent::IncursionUnlock { action } => {
                let incursion = self.incursion.get_or_insert_default();
                match action {
                    PairAction::Start => incursion
                        .unlocks
                        .push_start(EncounterInterval::opened(timestamp)),
                    PairAction::Finish => incursion.unlocks.close_last_open(timestamp),
                }
            }
            EncounterEvent::IncursionRoom { room_name, room_id } => {
                self.incursion.get_or_insert_default().rooms.push(TempleRoom {
                    room_name,
                    room_id,
                    timestamp,
                });
            }
            EncounterEvent::LabyrinthArgusKill => {
                self.labyrinth
                    .get_or_insert_default()
                    .argus_kills
                    .push(timestamp);
            }
            EncounterEvent::LabyrinthBoss { action, phase } => {
                let labyrinth = self.labyrinth.get_or_insert_default();
                match action {
                    PairAction::Start => labyrinth
                        .boss_fights
                        .push_start(EncounterInterval::opened(timestamp).with_phase(phase)),
                    PairAction::Finish => labyrinth.boss_fights.close_last_open(timestamp),
                }
            }
            EncounterEvent::LegionBossKill { boss } => {
                self.legion.get_or_insert_default().kill(boss, timestamp);
            }
            EncounterEvent::MavenWitness { action } => {
                let maven = self.maven.get_or_insert_default();
                let marker = match action {
                    PairAction::Start => EncounterInterval::opened(timestamp),
                    PairAction::Finish => EncounterInterval::finished_only(timestamp),
                };
                maven.witnesses.push(marker);
            }
            EncounterEvent::MavenBossKill { boss } => {
                self.maven
                    .get_or_insert_default()
                    .boss_kills
                    .kill(boss, timestamp);
            }
            EncounterEvent::ShaperGuardian { guardian } => {
                self.shaper.get_or_insert_default().guardians.push(GuardianEntry {
                    guardian,
                    started: timestamp,
                    deaths: 0,
                });
            }
            EncounterEvent::ShaperBoss { enemy, action, phase } => {
                let shaper = self.shaper.get_or_insert_default();
                match action {
                    PairAction::Start => shaper.boss_fights.open(enemy, timestamp, phase),
                    PairAction::Finish => shaper.boss_fights.close(timestamp),
                }
            }
            EncounterEvent::ShrineActivation { name } => {
                self.shrines.push(name);
            }
            EncounterEvent::SirusBoss { boss, action, phase } => {
                let sirus = self.sirus.get_or_insert_default();
                match action {
                    PairAction::Start => sirus.open(boss, timestamp, phase),
                    PairAction::Finish => sirus.close(timestamp),
                }
            }
            EncounterEvent::SynthesisBoss { enemy, action } => {
                let synthesis = self.synthesis.get_or_insert_default();
                match action {
                    PairAction::Start => synthesis.open(enemy, timestamp, None),
                    PairAction::Finish => synthesis.close(timestamp),
                }
            }
            EncounterEvent::SynthesisNoop | EncounterEvent::Unrecognized { .. } => {}
        }
    }

    /// Parse and fold one raw JSON payload; malformed payloads are skipped
    /// with a warning and never abort the fold.
    ///
    /// Returns `true` when the payload contributed an event.
    pub fn apply_payload(&mut self, timestamp: NaiveDateTime, text: &str) -> bool {
        match EncounterEvent::parse(text) {
            Ok(event) => {
                self.apply(timestamp, event);
                true
            }
            Err(error) => {
                warn!("skipping malformed event payload at {timestamp}: {error}");
                false
            }
        }
    }

    /// Fold one dialogue cue into the accumulator.
    pub fn apply_dialogue(&mut self, cue: DialogueCue) {
        match cue {
            DialogueCue::EnvoyWords(words) => self.envoy_words += words,
            DialogueCue::StrangeVoice => self.strange_voice = true,
            DialogueCue::NikoSulphite => {
                let delve = self.delve.get_or_insert_default();
                delve.niko = true;
                delve.sulphite_nodes += 1;
                self.masters.entry(Master::Niko).or_insert(false);
            }
            DialogueCue::MasterPresent(master) => {
                self.masters.entry(master).or_insert(false);
            }
            DialogueCue::RoguePresent(rogue) => {
                self.heist_rogues.insert(rogue);
            }
        }
    }

    /// Record a player death while a tracked encounter is open.
    ///
    /// Every boss fight with an open interval gets its own death counter
    /// bumped; a death during an open maven witness is additionally credited
    /// to the most recent guardian entry. The run-level counter is maintained
    /// by the record builder.
    pub fn record_death(&mut self) {
        for log in self.open_fight_logs() {
            if let Some(open) = log.last_open_mut() {
                open.deaths += 1;
            }
        }

        let witnessed = self.maven.as_ref().is_some_and(MavenAcc::witness_open);
        if witnessed {
            if let Some(shaper) = self.shaper.as_mut() {
                if let Some(guardian) = shaper.guardians.last_mut() {
                    guardian.deaths += 1;
                }
            }
        }
    }

    fn open_fight_logs(&mut self) -> impl Iterator<Item = &mut IntervalLog> {
        let fights = [
            self.betrayal.as_mut().map(|b| &mut b.boss_fights),
            self.conquerors.as_mut().map(|c| &mut c.fights),
            self.harvest.as_mut().map(|h| &mut h.fights),
            self.labyrinth.as_mut().map(|l| &mut l.boss_fights),
            self.shaper.as_mut().map(|s| &mut s.boss_fights.fights),
            self.sirus.as_mut().map(|s| &mut s.fights),
            self.synthesis.as_mut().map(|s| &mut s.fights),
        ];
        fights.into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(seconds: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .expect("valid date")
            .and_hms_opt(10, 0, 0)
            .expect("valid time")
            + chrono::Duration::seconds(i64::from(seconds))
    }

    fn start_finish(category: &str, kind: &str) -> (String, String) {
        (
            format!(r#"{{"category":"{category}","type":"{kind}","npc":"Boss","arguments":{{"action":"start"}}}}"#),
            format!(r#"{{"category":"{category}","type":"{kind}","npc":"Boss","arguments":{{"action":"finish"}}}}"#),
        )
    }

    #[test]
    fn paired_fight_produces_single_closed_interval() {
        let mut acc = RunAccumulator::default();
        let (start, finish) = start_finish("Sirus", "BossFight");
        assert!(acc.apply_payload(ts(0), &start));
        assert!(acc.apply_payload(ts(90), &finish));

        let sirus = acc.sirus.expect("sirus accumulator");
        assert_eq!(sirus.fights.len(), 1);
        assert_eq!(sirus.fights.intervals()[0].duration_seconds(), Some(90));
    }

    #[test]
    fn unrecognized_event_leaves_accumulator_untouched() {
        let mut acc = RunAccumulator::default();
        acc.apply(
            ts(1),
            EncounterEvent::ShrineActivation {
                name: "Acceleration Shrine".to_string(),
            },
        );
        let before = acc.clone();

        acc.apply(
            ts(2),
            EncounterEvent::Unrecognized {
                category: "Ritual".to_string(),
                kind: "Altar".to_string(),
            },
        );
        assert_eq!(acc, before);
    }

    #[test]
    fn malformed_payload_is_skipped_and_fold_continues() {
        let mut acc = RunAccumulator::default();
        assert!(!acc.apply_payload(ts(1), "{broken"));
        assert!(acc.apply_payload(
            ts(2),
            r#"{"category":"Shrines","type":"Activation","arguments":{"name":"Echoing Shrine"}}"#,
        ));
        assert_eq!(acc.shrines, vec!["Echoing Shrine".to_string()]);
    }

    #[test]
    fn beast_captures_count_by_color() {
        let mut acc = RunAccumulator::default();
        for color in ["yellow", "red", "red"] {
            let payload = format!(
                r#"{{"category":"Beasts","type":"Capture","arguments":{{"beastType":"{color}"}}}}"#
            );
            acc.apply_payload(ts(3), &payload);
        }
        let captured = acc.beasts.expect("beasts").captured;
        assert_eq!(captured, BeastCaptures { yellow: 1, red: 2 });
    }

    #[test]
    fn death_during_witnessed_guardian_fight_credits_guardian() {
        let mut acc = RunAccumulator::default();
        acc.apply(
            ts(0),
            EncounterEvent::ShaperGuardian {
                guardian: "The Minotaur".to_string(),
            },
        );
        acc.apply(
            ts(1),
            EncounterEvent::MavenWitness {
                action: PairAction::Start,
            },
        );
        acc.record_death();

        let shaper = acc.shaper.as_ref().expect("shaper");
        assert_eq!(shaper.guardians[0].deaths, 1);

        // After the witness resolves, further deaths are not credited.
        acc.apply(
            ts(2),
            EncounterEvent::MavenWitness {
                action: PairAction::Finish,
            },
        );
        acc.record_death();
        assert_eq!(acc.shaper.as_ref().expect("shaper").guardians[0].deaths, 1);
    }

    #[test]
    fn death_during_open_boss_interval_is_credited_to_it() {
        let mut acc = RunAccumulator::default();
        let (start, finish) = start_finish("Sirus", "BossFight");
        acc.apply_payload(ts(0), &start);
        acc.record_death();
        acc.apply_payload(ts(60), &finish);
        acc.record_death();

        let sirus = acc.sirus.expect("sirus");
        assert_eq!(sirus.fights.intervals()[0].deaths, 1);
    }

    #[test]
    fn conqueror_interval_carries_stones() {
        let mut acc = RunAccumulator::default();
        let start = r#"{"category":"Conquerors","type":"BossFight","npc":"Baran, the Crusader","arguments":{"action":"start","stones":3}}"#;
        acc.apply_payload(ts(0), start);
        let conquerors = acc.conquerors.expect("conquerors");
        assert_eq!(conquerors.fights.intervals()[0].stones, Some(3));
        assert_eq!(conquerors.boss.as_deref(), Some("Baran, the Crusader"));
    }
}
