//! Raw log events and the closed encounter-event vocabulary.
//!
//! A client log yields two shapes of event: simple tagged lines (`entered`,
//! `slain`, ...) and JSON payloads carrying a `(category, type)` pair plus
//! loosely-typed arguments. The payloads are normalized here into
//! [`EncounterEvent`], a closed union where unknown pairs become an explicit
//! [`EncounterEvent::Unrecognized`] variant instead of a silent lookup miss.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One raw event as stored in the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub timestamp: NaiveDateTime,
    pub kind: EventKind,
    /// Area name for `entered`, JSON payload or NPC dialogue for `note`.
    pub text: String,
    /// Instance server identifier, present on `entered` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

impl RawEvent {
    /// Convenience constructor for serverless events.
    #[must_use]
    pub fn new(timestamp: NaiveDateTime, kind: EventKind, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            kind,
            text: text.into(),
            server: None,
        }
    }
}

/// Simple event tags written by the log ingestion layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// Player entered an area; `text` is the area name.
    Entered,
    /// Player died.
    Slain,
    /// A new area instance was generated.
    GeneratedArea,
    /// Connection dropped without a clean logout.
    AbnormalDisconnect,
    /// Everything else: encounter JSON payloads and NPC dialogue lines.
    Note,
}

/// Failure to interpret a JSON event payload.
#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("event payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("event payload is not a JSON object")]
    NotAnObject,
}

/// Wire shape of an encounter payload before normalization.
#[derive(Debug, Clone, Deserialize)]
struct EncounterPayload {
    category: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    npc: Option<String>,
    #[serde(default)]
    arguments: PayloadArguments,
}

/// Loosely-typed argument bag carried by encounter payloads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayloadArguments {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    phase: Option<u32>,
    #[serde(default)]
    stones: Option<u32>,
    #[serde(default)]
    enemy: Option<String>,
    #[serde(default)]
    beast_type: Option<String>,
    #[serde(default)]
    wave: Option<u32>,
    #[serde(default)]
    room_name: Option<String>,
    #[serde(default)]
    room_id: Option<serde_json::Value>,
    #[serde(default)]
    name: Option<String>,
}

/// Start/finish marker for paired encounter events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairAction {
    Start,
    Finish,
}

/// Captured beast classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeastColor {
    Yellow,
    Red,
}

impl BeastColor {
    fn from_str(value: &str) -> Option<Self> {
        match value {
            "yellow" => Some(Self::Yellow),
            "red" => Some(Self::Red),
            _ => None,
        }
    }
}

/// The closed vocabulary of `(category, type)` encounter events.
///
/// Every known pair maps to exactly one variant; anything else is preserved
/// as [`EncounterEvent::Unrecognized`], which reducers treat as a structural
/// no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum EncounterEvent {
    /// `Beasts/Capture` — counter keyed by beast color.
    BeastCapture { color: BeastColor },
    /// `Beasts/Craft` — paired start/finish.
    BeastCraft { action: PairAction },
    /// `Betrayal/Fight` — append-only member fight record.
    BetrayalFight { npc: String, action: String },
    /// `Betrayal/BossFight` — paired, phase-tagged.
    BetrayalBoss {
        boss: String,
        action: PairAction,
        phase: Option<u32>,
    },
    /// `Blight/Event` — append-only lane/encounter marker.
    BlightEvent { action: String },
    /// `Conquerors/BossFight` — paired, carries a watchstone count.
    ConquerorBoss {
        boss: String,
        action: PairAction,
        stones: Option<u32>,
    },
    /// `Delirium/Wave` — append-only simulacrum wave marker.
    DeliriumWave { wave: u32 },
    /// `Elder/BossFight` — single terminal kill event.
    ElderBossKill { boss: String },
    /// `Harvest/BossFight` — paired.
    HarvestBoss { boss: String, action: PairAction },
    /// `Incursion/Unlock` — paired room-unlock window.
    IncursionUnlock { action: PairAction },
    /// `Incursion/TempleRoom` — append-only temple room entry.
    IncursionRoom {
        room_name: String,
        room_id: Option<String>,
    },
    /// `Labyrinth/Run` — Argus kills are terminal, boss phases are paired.
    LabyrinthArgusKill,
    /// `Labyrinth/Run` with a phase payload.
    LabyrinthBoss {
        action: PairAction,
        phase: Option<u32>,
    },
    /// `Legion/BossFight` — single terminal kill event, no start marker.
    LegionBossKill { boss: String },
    /// `Maven/Witness` — positional started/finished markers.
    MavenWitness { action: PairAction },
    /// `Maven/BossFight` — single terminal kill event.
    MavenBossKill { boss: String },
    /// `Shaper/Guardian` — append-only guardian arena entry.
    ShaperGuardian { guardian: String },
    /// `Shaper/BossFight` — paired; `started` and `phaseStarted` both open.
    ShaperBoss {
        enemy: String,
        action: PairAction,
        phase: Option<u32>,
    },
    /// `Shrines/Activation` — append shrine name.
    ShrineActivation { name: String },
    /// `Sirus/BossFight` — paired, phase-tagged.
    SirusBoss {
        boss: String,
        action: PairAction,
        phase: Option<u32>,
    },
    /// `Synthesis/BossFight` — paired; an `unknown` action is a no-op.
    SynthesisBoss { enemy: String, action: PairAction },
    /// `Synthesis/BossFight` with `action: "unknown"`.
    SynthesisNoop,
    /// Known payload shape, unknown `(category, type)` pair.
    Unrecognized { category: String, kind: String },
}

impl EncounterEvent {
    /// Parse a raw JSON payload into the closed union.
    ///
    /// # Errors
    ///
    /// Returns [`EventParseError`] when the text is not a JSON object. A
    /// syntactically valid payload with an unknown pair is not an error; it
    /// becomes [`EncounterEvent::Unrecognized`].
    pub fn parse(text: &str) -> Result<Self, EventParseError> {
        let payload: EncounterPayload = serde_json::from_str(text)?;
        Ok(Self::from_payload(payload))
    }

    /// Whether a raw note line looks like an encounter payload.
    #[must_use]
    pub fn looks_like_payload(text: &str) -> bool {
        text.trim_start().starts_with('{')
    }

    fn from_payload(payload: EncounterPayload) -> Self {
        let EncounterPayload {
            category,
            kind,
            npc,
            arguments,
        } = payload;
        let npc_name = || npc.clone().unwrap_or_else(|| "Unknown".to_string());
        let action = arguments.action.as_deref();

        match (category.as_str(), kind.as_str()) {
            ("Beasts", "Capture") => {
                match arguments.beast_type.as_deref().and_then(BeastColor::from_str) {
                    Some(color) => Self::BeastCapture { color },
                    None => Self::Unrecognized { category, kind },
                }
            }
            ("Beasts", "Craft") => Self::BeastCraft {
                action: pair_action(action),
            },
            ("Betrayal", "Fight") => Self::BetrayalFight {
                npc: arguments.target.unwrap_or_else(|| "Unknown".to_string()),
                action: arguments.action.unwrap_or_default(),
            },
            ("Betrayal", "BossFight") => Self::BetrayalBoss {
                boss: npc_name(),
                action: pair_action(action),
                phase: arguments.phase,
            },
            ("Blight", "Event") => Self::BlightEvent {
                action: arguments.action.unwrap_or_default(),
            },
            ("Conquerors", "BossFight") => Self::ConquerorBoss {
                boss: npc_name(),
                action: pair_action(action),
                stones: arguments.stones,
            },
            ("Delirium", "Wave") => Self::DeliriumWave {
                wave: arguments.wave.unwrap_or(0),
            },
            ("Elder", "BossFight") => Self::ElderBossKill { boss: npc_name() },
            ("Harvest", "BossFight") => Self::HarvestBoss {
                boss: npc_name(),
                action: pair_action(action),
            },
            ("Incursion", "Unlock") => Self::IncursionUnlock {
                action: pair_action(action),
            },
            ("Incursion", "TempleRoom") => Self::IncursionRoom {
                room_name: arguments.room_name.unwrap_or_else(|| "Unknown".to_string()),
                room_id: arguments.room_id.map(json_value_to_string),
            },
            ("Labyrinth", "Run") => {
                if arguments.target.as_deref() == Some("Argus") {
                    Self::LabyrinthArgusKill
                } else {
                    Self::LabyrinthBoss {
                        action: pair_action(action),
                        phase: arguments.phase,
                    }
                }
            }
            ("Legion", "BossFight") => Self::LegionBossKill { boss: npc_name() },
            ("Maven", "Witness") => Self::MavenWitness {
                action: pair_action(action),
            },
            ("Maven", "BossFight") => Self::MavenBossKill { boss: npc_name() },
            ("Shaper", "Guardian") => Self::ShaperGuardian {
                guardian: arguments.enemy.unwrap_or_else(|| "Unknown".to_string()),
            },
            ("Shaper", "BossFight") => Self::ShaperBoss {
                enemy: arguments.enemy.clone().unwrap_or_else(npc_name),
                // The shaper fight signals its opening with either tag.
                action: if matches!(action, Some("started" | "phaseStarted" | "start")) {
                    PairAction::Start
                } else {
                    PairAction::Finish
                },
                phase: arguments.phase,
            },
            ("Shrines", "Activation") => Self::ShrineActivation {
                name: arguments.name.unwrap_or_else(|| "Unknown".to_string()),
            },
            ("Sirus", "BossFight") => Self::SirusBoss {
                boss: npc_name(),
                action: pair_action(action),
                phase: arguments.phase,
            },
            ("Synthesis", "BossFight") => match action {
                Some("unknown") => Self::SynthesisNoop,
                _ => Self::SynthesisBoss {
                    enemy: arguments.enemy.clone().unwrap_or_else(npc_name),
                    action: pair_action(action),
                },
            },
            _ => Self::Unrecognized { category, kind },
        }
    }
}

fn pair_action(action: Option<&str>) -> PairAction {
    if action == Some("start") {
        PairAction::Start
    } else {
        PairAction::Finish
    }
}

fn json_value_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_paired_boss_fight() {
        let text = r#"{"category":"Sirus","type":"BossFight","npc":"Sirus, Awakener of Worlds","arguments":{"action":"start","phase":2}}"#;
        let event = EncounterEvent::parse(text).expect("valid payload");
        assert_eq!(
            event,
            EncounterEvent::SirusBoss {
                boss: "Sirus, Awakener of Worlds".to_string(),
                action: PairAction::Start,
                phase: Some(2),
            }
        );
    }

    #[test]
    fn shaper_opens_on_either_start_tag() {
        for tag in ["started", "phaseStarted"] {
            let text = format!(
                r#"{{"category":"Shaper","type":"BossFight","arguments":{{"action":"{tag}","enemy":"The Shaper"}}}}"#
            );
            let event = EncounterEvent::parse(&text).expect("valid payload");
            assert!(matches!(
                event,
                EncounterEvent::ShaperBoss {
                    action: PairAction::Start,
                    ..
                }
            ));
        }
    }

    #[test]
    fn synthesis_unknown_action_is_noop() {
        let text = r#"{"category":"Synthesis","type":"BossFight","arguments":{"action":"unknown"}}"#;
        assert_eq!(
            EncounterEvent::parse(text).expect("valid payload"),
            EncounterEvent::SynthesisNoop
        );
    }

    #[test]
    fn unknown_pair_is_typed_not_an_error() {
        let text = r#"{"category":"Ritual","type":"Altar","arguments":{}}"#;
        assert_eq!(
            EncounterEvent::parse(text).expect("valid payload"),
            EncounterEvent::Unrecognized {
                category: "Ritual".to_string(),
                kind: "Altar".to_string(),
            }
        );
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(EncounterEvent::parse("{not json").is_err());
    }

    #[test]
    fn argus_kill_is_distinguished_from_lab_boss_phases() {
        let argus = r#"{"category":"Labyrinth","type":"Run","arguments":{"target":"Argus"}}"#;
        assert_eq!(
            EncounterEvent::parse(argus).expect("valid payload"),
            EncounterEvent::LabyrinthArgusKill
        );

        let boss = r#"{"category":"Labyrinth","type":"Run","arguments":{"action":"start","phase":1}}"#;
        assert_eq!(
            EncounterEvent::parse(boss).expect("valid payload"),
            EncounterEvent::LabyrinthBoss {
                action: PairAction::Start,
                phase: Some(1),
            }
        );
    }
}
