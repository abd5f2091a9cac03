//! Run-boundary detection over `entered` events.
//!
//! [`BoundaryDetector`] is a small state machine fed every area entry in
//! order. It decides when the in-progress run has ended and at which
//! timestamp, without ever loading the run's events itself. Session-scoped
//! context, such as the most recently generated area instance, lives in an
//! explicit [`SessionContext`] value rather than in shared mutable state.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::areas::{self, ABYSSAL_DEPTHS, DELVE_MINE};

/// One observed area entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaVisit {
    pub area: String,
    /// Instance server identifier; absent when replaying from the catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    pub timestamp: NaiveDateTime,
}

impl AreaVisit {
    #[must_use]
    pub fn new(area: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            area: area.into(),
            server: None,
            timestamp,
        }
    }

    #[must_use]
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }
}

/// Session-scoped tracking context, reset whenever a run finalizes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    latest_generated: Option<AreaVisit>,
}

impl SessionContext {
    /// Record a `generatedArea` observation.
    pub fn record_generated(&mut self, visit: AreaVisit) {
        self.latest_generated = Some(visit);
    }

    /// The most recently generated area instance, if any.
    #[must_use]
    pub fn latest_generated(&self) -> Option<&AreaVisit> {
        self.latest_generated.as_ref()
    }

    /// Clear session state after a run finalizes.
    pub fn reset(&mut self) {
        self.latest_generated = None;
    }
}

/// Why an area entry did not end the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SuppressReason {
    /// Moving between labyrinth floors.
    LabyrinthToLabyrinth,
    /// Stepping into a Vaal side area inside the map.
    VaalSideArea,
    /// Descending into the Abyssal Depths.
    AbyssalDepths,
    /// Bouncing between delve mine instances.
    DelveMine,
    /// A labyrinth trial inside the current area.
    LabTrial,
}

/// Detector position between observations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorState {
    NoActiveRun,
    InMap,
    InTown,
    Suppressed(SuppressReason),
}

/// Outcome of feeding one area entry to the detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryDecision {
    /// Nothing eligible to finalize yet; retry on the next event.
    NotReady,
    /// The entry stays inside the current run.
    Suppressed(SuppressReason),
    /// The current run ended; finalize it at this timestamp.
    Finalize { at: NaiveDateTime },
}

/// State machine deciding where one run ends and the next begins.
#[derive(Debug, Clone, Default)]
pub struct BoundaryDetector {
    state: Option<DetectorState>,
    /// First non-town area of the unresolved tail.
    run_start: Option<AreaVisit>,
}

impl BoundaryDetector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current detector state.
    #[must_use]
    pub fn state(&self) -> &DetectorState {
        self.state.as_ref().unwrap_or(&DetectorState::NoActiveRun)
    }

    /// The area entry the in-progress run started with, if one exists.
    #[must_use]
    pub fn run_start(&self) -> Option<&AreaVisit> {
        self.run_start.as_ref()
    }

    /// Observe one `entered` event.
    ///
    /// `live` marks events arriving from an active client session, where the
    /// server identifier is trustworthy; catalog replays pass `false`.
    pub fn observe(&mut self, visit: &AreaVisit, live: bool) -> BoundaryDecision {
        let Some(start) = self.run_start.clone() else {
            return self.begin_tail(visit);
        };

        if let Some(reason) = suppress_reason(&start.area, &visit.area) {
            self.state = Some(DetectorState::Suppressed(reason));
            return BoundaryDecision::Suppressed(reason);
        }

        if visit.area == start.area {
            // Same instance: a reconnect or a portal back into the map.
            // A live entry with a different server is a fresh instance and
            // does end the run.
            let same_instance = !live || visit.server == start.server;
            if same_instance {
                self.state = Some(DetectorState::InMap);
                return BoundaryDecision::NotReady;
            }
        }

        let at = visit.timestamp;
        self.reset();
        self.begin_tail(visit);
        BoundaryDecision::Finalize { at }
    }

    /// Drop all detector state, as after an operator-forced finalize.
    pub fn reset(&mut self) {
        self.state = None;
        self.run_start = None;
    }

    fn begin_tail(&mut self, visit: &AreaVisit) -> BoundaryDecision {
        if areas::is_town(&visit.area) {
            self.state = Some(DetectorState::InTown);
        } else {
            self.state = Some(DetectorState::InMap);
            self.run_start = Some(visit.clone());
        }
        BoundaryDecision::NotReady
    }
}

fn suppress_reason(run_area: &str, entered: &str) -> Option<SuppressReason> {
    if areas::is_lab_area(run_area) && areas::is_lab_area(entered) {
        return Some(SuppressReason::LabyrinthToLabyrinth);
    }
    if areas::is_vaal_side_area(entered) {
        return Some(SuppressReason::VaalSideArea);
    }
    if entered == ABYSSAL_DEPTHS {
        return Some(SuppressReason::AbyssalDepths);
    }
    if run_area == DELVE_MINE && entered == DELVE_MINE {
        return Some(SuppressReason::DelveMine);
    }
    if areas::is_lab_trial(entered) {
        return Some(SuppressReason::LabTrial);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(minutes: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 2)
            .expect("valid date")
            .and_hms_opt(9, minutes, 0)
            .expect("valid time")
    }

    #[test]
    fn town_map_town_finalizes_at_second_town() {
        let mut detector = BoundaryDetector::new();
        assert_eq!(
            detector.observe(&AreaVisit::new("Lioneye's Watch", ts(0)), false),
            BoundaryDecision::NotReady
        );
        assert_eq!(
            detector.observe(&AreaVisit::new("Strand", ts(1)), false),
            BoundaryDecision::NotReady
        );
        assert_eq!(
            detector.observe(&AreaVisit::new("Lioneye's Watch", ts(10)), false),
            BoundaryDecision::Finalize { at: ts(10) }
        );
        assert_eq!(detector.run_start(), None);
    }

    #[test]
    fn back_to_back_maps_finalize_and_reseed() {
        let mut detector = BoundaryDetector::new();
        detector.observe(&AreaVisit::new("Strand", ts(0)), false);
        assert_eq!(
            detector.observe(&AreaVisit::new("Dunes", ts(12)), false),
            BoundaryDecision::Finalize { at: ts(12) }
        );
        assert_eq!(
            detector.run_start().map(|v| v.area.as_str()),
            Some("Dunes")
        );
    }

    #[test]
    fn towns_alone_never_produce_a_run() {
        let mut detector = BoundaryDetector::new();
        for minute in 0..3 {
            assert_eq!(
                detector.observe(&AreaVisit::new("The Sarn Encampment", ts(minute)), false),
                BoundaryDecision::NotReady
            );
        }
        assert_eq!(detector.state(), &DetectorState::InTown);
    }

    #[test]
    fn vaal_side_area_is_suppressed() {
        let mut detector = BoundaryDetector::new();
        detector.observe(&AreaVisit::new("Strand", ts(0)), false);
        assert_eq!(
            detector.observe(&AreaVisit::new("Sealed Corridors", ts(3)), false),
            BoundaryDecision::Suppressed(SuppressReason::VaalSideArea)
        );
        assert_eq!(
            detector.run_start().map(|v| v.area.as_str()),
            Some("Strand")
        );
    }

    #[test]
    fn delve_mine_bounce_is_suppressed() {
        let mut detector = BoundaryDetector::new();
        detector.observe(&AreaVisit::new(DELVE_MINE, ts(0)), false);
        assert_eq!(
            detector.observe(&AreaVisit::new(DELVE_MINE, ts(4)), false),
            BoundaryDecision::Suppressed(SuppressReason::DelveMine)
        );
        assert_eq!(
            detector.observe(&AreaVisit::new(ABYSSAL_DEPTHS, ts(6)), false),
            BoundaryDecision::Suppressed(SuppressReason::AbyssalDepths)
        );
    }

    #[test]
    fn labyrinth_floors_are_suppressed() {
        let mut detector = BoundaryDetector::new();
        detector.observe(&AreaVisit::new("Estate Path", ts(0)), false);
        assert_eq!(
            detector.observe(&AreaVisit::new("Aspirant's Trial", ts(2)), false),
            BoundaryDecision::Suppressed(SuppressReason::LabyrinthToLabyrinth)
        );
    }

    #[test]
    fn live_reconnect_to_same_instance_is_not_a_boundary() {
        let mut detector = BoundaryDetector::new();
        let start = AreaVisit::new("Strand", ts(0)).with_server("127.0.0.1:6112");
        detector.observe(&start, true);

        let reconnect = AreaVisit::new("Strand", ts(5)).with_server("127.0.0.1:6112");
        assert_eq!(detector.observe(&reconnect, true), BoundaryDecision::NotReady);

        let fresh = AreaVisit::new("Strand", ts(9)).with_server("127.0.0.1:6113");
        assert_eq!(
            detector.observe(&fresh, true),
            BoundaryDecision::Finalize { at: ts(9) }
        );
    }
}
