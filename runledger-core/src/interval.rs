//! Timed encounter intervals and the explicit open-interval stack.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A half-open start/finish pair bracketing one timed sub-event.
///
/// `finished` absent means the interval is still open. Maven witness entries
/// may carry only one endpoint; everywhere else `started` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncounterInterval {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<u32>,
    /// Watchstone count for conqueror fights.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stones: Option<u32>,
    /// Deaths attributed to this interval while it was open.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub deaths: u32,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl EncounterInterval {
    /// A freshly opened interval.
    #[must_use]
    pub fn opened(started: NaiveDateTime) -> Self {
        Self {
            label: None,
            started: Some(started),
            finished: None,
            phase: None,
            stones: None,
            deaths: 0,
        }
    }

    /// A terminal interval that only records its finish time.
    #[must_use]
    pub fn finished_only(finished: NaiveDateTime) -> Self {
        Self {
            label: None,
            started: None,
            finished: Some(finished),
            phase: None,
            stones: None,
            deaths: 0,
        }
    }

    /// Attach a label, builder style.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Attach a phase tag, builder style.
    #[must_use]
    pub fn with_phase(mut self, phase: Option<u32>) -> Self {
        self.phase = phase;
        self
    }

    /// Whether the interval has an open start and no finish yet.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.started.is_some() && self.finished.is_none()
    }

    /// Seconds between start and finish; `None` until both ends exist,
    /// clamped to zero if the clock ran backwards.
    #[must_use]
    pub fn duration_seconds(&self) -> Option<i64> {
        let started = self.started?;
        let finished = self.finished?;
        Some(finished.signed_duration_since(started).num_seconds().max(0))
    }
}

/// Ordered interval list with an explicit stack of open entries.
///
/// Pairing is LIFO per category: a finish closes the most recently opened,
/// still-open interval. The game gives no evidence of two same-category
/// encounters open concurrently; if it ever emits that, this pairing would
/// cross-link them, matching the upstream tracker's behavior.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntervalLog {
    intervals: Vec<EncounterInterval>,
    open: SmallVec<[usize; 2]>,
}

impl IntervalLog {
    /// Push a freshly opened interval onto the log and the open stack.
    pub fn push_start(&mut self, interval: EncounterInterval) {
        debug_assert!(interval.is_open());
        self.open.push(self.intervals.len());
        self.intervals.push(interval);
    }

    /// Push a terminal interval that never opens (single-event kills,
    /// finished-only witness markers).
    pub fn push_terminal(&mut self, interval: EncounterInterval) {
        self.intervals.push(interval);
    }

    /// Close the most recently opened interval at `finished`.
    ///
    /// With nothing open, the finish is preserved as an orphan
    /// finished-only interval rather than dropped, so noisy logs never
    /// abort the fold.
    pub fn close_last_open(&mut self, finished: NaiveDateTime) {
        if let Some(index) = self.open.pop() {
            if let Some(interval) = self.intervals.get_mut(index) {
                interval.finished = Some(finished);
                return;
            }
        }
        self.intervals.push(EncounterInterval::finished_only(finished));
    }

    /// Mutable access to the most recently opened, still-open interval.
    pub fn last_open_mut(&mut self) -> Option<&mut EncounterInterval> {
        let index = *self.open.last()?;
        self.intervals.get_mut(index)
    }

    /// Whether any interval is currently open.
    #[must_use]
    pub fn has_open(&self) -> bool {
        !self.open.is_empty()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// Borrow the recorded intervals in log order.
    #[must_use]
    pub fn intervals(&self) -> &[EncounterInterval] {
        &self.intervals
    }

    /// Consume the log, freezing it into a plain interval list.
    #[must_use]
    pub fn into_intervals(self) -> Vec<EncounterInterval> {
        self.intervals
    }
}
