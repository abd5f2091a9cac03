//! Collaborator seams the record builder works against.
//!
//! Each trait covers one external concern: the run catalog, the raw event
//! log, item pricing, and inventory/XP snapshots. Production code plugs in
//! database-backed implementations; tests and the replay tool use the
//! in-memory ones from [`crate::memory`].

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::event::RawEvent;

/// Opaque run identifier assigned by the catalog.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RunId(pub u64);

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run#{}", self.0)
    }
}

/// Failure inside a storage collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run {0} not found")]
    RunNotFound(RunId),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A run's event window as known to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunWindow {
    pub first_event: NaiveDateTime,
    pub last_event: NaiveDateTime,
    pub completed: bool,
}

/// One item drop attributed to a capture point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDrop {
    pub name: String,
    /// Base type line; metamorph organs are recognized by its last word.
    pub type_line: String,
    #[serde(default = "one")]
    pub stack_size: u32,
}

fn one() -> u32 {
    1
}

impl ItemDrop {
    #[must_use]
    pub fn new(name: impl Into<String>, type_line: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_line: type_line.into(),
            stack_size: 1,
        }
    }

    #[must_use]
    pub fn with_stack_size(mut self, stack_size: u32) -> Self {
        self.stack_size = stack_size;
        self
    }
}

/// Price answer for one item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPrice {
    /// Value in the reference currency.
    pub value: f64,
    /// Whether the item is vendor trash rather than market-priced.
    pub is_vendor: bool,
}

/// Items captured at one inventory snapshot, tagged with where the player
/// came from so town pickups can be attributed to the preceding run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LootCapture {
    pub timestamp: NaiveDateTime,
    /// Area the player was in before this capture's area.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_area: Option<String>,
    pub items: Vec<ItemDrop>,
}

/// Incubator progress keyed by incubator name at one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncubatorSnapshot {
    pub timestamp: NaiveDateTime,
    pub progress: BTreeMap<String, u64>,
}

/// Outcome of waiting for the snapshot store to catch up to a run's end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotWait {
    /// A snapshot at or after the requested timestamp already existed.
    Ready,
    /// The store caught up only after retrying.
    Stale,
    /// No snapshot reached the requested timestamp within the retry budget.
    TimedOut,
}

/// Run catalog: scalar run rows plus the serialized record body.
#[async_trait]
pub trait RunCatalog: Send + Sync {
    /// Resolve a run's event window.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RunNotFound`] for an unknown id.
    async fn run_window(&self, id: RunId) -> Result<RunWindow, StoreError>;

    /// The most recent run not yet marked completed, if any.
    async fn latest_uncompleted(&self) -> Result<Option<RunId>, StoreError>;

    /// Every run id in the catalog, ascending.
    async fn all_run_ids(&self) -> Result<Vec<RunId>, StoreError>;

    /// Area name and level recorded when the run was opened.
    async fn area_info(&self, id: RunId) -> Result<(String, Option<u32>), StoreError>;

    /// Raw modifier strings captured for the run's area.
    async fn area_modifiers(&self, id: RunId) -> Result<Vec<String>, StoreError>;

    /// Experience recorded for the run immediately preceding `id`.
    async fn previous_experience(&self, id: RunId) -> Result<Option<i64>, StoreError>;

    /// Open a new run row for an area entry.
    async fn create_run(
        &self,
        area: String,
        level: Option<u32>,
        first_event: NaiveDateTime,
    ) -> Result<RunId, StoreError>;

    /// Persist a finalized record and mark the run completed.
    async fn complete_run(
        &self,
        id: RunId,
        last_event: NaiveDateTime,
        experience: Option<i64>,
        kill_count: Option<u64>,
        record_json: String,
    ) -> Result<(), StoreError>;
}

/// Raw event log, ordered by timestamp.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// All events in `[first, last]`, ascending by timestamp.
    async fn events_between(
        &self,
        first: NaiveDateTime,
        last: NaiveDateTime,
    ) -> Result<Vec<RawEvent>, StoreError>;
}

/// Market pricing for dropped items.
#[async_trait]
pub trait PricingService: Send + Sync {
    /// Price one item; `None` means no listing is known.
    async fn price(&self, item: &ItemDrop) -> Result<Option<ItemPrice>, StoreError>;

    /// Current value of a currency in the reference currency.
    async fn current_value(&self, currency: &str) -> Result<Option<f64>, StoreError>;
}

/// Inventory and experience snapshots taken outside the event log.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Timestamp of the newest snapshot on record, if any.
    async fn latest_snapshot_time(&self) -> Result<Option<NaiveDateTime>, StoreError>;

    /// Experience values nearest the two timestamps, `(at_first, at_last)`.
    async fn experience_between(
        &self,
        first: NaiveDateTime,
        last: NaiveDateTime,
    ) -> Result<(Option<i64>, Option<i64>), StoreError>;

    /// Incubator progress snapshots inside the window, ascending.
    async fn incubator_snapshots_between(
        &self,
        first: NaiveDateTime,
        last: NaiveDateTime,
    ) -> Result<Vec<IncubatorSnapshot>, StoreError>;

    /// Loot captures inside the window, ascending.
    async fn loot_between(
        &self,
        first: NaiveDateTime,
        last: NaiveDateTime,
    ) -> Result<Vec<LootCapture>, StoreError>;
}
