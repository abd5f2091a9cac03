//! In-memory collaborator implementations.
//!
//! Used by the replay tool and the integration tests. All four stores keep
//! their data behind a `std::sync::Mutex`; every operation is a short
//! lock-copy-release, so holding the lock across an await never happens.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::event::RawEvent;
use crate::stores::{
    EventStore, IncubatorSnapshot, ItemDrop, ItemPrice, LootCapture, PricingService,
    RunCatalog, RunId, RunWindow, SnapshotStore, StoreError,
};

#[derive(Debug, Clone)]
struct RunRow {
    area: String,
    level: Option<u32>,
    first_event: NaiveDateTime,
    last_event: NaiveDateTime,
    modifiers: Vec<String>,
    experience: Option<i64>,
    kill_count: Option<u64>,
    record_json: Option<String>,
    completed: bool,
}

/// In-memory run catalog.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    rows: Mutex<BTreeMap<RunId, RunRow>>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach raw modifier strings to an open run.
    pub fn set_modifiers(&self, id: RunId, modifiers: Vec<String>) {
        if let Some(row) = self.rows.lock().expect("catalog lock").get_mut(&id) {
            row.modifiers = modifiers;
        }
    }

    /// The serialized record body of a completed run.
    #[must_use]
    pub fn record_json(&self, id: RunId) -> Option<String> {
        self.rows
            .lock()
            .expect("catalog lock")
            .get(&id)
            .and_then(|row| row.record_json.clone())
    }

    /// Scalar columns of a run, `(experience, kill_count)`.
    #[must_use]
    pub fn scalars(&self, id: RunId) -> Option<(Option<i64>, Option<u64>)> {
        self.rows
            .lock()
            .expect("catalog lock")
            .get(&id)
            .map(|row| (row.experience, row.kill_count))
    }
}

#[async_trait]
impl RunCatalog for MemoryCatalog {
    async fn run_window(&self, id: RunId) -> Result<RunWindow, StoreError> {
        let rows = self.rows.lock().expect("catalog lock");
        let row = rows.get(&id).ok_or(StoreError::RunNotFound(id))?;
        Ok(RunWindow {
            first_event: row.first_event,
            last_event: row.last_event,
            completed: row.completed,
        })
    }

    async fn latest_uncompleted(&self) -> Result<Option<RunId>, StoreError> {
        let rows = self.rows.lock().expect("catalog lock");
        Ok(rows
            .iter()
            .rev()
            .find(|(_, row)| !row.completed)
            .map(|(id, _)| *id))
    }

    async fn all_run_ids(&self) -> Result<Vec<RunId>, StoreError> {
        Ok(self.rows.lock().expect("catalog lock").keys().copied().collect())
    }

    async fn area_info(&self, id: RunId) -> Result<(String, Option<u32>), StoreError> {
        let rows = self.rows.lock().expect("catalog lock");
        let row = rows.get(&id).ok_or(StoreError::RunNotFound(id))?;
        Ok((row.area.clone(), row.level))
    }

    async fn area_modifiers(&self, id: RunId) -> Result<Vec<String>, StoreError> {
        let rows = self.rows.lock().expect("catalog lock");
        let row = rows.get(&id).ok_or(StoreError::RunNotFound(id))?;
        Ok(row.modifiers.clone())
    }

    async fn previous_experience(&self, id: RunId) -> Result<Option<i64>, StoreError> {
        let rows = self.rows.lock().expect("catalog lock");
        Ok(rows
            .range(..id)
            .rev()
            .find_map(|(_, row)| row.experience))
    }

    async fn create_run(
        &self,
        area: String,
        level: Option<u32>,
        first_event: NaiveDateTime,
    ) -> Result<RunId, StoreError> {
        let mut rows = self.rows.lock().expect("catalog lock");
        let id = RunId(rows.keys().next_back().map_or(1, |last| last.0 + 1));
        rows.insert(
            id,
            RunRow {
                area,
                level,
                first_event,
                last_event: first_event,
                modifiers: Vec::new(),
                experience: None,
                kill_count: None,
                record_json: None,
                completed: false,
            },
        );
        Ok(id)
    }

    async fn complete_run(
        &self,
        id: RunId,
        last_event: NaiveDateTime,
        experience: Option<i64>,
        kill_count: Option<u64>,
        record_json: String,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().expect("catalog lock");
        let row = rows.get_mut(&id).ok_or(StoreError::RunNotFound(id))?;
        row.last_event = last_event;
        row.experience = experience;
        row.kill_count = kill_count;
        row.record_json = Some(record_json);
        row.completed = true;
        Ok(())
    }
}

/// In-memory raw event log.
#[derive(Debug, Default)]
pub struct MemoryEvents {
    events: Mutex<Vec<RawEvent>>,
}

impl MemoryEvents {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event, keeping the log sorted by timestamp.
    pub fn push(&self, event: RawEvent) {
        let mut events = self.events.lock().expect("event lock");
        let at = events.partition_point(|e| e.timestamp <= event.timestamp);
        events.insert(at, event);
    }
}

#[async_trait]
impl EventStore for MemoryEvents {
    async fn events_between(
        &self,
        first: NaiveDateTime,
        last: NaiveDateTime,
    ) -> Result<Vec<RawEvent>, StoreError> {
        let events = self.events.lock().expect("event lock");
        Ok(events
            .iter()
            .filter(|e| e.timestamp >= first && e.timestamp <= last)
            .cloned()
            .collect())
    }
}

/// Fixed-price table used when no market backend is available.
#[derive(Debug, Default)]
pub struct MemoryPricing {
    prices: Mutex<BTreeMap<String, ItemPrice>>,
    currencies: Mutex<BTreeMap<String, f64>>,
}

impl MemoryPricing {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, name: impl Into<String>, price: ItemPrice) {
        self.prices
            .lock()
            .expect("price lock")
            .insert(name.into(), price);
    }

    pub fn set_currency(&self, name: impl Into<String>, value: f64) {
        self.currencies
            .lock()
            .expect("currency lock")
            .insert(name.into(), value);
    }
}

#[async_trait]
impl PricingService for MemoryPricing {
    async fn price(&self, item: &ItemDrop) -> Result<Option<ItemPrice>, StoreError> {
        let prices = self.prices.lock().expect("price lock");
        Ok(prices
            .get(&item.name)
            .or_else(|| prices.get(&item.type_line))
            .copied())
    }

    async fn current_value(&self, currency: &str) -> Result<Option<f64>, StoreError> {
        Ok(self
            .currencies
            .lock()
            .expect("currency lock")
            .get(currency)
            .copied())
    }
}

/// In-memory inventory/XP snapshot store.
#[derive(Debug, Default)]
pub struct MemorySnapshots {
    snapshot_times: Mutex<Vec<NaiveDateTime>>,
    experience: Mutex<BTreeMap<NaiveDateTime, i64>>,
    incubators: Mutex<Vec<IncubatorSnapshot>>,
    loot: Mutex<Vec<LootCapture>>,
}

impl MemorySnapshots {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_snapshot_time(&self, at: NaiveDateTime) {
        let mut times = self.snapshot_times.lock().expect("snapshot lock");
        let idx = times.partition_point(|t| *t <= at);
        times.insert(idx, at);
    }

    pub fn push_experience(&self, at: NaiveDateTime, experience: i64) {
        self.experience
            .lock()
            .expect("experience lock")
            .insert(at, experience);
        self.push_snapshot_time(at);
    }

    pub fn push_incubators(&self, snapshot: IncubatorSnapshot) {
        self.push_snapshot_time(snapshot.timestamp);
        let mut incubators = self.incubators.lock().expect("incubator lock");
        let idx = incubators.partition_point(|s| s.timestamp <= snapshot.timestamp);
        incubators.insert(idx, snapshot);
    }

    pub fn push_loot(&self, capture: LootCapture) {
        self.push_snapshot_time(capture.timestamp);
        let mut loot = self.loot.lock().expect("loot lock");
        let idx = loot.partition_point(|c| c.timestamp <= capture.timestamp);
        loot.insert(idx, capture);
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshots {
    async fn latest_snapshot_time(&self) -> Result<Option<NaiveDateTime>, StoreError> {
        let times = self.snapshot_times.lock().expect("snapshot lock");
        Ok(times.last().copied())
    }

    async fn experience_between(
        &self,
        first: NaiveDateTime,
        last: NaiveDateTime,
    ) -> Result<(Option<i64>, Option<i64>), StoreError> {
        let experience = self.experience.lock().expect("experience lock");
        let at_first = experience.range(..=first).next_back().map(|(_, xp)| *xp);
        let at_last = experience.range(..=last).next_back().map(|(_, xp)| *xp);
        Ok((at_first, at_last))
    }

    async fn incubator_snapshots_between(
        &self,
        first: NaiveDateTime,
        last: NaiveDateTime,
    ) -> Result<Vec<IncubatorSnapshot>, StoreError> {
        let incubators = self.incubators.lock().expect("incubator lock");
        Ok(incubators
            .iter()
            .filter(|s| s.timestamp >= first && s.timestamp <= last)
            .cloned()
            .collect())
    }

    async fn loot_between(
        &self,
        first: NaiveDateTime,
        last: NaiveDateTime,
    ) -> Result<Vec<LootCapture>, StoreError> {
        let loot = self.loot.lock().expect("loot lock");
        Ok(loot
            .iter()
            .filter(|c| c.timestamp >= first && c.timestamp <= last)
            .cloned()
            .collect())
    }
}
