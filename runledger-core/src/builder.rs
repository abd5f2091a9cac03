//! Run finalization.
//!
//! [`RunRecordBuilder`] turns one run's slice of the raw event log into an
//! immutable [`RunRecord`]: it resolves the run's window from the catalog,
//! folds the events through the reducer, merges in loot values, incubator
//! kill counts and experience deltas from the side channels, and persists
//! the frozen record. Finalization is a pure function of the event log plus
//! the pricing service's current answers; `reprocess` re-runs the whole
//! derivation and overwrites the stored record.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use log::{debug, error, info, warn};
use thiserror::Error;

use crate::areas::{
    self, AreaType, ABYSSAL_DEPTHS, AWAKENER_ORB, CONQUEROR_ORBS, HEIST_AREA,
    METAMORPH_ORGANS,
};
use crate::boundary::{AreaVisit, BoundaryDecision, BoundaryDetector, SessionContext};
use crate::dialogue::{route_line, NpcLine};
use crate::event::{EncounterEvent, EventKind, RawEvent};
use crate::record::{ConquerorDefeat, LootRecord, RunHeader, RunRecord, RunSummary};
use crate::reducer::RunAccumulator;
use crate::stores::{
    EventStore, IncubatorSnapshot, PricingService, RunCatalog, RunId, SnapshotStore,
    SnapshotWait, StoreError,
};

/// Items at or above this reference-currency value count as important drops.
const IMPORTANT_DROP_VALUE: f64 = 20.0;

/// Blight marker count at which a map reports as a blighted map.
const BLIGHTED_MAP_LANES: usize = 8;

/// How long to wait for the snapshot store to catch up to a run's end.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// No waiting at all; used by replays over complete data.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// Observer notified after each run is processed.
#[async_trait::async_trait]
pub trait RunListener: Send + Sync {
    async fn run_processed(&self, summary: &RunSummary);
}

/// Failure to finalize a run.
#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("no run to finalize")]
    NoRunToFinalize,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Orchestrates one run's finalization against the four collaborator seams.
pub struct RunRecordBuilder<C, E, P, S> {
    catalog: Arc<C>,
    events: Arc<E>,
    pricing: Arc<P>,
    snapshots: Arc<S>,
    retry: RetryPolicy,
    listeners: Vec<Arc<dyn RunListener>>,
}

impl<C, E, P, S> RunRecordBuilder<C, E, P, S>
where
    C: RunCatalog,
    E: EventStore,
    P: PricingService,
    S: SnapshotStore,
{
    pub fn new(catalog: Arc<C>, events: Arc<E>, pricing: Arc<P>, snapshots: Arc<S>) -> Self {
        Self {
            catalog,
            events,
            pricing,
            snapshots,
            retry: RetryPolicy::default(),
            listeners: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn add_listener(&mut self, listener: Arc<dyn RunListener>) {
        self.listeners.push(listener);
    }

    /// Open a catalog row for a run that just started.
    ///
    /// # Errors
    ///
    /// Propagates catalog failures.
    pub async fn start_run(
        &self,
        area: &str,
        level: Option<u32>,
        first_event: NaiveDateTime,
    ) -> Result<RunId, FinalizeError> {
        let id = self
            .catalog
            .create_run(area.to_string(), level, first_event)
            .await?;
        debug!("opened {id} for {area}");
        Ok(id)
    }

    /// Feed one `entered` event through boundary detection, finalizing and
    /// opening catalog rows as runs end and begin.
    ///
    /// Returns the finished run's summary when the visit closed a run.
    ///
    /// # Errors
    ///
    /// Propagates catalog and store failures; a visit that closes nothing
    /// returns `Ok(None)`.
    pub async fn try_process(
        &self,
        detector: &mut BoundaryDetector,
        session: &mut SessionContext,
        visit: &AreaVisit,
        live: bool,
    ) -> Result<Option<RunSummary>, FinalizeError> {
        let had_run = detector.run_start().is_some();
        let decision = detector.observe(visit, live);

        match decision {
            BoundaryDecision::NotReady => {
                if !had_run && detector.run_start().is_some() {
                    self.start_run(&visit.area, None, visit.timestamp).await?;
                }
                Ok(None)
            }
            BoundaryDecision::Suppressed(reason) => {
                debug!("boundary suppressed at {}: {reason:?}", visit.area);
                Ok(None)
            }
            BoundaryDecision::Finalize { at } => {
                let summary = self.finalize_latest(at).await?;
                session.reset();
                // A non-town boundary event is itself the next run's start.
                if detector.run_start().is_some() {
                    self.start_run(&visit.area, None, visit.timestamp).await?;
                }
                Ok(Some(summary))
            }
        }
    }

    /// Finalize the most recent uncompleted run as of `ended_at`.
    ///
    /// # Errors
    ///
    /// Returns [`FinalizeError::NoRunToFinalize`] when the catalog has no
    /// uncompleted run.
    pub async fn finalize_latest(
        &self,
        ended_at: NaiveDateTime,
    ) -> Result<RunSummary, FinalizeError> {
        let id = self
            .catalog
            .latest_uncompleted()
            .await?
            .ok_or(FinalizeError::NoRunToFinalize)?;
        self.finalize(id, ended_at).await
    }

    /// Finalize one run, ending its window at `ended_at`.
    ///
    /// # Errors
    ///
    /// Propagates catalog and store failures.
    pub async fn finalize(
        &self,
        id: RunId,
        ended_at: NaiveDateTime,
    ) -> Result<RunSummary, FinalizeError> {
        let window = self.catalog.run_window(id).await?;
        self.build_and_persist(id, window.first_event, ended_at).await
    }

    /// Re-derive a completed run's record from the raw event log, overwriting
    /// the stored record.
    ///
    /// # Errors
    ///
    /// Propagates catalog and store failures.
    pub async fn reprocess(&self, id: RunId) -> Result<RunSummary, FinalizeError> {
        let window = self.catalog.run_window(id).await?;
        self.build_and_persist(id, window.first_event, window.last_event)
            .await
    }

    /// Reprocess every run in the catalog, in id order.
    ///
    /// # Errors
    ///
    /// Stops at the first catalog failure.
    pub async fn reprocess_all(&self) -> Result<Vec<RunSummary>, FinalizeError> {
        let ids = self.catalog.all_run_ids().await?;
        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            summaries.push(self.reprocess(id).await?);
        }
        Ok(summaries)
    }

    async fn build_and_persist(
        &self,
        id: RunId,
        first: NaiveDateTime,
        last: NaiveDateTime,
    ) -> Result<RunSummary, FinalizeError> {
        let (record, experience) = self.build(id, first, last).await?;
        let summary = RunSummary::of(&record);

        let json = serde_json::to_string(&record).map_err(|e| {
            StoreError::Backend(format!("record serialization failed: {e}"))
        })?;
        if let Err(error) = self
            .catalog
            .complete_run(id, last, experience, record.kill_count, json)
            .await
        {
            // The run stays uncompleted; a later reprocess picks it up.
            error!("failed to persist {id}: {error}");
        } else {
            info!(
                "{id} finalized: {} ({}s, {:.1} gained)",
                record.area,
                record.duration_seconds(),
                record.loot.total_value
            );
        }

        for listener in &self.listeners {
            listener.run_processed(&summary).await;
        }
        Ok(summary)
    }

    /// Derive the frozen record plus the absolute experience at the run's
    /// end, which the catalog keeps for the next run's delta.
    async fn build(
        &self,
        id: RunId,
        first: NaiveDateTime,
        last: NaiveDateTime,
    ) -> Result<(RunRecord, Option<i64>), FinalizeError> {
        let (area, level) = self.catalog.area_info(id).await?;
        let raw_modifiers = self.catalog.area_modifiers(id).await?;
        let events = self.events.events_between(first, last).await?;

        let mut header = RunHeader::new(&area, areas::area_type(&area), first, last);
        header.level = level;
        header.modifiers = areas::extract_modifiers(&raw_modifiers);
        header.elder_guardian = areas::elder_guardian_in(&raw_modifiers).map(str::to_string);

        let mut acc = RunAccumulator::default();
        self.fold_events(&events, &mut header, &mut acc);

        let wait = self.wait_for_snapshot(last).await?;
        match wait {
            SnapshotWait::Ready => {}
            SnapshotWait::Stale => debug!("{id}: snapshot store caught up after retrying"),
            SnapshotWait::TimedOut => {
                warn!("{id}: snapshot store never caught up; loot recorded as zero");
            }
        }
        if wait != SnapshotWait::TimedOut {
            self.collect_loot(first, last, &mut header).await?;
        }
        header.kill_count = self.kill_count(first, last).await?;
        let (experience, delta) = self.experience(id, first, last).await?;
        header.experience_delta = delta;
        header.conqueror_defeats = conqueror_defeats(&acc, &header.loot);
        apply_area_type_overrides(&mut header, &acc);

        Ok((RunRecord::freeze(header, acc), experience))
    }

    fn fold_events(
        &self,
        events: &[RawEvent],
        header: &mut RunHeader,
        acc: &mut RunAccumulator,
    ) {
        let mut last_entered: Option<(String, NaiveDateTime)> = None;

        for event in events {
            match event.kind {
                EventKind::Entered => {
                    if let Some((left_area, entered_at)) = last_entered.take() {
                        if !areas::is_town(&left_area) {
                            let elapsed = event
                                .timestamp
                                .signed_duration_since(entered_at)
                                .num_seconds()
                                .max(0);
                            *header.area_times.entry(left_area).or_insert(0) += elapsed;
                        }
                    }
                    if event.text == ABYSSAL_DEPTHS {
                        header.abyssal_depths = true;
                    }
                    if areas::is_vaal_side_area(&event.text) {
                        header.vaal_side_areas = true;
                    }
                    last_entered = Some((event.text.clone(), event.timestamp));
                }
                EventKind::Slain => {
                    header.deaths += 1;
                    acc.record_death();
                }
                EventKind::AbnormalDisconnect => header.abnormal_disconnects += 1,
                EventKind::GeneratedArea => {}
                EventKind::Note => {
                    if EncounterEvent::looks_like_payload(&event.text) {
                        acc.apply_payload(event.timestamp, &event.text);
                    } else if let Some(line) = NpcLine::parse(&event.text) {
                        if let Some(cue) = route_line(&line) {
                            acc.apply_dialogue(cue);
                        }
                    }
                }
            }
        }

        // Close the elapsed-time table at the window's end.
        if let Some((left_area, entered_at)) = last_entered {
            if !areas::is_town(&left_area) {
                let elapsed = header
                    .last_event
                    .signed_duration_since(entered_at)
                    .num_seconds()
                    .max(0);
                *header.area_times.entry(left_area).or_insert(0) += elapsed;
            }
        }
    }

    async fn wait_for_snapshot(
        &self,
        run_end: NaiveDateTime,
    ) -> Result<SnapshotWait, FinalizeError> {
        for attempt in 0..self.retry.attempts {
            if let Some(at) = self.snapshots.latest_snapshot_time().await? {
                if at >= run_end {
                    return Ok(if attempt == 0 {
                        SnapshotWait::Ready
                    } else {
                        SnapshotWait::Stale
                    });
                }
            }
            if attempt + 1 < self.retry.attempts {
                tokio::time::sleep(self.retry.delay).await;
            }
        }
        Ok(SnapshotWait::TimedOut)
    }

    async fn collect_loot(
        &self,
        first: NaiveDateTime,
        last: NaiveDateTime,
        header: &mut RunHeader,
    ) -> Result<(), FinalizeError> {
        let captures = self.snapshots.loot_between(first, last).await?;
        let mut loot = LootRecord::default();

        for capture in captures {
            // Items picked up while idling between towns belong to no run.
            let town_idle = capture
                .previous_area
                .as_deref()
                .is_some_and(areas::is_town);
            if town_idle {
                continue;
            }

            for item in &capture.items {
                loot.count += 1;
                track_metamorph_organ(&mut header.metamorph_organs, item);

                let price = self.pricing.price(item).await?;
                // Vendor prices still count toward the total; only the
                // per-item importance threshold ignores them.
                match &price {
                    Some(price) => loot.total_value += price.value * f64::from(item.stack_size),
                    None => debug!("no price for {:?}; counted at zero", item.name),
                }
                let important = is_influence_orb(&item.type_line)
                    || price
                        .as_ref()
                        .is_some_and(|p| !p.is_vendor && p.value >= IMPORTANT_DROP_VALUE);
                if important {
                    *loot.important_drops.entry(drop_key(item)).or_insert(0) +=
                        item.stack_size;
                }
            }
        }

        header.loot = loot;
        Ok(())
    }

    /// Kill count inferred from incubator progress across the run.
    async fn kill_count(
        &self,
        first: NaiveDateTime,
        last: NaiveDateTime,
    ) -> Result<Option<u64>, FinalizeError> {
        let snapshots = self
            .snapshots
            .incubator_snapshots_between(first, last)
            .await?;
        Ok(incubator_kill_count(&snapshots))
    }

    /// Absolute experience at the run's end and the delta against the
    /// previous run's recorded experience.
    async fn experience(
        &self,
        id: RunId,
        first: NaiveDateTime,
        last: NaiveDateTime,
    ) -> Result<(Option<i64>, Option<i64>), FinalizeError> {
        let (_, at_last) = self.snapshots.experience_between(first, last).await?;
        let Some(current) = at_last else {
            return Ok((None, None));
        };
        let delta = match self.catalog.previous_experience(id).await? {
            Some(previous) => current - previous,
            None => current,
        };
        Ok((Some(current), Some(delta)))
    }
}

/// Conqueror and Awakener orbs are tracked whatever their market price.
fn is_influence_orb(type_line: &str) -> bool {
    type_line.ends_with("'s Exalted Orb") || type_line == AWAKENER_ORB
}

/// Important drops are keyed by base type, falling back to the given name.
fn drop_key(item: &crate::stores::ItemDrop) -> String {
    if item.type_line.is_empty() {
        item.name.clone()
    } else {
        item.type_line.clone()
    }
}

fn track_metamorph_organ(
    organs: &mut BTreeMap<String, u32>,
    item: &crate::stores::ItemDrop,
) {
    let Some(last_word) = item.type_line.rsplit(' ').next() else {
        return;
    };
    let organ = last_word.to_ascii_lowercase();
    if METAMORPH_ORGANS.contains(&organ.as_str()) {
        *organs.entry(organ).or_insert(0) += item.stack_size;
    }
}

/// Kills inferred from incubator progress: each pair of consecutive
/// snapshots contributes the largest per-incubator delta, so a swapped-out
/// incubator mid-run does not hide the kills before the swap.
fn incubator_kill_count(snapshots: &[IncubatorSnapshot]) -> Option<u64> {
    if snapshots.len() < 2 {
        return None;
    }
    let mut total = 0u64;
    for pair in snapshots.windows(2) {
        let step = pair[1]
            .progress
            .iter()
            .filter_map(|(name, end)| {
                let start = pair[0].progress.get(name)?;
                Some(end.saturating_sub(*start))
            })
            .max()
            .unwrap_or(0);
        total += step;
    }
    (total > 0).then_some(total)
}

fn conqueror_defeats(acc: &RunAccumulator, loot: &LootRecord) -> Vec<ConquerorDefeat> {
    let mut defeats = Vec::new();

    if let Some(conquerors) = acc.conquerors.as_ref() {
        for interval in conquerors.fights.intervals() {
            let Some(boss) = interval.label.as_deref() else {
                continue;
            };
            if interval.is_open() {
                continue;
            }
            if let Some((name, orb)) =
                CONQUEROR_ORBS.iter().find(|(name, _)| *name == boss)
            {
                defeats.push(ConquerorDefeat {
                    boss: (*name).to_string(),
                    orb: (*orb).to_string(),
                    orb_dropped: loot.important_drops.contains_key(*orb),
                });
            }
        }
    }

    if let Some(sirus) = acc.sirus.as_ref() {
        if sirus.fights.intervals().iter().any(|i| !i.is_open()) {
            if let Some(boss) = sirus.boss.as_deref() {
                defeats.push(ConquerorDefeat {
                    boss: boss.to_string(),
                    orb: AWAKENER_ORB.to_string(),
                    orb_dropped: loot.important_drops.contains_key(AWAKENER_ORB),
                });
            }
        }
    }

    defeats
}

/// Classification that needs run context rather than the area name alone.
fn apply_area_type_overrides(header: &mut RunHeader, acc: &RunAccumulator) {
    if header.area == HEIST_AREA {
        header.area_type = if acc.heist_rogues.len() > 1 {
            AreaType::GrandHeist
        } else {
            AreaType::Heist
        };
    }
    if header.area_type == AreaType::NormalMap {
        let lanes = acc.blight.as_ref().map_or(0, Vec::len);
        if lanes >= BLIGHTED_MAP_LANES {
            header.area_type = AreaType::BlightedMap;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::ItemDrop;
    use chrono::NaiveDate;

    fn ts(seconds: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .expect("valid date")
            .and_hms_opt(19, 0, 0)
            .expect("valid time")
            + chrono::Duration::seconds(i64::from(seconds))
    }

    #[test]
    fn incubator_kill_count_takes_max_delta() {
        let snapshots = vec![
            IncubatorSnapshot {
                timestamp: ts(0),
                progress: BTreeMap::from([
                    ("Ornate Incubator".to_string(), 100),
                    ("Singular Incubator".to_string(), 5_000),
                ]),
            },
            IncubatorSnapshot {
                timestamp: ts(600),
                progress: BTreeMap::from([
                    ("Ornate Incubator".to_string(), 340),
                    ("Singular Incubator".to_string(), 5_180),
                ]),
            },
        ];
        assert_eq!(incubator_kill_count(&snapshots), Some(240));
    }

    #[test]
    fn kill_count_sums_steps_across_an_incubator_swap() {
        // The Ornate incubator is replaced by a Singular one mid-run; the
        // kills recorded before the swap still count.
        let snapshots = vec![
            IncubatorSnapshot {
                timestamp: ts(0),
                progress: BTreeMap::from([("Ornate Incubator".to_string(), 100)]),
            },
            IncubatorSnapshot {
                timestamp: ts(300),
                progress: BTreeMap::from([
                    ("Ornate Incubator".to_string(), 150),
                    ("Singular Incubator".to_string(), 1_000),
                ]),
            },
            IncubatorSnapshot {
                timestamp: ts(600),
                progress: BTreeMap::from([("Singular Incubator".to_string(), 1_070)]),
            },
        ];
        assert_eq!(incubator_kill_count(&snapshots), Some(120));
    }

    #[test]
    fn single_snapshot_yields_no_kill_count() {
        let snapshots = vec![IncubatorSnapshot {
            timestamp: ts(0),
            progress: BTreeMap::from([("Ornate Incubator".to_string(), 100)]),
        }];
        assert_eq!(incubator_kill_count(&snapshots), None);
        assert_eq!(incubator_kill_count(&[]), None);
    }

    #[test]
    fn unchanged_progress_yields_no_kill_count() {
        let frame = IncubatorSnapshot {
            timestamp: ts(0),
            progress: BTreeMap::from([("Ornate Incubator".to_string(), 100)]),
        };
        let mut second = frame.clone();
        second.timestamp = ts(600);
        assert_eq!(incubator_kill_count(&[frame, second]), None);
    }

    #[test]
    fn influence_orbs_are_important_regardless_of_price() {
        assert!(is_influence_orb("Warlord's Exalted Orb"));
        assert!(is_influence_orb("Awakener's Orb"));
        assert!(!is_influence_orb("Exalted Orb"));
        assert!(!is_influence_orb("Orb of Alchemy"));
    }

    #[test]
    fn metamorph_organs_match_on_typeline_last_word() {
        let mut organs = BTreeMap::new();
        track_metamorph_organ(
            &mut organs,
            &ItemDrop::new("", "Portentia's Ravenous Brain"),
        );
        track_metamorph_organ(&mut organs, &ItemDrop::new("", "Chaos Orb"));
        assert_eq!(organs.get("brain"), Some(&1));
        assert_eq!(organs.len(), 1);
    }

    #[test]
    fn grand_heist_needs_more_than_one_rogue() {
        let mut acc = RunAccumulator::default();
        acc.heist_rogues.insert("Karst, the Lockpick".to_string());
        let mut header = RunHeader::new(HEIST_AREA, AreaType::Heist, ts(0), ts(60));
        apply_area_type_overrides(&mut header, &acc);
        assert_eq!(header.area_type, AreaType::Heist);

        acc.heist_rogues.insert("Tibbs, the Giant".to_string());
        apply_area_type_overrides(&mut header, &acc);
        assert_eq!(header.area_type, AreaType::GrandHeist);
    }

    #[test]
    fn defeated_conqueror_links_to_its_orb() {
        let mut acc = RunAccumulator::default();
        let start = r#"{"category":"Conquerors","type":"BossFight","npc":"Drox, the Warlord","arguments":{"action":"start"}}"#;
        let finish = r#"{"category":"Conquerors","type":"BossFight","npc":"Drox, the Warlord","arguments":{"action":"finish"}}"#;
        acc.apply_payload(ts(0), start);
        acc.apply_payload(ts(120), finish);

        let mut loot = LootRecord::default();
        loot.important_drops
            .insert("Warlord's Exalted Orb".to_string(), 1);

        let defeats = conqueror_defeats(&acc, &loot);
        assert_eq!(defeats.len(), 1);
        assert_eq!(defeats[0].boss, "Drox, the Warlord");
        assert!(defeats[0].orb_dropped);
    }
}
