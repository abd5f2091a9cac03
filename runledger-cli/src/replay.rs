//! Replays a raw event log through the full pipeline with in-memory stores.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, warn};

use runledger_core::{
    AreaVisit, BoundaryDetector, EventKind, FinalizeError, MemoryCatalog, MemoryEvents,
    MemoryPricing, MemorySnapshots, RawEvent, RetryPolicy, RunCatalog, RunRecord,
    RunRecordBuilder, RunSummary, SessionContext,
};

/// Everything one replay produced.
pub struct ReplayOutcome {
    pub summaries: Vec<RunSummary>,
    pub records: Vec<RunRecord>,
    pub open_run: bool,
}

/// Parse one event per line from a JSONL log file.
pub fn load_events(path: &Path) -> Result<Vec<RawEvent>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading event log {}", path.display()))?;

    let mut events = Vec::new();
    for (number, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RawEvent>(line) {
            Ok(event) => events.push(event),
            Err(error) => warn!("skipping line {}: {error}", number + 1),
        }
    }
    events.sort_by_key(|e| e.timestamp);
    Ok(events)
}

/// Drive the whole log through boundary detection and finalization.
///
/// `live` trusts server identifiers for instance matching; `flush` force
/// finalizes a trailing open run at the log's last timestamp.
pub async fn replay(events: Vec<RawEvent>, live: bool, flush: bool) -> Result<ReplayOutcome> {
    let catalog = Arc::new(MemoryCatalog::new());
    let event_store = Arc::new(MemoryEvents::new());
    let pricing = Arc::new(MemoryPricing::new());
    let snapshots = Arc::new(MemorySnapshots::new());

    for event in &events {
        event_store.push(event.clone());
    }

    let builder = RunRecordBuilder::new(
        Arc::clone(&catalog),
        Arc::clone(&event_store),
        Arc::clone(&pricing),
        Arc::clone(&snapshots),
    )
    .with_retry_policy(RetryPolicy::immediate());

    let mut detector = BoundaryDetector::new();
    let mut session = SessionContext::default();
    let mut summaries = Vec::new();
    let last_timestamp = events.last().map(|e| e.timestamp);

    for event in &events {
        match event.kind {
            EventKind::Entered => {
                let mut visit = AreaVisit::new(event.text.clone(), event.timestamp);
                if let Some(server) = event.server.clone() {
                    visit = visit.with_server(server);
                }
                if let Some(summary) = builder
                    .try_process(&mut detector, &mut session, &visit, live)
                    .await?
                {
                    summaries.push(summary);
                }
            }
            EventKind::GeneratedArea => {
                session.record_generated(AreaVisit::new(event.text.clone(), event.timestamp));
            }
            _ => {}
        }
    }

    let mut open_run = catalog.latest_uncompleted().await?.is_some();
    if open_run && flush {
        let at = last_timestamp.context("flush requested on an empty log")?;
        match builder.finalize_latest(at).await {
            Ok(summary) => {
                debug!("flushed trailing run {}", summary.name);
                summaries.push(summary);
                open_run = false;
            }
            Err(FinalizeError::NoRunToFinalize) => open_run = false,
            Err(error) => return Err(error.into()),
        }
    }

    let mut records = Vec::new();
    for id in catalog.all_run_ids().await? {
        if let Some(json) = catalog.record_json(id) {
            let record: RunRecord =
                serde_json::from_str(&json).with_context(|| format!("decoding {id}"))?;
            records.push(record);
        }
    }

    Ok(ReplayOutcome {
        summaries,
        records,
        open_run,
    })
}
