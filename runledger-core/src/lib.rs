//! Runledger Core
//!
//! Gameplay-log pipeline for run tracking: raw client-log events are folded
//! into immutable per-run records, run boundaries are detected over area
//! entries, and finished records roll up into ephemeral statistics. This
//! crate carries no storage backend or UI; collaborators plug in behind the
//! trait seams in [`stores`].

pub mod areas;
pub mod boundary;
pub mod builder;
pub mod dialogue;
pub mod event;
pub mod interval;
pub mod memory;
pub mod record;
pub mod reducer;
pub mod stats;
pub mod stores;

// Re-export commonly used types
pub use areas::{AreaModifiers, AreaType};
pub use boundary::{
    AreaVisit, BoundaryDecision, BoundaryDetector, DetectorState, SessionContext,
    SuppressReason,
};
pub use builder::{FinalizeError, RetryPolicy, RunListener, RunRecordBuilder};
pub use dialogue::{DialogueCue, Master, NpcLine, route_line};
pub use event::{
    BeastColor, EncounterEvent, EventKind, EventParseError, PairAction, RawEvent,
};
pub use interval::{EncounterInterval, IntervalLog};
pub use memory::{MemoryCatalog, MemoryEvents, MemoryPricing, MemorySnapshots};
pub use record::{RunHeader, RunRecord, RunSummary};
pub use reducer::RunAccumulator;
pub use stats::{LootItem, Statistics, aggregate, profit_per_hour};
pub use stores::{
    EventStore, IncubatorSnapshot, ItemDrop, ItemPrice, LootCapture, PricingService,
    RunCatalog, RunId, RunWindow, SnapshotStore, SnapshotWait, StoreError,
};
