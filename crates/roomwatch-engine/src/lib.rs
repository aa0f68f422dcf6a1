//! # roomwatch-engine
//!
//! The reconciliation core: diffs roster snapshots against known state,
//! deduplicates private-message batches against per-user cursors, and
//! drives both through a single-flight orchestrator that persists into the
//! store crate's ledger and activity-log buckets.
//!
//! Inbound, the engine is driven by two ports: a [`SnapshotProvider`] that
//! turns host markup into plain records, and host response bodies handed to
//! [`Orchestrator::on_response`] by whatever network tap the embedder runs.
//! The engine itself never touches transport or UI.

pub mod dedup;
pub mod differ;
pub mod orchestrator;
pub mod tap;

mod error;

pub use dedup::{classify, process_batch, BatchOutcome, Classification, RejectReason};
pub use differ::{diff, Change, RosterChangeKind, RosterDiff, RosterPatch, RosterSummary};
pub use error::{EngineError, Result};
pub use orchestrator::{Orchestrator, RefreshGuard, SnapshotProvider};
pub use tap::Route;
