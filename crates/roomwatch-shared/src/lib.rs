//! # roomwatch-shared
//!
//! Domain types shared across the roomwatch crates: user records and
//! patches, activity-log entries and buckets, the host wire payload shapes,
//! and the sortable timestamp encoding used to order everything.

pub mod protocol;
pub mod timestamp;
pub mod types;

pub use protocol::{HostLogResponse, LogItem};
pub use types::{Bucket, LogEntry, LogKind, SnapshotUser, Uid, UserPatch, UserRecord};
