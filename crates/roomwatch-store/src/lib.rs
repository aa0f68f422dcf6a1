//! # roomwatch-store
//!
//! Persistence layer for roomwatch: a namespaced key/value substrate with a
//! tri-state write mode, and on top of it the user ledger, the five
//! activity-log buckets, and the global first-fetch watermark.
//!
//! All collections are stored as whole JSON arrays under one key each, so a
//! mutation is always a single substrate write and external readers never
//! observe a half-updated collection.

pub mod activity;
pub mod kv;
pub mod ledger;
pub mod sqlite;
pub mod watermark;

mod error;

pub use activity::{ActivityLog, Order};
pub use error::{Result, StoreError};
pub use kv::{KvBackend, KvStore, MemoryBackend, SharedStore, WriteMode};
pub use ledger::UserLedger;
pub use sqlite::SqliteBackend;
pub use watermark::Watermark;
