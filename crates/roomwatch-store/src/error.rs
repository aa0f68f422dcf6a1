use roomwatch_shared::Uid;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error from the durable backend.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value failed to (de)serialize.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A ledger operation expected a record that does not exist.
    #[error("No record for uid {0}")]
    NotFound(Uid),

    /// A patch arrived without a uid.
    #[error("Patch is missing its uid")]
    MissingUid,

    /// A record's `isLoggedIn` was read before any roster diff set it.
    /// This is a merge defect, not a legitimate logged-out state.
    #[error("Record {0} has no isLoggedIn value")]
    LoggedInUnset(Uid),

    /// A shared store lock was poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
