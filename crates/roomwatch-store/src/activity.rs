//! Append-only activity log, partitioned into five buckets.
//!
//! Each bucket is one JSON array under its own key. Appends are idempotent
//! by guid, which is what keeps retried or double-dispatched events from
//! accumulating duplicates.

use roomwatch_shared::timestamp::orderable;
use roomwatch_shared::{Bucket, LogEntry};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::kv::SharedStore;

/// Listing order for [`ActivityLog::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Handle to the five kind-partitioned log buckets.
#[derive(Clone)]
pub struct ActivityLog {
    store: SharedStore,
}

impl ActivityLog {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    fn load(&self, bucket: Bucket) -> Result<Vec<LogEntry>> {
        let mut store = self.store.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(store.get_json(bucket.storage_key())?.unwrap_or_default())
    }

    fn save(&self, bucket: Bucket, entries: &[LogEntry]) -> Result<()> {
        let mut store = self.store.lock().map_err(|_| StoreError::LockPoisoned)?;
        store.set_json(bucket.storage_key(), &entries)
    }

    /// Append `entry` to `bucket`, replacing any existing entry with the
    /// same guid so a retried append cannot duplicate.
    pub fn append(&self, bucket: Bucket, entry: LogEntry) -> Result<()> {
        let mut entries = self.load(bucket)?;
        entries.retain(|e| e.guid != entry.guid);
        entries.push(entry);
        self.save(bucket, &entries)
    }

    /// Move every entry matching `predicate` from one bucket to another.
    ///
    /// Returns the moved entries in their original order so the caller can
    /// mirror the migration elsewhere. Moving into the handled bucket clears
    /// the unread flag, the one mutation an entry undergoes after being
    /// written.
    pub fn move_matching(
        &self,
        from: Bucket,
        to: Bucket,
        predicate: impl Fn(&LogEntry) -> bool,
    ) -> Result<Vec<LogEntry>> {
        let source = self.load(from)?;
        let mut kept = Vec::with_capacity(source.len());
        let mut moved = Vec::new();

        for entry in source {
            if predicate(&entry) {
                moved.push(entry);
            } else {
                kept.push(entry);
            }
        }

        if moved.is_empty() {
            return Ok(moved);
        }

        if to == Bucket::DmInHandled {
            for entry in &mut moved {
                entry.unread = false;
            }
        }

        let mut dest = self.load(to)?;
        for entry in &moved {
            dest.retain(|e| e.guid != entry.guid);
        }
        dest.extend(moved.iter().cloned());

        self.save(from, &kept)?;
        self.save(to, &dest)?;

        debug!(moved = moved.len(), ?from, ?to, "relocated log entries");
        Ok(moved)
    }

    /// Empty one bucket. Returns how many entries were dropped.
    pub fn clear(&self, bucket: Bucket) -> Result<usize> {
        let removed = self.load(bucket)?.len();
        if removed > 0 {
            self.save(bucket, &[])?;
        }
        Ok(removed)
    }

    /// List a bucket sorted by parsed timestamp (not insertion order).
    /// Unparsable timestamps order as 0, i.e. before everything valid.
    pub fn list(&self, bucket: Bucket, order: Order) -> Result<Vec<LogEntry>> {
        let mut entries = self.load(bucket)?;
        entries.sort_by_key(|e| orderable(&e.ts));
        if order == Order::Desc {
            entries.reverse();
        }
        Ok(entries)
    }

    /// Remove the first entry with `guid`, whichever bucket holds it.
    /// Guids are presumed globally unique across kinds.
    pub fn remove(&self, guid: &str) -> Result<bool> {
        for bucket in Bucket::all() {
            let mut entries = self.load(bucket)?;
            let before = entries.len();
            entries.retain(|e| e.guid != guid);
            if entries.len() < before {
                self.save(bucket, &entries)?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::KvStore;
    use roomwatch_shared::{LogKind, Uid};

    fn log() -> ActivityLog {
        ActivityLog::new(KvStore::in_memory("test").into_shared())
    }

    fn dm_in(guid: &str, ts: &str, content: &str) -> LogEntry {
        LogEntry {
            ts: ts.to_string(),
            kind: LogKind::DmIn,
            content: content.to_string(),
            uid: Uid::from("5"),
            guid: guid.to_string(),
            unread: true,
        }
    }

    #[test]
    fn append_is_idempotent_by_guid() {
        let log = log();
        log.append(Bucket::DmInUnread, dm_in("10", "01/02 10:00", "first"))
            .unwrap();
        log.append(Bucket::DmInUnread, dm_in("10", "01/02 10:00", "second"))
            .unwrap();

        let entries = log.list(Bucket::DmInUnread, Order::Asc).unwrap();
        assert_eq!(entries.len(), 1);
        // Latest content wins.
        assert_eq!(entries[0].content, "second");
    }

    #[test]
    fn list_orders_by_timestamp_not_insertion() {
        let log = log();
        log.append(Bucket::Presence, dm_in("b", "02/02 09:00", "later"))
            .unwrap();
        log.append(Bucket::Presence, dm_in("a", "01/02 23:59", "earlier"))
            .unwrap();
        log.append(Bucket::Presence, dm_in("c", "not a date", "mangled"))
            .unwrap();

        let asc = log.list(Bucket::Presence, Order::Asc).unwrap();
        let guids: Vec<&str> = asc.iter().map(|e| e.guid.as_str()).collect();
        assert_eq!(guids, vec!["c", "a", "b"]);

        let desc = log.list(Bucket::Presence, Order::Desc).unwrap();
        assert_eq!(desc[0].guid, "b");
    }

    #[test]
    fn move_matching_relocates_and_clears_unread() {
        let log = log();
        for id in [7u64, 10, 12] {
            log.append(
                Bucket::DmInUnread,
                dm_in(&id.to_string(), "01/02 10:00", "msg"),
            )
            .unwrap();
        }

        // A reply covered everything up to log id 10.
        let moved = log
            .move_matching(Bucket::DmInUnread, Bucket::DmInHandled, |e| {
                e.guid.parse::<u64>().map(|id| id <= 10).unwrap_or(false)
            })
            .unwrap();

        let moved_guids: Vec<&str> = moved.iter().map(|e| e.guid.as_str()).collect();
        assert_eq!(moved_guids, vec!["7", "10"]);
        assert!(moved.iter().all(|e| !e.unread));

        assert_eq!(log.list(Bucket::DmInUnread, Order::Asc).unwrap().len(), 1);
        assert_eq!(log.list(Bucket::DmInHandled, Order::Asc).unwrap().len(), 2);
    }

    #[test]
    fn move_matching_nothing_is_a_no_op() {
        let log = log();
        log.append(Bucket::DmInUnread, dm_in("7", "01/02 10:00", "msg"))
            .unwrap();
        let moved = log
            .move_matching(Bucket::DmInUnread, Bucket::DmInHandled, |_| false)
            .unwrap();
        assert!(moved.is_empty());
        assert_eq!(log.list(Bucket::DmInUnread, Order::Asc).unwrap().len(), 1);
    }

    #[test]
    fn clear_reports_count() {
        let log = log();
        log.append(Bucket::Events, dm_in("x", "01/02 10:00", "a")).unwrap();
        log.append(Bucket::Events, dm_in("y", "01/02 10:01", "b")).unwrap();

        assert_eq!(log.clear(Bucket::Events).unwrap(), 2);
        assert_eq!(log.clear(Bucket::Events).unwrap(), 0);
    }

    #[test]
    fn remove_scans_all_buckets() {
        let log = log();
        log.append(Bucket::DmOut, dm_in("out-1", "01/02 10:00", "sent"))
            .unwrap();

        assert!(log.remove("out-1").unwrap());
        assert!(!log.remove("out-1").unwrap());
        assert!(log.list(Bucket::DmOut, Order::Asc).unwrap().is_empty());
    }
}
