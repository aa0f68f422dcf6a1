//! Core domain types persisted by the store and exchanged between the
//! differ, dedup engine and orchestrator.
//!
//! Records are serialized with camelCase keys so the stored JSON keeps the
//! field names the host page uses (`parsedDmInUpToLog`, `isLoggedIn`, ...).

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Uid
// ---------------------------------------------------------------------------

/// Stable remote identifier of a user on the host site.
///
/// Immutable once a record has been created under it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Uid(pub String);

impl Uid {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Uid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for Uid {
    fn default() -> Self {
        Self(String::new())
    }
}

// ---------------------------------------------------------------------------
// User record
// ---------------------------------------------------------------------------

/// One known remote user, as accumulated from roster scrapes and lookups.
///
/// Attribute fields are optional because a first observation may carry only
/// a subset; `is_logged_in` however is required once the user has been seen
/// in any roster diff -- reading it as `None` at that point is a merge
/// defect, which the ledger's filtered views report as an invariant error
/// instead of silently treating as logged-out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub uid: Uid,
    #[serde(default)]
    pub name: Option<String>,
    /// Avatar URL.
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_female: Option<bool>,
    #[serde(default)]
    pub rank: Option<i64>,
    #[serde(default)]
    pub age: Option<i64>,
    /// Country code.
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub is_logged_in: Option<bool>,
    /// Highest private-message log id already accepted for this user.
    /// 0 means no history has been parsed yet. Only ever increases, except
    /// on an explicit reset back to 0.
    #[serde(default)]
    pub parsed_dm_in_up_to_log: u64,
    /// Consecutive private-log fetches that accepted nothing. Reset to 0 by
    /// any accepted message.
    #[serde(default)]
    pub no_new_private_dm_tries: u32,
    #[serde(default = "default_true")]
    pub is_included_for_broadcast: bool,
}

fn default_true() -> bool {
    true
}

impl UserRecord {
    /// A fresh record carrying only the defaults every new user starts with.
    pub fn with_defaults(uid: Uid) -> Self {
        Self {
            uid,
            name: None,
            avatar: None,
            is_female: None,
            rank: None,
            age: None,
            country: None,
            is_logged_in: None,
            parsed_dm_in_up_to_log: 0,
            no_new_private_dm_tries: 0,
            is_included_for_broadcast: true,
        }
    }
}

// ---------------------------------------------------------------------------
// User patch
// ---------------------------------------------------------------------------

/// A partial update applied to a [`UserRecord`] with `{...old, ...patch}`
/// merge semantics: `None` fields leave the target untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    pub uid: Uid,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub is_female: Option<bool>,
    pub rank: Option<i64>,
    pub age: Option<i64>,
    pub country: Option<String>,
    pub is_logged_in: Option<bool>,
    pub parsed_dm_in_up_to_log: Option<u64>,
    pub no_new_private_dm_tries: Option<u32>,
    pub is_included_for_broadcast: Option<bool>,
}

impl UserPatch {
    pub fn new(uid: Uid) -> Self {
        Self {
            uid,
            ..Default::default()
        }
    }

    /// Merge every set field onto `target`. The uid is never overwritten.
    pub fn apply(&self, target: &mut UserRecord) {
        if let Some(v) = &self.name {
            target.name = Some(v.clone());
        }
        if let Some(v) = &self.avatar {
            target.avatar = Some(v.clone());
        }
        if let Some(v) = self.is_female {
            target.is_female = Some(v);
        }
        if let Some(v) = self.rank {
            target.rank = Some(v);
        }
        if let Some(v) = self.age {
            target.age = Some(v);
        }
        if let Some(v) = &self.country {
            target.country = Some(v.clone());
        }
        if let Some(v) = self.is_logged_in {
            target.is_logged_in = Some(v);
        }
        if let Some(v) = self.parsed_dm_in_up_to_log {
            target.parsed_dm_in_up_to_log = v;
        }
        if let Some(v) = self.no_new_private_dm_tries {
            target.no_new_private_dm_tries = v;
        }
        if let Some(v) = self.is_included_for_broadcast {
            target.is_included_for_broadcast = v;
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot user
// ---------------------------------------------------------------------------

/// One present user as reported by the external snapshot provider.
///
/// Everything beyond `uid` is best-effort: the provider scrapes host markup
/// and may legitimately miss fields. Missing optionals must never crash the
/// differ; an empty `uid` marks the whole entry malformed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotUser {
    pub uid: Uid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub is_female: Option<bool>,
    #[serde(default)]
    pub rank: Option<i64>,
    #[serde(default)]
    pub age: Option<i64>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub is_logged_in: Option<bool>,
}

// ---------------------------------------------------------------------------
// Activity log
// ---------------------------------------------------------------------------

/// What an activity-log entry records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LogKind {
    Event,
    Login,
    Logout,
    DmOut,
    DmIn,
}

/// One append-only activity-log entry.
///
/// `guid` is caller-supplied and unique within a bucket: for dm kinds it is
/// the remote log id, for everything else a random id. Entries are immutable
/// once written except for relocation between the unread and handled
/// buckets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Timestamp in `DD/MM HH:MM[:SS]` form.
    pub ts: String,
    pub kind: LogKind,
    /// Free text, may embed markup.
    pub content: String,
    pub uid: Uid,
    pub guid: String,
    /// Only meaningful for dm-in entries.
    #[serde(default)]
    pub unread: bool,
}

/// The five independently persisted, kind-partitioned log collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// Login/logout presence entries.
    Presence,
    /// Incoming private messages not yet covered by a reply.
    DmInUnread,
    /// Incoming private messages a reply has covered.
    DmInHandled,
    /// Outgoing private messages.
    DmOut,
    /// Everything else (attribute changes, diagnostics).
    Events,
}

impl Bucket {
    /// Storage key suffix under the application namespace.
    pub fn storage_key(self) -> &'static str {
        match self {
            Bucket::Presence => "activityLog_loginLogout",
            Bucket::DmInUnread => "activityLog_dmInUnread",
            Bucket::DmInHandled => "activityLog_dmInHandled",
            Bucket::DmOut => "activityLog_dmOut",
            Bucket::Events => "activityLog_events",
        }
    }

    pub fn all() -> [Bucket; 5] {
        [
            Bucket::Presence,
            Bucket::DmInUnread,
            Bucket::DmInHandled,
            Bucket::DmOut,
            Bucket::Events,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_merge_leaves_unset_fields_alone() {
        let mut record = UserRecord::with_defaults(Uid::from("5"));
        record.name = Some("Anna".into());
        record.is_logged_in = Some(true);

        let mut patch = UserPatch::new(Uid::from("5"));
        patch.age = Some(29);
        patch.apply(&mut record);

        assert_eq!(record.name.as_deref(), Some("Anna"));
        assert_eq!(record.age, Some(29));
        assert_eq!(record.is_logged_in, Some(true));
        assert!(record.is_included_for_broadcast);
    }

    #[test]
    fn record_round_trips_with_camel_case_keys() {
        let mut record = UserRecord::with_defaults(Uid::from("7"));
        record.parsed_dm_in_up_to_log = 42;

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"parsedDmInUpToLog\":42"));
        assert!(json.contains("\"isIncludedForBroadcast\":true"));

        let back: UserRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn snapshot_user_tolerates_missing_optionals() {
        let user: SnapshotUser = serde_json::from_str(r#"{"uid":"9"}"#).unwrap();
        assert_eq!(user.uid.as_str(), "9");
        assert!(user.name.is_none());
        assert!(user.is_logged_in.is_none());
    }

    #[test]
    fn bucket_keys_are_distinct() {
        let keys: std::collections::HashSet<_> =
            Bucket::all().iter().map(|b| b.storage_key()).collect();
        assert_eq!(keys.len(), 5);
    }
}
