//! Roster differ.
//!
//! Given the freshly scraped roster and the prior ledger state, computes
//! the minimal patch batch: brand-new logins, attribute changes, and
//! logouts for everyone who vanished from the roster. The differ only
//! computes; applying patches and emitting log entries is the
//! orchestrator's job, which lets an initial page load seed the ledger
//! without spamming presence events.

use std::collections::{HashMap, HashSet};

use roomwatch_shared::{LogKind, SnapshotUser, Uid, UserPatch, UserRecord};
use tracing::warn;

use crate::error::Result;
use roomwatch_store::UserLedger;

/// How one user's presence changed between two roster scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterChangeKind {
    /// Seen in the snapshot with no prior ledger record.
    NewLogin,
    /// Known record with at least one differing attribute (which may be the
    /// logged-in flag coming back on).
    Updated,
    /// Known logged-in record absent from the snapshot.
    Logout,
}

/// One human-readable change line, tagged with the log kind it should be
/// recorded under (login and logout lines go to the presence bucket,
/// attribute changes to the event bucket).
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub kind: LogKind,
    pub text: String,
}

/// One user's computed diff: the ledger patch to apply plus human-readable
/// change lines for the activity log.
#[derive(Debug, Clone)]
pub struct RosterPatch {
    pub kind: RosterChangeKind,
    pub patch: UserPatch,
    pub changes: Vec<Change>,
}

/// Gender-split login/logout counts for summary reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RosterSummary {
    pub female_logins: u32,
    pub other_logins: u32,
    pub female_logouts: u32,
    pub other_logouts: u32,
}

/// Output of one roster diff.
#[derive(Debug, Clone, Default)]
pub struct RosterDiff {
    pub patches: Vec<RosterPatch>,
    pub summary: RosterSummary,
}

/// Diff the current snapshot against the ledger's known logged-in set.
///
/// Snapshot entries without a uid are skipped with a warning; they reflect
/// provider scrape glitches, not a reason to abort the scan.
pub fn diff(snapshot: &[SnapshotUser], ledger: &UserLedger) -> Result<RosterDiff> {
    // Everyone we believed present, until the scan proves otherwise.
    let mut still_present: HashMap<Uid, UserRecord> = ledger
        .all_logged_in()?
        .into_iter()
        .map(|u| (u.uid.clone(), u))
        .collect();

    let mut result = RosterDiff::default();
    let mut scanned: HashSet<&Uid> = HashSet::new();

    for seen in snapshot {
        if seen.uid.is_empty() {
            warn!(name = ?seen.name, "skipping snapshot entry without uid");
            continue;
        }
        // The provider occasionally scrapes one user twice; the first entry
        // wins, a second would diff against pre-batch state.
        if !scanned.insert(&seen.uid) {
            warn!(uid = %seen.uid, "skipping duplicate snapshot entry");
            continue;
        }

        still_present.remove(&seen.uid);

        let patch = snapshot_to_patch(seen);
        match ledger.get(&seen.uid)? {
            None => {
                let is_female = patch.is_female == Some(true);
                result.patches.push(RosterPatch {
                    kind: RosterChangeKind::NewLogin,
                    changes: vec![login_line(display_name(seen, None))],
                    patch,
                });
                if is_female {
                    result.summary.female_logins += 1;
                } else {
                    result.summary.other_logins += 1;
                }
            }
            Some(known) => {
                let changes = describe_changes(seen, &known, &patch);
                if changes.is_empty() {
                    continue;
                }
                if known.is_logged_in != Some(true) {
                    let female = patch.is_female.or(known.is_female) == Some(true);
                    if female {
                        result.summary.female_logins += 1;
                    } else {
                        result.summary.other_logins += 1;
                    }
                }
                result.patches.push(RosterPatch {
                    kind: RosterChangeKind::Updated,
                    patch,
                    changes,
                });
            }
        }
    }

    // Whoever is left did not appear in the snapshot: logged out.
    for (uid, known) in still_present {
        let mut patch = UserPatch::new(uid);
        patch.is_logged_in = Some(false);

        let name = known
            .name
            .clone()
            .unwrap_or_else(|| known.uid.0.clone());
        result.patches.push(RosterPatch {
            kind: RosterChangeKind::Logout,
            patch,
            changes: vec![Change {
                kind: LogKind::Logout,
                text: format!("{name} has logged out"),
            }],
        });
        if known.is_female == Some(true) {
            result.summary.female_logouts += 1;
        } else {
            result.summary.other_logouts += 1;
        }
    }

    Ok(result)
}

/// Turn a snapshot entry into a full observation patch with
/// `is_logged_in = true`.
fn snapshot_to_patch(seen: &SnapshotUser) -> UserPatch {
    let mut patch = UserPatch::new(seen.uid.clone());
    patch.name = seen.name.clone();
    patch.avatar = seen.avatar.clone();
    patch.is_female = seen
        .is_female
        .or_else(|| seen.gender.as_deref().map(|g| g.eq_ignore_ascii_case("female")));
    patch.rank = seen.rank;
    patch.age = seen.age;
    patch.country = seen.country.clone();
    patch.is_logged_in = Some(true);
    patch
}

fn display_name<'a>(seen: &'a SnapshotUser, known: Option<&'a UserRecord>) -> &'a str {
    seen.name
        .as_deref()
        .or_else(|| known.and_then(|k| k.name.as_deref()))
        .unwrap_or(seen.uid.as_str())
}

fn login_line(name: &str) -> Change {
    Change {
        kind: LogKind::Login,
        text: format!("{name} has logged in"),
    }
}

/// Field-by-field comparison between what the snapshot shows and what the
/// ledger knows. Only fields the snapshot actually carries participate; a
/// provider that failed to scrape the age must not read as "age changed".
fn describe_changes(seen: &SnapshotUser, known: &UserRecord, patch: &UserPatch) -> Vec<Change> {
    let name = display_name(seen, Some(known)).to_string();
    let mut changes = Vec::new();

    // Coming back online is a login, not a generic field change.
    if known.is_logged_in != Some(true) {
        changes.push(login_line(&name));
    }

    push_change(&mut changes, &name, "name", &known.name, &patch.name);
    push_change(&mut changes, &name, "avatar", &known.avatar, &patch.avatar);
    push_change(&mut changes, &name, "age", &known.age, &patch.age);
    push_change(&mut changes, &name, "country", &known.country, &patch.country);
    push_change(&mut changes, &name, "rank", &known.rank, &patch.rank);
    push_change(&mut changes, &name, "gender", &known.is_female, &patch.is_female);

    changes
}

fn push_change<T: PartialEq + std::fmt::Display>(
    changes: &mut Vec<Change>,
    name: &str,
    field: &str,
    old: &Option<T>,
    new: &Option<T>,
) {
    if let Some(new) = new {
        if old.as_ref() != Some(new) {
            let old_text = old
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            changes.push(Change {
                kind: LogKind::Event,
                text: format!("{name} has changed {field} ({old_text} → {new})"),
            });
        }
    }
}
