//! Private-message deduplication.
//!
//! The host re-delivers overlapping message batches, so acceptance is gated
//! by two ordering signals: the per-user cursor (`parsed_dm_in_up_to_log`)
//! and, for a first-ever fetch, the global watermark. Log ids are not
//! contiguous or ordered across conversations, which is why neither signal
//! alone suffices.
//!
//! A feed that keeps coming back empty is assumed desynchronized: after
//! three empty batches the cursor is forced back to 0 so the next fetch
//! replays full history. If the cursor is already 0 at that point the feed
//! is stuck for real, and the outcome says so instead of looping.

use roomwatch_shared::timestamp::orderable;
use roomwatch_shared::{LogItem, Uid, UserRecord};
use tracing::trace;

/// Empty batches tolerated before the cursor is reset.
const MAX_EMPTY_TRIES: u32 = 3;

/// Why a message was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Authored by ourselves: an echo of our own outgoing message.
    FromMyself,
    /// First-ever fetch and the message predates the global watermark.
    TooOld,
    /// At or below the cursor: already accepted in an earlier batch.
    AlreadyShown,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            RejectReason::FromMyself => "from myself",
            RejectReason::TooOld => "too old",
            RejectReason::AlreadyShown => "already shown",
        };
        write!(f, "{text}")
    }
}

/// Verdict for a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Accepted,
    Rejected(RejectReason),
}

/// Classify one message against the user's current cursor state.
///
/// Timestamp parse failures order as 0 and therefore reject as pre-watermark
/// on a first fetch; they never panic the classifier. Once the cursor is
/// non-zero the watermark no longer applies and only the log id decides.
pub fn classify(
    item: &LogItem,
    user: &UserRecord,
    self_uid: &Uid,
    watermark: &str,
) -> Classification {
    if item.user_id == self_uid.as_str() {
        return Classification::Rejected(RejectReason::FromMyself);
    }

    if user.parsed_dm_in_up_to_log == 0 && orderable(&item.log_date) < orderable(watermark) {
        return Classification::Rejected(RejectReason::TooOld);
    }

    if item.log_id <= user.parsed_dm_in_up_to_log {
        return Classification::Rejected(RejectReason::AlreadyShown);
    }

    Classification::Accepted
}

/// Result of running one batch through the dedup policy.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// The record with cursor and retry counter advanced. Persisting it is
    /// the caller's job (exactly once per batch).
    pub user: UserRecord,
    pub accepted: Vec<LogItem>,
    pub rejected: Vec<(LogItem, RejectReason)>,
    /// The feed produced nothing three times with the cursor already at 0.
    /// There is no further self-healing step; the caller should surface it.
    pub stalled: bool,
}

/// Classify a whole batch and advance the user's cursor state.
///
/// Every message is judged against the cursor as it stood when the batch
/// arrived; the cursor then jumps to the highest accepted log id (it never
/// decreases here). Zero accepted messages count one retry; the third retry
/// forces the cursor back to 0 unless it already is.
pub fn process_batch(
    items: Vec<LogItem>,
    mut user: UserRecord,
    self_uid: &Uid,
    watermark: &str,
) -> BatchOutcome {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    for item in items {
        match classify(&item, &user, self_uid, watermark) {
            Classification::Accepted => accepted.push(item),
            Classification::Rejected(reason) => {
                trace!(uid = %user.uid, log_id = item.log_id, %reason, "rejected message");
                rejected.push((item, reason));
            }
        }
    }

    let mut stalled = false;

    if accepted.is_empty() {
        user.no_new_private_dm_tries += 1;
        if user.no_new_private_dm_tries >= MAX_EMPTY_TRIES {
            if user.parsed_dm_in_up_to_log > 0 {
                // Desynchronized feed: replay full history on the next fetch.
                user.parsed_dm_in_up_to_log = 0;
            } else {
                stalled = true;
            }
        }
    } else {
        let max_id = accepted.iter().map(|i| i.log_id).max().unwrap_or(0);
        if max_id > user.parsed_dm_in_up_to_log {
            user.parsed_dm_in_up_to_log = max_id;
        }
        user.no_new_private_dm_tries = 0;
    }

    BatchOutcome {
        user,
        accepted,
        rejected,
        stalled,
    }
}
