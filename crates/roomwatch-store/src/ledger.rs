//! The user ledger: one merge-on-write record per remote user.
//!
//! The whole collection lives under the `users` key as a single JSON array,
//! so `set` and `bulk_patch` are each exactly one substrate write and a
//! reader never sees a half-applied batch.

use roomwatch_shared::{Uid, UserPatch, UserRecord};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::kv::SharedStore;

const USERS_KEY: &str = "users";

/// Merge-on-write store of [`UserRecord`]s.
#[derive(Clone)]
pub struct UserLedger {
    store: SharedStore,
}

impl UserLedger {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    fn load(&self) -> Result<Vec<UserRecord>> {
        let mut store = self.store.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(store.get_json(USERS_KEY)?.unwrap_or_default())
    }

    fn save(&self, users: &[UserRecord]) -> Result<()> {
        let mut store = self.store.lock().map_err(|_| StoreError::LockPoisoned)?;
        store.set_json(USERS_KEY, &users)
    }

    /// Look up one record.
    pub fn get(&self, uid: &Uid) -> Result<Option<UserRecord>> {
        Ok(self.load()?.into_iter().find(|u| &u.uid == uid))
    }

    /// Merge `patch` onto the existing record (or onto fresh defaults if the
    /// uid is unseen), persist, and return the merged record.
    pub fn set(&self, patch: &UserPatch) -> Result<UserRecord> {
        if patch.uid.is_empty() {
            return Err(StoreError::MissingUid);
        }

        let mut users = self.load()?;
        let merged = merge_into(&mut users, patch);
        let merged = merged.clone();
        self.save(&users)?;
        Ok(merged)
    }

    /// Apply a whole batch of patches with a single persistence write.
    ///
    /// Patches without a uid are skipped with a warning rather than failing
    /// the batch.
    pub fn bulk_patch(&self, patches: &[UserPatch]) -> Result<()> {
        let mut users = self.load()?;
        let mut applied = 0usize;

        for patch in patches {
            if patch.uid.is_empty() {
                warn!("skipping patch without uid");
                continue;
            }
            merge_into(&mut users, patch);
            applied += 1;
        }

        debug!(applied, total = patches.len(), "bulk patch");
        self.save(&users)
    }

    /// All records currently marked logged-in.
    ///
    /// Errors on any record whose `is_logged_in` was never set: that means a
    /// merge elsewhere dropped the flag, and treating it as logged-out would
    /// hide the defect.
    pub fn all_logged_in(&self) -> Result<Vec<UserRecord>> {
        let mut logged_in = Vec::new();
        for user in self.load()? {
            match user.is_logged_in {
                Some(true) => logged_in.push(user),
                Some(false) => {}
                None => return Err(StoreError::LoggedInUnset(user.uid)),
            }
        }
        Ok(logged_in)
    }

    /// Logged-in records flagged female.
    pub fn all_logged_in_females(&self) -> Result<Vec<UserRecord>> {
        Ok(self
            .all_logged_in()?
            .into_iter()
            .filter(|u| u.is_female == Some(true))
            .collect())
    }

    /// Hard-delete one record. Returns whether it existed.
    pub fn remove(&self, uid: &Uid) -> Result<bool> {
        let mut users = self.load()?;
        let before = users.len();
        users.retain(|u| &u.uid != uid);
        let removed = users.len() < before;
        if removed {
            self.save(&users)?;
        }
        Ok(removed)
    }

    /// Flip the broadcast inclusion flag on an existing record.
    pub fn include_for_broadcast(&self, uid: &Uid, included: bool) -> Result<UserRecord> {
        let mut users = self.load()?;
        let user = users
            .iter_mut()
            .find(|u| &u.uid == uid)
            .ok_or_else(|| StoreError::NotFound(uid.clone()))?;
        user.is_included_for_broadcast = included;
        let user = user.clone();
        self.save(&users)?;
        Ok(user)
    }
}

/// Merge one patch into the collection, appending a defaults-based record
/// for an unseen uid. Returns the merged record.
fn merge_into<'a>(users: &'a mut Vec<UserRecord>, patch: &UserPatch) -> &'a UserRecord {
    let idx = match users.iter().position(|u| u.uid == patch.uid) {
        Some(idx) => idx,
        None => {
            users.push(UserRecord::with_defaults(patch.uid.clone()));
            users.len() - 1
        }
    };
    patch.apply(&mut users[idx]);
    &users[idx]
}
