//! The global first-fetch watermark.
//!
//! A single timestamp under `global.watermark`: the earliest stamp a
//! first-ever fetch for a conversation will treat as new. Initialized once
//! to "now" and never silently overwritten afterwards.

use roomwatch_shared::timestamp::now_stamp;
use tracing::info;

use crate::error::{Result, StoreError};
use crate::kv::SharedStore;

const WATERMARK_KEY: &str = "global.watermark";

#[derive(Clone)]
pub struct Watermark {
    store: SharedStore,
}

impl Watermark {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// The stored watermark, if one has been initialized.
    pub fn get(&self) -> Result<Option<String>> {
        let mut store = self.store.lock().map_err(|_| StoreError::LockPoisoned)?;
        store.get_json(WATERMARK_KEY)
    }

    /// Return the watermark, initializing it to the current time on first
    /// use. Subsequent calls always return the stored value.
    pub fn ensure(&self) -> Result<String> {
        let mut store = self.store.lock().map_err(|_| StoreError::LockPoisoned)?;
        if let Some(existing) = store.get_json::<String>(WATERMARK_KEY)? {
            return Ok(existing);
        }
        let now = now_stamp();
        info!(watermark = %now, "initializing global watermark");
        store.set_json(WATERMARK_KEY, &now)?;
        Ok(now)
    }

    /// Explicitly overwrite the watermark. This is the only way the value
    /// changes after initialization.
    pub fn force_set(&self, ts: &str) -> Result<()> {
        let mut store = self.store.lock().map_err(|_| StoreError::LockPoisoned)?;
        info!(watermark = %ts, "overriding global watermark");
        store.set_json(WATERMARK_KEY, &ts.to_string())
    }
}
