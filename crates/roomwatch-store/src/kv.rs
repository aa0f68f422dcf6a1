//! Namespaced key/value substrate.
//!
//! [`KvStore`] wraps any [`KvBackend`] with an application namespace, typed
//! JSON accessors, and a write-through in-memory cache. The cache is what
//! lets the tri-state [`WriteMode`] work: in [`WriteMode::Block`] every
//! write still lands in the cache, so the higher layers keep functioning
//! in-memory while the durable backend is left untouched.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;

/// A [`KvStore`] shared between the ledger, the activity log and the
/// watermark, so all of them persist through one substrate handle.
pub type SharedStore = Arc<Mutex<KvStore>>;

/// Storage write policy, decided once at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Normal operation: writes reach the backend.
    Allow,
    /// Backend is wiped at open, then behaves as [`WriteMode::Allow`].
    WipeOnLoad,
    /// Backend writes are silently discarded; the session runs on the
    /// in-memory cache only.
    Block,
}

/// Minimal contract a durable backend must provide. Keys are full
/// (namespaced) strings, values are JSON text.
pub trait KvBackend: Send {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    fn has(&self, key: &str) -> Result<bool>;
    fn remove(&mut self, key: &str) -> Result<()>;
    /// Drop every key in the backend.
    fn wipe(&mut self) -> Result<()>;
}

/// Purely in-memory backend, used in tests and wherever durability is not
/// wanted.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    map: HashMap<String, String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.map.contains_key(key))
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }

    fn wipe(&mut self) -> Result<()> {
        self.map.clear();
        Ok(())
    }
}

/// Namespaced, cached view over a [`KvBackend`].
pub struct KvStore {
    backend: Box<dyn KvBackend>,
    cache: HashMap<String, String>,
    /// Keys removed this session. Needed so a blocked-mode removal does not
    /// resurrect from the untouched backend on the next read.
    removed: HashSet<String>,
    namespace: String,
    mode: WriteMode,
}

impl KvStore {
    /// Open a store over `backend` with every key prefixed by `namespace`.
    ///
    /// [`WriteMode::WipeOnLoad`] clears the backend here, before any read.
    pub fn open(namespace: &str, mode: WriteMode, mut backend: Box<dyn KvBackend>) -> Result<Self> {
        if mode == WriteMode::WipeOnLoad {
            info!(namespace, "wiping storage backend on load");
            backend.wipe()?;
        }
        Ok(Self {
            backend,
            cache: HashMap::new(),
            removed: HashSet::new(),
            namespace: namespace.to_string(),
            mode,
        })
    }

    /// Store over a fresh [`MemoryBackend`] in [`WriteMode::Allow`].
    pub fn in_memory(namespace: &str) -> Self {
        Self {
            backend: Box::new(MemoryBackend::new()),
            cache: HashMap::new(),
            removed: HashSet::new(),
            namespace: namespace.to_string(),
            mode: WriteMode::Allow,
        }
    }

    /// Wrap a store for sharing between the typed stores.
    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}.{}", self.namespace, key)
    }

    /// Raw get. Reads through the cache; a backend hit is cached.
    pub fn get(&mut self, key: &str) -> Result<Option<String>> {
        let full = self.full_key(key);
        if let Some(v) = self.cache.get(&full) {
            return Ok(Some(v.clone()));
        }
        if self.removed.contains(&full) {
            return Ok(None);
        }
        match self.backend.get(&full)? {
            Some(v) => {
                self.cache.insert(full, v.clone());
                Ok(Some(v))
            }
            None => Ok(None),
        }
    }

    /// Raw set. The cache always takes the value; the backend only when the
    /// mode allows it.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let full = self.full_key(key);
        self.removed.remove(&full);
        self.cache.insert(full.clone(), value.to_string());
        match self.mode {
            WriteMode::Block => {
                debug!(key = %full, "write blocked, kept in cache only");
                Ok(())
            }
            WriteMode::Allow | WriteMode::WipeOnLoad => self.backend.set(&full, value),
        }
    }

    pub fn has(&mut self, key: &str) -> Result<bool> {
        let full = self.full_key(key);
        if self.cache.contains_key(&full) {
            return Ok(true);
        }
        if self.removed.contains(&full) {
            return Ok(false);
        }
        self.backend.has(&full)
    }

    pub fn remove(&mut self, key: &str) -> Result<()> {
        let full = self.full_key(key);
        self.cache.remove(&full);
        self.removed.insert(full.clone());
        match self.mode {
            WriteMode::Block => Ok(()),
            WriteMode::Allow | WriteMode::WipeOnLoad => self.backend.remove(&full),
        }
    }

    /// Typed get via JSON.
    pub fn get_json<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Typed set via JSON.
    pub fn set_json<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw)
    }
}
