// ── Source registry ──
//
// The table of known sources, constructed once and passed around.
// Registration order is kept; packs built over "all sources" follow it.

use std::sync::{PoisonError, RwLock};

use indexmap::IndexMap;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::source::Source;

pub struct SourceRegistry {
    sources: RwLock<IndexMap<String, Source>>,
    generation: watch::Sender<u64>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            sources: RwLock::new(IndexMap::new()),
            generation,
        }
    }

    /// Add a source under its key.
    ///
    /// Re-registering the same source object is a no-op; a different
    /// source under a taken key is ignored with a warning. Returns `true`
    /// if the table changed.
    pub fn register(&self, source: Source) -> bool {
        let key = source.key().to_owned();
        {
            let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = sources.get(&key) {
                if !existing.same_as(&source) {
                    warn!(source = %key, "a different source is already registered under this key");
                }
                return false;
            }
            sources.insert(key.clone(), source);
        }
        debug!(source = %key, "source registered");
        self.bump();
        true
    }

    pub fn unregister(&self, key: &str) -> Option<Source> {
        let removed = self
            .sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(key);
        if removed.is_some() {
            debug!(source = %key, "source unregistered");
            self.bump();
        }
        removed
    }

    pub fn get(&self, key: &str) -> Option<Source> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Keys in registration order.
    pub fn keys(&self) -> Vec<String> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Every registered source in registration order.
    pub fn sources(&self) -> Vec<Source> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sources.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bumped on every register/unregister.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    fn bump(&self) {
        self.generation.send_modify(|g| *g += 1);
    }
}
