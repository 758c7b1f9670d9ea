// ── Central entry store ──
//
// Every source session merges into one ServerStore; the liveness
// scheduler and observers read from it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch};

use super::collection::{CollectionChange, EntryCollection};
use super::stream::{EntrySnapshot, EntryStream};
use crate::model::{EntryStatus, ServerEntry, ServerId};

/// Shared collection of tracked servers.
///
/// Lookups and iteration never block. Operations that change which
/// entries exist, or who claims them, are serialised by an internal
/// membership lock so that "last origin removed" and "entry dropped"
/// happen as one step.
pub struct ServerStore {
    pub(super) entries: EntryCollection,
    membership: Mutex<()>,
}

impl Default for ServerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerStore {
    pub fn new() -> Self {
        Self {
            entries: EntryCollection::new(),
            membership: Mutex::new(()),
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, id: &ServerId) -> Option<Arc<ServerEntry>> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &ServerId) -> bool {
        self.entries.contains(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() == 0
    }

    /// Every entry, sorted by id.
    pub fn snapshot(&self) -> EntrySnapshot {
        self.entries.snapshot()
    }

    /// Entries that have been probed at least once (status left `Unloaded`).
    pub fn pinged_count(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|e| e.status() != EntryStatus::Unloaded)
            .count()
    }

    /// Entries that list `key` among their origins.
    pub fn origin_count(&self, key: &str) -> usize {
        self.snapshot()
            .iter()
            .filter(|e| e.with_state(|s| s.has_origin(key)))
            .count()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe(&self) -> EntryStream {
        EntryStream::new(self.entries.subscribe())
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<EntrySnapshot> {
        self.entries.subscribe()
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<CollectionChange> {
        self.entries.subscribe_changes()
    }

    /// Bumped on every structural change.
    pub fn version(&self) -> u64 {
        self.entries.version()
    }

    pub(super) fn lock_membership(&self) -> MutexGuard<'_, ()> {
        self.membership.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
