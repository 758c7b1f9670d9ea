// ── Shared entry collection ──
//
// Concurrent storage with O(1) lookups, a copy-on-write snapshot for
// readers iterating while sources merge, and batched change events.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, watch};

use crate::model::{ServerEntry, ServerId};

const CHANGE_CHANNEL_SIZE: usize = 256;

/// Structural change to the collection, one event per batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionChange {
    Added(Vec<ServerId>),
    Removed(Vec<ServerId>),
}

/// Entry storage keyed by `ServerId`.
///
/// Entries are stored as `Arc<ServerEntry>` and never replaced: mutation
/// happens inside the entry. Structural changes rebuild the snapshot that
/// subscribers receive and emit a single `CollectionChange`.
pub(crate) struct EntryCollection {
    by_id: DashMap<ServerId, Arc<ServerEntry>>,

    /// Version counter, bumped on every structural change.
    version: watch::Sender<u64>,

    /// Full snapshot sorted by id, rebuilt on structural change.
    snapshot: watch::Sender<Arc<Vec<Arc<ServerEntry>>>>,

    changes: broadcast::Sender<CollectionChange>,
}

impl EntryCollection {
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_SIZE);

        Self {
            by_id: DashMap::new(),
            version,
            snapshot,
            changes,
        }
    }

    /// Append entries whose ids are not present yet. Returns how many were added.
    pub(crate) fn insert_batch(&self, entries: Vec<Arc<ServerEntry>>) -> usize {
        let mut added = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = entry.id().clone();
            if let dashmap::Entry::Vacant(slot) = self.by_id.entry(id.clone()) {
                slot.insert(entry);
                added.push(id);
            }
        }
        let count = added.len();
        if count > 0 {
            self.publish(CollectionChange::Added(added));
        }
        count
    }

    /// Remove entries by id. Returns the removed entries.
    pub(crate) fn remove_batch(&self, ids: &[ServerId]) -> Vec<Arc<ServerEntry>> {
        let removed: Vec<Arc<ServerEntry>> = ids
            .iter()
            .filter_map(|id| self.by_id.remove(id).map(|(_, v)| v))
            .collect();
        if !removed.is_empty() {
            let ids = removed.iter().map(|e| e.id().clone()).collect();
            self.publish(CollectionChange::Removed(ids));
        }
        removed
    }

    pub(crate) fn get(&self, id: &ServerId) -> Option<Arc<ServerEntry>> {
        self.by_id.get(id).map(|r| Arc::clone(r.value()))
    }

    pub(crate) fn contains(&self, id: &ServerId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<ServerEntry>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes via a `watch::Receiver`.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<ServerEntry>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn subscribe_changes(&self) -> broadcast::Receiver<CollectionChange> {
        self.changes.subscribe()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    pub(crate) fn version(&self) -> u64 {
        *self.version.borrow()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn publish(&self, change: CollectionChange) {
        let mut values: Vec<Arc<ServerEntry>> =
            self.by_id.iter().map(|r| Arc::clone(r.value())).collect();
        values.sort_by(|a, b| a.id().cmp(b.id()));
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
        self.version.send_modify(|v| *v += 1);
        // No receivers is fine: the snapshot channel already carries the state.
        let _ = self.changes.send(change);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::ServerRecord;

    fn entry(id: &str) -> Arc<ServerEntry> {
        Arc::new(ServerEntry::from_record(&ServerRecord::from_id(
            ServerId::new(id),
            None,
        )))
    }

    #[test]
    fn insert_batch_skips_existing_ids() {
        let col = EntryCollection::new();
        assert_eq!(col.insert_batch(vec![entry("a"), entry("b")]), 2);
        let original = col.get(&ServerId::new("a")).unwrap();

        assert_eq!(col.insert_batch(vec![entry("a"), entry("c")]), 1);
        assert_eq!(col.len(), 3);
        // The first instance is kept, never replaced.
        assert!(Arc::ptr_eq(&original, &col.get(&ServerId::new("a")).unwrap()));
    }

    #[test]
    fn one_event_and_version_bump_per_batch() {
        let col = EntryCollection::new();
        let mut changes = col.subscribe_changes();

        col.insert_batch(vec![entry("a"), entry("b"), entry("c")]);
        assert_eq!(col.version(), 1);
        assert_eq!(
            changes.try_recv().unwrap(),
            CollectionChange::Added(vec![
                ServerId::new("a"),
                ServerId::new("b"),
                ServerId::new("c")
            ])
        );
        assert!(changes.try_recv().is_err());

        col.remove_batch(&[ServerId::new("a"), ServerId::new("zzz")]);
        assert_eq!(col.version(), 2);
        assert_eq!(
            changes.try_recv().unwrap(),
            CollectionChange::Removed(vec![ServerId::new("a")])
        );
    }

    #[test]
    fn snapshot_is_sorted_and_isolated_from_later_changes() {
        let col = EntryCollection::new();
        col.insert_batch(vec![entry("b"), entry("a")]);
        let snap = col.snapshot();
        assert_eq!(snap[0].id().as_str(), "a");

        col.remove_batch(&[ServerId::new("a")]);
        assert_eq!(snap.len(), 2);
        assert_eq!(col.snapshot().len(), 1);
    }

    #[test]
    fn removing_unknown_ids_is_silent() {
        let col = EntryCollection::new();
        assert!(col.remove_batch(&[ServerId::new("nope")]).is_empty());
        assert_eq!(col.version(), 0);
    }
}
