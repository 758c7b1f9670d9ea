// ── Merge and membership logic ──
//
// Applies source output to the ServerStore. Existing entries are updated
// in place; unseen ids are created and appended as one batch. Removing
// the last origin of an entry drops it from the store.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use super::ServerStore;
use crate::error::CoreError;
use crate::model::{ServerEntry, ServerId, ServerRecord, SourceFlags};

/// What a single `merge` call did to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: usize,
    pub updated: usize,
}

impl ServerStore {
    /// Reconcile records from source `origin` into the store.
    ///
    /// Records with an id already present update that entry and re-stamp the
    /// origin. Unseen ids become new entries, inserted together so observers
    /// see one `Added` change per call. Duplicates within `records` collapse
    /// into one entry holding the latest values.
    pub fn merge(&self, origin: &str, flags: SourceFlags, records: &[ServerRecord]) -> MergeOutcome {
        let _guard = self.lock_membership();
        let mut outcome = MergeOutcome::default();
        let mut fresh: IndexMap<ServerId, Arc<ServerEntry>> = IndexMap::new();

        for record in records {
            if record.id.is_empty() {
                continue;
            }
            if let Some(existing) = self.entries.get(&record.id) {
                existing.update_from(record);
                existing.set_origin(origin, flags);
                outcome.updated += 1;
            } else if let Some(pending) = fresh.get(&record.id) {
                pending.update_from(record);
            } else {
                let entry = ServerEntry::from_record(record);
                entry.set_origin(origin, flags);
                fresh.insert(record.id.clone(), Arc::new(entry));
            }
        }

        outcome.added = self.entries.insert_batch(fresh.into_values().collect());
        if outcome.added > 0 || outcome.updated > 0 {
            debug!(
                source = %origin,
                added = outcome.added,
                updated = outcome.updated,
                "merged records"
            );
        }
        outcome
    }

    /// Remove `origin` from every entry it produced, dropping orphans.
    /// Returns the number of entries removed from the store.
    pub fn withdraw(&self, origin: &str) -> usize {
        let _guard = self.lock_membership();
        let orphans: Vec<ServerId> = self
            .snapshot()
            .iter()
            .filter(|e| e.with_state(|s| s.has_origin(origin)))
            .filter(|e| e.remove_origin(origin))
            .map(|e| e.id().clone())
            .collect();
        let removed = self.entries.remove_batch(&orphans).len();
        if removed > 0 {
            debug!(source = %origin, removed, "withdrew orphaned entries");
        }
        removed
    }

    /// Remove one origin from one entry. Returns `true` if the entry was dropped.
    pub fn remove_origin(&self, id: &ServerId, origin: &str) -> bool {
        let _guard = self.lock_membership();
        let Some(entry) = self.entries.get(id) else {
            return false;
        };
        if !entry.with_state(|s| s.is_referenced_by(origin)) {
            return false;
        }
        if entry.remove_origin(origin) {
            self.entries.remove_batch(std::slice::from_ref(id));
            return true;
        }
        false
    }

    /// Annotate an existing entry without claiming it. `false` if unknown.
    pub fn set_reference(&self, id: &ServerId, key: &str, flags: SourceFlags) -> bool {
        let _guard = self.lock_membership();
        self.entries
            .get(id)
            .is_some_and(|entry| {
                entry.set_reference(key, flags);
                true
            })
    }

    /// Drop an annotation. Origins are left alone.
    pub fn remove_reference(&self, id: &ServerId, key: &str) -> bool {
        let _guard = self.lock_membership();
        self.entries
            .get(id)
            .is_some_and(|entry| entry.remove_reference(key))
    }

    /// Track an entry that no source produced, under a synthetic origin.
    pub fn create_local(
        &self,
        record: &ServerRecord,
        origin: &str,
    ) -> Result<Arc<ServerEntry>, CoreError> {
        if origin.trim().is_empty() {
            return Err(CoreError::InvalidEntry {
                message: "locally created entries need an origin".into(),
            });
        }
        if record.id.is_empty() {
            return Err(CoreError::InvalidEntry {
                message: "empty server id".into(),
            });
        }
        self.merge(origin, SourceFlags::default(), std::slice::from_ref(record));
        self.entries.get(&record.id).ok_or_else(|| CoreError::InvalidEntry {
            message: format!("{} was removed while being created", record.id),
        })
    }
}
