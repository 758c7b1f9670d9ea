// ── Entry domain type ──
//
// A ServerEntry is created once per id and mutated in place for the rest
// of its life, so observers holding an `Arc<ServerEntry>` (or a watch
// receiver on its state) keep seeing the same object across reloads.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::id::{ServerAddress, ServerId};
use super::info::ServerInfo;
use super::record::ServerRecord;
use crate::error::{CoreError, NetworkErrorKind};

/// Errors kept per entry; older ones are dropped first.
const MAX_ENTRY_ERRORS: usize = 8;

/// Network state of an entry.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
pub enum EntryStatus {
    #[default]
    Unloaded,
    Loading,
    Ready,
    Error,
    MissingContent,
}

/// Semantic flags a source stamps onto the entries it lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceFlags {
    /// Found by LAN discovery.
    pub lan: bool,
    /// Listed in a favourites list.
    pub favourite: bool,
    /// Membership hides the entry.
    pub excluded: bool,
}

/// Everything observable about one entry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EntryState {
    pub status: EntryStatus,
    /// True once a complete record, not just an address, has been seen.
    pub fully_loaded: bool,
    pub address: Option<ServerAddress>,
    pub display_name: Option<String>,
    pub info: Option<ServerInfo>,
    pub ping_ms: Option<u64>,
    /// Source keys that directly produced this entry.
    pub origins: BTreeSet<String>,
    /// Origins plus sources that merely annotate the entry, with their flags.
    pub references: BTreeMap<String, SourceFlags>,
    /// References whose membership hides the entry.
    pub excluded_by: BTreeSet<String>,
    pub errors: Vec<String>,
    /// Set when the last probe failed for a network reason.
    pub ping_failed: Option<NetworkErrorKind>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl EntryState {
    pub fn name(&self) -> &str {
        self.display_name
            .as_deref()
            .or_else(|| self.info.as_ref().map(|i| i.name.as_str()))
            .unwrap_or_default()
    }

    pub fn drivers(&self) -> u32 {
        self.info.as_ref().map_or(0, |i| i.drivers)
    }

    pub fn is_lan(&self) -> bool {
        self.references.values().any(|f| f.lan)
    }

    pub fn is_favourite(&self) -> bool {
        self.references.values().any(|f| f.favourite)
    }

    pub fn is_excluded(&self) -> bool {
        !self.excluded_by.is_empty()
    }

    pub fn has_origin(&self, key: &str) -> bool {
        self.origins.contains(key)
    }

    pub fn is_referenced_by(&self, key: &str) -> bool {
        self.references.contains_key(key)
    }
}

/// One tracked remote server.
pub struct ServerEntry {
    id: ServerId,
    state: watch::Sender<EntryState>,
    updating: AtomicBool,
}

impl std::fmt::Debug for ServerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerEntry")
            .field("id", &self.id)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl ServerEntry {
    pub(crate) fn from_record(record: &ServerRecord) -> Self {
        let (state, _) = watch::channel(EntryState::default());
        let entry = Self {
            id: record.id.clone(),
            state,
            updating: AtomicBool::new(false),
        };
        entry.update_from(record);
        entry
    }

    pub fn id(&self) -> &ServerId {
        &self.id
    }

    /// Clone of the current state.
    pub fn state(&self) -> EntryState {
        self.state.borrow().clone()
    }

    /// Read the current state without cloning it.
    pub fn with_state<R>(&self, f: impl FnOnce(&EntryState) -> R) -> R {
        f(&self.state.borrow())
    }

    /// Receive every change to this entry.
    pub fn subscribe(&self) -> watch::Receiver<EntryState> {
        self.state.subscribe()
    }

    pub fn status(&self) -> EntryStatus {
        self.state.borrow().status
    }

    pub fn address(&self) -> Option<ServerAddress> {
        self.state.borrow().address.clone()
    }

    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::Acquire)
    }

    // ── Source-driven mutation ───────────────────────────────────────

    /// Refresh mutable fields from a source record. Membership is untouched.
    pub(crate) fn update_from(&self, record: &ServerRecord) {
        self.state.send_if_modified(|s| {
            let mut changed = false;
            if record.address.is_some() && s.address != record.address {
                s.address.clone_from(&record.address);
                changed = true;
            }
            if record.display_name.is_some() && s.display_name != record.display_name {
                s.display_name.clone_from(&record.display_name);
                changed = true;
            }
            if let Some(info) = &record.info {
                if s.info.as_ref() != Some(info) {
                    s.info = Some(info.clone());
                    changed = true;
                }
                if !s.fully_loaded {
                    s.fully_loaded = true;
                    changed = true;
                }
            }
            changed
        });
    }

    /// Mark `key` as an origin (and therefore a reference). Idempotent.
    pub(crate) fn set_origin(&self, key: &str, flags: SourceFlags) -> bool {
        self.state.send_if_modified(|s| {
            let added = s.origins.insert(key.to_owned());
            apply_reference(s, key, flags) || added
        })
    }

    /// Drop `key` from every membership set. Returns `true` if no origin remains.
    pub(crate) fn remove_origin(&self, key: &str) -> bool {
        self.state.send_if_modified(|s| {
            let a = s.origins.remove(key);
            let b = s.references.remove(key).is_some();
            let c = s.excluded_by.remove(key);
            a || b || c
        });
        self.state.borrow().origins.is_empty()
    }

    /// Annotate without claiming to have produced the entry.
    pub(crate) fn set_reference(&self, key: &str, flags: SourceFlags) -> bool {
        self.state.send_if_modified(|s| apply_reference(s, key, flags))
    }

    /// Remove an annotation. Origins keep their reference.
    pub(crate) fn remove_reference(&self, key: &str) -> bool {
        self.state.send_if_modified(|s| {
            if s.origins.contains(key) {
                return false;
            }
            let a = s.references.remove(key).is_some();
            let b = s.excluded_by.remove(key);
            a || b
        })
    }

    // ── Liveness mutation ────────────────────────────────────────────

    /// Claim the entry for a probe. `None` if another probe holds it.
    pub(crate) fn try_begin_update(&self) -> Option<UpdateGuard<'_>> {
        self.updating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| UpdateGuard { flag: &self.updating })
    }

    pub(crate) fn set_status(&self, status: EntryStatus) {
        self.state.send_if_modified(|s| {
            let changed = s.status != status;
            s.status = status;
            changed
        });
    }

    pub(crate) fn apply_probe(&self, info: ServerInfo, ping: Duration, missing_content: bool) {
        self.state.send_modify(|s| {
            if !info.name.is_empty() {
                s.display_name = Some(info.name.clone());
            }
            s.info = Some(info);
            s.fully_loaded = true;
            s.ping_ms = Some(u64::try_from(ping.as_millis()).unwrap_or(u64::MAX));
            s.status = if missing_content {
                EntryStatus::MissingContent
            } else {
                EntryStatus::Ready
            };
            s.errors.clear();
            s.ping_failed = None;
            s.last_updated = Some(Utc::now());
        });
    }

    pub(crate) fn record_failure(&self, err: &CoreError) {
        self.state.send_modify(|s| {
            s.status = EntryStatus::Error;
            s.ping_ms = None;
            s.ping_failed = err.network_kind();
            if s.errors.len() >= MAX_ENTRY_ERRORS {
                s.errors.remove(0);
            }
            s.errors.push(err.to_string());
            s.last_updated = Some(Utc::now());
        });
    }
}

fn apply_reference(s: &mut EntryState, key: &str, flags: SourceFlags) -> bool {
    let mut changed = s.references.insert(key.to_owned(), flags) != Some(flags);
    changed |= if flags.excluded {
        s.excluded_by.insert(key.to_owned())
    } else {
        s.excluded_by.remove(key)
    };
    changed
}

/// Holds an entry's "updating" flag; releases it on drop.
pub(crate) struct UpdateGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
