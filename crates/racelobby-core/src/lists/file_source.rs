// ── File-backed list source ──
//
// One list file, one source. `recheck` re-reads the file when its
// modification time moved, diffs the records against the previous read
// and reconciles the shared store: dropped ids lose this origin, new ids
// gain it. Until a session has loaded the list, it only annotates
// entries that already exist.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::format::{self, ListInformation, ListRecord};
use crate::error::CoreError;
use crate::model::{ServerId, ServerRecord, SourceFlags};
use crate::source::{BatchSource, LoadProgress, ProgressSink, SourceIdentity};
use crate::store::ServerStore;

/// Key of the list whose entries are flagged as favourites.
pub const FAVOURITES_KEY: &str = "favourites";

#[derive(Debug, Default)]
struct FileState {
    information: ListInformation,
    records: Vec<ListRecord>,
    modified: Option<SystemTime>,
    exists: bool,
    loaded: bool,
}

/// What a `recheck` found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecheckOutcome {
    pub added: usize,
    pub removed: usize,
    pub information_changed: bool,
    /// The file appeared or disappeared.
    pub existence_changed: bool,
    /// `hidden` or `excluded` flipped.
    pub visibility_changed: bool,
}

impl RecheckOutcome {
    pub fn changed(&self) -> bool {
        self.added > 0 || self.removed > 0 || self.information_changed || self.existence_changed
    }
}

pub struct FileSource {
    key: String,
    path: PathBuf,
    store: Arc<ServerStore>,
    state: Mutex<FileState>,
    obsolete: watch::Sender<u64>,
    /// Set once a session fetched this list; from then on it owns origins.
    active: AtomicBool,
    io: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("key", &self.key)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileSource {
    pub fn new(key: impl Into<String>, path: impl Into<PathBuf>, store: Arc<ServerStore>) -> Self {
        let (obsolete, _) = watch::channel(0);
        Self {
            key: key.into(),
            path: path.into(),
            store,
            state: Mutex::new(FileState::default()),
            obsolete,
            active: AtomicBool::new(false),
            io: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn information(&self) -> ListInformation {
        self.lock_state().information.clone()
    }

    /// Records from the last read, in file order.
    pub fn records(&self) -> Vec<ListRecord> {
        self.lock_state().records.clone()
    }

    pub fn exists(&self) -> bool {
        self.lock_state().exists
    }

    pub fn contains(&self, id: &ServerId) -> bool {
        self.lock_state().records.iter().any(|r| &r.id == id)
    }

    /// Re-read the file if it changed (or unconditionally with `force`)
    /// and reconcile the shared store with the difference.
    pub async fn recheck(&self, force: bool) -> Result<RecheckOutcome, CoreError> {
        let _io = self.io.lock().await;
        self.recheck_locked(force).await
    }

    /// Append a record unless its id is already listed.
    pub async fn add(&self, record: ListRecord) -> Result<bool, CoreError> {
        let _io = self.io.lock().await;
        let changed = self
            .rewrite(|content| format::with_record_added(content, &record))
            .await?;
        if changed {
            info!(list = %self.key, id = %record.id, "added to list");
        }
        self.recheck_locked(true).await?;
        Ok(changed)
    }

    /// Remove every line listing `id`.
    pub async fn remove(&self, id: &ServerId) -> Result<bool, CoreError> {
        let _io = self.io.lock().await;
        let changed = self
            .rewrite(|content| format::with_record_removed(content, id))
            .await?;
        if changed {
            info!(list = %self.key, %id, "removed from list");
        }
        self.recheck_locked(true).await?;
        Ok(changed)
    }

    /// Flags this list stamps onto its entries.
    fn flags_for(&self, information: &ListInformation) -> SourceFlags {
        SourceFlags {
            lan: false,
            favourite: self.key == FAVOURITES_KEY,
            excluded: information.excluded,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, FileState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_obsolete(&self) {
        self.obsolete.send_modify(|n| *n += 1);
    }

    async fn read(&self) -> Result<(Option<SystemTime>, Option<String>), CoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let modified = tokio::fs::metadata(&self.path)
                    .await
                    .ok()
                    .and_then(|m| m.modified().ok());
                Ok((modified, Some(content)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok((None, None)),
            Err(e) => Err(CoreError::io(&self.path, e)),
        }
    }

    async fn modified(&self) -> Result<Option<SystemTime>, CoreError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.modified().ok()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoreError::io(&self.path, e)),
        }
    }

    async fn rewrite(
        &self,
        edit: impl FnOnce(&str) -> Option<String> + Send,
    ) -> Result<bool, CoreError> {
        let (_, content) = self.read().await?;
        let Some(updated) = edit(content.as_deref().unwrap_or_default()) else {
            return Ok(false);
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::io(parent, e))?;
        }
        tokio::fs::write(&self.path, updated)
            .await
            .map_err(|e| CoreError::io(&self.path, e))?;
        Ok(true)
    }

    async fn recheck_locked(&self, force: bool) -> Result<RecheckOutcome, CoreError> {
        if !force {
            let modified = self.modified().await?;
            let state = self.lock_state();
            if state.loaded && state.modified == modified && state.exists == modified.is_some() {
                return Ok(RecheckOutcome::default());
            }
        }

        let (modified, content) = self.read().await?;
        let exists = content.is_some();
        let parsed = format::parse_list(content.as_deref().unwrap_or_default());

        let (outcome, removed, added, flags_changed) = {
            let mut state = self.lock_state();
            let old_ids: HashSet<&ServerId> = state.records.iter().map(|r| &r.id).collect();
            let new_ids: HashSet<&ServerId> = parsed.records.iter().map(|r| &r.id).collect();

            let removed: Vec<ServerId> = state
                .records
                .iter()
                .filter(|r| !new_ids.contains(&r.id))
                .map(|r| r.id.clone())
                .collect();
            let added: Vec<ListRecord> = parsed
                .records
                .iter()
                .filter(|r| !old_ids.contains(&r.id))
                .cloned()
                .collect();

            let flags_changed =
                self.flags_for(&state.information) != self.flags_for(&parsed.information);
            let outcome = RecheckOutcome {
                added: added.len(),
                removed: removed.len(),
                information_changed: state.information != parsed.information,
                existence_changed: state.loaded && state.exists != exists,
                visibility_changed: state.loaded
                    && state.information.visibility_differs(&parsed.information),
            };

            state.information = parsed.information;
            state.records = parsed.records;
            state.modified = modified;
            state.exists = exists;
            state.loaded = true;

            (outcome, removed, added, flags_changed)
        };

        self.reconcile(&removed, &added, flags_changed);

        if outcome.changed() {
            debug!(list = %self.key, ?outcome, "list content changed");
        }
        if outcome.existence_changed || outcome.visibility_changed {
            self.notify_obsolete();
        }
        Ok(outcome)
    }

    fn reconcile(&self, removed: &[ServerId], added: &[ListRecord], flags_changed: bool) {
        let (information, records) = {
            let state = self.lock_state();
            (state.information.clone(), state.records.clone())
        };
        let flags = self.flags_for(&information);

        if self.active.load(Ordering::Acquire) {
            for id in removed {
                self.store.remove_origin(id, &self.key);
            }
            // Changed flags re-stamp every entry, not just the new ones.
            let to_merge: Vec<ServerRecord> = if flags_changed {
                records.iter().map(to_server_record).collect()
            } else {
                added.iter().map(to_server_record).collect()
            };
            if !to_merge.is_empty() {
                self.store.merge(&self.key, flags, &to_merge);
            }
        } else {
            for id in removed {
                self.store.remove_reference(id, &self.key);
            }
            let annotate = if flags_changed { &records[..] } else { added };
            for record in annotate {
                self.store.set_reference(&record.id, &self.key, flags);
            }
        }
    }
}

fn to_server_record(record: &ListRecord) -> ServerRecord {
    ServerRecord::from_id(record.id.clone(), record.display_name.clone())
}

impl SourceIdentity for FileSource {
    fn key(&self) -> &str {
        &self.key
    }

    fn display_name(&self) -> String {
        self.lock_state()
            .information
            .label
            .clone()
            .unwrap_or_else(|| self.key.clone())
    }

    fn flags(&self) -> SourceFlags {
        self.flags_for(&self.lock_state().information)
    }

    fn hidden(&self) -> bool {
        self.lock_state().information.hidden
    }

    fn subscribe_obsolete(&self) -> Option<watch::Receiver<u64>> {
        Some(self.obsolete.subscribe())
    }
}

#[async_trait]
impl BatchSource for FileSource {
    async fn fetch(
        &self,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<ServerRecord>>, CoreError> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        progress.progress(LoadProgress::message(format!("Reading {}", self.key)));
        {
            let _io = self.io.lock().await;
            // The session merges the full set itself; no incremental diff.
            self.active.store(false, Ordering::Release);
            self.recheck_locked(false).await?;
            self.active.store(true, Ordering::Release);
        }
        let records: Vec<ServerRecord> = self.records().iter().map(to_server_record).collect();
        progress.progress(LoadProgress::count(records.len(), Some(records.len())));
        Ok(Some(records))
    }
}
