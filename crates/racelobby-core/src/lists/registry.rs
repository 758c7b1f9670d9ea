// ── File-backed list registry ──
//
// Tracks one FileSource per list file under a root directory. A rescan
// enumerates the directory, rechecks known lists, creates sources for new
// files and parks sources whose file vanished in a bounded "missing"
// table, so a file that comes back gets its old source object back.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use indexmap::IndexMap;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::file_source::FileSource;
use crate::error::CoreError;
use crate::source::SourceIdentity;
use crate::store::ServerStore;

const WATCH_CHANNEL_SIZE: usize = 64;

#[derive(Default)]
struct ListTable {
    known: IndexMap<String, Arc<FileSource>>,
    missing: IndexMap<String, Arc<FileSource>>,
}

/// Keys added and removed by one rescan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescanOutcome {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Lists whose content changed.
    pub changed: Vec<String>,
}

impl RescanOutcome {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

pub struct FileListRegistry {
    root: PathBuf,
    extension: String,
    missing_cap: usize,
    store: Arc<ServerStore>,
    table: Mutex<ListTable>,
    generation: watch::Sender<u64>,
    rescan_lock: tokio::sync::Mutex<()>,
}

impl FileListRegistry {
    pub fn new(
        root: impl Into<PathBuf>,
        extension: impl Into<String>,
        missing_cap: usize,
        store: Arc<ServerStore>,
    ) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            root: root.into(),
            extension: extension.into().trim_start_matches('.').to_owned(),
            missing_cap,
            store,
            table: Mutex::new(ListTable::default()),
            generation,
            rescan_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, key: &str) -> Option<Arc<FileSource>> {
        self.lock_table().known.get(key).cloned()
    }

    /// Known lists in discovery order.
    pub fn lists(&self) -> Vec<Arc<FileSource>> {
        self.lock_table().known.values().cloned().collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock_table().known.keys().cloned().collect()
    }

    /// Lists whose file vanished but whose source is kept for resurrection.
    pub fn parked_keys(&self) -> Vec<String> {
        self.lock_table().missing.keys().cloned().collect()
    }

    /// Bumped once per rescan that changed anything.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Path a list with `key` lives at.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in key.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path.set_extension(&self.extension);
        path
    }

    /// The list for `key`, creating its source (not its file) if unknown.
    pub fn get_or_create(&self, key: &str) -> Arc<FileSource> {
        let key = key.to_lowercase();
        let source = {
            let mut table = self.lock_table();
            if let Some(source) = table.known.get(&key) {
                return Arc::clone(source);
            }
            let source = table.missing.shift_remove(&key).unwrap_or_else(|| {
                Arc::new(FileSource::new(
                    key.clone(),
                    self.path_for(&key),
                    Arc::clone(&self.store),
                ))
            });
            table.known.insert(key.clone(), Arc::clone(&source));
            source
        };
        debug!(list = %key, "list created");
        self.bump();
        source
    }

    /// Re-enumerate the root and reconcile known lists against it.
    pub async fn rescan(&self) -> Result<RescanOutcome, CoreError> {
        let _guard = self.rescan_lock.lock().await;
        let found = self.enumerate().await?;

        let mut outcome = RescanOutcome::default();
        let mut recheck = Vec::with_capacity(found.len());
        let mut evicted = Vec::new();
        {
            let mut table = self.lock_table();
            for (key, path) in &found {
                if let Some(source) = table.known.get(key) {
                    recheck.push((Arc::clone(source), false));
                    continue;
                }
                let source = match table.missing.shift_remove(key) {
                    Some(source) => {
                        debug!(list = %key, "list resurrected");
                        source
                    }
                    None => Arc::new(FileSource::new(
                        key.clone(),
                        path.clone(),
                        Arc::clone(&self.store),
                    )),
                };
                table.known.insert(key.clone(), Arc::clone(&source));
                outcome.added.push(key.clone());
                recheck.push((source, true));
            }

            let gone: Vec<String> = table
                .known
                .keys()
                .filter(|k| !found.contains_key(*k))
                .cloned()
                .collect();
            for key in gone {
                if let Some(source) = table.known.shift_remove(&key) {
                    // Created through `get_or_create` but never written yet.
                    if !source.exists() && source.records().is_empty() {
                        table.known.insert(key, source);
                        continue;
                    }
                    table.missing.insert(key.clone(), Arc::clone(&source));
                    outcome.removed.push(key);
                    evicted.push(source);
                }
            }
            while table.missing.len() > self.missing_cap {
                table.missing.shift_remove_index(0);
            }
        }

        for (source, force) in recheck.into_iter().chain(evicted.into_iter().map(|s| (s, true))) {
            match source.recheck(force).await {
                Ok(result) if result.changed() => outcome.changed.push(source.key().to_owned()),
                Ok(_) => {}
                Err(e) => warn!(list = %source.key().to_owned(), error = %e, "list recheck failed"),
            }
        }

        if !outcome.is_empty() {
            debug!(
                added = outcome.added.len(),
                removed = outcome.removed.len(),
                changed = outcome.changed.len(),
                "lists rescanned"
            );
            self.bump();
        }
        Ok(outcome)
    }

    /// Watch the root recursively and rescan after each quiet period.
    ///
    /// Watching stops when the returned handle is dropped.
    pub fn watch(self: &Arc<Self>, debounce: Duration) -> Result<ListWatcher, CoreError> {
        std::fs::create_dir_all(&self.root).map_err(|e| CoreError::io(&self.root, e))?;

        let (tx, mut rx) = mpsc::channel::<()>(WATCH_CHANNEL_SIZE);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                // A full channel already has a rescan pending.
                Ok(_) => {
                    let _ = tx.try_send(());
                }
                Err(e) => debug!(error = %e, "list watcher error"),
            },
            notify::Config::default(),
        )?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;

        let cancel = CancellationToken::new();
        let registry = Arc::clone(self);
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = task_cancel.cancelled() => break,
                    event = rx.recv() => {
                        if event.is_none() {
                            break;
                        }
                    }
                }
                // Absorb the burst that usually follows one save.
                loop {
                    tokio::select! {
                        biased;
                        () = task_cancel.cancelled() => return,
                        () = tokio::time::sleep(debounce) => break,
                        more = rx.recv() => {
                            if more.is_none() {
                                return;
                            }
                        }
                    }
                }
                if let Err(e) = registry.rescan().await {
                    warn!(error = %e, "list rescan failed");
                }
            }
        });

        debug!(root = %self.root.display(), "watching list directory");
        Ok(ListWatcher {
            _watcher: watcher,
            cancel,
        })
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn lock_table(&self) -> MutexGuard<'_, ListTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.generation.send_modify(|g| *g += 1);
    }

    async fn enumerate(&self) -> Result<IndexMap<String, PathBuf>, CoreError> {
        let root = self.root.clone();
        let extension = self.extension.clone();
        tokio::task::spawn_blocking(move || enumerate_lists(&root, &extension))
            .await
            .map_err(|e| CoreError::fatal(format!("list enumeration panicked: {e}")))
    }
}

/// Stops the watcher and its rescan task when dropped.
pub struct ListWatcher {
    _watcher: RecommendedWatcher,
    cancel: CancellationToken,
}

impl Drop for ListWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Lower-cased key for a list file: its path relative to `root`,
/// `/`-separated, without the extension.
pub fn list_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?.with_extension("");
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

fn enumerate_lists(root: &Path, extension: &str) -> IndexMap<String, PathBuf> {
    let mut found = IndexMap::new();
    if !root.is_dir() {
        return found;
    }
    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|p| {
            p.extension()
                .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(extension))
        })
        .collect();
    paths.sort();
    for path in paths {
        if let Some(key) = list_key(root, &path) {
            found.entry(key).or_insert(path);
        }
    }
    found
}
