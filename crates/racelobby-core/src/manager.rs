// ── Online manager ──
//
// Top-level facade: owns the shared store, the source registry, one
// session per registered source, the optional file-list registry and the
// liveness scheduler. Construct once and clone freely.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::OnlineConfig;
use crate::error::CoreError;
use crate::lists::{FileListRegistry, ListRecord, ListWatcher};
use crate::model::{ServerAddress, ServerEntry, ServerId, ServerRecord};
use crate::pack::SourcePack;
use crate::pinging::{LivenessScheduler, PingProgress, PriorityFilter};
use crate::probe::ServerProber;
use crate::registry::SourceRegistry;
use crate::session::SourceSession;
use crate::source::Source;
use crate::store::ServerStore;

/// Origin stamped on entries the user adds by hand.
pub const LOCAL_KEY: &str = "local";

/// Which sources a pack is built over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackSelection {
    /// Every registered source that is not hidden, in registration order.
    All,
    Keys(Vec<String>),
}

/// Cheaply cloneable via `Arc<ManagerInner>`.
#[derive(Clone)]
pub struct OnlineManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: OnlineConfig,
    store: Arc<ServerStore>,
    registry: SourceRegistry,
    sessions: DashMap<String, SourceSession>,
    lists: OnceLock<Arc<FileListRegistry>>,
    /// Registry keys that belong to file lists.
    list_keys: Mutex<HashSet<String>>,
    list_watcher: Mutex<Option<ListWatcher>>,
    scheduler: Arc<LivenessScheduler>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl OnlineManager {
    pub fn new(config: OnlineConfig, prober: Arc<dyn ServerProber>) -> Self {
        Self::with_scheduler(config, prober, |scheduler| scheduler)
    }

    /// Like [`new`](Self::new), letting the caller add a pause condition or
    /// content check to the scheduler.
    pub fn with_scheduler(
        config: OnlineConfig,
        prober: Arc<dyn ServerProber>,
        customize: impl FnOnce(LivenessScheduler) -> LivenessScheduler,
    ) -> Self {
        let store = Arc::new(ServerStore::new());
        let scheduler = customize(LivenessScheduler::new(Arc::clone(&store), prober, &config));
        Self {
            inner: Arc::new(ManagerInner {
                config,
                store,
                registry: SourceRegistry::new(),
                sessions: DashMap::new(),
                lists: OnceLock::new(),
                list_keys: Mutex::new(HashSet::new()),
                list_watcher: Mutex::new(None),
                scheduler: Arc::new(scheduler),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &OnlineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<ServerStore> {
        &self.inner.store
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.inner.registry
    }

    pub fn scheduler(&self) -> &Arc<LivenessScheduler> {
        &self.inner.scheduler
    }

    /// The attached file-list registry, if any.
    pub fn lists(&self) -> Option<&Arc<FileListRegistry>> {
        self.inner.lists.get()
    }

    // ── Sources & sessions ───────────────────────────────────────────

    /// `false` (with a warning) if the key is already taken.
    pub fn register_source(&self, source: Source) -> bool {
        self.inner.registry.register(source)
    }

    /// Drop a source, its session and every entry it alone produced.
    pub fn unregister_source(&self, key: &str) -> bool {
        let Some(_source) = self.inner.registry.unregister(key) else {
            return false;
        };
        if let Some((_, session)) = self.inner.sessions.remove(key) {
            session.close();
        }
        let dropped = self.inner.store.withdraw(key);
        debug!(source = %key, dropped, "source unregistered");
        true
    }

    /// The session for a registered source, created on first use.
    pub fn session(&self, key: &str) -> Option<SourceSession> {
        let source = self.inner.registry.get(key)?;
        let mut slot = self
            .inner
            .sessions
            .entry(key.to_owned())
            .or_insert_with(|| self.new_session(source.clone()));
        if !slot.source().same_as(&source) {
            debug!(source = %key, "source replaced, recreating session");
            slot.close();
            *slot = self.new_session(source);
        }
        Some(slot.clone())
    }

    pub fn pack(&self, selection: &PackSelection) -> SourcePack {
        let keys: Vec<String> = match selection {
            PackSelection::All => self
                .inner
                .registry
                .sources()
                .into_iter()
                .filter(|s| !s.hidden())
                .map(|s| s.key().to_owned())
                .collect(),
            PackSelection::Keys(keys) => keys.clone(),
        };
        let sessions = keys
            .iter()
            .filter_map(|key| {
                let session = self.session(key);
                if session.is_none() {
                    warn!(source = %key, "unknown source left out of pack");
                }
                session
            })
            .collect();
        SourcePack::new(sessions, self.inner.config.pack_concurrency)
    }

    fn new_session(&self, source: Source) -> SourceSession {
        SourceSession::new(
            source,
            Arc::clone(&self.inner.store),
            self.inner.config.cancel_debounce,
        )
    }

    // ── File lists ───────────────────────────────────────────────────

    /// Scan `root` for list files, register each as a source and keep the
    /// registry in step with later rescans. With `watch`, file-system
    /// changes trigger those rescans.
    pub async fn attach_lists(
        &self,
        root: impl Into<PathBuf>,
        watch: bool,
    ) -> Result<Arc<FileListRegistry>, CoreError> {
        let config = &self.inner.config;
        let lists = Arc::new(FileListRegistry::new(
            root,
            config.list_extension.clone(),
            config.missing_sources_cap,
            Arc::clone(&self.inner.store),
        ));
        if self.inner.lists.set(Arc::clone(&lists)).is_err() {
            return Err(CoreError::fatal("a list directory is already attached"));
        }

        let outcome = lists.rescan().await?;
        info!(root = %lists.root().display(), lists = outcome.added.len(), "list directory attached");
        self.sync_lists(&lists);

        let task = tokio::spawn(list_sync_task(
            Arc::downgrade(&self.inner),
            Arc::clone(&lists),
            lists.subscribe(),
            self.inner.cancel.child_token(),
        ));
        lock(&self.inner.task_handles).push(task);

        if watch {
            let watcher = lists.watch(config.list_watch_debounce)?;
            *lock(&self.inner.list_watcher) = Some(watcher);
        }
        Ok(lists)
    }

    /// Add `id` to the named list, creating the list if needed.
    pub async fn add_to_list(
        &self,
        list: &str,
        id: ServerId,
        display_name: Option<String>,
    ) -> Result<bool, CoreError> {
        let lists = self.require_lists()?;
        let source = lists.get_or_create(list);
        let added = source.add(ListRecord::new(id, display_name)).await?;
        self.sync_lists(lists);
        Ok(added)
    }

    pub async fn remove_from_list(&self, list: &str, id: &ServerId) -> Result<bool, CoreError> {
        let lists = self.require_lists()?;
        let source = lists.get(&list.to_lowercase()).ok_or_else(|| CoreError::SourceNotFound {
            key: list.to_owned(),
        })?;
        source.remove(id).await
    }

    fn require_lists(&self) -> Result<&Arc<FileListRegistry>, CoreError> {
        self.lists().ok_or_else(|| {
            CoreError::informative(
                "No list directory is configured",
                "Set lists_dir in the config file",
            )
        })
    }

    /// Register lists the file registry knows and drop the ones it lost.
    ///
    /// A list whose file vanished stays registered while the registry keeps
    /// it parked: its rescan already withdrew its entries, and sessions or
    /// packs holding it keep working once the file comes back. Only lists
    /// that fell out of the parked table are unregistered.
    fn sync_lists(&self, lists: &FileListRegistry) {
        let current = lists.lists();
        let tracked: HashSet<String> = lists
            .keys()
            .into_iter()
            .chain(lists.parked_keys())
            .collect();

        let stale: Vec<String> = {
            let mut known = lock(&self.inner.list_keys);
            let stale = known.difference(&tracked).cloned().collect();
            known.clone_from(&tracked);
            stale
        };
        for key in stale {
            self.unregister_source(&key);
        }

        for list in current {
            let source = Source::Batch(list);
            match self.inner.registry.get(source.key()) {
                Some(existing) if existing.same_as(&source) => {}
                Some(_) => warn!(source = %source.key(), "list shadowed by another source"),
                None => {
                    self.inner.registry.register(source);
                }
            }
        }
    }

    // ── Entries ──────────────────────────────────────────────────────

    /// Track a user-typed address that no source lists.
    pub fn add_local(&self, address: ServerAddress) -> Result<Arc<ServerEntry>, CoreError> {
        self.inner
            .store
            .create_local(&ServerRecord::from_address(address), LOCAL_KEY)
    }

    pub fn remove_local(&self, id: &ServerId) -> bool {
        self.inner.store.remove_origin(id, LOCAL_KEY)
    }

    // ── Pinging ──────────────────────────────────────────────────────

    pub fn start_pinging(&self, priority: Option<PriorityFilter>) -> JoinHandle<PingProgress> {
        self.inner.scheduler.start(priority)
    }

    pub fn stop_pinging(&self) {
        self.inner.scheduler.stop();
    }

    pub fn ping_progress(&self) -> watch::Receiver<PingProgress> {
        self.inner.scheduler.subscribe()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Stop pinging, close every session and join background tasks.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.scheduler.stop();
        lock(&self.inner.list_watcher).take();
        for session in &self.inner.sessions {
            session.close();
        }

        let handles: Vec<JoinHandle<()>> = lock(&self.inner.task_handles).drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        debug!("online manager shut down");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn list_sync_task(
    manager: Weak<ManagerInner>,
    lists: Arc<FileListRegistry>,
    mut generation: watch::Receiver<u64>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = generation.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        let Some(inner) = manager.upgrade() else { break };
        OnlineManager { inner }.sync_lists(&lists);
    }
}
