// ── Source session ──
//
// Wraps one source and owns its load/reload state machine:
//
//   Waiting → Loading → Ready | Error
//   Ready | Error → Loading        (on a fresh load/reload request)
//   Loading → Waiting              (operation cancelled before completing)
//
// At most one operation runs per session. Callers join it as customers;
// the operation has its own cancellation token, cancelled only once the
// last customer has been gone for the debounce period.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CoreError, LoadError};
use crate::model::{ServerRecord, SourceFlags};
use crate::source::{LoadProgress, ProgressSink, RecordSink, Source};
use crate::store::ServerStore;

/// Load state of one session.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, strum::Display,
)]
pub enum SessionStatus {
    /// Never loaded, or the last load was cancelled.
    #[default]
    Waiting,
    Loading,
    Ready,
    Error,
}

/// Everything observable about a session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSnapshot {
    pub key: String,
    pub status: SessionStatus,
    pub progress: Option<LoadProgress>,
    pub error: Option<LoadError>,
    /// Streaming sources load in the background.
    pub background: bool,
}

struct Operation {
    id: u64,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
    /// Started without a customer; nobody leaving can cancel it.
    detached: bool,
}

#[derive(Default)]
struct SessionState {
    operation: Option<Operation>,
    customers: HashSet<u64>,
    reload_after: bool,
    watching_obsolete: bool,
}

struct SessionInner {
    source: Source,
    store: Arc<ServerStore>,
    debounce: Duration,
    state: Mutex<SessionState>,
    snapshot: watch::Sender<SessionSnapshot>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Load coordinator for one source. Cheap to clone.
#[derive(Clone)]
pub struct SourceSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SourceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSession")
            .field("key", &self.key())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl SourceSession {
    pub fn new(source: Source, store: Arc<ServerStore>, debounce: Duration) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot {
            key: source.key().to_owned(),
            background: source.is_streaming(),
            ..SessionSnapshot::default()
        });
        Self {
            inner: Arc::new(SessionInner {
                source,
                store,
                debounce,
                state: Mutex::new(SessionState::default()),
                snapshot,
                next_id: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn key(&self) -> &str {
        self.inner.source.key()
    }

    pub fn display_name(&self) -> String {
        self.inner.source.display_name()
    }

    pub fn source(&self) -> &Source {
        &self.inner.source
    }

    pub fn is_background(&self) -> bool {
        self.inner.source.is_streaming()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.snapshot.borrow().status
    }

    pub fn error(&self) -> Option<LoadError> {
        self.inner.snapshot.borrow().error.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Load unless already loaded. Errors are sticky: a failed session
    /// returns `Error` until `reload` is called.
    ///
    /// `cancel` withdraws this caller's interest only.
    pub async fn ensure_loaded(&self, cancel: &CancellationToken) -> SessionStatus {
        let (done, customer) = {
            let mut state = self.inner.lock_state();
            if state.operation.is_none() {
                let status = self.status();
                if matches!(status, SessionStatus::Ready | SessionStatus::Error) {
                    return status;
                }
            }
            let running = state.operation.as_ref().map(|op| op.done.clone());
            let done = match running {
                Some(done) => done,
                None => self.inner.start_locked(&mut state, false),
            };
            (done, self.inner.register_customer(&mut state))
        };
        self.wait(done, customer, cancel).await
    }

    /// Load again. While a load is running this does not start a second
    /// one; the running operation repeats once it completes.
    pub async fn reload(&self, cancel: &CancellationToken) -> SessionStatus {
        let (done, customer) = {
            let mut state = self.inner.lock_state();
            let running = state.operation.as_ref().map(|op| op.done.clone());
            let done = match running {
                Some(done) => {
                    state.reload_after = true;
                    done
                }
                None => self.inner.start_locked(&mut state, false),
            };
            (done, self.inner.register_customer(&mut state))
        };
        self.wait(done, customer, cancel).await
    }

    /// Fire-and-forget reload. It only ends early through `cancel()`.
    pub fn reload_detached(&self) {
        let mut state = self.inner.lock_state();
        if let Some(op) = state.operation.as_mut() {
            op.detached = true;
            state.reload_after = true;
        } else {
            self.inner.start_locked(&mut state, true);
        }
    }

    /// Cancel the running operation right away, whoever is waiting on it.
    pub fn cancel(&self) {
        let mut state = self.inner.lock_state();
        let Some(cancel) = state.operation.as_ref().map(|op| op.cancel.clone()) else {
            return;
        };
        cancel.cancel();
        // Waiting callers get `Waiting` back instead of a restart.
        state.customers.clear();
    }

    /// Cancel everything and stop reacting to source changes.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
    }

    async fn wait(
        &self,
        done: watch::Receiver<bool>,
        customer: CustomerGuard,
        cancel: &CancellationToken,
    ) -> SessionStatus {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {}
            () = wait_done(done) => {}
        }
        drop(customer);
        self.status()
    }
}

async fn wait_done(mut done: watch::Receiver<bool>) {
    loop {
        if *done.borrow_and_update() {
            return;
        }
        if done.changed().await.is_err() {
            return;
        }
    }
}

impl SessionInner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, f: impl FnOnce(&mut SessionSnapshot)) {
        self.snapshot.send_modify(f);
    }

    fn register_customer(self: &Arc<Self>, state: &mut SessionState) -> CustomerGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        state.customers.insert(id);
        let operation = state.operation.as_ref().map_or(0, |op| op.id);
        CustomerGuard {
            inner: Arc::clone(self),
            id,
            operation,
        }
    }

    fn start_locked(self: &Arc<Self>, state: &mut SessionState, detached: bool) -> watch::Receiver<bool> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();
        let (done_tx, done_rx) = watch::channel(false);
        state.operation = Some(Operation {
            id,
            cancel: cancel.clone(),
            done: done_rx.clone(),
            detached,
        });
        state.reload_after = false;
        self.publish(|s| {
            s.status = SessionStatus::Loading;
            s.progress = None;
            s.error = None;
        });
        if !state.watching_obsolete {
            state.watching_obsolete = true;
            self.watch_obsolete();
        }

        debug!(source = %self.source.key(), operation = id, detached, "session load started");
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.run_operation(cancel, done_tx).await });
        done_rx
    }

    async fn run_operation(self: Arc<Self>, mut cancel: CancellationToken, done: watch::Sender<bool>) {
        let key = self.source.key().to_owned();
        loop {
            // Stale entries must not outlive a reload boundary.
            self.store.withdraw(&key);

            let result = AssertUnwindSafe(self.load_once(&cancel))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(CoreError::fatal(format!("source {key} panicked"))));

            let mut state = self.lock_state();
            let finished = !matches!(result, Ok(false));

            // Customers that joined after the debounce fired still want a result.
            if !finished
                && cancel.is_cancelled()
                && !self.shutdown.is_cancelled()
                && !state.customers.is_empty()
            {
                cancel = self.shutdown.child_token();
                if let Some(op) = state.operation.as_mut() {
                    op.cancel = cancel.clone();
                }
                state.reload_after = false;
                debug!(
                    source = %key,
                    customers = state.customers.len(),
                    "load cancelled under new customers, restarting"
                );
                continue;
            }
            if finished && state.reload_after && !cancel.is_cancelled() {
                state.reload_after = false;
                debug!(source = %key, "reloading after completion");
                continue;
            }

            state.reload_after = false;
            state.operation = None;
            state.customers.clear();
            self.finish(&key, result);
            drop(state);
            let _ = done.send(true);
            return;
        }
    }

    fn finish(&self, key: &str, result: Result<bool, CoreError>) {
        let (status, error) = match result {
            Ok(true) => (SessionStatus::Ready, None),
            Ok(false) => (SessionStatus::Waiting, None),
            Err(e) => {
                if e.is_fatal() {
                    warn!(source = %key, error = %e, "source failed unexpectedly");
                } else {
                    debug!(source = %key, error = %e, "source failed");
                }
                (SessionStatus::Error, Some(LoadError::from(&e)))
            }
        };
        debug!(source = %key, %status, "session load finished");
        self.publish(|s| {
            s.status = status;
            s.error = error;
            s.progress = None;
        });
    }

    async fn load_once(&self, cancel: &CancellationToken) -> Result<bool, CoreError> {
        let sink = SessionSink {
            inner: self,
            flags: self.source.flags(),
        };
        match &self.source {
            Source::Batch(source) => {
                let Some(records) = source.fetch(&sink, cancel).await? else {
                    return Ok(false);
                };
                if cancel.is_cancelled() {
                    return Ok(false);
                }
                self.store.merge(source.key(), sink.flags, &records);
                Ok(true)
            }
            Source::Streaming(source) => source.stream(&sink, cancel).await,
        }
    }

    /// Reload on stale content, but only once someone has loaded us.
    fn watch_obsolete(self: &Arc<Self>) {
        let Some(mut obsolete) = self.source.subscribe_obsolete() else {
            return;
        };
        let weak: Weak<Self> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let _ = obsolete.borrow_and_update();
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    changed = obsolete.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let Some(inner) = weak.upgrade() else { break };
                let session = SourceSession { inner };
                if session.status() != SessionStatus::Waiting {
                    debug!(source = %session.key(), "source obsolete, reloading");
                    session.reload_detached();
                }
            }
        });
    }
}

/// Adapter handed to sources: records merge straight into the store,
/// progress lands in the session snapshot.
struct SessionSink<'a> {
    inner: &'a SessionInner,
    flags: SourceFlags,
}

impl ProgressSink for SessionSink<'_> {
    fn progress(&self, progress: LoadProgress) {
        self.inner.publish(|s| s.progress = Some(progress));
    }
}

impl RecordSink for SessionSink<'_> {
    fn push(&self, record: ServerRecord) {
        self.inner
            .store
            .merge(self.inner.source.key(), self.flags, std::slice::from_ref(&record));
    }
}

/// A caller's interest in the current operation, released on drop.
struct CustomerGuard {
    inner: Arc<SessionInner>,
    id: u64,
    operation: u64,
}

impl Drop for CustomerGuard {
    fn drop(&mut self) {
        let cancel = {
            let mut state = self.inner.lock_state();
            if !state.customers.remove(&self.id) || !state.customers.is_empty() {
                return;
            }
            match &state.operation {
                Some(op) if op.id == self.operation && !op.detached => op.cancel.clone(),
                _ => return,
            }
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            cancel.cancel();
            return;
        };
        let inner = Arc::clone(&self.inner);
        let operation = self.operation;
        runtime.spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            let state = inner.lock_state();
            let abandoned = state.customers.is_empty()
                && state
                    .operation
                    .as_ref()
                    .is_some_and(|op| op.id == operation && !op.detached);
            if abandoned {
                debug!(source = %inner.source.key(), operation, "no customers left, cancelling load");
                cancel.cancel();
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Notify;

    use super::*;
    use crate::source::testing::{ScriptedBatch, ScriptedStream, records};

    const DEBOUNCE: Duration = Duration::from_millis(300);

    fn session(source: Arc<ScriptedBatch>) -> (SourceSession, Arc<ServerStore>) {
        let store = Arc::new(ServerStore::new());
        let session = SourceSession::new(Source::Batch(source), Arc::clone(&store), DEBOUNCE);
        (session, store)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_ensure_loaded_calls_share_one_fetch() {
        let source = Arc::new(ScriptedBatch::new("kunos", records("10.0.0", 3)).delayed(Duration::from_millis(50)));
        let (session, store) = session(Arc::clone(&source));

        let calls = (0..5).map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.ensure_loaded(&CancellationToken::new()).await })
        });
        for status in futures_util::future::join_all(calls).await {
            assert_eq!(status.unwrap(), SessionStatus::Ready);
        }
        assert_eq!(source.calls(), 1);
        assert_eq!(store.len(), 3);

        // Already loaded: no new fetch.
        assert_eq!(session.ensure_loaded(&CancellationToken::new()).await, SessionStatus::Ready);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn one_customer_leaving_does_not_cancel_the_others() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(ScriptedBatch::new("kunos", records("10.0.0", 2)).gated(Arc::clone(&gate)));
        let (session, _) = session(Arc::clone(&source));

        let tokens: Vec<_> = (0..3).map(|_| CancellationToken::new()).collect();
        let waiters: Vec<_> = tokens
            .iter()
            .map(|token| {
                let session = session.clone();
                let token = token.clone();
                tokio::spawn(async move { session.ensure_loaded(&token).await })
            })
            .collect();
        settle().await;

        tokens[0].cancel();
        tokio::time::sleep(DEBOUNCE * 4).await;
        assert_eq!(session.status(), SessionStatus::Loading);

        gate.notify_one();
        for waiter in waiters.into_iter().skip(1) {
            assert_eq!(waiter.await.unwrap(), SessionStatus::Ready);
        }
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn last_customer_leaving_cancels_after_debounce() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(ScriptedBatch::new("kunos", records("10.0.0", 2)).gated(gate));
        let (session, store) = session(Arc::clone(&source));

        let tokens: Vec<_> = (0..3).map(|_| CancellationToken::new()).collect();
        for token in &tokens {
            let session = session.clone();
            let token = token.clone();
            tokio::spawn(async move { session.ensure_loaded(&token).await });
        }
        settle().await;
        for token in &tokens {
            token.cancel();
        }
        settle().await;

        // Inside the debounce window nothing is cancelled yet.
        tokio::time::sleep(DEBOUNCE / 2).await;
        assert_eq!(session.status(), SessionStatus::Loading);

        tokio::time::sleep(DEBOUNCE).await;
        settle().await;
        assert_eq!(session.status(), SessionStatus::Waiting);
        assert!(store.is_empty());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn returning_customer_within_debounce_keeps_the_load() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(ScriptedBatch::new("kunos", records("10.0.0", 1)).gated(Arc::clone(&gate)));
        let (session, _) = session(Arc::clone(&source));

        let first = CancellationToken::new();
        {
            let session = session.clone();
            let first = first.clone();
            tokio::spawn(async move { session.ensure_loaded(&first).await });
        }
        settle().await;
        first.cancel();
        settle().await;

        tokio::time::sleep(DEBOUNCE / 3).await;
        let second = {
            let session = session.clone();
            tokio::spawn(async move { session.ensure_loaded(&CancellationToken::new()).await })
        };
        tokio::time::sleep(DEBOUNCE * 2).await;
        assert_eq!(session.status(), SessionStatus::Loading);

        gate.notify_one();
        assert_eq!(second.await.unwrap(), SessionStatus::Ready);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reload_while_loading_runs_exactly_once_more() {
        let source = Arc::new(ScriptedBatch::new("kunos", records("10.0.0", 1)).delayed(Duration::from_millis(100)));
        let (session, _) = session(Arc::clone(&source));

        let loading = {
            let session = session.clone();
            tokio::spawn(async move { session.ensure_loaded(&CancellationToken::new()).await })
        };
        settle().await;
        let reloads: Vec<_> = (0..3)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.reload(&CancellationToken::new()).await })
            })
            .collect();

        assert_eq!(loading.await.unwrap(), SessionStatus::Ready);
        for reload in reloads {
            assert_eq!(reload.await.unwrap(), SessionStatus::Ready);
        }
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn customer_arriving_after_debounce_cancel_gets_a_fresh_load() {
        let source = Arc::new(
            ScriptedBatch::new("kunos", records("10.0.0", 2))
                .delayed(Duration::from_secs(2))
                .checks_cancel_late(),
        );
        let (session, store) = session(Arc::clone(&source));

        let first = CancellationToken::new();
        {
            let session = session.clone();
            let first = first.clone();
            tokio::spawn(async move { session.ensure_loaded(&first).await });
        }
        settle().await;
        first.cancel();
        settle().await;

        // Past the debounce: the operation's own token is cancelled, but
        // the source has not noticed yet.
        tokio::time::sleep(DEBOUNCE + Duration::from_millis(200)).await;
        assert_eq!(session.status(), SessionStatus::Loading);

        let late = session.ensure_loaded(&CancellationToken::new()).await;
        assert_eq!(late, SessionStatus::Ready);
        assert_eq!(store.len(), 2);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reload_joining_a_cancelled_load_also_restarts() {
        let source = Arc::new(
            ScriptedBatch::new("kunos", records("10.0.0", 1))
                .delayed(Duration::from_secs(2))
                .checks_cancel_late(),
        );
        let (session, _) = session(Arc::clone(&source));

        let first = CancellationToken::new();
        {
            let session = session.clone();
            let first = first.clone();
            tokio::spawn(async move { session.ensure_loaded(&first).await });
        }
        settle().await;
        first.cancel();
        tokio::time::sleep(DEBOUNCE * 2).await;

        assert_eq!(session.reload(&CancellationToken::new()).await, SessionStatus::Ready);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn errors_are_sticky_until_reload() {
        let source = Arc::new(ScriptedBatch::failing("kunos", "Lobby unreachable"));
        let (session, _) = session(Arc::clone(&source));

        assert_eq!(session.ensure_loaded(&CancellationToken::new()).await, SessionStatus::Error);
        let error = session.error().unwrap();
        assert!(!error.fatal);
        assert_eq!(error.remedy.as_deref(), Some("Try again later"));

        assert_eq!(session.ensure_loaded(&CancellationToken::new()).await, SessionStatus::Error);
        assert_eq!(source.calls(), 1);

        source.set_records(records("10.0.0", 1));
        assert_eq!(session.reload(&CancellationToken::new()).await, SessionStatus::Ready);
        assert!(session.error().is_none());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn reload_drops_entries_the_source_no_longer_yields() {
        let source = Arc::new(ScriptedBatch::new("a", records("10.0.0", 3)));
        let (session, store) = session(Arc::clone(&source));
        session.ensure_loaded(&CancellationToken::new()).await;
        store.merge("b", SourceFlags::default(), &records("10.0.0", 1));

        source.set_records(Vec::new());
        session.reload(&CancellationToken::new()).await;
        // Only the entry also listed by "b" survives.
        assert_eq!(store.len(), 1);
        assert!(store.snapshot()[0].state().has_origin("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_session_merges_as_records_arrive() {
        let store = Arc::new(ServerStore::new());
        let source = Source::streaming(ScriptedStream::new(
            "lan",
            records("192.168.1", 3),
            Duration::from_millis(100),
        ));
        let session = SourceSession::new(source, Arc::clone(&store), DEBOUNCE);
        assert!(session.is_background());

        let running = {
            let session = session.clone();
            tokio::spawn(async move { session.ensure_loaded(&CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.len(), 1);
        assert_eq!(session.status(), SessionStatus::Loading);

        assert_eq!(running.await.unwrap(), SessionStatus::Ready);
        assert_eq!(store.len(), 3);
        assert!(store.snapshot().iter().all(|e| e.state().is_lan()));
    }

    #[tokio::test]
    async fn explicit_cancel_returns_to_waiting() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(ScriptedBatch::new("kunos", Vec::new()).gated(gate));
        let (session, _) = session(source);
        session.reload_detached();
        settle().await;
        assert_eq!(session.status(), SessionStatus::Loading);

        let mut snapshots = session.subscribe();
        session.cancel();
        snapshots
            .wait_for(|s| s.status == SessionStatus::Waiting)
            .await
            .unwrap();
    }
}
