// ── Liveness scheduler ──
//
// Probes entries that have no status yet, highest priority first, under a
// concurrency cap. One cycle runs at a time; starting a new one cancels
// the previous cycle, and only the live cycle reports progress.

use std::cmp::Reverse;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::OnlineConfig;
use crate::error::{CoreError, NetworkErrorKind};
use crate::model::{EntryState, EntryStatus, ServerEntry};
use crate::probe::{ContentCheck, ServerProber};
use crate::store::ServerStore;

/// Entries matching the filter are probed before the rest.
pub type PriorityFilter = Arc<dyn Fn(&EntryState) -> bool + Send + Sync>;

/// While this returns `true` (and pausing is enabled), no pass starts.
pub type PauseCondition = Arc<dyn Fn() -> bool + Send + Sync>;

/// Progress of the live cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PingProgress {
    /// Entries with a status, counting those probed before the cycle.
    pub pinged: usize,
    pub total: usize,
    pub running: bool,
    pub pass: u32,
}

struct Cycle {
    id: u64,
    cancel: CancellationToken,
}

pub struct LivenessScheduler {
    store: Arc<ServerStore>,
    prober: Arc<dyn ServerProber>,
    limit: usize,
    timeout: Duration,
    max_passes: u32,
    pause_poll: Duration,
    pause_during_race: bool,
    pause: Option<PauseCondition>,
    content: Option<Arc<dyn ContentCheck>>,
    current: ArcSwapOption<Cycle>,
    next_cycle: AtomicU64,
    progress: watch::Sender<PingProgress>,
}

impl LivenessScheduler {
    pub fn new(store: Arc<ServerStore>, prober: Arc<dyn ServerProber>, config: &OnlineConfig) -> Self {
        let (progress, _) = watch::channel(PingProgress::default());
        Self {
            store,
            prober,
            limit: config.ping_limit(),
            timeout: config.ping_timeout,
            max_passes: config.ping_max_passes.max(1),
            pause_poll: config.pause_poll_interval,
            pause_during_race: config.pause_during_race,
            pause: None,
            content: None,
            current: ArcSwapOption::empty(),
            next_cycle: AtomicU64::new(1),
            progress,
        }
    }

    pub fn with_pause(mut self, pause: PauseCondition) -> Self {
        self.pause = Some(pause);
        self
    }

    pub fn with_content_check(mut self, check: Arc<dyn ContentCheck>) -> Self {
        self.content = Some(check);
        self
    }

    pub fn progress(&self) -> PingProgress {
        *self.progress.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PingProgress> {
        self.progress.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.current.load().is_some()
    }

    /// Start a cycle, cancelling any cycle still running.
    pub fn start(self: &Arc<Self>, priority: Option<PriorityFilter>) -> JoinHandle<PingProgress> {
        let cycle = Arc::new(Cycle {
            id: self.next_cycle.fetch_add(1, Ordering::Relaxed),
            cancel: CancellationToken::new(),
        });
        if let Some(previous) = self.current.swap(Some(Arc::clone(&cycle))) {
            debug!(cycle = previous.id, "superseding ping cycle");
            previous.cancel.cancel();
        }
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run(cycle, priority).await })
    }

    /// Cancel the running cycle. In-flight probes finish on their own.
    pub fn stop(&self) {
        if let Some(cycle) = self.current.swap(None) {
            cycle.cancel.cancel();
            self.progress.send_modify(|p| p.running = false);
        }
    }

    /// Probe one entry now. `false` if it is already being probed or has
    /// no address.
    pub async fn refresh(&self, entry: &ServerEntry) -> bool {
        let Some(address) = entry.address() else {
            return false;
        };
        let Some(_updating) = entry.try_begin_update() else {
            return false;
        };
        entry.set_status(EntryStatus::Loading);

        let result = match tokio::time::timeout(self.timeout, self.prober.probe(&address)).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::network(
                NetworkErrorKind::Timeout,
                format!("no reply from {address} within {}ms", self.timeout.as_millis()),
            )),
        };
        match result {
            Ok(probe) => {
                let missing = self
                    .content
                    .as_ref()
                    .is_some_and(|check| check.is_missing(&probe.info));
                entry.apply_probe(probe.info, probe.ping, missing);
            }
            Err(e) => {
                debug!(%address, error = %e, "probe failed");
                entry.record_failure(&e);
            }
        }
        true
    }

    // ── Cycle ────────────────────────────────────────────────────────

    async fn run(&self, cycle: Arc<Cycle>, priority: Option<PriorityFilter>) -> PingProgress {
        let cancel = &cycle.cancel;
        let pinged = AtomicUsize::new(self.store.pinged_count());
        self.report(&cycle, |p| {
            *p = PingProgress {
                pinged: pinged.load(Ordering::Relaxed),
                total: self.store.len(),
                running: true,
                pass: 0,
            };
        });

        'passes: for pass in 1..=self.max_passes {
            while self.is_paused() {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break 'passes,
                    () = tokio::time::sleep(self.pause_poll) => {}
                }
            }
            if cancel.is_cancelled() {
                break;
            }

            let mut pending: Vec<Arc<ServerEntry>> = self
                .store
                .snapshot()
                .iter()
                .filter(|e| e.status() == EntryStatus::Unloaded && !e.is_updating())
                .filter(|e| e.address().is_some())
                .cloned()
                .collect();
            if pending.is_empty() {
                break;
            }
            prioritize(&mut pending, priority.as_ref());

            let before = self.store.pinged_count();
            debug!(cycle = cycle.id, pass, pending = pending.len(), "ping pass");
            self.report(&cycle, |p| {
                p.pass = pass;
                p.total = self.store.len();
            });

            stream::iter(pending)
                .for_each_concurrent(self.limit, |entry| {
                    let pinged = &pinged;
                    let cycle = &cycle;
                    async move {
                        if cycle.cancel.is_cancelled() {
                            return;
                        }
                        if self.refresh(&entry).await {
                            let now = pinged.fetch_add(1, Ordering::Relaxed) + 1;
                            self.report(cycle, |p| p.pinged = now.max(p.pinged));
                        }
                    }
                })
                .await;

            let after = self.store.pinged_count();
            pinged.store(after, Ordering::Relaxed);
            if after <= before {
                break;
            }
        }

        self.report(&cycle, |p| {
            p.pinged = pinged.load(Ordering::Relaxed);
            p.total = self.store.len();
            p.running = false;
        });
        self.current.rcu(|current| match current {
            Some(c) if c.id == cycle.id => None,
            other => other.clone(),
        });
        debug!(cycle = cycle.id, cancelled = cancel.is_cancelled(), "ping cycle finished");
        self.progress()
    }

    fn is_paused(&self) -> bool {
        self.pause_during_race && self.pause.as_ref().is_some_and(|pause| pause())
    }

    /// Only the live cycle may touch progress; a stopped or superseded
    /// one is silent even while its last probes finish.
    fn report(&self, cycle: &Cycle, f: impl FnOnce(&mut PingProgress)) {
        let live = self.current.load().as_deref().is_some_and(|c| c.id == cycle.id);
        if live {
            self.progress.send_modify(f);
        }
    }
}

/// Priority matches first, then more connected drivers first. Stable.
pub fn prioritize(entries: &mut [Arc<ServerEntry>], priority: Option<&PriorityFilter>) {
    entries.sort_by_cached_key(|entry| {
        entry.with_state(|s| {
            let preferred = priority.is_some_and(|filter| filter(s));
            (Reverse(preferred), Reverse(s.drivers()))
        })
    });
}
