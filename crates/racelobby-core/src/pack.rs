// ── Source pack ──
//
// A fixed set of sessions loaded together. The pack's status is derived
// from its sessions on demand; it owns no state of its own.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::LoadError;
use crate::session::{SessionSnapshot, SessionStatus, SourceSession};

/// Aggregate status of a pack.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PackStatus {
    pub status: SessionStatus,
    /// A streaming session is still collecting.
    pub background_loading: bool,
    /// Set only when every session failed.
    pub error: Option<LoadError>,
    pub error_source: Option<String>,
}

/// Fold session snapshots, in pack order, into one status.
///
/// A failing session is masked while any other session is healthy or
/// busy; the pack only reports `Error` when all of them failed, and then
/// surfaces the first one.
pub fn compute_status(sessions: &[SessionSnapshot]) -> PackStatus {
    let mut loading = false;
    let mut background_loading = false;
    let mut waiting = false;
    let mut first_error: Option<&SessionSnapshot> = None;
    let mut all_failed = !sessions.is_empty();

    for session in sessions {
        match session.status {
            SessionStatus::Loading if session.background => background_loading = true,
            SessionStatus::Loading => loading = true,
            SessionStatus::Waiting => waiting = true,
            SessionStatus::Error => {
                if first_error.is_none() {
                    first_error = Some(session);
                }
                continue;
            }
            SessionStatus::Ready => {}
        }
        all_failed = false;
    }

    let status = if loading {
        SessionStatus::Loading
    } else if all_failed {
        SessionStatus::Error
    } else if waiting {
        SessionStatus::Waiting
    } else {
        SessionStatus::Ready
    };
    let failed = first_error.filter(|_| status == SessionStatus::Error);
    PackStatus {
        status,
        background_loading,
        error: failed.and_then(|s| s.error.clone()),
        error_source: failed.map(|s| s.key.clone()),
    }
}

/// Sessions chosen at construction, loaded with bounded fan-out.
#[derive(Clone)]
pub struct SourcePack {
    sessions: Arc<[SourceSession]>,
    fan_out: usize,
}

impl std::fmt::Debug for SourcePack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourcePack")
            .field("keys", &self.keys())
            .field("fan_out", &self.fan_out)
            .finish()
    }
}

impl SourcePack {
    pub fn new(sessions: Vec<SourceSession>, fan_out: usize) -> Self {
        Self {
            sessions: sessions.into(),
            fan_out: fan_out.max(1),
        }
    }

    pub fn sessions(&self) -> &[SourceSession] {
        &self.sessions
    }

    pub fn keys(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.key().to_owned()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn status(&self) -> PackStatus {
        compute_status(&snapshots(&self.sessions))
    }

    /// Status recomputed whenever any session changes.
    pub fn subscribe(&self) -> PackStatusStream {
        let sessions = Arc::clone(&self.sessions);
        let merged = stream::select_all(
            self.sessions
                .iter()
                .map(|s| WatchStream::new(s.subscribe())),
        );
        PackStatusStream {
            inner: merged
                .map(move |_| compute_status(&snapshots(&sessions)))
                .boxed(),
        }
    }

    /// Load every session that is not loaded yet.
    ///
    /// Returns once all sessions finished or `cancel` fired.
    pub async fn ensure_loaded(&self, cancel: &CancellationToken) -> PackStatus {
        let run = stream::iter(self.sessions.iter()).for_each_concurrent(self.fan_out, |s| async move {
            s.ensure_loaded(cancel).await;
        });
        tokio::select! {
            biased;
            () = cancel.cancelled() => debug!("pack load cancelled"),
            () = run => {}
        }
        self.status()
    }

    /// Reload sessions, optionally only those not `Ready`.
    ///
    /// Streaming sessions are reloaded without waiting; batch sessions are
    /// awaited with bounded fan-out.
    pub async fn reload(&self, non_ready_only: bool, cancel: &CancellationToken) -> PackStatus {
        let selected: Vec<&SourceSession> = self
            .sessions
            .iter()
            .filter(|s| !non_ready_only || s.status() != SessionStatus::Ready)
            .collect();

        let mut batch = Vec::with_capacity(selected.len());
        for session in selected {
            if session.is_background() {
                session.reload_detached();
            } else {
                batch.push(session);
            }
        }

        let run = stream::iter(batch).for_each_concurrent(self.fan_out, |s| async move {
            s.reload(cancel).await;
        });
        tokio::select! {
            biased;
            () = cancel.cancelled() => debug!("pack reload cancelled"),
            () = run => {}
        }
        self.status()
    }
}

fn snapshots(sessions: &[SourceSession]) -> Vec<SessionSnapshot> {
    sessions.iter().map(SourceSession::snapshot).collect()
}

/// `Stream` of pack statuses, one per session change.
pub struct PackStatusStream {
    inner: BoxStream<'static, PackStatus>,
}

impl Stream for PackStatusStream {
    type Item = PackStatus;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::time::Instant;

    use super::*;
    use crate::source::Source;
    use crate::source::testing::{ScriptedBatch, ScriptedStream, records};
    use crate::store::ServerStore;

    fn snap(key: &str, status: SessionStatus) -> SessionSnapshot {
        SessionSnapshot {
            key: key.into(),
            status,
            error: (status == SessionStatus::Error).then(|| LoadError {
                message: format!("{key} failed"),
                remedy: None,
                fatal: false,
                network: None,
                details: None,
            }),
            ..SessionSnapshot::default()
        }
    }

    #[test]
    fn one_failure_among_healthy_sessions_is_masked() {
        use SessionStatus::{Error, Ready};
        let status = compute_status(&[snap("a", Ready), snap("b", Ready), snap("c", Error)]);
        assert_eq!(status.status, Ready);
        assert!(status.error.is_none());
    }

    #[test]
    fn all_failing_surfaces_the_first_error() {
        use SessionStatus::Error;
        let status = compute_status(&[snap("a", Error), snap("b", Error), snap("c", Error)]);
        assert_eq!(status.status, Error);
        assert_eq!(status.error_source.as_deref(), Some("a"));
        assert_eq!(status.error.unwrap().message, "a failed");
    }

    #[test]
    fn foreground_loading_wins_and_background_is_flagged() {
        use SessionStatus::{Loading, Ready, Waiting};
        let mut lan = snap("lan", Loading);
        lan.background = true;

        let status = compute_status(&[snap("a", Ready), lan.clone()]);
        assert_eq!(status.status, Ready);
        assert!(status.background_loading);

        let status = compute_status(&[snap("a", Loading), snap("b", Waiting), lan]);
        assert_eq!(status.status, Loading);

        let status = compute_status(&[snap("a", Ready), snap("b", Waiting)]);
        assert_eq!(status.status, Waiting);
    }

    #[test]
    fn empty_pack_is_ready() {
        assert_eq!(compute_status(&[]).status, SessionStatus::Ready);
    }

    fn pack_of(sources: Vec<Source>, fan_out: usize) -> (SourcePack, Arc<ServerStore>) {
        let store = Arc::new(ServerStore::new());
        let sessions = sources
            .into_iter()
            .map(|s| SourceSession::new(s, Arc::clone(&store), Duration::from_millis(300)))
            .collect();
        (SourcePack::new(sessions, fan_out), store)
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_loaded_respects_fan_out() {
        let sources = (0..4)
            .map(|i| {
                Source::batch(
                    ScriptedBatch::new(&format!("s{i}"), records(&format!("10.0.{i}"), 2))
                        .delayed(Duration::from_millis(100)),
                )
            })
            .collect();
        let (pack, store) = pack_of(sources, 2);

        let started = Instant::now();
        let status = pack.ensure_loaded(&CancellationToken::new()).await;
        assert_eq!(status.status, SessionStatus::Ready);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(300), "{elapsed:?}");
        assert_eq!(store.len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn reload_only_touches_non_ready_sessions() {
        let healthy = Arc::new(ScriptedBatch::new("ok", records("10.0.0", 1)));
        let broken = Arc::new(ScriptedBatch::failing("broken", "down"));
        let (pack, _) = pack_of(
            vec![Source::Batch(healthy.clone()), Source::Batch(broken.clone())],
            4,
        );
        let status = pack.ensure_loaded(&CancellationToken::new()).await;
        assert_eq!(status.status, SessionStatus::Ready);

        broken.set_records(records("10.0.1", 1));
        let status = pack.reload(true, &CancellationToken::new()).await;
        assert_eq!(status.status, SessionStatus::Ready);
        assert_eq!(healthy.calls(), 1);
        assert_eq!(broken.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_reload_does_not_block() {
        let lan = Source::streaming(ScriptedStream::new(
            "lan",
            records("192.168.1", 2),
            Duration::from_secs(5),
        ));
        let (pack, _) = pack_of(vec![lan], 4);

        let started = Instant::now();
        let status = pack.reload(false, &CancellationToken::new()).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(status.background_loading);
        assert_eq!(status.status, SessionStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn status_stream_follows_sessions() {
        let (pack, _) = pack_of(
            vec![Source::batch(
                ScriptedBatch::new("kunos", records("10.0.0", 1)).delayed(Duration::from_millis(50)),
            )],
            4,
        );
        let mut statuses = pack.subscribe();
        assert_eq!(statuses.next().await.unwrap().status, SessionStatus::Waiting);

        let loader = pack.clone();
        tokio::spawn(async move { loader.ensure_loaded(&CancellationToken::new()).await });
        let mut seen = Vec::new();
        while let Some(status) = statuses.next().await {
            seen.push(status.status);
            if status.status == SessionStatus::Ready {
                break;
            }
        }
        assert!(seen.contains(&SessionStatus::Ready));
    }
}
