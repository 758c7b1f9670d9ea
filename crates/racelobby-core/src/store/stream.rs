// ── Reactive entry streams ──
//
// Subscription type for consuming collection changes from the ServerStore.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::ServerEntry;

/// Shared, copy-on-write view of every tracked entry.
pub type EntrySnapshot = Arc<Vec<Arc<ServerEntry>>>;

/// A subscription to the shared entry collection.
///
/// Provides both point-in-time snapshot access and reactive change
/// notification via `changed()` or by converting to a `Stream`.
pub struct EntryStream {
    current: EntrySnapshot,
    receiver: watch::Receiver<EntrySnapshot>,
}

impl EntryStream {
    pub(crate) fn new(receiver: watch::Receiver<EntrySnapshot>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Get the snapshot captured at creation time (or at the last `changed()`).
    pub fn current(&self) -> &EntrySnapshot {
        &self.current
    }

    /// Get the latest snapshot (may have changed since creation).
    pub fn latest(&self) -> EntrySnapshot {
        self.receiver.borrow().clone()
    }

    /// Wait for the next structural change, returning the new snapshot.
    /// Returns `None` if the store has been dropped.
    pub async fn changed(&mut self) -> Option<EntrySnapshot> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> EntryWatchStream {
        EntryWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
///
/// Yields a new snapshot each time entries are added or removed.
pub struct EntryWatchStream {
    inner: WatchStream<EntrySnapshot>,
}

impl Stream for EntryWatchStream {
    type Item = EntrySnapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
