// ── Source abstraction ──
//
// A source yields raw server records; it never deduplicates and never
// touches the shared store. Sessions call it, merge what it yields and
// own its status. Batch sources return everything at once; streaming
// sources push records as they are discovered.

mod lan;
mod lobby;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub use lan::{LAN_KEY, LanScanner, LanSource};
pub use lobby::{LOBBY_KEY, LobbyApi, LobbySource};

use crate::error::CoreError;
use crate::model::{ServerRecord, SourceFlags};

/// Progress reported while a source is loading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadProgress {
    pub current: usize,
    pub total: Option<usize>,
    pub message: Option<String>,
}

impl LoadProgress {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn count(current: usize, total: Option<usize>) -> Self {
        Self {
            current,
            total,
            message: None,
        }
    }
}

/// Receives progress updates from a loading source.
pub trait ProgressSink: Send + Sync {
    fn progress(&self, progress: LoadProgress);
}

/// Receives records from a streaming source, one call per discovery.
pub trait RecordSink: ProgressSink {
    fn push(&self, record: ServerRecord);
}

/// What every source has regardless of how it loads.
pub trait SourceIdentity: Send + Sync {
    /// Stable key stamped into entry origins and references.
    fn key(&self) -> &str;

    fn display_name(&self) -> String;

    /// Flags applied to every entry this source produces.
    fn flags(&self) -> SourceFlags {
        SourceFlags::default()
    }

    /// Hidden sources are kept out of the "all sources" view.
    fn hidden(&self) -> bool {
        false
    }

    /// A counter bumped whenever the source's content went stale.
    fn subscribe_obsolete(&self) -> Option<watch::Receiver<u64>> {
        None
    }
}

/// Produces its whole known set in one call.
#[async_trait]
pub trait BatchSource: SourceIdentity {
    /// `Ok(None)` means the call was cancelled before it completed.
    async fn fetch(
        &self,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<ServerRecord>>, CoreError>;
}

/// Produces records incrementally over a possibly long window.
#[async_trait]
pub trait StreamingSource: SourceIdentity {
    /// `Ok(false)` means the call was cancelled before the window ended.
    async fn stream(
        &self,
        sink: &dyn RecordSink,
        cancel: &CancellationToken,
    ) -> Result<bool, CoreError>;
}

/// A registered source, its capability resolved once at registration.
#[derive(Clone)]
pub enum Source {
    Batch(Arc<dyn BatchSource>),
    Streaming(Arc<dyn StreamingSource>),
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_streaming() { "Streaming" } else { "Batch" };
        f.debug_struct("Source")
            .field("kind", &kind)
            .field("key", &self.key())
            .finish()
    }
}

impl Source {
    pub fn batch(source: impl BatchSource + 'static) -> Self {
        Self::Batch(Arc::new(source))
    }

    pub fn streaming(source: impl StreamingSource + 'static) -> Self {
        Self::Streaming(Arc::new(source))
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Batch(s) => s.key(),
            Self::Streaming(s) => s.key(),
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Self::Batch(s) => s.display_name(),
            Self::Streaming(s) => s.display_name(),
        }
    }

    pub fn flags(&self) -> SourceFlags {
        match self {
            Self::Batch(s) => s.flags(),
            Self::Streaming(s) => s.flags(),
        }
    }

    pub fn hidden(&self) -> bool {
        match self {
            Self::Batch(s) => s.hidden(),
            Self::Streaming(s) => s.hidden(),
        }
    }

    pub fn subscribe_obsolete(&self) -> Option<watch::Receiver<u64>> {
        match self {
            Self::Batch(s) => s.subscribe_obsolete(),
            Self::Streaming(s) => s.subscribe_obsolete(),
        }
    }

    /// Streaming sessions count as background work in a pack.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming(_))
    }

    /// Whether both handles point at the same source object.
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Batch(a), Self::Batch(b)) => {
                Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
            }
            (Self::Streaming(a), Self::Streaming(b)) => {
                Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
            }
            _ => false,
        }
    }
}
