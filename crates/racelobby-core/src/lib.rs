//! Multi-source aggregation layer between `racelobby-api` and the CLI.
//!
//! This crate owns the entry model, source plumbing and scheduling policy
//! for the racelobby workspace:
//!
//! - **[`OnlineManager`]**: Facade holding the shared [`ServerStore`], the
//!   [`SourceRegistry`], one [`SourceSession`] per source, the optional
//!   [`FileListRegistry`] and the [`LivenessScheduler`].
//!
//! - **[`ServerStore`]**: Concurrent entry collection (`DashMap` plus a
//!   copy-on-write snapshot `watch`). Sessions merge source records into it;
//!   entries are keyed by [`ServerId`] and mutated in place, never replaced.
//!
//! - **Sources** ([`source`]): [`BatchSource`] and [`StreamingSource`]
//!   traits behind the [`Source`] enum, with the lobby, LAN and file-backed
//!   list implementations.
//!
//! - **[`SourceSession`]**: Single-flight load/reload state machine with
//!   debounced, customer-counted cancellation.
//!
//! - **[`SourcePack`]**: A set of sessions loaded together, with a derived
//!   aggregate [`PackStatus`] that masks lone failures.
//!
//! - **[`LivenessScheduler`]**: Priority-ordered, concurrency-capped probing
//!   of entries that have no status yet.

pub mod config;
pub mod convert;
pub mod error;
pub mod lists;
pub mod manager;
pub mod model;
pub mod pack;
pub mod pinging;
pub mod probe;
pub mod registry;
pub mod session;
pub mod source;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::OnlineConfig;
pub use error::{CoreError, LoadError, NetworkErrorKind};
pub use lists::{FAVOURITES_KEY, FileListRegistry, FileSource, ListInformation, ListRecord};
pub use manager::{LOCAL_KEY, OnlineManager, PackSelection};
pub use pack::{PackStatus, SourcePack};
pub use pinging::{LivenessScheduler, PauseCondition, PingProgress, PriorityFilter};
pub use probe::{ContentCheck, HttpProber, ProbeResult, ServerProber};
pub use registry::SourceRegistry;
pub use session::{SessionSnapshot, SessionStatus, SourceSession};
pub use source::{
    BatchSource, LAN_KEY, LOBBY_KEY, LanSource, LoadProgress, LobbySource, ProgressSink,
    RecordSink, Source, SourceIdentity, StreamingSource,
};
pub use store::{CollectionChange, EntrySnapshot, EntryStream, ServerStore};

// ── Model re-exports ────────────────────────────────────────────────
pub use model::{
    EntryState, EntryStatus, ServerAddress, ServerEntry, ServerId, ServerInfo, ServerRecord,
    SourceFlags,
};
