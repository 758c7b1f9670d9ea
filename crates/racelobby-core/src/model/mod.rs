// ── Domain model ──

pub mod entry;
pub mod id;
pub mod info;
pub mod record;

pub use entry::{EntryState, EntryStatus, ServerEntry, SourceFlags};
pub use id::{ServerAddress, ServerId};
pub use info::{ExtendedInfo, ServerInfo, SessionInfo, SessionKind};
pub use record::ServerRecord;
