// ── Shared server store ──
//
// Copy-on-write entry storage with push-based change notification.

mod collection;
mod merge;
mod server_store;
mod stream;

pub use collection::CollectionChange;
pub use merge::MergeOutcome;
pub use server_store::ServerStore;
pub use stream::{EntrySnapshot, EntryStream, EntryWatchStream};
