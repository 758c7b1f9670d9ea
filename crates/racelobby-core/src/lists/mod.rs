// ── File-backed lists ──
//
// Favourites, recent, hidden and user lists stored as text files under
// one directory, each exposed as a batch source.

mod file_source;
pub mod format;
mod registry;

pub use file_source::{FAVOURITES_KEY, FileSource, RecheckOutcome};
pub use format::{Color, ListInformation, ListRecord, ParsedList};
pub use registry::{FileListRegistry, ListWatcher, RescanOutcome, list_key};
