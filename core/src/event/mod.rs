//! Events the server layer feeds into the engine, and the bus that fans them out to
//! feature subscribers.

mod bus;

use std::path::PathBuf;

use gw_task_system::DirHandle;

pub use bus::{EventBus, Topic};

/// A directory found while walking the workspace, with its entry names.
#[derive(Debug, Clone)]
pub struct DiscoverEvent {
	pub path: PathBuf,
	pub filenames: Vec<String>,
}

/// A document in `dir` was opened in the editor.
#[derive(Debug, Clone)]
pub struct DidOpenEvent {
	pub dir: DirHandle,
	pub language_id: String,
}

/// An open document in `dir` was edited.
#[derive(Debug, Clone)]
pub struct DidChangeEvent {
	pub dir: DirHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeType {
	Created,
	Changed,
	Deleted,
}

/// A watched filesystem path changed outside the editor. `raw_path` may name a file or a
/// directory; for deletions it can no longer be stat-ed, so handlers disambiguate against
/// their own records.
#[derive(Debug, Clone)]
pub struct DidChangeWatchedEvent {
	pub raw_path: PathBuf,
	pub change_type: FileChangeType,
}

/// The module manifest of the root module at `dir` changed on disk.
#[derive(Debug, Clone)]
pub struct ManifestChangeEvent {
	pub dir: DirHandle,
	pub change_type: FileChangeType,
}

/// The provider lock file of the root module at `dir` changed on disk.
#[derive(Debug, Clone)]
pub struct PluginLockChangeEvent {
	pub dir: DirHandle,
	pub change_type: FileChangeType,
}
