//! Engine state: per-directory records with copy-on-write snapshots, plus the change
//! notification queue consumers poll for coalesced summaries.

pub mod changes;
mod errors;
pub mod module;
pub mod registry;
pub mod root;

pub use changes::{ChangeBatch, Changes, ChangeStore, PendingJobs};
pub(crate) use errors::stored_io_error;
pub use errors::{StateError, StoredError};
pub use module::{
	DiagnosticSource, ModuleArtifact, ModuleRecord, ModuleStore, MAX_MODULE_NESTING,
};
pub use registry::RegistryStore;
pub use root::{
	parse_lock_file, InstalledProviders, ModManifest, ModManifestRecord, RootArtifact,
	RootRecord, RootStore, DATA_DIR_NAME, LOCK_FILE_NAME, MANIFEST_REL_PATH,
};

/// Lifecycle of one computed artifact on a record.
///
/// `Unknown` is the admission ticket: a job may only start computing an artifact whose
/// state is `Unknown` (or when told to ignore state), which is what de-duplicates
/// concurrent jobs targeting the same artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum OpState {
	#[default]
	Unknown,
	Queued,
	Loading,
	Loaded,
}
