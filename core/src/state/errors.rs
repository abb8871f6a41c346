use std::{io, path::PathBuf, sync::Arc};

use thiserror::Error;

/// Last error recorded alongside an artifact, shared by every snapshot that carries it.
pub type StoredError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Copies an I/O error so one instance can be recorded with the artifact while the
/// original is returned to the scheduler (`io::Error` is not `Clone`).
pub(crate) fn stored_io_error(err: &io::Error) -> StoredError {
	Arc::new(io::Error::new(err.kind(), err.to_string()))
}

#[derive(Debug, Error)]
pub enum StateError {
	#[error("record for {} already exists", path.display())]
	AlreadyExists { path: PathBuf },
	#[error("no record for {}", path.display())]
	RecordNotFound { path: PathBuf },
	#[error("no open document at {}", path.display())]
	DocumentNotFound { path: PathBuf },
	#[error("metadata for module {} not loaded yet", path.display())]
	MetadataNotLoaded { path: PathBuf },
	#[error("module nesting under {} exceeds the maximum of {max} levels", path.display())]
	TooDeepNesting { path: PathBuf, max: usize },
}
