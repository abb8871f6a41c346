//! Store of documents currently open in the editor.
//!
//! Open documents influence scheduling twice: jobs for directories with open documents are
//! dispatched first, and change batches for them are flagged so diagnostics can be pushed
//! eagerly.

use std::{
	collections::HashMap,
	path::{Path, PathBuf},
	sync::RwLock,
};

use gw_task_system::{DirHandle, DocumentLookup};

use crate::state::StateError;

const POISONED_LOCK: &str = "document store lock poisoned";

#[derive(Debug, Clone)]
pub struct Document {
	pub path: PathBuf,
	pub language_id: String,
	pub text: String,
	pub version: i32,
}

#[derive(Debug, Default)]
pub struct DocumentStore {
	inner: RwLock<HashMap<PathBuf, Document>>,
}

impl DocumentStore {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn open(&self, path: PathBuf, language_id: impl Into<String>, text: impl Into<String>) {
		let mut inner = self.inner.write().expect(POISONED_LOCK);
		inner.insert(
			path.clone(),
			Document {
				path,
				language_id: language_id.into(),
				text: text.into(),
				version: 0,
			},
		);
	}

	pub fn update(&self, path: &Path, text: impl Into<String>) -> Result<(), StateError> {
		let mut inner = self.inner.write().expect(POISONED_LOCK);
		let doc = inner.get_mut(path).ok_or_else(|| StateError::DocumentNotFound {
			path: path.to_path_buf(),
		})?;
		doc.text = text.into();
		doc.version += 1;
		Ok(())
	}

	pub fn close(&self, path: &Path) {
		self.inner.write().expect(POISONED_LOCK).remove(path);
	}

	#[must_use]
	pub fn get(&self, path: &Path) -> Option<Document> {
		self.inner.read().expect(POISONED_LOCK).get(path).cloned()
	}

	#[must_use]
	pub fn open_documents_in(&self, dir: &DirHandle) -> Vec<Document> {
		let inner = self.inner.read().expect(POISONED_LOCK);
		let mut docs = inner
			.values()
			.filter(|doc| doc.path.parent() == Some(dir.path()))
			.cloned()
			.collect::<Vec<_>>();
		docs.sort_by(|a, b| a.path.cmp(&b.path));
		docs
	}
}

impl DocumentLookup for DocumentStore {
	fn has_open_documents(&self, dir: &DirHandle) -> bool {
		self.inner
			.read()
			.expect(POISONED_LOCK)
			.values()
			.any(|doc| doc.path.parent() == Some(dir.path()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tracks_open_documents_per_directory() {
		let store = DocumentStore::new();
		let dir = DirHandle::from_path("/mod");

		assert!(!store.has_open_documents(&dir));

		store.open(PathBuf::from("/mod/main.gwk"), "groundwork", "variable region\n");
		assert!(store.has_open_documents(&dir));
		assert!(!store.has_open_documents(&DirHandle::from_path("/other")));

		let docs = store.open_documents_in(&dir);
		assert_eq!(docs.len(), 1);
		assert_eq!(docs[0].language_id, "groundwork");
		assert!(store.open_documents_in(&DirHandle::from_path("/other")).is_empty());

		store.update(Path::new("/mod/main.gwk"), "variable zone\n").unwrap();
		assert_eq!(store.get(Path::new("/mod/main.gwk")).unwrap().version, 1);

		store.close(Path::new("/mod/main.gwk"));
		assert!(!store.has_open_documents(&dir));
	}

	#[test]
	fn update_of_unknown_document_fails() {
		let store = DocumentStore::new();
		assert!(matches!(
			store.update(Path::new("/mod/main.gwk"), ""),
			Err(StateError::DocumentNotFound { .. })
		));
	}
}
