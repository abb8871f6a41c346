//! Event handlers for variable definition files.

use std::sync::Arc;

use gw_task_system::{DirHandle, Job, JobId};
use tracing::warn;

use crate::{
	event::{DidChangeEvent, DidChangeWatchedEvent, DidOpenEvent, FileChangeType},
	fs::normalize_path,
	lang::{is_vars_filename, VARS_LANGUAGE_ID},
	work::CoreWork,
};

use super::{work::VariablesWork, VariablesFeature};

impl VariablesFeature {
	pub(crate) fn work(self: &Arc<Self>) -> CoreWork {
		CoreWork::Variables(VariablesWork::new(Arc::clone(self)))
	}

	/// Schedules validation for the module at `dir`, together with the decode pipeline
	/// producing the metadata the validation waits on.
	fn schedule(self: &Arc<Self>, dir: DirHandle, ignore_state: bool) -> Vec<JobId> {
		if let Err(err) = self
			.modules
			.store
			.add_if_not_exists(dir.path().to_path_buf())
		{
			warn!(dir = %dir, "failed to add module for variable validation: {err}");
			return Vec::new();
		}

		let mut ids = self.modules.decode_dir(dir.clone(), false);
		ids.push(
			self.jobs
				.enqueue(Job::new(dir, self.work()).ignoring_state(ignore_state)),
		);
		ids
	}

	pub(crate) fn handle_did_open(self: &Arc<Self>, event: &DidOpenEvent) -> Vec<JobId> {
		if event.language_id != VARS_LANGUAGE_ID {
			return Vec::new();
		}
		self.schedule(DirHandle::from_path(normalize_path(event.dir.path())), false)
	}

	pub(crate) fn handle_did_change(self: &Arc<Self>, event: &DidChangeEvent) -> Vec<JobId> {
		// Any edit in the directory can change the verdict: either a definitions file
		// itself or the configuration declaring the variables
		let open_vars_doc = self
			.documents
			.open_documents_in(&event.dir)
			.iter()
			.any(|doc| doc.language_id == VARS_LANGUAGE_ID);
		if !open_vars_doc {
			return Vec::new();
		}
		self.schedule(DirHandle::from_path(normalize_path(event.dir.path())), true)
	}

	pub(crate) fn handle_did_change_watched(
		self: &Arc<Self>,
		event: &DidChangeWatchedEvent,
	) -> Vec<JobId> {
		let path = normalize_path(&event.raw_path);
		let is_vars = path
			.file_name()
			.map(|name| name.to_string_lossy())
			.is_some_and(|name| is_vars_filename(&name));
		if !is_vars {
			return Vec::new();
		}
		let Some(dir) = DirHandle::parent_of(&path) else {
			return Vec::new();
		};

		if event.change_type == FileChangeType::Deleted && !self.modules.store.exists(dir.path()) {
			return Vec::new();
		}
		self.schedule(dir, true)
	}
}
