//! Event handlers: translate bus events into job graphs.

use std::sync::Arc;

use gw_task_system::{DirHandle, Job, JobId, JobPriority};
use tracing::{trace, warn};

use crate::{
	event::{DidChangeEvent, DidChangeWatchedEvent, DidOpenEvent, DiscoverEvent, FileChangeType},
	fs::normalize_path,
	lang::{is_config_filename, LANGUAGE_ID},
	work::CoreWork,
};

use super::{
	work::{ModuleWork, ModuleWorkKind},
	ModulesFeature,
};

impl ModulesFeature {
	pub(crate) fn work(self: &Arc<Self>, kind: ModuleWorkKind) -> CoreWork {
		CoreWork::Module(ModuleWork::new(Arc::clone(self), kind))
	}

	/// Schedules the decode pipeline for one module directory.
	///
	/// Parse and metadata are scheduled eagerly; schema preload, reference decoding and
	/// nested local modules follow as the metadata job's followup graph, because their
	/// shape depends on what the metadata says.
	pub(crate) fn decode_dir(self: &Arc<Self>, dir: DirHandle, ignore_state: bool) -> Vec<JobId> {
		let parse = self.jobs.enqueue(
			Job::new(dir.clone(), self.work(ModuleWorkKind::ParseConfiguration))
				.ignoring_state(ignore_state),
		);
		let meta = self.jobs.enqueue(
			Job::new(
				dir.clone(),
				self.work(ModuleWorkKind::LoadMetadata { first_level: true }),
			)
			.ignoring_state(ignore_state)
			.depends_on([parse]),
		);

		let mut ids = vec![parse, meta];

		if self.validation_enabled {
			ids.push(self.jobs.enqueue(
				Job::new(dir.clone(), self.work(ModuleWorkKind::SchemaValidation))
					.ignoring_state(ignore_state)
					.depends_on([parse, meta]),
			));
		}

		// Registry data is network bound and never blocks local analysis
		ids.push(self.jobs.enqueue(
			Job::new(dir, self.work(ModuleWorkKind::GetRegistryData))
				.with_priority(JobPriority::Low)
				.depends_on([meta]),
		));

		ids
	}

	pub(crate) fn handle_discover(self: &Arc<Self>, event: DiscoverEvent) -> Vec<JobId> {
		if !event.filenames.iter().any(|name| is_config_filename(name)) {
			return Vec::new();
		}

		let path = normalize_path(&event.path);
		if let Err(err) = self.store.add_if_not_exists(path.clone()) {
			warn!(path = %path.display(), "failed to add discovered module: {err}");
			return Vec::new();
		}
		self.decode_dir(DirHandle::from_path(path), false)
	}

	pub(crate) fn handle_did_open(self: &Arc<Self>, event: &DidOpenEvent) -> Vec<JobId> {
		// Editors open all kinds of documents; only configuration ones make a module
		if event.language_id != LANGUAGE_ID {
			return Vec::new();
		}

		let path = normalize_path(event.dir.path());
		if let Err(err) = self.store.add_if_not_exists(path.clone()) {
			warn!(path = %path.display(), "failed to add opened module: {err}");
			return Vec::new();
		}
		self.decode_dir(DirHandle::from_path(path), false)
	}

	pub(crate) fn handle_did_change(self: &Arc<Self>, event: &DidChangeEvent) -> Vec<JobId> {
		let path = normalize_path(event.dir.path());
		if let Err(err) = self.store.add_if_not_exists(path.clone()) {
			warn!(path = %path.display(), "failed to add changed module: {err}");
			return Vec::new();
		}
		// The edit invalidates previous artifacts, so recompute regardless of their state
		self.decode_dir(DirHandle::from_path(path), true)
	}

	pub(crate) fn handle_did_change_watched(
		self: &Arc<Self>,
		event: &DidChangeWatchedEvent,
	) -> Vec<JobId> {
		let path = normalize_path(&event.raw_path);

		match event.change_type {
			FileChangeType::Deleted => {
				// A deleted path cannot be stat-ed; our own records disambiguate it
				if self.store.exists(&path) {
					let dir = DirHandle::from_path(path.clone());
					let dequeued = self.jobs.dequeue_jobs_for_dir(&dir);
					trace!(
						dir = %dir,
						dequeued,
						"module directory deleted, dropped queued jobs"
					);
					self.store.remove(&path);
					return Vec::new();
				}

				let Some(dir) = DirHandle::parent_of(&path) else {
					return Vec::new();
				};
				if self.store.exists(dir.path()) {
					// One file of a still-existing module went away
					return self.decode_dir(dir, true);
				}
				Vec::new()
			}
			FileChangeType::Created | FileChangeType::Changed => {
				if self.fs.is_dir(&path) {
					if let Err(err) = self.store.add_if_not_exists(path.clone()) {
						warn!(path = %path.display(), "failed to add watched module: {err}");
						return Vec::new();
					}
					return self.decode_dir(DirHandle::from_path(path), true);
				}

				let is_config = path
					.file_name()
					.map(|name| name.to_string_lossy())
					.is_some_and(|name| is_config_filename(&name));
				if !is_config {
					return Vec::new();
				}

				let Some(dir) = DirHandle::parent_of(&path) else {
					return Vec::new();
				};
				if let Err(err) = self.store.add_if_not_exists(dir.path().to_path_buf()) {
					warn!(dir = %dir, "failed to add watched module: {err}");
					return Vec::new();
				}
				self.decode_dir(dir, true)
			}
		}
	}
}
