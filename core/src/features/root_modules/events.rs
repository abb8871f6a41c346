//! Event handlers for root module directories.

use std::{path::Path, sync::Arc};

use gw_task_system::{DirHandle, Job, JobId};
use tracing::warn;

use crate::{
	event::{
		DidChangeWatchedEvent, DidOpenEvent, DiscoverEvent, FileChangeType, ManifestChangeEvent,
		PluginLockChangeEvent,
	},
	fs::normalize_path,
	lang::LANGUAGE_ID,
	state::{
		InstalledProviders, OpState, RootArtifact, DATA_DIR_NAME, LOCK_FILE_NAME,
		MANIFEST_REL_PATH,
	},
	work::CoreWork,
};

use super::{
	work::{RootWork, RootWorkKind},
	RootModulesFeature,
};

impl RootModulesFeature {
	pub(crate) fn work(self: &Arc<Self>, kind: RootWorkKind) -> CoreWork {
		CoreWork::Root(RootWork::new(Arc::clone(self), kind))
	}

	/// Whether `path` looks like a root module: it carries a lock file or the installer's
	/// data directory.
	fn is_root_dir(&self, path: &Path, filenames: &[String]) -> bool {
		filenames.iter().any(|name| name == LOCK_FILE_NAME)
			|| self.fs.is_dir(&path.join(DATA_DIR_NAME))
	}

	fn enqueue_root_jobs(self: &Arc<Self>, dir: &DirHandle, ignore_state: bool) -> Vec<JobId> {
		let mut ids = Vec::new();
		if let Some(id) = self.enqueue_manifest_job(dir.clone(), ignore_state) {
			ids.push(id);
		}
		if let Some(id) = self.enqueue_providers_job(dir.clone(), ignore_state) {
			ids.push(id);
		}
		ids
	}

	pub(crate) fn enqueue_manifest_job(
		self: &Arc<Self>,
		dir: DirHandle,
		ignore_state: bool,
	) -> Option<JobId> {
		if ignore_state {
			// Mark the artifact stale before the job lands, so readers see it coming
			if let Err(err) = self.roots.set_artifact_state(
				dir.path(),
				RootArtifact::ModManifest,
				OpState::Queued,
			) {
				warn!(dir = %dir, "failed to queue manifest state: {err}");
				return None;
			}
		}
		Some(self.jobs.enqueue(
			Job::new(dir, self.work(RootWorkKind::ParseModuleManifest))
				.ignoring_state(ignore_state),
		))
	}

	pub(crate) fn enqueue_providers_job(
		self: &Arc<Self>,
		dir: DirHandle,
		ignore_state: bool,
	) -> Option<JobId> {
		if ignore_state {
			if let Err(err) = self.roots.set_artifact_state(
				dir.path(),
				RootArtifact::InstalledProviders,
				OpState::Queued,
			) {
				warn!(dir = %dir, "failed to queue providers state: {err}");
				return None;
			}
		}
		Some(self.jobs.enqueue(
			Job::new(dir, self.work(RootWorkKind::GetInstalledProviders))
				.ignoring_state(ignore_state),
		))
	}

	pub(crate) fn handle_discover(self: &Arc<Self>, event: &DiscoverEvent) -> Vec<JobId> {
		let path = normalize_path(&event.path);
		if !self.is_root_dir(&path, &event.filenames) {
			return Vec::new();
		}
		if let Err(err) = self.roots.add_if_not_exists(path.clone()) {
			warn!(path = %path.display(), "failed to add discovered root: {err}");
			return Vec::new();
		}
		self.enqueue_root_jobs(&DirHandle::from_path(path), false)
	}

	pub(crate) fn handle_did_open(self: &Arc<Self>, event: &DidOpenEvent) -> Vec<JobId> {
		if event.language_id != LANGUAGE_ID {
			return Vec::new();
		}

		let path = normalize_path(event.dir.path());
		if let Err(err) = self.roots.add_if_not_exists(path.clone()) {
			warn!(path = %path.display(), "failed to add opened root: {err}");
			return Vec::new();
		}
		self.enqueue_root_jobs(&DirHandle::from_path(path), false)
	}

	/// Watched changes to installation artifacts are translated into the dedicated
	/// manifest/lock handling based on the path's shape.
	pub(crate) fn handle_did_change_watched(
		self: &Arc<Self>,
		event: &DidChangeWatchedEvent,
	) -> Vec<JobId> {
		let path = normalize_path(&event.raw_path);

		if path.ends_with(MANIFEST_REL_PATH) {
			// Strip `manifest.json`, `modules` and the data dir to get the root
			if let Some(root) = path.ancestors().nth(3) {
				return self.handle_manifest_change(&ManifestChangeEvent {
					dir: DirHandle::from_path(root),
					change_type: event.change_type,
				});
			}
		}

		if path.ends_with(LOCK_FILE_NAME) {
			if let Some(dir) = DirHandle::parent_of(&path) {
				return self.handle_plugin_lock_change(&PluginLockChangeEvent {
					dir,
					change_type: event.change_type,
				});
			}
		}

		if event.change_type == FileChangeType::Deleted && self.roots.exists(&path) {
			self.roots.remove(&path);
		}
		Vec::new()
	}

	pub(crate) fn handle_manifest_change(
		self: &Arc<Self>,
		event: &ManifestChangeEvent,
	) -> Vec<JobId> {
		let path = normalize_path(event.dir.path());
		if let Err(err) = self.roots.add_if_not_exists(path.clone()) {
			warn!(path = %path.display(), "failed to add root for manifest change: {err}");
			return Vec::new();
		}
		let dir = DirHandle::from_path(path);

		if event.change_type == FileChangeType::Deleted {
			if let Err(err) = self.roots.update_mod_manifest(dir.path(), None, None) {
				warn!(dir = %dir, "failed to clear module manifest: {err}");
			}
			return Vec::new();
		}

		self.enqueue_manifest_job(dir, true).into_iter().collect()
	}

	pub(crate) fn handle_plugin_lock_change(
		self: &Arc<Self>,
		event: &PluginLockChangeEvent,
	) -> Vec<JobId> {
		let path = normalize_path(event.dir.path());
		if let Err(err) = self.roots.add_if_not_exists(path.clone()) {
			warn!(path = %path.display(), "failed to add root for lock change: {err}");
			return Vec::new();
		}
		let dir = DirHandle::from_path(path);

		if event.change_type == FileChangeType::Deleted {
			if let Err(err) =
				self.roots
					.update_installed_providers(dir.path(), InstalledProviders::new(), None)
			{
				warn!(dir = %dir, "failed to clear installed providers: {err}");
			}
			return Vec::new();
		}

		self.enqueue_providers_job(dir, true).into_iter().collect()
	}
}
