//! Job bodies for root module installation artifacts.

use std::{fmt, sync::Arc};

use gw_task_system::{DirHandle, ExecStatus, FollowupGraph, Job, WorkContext};
use tracing::warn;

use crate::{
	features::modules::ModuleWorkKind,
	state::{
		parse_lock_file, stored_io_error, InstalledProviders, ModManifest, RootArtifact,
		StateError, LOCK_FILE_NAME, MANIFEST_REL_PATH,
	},
	work::{CoreWork, OpType, WorkError},
};

use super::RootModulesFeature;

#[derive(Debug, Clone, Copy)]
pub(crate) enum RootWorkKind {
	ParseModuleManifest,
	GetInstalledProviders,
}

pub struct RootWork {
	feature: Arc<RootModulesFeature>,
	kind: RootWorkKind,
}

impl fmt::Debug for RootWork {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("RootWork").field(&self.kind).finish()
	}
}

impl RootWork {
	pub(crate) fn new(feature: Arc<RootModulesFeature>, kind: RootWorkKind) -> Self {
		Self { feature, kind }
	}

	pub(crate) fn op_type(&self) -> OpType {
		match self.kind {
			RootWorkKind::ParseModuleManifest => OpType::ParseModuleManifest,
			RootWorkKind::GetInstalledProviders => OpType::GetInstalledProviders,
		}
	}

	pub(crate) async fn run(&self, ctx: &WorkContext) -> Result<ExecStatus, WorkError> {
		match self.kind {
			RootWorkKind::ParseModuleManifest => self.parse_module_manifest(ctx),
			RootWorkKind::GetInstalledProviders => self.get_installed_providers(ctx),
		}
	}

	fn parse_module_manifest(&self, ctx: &WorkContext) -> Result<ExecStatus, WorkError> {
		let path = ctx.dir().path();
		let roots = &self.feature.roots;

		if !roots.begin_artifact(path, RootArtifact::ModManifest, ctx.ignore_state())? {
			return Ok(ExecStatus::StateNotChanged);
		}

		let manifest_path = path.join(MANIFEST_REL_PATH);
		if !self.feature.fs.is_file(&manifest_path) {
			// No modules installed yet; an absent manifest is a valid, empty state
			roots.update_mod_manifest(path, None, None)?;
			return Ok(ExecStatus::Done);
		}

		let raw = match self.feature.fs.read_to_string(&manifest_path) {
			Ok(raw) => raw,
			Err(err) => {
				roots.update_mod_manifest(path, None, Some(stored_io_error(&err)))?;
				return Err(err.into());
			}
		};

		match ModManifest::parse(&raw) {
			Ok(manifest) => {
				roots.update_mod_manifest(path, Some(manifest), None)?;
				Ok(ExecStatus::Done)
			}
			Err(err) => {
				let err = Arc::new(err);
				roots.update_mod_manifest(path, None, Some(err.clone()))?;
				Err(WorkError::ManifestParse(err))
			}
		}
	}

	fn get_installed_providers(&self, ctx: &WorkContext) -> Result<ExecStatus, WorkError> {
		let path = ctx.dir().path();
		let roots = &self.feature.roots;

		if !roots.begin_artifact(path, RootArtifact::InstalledProviders, ctx.ignore_state())? {
			return Ok(ExecStatus::StateNotChanged);
		}

		let lock_path = path.join(LOCK_FILE_NAME);
		if !self.feature.fs.is_file(&lock_path) {
			roots.update_installed_providers(path, InstalledProviders::new(), None)?;
			return Ok(ExecStatus::Done);
		}

		let raw = match self.feature.fs.read_to_string(&lock_path) {
			Ok(raw) => raw,
			Err(err) => {
				roots.update_installed_providers(
					path,
					InstalledProviders::new(),
					Some(stored_io_error(&err)),
				)?;
				return Err(err.into());
			}
		};

		match parse_lock_file(&raw) {
			Ok(providers) => {
				roots.update_installed_providers(path, providers, None)?;
				Ok(ExecStatus::Done)
			}
			Err(err) => {
				let err = Arc::new(err);
				roots.update_installed_providers(
					path,
					InstalledProviders::new(),
					Some(err.clone()),
				)?;
				Err(WorkError::LockFileParse(err))
			}
		}
	}

	/// A freshly parsed manifest names the installed module directories; each gets the
	/// parse and metadata stages of the module pipeline, without first-level fan-out.
	pub(crate) fn followups(
		&self,
		ctx: &WorkContext,
		_result: &Result<ExecStatus, WorkError>,
	) -> FollowupGraph<CoreWork> {
		let RootWorkKind::ParseModuleManifest = self.kind else {
			return FollowupGraph::default();
		};

		let Ok(record) = self.feature.roots.record(ctx.dir().path()) else {
			return FollowupGraph::default();
		};
		let Some(manifest) = &record.mod_manifest else {
			return FollowupGraph::default();
		};

		let mut graph = FollowupGraph::new();
		for module_path in manifest.module_dirs(ctx.dir().path()) {
			if !self.feature.fs.is_dir(&module_path) {
				continue;
			}

			let mut ignore_state = ctx.ignore_state();
			match self.feature.modules.store.add(module_path.clone()) {
				Ok(()) => {}
				Err(StateError::AlreadyExists { .. }) => ignore_state = false,
				Err(err) => {
					warn!(
						path = %module_path.display(),
						"failed to add installed module: {err}"
					);
					continue;
				}
			}

			let dir = DirHandle::from_path(module_path);
			let parse = graph.push(
				Job::new(
					dir.clone(),
					self.feature
						.modules
						.work(ModuleWorkKind::ParseConfiguration),
				)
				.ignoring_state(ignore_state),
			);
			graph.push_after(
				Job::new(
					dir,
					self.feature
						.modules
						.work(ModuleWorkKind::LoadMetadata { first_level: false }),
				)
				.ignoring_state(ignore_state),
				vec![parse],
			);
		}
		graph
	}
}
