//! Job bodies of the module decode pipeline.
//!
//! Every body follows the same shape: claim the artifact (or bail with
//! `StateNotChanged`), compute from a snapshot, commit the result together with any
//! error. Completion of an artifact is committed even when its computation failed, so
//! nothing ever waits on a permanently `Loading` artifact.

use std::{fmt, sync::Arc};

use gw_task_system::{DirHandle, ExecStatus, FollowupGraph, Job, WorkContext};
use tracing::warn;

use crate::{
	fs::normalize_path,
	lang::{is_config_filename, FileDiags, MetadataDecodeError, ModFiles, Severity, SourceAddr},
	state::{stored_io_error, DiagnosticSource, ModuleArtifact, OpState, StateError, StoredError},
	work::{CoreWork, OpType, WorkError},
};

use super::ModulesFeature;

#[derive(Debug, Clone)]
pub(crate) enum ModuleWorkKind {
	ParseConfiguration,
	LoadMetadata {
		/// Whether this module was decoded directly (an open or discovered directory)
		/// rather than through a module call of another module. Only first-level decoding
		/// fans out into nested module calls and validation.
		first_level: bool,
	},
	PreloadEmbeddedSchema,
	DecodeReferenceTargets,
	DecodeReferenceOrigins,
	SchemaValidation,
	ReferenceValidation,
	GetRegistryData,
}

pub struct ModuleWork {
	feature: Arc<ModulesFeature>,
	kind: ModuleWorkKind,
}

impl fmt::Debug for ModuleWork {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("ModuleWork").field(&self.kind).finish()
	}
}

impl ModuleWork {
	pub(crate) fn new(feature: Arc<ModulesFeature>, kind: ModuleWorkKind) -> Self {
		Self { feature, kind }
	}

	pub(crate) fn op_type(&self) -> OpType {
		match self.kind {
			ModuleWorkKind::ParseConfiguration => OpType::ParseConfiguration,
			ModuleWorkKind::LoadMetadata { .. } => OpType::LoadMetadata,
			ModuleWorkKind::PreloadEmbeddedSchema => OpType::PreloadEmbeddedSchema,
			ModuleWorkKind::DecodeReferenceTargets => OpType::DecodeReferenceTargets,
			ModuleWorkKind::DecodeReferenceOrigins => OpType::DecodeReferenceOrigins,
			ModuleWorkKind::SchemaValidation => OpType::SchemaValidation,
			ModuleWorkKind::ReferenceValidation => OpType::ReferenceValidation,
			ModuleWorkKind::GetRegistryData => OpType::GetRegistryData,
		}
	}

	pub(crate) async fn run(&self, ctx: &WorkContext) -> Result<ExecStatus, WorkError> {
		match &self.kind {
			ModuleWorkKind::ParseConfiguration => self.parse_configuration(ctx),
			ModuleWorkKind::LoadMetadata { .. } => self.load_metadata(ctx),
			ModuleWorkKind::PreloadEmbeddedSchema => self.preload_embedded_schema(ctx).await,
			ModuleWorkKind::DecodeReferenceTargets => self.decode_reference_targets(ctx),
			ModuleWorkKind::DecodeReferenceOrigins => self.decode_reference_origins(ctx),
			ModuleWorkKind::SchemaValidation => self.schema_validation(ctx),
			ModuleWorkKind::ReferenceValidation => self.reference_validation(ctx),
			ModuleWorkKind::GetRegistryData => self.get_registry_data(ctx).await,
		}
	}

	fn parse_configuration(&self, ctx: &WorkContext) -> Result<ExecStatus, WorkError> {
		let path = ctx.dir().path();
		let store = &self.feature.store;

		if !store.begin_artifact(
			path,
			ModuleArtifact::Diagnostics(DiagnosticSource::Parsing),
			ctx.ignore_state(),
		)? {
			return Ok(ExecStatus::StateNotChanged);
		}

		let entries = match self.feature.fs.read_dir(path) {
			Ok(entries) => entries,
			Err(err) => {
				// The artifact still completes; the failure travels with the record
				store.update_parsed_files(path, ModFiles::new(), Some(stored_io_error(&err)))?;
				store.update_diagnostics(path, DiagnosticSource::Parsing, FileDiags::new())?;
				return Err(err.into());
			}
		};

		let mut files = ModFiles::new();
		let mut diags = FileDiags::new();
		let mut read_err: Option<StoredError> = None;

		for entry in entries {
			if entry.is_dir || !is_config_filename(&entry.name) {
				continue;
			}
			let file_path = path.join(&entry.name);

			// The editor buffer wins over whatever is on disk
			let source = match self.feature.documents.get(&file_path) {
				Some(doc) => Ok(doc.text),
				None => self.feature.fs.read_to_string(&file_path),
			};

			match source {
				Ok(source) => {
					let (file, file_diags) = self.feature.decoder.parse(&entry.name, &source);
					files.insert(entry.name.clone(), Arc::new(file));
					if !file_diags.is_empty() {
						diags.insert(entry.name.clone(), file_diags);
					}
				}
				Err(err) => {
					warn!(file = %file_path.display(), "failed to read config file: {err}");
					read_err = Some(Arc::new(err));
				}
			}
		}

		store.update_parsed_files(path, files, read_err)?;
		store.update_diagnostics(path, DiagnosticSource::Parsing, diags)?;
		Ok(ExecStatus::Done)
	}

	fn load_metadata(&self, ctx: &WorkContext) -> Result<ExecStatus, WorkError> {
		let path = ctx.dir().path();
		let store = &self.feature.store;

		if !store.begin_artifact(path, ModuleArtifact::Metadata, ctx.ignore_state())? {
			return Ok(ExecStatus::StateNotChanged);
		}

		let record = store.record(path)?;
		let (meta, diags) = self
			.feature
			.decoder
			.decode_metadata(path, &record.parsed_files);

		let error_count = diags
			.iter()
			.filter(|diag| diag.severity == Severity::Error)
			.count();

		match (error_count > 0).then(|| MetadataDecodeError { count: error_count }) {
			Some(err) => {
				store.update_metadata(path, meta, Some(Arc::new(err.clone())))?;
				Err(err.into())
			}
			None => {
				store.update_metadata(path, meta, None)?;
				Ok(ExecStatus::Done)
			}
		}
	}

	async fn preload_embedded_schema(&self, ctx: &WorkContext) -> Result<ExecStatus, WorkError> {
		let path = ctx.dir().path();
		let store = &self.feature.store;

		if !store.begin_artifact(
			path,
			ModuleArtifact::PreloadedEmbeddedSchema,
			ctx.ignore_state(),
		)? {
			return Ok(ExecStatus::StateNotChanged);
		}

		let result = match store.provider_requirements_for_module(path) {
			Ok(requirements) => self
				.feature
				.schema_client
				.preload_schemas(&requirements, ctx)
				.await
				.map_err(WorkError::from),
			Err(err) => Err(err.into()),
		};

		// Completion is committed before the error surfaces, nothing waits on `Loading`
		store.set_artifact_state(path, ModuleArtifact::PreloadedEmbeddedSchema, OpState::Loaded)?;
		result?;
		Ok(ExecStatus::Done)
	}

	fn decode_reference_targets(&self, ctx: &WorkContext) -> Result<ExecStatus, WorkError> {
		let path = ctx.dir().path();
		let store = &self.feature.store;

		if !store.begin_artifact(path, ModuleArtifact::ReferenceTargets, ctx.ignore_state())? {
			return Ok(ExecStatus::StateNotChanged);
		}

		let record = store.record(path)?;
		let targets = self
			.feature
			.decoder
			.reference_targets(&record.meta, &record.parsed_files);
		store.update_reference_targets(path, targets, None)?;
		Ok(ExecStatus::Done)
	}

	fn decode_reference_origins(&self, ctx: &WorkContext) -> Result<ExecStatus, WorkError> {
		let path = ctx.dir().path();
		let store = &self.feature.store;

		if !store.begin_artifact(path, ModuleArtifact::ReferenceOrigins, ctx.ignore_state())? {
			return Ok(ExecStatus::StateNotChanged);
		}

		let record = store.record(path)?;
		let origins = self.feature.decoder.reference_origins(&record.parsed_files);
		store.update_reference_origins(path, origins, None)?;
		Ok(ExecStatus::Done)
	}

	fn schema_validation(&self, ctx: &WorkContext) -> Result<ExecStatus, WorkError> {
		let path = ctx.dir().path();
		let store = &self.feature.store;

		if !store.begin_artifact(
			path,
			ModuleArtifact::Diagnostics(DiagnosticSource::SchemaValidation),
			ctx.ignore_state(),
		)? {
			return Ok(ExecStatus::StateNotChanged);
		}

		let record = store.record(path)?;
		let diags = self
			.feature
			.decoder
			.validate_schema(&record.meta, &record.parsed_files);
		store.update_diagnostics(path, DiagnosticSource::SchemaValidation, diags)?;
		Ok(ExecStatus::Done)
	}

	fn reference_validation(&self, ctx: &WorkContext) -> Result<ExecStatus, WorkError> {
		let path = ctx.dir().path();
		let store = &self.feature.store;

		if !store.begin_artifact(
			path,
			ModuleArtifact::Diagnostics(DiagnosticSource::ReferenceValidation),
			ctx.ignore_state(),
		)? {
			return Ok(ExecStatus::StateNotChanged);
		}

		let record = store.record(path)?;
		let diags = self
			.feature
			.decoder
			.validate_references(&record.ref_targets, &record.ref_origins);
		store.update_diagnostics(path, DiagnosticSource::ReferenceValidation, diags)?;
		Ok(ExecStatus::Done)
	}

	/// Fetches registry data for all registry-sourced module calls, skipping sources
	/// already cached. One failed lookup does not abort the rest; failures are
	/// accumulated and reported together.
	async fn get_registry_data(&self, ctx: &WorkContext) -> Result<ExecStatus, WorkError> {
		let path = ctx.dir().path();
		let record = self.feature.store.record(path)?;

		let mut errors = Vec::new();
		for module_call in record.meta.module_calls.values() {
			let SourceAddr::Registry(source) = &module_call.source else {
				continue;
			};
			if self.feature.registry_store.exists(source) {
				continue;
			}

			match self
				.feature
				.registry_client
				.module_data(source, module_call.version.as_ref(), ctx)
				.await
			{
				Ok(data) => self.feature.registry_store.add(source.clone(), data),
				Err(err) => {
					warn!(source, "registry lookup failed: {err}");
					errors.push(err);
				}
			}
		}

		if errors.is_empty() {
			Ok(ExecStatus::Done)
		} else {
			Err(WorkError::Registry { errors })
		}
	}

	/// The metadata job fans out into everything whose shape depends on the decoded
	/// metadata: nested local module calls, schema preload and reference decoding.
	/// Followups are produced even when decoding failed, so partial metadata still gets
	/// references and waiters are released.
	pub(crate) fn followups(
		&self,
		ctx: &WorkContext,
		_result: &Result<ExecStatus, WorkError>,
	) -> FollowupGraph<CoreWork> {
		let ModuleWorkKind::LoadMetadata { first_level } = &self.kind else {
			return FollowupGraph::default();
		};

		let dir = ctx.dir();
		let mut graph = FollowupGraph::new();
		let mut nested_indices = Vec::new();

		if *first_level {
			match self.feature.store.declared_module_calls(dir.path()) {
				Ok(module_calls) => {
					for module_call in module_calls.values() {
						let SourceAddr::Local(rel) = &module_call.source else {
							continue;
						};
						let nested_path = normalize_path(&dir.path().join(rel));
						if !self.feature.fs.is_dir(&nested_path) {
							continue;
						}

						// A module we already track keeps its artifacts; a new one is
						// decoded from scratch
						let mut nested_ignore = ctx.ignore_state();
						match self.feature.store.add(nested_path.clone()) {
							Ok(()) => {}
							Err(StateError::AlreadyExists { .. }) => nested_ignore = false,
							Err(err) => {
								warn!(
									path = %nested_path.display(),
									"failed to add nested module: {err}"
								);
								continue;
							}
						}

						let nested_dir = DirHandle::from_path(nested_path);
						let parse = graph.push(
							Job::new(
								nested_dir.clone(),
								self.feature.work(ModuleWorkKind::ParseConfiguration),
							)
							.ignoring_state(nested_ignore),
						);
						let meta = graph.push_after(
							Job::new(
								nested_dir,
								self.feature
									.work(ModuleWorkKind::LoadMetadata { first_level: false }),
							)
							.ignoring_state(nested_ignore),
							vec![parse],
						);
						nested_indices.push(parse);
						nested_indices.push(meta);
					}
				}
				Err(err) => {
					warn!(dir = %dir, "failed to read module calls for followups: {err}");
				}
			}
		}

		// Schema preload must see the whole local module tree's provider requirements
		let schema = graph.push_after(
			Job::new(
				dir.clone(),
				self.feature.work(ModuleWorkKind::PreloadEmbeddedSchema),
			)
			.ignoring_state(ctx.ignore_state()),
			nested_indices.clone(),
		);

		let mut ref_deps = nested_indices;
		ref_deps.push(schema);
		let targets = graph.push_after(
			Job::new(
				dir.clone(),
				self.feature.work(ModuleWorkKind::DecodeReferenceTargets),
			)
			.ignoring_state(ctx.ignore_state()),
			ref_deps.clone(),
		);
		let origins = graph.push_after(
			Job::new(
				dir.clone(),
				self.feature.work(ModuleWorkKind::DecodeReferenceOrigins),
			)
			.ignoring_state(ctx.ignore_state()),
			ref_deps,
		);

		if *first_level && self.feature.validation_enabled {
			graph.push_after(
				Job::new(
					dir.clone(),
					self.feature.work(ModuleWorkKind::ReferenceValidation),
				)
				.ignoring_state(ctx.ignore_state()),
				vec![targets, origins],
			);
		}

		graph
	}
}
