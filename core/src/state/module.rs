//! Snapshot-isolated store of module directory records.
//!
//! Records are kept behind `Arc`s and never mutated in place: a write clones the current
//! record, applies the change and swaps the pointer. A reader holding a snapshot keeps
//! observing exactly the state it read, however many commits land after it.

use std::{
	collections::{BTreeMap, HashMap},
	path::{Path, PathBuf},
	sync::{Arc, Mutex},
};

use gw_task_system::DirHandle;
use tokio::sync::watch;
use tracing::trace;

use crate::{
	fs::normalize_path,
	lang::{
		DeclaredModuleCall, FileDiags, ModFiles, ModuleMetadata, ProviderRequirements,
		ReferenceOrigin, ReferenceTarget, SourceAddr,
	},
};

use super::{
	changes::{Changes, ChangeStore},
	errors::{StateError, StoredError},
	OpState,
};

const POISONED_LOCK: &str = "module store lock poisoned";
const VERSION_CLOSED: &str = "module store version channel closed while store is alive";

/// Upper bound on local module call nesting when walking a module tree. A tree deeper than
/// this almost certainly contains a call cycle.
pub const MAX_MODULE_NESTING: usize = 50;

/// Which diagnostics producer a set of diagnostics came from. Each producer owns its slot;
/// one producer updating never clobbers another's results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticSource {
	Parsing,
	SchemaValidation,
	ReferenceValidation,
	VariablesValidation,
}

/// Per-artifact addressing for state transitions on a [`ModuleRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleArtifact {
	Metadata,
	PreloadedEmbeddedSchema,
	ReferenceTargets,
	ReferenceOrigins,
	Diagnostics(DiagnosticSource),
}

#[derive(Debug, Clone)]
pub struct ModuleRecord {
	path: PathBuf,

	pub parsed_files: ModFiles,
	pub parsing_err: Option<StoredError>,

	pub meta: ModuleMetadata,
	pub meta_err: Option<StoredError>,
	pub meta_state: OpState,

	pub preload_embedded_schema_state: OpState,

	pub ref_targets: Vec<ReferenceTarget>,
	pub ref_targets_err: Option<StoredError>,
	pub ref_targets_state: OpState,

	pub ref_origins: Vec<ReferenceOrigin>,
	pub ref_origins_err: Option<StoredError>,
	pub ref_origins_state: OpState,

	pub diagnostics: BTreeMap<DiagnosticSource, FileDiags>,
	diagnostics_state: BTreeMap<DiagnosticSource, OpState>,
}

impl ModuleRecord {
	fn new(path: PathBuf) -> Self {
		Self {
			path,
			parsed_files: ModFiles::new(),
			parsing_err: None,
			meta: ModuleMetadata::default(),
			meta_err: None,
			meta_state: OpState::Unknown,
			preload_embedded_schema_state: OpState::Unknown,
			ref_targets: Vec::new(),
			ref_targets_err: None,
			ref_targets_state: OpState::Unknown,
			ref_origins: Vec::new(),
			ref_origins_err: None,
			ref_origins_state: OpState::Unknown,
			diagnostics: BTreeMap::new(),
			diagnostics_state: BTreeMap::new(),
		}
	}

	#[must_use]
	pub fn path(&self) -> &Path {
		&self.path
	}

	#[must_use]
	pub fn artifact_state(&self, artifact: ModuleArtifact) -> OpState {
		match artifact {
			ModuleArtifact::Metadata => self.meta_state,
			ModuleArtifact::PreloadedEmbeddedSchema => self.preload_embedded_schema_state,
			ModuleArtifact::ReferenceTargets => self.ref_targets_state,
			ModuleArtifact::ReferenceOrigins => self.ref_origins_state,
			ModuleArtifact::Diagnostics(source) => self
				.diagnostics_state
				.get(&source)
				.copied()
				.unwrap_or_default(),
		}
	}

	fn set_artifact_state(&mut self, artifact: ModuleArtifact, state: OpState) {
		match artifact {
			ModuleArtifact::Metadata => self.meta_state = state,
			ModuleArtifact::PreloadedEmbeddedSchema => {
				self.preload_embedded_schema_state = state;
			}
			ModuleArtifact::ReferenceTargets => self.ref_targets_state = state,
			ModuleArtifact::ReferenceOrigins => self.ref_origins_state = state,
			ModuleArtifact::Diagnostics(source) => {
				self.diagnostics_state.insert(source, state);
			}
		}
	}

	fn diagnostics_count(&self) -> usize {
		self.diagnostics
			.values()
			.flat_map(BTreeMap::values)
			.map(Vec::len)
			.sum()
	}
}

#[derive(Debug)]
pub struct ModuleStore {
	inner: Mutex<HashMap<PathBuf, Arc<ModuleRecord>>>,
	version_tx: watch::Sender<u64>,
	changes: Arc<ChangeStore>,
	max_module_nesting: usize,
}

impl ModuleStore {
	#[must_use]
	pub fn new(changes: Arc<ChangeStore>) -> Self {
		Self::with_max_nesting(changes, MAX_MODULE_NESTING)
	}

	#[must_use]
	pub fn with_max_nesting(changes: Arc<ChangeStore>, max_module_nesting: usize) -> Self {
		let (version_tx, _) = watch::channel(0);
		Self {
			inner: Mutex::new(HashMap::new()),
			version_tx,
			changes,
			max_module_nesting,
		}
	}

	pub fn add(&self, path: PathBuf) -> Result<(), StateError> {
		let record = {
			let mut inner = self.inner.lock().expect(POISONED_LOCK);
			if inner.contains_key(&path) {
				return Err(StateError::AlreadyExists { path });
			}
			let record = Arc::new(ModuleRecord::new(path.clone()));
			inner.insert(path, Arc::clone(&record));
			record
		};

		trace!(path = %record.path().display(), "added module record");
		self.queue_diff(None, Some(&record));
		self.bump();
		Ok(())
	}

	pub fn add_if_not_exists(&self, path: PathBuf) -> Result<(), StateError> {
		match self.add(path) {
			Err(StateError::AlreadyExists { .. }) => Ok(()),
			other => other,
		}
	}

	/// Removes the record, if present. Removing an absent record is a no-op, so racing
	/// deletion events settle harmlessly.
	pub fn remove(&self, path: &Path) {
		let removed = self.inner.lock().expect(POISONED_LOCK).remove(path);
		if let Some(old) = removed {
			trace!(path = %old.path().display(), "removed module record");
			self.queue_diff(Some(&old), None);
			self.bump();
		}
	}

	pub fn record(&self, path: &Path) -> Result<Arc<ModuleRecord>, StateError> {
		self.get(path).ok_or_else(|| StateError::RecordNotFound {
			path: path.to_path_buf(),
		})
	}

	#[must_use]
	pub fn get(&self, path: &Path) -> Option<Arc<ModuleRecord>> {
		self.inner.lock().expect(POISONED_LOCK).get(path).cloned()
	}

	#[must_use]
	pub fn exists(&self, path: &Path) -> bool {
		self.inner.lock().expect(POISONED_LOCK).contains_key(path)
	}

	#[must_use]
	pub fn list(&self) -> Vec<Arc<ModuleRecord>> {
		let inner = self.inner.lock().expect(POISONED_LOCK);
		let mut records = inner.values().cloned().collect::<Vec<_>>();
		records.sort_by(|a, b| a.path.cmp(&b.path));
		records
	}

	pub fn declared_module_calls(
		&self,
		path: &Path,
	) -> Result<BTreeMap<String, DeclaredModuleCall>, StateError> {
		Ok(self.record(path)?.meta.module_calls.clone())
	}

	/// The decoded metadata of a local module, available only once it reached `Loaded`.
	/// Callers needing to block on readiness combine this with [`Self::await_metadata_loaded`].
	pub fn local_module_meta(&self, path: &Path) -> Result<ModuleMetadata, StateError> {
		let record = self.record(path)?;
		if record.meta_state != OpState::Loaded {
			return Err(StateError::MetadataNotLoaded {
				path: path.to_path_buf(),
			});
		}
		Ok(record.meta.clone())
	}

	/// Atomic admission guard for a job about to (re)compute an artifact.
	///
	/// Returns `false` when the artifact was already claimed or computed and `ignore_state`
	/// is not set; otherwise transitions it to `Loading` and returns `true`. Two concurrent
	/// jobs targeting the same artifact agree on exactly one winner.
	pub fn begin_artifact(
		&self,
		path: &Path,
		artifact: ModuleArtifact,
		ignore_state: bool,
	) -> Result<bool, StateError> {
		self.mutate(path, |record| {
			if record.artifact_state(artifact) != OpState::Unknown && !ignore_state {
				false
			} else {
				record.set_artifact_state(artifact, OpState::Loading);
				true
			}
		})
	}

	pub fn set_artifact_state(
		&self,
		path: &Path,
		artifact: ModuleArtifact,
		state: OpState,
	) -> Result<(), StateError> {
		self.mutate(path, |record| record.set_artifact_state(artifact, state))
	}

	pub fn update_parsed_files(
		&self,
		path: &Path,
		files: ModFiles,
		err: Option<StoredError>,
	) -> Result<(), StateError> {
		self.mutate(path, |record| {
			record.parsed_files = files;
			record.parsing_err = err;
		})
	}

	/// Commits decoded metadata. The `Loaded` transition is applied even when the commit
	/// fails, so waiters on metadata completion are never left hanging.
	pub fn update_metadata(
		&self,
		path: &Path,
		meta: ModuleMetadata,
		err: Option<StoredError>,
	) -> Result<(), StateError> {
		let update = self.mutate(path, |record| {
			record.meta = meta;
			record.meta_err = err;
		});
		let state = self.set_artifact_state(path, ModuleArtifact::Metadata, OpState::Loaded);
		update.and(state)
	}

	pub fn update_reference_targets(
		&self,
		path: &Path,
		targets: Vec<ReferenceTarget>,
		err: Option<StoredError>,
	) -> Result<(), StateError> {
		let update = self.mutate(path, |record| {
			record.ref_targets = targets;
			record.ref_targets_err = err;
		});
		let state =
			self.set_artifact_state(path, ModuleArtifact::ReferenceTargets, OpState::Loaded);
		update.and(state)
	}

	pub fn update_reference_origins(
		&self,
		path: &Path,
		origins: Vec<ReferenceOrigin>,
		err: Option<StoredError>,
	) -> Result<(), StateError> {
		let update = self.mutate(path, |record| {
			record.ref_origins = origins;
			record.ref_origins_err = err;
		});
		let state =
			self.set_artifact_state(path, ModuleArtifact::ReferenceOrigins, OpState::Loaded);
		update.and(state)
	}

	pub fn update_diagnostics(
		&self,
		path: &Path,
		source: DiagnosticSource,
		diags: FileDiags,
	) -> Result<(), StateError> {
		let update = self.mutate(path, |record| {
			record.diagnostics.insert(source, diags);
		});
		let state = self.set_artifact_state(
			path,
			ModuleArtifact::Diagnostics(source),
			OpState::Loaded,
		);
		update.and(state)
	}

	/// Providers required by the module at `path` and, transitively, by every local module
	/// it calls. Bounded by the nesting maximum so call cycles terminate with an error
	/// rather than a stack overflow.
	pub fn provider_requirements_for_module(
		&self,
		path: &Path,
	) -> Result<ProviderRequirements, StateError> {
		self.provider_requirements_nested(path, 0)
	}

	fn provider_requirements_nested(
		&self,
		path: &Path,
		level: usize,
	) -> Result<ProviderRequirements, StateError> {
		if level > self.max_module_nesting {
			return Err(StateError::TooDeepNesting {
				path: path.to_path_buf(),
				max: self.max_module_nesting,
			});
		}

		// A local call pointing at a directory we never indexed contributes nothing
		let Some(record) = self.get(path) else {
			return Ok(ProviderRequirements::new());
		};

		let mut requirements = record.meta.provider_requirements.clone();
		for module_call in record.meta.module_calls.values() {
			let SourceAddr::Local(rel) = &module_call.source else {
				continue;
			};
			let nested_path = normalize_path(&path.join(rel));
			let nested = self.provider_requirements_nested(&nested_path, level + 1)?;
			for (addr, constraints) in nested {
				let merged = requirements.entry(addr).or_default();
				for constraint in constraints {
					if !merged.contains(&constraint) {
						merged.push(constraint);
					}
				}
			}
		}
		Ok(requirements)
	}

	/// Blocks until the record at `path` exists and satisfies `pred`. The predicate is
	/// re-checked on every committed write to the store.
	pub async fn wait_until(&self, path: &Path, pred: impl Fn(&ModuleRecord) -> bool) {
		let mut version_rx = self.version_tx.subscribe();
		loop {
			version_rx.borrow_and_update();
			if self.get(path).is_some_and(|record| pred(&record)) {
				return;
			}
			version_rx.changed().await.expect(VERSION_CLOSED);
		}
	}

	pub async fn await_metadata_loaded(&self, path: &Path) {
		self.wait_until(path, |record| record.meta_state == OpState::Loaded)
			.await;
	}

	fn mutate<R>(
		&self,
		path: &Path,
		f: impl FnOnce(&mut ModuleRecord) -> R,
	) -> Result<R, StateError> {
		let (old, new, out) = {
			let mut inner = self.inner.lock().expect(POISONED_LOCK);
			let old = Arc::clone(inner.get(path).ok_or_else(|| StateError::RecordNotFound {
				path: path.to_path_buf(),
			})?);
			let mut draft = ModuleRecord::clone(&old);
			let out = f(&mut draft);
			let new = Arc::new(draft);
			inner.insert(path.to_path_buf(), Arc::clone(&new));
			(old, new, out)
		};

		self.queue_diff(Some(&old), Some(&new));
		self.bump();
		Ok(out)
	}

	/// Additions and removals always notify; in-place updates only when something a
	/// consumer can observe actually differs. State-only transitions stay silent.
	fn queue_diff(&self, old: Option<&ModuleRecord>, new: Option<&ModuleRecord>) {
		let Some(record) = new.or(old) else {
			return;
		};
		let changes = diff_records(old, new);
		if changes.any() || old.is_none() || new.is_none() {
			self.changes
				.queue_change(DirHandle::from_path(record.path()), changes);
		}
	}

	fn bump(&self) {
		self.version_tx.send_modify(|v| *v += 1);
	}
}

fn diff_records(old: Option<&ModuleRecord>, new: Option<&ModuleRecord>) -> Changes {
	if new.is_none() {
		return Changes::removal();
	}

	let default = ModuleRecord::new(PathBuf::new());
	let old = old.unwrap_or(&default);
	let new = new.expect("checked above");

	Changes {
		is_removal: false,
		core_requirements: old.meta.core_requirements != new.meta.core_requirements,
		backend: old.meta.backend != new.meta.backend,
		provider_requirements: old.meta.provider_requirements != new.meta.provider_requirements,
		installed_providers: false,
		module_manifest: false,
		diagnostics: old.diagnostics_count() != new.diagnostics_count(),
		reference_origins: old.ref_origins != new.ref_origins,
		reference_targets: old.ref_targets != new.ref_targets,
	}
}
