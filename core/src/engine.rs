//! Wires stores, features and schedulers into one background analysis engine and exposes
//! the entry points the server layer calls.

use std::{
	path::{Path, PathBuf},
	sync::{Arc, Mutex},
};

use gw_task_system::{DirHandle, JobId, JobPriority, JobStore, Scheduler};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
	clients::{BundledSchemaClient, RegistryClient, SchemaClient, StaticRegistryClient},
	document::DocumentStore,
	event::{
		DidChangeEvent, DidChangeWatchedEvent, DidOpenEvent, DiscoverEvent, EventBus,
		FileChangeType,
	},
	features::{ModulesFeature, RootModulesFeature, VariablesFeature},
	fs::{normalize_path, RealFs, ReadOnlyFs},
	lang::{ConfigDecoder, GwkDecoder},
	state::{ChangeBatch, ChangeStore, ModuleStore, RegistryStore, RootStore},
	work::CoreWork,
};

const POISONED_LOCK: &str = "engine lock poisoned";

pub struct EngineBuilder {
	fs: Arc<dyn ReadOnlyFs>,
	decoder: Arc<dyn ConfigDecoder>,
	schema_client: Arc<dyn SchemaClient>,
	registry_client: Arc<dyn RegistryClient>,
	validation_enabled: bool,
	high_parallelism: Option<usize>,
}

impl Default for EngineBuilder {
	fn default() -> Self {
		Self {
			fs: Arc::new(RealFs),
			decoder: Arc::new(GwkDecoder),
			schema_client: Arc::new(BundledSchemaClient::new()),
			registry_client: Arc::new(StaticRegistryClient::new()),
			validation_enabled: true,
			high_parallelism: None,
		}
	}
}

impl EngineBuilder {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with_fs(mut self, fs: Arc<dyn ReadOnlyFs>) -> Self {
		self.fs = fs;
		self
	}

	#[must_use]
	pub fn with_decoder(mut self, decoder: Arc<dyn ConfigDecoder>) -> Self {
		self.decoder = decoder;
		self
	}

	#[must_use]
	pub fn with_schema_client(mut self, client: Arc<dyn SchemaClient>) -> Self {
		self.schema_client = client;
		self
	}

	#[must_use]
	pub fn with_registry_client(mut self, client: Arc<dyn RegistryClient>) -> Self {
		self.registry_client = client;
		self
	}

	#[must_use]
	pub fn validation(mut self, enabled: bool) -> Self {
		self.validation_enabled = enabled;
		self
	}

	#[must_use]
	pub fn high_parallelism(mut self, parallelism: usize) -> Self {
		self.high_parallelism = Some(parallelism);
		self
	}

	#[must_use]
	pub fn build(self) -> Engine {
		let documents = Arc::new(DocumentStore::new());
		let documents_lookup: Arc<dyn gw_task_system::DocumentLookup> = documents.clone();
		let jobs = Arc::new(JobStore::new(Arc::clone(&documents_lookup)));
		let changes = Arc::new(ChangeStore::new(documents_lookup));
		let modules = Arc::new(ModuleStore::new(Arc::clone(&changes)));
		let roots = Arc::new(RootStore::new(Arc::clone(&changes)));
		let registry = Arc::new(RegistryStore::new());
		let bus = Arc::new(EventBus::new());

		let modules_feature = Arc::new(ModulesFeature::new(
			Arc::clone(&modules),
			Arc::clone(&jobs),
			Arc::clone(&documents),
			Arc::clone(&self.fs),
			Arc::clone(&self.decoder),
			self.schema_client,
			self.registry_client,
			Arc::clone(&registry),
			self.validation_enabled,
		));
		let root_feature = Arc::new(RootModulesFeature::new(
			Arc::clone(&roots),
			Arc::clone(&jobs),
			Arc::clone(&self.fs),
			Arc::clone(&modules_feature),
		));
		let variables_feature = Arc::new(VariablesFeature::new(
			Arc::clone(&jobs),
			Arc::clone(&documents),
			Arc::clone(&self.fs),
			self.decoder,
			Arc::clone(&modules_feature),
		));

		let high = Scheduler::new(
			Arc::clone(&jobs),
			self.high_parallelism
				.unwrap_or_else(Scheduler::<CoreWork>::default_parallelism),
			JobPriority::High,
		);
		// A single loop for network bound work mirrors its typical rate limits
		let low = Scheduler::new(Arc::clone(&jobs), 1, JobPriority::Low);

		Engine {
			documents,
			jobs,
			changes,
			modules,
			roots,
			registry,
			bus,
			fs: self.fs,
			modules_feature,
			root_feature,
			variables_feature,
			high,
			low,
			cancel: CancellationToken::new(),
			feature_handles: Mutex::new(Vec::new()),
		}
	}
}

pub struct Engine {
	pub documents: Arc<DocumentStore>,
	pub jobs: Arc<JobStore<CoreWork>>,
	pub changes: Arc<ChangeStore>,
	pub modules: Arc<ModuleStore>,
	pub roots: Arc<RootStore>,
	pub registry: Arc<RegistryStore>,
	pub bus: Arc<EventBus>,
	fs: Arc<dyn ReadOnlyFs>,
	modules_feature: Arc<ModulesFeature>,
	root_feature: Arc<RootModulesFeature>,
	variables_feature: Arc<VariablesFeature>,
	high: Scheduler<CoreWork>,
	low: Scheduler<CoreWork>,
	cancel: CancellationToken,
	feature_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
	/// Starts the schedulers and the feature event loops.
	pub fn start(&self) {
		self.high.start();
		self.low.start();

		let mut handles = self.feature_handles.lock().expect(POISONED_LOCK);
		handles.push(
			Arc::clone(&self.modules_feature).start(&self.bus, self.cancel.child_token()),
		);
		handles.push(Arc::clone(&self.root_feature).start(&self.bus, self.cancel.child_token()));
		handles.push(
			Arc::clone(&self.variables_feature).start(&self.bus, self.cancel.child_token()),
		);
		debug!("engine started");
	}

	pub async fn stop(&self) {
		self.cancel.cancel();

		let handles = std::mem::take(&mut *self.feature_handles.lock().expect(POISONED_LOCK));
		for handle in handles {
			if let Err(err) = handle.await {
				error!("feature loop failed on shutdown: {err:#?}");
			}
		}

		self.high.stop().await;
		self.low.stop().await;
		debug!("engine stopped");
	}

	/// Feeds a discovered directory into the engine, listing its entries first.
	pub async fn discover(&self, path: impl Into<PathBuf>) -> Vec<JobId> {
		let path = normalize_path(&path.into());
		let filenames = match self.fs.read_dir(&path) {
			Ok(entries) => entries
				.into_iter()
				.filter(|entry| !entry.is_dir)
				.map(|entry| entry.name)
				.collect(),
			Err(err) => {
				warn!(path = %path.display(), "failed to list discovered directory: {err}");
				Vec::new()
			}
		};
		self.bus
			.discover
			.publish(DiscoverEvent { path, filenames })
			.await
	}

	pub async fn open_document(
		&self,
		path: impl Into<PathBuf>,
		language_id: &str,
		text: impl Into<String>,
	) -> Vec<JobId> {
		let path = normalize_path(&path.into());
		self.documents.open(path.clone(), language_id, text);

		let Some(dir) = DirHandle::parent_of(&path) else {
			return Vec::new();
		};
		self.bus
			.did_open
			.publish(DidOpenEvent {
				dir,
				language_id: language_id.to_string(),
			})
			.await
	}

	pub async fn change_document(
		&self,
		path: &Path,
		text: impl Into<String>,
	) -> Vec<JobId> {
		let path = normalize_path(path);
		if let Err(err) = self.documents.update(&path, text) {
			warn!(path = %path.display(), "change for unopened document: {err}");
			return Vec::new();
		}

		let Some(dir) = DirHandle::parent_of(&path) else {
			return Vec::new();
		};
		self.bus.did_change.publish(DidChangeEvent { dir }).await
	}

	pub fn close_document(&self, path: &Path) {
		self.documents.close(&normalize_path(path));
	}

	/// Reports a watched filesystem change (from the editor's file watcher).
	pub async fn watched_change(
		&self,
		raw_path: impl Into<PathBuf>,
		change_type: FileChangeType,
	) -> Vec<JobId> {
		self.bus
			.did_change_watched
			.publish(DidChangeWatchedEvent {
				raw_path: raw_path.into(),
				change_type,
			})
			.await
	}

	/// Next coalesced change batch, for the diagnostics push loop.
	pub async fn next_change_batch(&self) -> ChangeBatch {
		self.changes.await_next_change_batch(self.jobs.as_ref()).await
	}

	/// Waits until the given jobs, and everything they transitively spawned, finished.
	pub async fn wait_for_jobs(&self, ids: &[JobId]) {
		self.jobs.wait_for_jobs(ids).await;
	}
}

impl std::fmt::Debug for Engine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Engine").finish_non_exhaustive()
	}
}
