//! Store of root module records: directories that carry installation artifacts (the
//! module manifest written by the installer and the provider lock file) next to their
//! configuration.

use std::{
	collections::{BTreeMap, HashMap},
	path::{Path, PathBuf},
	sync::{Arc, Mutex},
};

use gw_task_system::DirHandle;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::trace;

use crate::{fs::normalize_path, lang::ProviderAddr};

use super::{
	changes::{Changes, ChangeStore},
	errors::{StateError, StoredError},
	OpState,
};

const POISONED_LOCK: &str = "root store lock poisoned";
const VERSION_CLOSED: &str = "root store version channel closed while store is alive";

/// Path of the module manifest, relative to the root module directory.
pub const MANIFEST_REL_PATH: &str = ".groundwork/modules/manifest.json";
/// Name of the provider lock file inside a root module directory.
pub const LOCK_FILE_NAME: &str = ".groundwork.lock.json";
/// Name of the installer's data directory inside a root module directory.
pub const DATA_DIR_NAME: &str = ".groundwork";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModManifestRecord {
	pub key: String,
	pub source: String,
	#[serde(default)]
	pub version: Option<String>,
	/// Directory the module was installed into, relative to the root module.
	pub dir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ModManifest {
	#[serde(default)]
	pub modules: Vec<ModManifestRecord>,
}

impl ModManifest {
	pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(raw)
	}

	/// Absolute, normalized directories of the installed modules.
	#[must_use]
	pub fn module_dirs(&self, root: &Path) -> Vec<PathBuf> {
		self.modules
			.iter()
			.filter(|record| !record.dir.as_os_str().is_empty())
			.map(|record| normalize_path(&root.join(&record.dir)))
			.collect()
	}
}

/// Installed provider versions, keyed by provider address.
pub type InstalledProviders = BTreeMap<ProviderAddr, String>;

#[derive(Debug, Deserialize)]
struct LockFile {
	#[serde(default)]
	providers: BTreeMap<String, String>,
}

/// Parses the provider lock file format.
pub fn parse_lock_file(raw: &str) -> Result<InstalledProviders, serde_json::Error> {
	let lock: LockFile = serde_json::from_str(raw)?;
	Ok(lock
		.providers
		.into_iter()
		.map(|(addr, version)| (ProviderAddr::new(addr), version))
		.collect())
}

/// Per-artifact addressing for state transitions on a [`RootRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootArtifact {
	ModManifest,
	InstalledProviders,
}

#[derive(Debug, Clone)]
pub struct RootRecord {
	path: PathBuf,

	pub mod_manifest: Option<ModManifest>,
	pub mod_manifest_err: Option<StoredError>,
	pub mod_manifest_state: OpState,

	pub installed_providers: InstalledProviders,
	pub installed_providers_err: Option<StoredError>,
	pub installed_providers_state: OpState,
}

impl RootRecord {
	fn new(path: PathBuf) -> Self {
		Self {
			path,
			mod_manifest: None,
			mod_manifest_err: None,
			mod_manifest_state: OpState::Unknown,
			installed_providers: InstalledProviders::new(),
			installed_providers_err: None,
			installed_providers_state: OpState::Unknown,
		}
	}

	#[must_use]
	pub fn path(&self) -> &Path {
		&self.path
	}

	#[must_use]
	pub fn artifact_state(&self, artifact: RootArtifact) -> OpState {
		match artifact {
			RootArtifact::ModManifest => self.mod_manifest_state,
			RootArtifact::InstalledProviders => self.installed_providers_state,
		}
	}

	fn set_artifact_state(&mut self, artifact: RootArtifact, state: OpState) {
		match artifact {
			RootArtifact::ModManifest => self.mod_manifest_state = state,
			RootArtifact::InstalledProviders => self.installed_providers_state = state,
		}
	}
}

#[derive(Debug)]
pub struct RootStore {
	inner: Mutex<HashMap<PathBuf, Arc<RootRecord>>>,
	version_tx: watch::Sender<u64>,
	changes: Arc<ChangeStore>,
}

impl RootStore {
	#[must_use]
	pub fn new(changes: Arc<ChangeStore>) -> Self {
		let (version_tx, _) = watch::channel(0);
		Self {
			inner: Mutex::new(HashMap::new()),
			version_tx,
			changes,
		}
	}

	pub fn add(&self, path: PathBuf) -> Result<(), StateError> {
		{
			let mut inner = self.inner.lock().expect(POISONED_LOCK);
			if inner.contains_key(&path) {
				return Err(StateError::AlreadyExists { path });
			}
			let record = Arc::new(RootRecord::new(path.clone()));
			trace!(path = %path.display(), "added root record");
			inner.insert(path, record);
		}
		self.bump();
		Ok(())
	}

	pub fn add_if_not_exists(&self, path: PathBuf) -> Result<(), StateError> {
		match self.add(path) {
			Err(StateError::AlreadyExists { .. }) => Ok(()),
			other => other,
		}
	}

	pub fn remove(&self, path: &Path) {
		let removed = self.inner.lock().expect(POISONED_LOCK).remove(path);
		if let Some(old) = removed {
			trace!(path = %old.path().display(), "removed root record");
			self.changes
				.queue_change(DirHandle::from_path(old.path()), Changes::removal());
			self.bump();
		}
	}

	pub fn record(&self, path: &Path) -> Result<Arc<RootRecord>, StateError> {
		self.get(path).ok_or_else(|| StateError::RecordNotFound {
			path: path.to_path_buf(),
		})
	}

	#[must_use]
	pub fn get(&self, path: &Path) -> Option<Arc<RootRecord>> {
		self.inner.lock().expect(POISONED_LOCK).get(path).cloned()
	}

	#[must_use]
	pub fn exists(&self, path: &Path) -> bool {
		self.inner.lock().expect(POISONED_LOCK).contains_key(path)
	}

	#[must_use]
	pub fn list(&self) -> Vec<Arc<RootRecord>> {
		let inner = self.inner.lock().expect(POISONED_LOCK);
		let mut records = inner.values().cloned().collect::<Vec<_>>();
		records.sort_by(|a, b| a.path.cmp(&b.path));
		records
	}

	/// Same admission semantics as the module store: exactly one concurrent claimant wins.
	pub fn begin_artifact(
		&self,
		path: &Path,
		artifact: RootArtifact,
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
		artifact: RootArtifact,
		state: OpState,
	) -> Result<(), StateError> {
		self.mutate(path, |record| record.set_artifact_state(artifact, state))
	}

	pub fn update_mod_manifest(
		&self,
		path: &Path,
		manifest: Option<ModManifest>,
		err: Option<StoredError>,
	) -> Result<(), StateError> {
		let update = self.mutate(path, |record| {
			let changed = record.mod_manifest != manifest;
			record.mod_manifest = manifest;
			record.mod_manifest_err = err;
			changed
		});
		let state = self.set_artifact_state(path, RootArtifact::ModManifest, OpState::Loaded);

		if let Ok(true) = update {
			self.changes.queue_change(
				DirHandle::from_path(path),
				Changes {
					module_manifest: true,
					..Changes::default()
				},
			);
		}
		update.map(|_| ()).and(state)
	}

	pub fn update_installed_providers(
		&self,
		path: &Path,
		providers: InstalledProviders,
		err: Option<StoredError>,
	) -> Result<(), StateError> {
		let update = self.mutate(path, |record| {
			let changed = record.installed_providers != providers;
			record.installed_providers = providers;
			record.installed_providers_err = err;
			changed
		});
		let state =
			self.set_artifact_state(path, RootArtifact::InstalledProviders, OpState::Loaded);

		if let Ok(true) = update {
			self.changes.queue_change(
				DirHandle::from_path(path),
				Changes {
					installed_providers: true,
					..Changes::default()
				},
			);
		}
		update.map(|_| ()).and(state)
	}

	pub async fn wait_until(&self, path: &Path, pred: impl Fn(&RootRecord) -> bool) {
		let mut version_rx = self.version_tx.subscribe();
		loop {
			version_rx.borrow_and_update();
			if self.get(path).is_some_and(|record| pred(&record)) {
				return;
			}
			version_rx.changed().await.expect(VERSION_CLOSED);
		}
	}

	fn mutate<R>(
		&self,
		path: &Path,
		f: impl FnOnce(&mut RootRecord) -> R,
	) -> Result<R, StateError> {
		let out = {
			let mut inner = self.inner.lock().expect(POISONED_LOCK);
			let old = Arc::clone(inner.get(path).ok_or_else(|| StateError::RecordNotFound {
				path: path.to_path_buf(),
			})?);
			let mut draft = RootRecord::clone(&old);
			let out = f(&mut draft);
			inner.insert(path.to_path_buf(), Arc::new(draft));
			out
		};
		self.bump();
		Ok(out)
	}

	fn bump(&self) {
		self.version_tx.send_modify(|v| *v += 1);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_manifest_and_lock_file() {
		let manifest = ModManifest::parse(
			r#"{
				"modules": [
					{"key": "vpc", "source": "./modules/vpc", "dir": "modules/vpc"},
					{"key": "consul", "source": "hashicorp/consul", "version": "0.11.0",
					 "dir": ".groundwork/modules/consul"}
				]
			}"#,
		)
		.unwrap();
		assert_eq!(
			manifest.module_dirs(Path::new("/root")),
			vec![
				PathBuf::from("/root/modules/vpc"),
				PathBuf::from("/root/.groundwork/modules/consul"),
			]
		);

		let providers = parse_lock_file(
			r#"{"providers": {"registry.groundwork.io/providers/aws": "3.2.1"}}"#,
		)
		.unwrap();
		assert_eq!(
			providers[&ProviderAddr::new("registry.groundwork.io/providers/aws")],
			"3.2.1"
		);
	}

	#[test]
	fn installed_providers_update_flags_change_once() {
		use gw_task_system::NoOpenDocuments;

		let changes = Arc::new(ChangeStore::new(Arc::new(NoOpenDocuments)));
		let store = RootStore::new(Arc::clone(&changes));
		let path = Path::new("/root");
		store.add(path.to_path_buf()).unwrap();

		let mut providers = InstalledProviders::new();
		providers.insert(ProviderAddr::from_local_name("aws"), "3.2.1".into());

		store
			.update_installed_providers(path, providers.clone(), None)
			.unwrap();
		assert_eq!(changes.pending_batches(), 1);

		// Identical content coalesces to nothing new
		store
			.update_installed_providers(path, providers, None)
			.unwrap();
		assert_eq!(changes.pending_batches(), 1);

		let record = store.record(path).unwrap();
		assert_eq!(
			record.artifact_state(RootArtifact::InstalledProviders),
			OpState::Loaded
		);
	}
}
