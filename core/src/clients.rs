//! Clients for data the engine cannot derive from the workspace itself: provider schemas
//! and module registry metadata.

use std::{collections::HashMap, fmt, sync::RwLock};

use async_trait::async_trait;
use thiserror::Error;

use gw_task_system::WorkContext;

use crate::lang::{ProviderAddr, ProviderRequirements, VersionConstraint};

const POISONED_LOCK: &str = "client lock poisoned";

#[derive(Debug, Error)]
pub enum SchemaError {
	#[error("no bundled schema for provider {addr}")]
	NotBundled { addr: ProviderAddr },
}

/// Source of provider schemas preloaded into memory for completion and validation.
#[async_trait]
pub trait SchemaClient: fmt::Debug + Send + Sync + 'static {
	async fn preload_schemas(
		&self,
		requirements: &ProviderRequirements,
		ctx: &WorkContext,
	) -> Result<(), SchemaError>;
}

/// Schemas shipped with the server binary. Preloading a provider that is not bundled is an
/// error recorded with the artifact; the module stays usable without its schema.
#[derive(Debug, Default)]
pub struct BundledSchemaClient {
	bundled: RwLock<std::collections::BTreeSet<ProviderAddr>>,
}

impl BundledSchemaClient {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn bundle(&self, addr: ProviderAddr) {
		self.bundled.write().expect(POISONED_LOCK).insert(addr);
	}
}

#[async_trait]
impl SchemaClient for BundledSchemaClient {
	async fn preload_schemas(
		&self,
		requirements: &ProviderRequirements,
		_ctx: &WorkContext,
	) -> Result<(), SchemaError> {
		let bundled = self.bundled.read().expect(POISONED_LOCK);
		if bundled.is_empty() {
			// Nothing bundled at all means schemas are disabled, not missing
			return Ok(());
		}
		for addr in requirements.keys() {
			if !bundled.contains(addr) {
				return Err(SchemaError::NotBundled { addr: addr.clone() });
			}
		}
		Ok(())
	}
}

#[derive(Debug, Error)]
pub enum RegistryError {
	#[error("module {addr:?} not found in registry")]
	NotFound { addr: String },
	#[error("registry request for {addr:?} failed: {reason}")]
	Request { addr: String, reason: String },
	#[error("registry request for {addr:?} cancelled")]
	Cancelled { addr: String },
}

/// Registry metadata for one module source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryModuleData {
	pub versions: Vec<String>,
	pub inputs: Vec<String>,
	pub outputs: Vec<String>,
}

#[async_trait]
pub trait RegistryClient: fmt::Debug + Send + Sync + 'static {
	async fn module_data(
		&self,
		source: &str,
		version: Option<&VersionConstraint>,
		ctx: &WorkContext,
	) -> Result<RegistryModuleData, RegistryError>;
}

/// A registry answering from a fixed in-memory table. Doubles as the offline default
/// (empty table, every lookup is a `NotFound`) and as the test double.
#[derive(Debug, Default)]
pub struct StaticRegistryClient {
	modules: RwLock<HashMap<String, RegistryModuleData>>,
}

impl StaticRegistryClient {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&self, source: impl Into<String>, data: RegistryModuleData) {
		self.modules
			.write()
			.expect(POISONED_LOCK)
			.insert(source.into(), data);
	}
}

#[async_trait]
impl RegistryClient for StaticRegistryClient {
	async fn module_data(
		&self,
		source: &str,
		_version: Option<&VersionConstraint>,
		ctx: &WorkContext,
	) -> Result<RegistryModuleData, RegistryError> {
		if ctx.is_cancelled() {
			return Err(RegistryError::Cancelled {
				addr: source.to_string(),
			});
		}
		self.modules
			.read()
			.expect(POISONED_LOCK)
			.get(source)
			.cloned()
			.ok_or_else(|| RegistryError::NotFound {
				addr: source.to_string(),
			})
	}
}
