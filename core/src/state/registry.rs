//! Cache of registry module metadata, keyed by source address.
//!
//! Lookups are network-bound and their results immutable per (source, lookup), so the
//! cache only ever grows; a cached source is skipped by later registry jobs.

use std::{collections::HashMap, sync::RwLock};

use crate::clients::RegistryModuleData;

const POISONED_LOCK: &str = "registry store lock poisoned";

#[derive(Debug, Default)]
pub struct RegistryStore {
	inner: RwLock<HashMap<String, RegistryModuleData>>,
}

impl RegistryStore {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn exists(&self, source: &str) -> bool {
		self.inner.read().expect(POISONED_LOCK).contains_key(source)
	}

	pub fn add(&self, source: String, data: RegistryModuleData) {
		self.inner.write().expect(POISONED_LOCK).insert(source, data);
	}

	#[must_use]
	pub fn get(&self, source: &str) -> Option<RegistryModuleData> {
		self.inner.read().expect(POISONED_LOCK).get(source).cloned()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.inner.read().expect(POISONED_LOCK).len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
