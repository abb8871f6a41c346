//! Module indexing feature: reacts to workspace and editor events by scheduling the
//! decode pipeline (parse, metadata, schema preload, references, validation, registry
//! lookups) for module directories, and maintains the module records those jobs fill.

mod events;
mod work;

use std::{fmt, sync::Arc};

use gw_task_system::JobStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
	clients::{RegistryClient, SchemaClient},
	document::DocumentStore,
	event::EventBus,
	fs::ReadOnlyFs,
	lang::ConfigDecoder,
	state::{ModuleStore, RegistryStore},
	work::CoreWork,
};

pub use work::ModuleWork;
pub(crate) use work::ModuleWorkKind;

pub struct ModulesFeature {
	pub(crate) store: Arc<ModuleStore>,
	pub(crate) jobs: Arc<JobStore<CoreWork>>,
	pub(crate) documents: Arc<DocumentStore>,
	pub(crate) fs: Arc<dyn ReadOnlyFs>,
	pub(crate) decoder: Arc<dyn ConfigDecoder>,
	pub(crate) schema_client: Arc<dyn SchemaClient>,
	pub(crate) registry_client: Arc<dyn RegistryClient>,
	pub(crate) registry_store: Arc<RegistryStore>,
	pub(crate) validation_enabled: bool,
}

impl fmt::Debug for ModulesFeature {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ModulesFeature")
			.field("validation_enabled", &self.validation_enabled)
			.finish_non_exhaustive()
	}
}

impl ModulesFeature {
	#[allow(clippy::too_many_arguments)]
	#[must_use]
	pub fn new(
		store: Arc<ModuleStore>,
		jobs: Arc<JobStore<CoreWork>>,
		documents: Arc<DocumentStore>,
		fs: Arc<dyn ReadOnlyFs>,
		decoder: Arc<dyn ConfigDecoder>,
		schema_client: Arc<dyn SchemaClient>,
		registry_client: Arc<dyn RegistryClient>,
		registry_store: Arc<RegistryStore>,
		validation_enabled: bool,
	) -> Self {
		Self {
			store,
			jobs,
			documents,
			fs,
			decoder,
			schema_client,
			registry_client,
			registry_store,
			validation_enabled,
		}
	}

	/// Subscribes to the bus and processes events until cancelled. Each handled event
	/// reports the IDs of the jobs it scheduled back through its done channel.
	///
	/// Subscriptions are registered before the loop task is spawned, so an event
	/// published right after `start` returns is never missed.
	pub fn start(self: Arc<Self>, bus: &EventBus, cancel: CancellationToken) -> JoinHandle<()> {
		let (discover_done, discover_rx) = {
			let (tx, rx) = async_channel::bounded(1);
			(tx, bus.discover.subscribe(Some(rx)))
		};
		let (did_open_done, did_open_rx) = {
			let (tx, rx) = async_channel::bounded(1);
			(tx, bus.did_open.subscribe(Some(rx)))
		};
		let (did_change_done, did_change_rx) = {
			let (tx, rx) = async_channel::bounded(1);
			(tx, bus.did_change.subscribe(Some(rx)))
		};
		let (watched_done, watched_rx) = {
			let (tx, rx) = async_channel::bounded(1);
			(tx, bus.did_change_watched.subscribe(Some(rx)))
		};

		tokio::spawn(async move {
			debug!("modules feature listening");

			loop {
				tokio::select! {
					() = cancel.cancelled() => {
						debug!("modules feature stopped");
						return;
					}
					Ok(event) = discover_rx.recv() => {
						let ids = self.handle_discover(event);
						let _ = discover_done.send(ids).await;
					}
					Ok(event) = did_open_rx.recv() => {
						let ids = self.handle_did_open(&event);
						let _ = did_open_done.send(ids).await;
					}
					Ok(event) = did_change_rx.recv() => {
						let ids = self.handle_did_change(&event);
						let _ = did_change_done.send(ids).await;
					}
					Ok(event) = watched_rx.recv() => {
						let ids = self.handle_did_change_watched(&event);
						let _ = watched_done.send(ids).await;
					}
					else => return,
				}
			}
		})
	}
}
