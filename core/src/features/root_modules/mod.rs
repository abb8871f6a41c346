//! Root module feature: tracks directories carrying installation artifacts (module
//! manifest, provider lock file), keeps their records current and schedules decoding of
//! installed modules.

mod events;
mod work;

use std::{fmt, sync::Arc};

use gw_task_system::JobStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
	event::EventBus, features::modules::ModulesFeature, fs::ReadOnlyFs, state::RootStore,
	work::CoreWork,
};

pub use work::RootWork;

pub struct RootModulesFeature {
	pub(crate) roots: Arc<RootStore>,
	pub(crate) jobs: Arc<JobStore<CoreWork>>,
	pub(crate) fs: Arc<dyn ReadOnlyFs>,
	/// Installed modules found through the manifest are decoded by the modules feature's
	/// pipeline.
	pub(crate) modules: Arc<ModulesFeature>,
}

impl fmt::Debug for RootModulesFeature {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RootModulesFeature").finish_non_exhaustive()
	}
}

impl RootModulesFeature {
	#[must_use]
	pub fn new(
		roots: Arc<RootStore>,
		jobs: Arc<JobStore<CoreWork>>,
		fs: Arc<dyn ReadOnlyFs>,
		modules: Arc<ModulesFeature>,
	) -> Self {
		Self {
			roots,
			jobs,
			fs,
			modules,
		}
	}

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
		let (watched_done, watched_rx) = {
			let (tx, rx) = async_channel::bounded(1);
			(tx, bus.did_change_watched.subscribe(Some(rx)))
		};
		let (manifest_done, manifest_rx) = {
			let (tx, rx) = async_channel::bounded(1);
			(tx, bus.manifest_change.subscribe(Some(rx)))
		};
		let (lock_done, lock_rx) = {
			let (tx, rx) = async_channel::bounded(1);
			(tx, bus.plugin_lock_change.subscribe(Some(rx)))
		};

		tokio::spawn(async move {
			debug!("root modules feature listening");

			loop {
				tokio::select! {
					() = cancel.cancelled() => {
						debug!("root modules feature stopped");
						return;
					}
					Ok(event) = discover_rx.recv() => {
						let ids = self.handle_discover(&event);
						let _ = discover_done.send(ids).await;
					}
					Ok(event) = did_open_rx.recv() => {
						let ids = self.handle_did_open(&event);
						let _ = did_open_done.send(ids).await;
					}
					Ok(event) = watched_rx.recv() => {
						let ids = self.handle_did_change_watched(&event);
						let _ = watched_done.send(ids).await;
					}
					Ok(event) = manifest_rx.recv() => {
						let ids = self.handle_manifest_change(&event);
						let _ = manifest_done.send(ids).await;
					}
					Ok(event) = lock_rx.recv() => {
						let ids = self.handle_plugin_lock_change(&event);
						let _ = lock_done.send(ids).await;
					}
					else => return,
				}
			}
		})
	}
}
