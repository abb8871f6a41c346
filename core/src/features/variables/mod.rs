//! Variable definitions feature: validates `.gwkvars` assignment files against the
//! variables their module declares. Declarations come from module metadata, so
//! validation blocks on the metadata artifact instead of racing the decode pipeline.

mod events;
mod work;

use std::{fmt, sync::Arc};

use gw_task_system::JobStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
	document::DocumentStore, event::EventBus, features::modules::ModulesFeature, fs::ReadOnlyFs,
	lang::ConfigDecoder, work::CoreWork,
};

pub use work::VariablesWork;

pub struct VariablesFeature {
	pub(crate) jobs: Arc<JobStore<CoreWork>>,
	pub(crate) documents: Arc<DocumentStore>,
	pub(crate) fs: Arc<dyn ReadOnlyFs>,
	pub(crate) decoder: Arc<dyn ConfigDecoder>,
	/// Validation reads the module record; the decode pipeline producing it is scheduled
	/// through the modules feature so the awaited metadata actually arrives.
	pub(crate) modules: Arc<ModulesFeature>,
}

impl fmt::Debug for VariablesFeature {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("VariablesFeature").finish_non_exhaustive()
	}
}

impl VariablesFeature {
	#[must_use]
	pub fn new(
		jobs: Arc<JobStore<CoreWork>>,
		documents: Arc<DocumentStore>,
		fs: Arc<dyn ReadOnlyFs>,
		decoder: Arc<dyn ConfigDecoder>,
		modules: Arc<ModulesFeature>,
	) -> Self {
		Self {
			jobs,
			documents,
			fs,
			decoder,
			modules,
		}
	}

	/// Subscriptions are registered before the loop task is spawned, so an event
	/// published right after `start` returns is never missed.
	pub fn start(self: Arc<Self>, bus: &EventBus, cancel: CancellationToken) -> JoinHandle<()> {
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
			debug!("variables feature listening");

			loop {
				tokio::select! {
					() = cancel.cancelled() => {
						debug!("variables feature stopped");
						return;
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
