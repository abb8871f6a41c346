//! Change notification queue.
//!
//! Stores queue a [`Changes`] summary whenever a record transitions in a way consumers
//! (diagnostics push, decoration refresh) care about. Summaries for the same directory
//! coalesce into one batch, and a batch is only released once the directory has gone
//! quiet or its first change has been waiting for [`ChangeStore::MAX_TIMESPAN`].

use std::{
	collections::HashMap,
	sync::{Arc, Mutex},
	time::Duration,
};

use gw_task_system::{DirHandle, DocumentLookup, JobStore, Work};
use tokio::{sync::watch, time::Instant};
use tracing::trace;

const POISONED_LOCK: &str = "change store lock poisoned";
const VERSION_CLOSED: &str = "change store version channel closed while store is alive";

/// What changed about a directory since the last batch, as OR-able flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Changes {
	/// The record itself went away.
	pub is_removal: bool,
	pub core_requirements: bool,
	pub backend: bool,
	pub provider_requirements: bool,
	pub installed_providers: bool,
	pub module_manifest: bool,
	pub diagnostics: bool,
	pub reference_origins: bool,
	pub reference_targets: bool,
}

impl Changes {
	#[must_use]
	pub fn removal() -> Self {
		Self {
			is_removal: true,
			..Self::default()
		}
	}

	#[must_use]
	pub fn any(self) -> bool {
		self != Self::default()
	}

	/// Field-wise OR, used when coalescing into an existing batch.
	#[must_use]
	pub fn merged(self, other: Self) -> Self {
		Self {
			is_removal: self.is_removal || other.is_removal,
			core_requirements: self.core_requirements || other.core_requirements,
			backend: self.backend || other.backend,
			provider_requirements: self.provider_requirements || other.provider_requirements,
			installed_providers: self.installed_providers || other.installed_providers,
			module_manifest: self.module_manifest || other.module_manifest,
			diagnostics: self.diagnostics || other.diagnostics,
			reference_origins: self.reference_origins || other.reference_origins,
			reference_targets: self.reference_targets || other.reference_targets,
		}
	}
}

#[derive(Debug, Clone)]
pub struct ChangeBatch {
	pub dir: DirHandle,
	pub changes: Changes,
	pub first_change_at: Instant,
	/// Captured when the first change of the batch was queued.
	pub is_dir_open: bool,
}

/// The job-store surface the change queue needs to decide whether a directory is still
/// being worked on.
pub trait PendingJobs: Send + Sync + 'static {
	fn has_jobs_for_dir(&self, dir: &DirHandle) -> bool;
	fn activity(&self) -> watch::Receiver<u64>;
}

impl<W: Work> PendingJobs for JobStore<W> {
	fn has_jobs_for_dir(&self, dir: &DirHandle) -> bool {
		JobStore::has_jobs_for_dir(self, dir)
	}

	fn activity(&self) -> watch::Receiver<u64> {
		JobStore::activity(self)
	}
}

#[derive(Debug)]
pub struct ChangeStore {
	inner: Mutex<HashMap<DirHandle, ChangeBatch>>,
	version_tx: watch::Sender<u64>,
	documents: Arc<dyn DocumentLookup>,
	max_timespan: Duration,
}

enum Step {
	Ready(ChangeBatch),
	Wait(Instant),
	Idle,
}

impl ChangeStore {
	/// Longest a queued change may wait for its directory to go quiet before the batch is
	/// released anyway.
	pub const MAX_TIMESPAN: Duration = Duration::from_secs(1);

	#[must_use]
	pub fn new(documents: Arc<dyn DocumentLookup>) -> Self {
		Self::with_max_timespan(documents, Self::MAX_TIMESPAN)
	}

	#[must_use]
	pub fn with_max_timespan(documents: Arc<dyn DocumentLookup>, max_timespan: Duration) -> Self {
		let (version_tx, _) = watch::channel(0);
		Self {
			inner: Mutex::new(HashMap::new()),
			version_tx,
			documents,
			max_timespan,
		}
	}

	/// Queues a change summary for `dir`, coalescing with any batch already waiting.
	pub fn queue_change(&self, dir: DirHandle, changes: Changes) {
		{
			let mut inner = self.inner.lock().expect(POISONED_LOCK);
			match inner.entry(dir) {
				std::collections::hash_map::Entry::Occupied(mut entry) => {
					let batch = entry.get_mut();
					batch.changes = batch.changes.merged(changes);
				}
				std::collections::hash_map::Entry::Vacant(entry) => {
					let is_dir_open = self.documents.has_open_documents(entry.key());
					let dir = entry.key().clone();
					entry.insert(ChangeBatch {
						dir,
						changes,
						first_change_at: Instant::now(),
						is_dir_open,
					});
				}
			}
		}
		self.version_tx.send_modify(|v| *v += 1);
	}

	#[must_use]
	pub fn pending_batches(&self) -> usize {
		self.inner.lock().expect(POISONED_LOCK).len()
	}

	/// Waits for the next releasable batch and removes it from the queue.
	///
	/// A batch is releasable once no jobs remain for its directory, or once it has waited
	/// for the maximum timespan, whichever comes first. Oldest batch wins.
	pub async fn await_next_change_batch(&self, jobs: &dyn PendingJobs) -> ChangeBatch {
		let mut version_rx = self.version_tx.subscribe();

		loop {
			version_rx.borrow_and_update();

			let step = {
				let mut inner = self.inner.lock().expect(POISONED_LOCK);
				let oldest = inner
					.values()
					.min_by_key(|batch| batch.first_change_at)
					.map(|batch| (batch.dir.clone(), batch.first_change_at));

				match oldest {
					None => Step::Idle,
					Some((dir, first_change_at)) => {
						let deadline = first_change_at + self.max_timespan;
						if Instant::now() >= deadline || !jobs.has_jobs_for_dir(&dir) {
							let batch = inner
								.remove(&dir)
								.expect("batch present under the same lock");
							Step::Ready(batch)
						} else {
							Step::Wait(deadline)
						}
					}
				}
			};

			match step {
				Step::Ready(batch) => {
					trace!(dir = %batch.dir, changes = ?batch.changes, "releasing change batch");
					return batch;
				}
				Step::Idle => {
					version_rx.changed().await.expect(VERSION_CLOSED);
				}
				Step::Wait(deadline) => {
					let mut jobs_rx = jobs.activity();
					jobs_rx.borrow_and_update();
					tokio::select! {
						() = tokio::time::sleep_until(deadline) => {}
						() = async {
							// A closed activity channel must not turn this into a busy loop
							if jobs_rx.changed().await.is_err() {
								std::future::pending::<()>().await;
							}
						} => {}
						result = version_rx.changed() => {
							result.expect(VERSION_CLOSED);
						}
					}
				}
			}
		}
	}
}
