use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::{
	job::{ExecStatus, JobPriority, Work, WorkContext},
	store::JobStore,
};

const POISONED_LOCK: &str = "scheduler lock poisoned";

/// Executes jobs of one priority class with a fixed concurrency budget.
///
/// A scheduler owns `parallelism` eval loops; each loop repeatedly claims the next
/// eligible job, runs its work, enqueues its followup graph and marks it finished.
/// Two schedulers (one per [`JobPriority`]) typically share a single [`JobStore`]
/// so low priority network work never starves local analysis.
pub struct Scheduler<W: Work> {
	store: Arc<JobStore<W>>,
	priority: JobPriority,
	parallelism: usize,
	cancel: CancellationToken,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<W: Work> Scheduler<W> {
	#[must_use]
	pub fn new(store: Arc<JobStore<W>>, parallelism: usize, priority: JobPriority) -> Self {
		Self {
			store,
			priority,
			parallelism,
			cancel: CancellationToken::new(),
			handles: Mutex::new(Vec::new()),
		}
	}

	/// Concurrency budget matching the machine, used for the `High` priority scheduler.
	#[must_use]
	pub fn default_parallelism() -> usize {
		std::thread::available_parallelism().map_or_else(
			|e| {
				error!("failed to get available parallelism for the job system: {e:#?}");
				1
			},
			std::num::NonZeroUsize::get,
		)
	}

	pub fn start(&self) {
		let mut handles = self.handles.lock().expect(POISONED_LOCK);

		for loop_idx in 0..self.parallelism {
			debug!(loop_idx, priority = ?self.priority, "launching eval loop");

			let store = Arc::clone(&self.store);
			let priority = self.priority;
			let cancel = self.cancel.clone();

			handles.push(tokio::spawn(async move {
				Self::eval(loop_idx, &store, priority, &cancel).await;
			}));
		}
	}

	/// Stops all eval loops. In-flight work observes cancellation through its
	/// [`WorkContext`]; jobs that ignore it simply run to completion first.
	pub async fn stop(&self) {
		self.cancel.cancel();

		let handles = std::mem::take(&mut *self.handles.lock().expect(POISONED_LOCK));
		for handle in handles {
			if let Err(e) = handle.await {
				error!("eval loop failed on shutdown: {e:#?}");
			}
		}
		debug!(priority = ?self.priority, "stopped scheduler");
	}

	async fn eval(
		loop_idx: usize,
		store: &JobStore<W>,
		priority: JobPriority,
		cancel: &CancellationToken,
	) {
		loop {
			let claimed = tokio::select! {
				() = cancel.cancelled() => {
					debug!(loop_idx, "eval loop cancelled");
					return;
				}
				claimed = store.next_job(priority) => claimed,
			};

			let ctx =
				WorkContext::new(claimed.dir.clone(), claimed.ignore_state, cancel.child_token());
			let result = claimed.work.run(&ctx).await;

			match &result {
				Ok(ExecStatus::Done) => {
					trace!(job_id = %claimed.id, dir = %claimed.dir, "job finished");
				}
				Ok(ExecStatus::StateNotChanged) => {
					trace!(job_id = %claimed.id, dir = %claimed.dir, "state not changed, job skipped");
				}
				Err(e) => {
					// Failed jobs still finish and still get their followups consulted;
					// the error itself is recorded with the artifact by the work body.
					warn!(job_id = %claimed.id, dir = %claimed.dir, "job failed: {e}");
				}
			}

			let deferred = store.enqueue_graph(claimed.work.followups(&ctx, &result));

			if let Err(e) = store.finish_job(claimed.id, deferred) {
				error!(job_id = %claimed.id, "failed to finish job: {e}");
			}
		}
	}
}

impl<W: Work> std::fmt::Debug for Scheduler<W> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Scheduler")
			.field("priority", &self.priority)
			.field("parallelism", &self.parallelism)
			.finish_non_exhaustive()
	}
}
