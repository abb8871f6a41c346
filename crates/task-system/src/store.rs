use std::{
	collections::{HashMap, HashSet, VecDeque},
	fmt,
	sync::{Arc, Mutex},
	time::Instant,
};

use tokio::sync::watch;
use tracing::{instrument, trace};
use uuid::Uuid;

use super::{
	error::JobError,
	job::{DirHandle, FollowupGraph, FollowupJob, Job, JobId, JobPriority, JobState, Work},
};

const POISONED_LOCK: &str = "job store lock poisoned";
const ACTIVITY_CLOSED: &str = "job store activity channel closed";

/// Answers "does this directory have open documents", used as a dispatch hint so work
/// for directories the user is looking at runs first.
pub trait DocumentLookup: fmt::Debug + Send + Sync + 'static {
	fn has_open_documents(&self, dir: &DirHandle) -> bool;
}

/// A [`DocumentLookup`] for contexts without an editor attached (tests, CLI indexing).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpenDocuments;

impl DocumentLookup for NoOpenDocuments {
	fn has_open_documents(&self, _dir: &DirHandle) -> bool {
		false
	}
}

struct ScheduledJob<W: Work> {
	id: JobId,
	dir: DirHandle,
	op: W::Op,
	priority: JobPriority,
	ignore_state: bool,
	is_dir_open: bool,
	state: JobState,
	work: Arc<W>,
	/// Dependencies that have not finished yet. The job becomes eligible for dispatch
	/// once this set drains.
	pending_deps: HashSet<JobId>,
	/// IDs of follow-up jobs spawned when this job finished. Only set on `Done`
	/// tombstones, which are retained while any follow-up is still outstanding so
	/// `wait_for_jobs` can await the whole chain.
	deferred: Vec<JobId>,
	seq: u64,
	enqueued_at: Instant,
}

struct Inner<W: Work> {
	jobs: HashMap<JobId, ScheduledJob<W>>,
	next_seq: u64,
}

/// A job claimed for execution by a scheduler eval loop.
pub(crate) struct ClaimedJob<W: Work> {
	pub id: JobId,
	pub dir: DirHandle,
	pub work: Arc<W>,
	pub ignore_state: bool,
}

/// The queue of background jobs, indexed by directory, with dependency tracking.
///
/// All mutation happens under one internal lock, so claiming a job for execution is
/// atomic: two eval loops can never dispatch the same job. Any state transition bumps
/// an activity counter which wakes blocked `next_job`/`wait_for_jobs` callers and any
/// external watcher (e.g. the change-batch store draining once a directory goes quiet).
pub struct JobStore<W: Work> {
	inner: Mutex<Inner<W>>,
	activity_tx: watch::Sender<u64>,
	documents: Arc<dyn DocumentLookup>,
}

impl<W: Work> JobStore<W> {
	#[must_use]
	pub fn new(documents: Arc<dyn DocumentLookup>) -> Self {
		let (activity_tx, _) = watch::channel(0);

		Self {
			inner: Mutex::new(Inner {
				jobs: HashMap::new(),
				next_seq: 0,
			}),
			activity_tx,
			documents,
		}
	}

	/// Subscribes to the store's activity counter; it is bumped on every enqueue,
	/// dispatch, dequeue and finish.
	#[must_use]
	pub fn activity(&self) -> watch::Receiver<u64> {
		self.activity_tx.subscribe()
	}

	/// Puts a new job into the queue, pruning any dependency that already finished.
	pub fn enqueue(&self, job: Job<W>) -> JobId {
		let id = {
			let mut inner = self.inner.lock().expect(POISONED_LOCK);
			Self::enqueue_locked(&mut inner, &*self.documents, job)
		};
		self.bump();
		id
	}

	/// Enqueues a whole followup graph atomically, resolving intra-batch dependency
	/// indices to the freshly assigned job IDs. Returns the IDs in graph order.
	pub fn enqueue_graph(&self, graph: FollowupGraph<W>) -> Vec<JobId> {
		let followups = graph.into_jobs();
		if followups.is_empty() {
			return Vec::new();
		}

		let mut ids = Vec::with_capacity(followups.len());
		{
			let mut inner = self.inner.lock().expect(POISONED_LOCK);
			for FollowupJob { mut job, after } in followups {
				job.depends_on.extend(after.iter().map(|&idx| ids[idx]));
				ids.push(Self::enqueue_locked(&mut inner, &*self.documents, job));
			}
		}
		self.bump();
		ids
	}

	fn enqueue_locked(inner: &mut Inner<W>, documents: &dyn DocumentLookup, job: Job<W>) -> JobId {
		let id = Uuid::new_v4();

		// A dependency that is gone from the table (or sits there as a Done tombstone)
		// has already finished and must not hold this job back.
		let pending_deps = job
			.depends_on
			.iter()
			.copied()
			.filter(|dep_id| {
				inner
					.jobs
					.get(dep_id)
					.is_some_and(|dep| dep.state != JobState::Done)
			})
			.collect::<HashSet<_>>();

		let is_dir_open = documents.has_open_documents(&job.dir);
		let seq = inner.next_seq;
		inner.next_seq += 1;

		trace!(
			job_id = %id,
			dir = %job.dir,
			op = ?job.work.op(),
			priority = ?job.priority,
			ignore_state = job.ignore_state,
			is_dir_open,
			pending_deps = pending_deps.len(),
			"enqueueing new job"
		);

		inner.jobs.insert(
			id,
			ScheduledJob {
				id,
				dir: job.dir,
				op: job.work.op(),
				priority: job.priority,
				ignore_state: job.ignore_state,
				is_dir_open,
				state: JobState::Queued,
				work: Arc::new(job.work),
				pending_deps,
				deferred: Vec::new(),
				seq,
				enqueued_at: Instant::now(),
			},
		);

		id
	}

	/// Blocks until a queued job with no pending dependencies exists for the given
	/// priority, atomically marking it as running.
	pub(crate) async fn next_job(&self, priority: JobPriority) -> ClaimedJob<W> {
		let mut activity_rx = self.activity_tx.subscribe();

		loop {
			activity_rx.borrow_and_update();

			let claimed = {
				let mut inner = self.inner.lock().expect(POISONED_LOCK);
				Self::claim_next(&mut inner, priority)
			};
			if let Some(claimed) = claimed {
				self.bump();
				return claimed;
			}

			activity_rx.changed().await.expect(ACTIVITY_CLOSED);
		}
	}

	fn claim_next(inner: &mut Inner<W>, priority: JobPriority) -> Option<ClaimedJob<W>> {
		// Directories with open documents are served first, then FIFO.
		let next_id = inner
			.jobs
			.values()
			.filter(|job| {
				job.state == JobState::Queued
					&& job.priority == priority
					&& job.pending_deps.is_empty()
			})
			.min_by_key(|job| (!job.is_dir_open, job.seq))
			.map(|job| job.id)?;

		let job = inner
			.jobs
			.get_mut(&next_id)
			.expect("claimed job id was just read from the table");
		job.state = JobState::Running;

		trace!(
			job_id = %job.id,
			dir = %job.dir,
			op = ?job.op,
			is_dir_open = job.is_dir_open,
			waited = ?job.enqueued_at.elapsed(),
			"dispatching next job"
		);

		Some(ClaimedJob {
			id: job.id,
			dir: job.dir.clone(),
			work: Arc::clone(&job.work),
			ignore_state: job.ignore_state,
		})
	}

	/// Marks a job as finished, releasing its dependents. When the job spawned
	/// follow-up jobs it is retained as a `Done` tombstone until they all finish,
	/// so waiters can follow the chain.
	#[instrument(skip(self, deferred), fields(deferred_count = deferred.len()))]
	pub fn finish_job(&self, id: JobId, deferred: Vec<JobId>) -> Result<(), JobError> {
		{
			let mut inner = self.inner.lock().expect(POISONED_LOCK);

			if !inner.jobs.contains_key(&id) {
				return Err(JobError::JobNotFound(id));
			}

			Self::release_dependents(&mut inner, id);

			// A deferred job may already have finished (or been dequeued) before its
			// parent got here; only jobs still in the table keep the tombstone alive.
			let deferred = deferred
				.into_iter()
				.filter(|deferred_id| inner.jobs.contains_key(deferred_id))
				.collect::<Vec<_>>();

			if deferred.is_empty() {
				inner.jobs.remove(&id);
				Self::cleanup_done_parents_of(&mut inner, id);
			} else {
				let job = inner
					.jobs
					.get_mut(&id)
					.expect("presence checked at the top of finish_job");
				job.state = JobState::Done;
				job.deferred = deferred;
			}
		}
		self.bump();
		Ok(())
	}

	fn release_dependents(inner: &mut Inner<W>, id: JobId) {
		for job in inner.jobs.values_mut() {
			job.pending_deps.remove(&id);
		}
	}

	/// Walks `Done` tombstones whose deferred list references the removed job,
	/// dropping any tombstone that no longer has outstanding follow-ups.
	fn cleanup_done_parents_of(inner: &mut Inner<W>, id: JobId) {
		let mut stack = vec![id];

		while let Some(finished_id) = stack.pop() {
			let parent_ids = inner
				.jobs
				.values()
				.filter(|job| {
					job.state == JobState::Done && job.deferred.contains(&finished_id)
				})
				.map(|job| job.id)
				.collect::<Vec<_>>();

			for parent_id in parent_ids {
				let parent = inner
					.jobs
					.get_mut(&parent_id)
					.expect("parent id was just read from the table");
				parent.deferred.retain(|deferred_id| *deferred_id != finished_id);

				if parent.deferred.is_empty() {
					inner.jobs.remove(&parent_id);
					stack.push(parent_id);
				}
			}
		}
	}

	/// Atomically drops every not-yet-started job scoped to the given directory.
	///
	/// Running jobs are never interrupted; they complete and their results are then
	/// discarded or overwritten by whoever removed the directory. Dependents of a
	/// dropped job are released, not cancelled.
	#[instrument(skip(self))]
	pub fn dequeue_jobs_for_dir(&self, dir: &DirHandle) -> usize {
		let removed = {
			let mut inner = self.inner.lock().expect(POISONED_LOCK);

			let queued_ids = inner
				.jobs
				.values()
				.filter(|job| job.state == JobState::Queued && job.dir == *dir)
				.map(|job| job.id)
				.collect::<Vec<_>>();

			for id in &queued_ids {
				inner.jobs.remove(id);
				Self::release_dependents(&mut inner, *id);
				Self::cleanup_done_parents_of(&mut inner, *id);
			}

			queued_ids.len()
		};

		if removed > 0 {
			trace!(dequeued = removed, "dequeued queued jobs for directory");
			self.bump();
		}
		removed
	}

	/// Awaits the given jobs and, transitively, any follow-up jobs they spawned.
	pub async fn wait_for_jobs(&self, ids: &[JobId]) {
		let mut queue = ids.iter().copied().collect::<VecDeque<_>>();
		let mut activity_rx = self.activity_tx.subscribe();

		while let Some(id) = queue.pop_front() {
			loop {
				activity_rx.borrow_and_update();

				{
					let inner = self.inner.lock().expect(POISONED_LOCK);
					match inner.jobs.get(&id) {
						// Gone entirely: the job and its whole deferred chain finished.
						None => break,
						Some(job) if job.state == JobState::Done => {
							queue.extend(job.deferred.iter().copied());
							break;
						}
						Some(_) => {}
					}
				}

				activity_rx.changed().await.expect(ACTIVITY_CLOSED);
			}
		}
	}

	/// Whether any job (queued or running) is scoped to the given directory.
	#[must_use]
	pub fn has_jobs_for_dir(&self, dir: &DirHandle) -> bool {
		let inner = self.inner.lock().expect(POISONED_LOCK);
		inner
			.jobs
			.values()
			.any(|job| job.dir == *dir && job.state != JobState::Done)
	}

	#[must_use]
	pub fn job_state(&self, id: JobId) -> Option<JobState> {
		let inner = self.inner.lock().expect(POISONED_LOCK);
		inner.jobs.get(&id).map(|job| job.state)
	}

	#[must_use]
	pub fn queued_job_ids(&self) -> Vec<JobId> {
		let inner = self.inner.lock().expect(POISONED_LOCK);
		inner
			.jobs
			.values()
			.filter(|job| job.state == JobState::Queued)
			.map(|job| job.id)
			.collect()
	}

	fn bump(&self) {
		self.activity_tx.send_modify(|version| *version += 1);
	}
}

impl<W: Work> fmt::Debug for JobStore<W> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let inner = self.inner.lock().expect(POISONED_LOCK);
		f.debug_struct("JobStore")
			.field("jobs", &inner.jobs.len())
			.finish_non_exhaustive()
	}
}
