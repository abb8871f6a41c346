use std::{
	fmt,
	hash::Hash,
	path::{Path, PathBuf},
	sync::Arc,
};

use async_trait::async_trait;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

/// A unique identifier for a job using the [`uuid`](https://docs.rs/uuid) crate.
pub type JobId = Uuid;

/// A handle to the directory a job is scoped to.
///
/// Jobs are deduplicated and dequeued per directory, so the handle doubles as the
/// scheduling key. Cloning is cheap.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirHandle(Arc<PathBuf>);

impl DirHandle {
	pub fn from_path(path: impl Into<PathBuf>) -> Self {
		Self(Arc::new(path.into()))
	}

	#[must_use]
	pub fn path(&self) -> &Path {
		&self.0
	}

	/// Handle for the parent directory of the given file path, if any.
	pub fn parent_of(file_path: impl AsRef<Path>) -> Option<Self> {
		file_path
			.as_ref()
			.parent()
			.map(|parent| Self::from_path(parent))
	}
}

impl fmt::Display for DirHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0.display())
	}
}

impl fmt::Debug for DirHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "DirHandle({})", self.0.display())
	}
}

/// Priority class a job is dispatched under.
///
/// Each class has its own concurrency budget, so a burst of `Low` priority work (typically
/// network bound, like registry lookups) can never starve `High` priority local analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobPriority {
	Low,
	High,
}

/// Lifecycle state of a job inside the [`JobStore`](crate::JobStore).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
	Queued,
	Running,
	Done,
}

/// Outcome of a [`Work::run`] invocation that did not fail.
///
/// `StateNotChanged` is a deliberate not-an-error sentinel: the targeted artifact was
/// already computed (or is being computed) and the job skipped the work. Callers treat
/// it the same as `Done` for scheduling purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
	Done,
	StateNotChanged,
}

/// Request-scoped parameters threaded into every [`Work::run`] invocation.
#[derive(Debug, Clone)]
pub struct WorkContext {
	dir: DirHandle,
	ignore_state: bool,
	cancel: CancellationToken,
}

impl WorkContext {
	#[must_use]
	pub fn new(dir: DirHandle, ignore_state: bool, cancel: CancellationToken) -> Self {
		Self {
			dir,
			ignore_state,
			cancel,
		}
	}

	/// The directory the job is scoped to.
	#[must_use]
	pub const fn dir(&self) -> &DirHandle {
		&self.dir
	}

	/// Whether the job should recompute its artifact even if one is already present.
	#[must_use]
	pub const fn ignore_state(&self) -> bool {
		self.ignore_state
	}

	/// Long operations (network calls) should observe this and return promptly with an
	/// error when it fires; such failures are treated as normal job failures.
	#[must_use]
	pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
		self.cancel.cancelled()
	}

	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}
}

/// The work payload of a job.
///
/// Implementors are usually an enum with one variant per background computation, so the
/// dispatch is checked exhaustively at compile time. The `Op` tag together with the target
/// directory forms the idempotency key used for de-duplication by the owning feature.
#[async_trait]
pub trait Work: fmt::Debug + Send + Sync + Sized + 'static {
	/// Stable tag naming the computation this work performs.
	type Op: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;
	/// Unified error type for all work of this kind.
	type Error: std::error::Error + Send + Sync + 'static;

	fn op(&self) -> Self::Op;

	async fn run(&self, ctx: &WorkContext) -> Result<ExecStatus, Self::Error>;

	/// Follow-up jobs to enqueue once this job finishes, successfully or not.
	///
	/// Invoked exactly once, after `run` returned and before the job is marked done, so
	/// dependents waiting on this job also wait for the follow-ups to be scheduled.
	fn followups(
		&self,
		_ctx: &WorkContext,
		_result: &Result<ExecStatus, Self::Error>,
	) -> FollowupGraph<Self> {
		FollowupGraph::default()
	}
}

/// A job to be enqueued into the [`JobStore`](crate::JobStore).
#[derive(Debug)]
pub struct Job<W> {
	pub dir: DirHandle,
	pub work: W,
	pub priority: JobPriority,
	/// Jobs that must have finished (successfully or not) before this one may start.
	pub depends_on: Vec<JobId>,
	/// Whether the work should recompute even when the artifact state says otherwise.
	pub ignore_state: bool,
}

impl<W> Job<W> {
	pub fn new(dir: DirHandle, work: W) -> Self {
		Self {
			dir,
			work,
			priority: JobPriority::High,
			depends_on: Vec::new(),
			ignore_state: false,
		}
	}

	#[must_use]
	pub fn with_priority(mut self, priority: JobPriority) -> Self {
		self.priority = priority;
		self
	}

	#[must_use]
	pub fn depends_on(mut self, ids: impl IntoIterator<Item = JobId>) -> Self {
		self.depends_on.extend(ids);
		self
	}

	#[must_use]
	pub fn ignoring_state(mut self, ignore_state: bool) -> Self {
		self.ignore_state = ignore_state;
		self
	}
}

/// One entry of a [`FollowupGraph`].
#[derive(Debug)]
pub struct FollowupJob<W> {
	pub job: Job<W>,
	/// Indices of earlier entries in the same graph this entry additionally depends on.
	/// They are resolved to real job IDs when the graph is enqueued.
	pub after: Vec<usize>,
}

/// An explicit continuation value: the set of follow-up jobs a finished job spawns.
///
/// Entries may depend on each other by batch index (on top of any external job IDs
/// already named in `Job::depends_on`), which keeps continuation-shaped dependency
/// graphs inspectable and testable without executing them.
#[derive(Debug)]
pub struct FollowupGraph<W> {
	jobs: Vec<FollowupJob<W>>,
}

impl<W> Default for FollowupGraph<W> {
	fn default() -> Self {
		Self { jobs: Vec::new() }
	}
}

impl<W> FollowupGraph<W> {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends a job with no intra-batch dependencies, returning its batch index.
	pub fn push(&mut self, job: Job<W>) -> usize {
		self.push_after(job, Vec::new())
	}

	/// Appends a job depending on earlier batch entries, returning its batch index.
	///
	/// # Panics
	///
	/// Panics if any index in `after` does not refer to an earlier entry; that is a
	/// defect in the continuation, not a runtime condition.
	pub fn push_after(&mut self, job: Job<W>, after: Vec<usize>) -> usize {
		let idx = self.jobs.len();
		assert!(
			after.iter().all(|&i| i < idx),
			"followup may only depend on earlier entries of the same graph"
		);
		self.jobs.push(FollowupJob { job, after });
		idx
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.jobs.is_empty()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.jobs.len()
	}

	#[must_use]
	pub fn jobs(&self) -> &[FollowupJob<W>] {
		&self.jobs
	}

	pub(crate) fn into_jobs(self) -> Vec<FollowupJob<W>> {
		self.jobs
	}
}
