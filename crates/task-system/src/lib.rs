//!
//! # Job System
//!
//! Groundwork's job system turns "a file changed" events into ordered graphs of background
//! computations. Features enqueue jobs scoped to a directory, optionally depending on other
//! jobs; the system executes them concurrently subject to dependency order and a per-priority
//! concurrency budget.
//!
//! Bring your own work payload (a type implementing [`Work`]) and enqueue some jobs:
//! - Jobs with unsatisfied dependencies are held until every predecessor has finished,
//!   successfully or not;
//! - Follow-up jobs are described as data ([`FollowupGraph`]) rather than opaque callbacks,
//!   so the dependency graph stays inspectable without executing it;
//! - Queued jobs for a directory can be dropped atomically when the directory goes away,
//!   while running jobs are never interrupted mid-flight;
//! - `wait_for_jobs` awaits jobs *and*, transitively, any follow-up jobs they spawned.
//!
//! ## Basic example
//!
//! ```
//! use gw_task_system::{
//! 	DirHandle, ExecStatus, Job, JobPriority, JobStore, NoOpenDocuments, Scheduler, Work,
//! 	WorkContext,
//! };
//! use async_trait::async_trait;
//! use std::sync::Arc;
//! use thiserror::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum SampleError {
//! 	#[error("sample error")]
//! 	Sample,
//! }
//!
//! #[derive(Debug)]
//! pub struct ReadyWork;
//!
//! #[async_trait]
//! impl Work for ReadyWork {
//! 	type Op = &'static str;
//! 	type Error = SampleError;
//!
//! 	fn op(&self) -> Self::Op {
//! 		"ready"
//! 	}
//!
//! 	async fn run(&self, _ctx: &WorkContext) -> Result<ExecStatus, SampleError> {
//! 		Ok(ExecStatus::Done)
//! 	}
//! }
//!
//! #[tokio::main]
//! async fn main() {
//! 	let store = Arc::new(JobStore::new(Arc::new(NoOpenDocuments)));
//! 	let scheduler = Scheduler::new(Arc::clone(&store), 2, JobPriority::High);
//! 	scheduler.start();
//!
//! 	let id = store.enqueue(Job::new(DirHandle::from_path("/mod"), ReadyWork));
//! 	store.wait_for_jobs(&[id]).await;
//!
//! 	scheduler.stop().await;
//! }
//! ```

#![warn(
	clippy::all,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::dbg_macro,
	deprecated
)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod error;
mod job;
mod scheduler;
mod store;

pub use error::JobError;
pub use job::{
	DirHandle, ExecStatus, FollowupGraph, FollowupJob, Job, JobId, JobPriority, JobState, Work,
	WorkContext,
};
pub use scheduler::Scheduler;
pub use store::{DocumentLookup, JobStore, NoOpenDocuments};
