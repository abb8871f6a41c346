use std::{
	sync::{Arc, Mutex},
	time::Duration,
};

use async_trait::async_trait;
use gw_task_system::{ExecStatus, FollowupGraph, Work, WorkContext};
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum SampleError {
	#[error("sample error")]
	Sample,
}

/// Shared, ordered record of work executions, used to assert scheduling order.
#[derive(Debug, Default, Clone)]
pub struct ExecLog(Arc<Mutex<Vec<String>>>);

impl ExecLog {
	pub fn record(&self, entry: impl Into<String>) {
		self.0.lock().unwrap().push(entry.into());
	}

	pub fn entries(&self) -> Vec<String> {
		self.0.lock().unwrap().clone()
	}

	pub fn position(&self, entry: &str) -> Option<usize> {
		self.entries().iter().position(|e| e == entry)
	}

	pub fn count_matching(&self, prefix: &str) -> usize {
		self.entries()
			.iter()
			.filter(|e| e.starts_with(prefix))
			.count()
	}
}

#[derive(Debug)]
pub enum Behavior {
	Ready,
	Sleep(Duration),
	Fail,
	StateNotChanged,
	/// Parks until the watch flips to `true`.
	WaitSignal(watch::Receiver<bool>),
}

/// A work payload scripted at construction time: its behavior, its label in the
/// execution log and its (optional) followup graph are all plain data.
#[derive(Debug)]
pub struct SampleWork {
	pub op: &'static str,
	pub label: String,
	pub log: ExecLog,
	pub behavior: Behavior,
	// taken on the single followups() invocation
	pub followup_plan: Mutex<Option<FollowupGraph<SampleWork>>>,
}

impl SampleWork {
	pub fn new(op: &'static str, label: impl Into<String>, log: &ExecLog) -> Self {
		Self::with_behavior(op, label, log, Behavior::Ready)
	}

	pub fn with_behavior(
		op: &'static str,
		label: impl Into<String>,
		log: &ExecLog,
		behavior: Behavior,
	) -> Self {
		Self {
			op,
			label: label.into(),
			log: log.clone(),
			behavior,
			followup_plan: Mutex::new(None),
		}
	}

	pub fn with_followups(mut self, graph: FollowupGraph<SampleWork>) -> Self {
		self.followup_plan = Mutex::new(Some(graph));
		self
	}
}

#[async_trait]
impl Work for SampleWork {
	type Op = &'static str;
	type Error = SampleError;

	fn op(&self) -> Self::Op {
		self.op
	}

	async fn run(&self, _ctx: &WorkContext) -> Result<ExecStatus, SampleError> {
		self.log.record(format!("start:{}", self.label));

		let out = match &self.behavior {
			Behavior::Ready => Ok(ExecStatus::Done),
			Behavior::Sleep(duration) => {
				tokio::time::sleep(*duration).await;
				Ok(ExecStatus::Done)
			}
			Behavior::Fail => Err(SampleError::Sample),
			Behavior::StateNotChanged => Ok(ExecStatus::StateNotChanged),
			Behavior::WaitSignal(rx) => {
				let mut rx = rx.clone();
				rx.wait_for(|go| *go).await.expect("signal sender dropped");
				Ok(ExecStatus::Done)
			}
		};

		self.log.record(format!("end:{}", self.label));
		out
	}

	fn followups(
		&self,
		_ctx: &WorkContext,
		_result: &Result<ExecStatus, SampleError>,
	) -> FollowupGraph<Self> {
		self.followup_plan
			.lock()
			.unwrap()
			.take()
			.unwrap_or_default()
	}
}
