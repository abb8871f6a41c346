use std::{sync::Arc, time::Duration};

use futures_concurrency::future::Join;
use gw_task_system::{
	DirHandle, FollowupGraph, Job, JobPriority, JobStore, NoOpenDocuments, Scheduler,
};
use tokio::sync::watch;
use tracing_test::traced_test;

mod common;

use common::{Behavior, ExecLog, SampleWork};

fn new_store() -> Arc<JobStore<SampleWork>> {
	Arc::new(JobStore::new(Arc::new(NoOpenDocuments)))
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn dependency_ordering() {
	let store = new_store();
	let scheduler = Scheduler::new(Arc::clone(&store), 4, JobPriority::High);
	scheduler.start();

	let log = ExecLog::default();
	let dir = DirHandle::from_path("/mod");

	let a = store.enqueue(Job::new(
		dir.clone(),
		SampleWork::with_behavior("a", "a", &log, Behavior::Sleep(Duration::from_millis(100))),
	));
	let b = store.enqueue(Job::new(dir.clone(), SampleWork::new("b", "b", &log)).depends_on([a]));

	store.wait_for_jobs(&[a, b]).await;
	scheduler.stop().await;

	// B's work must not begin before A's has returned
	assert!(log.position("end:a").unwrap() < log.position("start:b").unwrap());
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn no_ordering_without_declared_dependency() {
	let store = new_store();
	let scheduler = Scheduler::new(Arc::clone(&store), 4, JobPriority::High);
	scheduler.start();

	let log = ExecLog::default();
	let dir = DirHandle::from_path("/mod");

	let ids = (0..8)
		.map(|i| {
			store.enqueue(Job::new(
				dir.clone(),
				SampleWork::new("sibling", format!("sibling-{i}"), &log),
			))
		})
		.collect::<Vec<_>>();

	store.wait_for_jobs(&ids).await;
	scheduler.stop().await;

	assert_eq!(log.count_matching("end:sibling-"), 8);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn failed_job_still_finishes() {
	let store = new_store();
	let scheduler = Scheduler::new(Arc::clone(&store), 2, JobPriority::High);
	scheduler.start();

	let log = ExecLog::default();
	let dir = DirHandle::from_path("/mod");

	let failing = store.enqueue(Job::new(
		dir.clone(),
		SampleWork::with_behavior("fail", "fail", &log, Behavior::Fail),
	));
	// A dependent of a failed job is released, not cancelled
	let dependent = store.enqueue(
		Job::new(dir.clone(), SampleWork::new("dep", "dep", &log)).depends_on([failing]),
	);

	store.wait_for_jobs(&[failing, dependent]).await;
	scheduler.stop().await;

	assert!(log.position("end:fail").unwrap() < log.position("start:dep").unwrap());
	assert!(store.job_state(failing).is_none(), "finished jobs are removed");
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn skipped_job_still_releases_dependents() {
	let store = new_store();
	let scheduler = Scheduler::new(Arc::clone(&store), 2, JobPriority::High);
	scheduler.start();

	let log = ExecLog::default();
	let dir = DirHandle::from_path("/mod");

	let skipped = store.enqueue(Job::new(
		dir.clone(),
		SampleWork::with_behavior("skip", "skip", &log, Behavior::StateNotChanged),
	));
	let dependent = store
		.enqueue(Job::new(dir.clone(), SampleWork::new("dep", "dep", &log)).depends_on([skipped]));

	store.wait_for_jobs(&[skipped, dependent]).await;
	scheduler.stop().await;

	assert!(log.position("end:skip").unwrap() < log.position("start:dep").unwrap());
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn dequeue_for_dir_cancels_pending_work() {
	let store = new_store();

	let log = ExecLog::default();
	let dir = DirHandle::from_path("/doomed");

	let ids = (0..5)
		.map(|i| {
			store.enqueue(Job::new(
				dir.clone(),
				SampleWork::new("doomed", format!("doomed-{i}"), &log),
			))
		})
		.collect::<Vec<_>>();

	// Directory goes away before any job ran
	assert_eq!(store.dequeue_jobs_for_dir(&dir), 5);
	assert!(store.queued_job_ids().is_empty());

	let scheduler = Scheduler::new(Arc::clone(&store), 2, JobPriority::High);
	scheduler.start();

	// Waiting on dequeued jobs returns immediately, they are gone
	store.wait_for_jobs(&ids).await;
	tokio::time::sleep(Duration::from_millis(50)).await;
	scheduler.stop().await;

	assert!(log.entries().is_empty(), "no dequeued job may execute");
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn dequeue_never_interrupts_running_job() {
	let store = new_store();
	let scheduler = Scheduler::new(Arc::clone(&store), 2, JobPriority::High);
	scheduler.start();

	let log = ExecLog::default();
	let dir = DirHandle::from_path("/mod");
	let (signal_tx, signal_rx) = watch::channel(false);

	let running = store.enqueue(Job::new(
		dir.clone(),
		SampleWork::with_behavior("blocked", "blocked", &log, Behavior::WaitSignal(signal_rx)),
	));

	// Let the job get claimed and start waiting on the signal
	tokio::time::timeout(Duration::from_secs(5), async {
		loop {
			if log.position("start:blocked").is_some() {
				break;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.unwrap();

	assert_eq!(store.dequeue_jobs_for_dir(&dir), 0, "running jobs are not dequeued");

	signal_tx.send(true).unwrap();
	store.wait_for_jobs(&[running]).await;
	scheduler.stop().await;

	assert!(log.position("end:blocked").is_some());
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn wait_follows_deferred_chain() {
	let store = new_store();
	let scheduler = Scheduler::new(Arc::clone(&store), 2, JobPriority::High);
	scheduler.start();

	let log = ExecLog::default();
	let dir = DirHandle::from_path("/mod");

	// first -> spawns second -> spawns third
	let mut second_graph = FollowupGraph::new();
	let mut third_graph = FollowupGraph::new();
	third_graph.push(Job::new(dir.clone(), SampleWork::new("third", "third", &log)));
	second_graph.push(Job::new(
		dir.clone(),
		SampleWork::new("second", "second", &log).with_followups(third_graph),
	));

	let first = store.enqueue(Job::new(
		dir.clone(),
		SampleWork::new("first", "first", &log).with_followups(second_graph),
	));

	store.wait_for_jobs(&[first]).await;
	scheduler.stop().await;

	// waiting on the root must cover the transitively spawned jobs
	let entries = log.entries();
	assert!(entries.contains(&"end:second".to_string()));
	assert!(entries.contains(&"end:third".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn followup_batch_dependencies_are_ordered() {
	let store = new_store();
	let scheduler = Scheduler::new(Arc::clone(&store), 4, JobPriority::High);
	scheduler.start();

	let log = ExecLog::default();
	let dir = DirHandle::from_path("/mod");

	let mut graph = FollowupGraph::new();
	let x = graph.push(Job::new(
		dir.clone(),
		SampleWork::with_behavior("x", "x", &log, Behavior::Sleep(Duration::from_millis(100))),
	));
	graph.push_after(
		Job::new(dir.clone(), SampleWork::new("y", "y", &log)),
		vec![x],
	);

	let root = store.enqueue(Job::new(
		dir.clone(),
		SampleWork::new("root", "root", &log).with_followups(graph),
	));

	store.wait_for_jobs(&[root]).await;
	scheduler.stop().await;

	assert!(log.position("end:x").unwrap() < log.position("start:y").unwrap());
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn finished_deferred_jobs_leave_no_tombstone_behind() {
	let store = new_store();
	let log = ExecLog::default();
	let dir = DirHandle::from_path("/mod");

	let parent = store.enqueue(Job::new(dir.clone(), SampleWork::new("parent", "parent", &log)));
	let followup =
		store.enqueue(Job::new(dir.clone(), SampleWork::new("followup", "followup", &log)));

	// The follow-up overtook its parent and finished first
	store.finish_job(followup, Vec::new()).unwrap();
	store.finish_job(parent, vec![followup]).unwrap();

	assert!(
		store.job_state(parent).is_none(),
		"a tombstone must not outlive its deferred jobs"
	);
	// Waiting on the parent returns immediately, the whole chain is gone
	tokio::time::timeout(Duration::from_secs(5), store.wait_for_jobs(&[parent]))
		.await
		.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn followups_run_after_failure() {
	let store = new_store();
	let scheduler = Scheduler::new(Arc::clone(&store), 2, JobPriority::High);
	scheduler.start();

	let log = ExecLog::default();
	let dir = DirHandle::from_path("/mod");

	let mut graph = FollowupGraph::new();
	graph.push(Job::new(
		dir.clone(),
		SampleWork::new("after", "after", &log),
	));

	let failing = store.enqueue(Job::new(
		dir.clone(),
		SampleWork::with_behavior("fail", "fail", &log, Behavior::Fail).with_followups(graph),
	));

	store.wait_for_jobs(&[failing]).await;
	scheduler.stop().await;

	assert!(log.position("end:after").is_some());
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn low_priority_burst_cannot_starve_high_priority() {
	let store = new_store();
	let high = Scheduler::new(Arc::clone(&store), 2, JobPriority::High);
	let low = Scheduler::new(Arc::clone(&store), 1, JobPriority::Low);
	high.start();
	low.start();

	let log = ExecLog::default();
	let dir = DirHandle::from_path("/mod");

	for i in 0..50 {
		store.enqueue(
			Job::new(
				dir.clone(),
				SampleWork::with_behavior(
					"low",
					format!("low-{i}"),
					&log,
					Behavior::Sleep(Duration::from_millis(20)),
				),
			)
			.with_priority(JobPriority::Low),
		);
	}

	let urgent = store.enqueue(Job::new(dir.clone(), SampleWork::new("high", "high", &log)));
	store.wait_for_jobs(&[urgent]).await;

	// The high priority job finished while the low priority burst is still draining
	assert!(log.count_matching("end:low-") < 50);

	(high.stop(), low.stop()).join().await;
}
