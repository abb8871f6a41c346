//! Typed publish/subscribe with completion reporting.
//!
//! A subscriber may register a *done* channel; `publish` then waits for each such
//! subscriber to report the IDs of the jobs it scheduled in response, and returns the
//! union. This lets callers (and tests) await everything an event set in motion.

use std::{fmt, sync::Mutex};

use gw_task_system::JobId;
use tokio::sync::Mutex as AsyncMutex;
use tracing::trace;

use super::{
	DidChangeEvent, DidChangeWatchedEvent, DidOpenEvent, DiscoverEvent, ManifestChangeEvent,
	PluginLockChangeEvent,
};

/// Buffered events per subscriber before `publish` backpressures.
const CHANNEL_SIZE: usize = 10;

const POISONED_LOCK: &str = "topic lock poisoned";

struct Subscriber<T> {
	tx: async_channel::Sender<T>,
	done: Option<async_channel::Receiver<Vec<JobId>>>,
}

pub struct Topic<T> {
	name: &'static str,
	/// Subscribers registered since the last publish. Kept separate so `subscribe` stays
	/// synchronous: a subscription completes before `subscribe` returns and is seen by
	/// every later `publish`, even one racing the registration.
	incoming: Mutex<Vec<Subscriber<T>>>,
	subscribers: AsyncMutex<Vec<Subscriber<T>>>,
}

impl<T> fmt::Debug for Topic<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Topic").field("name", &self.name).finish()
	}
}

impl<T: Clone + Send> Topic<T> {
	fn new(name: &'static str) -> Self {
		Self {
			name,
			incoming: Mutex::new(Vec::new()),
			subscribers: AsyncMutex::new(Vec::new()),
		}
	}

	/// Subscribes to this topic. Passing a `done` receiver makes `publish` wait for this
	/// subscriber to send the job IDs it scheduled for each delivered event.
	pub fn subscribe(
		&self,
		done: Option<async_channel::Receiver<Vec<JobId>>>,
	) -> async_channel::Receiver<T> {
		let (tx, rx) = async_channel::bounded(CHANNEL_SIZE);
		self.incoming
			.lock()
			.expect(POISONED_LOCK)
			.push(Subscriber { tx, done });
		rx
	}

	/// Delivers `event` to every subscriber, in subscription order, and collects the job
	/// IDs reported through done channels. Subscribers that went away are dropped.
	pub async fn publish(&self, event: T) -> Vec<JobId> {
		let mut subscribers = self.subscribers.lock().await;
		subscribers.append(&mut self.incoming.lock().expect(POISONED_LOCK));
		let mut ids = Vec::new();
		let mut dead = Vec::new();

		for (idx, sub) in subscribers.iter().enumerate() {
			if sub.tx.send(event.clone()).await.is_err() {
				dead.push(idx);
				continue;
			}
			if let Some(done) = &sub.done {
				match done.recv().await {
					Ok(mut batch) => ids.append(&mut batch),
					Err(_) => dead.push(idx),
				}
			}
		}

		for idx in dead.into_iter().rev() {
			trace!(topic = self.name, "dropping closed subscriber");
			subscribers.remove(idx);
		}

		ids
	}
}

#[derive(Debug)]
pub struct EventBus {
	pub discover: Topic<DiscoverEvent>,
	pub did_open: Topic<DidOpenEvent>,
	pub did_change: Topic<DidChangeEvent>,
	pub did_change_watched: Topic<DidChangeWatchedEvent>,
	pub manifest_change: Topic<ManifestChangeEvent>,
	pub plugin_lock_change: Topic<PluginLockChangeEvent>,
}

impl EventBus {
	#[must_use]
	pub fn new() -> Self {
		Self {
			discover: Topic::new("discover"),
			did_open: Topic::new("did_open"),
			did_change: Topic::new("did_change"),
			did_change_watched: Topic::new("did_change_watched"),
			manifest_change: Topic::new("manifest_change"),
			plugin_lock_change: Topic::new("plugin_lock_change"),
		}
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use std::path::PathBuf;

	use super::*;

	#[tokio::test]
	async fn publish_collects_job_ids_from_done_channels() {
		let topic = Topic::<DiscoverEvent>::new("discover");

		let (done_tx, done_rx) = async_channel::bounded(1);
		let rx = topic.subscribe(Some(done_rx));
		let plain_rx = topic.subscribe(None);

		let reported = JobId::new_v4();
		let worker = tokio::spawn(async move {
			let event = rx.recv().await.unwrap();
			assert_eq!(event.path, PathBuf::from("/mod"));
			done_tx.send(vec![reported]).await.unwrap();
		});

		let ids = topic
			.publish(DiscoverEvent {
				path: PathBuf::from("/mod"),
				filenames: vec![],
			})
			.await;

		assert_eq!(ids, vec![reported]);
		assert!(plain_rx.recv().await.is_ok());
		worker.await.unwrap();
	}

	#[tokio::test]
	async fn subscription_is_visible_to_an_immediate_publish() {
		let topic = Topic::<DiscoverEvent>::new("discover");

		// No yield between subscribing and publishing
		let rx = topic.subscribe(None);
		topic
			.publish(DiscoverEvent {
				path: PathBuf::from("/mod"),
				filenames: vec![],
			})
			.await;

		let event = rx.try_recv().unwrap();
		assert_eq!(event.path, PathBuf::from("/mod"));
	}

	#[tokio::test]
	async fn closed_subscribers_are_dropped() {
		let topic = Topic::<DiscoverEvent>::new("discover");
		drop(topic.subscribe(None));

		let ids = topic
			.publish(DiscoverEvent {
				path: PathBuf::from("/mod"),
				filenames: vec![],
			})
			.await;
		assert!(ids.is_empty());
		assert!(topic.subscribers.lock().await.is_empty());
		assert!(topic.incoming.lock().unwrap().is_empty());
	}
}
