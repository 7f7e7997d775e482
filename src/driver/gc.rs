//! Periodic purge of expired documents for backends without native expiry.

// std
use std::time::Duration as StdDuration;
// crates.io
use tokio::{sync::oneshot, task::JoinHandle};
// self
use crate::{
	_prelude::*,
	obs::{self, RepoKind},
	store::Backend,
};

/// Purges expired documents from one backend.
#[derive(Clone, Debug)]
pub struct GarbageCollector {
	backend: Arc<dyn Backend>,
	interval: StdDuration,
}
impl GarbageCollector {
	/// Creates a collector that purges every `interval` once started.
	pub fn new(backend: Arc<dyn Backend>, interval: StdDuration) -> Self {
		Self { backend, interval }
	}

	/// Purge period.
	pub fn interval(&self) -> StdDuration {
		self.interval
	}

	/// Runs a single purge pass and returns how many documents were removed.
	pub async fn purge_once(&self) -> Result<usize> {
		let purged = self.backend.purge_expired(OffsetDateTime::now_utc()).await?;

		if purged > 0 {
			obs::log_purge(self.backend.name(), purged);
		}

		Ok(purged)
	}

	/// Spawns the purge loop on the current tokio runtime.
	///
	/// The first pass runs one `interval` after spawning. Failed passes are logged and retried at
	/// the next tick. Dropping the handle also ends the loop.
	pub fn run(self) -> GarbageCollectorHandle {
		let (stop, mut stopped) = oneshot::channel();
		let task = tokio::spawn(async move {
			loop {
				match tokio::time::timeout(self.interval, &mut stopped).await {
					Err(_) =>
						if let Err(e) = self.purge_once().await {
							obs::log_failure(RepoKind::Driver, "purge_expired", &e);
						},
					Ok(_) => break,
				}
			}
		});

		GarbageCollectorHandle { stop, task }
	}
}

/// Handle to a running [`GarbageCollector`] loop.
#[derive(Debug)]
pub struct GarbageCollectorHandle {
	stop: oneshot::Sender<()>,
	task: JoinHandle<()>,
}
impl GarbageCollectorHandle {
	/// Signals the loop to exit and waits for it to finish its current pass.
	pub async fn stop(self) {
		let _ = self.stop.send(());
		let _ = self.task.await;
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, fs, path::PathBuf, process};
	// crates.io
	use serde_json::json;
	// self
	use super::*;
	use crate::store::{Document, FileBackend, Table, WriteBatch};

	/// File snapshot backend, which keeps expired documents until purged.
	struct Snapshot {
		backend: Arc<FileBackend>,
		path: PathBuf,
	}
	impl Snapshot {
		fn open(label: &str) -> Self {
			let path = env::temp_dir().join(format!(
				"oidc_store_gc_{label}_{}_{}.json",
				process::id(),
				OffsetDateTime::now_utc().unix_timestamp_nanos(),
			));
			let backend = Arc::new(FileBackend::open(&path).expect("Snapshot should open."));

			Self { backend, path }
		}
	}
	impl Drop for Snapshot {
		fn drop(&mut self) {
			let _ = fs::remove_file(&self.path);
		}
	}

	fn expiring(offset: Duration) -> Document {
		Document { body: json!({}), expires_at: Some(OffsetDateTime::now_utc() + offset) }
	}

	#[tokio::test]
	async fn purge_once_removes_expired_documents() {
		let snapshot = Snapshot::open("once");
		let backend = snapshot.backend.clone();

		backend
			.commit(
				WriteBatch::new()
					.put(Table::Session, "old", expiring(-Duration::minutes(1)))
					.put(Table::Session, "new", expiring(Duration::minutes(1))),
			)
			.await
			.expect("Fixture commit should succeed.");

		let collector = GarbageCollector::new(backend.clone(), StdDuration::from_secs(60));

		assert_eq!(collector.purge_once().await.expect("Purge should succeed."), 1);
		assert_eq!(collector.purge_once().await.expect("Purge should succeed."), 0);
		assert_eq!(backend.scan(Table::Session).await.expect("Scan should succeed.").len(), 1);
	}

	#[tokio::test]
	async fn run_purges_until_stopped() {
		let snapshot = Snapshot::open("run");
		let backend = snapshot.backend.clone();

		backend
			.commit(WriteBatch::new().put(Table::SessionKey, "k", expiring(-Duration::seconds(1))))
			.await
			.expect("Fixture commit should succeed.");

		let handle = GarbageCollector::new(backend.clone(), StdDuration::from_millis(10)).run();

		tokio::time::sleep(StdDuration::from_millis(100)).await;
		handle.stop().await;

		assert_eq!(backend.purge_expired(OffsetDateTime::now_utc()).await.expect("Purge works."), 0);
	}
}
