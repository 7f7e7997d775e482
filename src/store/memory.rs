//! Thread-safe in-memory [`Backend`] with native expiry.

// self
use crate::{
	_prelude::*,
	store::{Backend, CommitOutcome, Document, StoreFuture, Table, WriteBatch, tables::Tables},
};

type TableMap = Arc<RwLock<Tables>>;

/// Keeps every table in-process.
///
/// Expired documents are evicted when read and swept from every table on each commit.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend(TableMap);
impl MemoryBackend {
	fn get_now(map: &TableMap, table: Table, key: &str) -> Option<Document> {
		let now = OffsetDateTime::now_utc();

		if let Some(document) = map.read().get(table, key, now) {
			return Some(document.clone());
		}

		map.write().evict_if_expired(table, key, now);

		None
	}
}
impl Backend for MemoryBackend {
	fn name(&self) -> &'static str {
		"memory"
	}

	fn native_expiry(&self) -> bool {
		true
	}

	fn get<'a>(&'a self, table: Table, key: &'a str) -> StoreFuture<'a, Option<Document>> {
		Box::pin(async move { Ok(Self::get_now(&self.0, table, key)) })
	}

	fn scan(&self, table: Table) -> StoreFuture<'_, Vec<(String, Document)>> {
		Box::pin(async move { Ok(self.0.read().scan(table, OffsetDateTime::now_utc())) })
	}

	fn commit(&self, batch: WriteBatch) -> StoreFuture<'_, CommitOutcome> {
		Box::pin(async move {
			let now = OffsetDateTime::now_utc();
			let mut tables = self.0.write();
			let outcome = tables.apply(batch, now);

			tables.purge_expired(now);

			Ok(outcome)
		})
	}

	fn purge_expired(&self, now: OffsetDateTime) -> StoreFuture<'_, usize> {
		Box::pin(async move { Ok(self.0.write().purge_expired(now)) })
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::time::Duration as StdDuration;
	// crates.io
	use serde_json::json;
	// self
	use super::*;
	use crate::{
		clock::SystemClock,
		session::{BackendSessionKeyRepo, SessionKey, SessionKeyRepo},
	};

	#[tokio::test]
	async fn expired_documents_never_outlive_a_commit() {
		let backend = MemoryBackend::default();
		let past = OffsetDateTime::now_utc() - Duration::seconds(1);
		let document = Document { body: json!("gone"), expires_at: Some(past) };

		backend
			.commit(WriteBatch::new().put(Table::SessionKey, "k", document))
			.await
			.expect("Commit should succeed.");

		assert!(backend.get(Table::SessionKey, "k").await.expect("Read should succeed.").is_none());
		assert_eq!(
			backend.purge_expired(OffsetDateTime::now_utc()).await.expect("Purge should succeed."),
			0,
			"The commit should already have swept the document."
		);
	}

	#[tokio::test]
	async fn popped_session_keys_are_swept_after_expiry() {
		let backend = MemoryBackend::default();
		let repo = BackendSessionKeyRepo::new(Arc::new(backend.clone()), Arc::new(SystemClock));

		for i in 0..20 {
			let key = SessionKey::generate(format!("s{i}"));

			repo.push(key.clone(), Duration::milliseconds(50)).await.expect("Push should succeed.");
			repo.pop(&key.key).await.expect("Pop should succeed.");
		}

		tokio::time::sleep(StdDuration::from_millis(100)).await;
		repo.push(SessionKey::generate("live"), Duration::minutes(5))
			.await
			.expect("Push should succeed.");

		assert_eq!(
			backend.purge_expired(OffsetDateTime::now_utc()).await.expect("Purge should succeed."),
			0
		);
	}

	#[tokio::test]
	async fn clones_share_state() {
		let backend = MemoryBackend::default();
		let clone = backend.clone();
		let document = Document { body: json!(1), expires_at: None };

		backend
			.commit(WriteBatch::new().insert(Table::User, "u1", document))
			.await
			.expect("Commit should succeed.");

		assert!(clone.get(Table::User, "u1").await.expect("Read should succeed.").is_some());
		assert!(backend.native_expiry());
	}
}
