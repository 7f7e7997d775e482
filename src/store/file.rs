//! File-backed [`Backend`] that snapshots every table to one JSON document.
//!
//! Every committed batch rewrites the snapshot through a temporary file and an atomic rename, so
//! a crash leaves either the previous or the next state on disk. The file format has no notion of
//! expiry, so expired documents linger until [`Backend::purge_expired`] runs; reads still hide
//! them.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	store::{
		Backend, CommitOutcome, Document, StoreError, StoreFuture, Table, WriteBatch,
		tables::Tables,
	},
};

/// Persists all tables to a JSON file after each mutation.
#[derive(Clone, Debug)]
pub struct FileBackend {
	path: PathBuf,
	inner: Arc<RwLock<Tables>>,
}
impl FileBackend {
	/// Opens (or creates) a snapshot at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Snapshot location.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<Tables, StoreError> {
		if !path.exists() {
			return Ok(Tables::default());
		}

		let metadata = path.metadata().map_err(|e| StoreError::Backend {
			message: format!("Failed to inspect {}: {e}", path.display()),
		})?;

		if metadata.len() == 0 {
			return Ok(Tables::default());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;
		let mut de = serde_json::Deserializer::from_slice(&bytes);

		serde_path_to_error::deserialize(&mut de).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist_locked(&self, contents: &Tables) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let serialized =
			serde_json::to_vec_pretty(contents).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}
}
impl Backend for FileBackend {
	fn name(&self) -> &'static str {
		"file"
	}

	fn native_expiry(&self) -> bool {
		false
	}

	fn get<'a>(&'a self, table: Table, key: &'a str) -> StoreFuture<'a, Option<Document>> {
		Box::pin(async move {
			Ok(self.inner.read().get(table, key, OffsetDateTime::now_utc()).cloned())
		})
	}

	fn scan(&self, table: Table) -> StoreFuture<'_, Vec<(String, Document)>> {
		Box::pin(async move { Ok(self.inner.read().scan(table, OffsetDateTime::now_utc())) })
	}

	fn commit(&self, batch: WriteBatch) -> StoreFuture<'_, CommitOutcome> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			// Apply to a copy so a failed write leaves memory in step with the file.
			let mut next = guard.clone();
			let outcome = next.apply(batch, OffsetDateTime::now_utc());

			if outcome == CommitOutcome::Committed {
				self.persist_locked(&next)?;

				*guard = next;
			}

			Ok(outcome)
		})
	}

	fn purge_expired(&self, now: OffsetDateTime) -> StoreFuture<'_, usize> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let mut next = guard.clone();
			let purged = next.purge_expired(now);

			if purged > 0 {
				self.persist_locked(&next)?;

				*guard = next;
			}

			Ok(purged)
		})
	}
}
