//! Single-use session keys exchanged for a session id.
//!
//! A key is popped by one conditional write that flips the fresh record to stale. Two concurrent
//! pops race on that write and exactly one of them observes the fresh version.

// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
// self
use crate::{
	_prelude::*,
	clock::Clock,
	crypto,
	obs::{self, RepoKind},
	store::{self, Backend, CommitOutcome, Document, RepoFuture, Table, WriteBatch},
};

/// Random bytes in a generated key.
pub const SESSION_KEY_LEN: usize = 32;

/// A key handed to the user agent, bound to a session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey {
	/// Opaque key.
	pub key: String,
	/// Session the key redeems.
	pub session_id: String,
}
impl SessionKey {
	/// Binds an existing key to a session.
	pub fn new(key: impl Into<String>, session_id: impl Into<String>) -> Self {
		Self { key: key.into(), session_id: session_id.into() }
	}

	/// Mints a random key for `session_id`.
	pub fn generate(session_id: impl Into<String>) -> Self {
		Self::new(URL_SAFE_NO_PAD.encode(crypto::random_bytes(SESSION_KEY_LEN)), session_id)
	}
}
impl Debug for SessionKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionKey")
			.field("key", &"<redacted>")
			.field("session_id", &self.session_id)
			.finish()
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SessionKeyRecord {
	key: String,
	session_id: String,
	#[serde(with = "time::serde::rfc3339")]
	expires_at: OffsetDateTime,
	stale: bool,
}
impl SessionKeyRecord {
	fn to_document(&self) -> Result<Document> {
		Ok(Document::encode(self)?.expiring_at(self.expires_at))
	}
}

/// Session key persistence contract.
pub trait SessionKeyRepo
where
	Self: Send + Sync,
{
	/// Stores a fresh key that expires `ttl` from now.
	fn push(&self, key: SessionKey, ttl: Duration) -> RepoFuture<'_, ()>;

	/// Redeems a key exactly once, returning its session id.
	///
	/// Missing, stale, and expired keys are all [`Error::InvalidSessionKey`].
	fn pop<'a>(&'a self, key: &'a str) -> RepoFuture<'a, String>;
}

/// [`SessionKeyRepo`] over any [`Backend`].
#[derive(Clone, Debug)]
pub struct BackendSessionKeyRepo {
	backend: Arc<dyn Backend>,
	clock: Arc<dyn Clock>,
}
impl BackendSessionKeyRepo {
	/// Creates a repository reading expiry from `clock`.
	pub fn new(backend: Arc<dyn Backend>, clock: Arc<dyn Clock>) -> Self {
		Self { backend, clock }
	}
}
impl SessionKeyRepo for BackendSessionKeyRepo {
	fn push(&self, key: SessionKey, ttl: Duration) -> RepoFuture<'_, ()> {
		obs::observe(RepoKind::SessionKey, "push", async move {
			if key.key.is_empty() || key.session_id.is_empty() {
				return Err(Error::InvalidId);
			}

			let record = SessionKeyRecord {
				expires_at: self.clock.now() + ttl,
				key: key.key,
				session_id: key.session_id,
				stale: false,
			};
			let batch =
				WriteBatch::new().insert(Table::SessionKey, record.key.clone(), record.to_document()?);

			match self.backend.commit(batch).await? {
				CommitOutcome::Committed => Ok(()),
				CommitOutcome::Conflict { .. } => Err(Error::DuplicateId),
			}
		})
	}

	fn pop<'a>(&'a self, key: &'a str) -> RepoFuture<'a, String> {
		obs::observe(RepoKind::SessionKey, "pop", async move {
			let Some((fresh, record)) =
				store::load::<SessionKeyRecord>(&*self.backend, Table::SessionKey, key).await?
			else {
				return Err(Error::InvalidSessionKey);
			};

			if record.stale || record.expires_at <= self.clock.now() {
				return Err(Error::InvalidSessionKey);
			}

			let stale = SessionKeyRecord { stale: true, ..record };
			let batch = WriteBatch::new()
				.expect_equals(Table::SessionKey, key, fresh.body)
				.put(Table::SessionKey, key, stale.to_document()?);

			match self.backend.commit(batch).await? {
				CommitOutcome::Committed => Ok(stale.session_id),
				CommitOutcome::Conflict { .. } => Err(Error::InvalidSessionKey),
			}
		})
	}
}
