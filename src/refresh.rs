//! Refresh tokens stored as bcrypt hashes of their random payload.

// self
use crate::{
	_prelude::*,
	crypto::{SecretHash, SecretHasher},
	id::IdGenerator,
	obs::{self, RepoKind},
	store::{self, Backend, CommitOutcome, Document, RepoFuture, Table, WriteBatch},
	token::OpaqueToken,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct RefreshTokenRecord {
	id: String,
	payload_hash: SecretHash,
	user_id: String,
	client_id: String,
}

/// Refresh token persistence contract.
pub trait RefreshTokenRepo
where
	Self: Send + Sync,
{
	/// Issues a token for `user_id` and `client_id`, returning its wire form exactly once.
	fn create<'a>(&'a self, user_id: &'a str, client_id: &'a str) -> RepoFuture<'a, String>;

	/// Returns the owning user id when `token` is genuine and was issued to `client_id`.
	///
	/// Never mutates the stored record.
	fn verify<'a>(&'a self, client_id: &'a str, token: &'a str) -> RepoFuture<'a, String>;

	/// Deletes `token` if it is genuine and owned by `user_id`.
	fn revoke<'a>(&'a self, user_id: &'a str, token: &'a str) -> RepoFuture<'a, ()>;
}

/// [`RefreshTokenRepo`] over any [`Backend`].
#[derive(Clone, Debug)]
pub struct BackendRefreshTokenRepo {
	backend: Arc<dyn Backend>,
	ids: Arc<IdGenerator>,
	hasher: SecretHasher,
	payload_len: usize,
}
impl BackendRefreshTokenRepo {
	/// Creates a repository issuing `payload_len`-byte payloads hashed with `hasher`.
	pub fn new(
		backend: Arc<dyn Backend>,
		ids: Arc<IdGenerator>,
		hasher: SecretHasher,
		payload_len: usize,
	) -> Self {
		Self { backend, ids, hasher, payload_len }
	}

	/// Parses `token` and loads the record it names, checking nothing else.
	async fn lookup(&self, token: &str) -> Result<(OpaqueToken, Document, RefreshTokenRecord)> {
		let token = OpaqueToken::parse(token)?;
		let (document, record) =
			store::load::<RefreshTokenRecord>(&*self.backend, Table::RefreshToken, token.id())
				.await?
				.ok_or(Error::InvalidToken)?;

		Ok((token, document, record))
	}
}
impl RefreshTokenRepo for BackendRefreshTokenRepo {
	fn create<'a>(&'a self, user_id: &'a str, client_id: &'a str) -> RepoFuture<'a, String> {
		obs::observe(RepoKind::RefreshToken, "create", async move {
			if user_id.is_empty() {
				return Err(Error::InvalidUserId);
			}
			if client_id.is_empty() {
				return Err(Error::InvalidClientId);
			}

			let token = OpaqueToken::issue(&self.ids, self.payload_len);
			let record = RefreshTokenRecord {
				id: token.id().to_string(),
				payload_hash: self.hasher.hash(token.payload().expose())?,
				user_id: user_id.to_owned(),
				client_id: client_id.to_owned(),
			};
			let batch = WriteBatch::new().insert(
				Table::RefreshToken,
				record.id.clone(),
				Document::encode(&record)?,
			);

			match self.backend.commit(batch).await? {
				CommitOutcome::Committed => Ok(token.encode()),
				CommitOutcome::Conflict { .. } => Err(Error::DuplicateId),
			}
		})
	}

	fn verify<'a>(&'a self, client_id: &'a str, token: &'a str) -> RepoFuture<'a, String> {
		obs::observe(RepoKind::RefreshToken, "verify", async move {
			let (token, _, record) = self.lookup(token).await?;

			if record.client_id != client_id {
				return Err(Error::InvalidClientId);
			}
			if !record.payload_hash.matches(token.payload().expose()) {
				return Err(Error::InvalidToken);
			}

			Ok(record.user_id)
		})
	}

	fn revoke<'a>(&'a self, user_id: &'a str, token: &'a str) -> RepoFuture<'a, ()> {
		obs::observe(RepoKind::RefreshToken, "revoke", async move {
			let (token, document, record) = self.lookup(token).await?;

			if record.user_id != user_id {
				return Err(Error::InvalidUserId);
			}
			if !record.payload_hash.matches(token.payload().expose()) {
				return Err(Error::InvalidToken);
			}

			let batch = WriteBatch::new()
				.expect_equals(Table::RefreshToken, record.id.clone(), document.body)
				.remove(Table::RefreshToken, record.id);

			match self.backend.commit(batch).await? {
				CommitOutcome::Committed => Ok(()),
				CommitOutcome::Conflict { .. } => Err(Error::InvalidToken),
			}
		})
	}
}
