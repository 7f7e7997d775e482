//! Local password material for users of the built-in password connector.

// self
use crate::{
	_prelude::*,
	clock::Clock,
	crypto::{CodecError, SecretHash, SecretHasher},
	obs::{self, RepoKind},
	store::{self, Backend, CommitOutcome, Document, RepoFuture, Table, WriteBatch},
};

/// bcrypt hash of a user's password.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Password(SecretHash);
impl Password {
	/// Hashes `plaintext`; empty and over-long passwords are [`Error::InvalidPassword`].
	pub fn from_plaintext(hasher: &SecretHasher, plaintext: &str) -> Result<Self> {
		if plaintext.is_empty() {
			return Err(Error::InvalidPassword);
		}

		match hasher.hash(plaintext.as_bytes()) {
			Ok(hash) => Ok(Self(hash)),
			Err(CodecError::SecretTooLong { .. }) => Err(Error::InvalidPassword),
			Err(e) => Err(e.into()),
		}
	}

	/// Wraps an existing bcrypt hash.
	pub fn from_hash(hash: SecretHash) -> Self {
		Self(hash)
	}

	/// Returns `true` when no hash is present.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

/// Password record for one user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordInfo {
	/// Owning user.
	pub user_id: String,
	/// Hashed password.
	pub password: Password,
	/// Instant after which the password no longer authenticates.
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub password_expires: Option<OffsetDateTime>,
}
impl PasswordInfo {
	/// Checks `plaintext` at `now`, failing closed for expired passwords.
	pub fn authenticate(&self, plaintext: &str, now: OffsetDateTime) -> bool {
		if self.password_expires.is_some_and(|at| at <= now) {
			return false;
		}

		self.password.0.matches(plaintext.as_bytes())
	}
}

/// Password persistence contract.
pub trait PasswordInfoRepo
where
	Self: Send + Sync,
{
	/// Fetches a user's password record.
	fn get<'a>(&'a self, user_id: &'a str) -> RepoFuture<'a, PasswordInfo>;

	/// Stores a new password record.
	fn create(&self, info: PasswordInfo) -> RepoFuture<'_, ()>;

	/// Replaces an existing password record.
	fn update(&self, info: PasswordInfo) -> RepoFuture<'_, ()>;

	/// Looks up the record and checks `plaintext` against it.
	///
	/// Unknown users and expired passwords are `false`.
	fn authenticate<'a>(&'a self, user_id: &'a str, plaintext: &'a str) -> RepoFuture<'a, bool>;
}

/// [`PasswordInfoRepo`] over any [`Backend`].
#[derive(Clone, Debug)]
pub struct BackendPasswordInfoRepo {
	backend: Arc<dyn Backend>,
	clock: Arc<dyn Clock>,
}
impl BackendPasswordInfoRepo {
	/// Creates a repository reading password expiry from `clock`.
	pub fn new(backend: Arc<dyn Backend>, clock: Arc<dyn Clock>) -> Self {
		Self { backend, clock }
	}

	async fn find(&self, user_id: &str) -> Result<Option<PasswordInfo>> {
		Ok(store::load(&*self.backend, Table::PasswordInfo, user_id).await?.map(|(_, info)| info))
	}
}
impl PasswordInfoRepo for BackendPasswordInfoRepo {
	fn get<'a>(&'a self, user_id: &'a str) -> RepoFuture<'a, PasswordInfo> {
		obs::observe(RepoKind::PasswordInfo, "get", async move {
			self.find(user_id).await?.ok_or(Error::NotFound)
		})
	}

	fn create(&self, info: PasswordInfo) -> RepoFuture<'_, ()> {
		obs::observe(RepoKind::PasswordInfo, "create", async move {
			if info.user_id.is_empty() {
				return Err(Error::InvalidId);
			}

			let batch = WriteBatch::new().insert(
				Table::PasswordInfo,
				info.user_id.clone(),
				Document::encode(&info)?,
			);

			match self.backend.commit(batch).await? {
				CommitOutcome::Committed => Ok(()),
				CommitOutcome::Conflict { .. } => Err(Error::DuplicateId),
			}
		})
	}

	fn update(&self, info: PasswordInfo) -> RepoFuture<'_, ()> {
		obs::observe(RepoKind::PasswordInfo, "update", async move {
			if info.user_id.is_empty() {
				return Err(Error::InvalidId);
			}
			if info.password.is_empty() {
				return Err(Error::InvalidPassword);
			}

			let batch = WriteBatch::new()
				.expect_present(Table::PasswordInfo, info.user_id.clone())
				.put(Table::PasswordInfo, info.user_id.clone(), Document::encode(&info)?);

			match self.backend.commit(batch).await? {
				CommitOutcome::Committed => Ok(()),
				CommitOutcome::Conflict { .. } => Err(Error::NotFound),
			}
		})
	}

	fn authenticate<'a>(&'a self, user_id: &'a str, plaintext: &'a str) -> RepoFuture<'a, bool> {
		obs::observe(RepoKind::PasswordInfo, "authenticate", async move {
			Ok(self
				.find(user_id)
				.await?
				.is_some_and(|info| info.authenticate(plaintext, self.clock.now())))
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		clock::ManualClock,
		crypto::{MAX_SECRET_LEN, MIN_HASH_COST},
		store::MemoryBackend,
	};

	fn hasher() -> SecretHasher {
		SecretHasher::new(MIN_HASH_COST).expect("Minimum bcrypt cost should be accepted.")
	}

	fn info(user_id: &str, plaintext: &str) -> PasswordInfo {
		PasswordInfo {
			user_id: user_id.into(),
			password: Password::from_plaintext(&hasher(), plaintext)
				.expect("Password fixture should hash."),
			password_expires: None,
		}
	}

	#[test]
	fn unusable_passwords_are_rejected() {
		assert!(matches!(Password::from_plaintext(&hasher(), ""), Err(Error::InvalidPassword)));
		assert!(matches!(
			Password::from_plaintext(&hasher(), &"p".repeat(MAX_SECRET_LEN + 1)),
			Err(Error::InvalidPassword)
		));
	}

	#[tokio::test]
	async fn create_update_and_authenticate() {
		let clock = ManualClock::default();
		let repo = BackendPasswordInfoRepo::new(
			Arc::new(MemoryBackend::default()),
			Arc::new(clock.clone()),
		);

		repo.create(info("u1", "hunter2")).await.expect("Create should succeed.");

		assert!(matches!(repo.create(info("u1", "other")).await, Err(Error::DuplicateId)));
		assert!(matches!(repo.create(info("", "other")).await, Err(Error::InvalidId)));
		assert!(repo.authenticate("u1", "hunter2").await.expect("Authenticate should not error."));
		assert!(!repo.authenticate("u1", "hunter3").await.expect("Authenticate should not error."));
		assert!(!repo.authenticate("ghost", "hunter2").await.expect("Authenticate should not error."));

		let mut expiring = info("u1", "rotated");

		expiring.password_expires = Some(clock.now() + Duration::days(1));

		repo.update(expiring.clone()).await.expect("Update should succeed.");

		assert_eq!(repo.get("u1").await.expect("Get should succeed."), expiring);
		assert!(repo.authenticate("u1", "rotated").await.expect("Authenticate should not error."));

		clock.advance(Duration::days(1));

		assert!(!repo.authenticate("u1", "rotated").await.expect("Authenticate should not error."));
	}

	#[tokio::test]
	async fn update_validates_input() {
		let repo = BackendPasswordInfoRepo::new(
			Arc::new(MemoryBackend::default()),
			Arc::new(ManualClock::default()),
		);
		let empty = PasswordInfo {
			user_id: "u1".into(),
			password: Password::from_hash(SecretHash::from_encoded("")),
			password_expires: None,
		};

		assert!(matches!(repo.update(info("", "x")).await, Err(Error::InvalidId)));
		assert!(matches!(repo.update(empty).await, Err(Error::InvalidPassword)));
		assert!(matches!(repo.update(info("ghost", "x")).await, Err(Error::NotFound)));
		assert!(matches!(repo.get("ghost").await, Err(Error::NotFound)));
	}
}
