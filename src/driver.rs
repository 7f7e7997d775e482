//! Driver facade that owns one backend and constructs every repository over it.
//!
//! All repositories built by one [`Driver`] share its backend handle, its [`IdGenerator`], its
//! bcrypt settings, and the per-email guards that serialize user uniqueness checks.

pub mod gc;

pub use gc::{GarbageCollector, GarbageCollectorHandle};

// std
use std::{path::PathBuf, time::Duration as StdDuration};
// self
use crate::{
	_prelude::*,
	client::{BackendClientIdentityRepo, ClientSeed},
	clock::{Clock, SystemClock},
	config::{BackendConfig, StoreConfig},
	connector::BackendConnectorConfigRepo,
	crypto::SecretHasher,
	id::IdGenerator,
	key::BackendPrivateKeySetRepo,
	obs::{self, RepoKind},
	refresh::BackendRefreshTokenRepo,
	session::{BackendSessionKeyRepo, BackendSessionRepo},
	store::{
		Backend, CommitOutcome, Document, FileBackend, MemoryBackend, StoreError, Table, WriteBatch,
	},
	user::{self, BackendPasswordInfoRepo, BackendUserRepo, EmailGuards, UserWithRemoteIdentities},
};

/// Schema migrations in application order.
const MIGRATIONS: [Migration; 2] = [
	Migration { version: 1, name: "create_tables" },
	Migration { version: 2, name: "backfill_user_indexes" },
];

#[derive(Clone, Copy, Debug)]
struct Migration {
	version: u32,
	name: &'static str,
}
impl Migration {
	fn key(self) -> String {
		format!("{:04}", self.version)
	}
}

#[derive(Debug, Serialize, Deserialize)]
struct MigrationRecord {
	version: u32,
	name: String,
	#[serde(with = "time::serde::rfc3339")]
	applied_at: OffsetDateTime,
}

/// Owns a backend and hands out repositories bound to it.
#[derive(Clone, Debug)]
pub struct Driver {
	backend: Arc<dyn Backend>,
	ids: Arc<IdGenerator>,
	config: StoreConfig,
	hasher: SecretHasher,
	email_guards: Arc<EmailGuards>,
}
impl Driver {
	/// Wraps `backend` with the default [`StoreConfig`].
	pub fn new(backend: Arc<dyn Backend>) -> Self {
		Self {
			backend,
			ids: Default::default(),
			config: StoreConfig::default(),
			hasher: SecretHasher::default(),
			email_guards: Default::default(),
		}
	}

	/// Driver over a fresh [`MemoryBackend`].
	pub fn memory() -> Self {
		Self::new(Arc::new(MemoryBackend::default()))
	}

	/// Driver over a [`FileBackend`] snapshot at `path`.
	pub fn file(path: impl Into<PathBuf>) -> Result<Self> {
		Ok(Self::new(Arc::new(FileBackend::open(path)?)))
	}

	/// Opens the backend described by `backend` and applies `config`.
	pub fn from_config(backend: &BackendConfig, config: StoreConfig) -> Result<Self> {
		Self::new(backend.open()?).with_config(config)
	}

	/// Replaces the store settings after validating them.
	pub fn with_config(mut self, config: StoreConfig) -> Result<Self> {
		self.hasher = config.validate()?;
		self.config = config;

		Ok(self)
	}

	/// Name of the underlying backend.
	pub fn name(&self) -> &'static str {
		self.backend.name()
	}

	/// Whether expired documents linger until a [`GarbageCollector`] purges them.
	///
	/// Reads never return expired documents either way.
	pub fn needs_garbage_collection(&self) -> bool {
		!self.backend.native_expiry()
	}

	/// Shared backend handle.
	pub fn backend(&self) -> &Arc<dyn Backend> {
		&self.backend
	}

	/// Active store settings.
	pub fn config(&self) -> &StoreConfig {
		&self.config
	}

	/// Session repository using the wall clock.
	pub fn new_session_repo(&self) -> BackendSessionRepo {
		self.new_session_repo_with_clock(Arc::new(SystemClock))
	}

	/// Session repository reading expiry from `clock`.
	pub fn new_session_repo_with_clock(&self, clock: Arc<dyn Clock>) -> BackendSessionRepo {
		BackendSessionRepo::new(self.backend.clone(), clock)
	}

	/// Session key repository using the wall clock.
	pub fn new_session_key_repo(&self) -> BackendSessionKeyRepo {
		self.new_session_key_repo_with_clock(Arc::new(SystemClock))
	}

	/// Session key repository reading expiry from `clock`.
	pub fn new_session_key_repo_with_clock(&self, clock: Arc<dyn Clock>) -> BackendSessionKeyRepo {
		BackendSessionKeyRepo::new(self.backend.clone(), clock)
	}

	/// Refresh token repository sharing this driver's id generator.
	pub fn new_refresh_token_repo(&self) -> BackendRefreshTokenRepo {
		BackendRefreshTokenRepo::new(
			self.backend.clone(),
			self.ids.clone(),
			self.hasher,
			self.config.refresh_payload_len,
		)
	}

	/// Client identity repository.
	pub fn new_client_identity_repo(&self) -> BackendClientIdentityRepo {
		BackendClientIdentityRepo::new(self.backend.clone(), self.hasher)
	}

	/// Client identity repository pre-populated with `clients`.
	pub async fn new_client_identity_repo_from_clients(
		&self,
		clients: Vec<ClientSeed>,
	) -> Result<BackendClientIdentityRepo> {
		let repo = self.new_client_identity_repo();

		repo.seed(clients).await?;

		Ok(repo)
	}

	/// User repository sharing this driver's email guards.
	pub fn new_user_repo(&self) -> BackendUserRepo {
		BackendUserRepo::with_guards(self.backend.clone(), self.email_guards.clone())
	}

	/// User repository pre-populated with `users`.
	pub async fn new_user_repo_from_users(
		&self,
		users: Vec<UserWithRemoteIdentities>,
	) -> Result<BackendUserRepo> {
		let repo = self.new_user_repo();

		repo.seed(users).await?;

		Ok(repo)
	}

	/// Password repository using the wall clock.
	pub fn new_password_info_repo(&self) -> BackendPasswordInfoRepo {
		self.new_password_info_repo_with_clock(Arc::new(SystemClock))
	}

	/// Password repository reading expiry from `clock`.
	pub fn new_password_info_repo_with_clock(
		&self,
		clock: Arc<dyn Clock>,
	) -> BackendPasswordInfoRepo {
		BackendPasswordInfoRepo::new(self.backend.clone(), clock)
	}

	/// Connector configuration repository.
	pub fn new_connector_config_repo(&self) -> BackendConnectorConfigRepo {
		BackendConnectorConfigRepo::new(self.backend.clone())
	}

	/// Signing key repository sealing under `secrets[0]` and opening with any of `secrets`.
	pub fn new_private_key_set_repo<I, S>(
		&self,
		use_old_format: bool,
		secrets: I,
	) -> Result<BackendPrivateKeySetRepo>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<[u8]>,
	{
		Ok(BackendPrivateKeySetRepo::new(self.backend.clone(), use_old_format, secrets)?)
	}

	/// Starts an empty batch for callers composing their own atomic writes.
	pub fn transaction(&self) -> WriteBatch {
		WriteBatch::new()
	}

	/// Commits a batch built with [`Driver::transaction`].
	pub async fn commit(&self, batch: WriteBatch) -> Result<CommitOutcome> {
		Ok(self.backend.commit(batch).await?)
	}

	/// Clears every data table, leaving the migration history in place.
	pub async fn drop_tables_if_exists(&self) -> Result<()> {
		obs::observe(RepoKind::Driver, "drop_tables_if_exists", async move {
			let batch =
				Table::DATA.into_iter().fold(WriteBatch::new(), |batch, table| batch.truncate(table));

			self.backend.commit(batch).await?;

			Ok(())
		})
		.await
	}

	/// Forgets which migrations have been applied.
	pub async fn drop_migrations_table(&self) -> Result<()> {
		obs::observe(RepoKind::Driver, "drop_migrations_table", async move {
			self.backend.commit(WriteBatch::new().truncate(Table::Migrations)).await?;

			Ok(())
		})
		.await
	}

	/// Applies every pending migration and returns how many ran.
	///
	/// Each migration commits together with its history record, so concurrent callers apply it
	/// at most once between them.
	pub async fn migrate_to_latest(&self) -> Result<usize> {
		obs::observe(RepoKind::Driver, "migrate_to_latest", async move {
			let mut applied = 0;

			for migration in MIGRATIONS {
				let key = migration.key();

				if self.backend.get(Table::Migrations, &key).await?.is_some() {
					continue;
				}

				let record = MigrationRecord {
					version: migration.version,
					name: migration.name.to_owned(),
					applied_at: OffsetDateTime::now_utc(),
				};
				let batch = self
					.plan(migration)
					.await?
					.insert(Table::Migrations, key, Document::encode(&record)?);

				if self.backend.commit(batch).await? == CommitOutcome::Committed {
					applied += 1;
				}
			}

			if applied > 0 {
				obs::log_migrations(self.name(), applied);
			}

			Ok(applied)
		})
		.await
	}

	/// Collector purging expired documents every `interval`.
	pub fn new_garbage_collector(&self, interval: StdDuration) -> GarbageCollector {
		GarbageCollector::new(self.backend.clone(), interval)
	}

	async fn plan(&self, migration: Migration) -> Result<WriteBatch> {
		match migration.name {
			"backfill_user_indexes" => user::reindex(&*self.backend, WriteBatch::new()).await,
			"create_tables" => Ok(WriteBatch::new()),
			other => Err(StoreError::Backend { message: format!("Unknown migration {other}.") }.into()),
		}
	}
}
