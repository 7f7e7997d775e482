//! Users, their linked remote identities, and paginated listing.
//!
//! Email addresses and remote identities are unique across users. Each is backed by an index table
//! written in the same batch as the user document, so a lost race surfaces as a commit conflict
//! rather than a duplicate. Creation and email changes are additionally serialized per address
//! inside the process.

pub mod page;
pub mod password;

pub use page::PageCursor;
pub use password::{BackendPasswordInfoRepo, Password, PasswordInfo, PasswordInfoRepo};

// std
use std::sync::LazyLock;
// crates.io
use regex::Regex;
// self
use crate::{
	_prelude::*,
	obs::{self, RepoKind},
	store::{self, Backend, CommitOutcome, Document, RepoFuture, StoreError, Table, WriteBatch},
};

static EMAIL_PATTERN: LazyLock<Option<Regex>> =
	LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

/// Local user account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
	/// Caller-assigned identifier.
	pub id: String,
	/// Unique email address.
	pub email: String,
	/// Whether the address has been verified.
	#[serde(default)]
	pub email_verified: bool,
	/// Name shown in UIs.
	#[serde(default)]
	pub display_name: String,
	/// Whether the user may administer the provider.
	#[serde(default)]
	pub admin: bool,
	/// Whether logins are refused.
	#[serde(default)]
	pub disabled: bool,
	/// Creation instant; listings are ordered by it.
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}
impl User {
	/// Creates an enabled, unverified, non-admin user.
	pub fn new(id: impl Into<String>, email: impl Into<String>, created_at: OffsetDateTime) -> Self {
		Self {
			id: id.into(),
			email: email.into(),
			email_verified: false,
			display_name: String::new(),
			admin: false,
			disabled: false,
			created_at,
		}
	}
}

/// Account at an upstream identity provider.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteIdentity {
	/// Connector that vouches for the account.
	pub connector_id: String,
	/// Account id at the connector.
	pub id: String,
}
impl RemoteIdentity {
	/// Creates a remote identity.
	pub fn new(connector_id: impl Into<String>, id: impl Into<String>) -> Self {
		Self { connector_id: connector_id.into(), id: id.into() }
	}

	fn is_valid(&self) -> bool {
		!self.connector_id.is_empty() && !self.id.is_empty()
	}

	fn index_key(&self) -> String {
		format!("{}\u{0}{}", self.connector_id, self.id)
	}
}

/// User together with its remote identities; also the stored shape of a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserWithRemoteIdentities {
	/// The user.
	#[serde(flatten)]
	pub user: User,
	/// Linked remote identities.
	#[serde(default)]
	pub remote_identities: Vec<RemoteIdentity>,
}

/// Listing filter; `None` fields match everything.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFilter {
	/// Match only admins (`true`) or non-admins (`false`).
	pub admin: Option<bool>,
	/// Match only disabled (`true`) or enabled (`false`) users.
	pub disabled: Option<bool>,
}
impl UserFilter {
	/// Returns `true` when `user` passes the filter.
	pub fn matches(&self, user: &User) -> bool {
		self.admin.is_none_or(|admin| user.admin == admin)
			&& self.disabled.is_none_or(|disabled| user.disabled == disabled)
	}
}

/// One page of a user listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserPage {
	/// Users in `(created_at, id)` order.
	pub users: Vec<User>,
	/// Token for the next page, when more users remain.
	pub next_page_token: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct IndexEntry {
	user_id: String,
}

/// Per-address async locks serializing uniqueness checks within one process.
#[derive(Debug, Default)]
pub(crate) struct EmailGuards(Mutex<HashMap<String, Arc<AsyncMutex<()>>>>);
impl EmailGuards {
	fn acquire(&self, email: &str) -> Arc<AsyncMutex<()>> {
		self.0.lock().entry(email.to_owned()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}

	fn release(&self, email: &str, guard: Arc<AsyncMutex<()>>) {
		let mut guards = self.0.lock();

		// One reference held here, one by the map: nobody else is waiting.
		if Arc::strong_count(&guard) == 2 {
			guards.remove(email);
		}
	}
}

/// User persistence contract.
pub trait UserRepo
where
	Self: Send + Sync,
{
	/// Fetches a user by id.
	fn get<'a>(&'a self, id: &'a str) -> RepoFuture<'a, User>;

	/// Stores a new user.
	fn create(&self, user: User) -> RepoFuture<'_, ()>;

	/// Replaces an existing user, keeping its remote identities.
	fn update(&self, user: User) -> RepoFuture<'_, ()>;

	/// Sets or clears the disabled flag.
	fn disable<'a>(&'a self, id: &'a str, disabled: bool) -> RepoFuture<'a, ()>;

	/// Fetches the user owning `email`.
	fn get_by_email<'a>(&'a self, email: &'a str) -> RepoFuture<'a, User>;

	/// Fetches the user linked to `identity`.
	fn get_by_remote_identity<'a>(&'a self, identity: &'a RemoteIdentity) -> RepoFuture<'a, User>;

	/// Links `identity` to the user.
	fn add_remote_identity<'a>(
		&'a self,
		user_id: &'a str,
		identity: RemoteIdentity,
	) -> RepoFuture<'a, ()>;

	/// Unlinks `identity` from the user.
	fn remove_remote_identity<'a>(
		&'a self,
		user_id: &'a str,
		identity: &'a RemoteIdentity,
	) -> RepoFuture<'a, ()>;

	/// Lists the identities linked to the user.
	fn get_remote_identities<'a>(&'a self, user_id: &'a str) -> RepoFuture<'a, Vec<RemoteIdentity>>;

	/// Returns one page of users.
	///
	/// With a `page_token`, the filter and page size recorded in the token replace the arguments.
	fn list<'a>(
		&'a self,
		filter: UserFilter,
		max_results: usize,
		page_token: Option<&'a str>,
	) -> RepoFuture<'a, UserPage>;

	/// Counts users with the admin flag.
	fn get_admin_count(&self) -> RepoFuture<'_, usize>;
}

/// [`UserRepo`] over any [`Backend`].
#[derive(Clone, Debug)]
pub struct BackendUserRepo {
	backend: Arc<dyn Backend>,
	guards: Arc<EmailGuards>,
}
impl BackendUserRepo {
	/// Creates a repository with its own email guards.
	pub fn new(backend: Arc<dyn Backend>) -> Self {
		Self::with_guards(backend, Default::default())
	}

	pub(crate) fn with_guards(backend: Arc<dyn Backend>, guards: Arc<EmailGuards>) -> Self {
		Self { backend, guards }
	}

	/// Creates each user with its remote identities, failing on the first conflict.
	pub async fn seed(&self, users: Vec<UserWithRemoteIdentities>) -> Result<()> {
		for entry in users {
			self.insert(entry.user, entry.remote_identities).await?;
		}

		Ok(())
	}

	async fn find(&self, id: &str) -> Result<Option<(Document, UserWithRemoteIdentities)>> {
		store::load(&*self.backend, Table::User, id).await
	}

	async fn owner(&self, table: Table, key: &str) -> Result<Option<(Document, IndexEntry)>> {
		store::load(&*self.backend, table, key).await
	}

	async fn find_by_index(&self, table: Table, key: &str) -> Result<User> {
		let (_, entry) = self.owner(table, key).await?.ok_or(Error::NotFound)?;
		let (_, stored) = self.find(&entry.user_id).await?.ok_or(Error::NotFound)?;

		Ok(stored.user)
	}

	async fn with_email_guard<T, Fut>(&self, email: &str, fut: Fut) -> Result<T>
	where
		Fut: Future<Output = Result<T>>,
	{
		let guard = self.guards.acquire(email);
		let result = {
			let _singleflight = guard.lock().await;

			fut.await
		};

		self.guards.release(email, guard);

		result
	}

	async fn insert(&self, user: User, remote_identities: Vec<RemoteIdentity>) -> Result<()> {
		if user.id.is_empty() {
			return Err(Error::InvalidId);
		}
		if self.find(&user.id).await?.is_some() {
			return Err(Error::DuplicateId);
		}
		if !is_valid_email(&user.email) {
			return Err(Error::InvalidEmail);
		}
		if remote_identities.iter().any(|identity| !identity.is_valid()) {
			return Err(Error::InvalidId);
		}

		let email = user.email.clone();

		self.with_email_guard(&email, async {
			if self.owner(Table::UserEmail, &email).await?.is_some() {
				return Err(Error::DuplicateEmail);
			}

			let entry = Document::encode(&IndexEntry { user_id: user.id.clone() })?;
			let mut batch = WriteBatch::new().insert(Table::UserEmail, email.clone(), entry.clone());

			for identity in &remote_identities {
				batch = batch.insert(Table::RemoteIdentity, identity.index_key(), entry.clone());
			}

			let id = user.id.clone();
			let stored = UserWithRemoteIdentities { user, remote_identities };
			let batch = batch.insert(Table::User, id, Document::encode(&stored)?);

			match self.backend.commit(batch).await?.conflict_table() {
				None => Ok(()),
				Some(Table::UserEmail) => Err(Error::DuplicateEmail),
				Some(Table::RemoteIdentity) => Err(Error::DuplicateRemoteIdentity),
				Some(_) => Err(Error::DuplicateId),
			}
		})
		.await
	}

	async fn replace(&self, user: User) -> Result<()> {
		let id = user.id.clone();

		for _ in 0..store::MAX_UPDATE_ATTEMPTS {
			let (document, stored) = self.find(&id).await?.ok_or(Error::NotFound)?;
			let previous_email = stored.user.email.clone();
			let mut batch = WriteBatch::new().expect_equals(Table::User, id.clone(), document.body);

			if previous_email != user.email {
				if self
					.owner(Table::UserEmail, &user.email)
					.await?
					.is_some_and(|(_, entry)| entry.user_id != id)
				{
					return Err(Error::DuplicateEmail);
				}

				let entry = Document::encode(&IndexEntry { user_id: id.clone() })?;

				batch = batch
					.remove(Table::UserEmail, previous_email)
					.insert(Table::UserEmail, user.email.clone(), entry);
			}

			let updated =
				UserWithRemoteIdentities { user: user.clone(), remote_identities: stored.remote_identities };

			batch = batch.put(Table::User, id.clone(), Document::encode(&updated)?);

			match self.backend.commit(batch).await?.conflict_table() {
				None => return Ok(()),
				Some(Table::UserEmail) => return Err(Error::DuplicateEmail),
				Some(_) => continue,
			}
		}

		Err(StoreError::Contention { table: Table::User, key: id }.into())
	}
}
impl UserRepo for BackendUserRepo {
	fn get<'a>(&'a self, id: &'a str) -> RepoFuture<'a, User> {
		obs::observe(RepoKind::User, "get", async move {
			let (_, stored) = self.find(id).await?.ok_or(Error::NotFound)?;

			Ok(stored.user)
		})
	}

	fn create(&self, user: User) -> RepoFuture<'_, ()> {
		obs::observe(RepoKind::User, "create", async move { self.insert(user, Vec::new()).await })
	}

	fn update(&self, user: User) -> RepoFuture<'_, ()> {
		obs::observe(RepoKind::User, "update", async move {
			if user.id.is_empty() {
				return Err(Error::InvalidId);
			}
			if !is_valid_email(&user.email) {
				return Err(Error::InvalidEmail);
			}

			let email = user.email.clone();

			self.with_email_guard(&email, self.replace(user)).await
		})
	}

	fn disable<'a>(&'a self, id: &'a str, disabled: bool) -> RepoFuture<'a, ()> {
		obs::observe(RepoKind::User, "disable", async move {
			if id.is_empty() {
				return Err(Error::InvalidId);
			}

			for _ in 0..store::MAX_UPDATE_ATTEMPTS {
				let (document, mut stored) = self.find(id).await?.ok_or(Error::NotFound)?;

				stored.user.disabled = disabled;

				let batch = WriteBatch::new()
					.expect_equals(Table::User, id, document.body)
					.put(Table::User, id, Document::encode(&stored)?);

				if self.backend.commit(batch).await? == CommitOutcome::Committed {
					return Ok(());
				}
			}

			Err(StoreError::Contention { table: Table::User, key: id.to_owned() }.into())
		})
	}

	fn get_by_email<'a>(&'a self, email: &'a str) -> RepoFuture<'a, User> {
		obs::observe(RepoKind::User, "get_by_email", async move {
			self.find_by_index(Table::UserEmail, email).await
		})
	}

	fn get_by_remote_identity<'a>(&'a self, identity: &'a RemoteIdentity) -> RepoFuture<'a, User> {
		obs::observe(RepoKind::User, "get_by_remote_identity", async move {
			self.find_by_index(Table::RemoteIdentity, &identity.index_key()).await
		})
	}

	fn add_remote_identity<'a>(
		&'a self,
		user_id: &'a str,
		identity: RemoteIdentity,
	) -> RepoFuture<'a, ()> {
		obs::observe(RepoKind::User, "add_remote_identity", async move {
			if user_id.is_empty() || !identity.is_valid() {
				return Err(Error::InvalidId);
			}

			let index_key = identity.index_key();

			if self.owner(Table::RemoteIdentity, &index_key).await?.is_some() {
				return Err(Error::DuplicateRemoteIdentity);
			}

			let entry = Document::encode(&IndexEntry { user_id: user_id.to_owned() })?;

			for _ in 0..store::MAX_UPDATE_ATTEMPTS {
				let (document, mut stored) = self.find(user_id).await?.ok_or(Error::NotFound)?;

				stored.remote_identities.push(identity.clone());

				let batch = WriteBatch::new()
					.insert(Table::RemoteIdentity, index_key.clone(), entry.clone())
					.expect_equals(Table::User, user_id, document.body)
					.put(Table::User, user_id, Document::encode(&stored)?);

				match self.backend.commit(batch).await?.conflict_table() {
					None => return Ok(()),
					Some(Table::RemoteIdentity) => return Err(Error::DuplicateRemoteIdentity),
					Some(_) => continue,
				}
			}

			Err(StoreError::Contention { table: Table::User, key: user_id.to_owned() }.into())
		})
	}

	fn remove_remote_identity<'a>(
		&'a self,
		user_id: &'a str,
		identity: &'a RemoteIdentity,
	) -> RepoFuture<'a, ()> {
		obs::observe(RepoKind::User, "remove_remote_identity", async move {
			if user_id.is_empty() || !identity.is_valid() {
				return Err(Error::InvalidId);
			}

			let index_key = identity.index_key();

			for _ in 0..store::MAX_UPDATE_ATTEMPTS {
				let Some((index, entry)) = self.owner(Table::RemoteIdentity, &index_key).await? else {
					return Err(Error::NotFound);
				};

				if entry.user_id != user_id {
					return Err(Error::NotFound);
				}

				let (document, mut stored) = self.find(user_id).await?.ok_or(Error::NotFound)?;

				stored.remote_identities.retain(|linked| linked != identity);

				let batch = WriteBatch::new()
					.expect_equals(Table::RemoteIdentity, index_key.clone(), index.body)
					.remove(Table::RemoteIdentity, index_key.clone())
					.expect_equals(Table::User, user_id, document.body)
					.put(Table::User, user_id, Document::encode(&stored)?);

				if self.backend.commit(batch).await? == CommitOutcome::Committed {
					return Ok(());
				}
			}

			Err(StoreError::Contention { table: Table::User, key: user_id.to_owned() }.into())
		})
	}

	fn get_remote_identities<'a>(&'a self, user_id: &'a str) -> RepoFuture<'a, Vec<RemoteIdentity>> {
		obs::observe(RepoKind::User, "get_remote_identities", async move {
			let (_, stored) = self.find(user_id).await?.ok_or(Error::NotFound)?;

			Ok(stored.remote_identities)
		})
	}

	fn list<'a>(
		&'a self,
		filter: UserFilter,
		max_results: usize,
		page_token: Option<&'a str>,
	) -> RepoFuture<'a, UserPage> {
		obs::observe(RepoKind::User, "list", async move {
			let cursor = match page_token {
				Some(token) => PageCursor::decode(token)?,
				None if max_results == 0 => return Err(Error::invalid_request("max_results is zero")),
				None => PageCursor { filter, max_results, offset: 0 },
			};
			let mut users = store::load_all::<UserWithRemoteIdentities>(&*self.backend, Table::User)
				.await?
				.into_iter()
				.map(|stored| stored.user)
				.filter(|user| cursor.filter.matches(user))
				.collect::<Vec<_>>();

			users.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

			let mut users = users
				.into_iter()
				.skip(cursor.offset)
				.take(cursor.max_results.saturating_add(1))
				.collect::<Vec<_>>();

			if users.is_empty() {
				return Err(Error::NotFound);
			}

			let next_page_token = if users.len() > cursor.max_results {
				users.truncate(cursor.max_results);

				Some(
					PageCursor { offset: cursor.offset + cursor.max_results, ..cursor }
						.encode()?,
				)
			} else {
				None
			};

			Ok(UserPage { users, next_page_token })
		})
	}

	fn get_admin_count(&self) -> RepoFuture<'_, usize> {
		obs::observe(RepoKind::User, "get_admin_count", async move {
			let users =
				store::load_all::<UserWithRemoteIdentities>(&*self.backend, Table::User).await?;

			Ok(users.iter().filter(|stored| stored.user.admin).count())
		})
	}
}

/// Appends puts that rebuild the email and remote identity indexes from stored users.
pub(crate) async fn reindex(backend: &dyn Backend, mut batch: WriteBatch) -> Result<WriteBatch> {
	for stored in store::load_all::<UserWithRemoteIdentities>(backend, Table::User).await? {
		let entry = Document::encode(&IndexEntry { user_id: stored.user.id.clone() })?;

		for identity in &stored.remote_identities {
			batch = batch.put(Table::RemoteIdentity, identity.index_key(), entry.clone());
		}

		batch = batch.put(Table::UserEmail, stored.user.email, entry);
	}

	Ok(batch)
}

fn is_valid_email(email: &str) -> bool {
	EMAIL_PATTERN.as_ref().is_some_and(|re| re.is_match(email))
}
