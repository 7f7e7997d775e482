//! Backend contract shared by every repository, plus the built-in backends.
//!
//! A backend is a set of keyed JSON tables. Reads observe committed state only, and every write is
//! a [`WriteBatch`] whose preconditions and mutations apply atomically: either the whole batch
//! lands or [`CommitOutcome::Conflict`] names the first precondition that failed. Documents may
//! carry an expiry; an expired document reads as absent on every backend, whether or not the
//! backend reclaims it natively.

pub mod file;
pub mod memory;

mod tables;

pub use file::FileBackend;
pub use memory::MemoryBackend;

// std
use std::time::Duration as StdDuration;
// crates.io
use serde::de::DeserializeOwned;
// self
use crate::_prelude::*;

/// Read-modify-write attempts before a repository reports [`StoreError::Contention`].
pub(crate) const MAX_UPDATE_ATTEMPTS: usize = 8;

/// Boxed future returned by [`Backend`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Boxed future returned by repository operations.
pub type RepoFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Storage engine contract implemented by every backend.
pub trait Backend
where
	Self: Debug + Send + Sync,
{
	/// Stable backend name.
	fn name(&self) -> &'static str;

	/// Whether expired documents are reclaimed without an external collector.
	fn native_expiry(&self) -> bool;

	/// Fetches a live document.
	fn get<'a>(&'a self, table: Table, key: &'a str) -> StoreFuture<'a, Option<Document>>;

	/// Returns every live document in `table`, ordered by key.
	fn scan(&self, table: Table) -> StoreFuture<'_, Vec<(String, Document)>>;

	/// Applies `batch` atomically.
	fn commit(&self, batch: WriteBatch) -> StoreFuture<'_, CommitOutcome>;

	/// Deletes every document whose expiry is at or before `now`, returning how many were removed.
	fn purge_expired(&self, now: OffsetDateTime) -> StoreFuture<'_, usize>;
}

/// Logical tables shared by all backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
	/// Sessions keyed by session id.
	Session,
	/// One-time session keys keyed by key.
	SessionKey,
	/// Refresh token records keyed by token id.
	RefreshToken,
	/// Client identities keyed by client id.
	ClientIdentity,
	/// Users keyed by user id.
	User,
	/// Unique email index pointing at user ids.
	UserEmail,
	/// Unique remote identity index pointing at user ids.
	RemoteIdentity,
	/// Password material keyed by user id.
	PasswordInfo,
	/// Connector configurations keyed by connector id.
	ConnectorConfig,
	/// The single encrypted signing key set.
	PrivateKeySet,
	/// Applied schema migrations keyed by version.
	Migrations,
}
impl Table {
	/// Every data table, excluding [`Table::Migrations`].
	pub const DATA: [Table; 10] = [
		Table::Session,
		Table::SessionKey,
		Table::RefreshToken,
		Table::ClientIdentity,
		Table::User,
		Table::UserEmail,
		Table::RemoteIdentity,
		Table::PasswordInfo,
		Table::ConnectorConfig,
		Table::PrivateKeySet,
	];

	/// Returns a stable label suitable for logs and errors.
	pub const fn as_str(self) -> &'static str {
		match self {
			Table::Session => "session",
			Table::SessionKey => "session_key",
			Table::RefreshToken => "refresh_token",
			Table::ClientIdentity => "client_identity",
			Table::User => "user",
			Table::UserEmail => "user_email",
			Table::RemoteIdentity => "remote_identity",
			Table::PasswordInfo => "password_info",
			Table::ConnectorConfig => "connector_config",
			Table::PrivateKeySet => "private_key_set",
			Table::Migrations => "migrations",
		}
	}

	/// Looks a table up by its [`Table::as_str`] label.
	pub fn from_name(name: &str) -> Option<Self> {
		Self::DATA.into_iter().chain([Table::Migrations]).find(|table| table.as_str() == name)
	}
}
impl Display for Table {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Stored JSON body with an optional expiry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
	/// Serialized record.
	pub body: Value,
	/// Instant at which the document stops being readable.
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub expires_at: Option<OffsetDateTime>,
}
impl Document {
	/// Serializes `value` into a non-expiring document.
	pub fn encode<T>(value: &T) -> Result<Self, StoreError>
	where
		T: Serialize,
	{
		let body = serde_json::to_value(value)
			.map_err(|e| StoreError::Serialization { message: e.to_string() })?;

		Ok(Self { body, expires_at: None })
	}

	/// Sets the expiry.
	pub fn expiring_at(mut self, expires_at: OffsetDateTime) -> Self {
		self.expires_at = Some(expires_at);

		self
	}

	/// Returns `true` once `now` has reached the expiry.
	pub fn is_expired(&self, now: OffsetDateTime) -> bool {
		self.expires_at.is_some_and(|at| at <= now)
	}

	/// Decodes the body, reporting the failing field path for corrupt documents.
	pub fn decode<T>(&self, table: Table, key: &str) -> Result<T, StoreError>
	where
		T: DeserializeOwned,
	{
		serde_path_to_error::deserialize(&self.body).map_err(|e| StoreError::Corrupt {
			table,
			key: key.to_owned(),
			message: e.to_string(),
		})
	}
}

/// Single step of a [`WriteBatch`].
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOp {
	/// Creates a document; conflicts when a live document already exists.
	Insert {
		/// Target table.
		table: Table,
		/// Document key.
		key: String,
		/// Document to store.
		document: Document,
	},
	/// Creates or replaces a document.
	Put {
		/// Target table.
		table: Table,
		/// Document key.
		key: String,
		/// Document to store.
		document: Document,
	},
	/// Deletes a document if present.
	Remove {
		/// Target table.
		table: Table,
		/// Document key.
		key: String,
	},
	/// Conflicts when a live document exists.
	ExpectAbsent {
		/// Target table.
		table: Table,
		/// Document key.
		key: String,
	},
	/// Conflicts unless a live document exists.
	ExpectPresent {
		/// Target table.
		table: Table,
		/// Document key.
		key: String,
	},
	/// Conflicts unless a live document with exactly this body exists.
	ExpectEquals {
		/// Target table.
		table: Table,
		/// Document key.
		key: String,
		/// Body the stored document must equal.
		body: Value,
	},
	/// Deletes every document in the table.
	Truncate {
		/// Target table.
		table: Table,
	},
}

/// Ordered group of writes committed atomically.
///
/// Operations see the effects of earlier operations in the same batch, so a batch may truncate a
/// table and then refill it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteBatch {
	ops: Vec<WriteOp>,
}
impl WriteBatch {
	/// Creates an empty batch.
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends an insert.
	pub fn insert(mut self, table: Table, key: impl Into<String>, document: Document) -> Self {
		self.ops.push(WriteOp::Insert { table, key: key.into(), document });

		self
	}

	/// Appends an upsert.
	pub fn put(mut self, table: Table, key: impl Into<String>, document: Document) -> Self {
		self.ops.push(WriteOp::Put { table, key: key.into(), document });

		self
	}

	/// Appends a delete.
	pub fn remove(mut self, table: Table, key: impl Into<String>) -> Self {
		self.ops.push(WriteOp::Remove { table, key: key.into() });

		self
	}

	/// Appends an absence precondition.
	pub fn expect_absent(mut self, table: Table, key: impl Into<String>) -> Self {
		self.ops.push(WriteOp::ExpectAbsent { table, key: key.into() });

		self
	}

	/// Appends a presence precondition.
	pub fn expect_present(mut self, table: Table, key: impl Into<String>) -> Self {
		self.ops.push(WriteOp::ExpectPresent { table, key: key.into() });

		self
	}

	/// Appends an equality precondition on the stored body.
	pub fn expect_equals(mut self, table: Table, key: impl Into<String>, body: Value) -> Self {
		self.ops.push(WriteOp::ExpectEquals { table, key: key.into(), body });

		self
	}

	/// Appends a table truncation.
	pub fn truncate(mut self, table: Table) -> Self {
		self.ops.push(WriteOp::Truncate { table });

		self
	}

	/// Returns `true` when the batch holds no operations.
	pub fn is_empty(&self) -> bool {
		self.ops.is_empty()
	}

	/// Borrows the queued operations.
	pub fn ops(&self) -> &[WriteOp] {
		&self.ops
	}
}

/// Result of committing a [`WriteBatch`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitOutcome {
	/// Every operation was applied.
	Committed,
	/// A precondition failed and nothing was applied.
	Conflict {
		/// Table of the failing precondition.
		table: Table,
		/// Key of the failing precondition.
		key: String,
	},
}
impl CommitOutcome {
	/// Returns the conflicting table, if any.
	pub fn conflict_table(&self) -> Option<Table> {
		match self {
			Self::Committed => None,
			Self::Conflict { table, .. } => Some(*table),
		}
	}
}

/// Error type produced by [`Backend`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// A stored document no longer matches its record shape.
	#[error("Corrupt document {table}/{key}: {message}.")]
	Corrupt {
		/// Table holding the document.
		table: Table,
		/// Document key.
		key: String,
		/// Decoder message including the failing field path.
		message: String,
	},
	/// A read-modify-write kept losing races.
	#[error("Gave up on {table}/{key} after repeated concurrent modification.")]
	Contention {
		/// Contended table.
		table: Table,
		/// Contended key.
		key: String,
	},
	/// The operation did not finish before its deadline.
	#[error("Deadline of {millis} ms exceeded.")]
	DeadlineExceeded {
		/// Deadline in milliseconds.
		millis: u64,
	},
}

/// Bounds a repository future by `deadline`.
///
/// Batches commit atomically, so an abandoned operation never leaves partial state behind.
pub async fn with_deadline<T, F>(deadline: StdDuration, fut: F) -> Result<T>
where
	F: Future<Output = Result<T>>,
{
	match tokio::time::timeout(deadline, fut).await {
		Ok(result) => result,
		Err(_) => Err(StoreError::DeadlineExceeded {
			millis: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
		}
		.into()),
	}
}

/// Fetches and decodes a live document, keeping the raw document for conditional writes.
pub(crate) async fn load<T>(
	backend: &dyn Backend,
	table: Table,
	key: &str,
) -> Result<Option<(Document, T)>>
where
	T: DeserializeOwned,
{
	let Some(document) = backend.get(table, key).await? else {
		return Ok(None);
	};
	let value = document.decode(table, key)?;

	Ok(Some((document, value)))
}

/// Decodes every live document in `table`.
pub(crate) async fn load_all<T>(backend: &dyn Backend, table: Table) -> Result<Vec<T>>
where
	T: DeserializeOwned,
{
	let mut values = Vec::new();

	for (key, document) in backend.scan(table).await? {
		values.push(document.decode(table, &key)?);
	}

	Ok(values)
}
