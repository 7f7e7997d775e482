//! Registered client applications and their hashed secrets.

// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE};
// self
use crate::{
	_prelude::*,
	crypto::{self, MAX_SECRET_LEN, SecretHash, SecretHasher},
	error::ConfigError,
	obs::{self, RepoKind},
	store::{self, Backend, CommitOutcome, Document, RepoFuture, StoreError, Table, WriteBatch},
};

/// Client registration metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
	/// Redirect URLs the client may use.
	#[serde(rename = "redirectURLs", default)]
	pub redirect_urls: Vec<Url>,
	/// Human-readable client name.
	#[serde(rename = "clientName", default, skip_serializing_if = "Option::is_none")]
	pub client_name: Option<String>,
}

/// Client id and plaintext secret, as handed to the client once.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredentials {
	/// Client identifier.
	pub id: String,
	/// Base64url-encoded secret.
	pub secret: String,
}
impl Debug for ClientCredentials {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ClientCredentials")
			.field("id", &self.id)
			.field("secret", &"<redacted>")
			.finish()
	}
}

/// Stored client, without secret material.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientIdentity {
	/// Client identifier.
	pub id: String,
	/// Registration metadata.
	pub metadata: ClientMetadata,
	/// Whether the client may use administrative APIs.
	pub dex_admin: bool,
}

/// Client supplied with a known secret, used to seed a repository.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSeed {
	/// Id and base64url-encoded secret.
	pub credentials: ClientCredentials,
	/// Registration metadata.
	pub metadata: ClientMetadata,
	/// Whether the client may use administrative APIs.
	#[serde(default)]
	pub dex_admin: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ClientRecord {
	id: String,
	secret_hash: SecretHash,
	metadata: ClientMetadata,
	dex_admin: bool,
}
impl From<ClientRecord> for ClientIdentity {
	fn from(record: ClientRecord) -> Self {
		Self { id: record.id, metadata: record.metadata, dex_admin: record.dex_admin }
	}
}

/// Client identity persistence contract.
pub trait ClientIdentityRepo
where
	Self: Send + Sync,
{
	/// Registers a client with a freshly generated secret.
	///
	/// The plaintext secret is only ever returned here.
	fn create(&self, id: String, metadata: ClientMetadata) -> RepoFuture<'_, ClientCredentials>;

	/// Checks a client secret, failing closed.
	///
	/// Unknown clients and undecodable, over-long, or wrong secrets all yield `false`; only
	/// storage failures are errors.
	fn authenticate<'a>(&'a self, credentials: &'a ClientCredentials) -> RepoFuture<'a, bool>;

	/// Returns the client's metadata.
	fn metadata<'a>(&'a self, id: &'a str) -> RepoFuture<'a, ClientMetadata>;

	/// Reports whether the client is an administrator.
	fn is_dex_admin<'a>(&'a self, id: &'a str) -> RepoFuture<'a, bool>;

	/// Grants or revokes the administrator flag.
	fn set_dex_admin<'a>(&'a self, id: &'a str, admin: bool) -> RepoFuture<'a, ()>;

	/// Lists every client.
	fn all(&self) -> RepoFuture<'_, Vec<ClientIdentity>>;
}

/// [`ClientIdentityRepo`] over any [`Backend`].
#[derive(Clone, Debug)]
pub struct BackendClientIdentityRepo {
	backend: Arc<dyn Backend>,
	hasher: SecretHasher,
}
impl BackendClientIdentityRepo {
	/// Creates a repository hashing secrets with `hasher`.
	pub fn new(backend: Arc<dyn Backend>, hasher: SecretHasher) -> Self {
		Self { backend, hasher }
	}

	/// Stores each seed with its supplied secret, failing on the first duplicate id.
	pub async fn seed(&self, clients: Vec<ClientSeed>) -> Result<()> {
		for client in clients {
			let ClientSeed { credentials, metadata, dex_admin } = client;
			let secret = URL_SAFE.decode(&credentials.secret).map_err(|_| {
				ConfigError::UndecodableClientSecret { client_id: credentials.id.clone() }
			})?;

			self.insert(credentials.id, &secret, metadata, dex_admin).await?;
		}

		Ok(())
	}

	async fn insert(
		&self,
		id: String,
		secret: &[u8],
		metadata: ClientMetadata,
		dex_admin: bool,
	) -> Result<()> {
		if id.is_empty() {
			return Err(Error::InvalidId);
		}

		let record = ClientRecord { secret_hash: self.hasher.hash(secret)?, id, metadata, dex_admin };
		let batch = WriteBatch::new().insert(
			Table::ClientIdentity,
			record.id.clone(),
			Document::encode(&record)?,
		);

		match self.backend.commit(batch).await? {
			CommitOutcome::Committed => Ok(()),
			CommitOutcome::Conflict { .. } => Err(Error::DuplicateId),
		}
	}

	async fn record(&self, id: &str) -> Result<Option<(Document, ClientRecord)>> {
		store::load(&*self.backend, Table::ClientIdentity, id).await
	}
}
impl ClientIdentityRepo for BackendClientIdentityRepo {
	fn create(&self, id: String, metadata: ClientMetadata) -> RepoFuture<'_, ClientCredentials> {
		obs::observe(RepoKind::ClientIdentity, "create", async move {
			let secret = crypto::random_bytes(MAX_SECRET_LEN);

			self.insert(id.clone(), &secret, metadata, false).await?;

			Ok(ClientCredentials { id, secret: URL_SAFE.encode(secret) })
		})
	}

	fn authenticate<'a>(&'a self, credentials: &'a ClientCredentials) -> RepoFuture<'a, bool> {
		obs::observe(RepoKind::ClientIdentity, "authenticate", async move {
			let Some((_, record)) = self.record(&credentials.id).await? else {
				return Ok(false);
			};
			let Ok(secret) = URL_SAFE.decode(&credentials.secret) else {
				return Ok(false);
			};

			Ok(record.secret_hash.matches(&secret))
		})
	}

	fn metadata<'a>(&'a self, id: &'a str) -> RepoFuture<'a, ClientMetadata> {
		obs::observe(RepoKind::ClientIdentity, "metadata", async move {
			let (_, record) = self.record(id).await?.ok_or(Error::NotFound)?;

			Ok(record.metadata)
		})
	}

	fn is_dex_admin<'a>(&'a self, id: &'a str) -> RepoFuture<'a, bool> {
		obs::observe(RepoKind::ClientIdentity, "is_dex_admin", async move {
			let (_, record) = self.record(id).await?.ok_or(Error::NotFound)?;

			Ok(record.dex_admin)
		})
	}

	fn set_dex_admin<'a>(&'a self, id: &'a str, admin: bool) -> RepoFuture<'a, ()> {
		obs::observe(RepoKind::ClientIdentity, "set_dex_admin", async move {
			for _ in 0..store::MAX_UPDATE_ATTEMPTS {
				let (document, record) = self.record(id).await?.ok_or(Error::NotFound)?;
				let updated = ClientRecord { dex_admin: admin, ..record };
				let batch = WriteBatch::new()
					.expect_equals(Table::ClientIdentity, id, document.body)
					.put(Table::ClientIdentity, id, Document::encode(&updated)?);

				if self.backend.commit(batch).await? == CommitOutcome::Committed {
					return Ok(());
				}
			}

			Err(StoreError::Contention { table: Table::ClientIdentity, key: id.to_owned() }.into())
		})
	}

	fn all(&self) -> RepoFuture<'_, Vec<ClientIdentity>> {
		obs::observe(RepoKind::ClientIdentity, "all", async move {
			let records = store::load_all::<ClientRecord>(&*self.backend, Table::ClientIdentity).await?;

			Ok(records.into_iter().map(ClientIdentity::from).collect())
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{crypto::MIN_HASH_COST, store::MemoryBackend};

	fn repo() -> BackendClientIdentityRepo {
		BackendClientIdentityRepo::new(
			Arc::new(MemoryBackend::default()),
			SecretHasher::new(MIN_HASH_COST).expect("Minimum bcrypt cost should be accepted."),
		)
	}

	fn metadata() -> ClientMetadata {
		ClientMetadata {
			redirect_urls: vec![
				Url::parse("https://app.example.com/cb").expect("Redirect fixture should parse."),
			],
			client_name: None,
		}
	}

	#[tokio::test]
	async fn create_then_authenticate() {
		let repo = repo();
		let credentials =
			repo.create("app".into(), metadata()).await.expect("Client creation should succeed.");

		assert!(repo.authenticate(&credentials).await.expect("Authenticate should not error."));
		assert!(matches!(repo.create("app".into(), metadata()).await, Err(Error::DuplicateId)));
		assert!(matches!(repo.create(String::new(), metadata()).await, Err(Error::InvalidId)));
		assert_eq!(repo.metadata("app").await.expect("Metadata should load."), metadata());
	}

	#[tokio::test]
	async fn authentication_fails_closed() {
		let repo = repo();
		let credentials =
			repo.create("app".into(), metadata()).await.expect("Client creation should succeed.");
		let mut decoded =
			URL_SAFE.decode(&credentials.secret).expect("Generated secret should decode.");

		decoded.push(b'x');

		for candidate in [
			ClientCredentials { id: "app".into(), secret: URL_SAFE.encode(&decoded) },
			ClientCredentials { id: "app".into(), secret: "not base64 ***".into() },
			ClientCredentials { id: "app".into(), secret: URL_SAFE.encode(b"wrong") },
			ClientCredentials { id: "ghost".into(), secret: credentials.secret.clone() },
		] {
			assert!(
				!repo.authenticate(&candidate).await.expect("Authenticate should not error."),
				"{candidate:?} must not authenticate."
			);
		}
	}

	#[tokio::test]
	async fn dex_admin_round_trip() {
		let repo = repo();

		repo.create("app".into(), metadata()).await.expect("Client creation should succeed.");

		assert!(!repo.is_dex_admin("app").await.expect("Admin flag should load."));

		repo.set_dex_admin("app", true).await.expect("Admin flag should update.");

		assert!(repo.is_dex_admin("app").await.expect("Admin flag should load."));
		assert!(matches!(repo.is_dex_admin("ghost").await, Err(Error::NotFound)));
		assert!(matches!(repo.set_dex_admin("ghost", true).await, Err(Error::NotFound)));
		assert!(matches!(repo.metadata("ghost").await, Err(Error::NotFound)));
	}

	#[tokio::test]
	async fn seeded_clients_keep_their_secret() {
		let repo = repo();
		let credentials =
			ClientCredentials { id: "seeded".into(), secret: URL_SAFE.encode(b"seed-secret") };

		repo.seed(vec![ClientSeed {
			credentials: credentials.clone(),
			metadata: metadata(),
			dex_admin: true,
		}])
		.await
		.expect("Seeding should succeed.");

		assert!(repo.authenticate(&credentials).await.expect("Authenticate should not error."));

		let all = repo.all().await.expect("Listing clients should succeed.");

		assert_eq!(all.len(), 1);
		assert!(all[0].dex_admin);

		let bad = ClientSeed {
			credentials: ClientCredentials { id: "broken".into(), secret: "%%%".into() },
			metadata: metadata(),
			dex_admin: false,
		};

		assert!(matches!(
			repo.seed(vec![bad]).await,
			Err(Error::Config(ConfigError::UndecodableClientSecret { .. }))
		));
	}

	#[test]
	fn metadata_uses_redirect_urls_field_name() {
		let payload = serde_json::to_value(metadata()).expect("Metadata should serialize.");

		assert!(payload.get("redirectURLs").is_some());
	}
}
