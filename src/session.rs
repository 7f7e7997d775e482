//! Login sessions persisted between the redirect to a connector and the code exchange.

pub mod key;

pub use key::{BackendSessionKeyRepo, SessionKey, SessionKeyRepo};

// self
use crate::{
	_prelude::*,
	clock::Clock,
	obs::{self, RepoKind},
	store::{self, Backend, CommitOutcome, Document, RepoFuture, Table, WriteBatch},
};

/// Progress of a login session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
	/// Created, nothing attached yet.
	New,
	/// A remote identity has been attached by a connector.
	RemoteAttached,
	/// The session has been bound to a local user.
	Identified,
	/// The authorization code has been exchanged.
	ExchangedCode,
}

/// A login session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
	/// Session identifier.
	pub id: String,
	/// Current progress.
	pub state: SessionState,
	/// Client that initiated the login.
	pub client_id: String,
	/// Opaque state echoed back to the client.
	pub client_state: String,
	/// Where the client expects to be redirected.
	pub redirect_url: Url,
	/// Serialized remote identity; never interpreted by the store.
	pub identity: String,
	/// Connector that authenticated the user.
	pub connector_id: String,
	/// Local user bound to the session.
	pub user_id: String,
	/// Whether the login is a registration.
	pub register: bool,
	/// OIDC nonce supplied by the client.
	pub nonce: String,
	/// Requested scopes.
	pub scope: Vec<String>,
	/// Creation instant.
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	/// Instant at which the session becomes unreadable.
	#[serde(with = "time::serde::rfc3339")]
	pub expires_at: OffsetDateTime,
}
impl Session {
	/// Creates a [`SessionState::New`] session with empty optional fields.
	pub fn new(
		id: impl Into<String>,
		client_id: impl Into<String>,
		redirect_url: Url,
		created_at: OffsetDateTime,
		expires_at: OffsetDateTime,
	) -> Self {
		Self {
			id: id.into(),
			state: SessionState::New,
			client_id: client_id.into(),
			client_state: String::new(),
			redirect_url,
			identity: String::new(),
			connector_id: String::new(),
			user_id: String::new(),
			register: false,
			nonce: String::new(),
			scope: Vec::new(),
			created_at,
			expires_at,
		}
	}

	fn to_document(&self) -> Result<Document> {
		Ok(Document::encode(self)?.expiring_at(self.expires_at))
	}
}

/// Session persistence contract.
pub trait SessionRepo
where
	Self: Send + Sync,
{
	/// Fetches a live session; expired sessions are [`Error::NotFound`].
	fn get<'a>(&'a self, id: &'a str) -> RepoFuture<'a, Session>;

	/// Stores a new session, failing with [`Error::DuplicateId`] if the id is taken.
	fn create(&self, session: Session) -> RepoFuture<'_, ()>;

	/// Replaces a live session, failing with [`Error::NotFound`] if it is absent or expired.
	fn update(&self, session: Session) -> RepoFuture<'_, ()>;
}

/// [`SessionRepo`] over any [`Backend`].
#[derive(Clone, Debug)]
pub struct BackendSessionRepo {
	backend: Arc<dyn Backend>,
	clock: Arc<dyn Clock>,
}
impl BackendSessionRepo {
	/// Creates a repository reading expiry from `clock`.
	pub fn new(backend: Arc<dyn Backend>, clock: Arc<dyn Clock>) -> Self {
		Self { backend, clock }
	}

	async fn live(&self, id: &str) -> Result<Option<Session>> {
		let loaded = store::load::<Session>(&*self.backend, Table::Session, id).await?;

		Ok(loaded.map(|(_, session)| session).filter(|s| s.expires_at > self.clock.now()))
	}
}
impl SessionRepo for BackendSessionRepo {
	fn get<'a>(&'a self, id: &'a str) -> RepoFuture<'a, Session> {
		obs::observe(RepoKind::Session, "get", async move {
			self.live(id).await?.ok_or(Error::NotFound)
		})
	}

	fn create(&self, session: Session) -> RepoFuture<'_, ()> {
		obs::observe(RepoKind::Session, "create", async move {
			if session.id.is_empty() {
				return Err(Error::InvalidId);
			}

			let batch =
				WriteBatch::new().insert(Table::Session, session.id.clone(), session.to_document()?);

			match self.backend.commit(batch).await? {
				CommitOutcome::Committed => Ok(()),
				CommitOutcome::Conflict { .. } => Err(Error::DuplicateId),
			}
		})
	}

	fn update(&self, session: Session) -> RepoFuture<'_, ()> {
		obs::observe(RepoKind::Session, "update", async move {
			if self.live(&session.id).await?.is_none() {
				return Err(Error::NotFound);
			}

			let batch = WriteBatch::new()
				.expect_present(Table::Session, session.id.clone())
				.put(Table::Session, session.id.clone(), session.to_document()?);

			match self.backend.commit(batch).await? {
				CommitOutcome::Committed => Ok(()),
				CommitOutcome::Conflict { .. } => Err(Error::NotFound),
			}
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{clock::ManualClock, store::MemoryBackend};

	fn repo(clock: &ManualClock) -> BackendSessionRepo {
		BackendSessionRepo::new(Arc::new(MemoryBackend::default()), Arc::new(clock.clone()))
	}

	fn session(id: &str, clock: &ManualClock) -> Session {
		let now = clock.now();
		let redirect = Url::parse("https://client.example.com/callback")
			.expect("Redirect URL fixture should parse.");

		Session::new(id, "client-a", redirect, now, now + Duration::minutes(10))
	}

	#[tokio::test]
	async fn create_get_update() {
		let clock = ManualClock::default();
		let repo = repo(&clock);
		let mut stored = session("s1", &clock);

		repo.create(stored.clone()).await.expect("Session creation should succeed.");

		assert!(matches!(repo.create(stored.clone()).await, Err(Error::DuplicateId)));

		stored.state = SessionState::Identified;
		stored.user_id = "u1".into();
		stored.identity = r#"{"connector":"local","id":"42"}"#.into();

		repo.update(stored.clone()).await.expect("Session update should succeed.");

		assert_eq!(repo.get("s1").await.expect("Updated session should be readable."), stored);
	}

	#[tokio::test]
	async fn expired_sessions_are_not_found() {
		let clock = ManualClock::default();
		let repo = repo(&clock);
		let stored = session("s1", &clock);

		repo.create(stored.clone()).await.expect("Session creation should succeed.");
		clock.advance(Duration::minutes(10));

		assert!(matches!(repo.get("s1").await, Err(Error::NotFound)));
		assert!(matches!(repo.update(stored).await, Err(Error::NotFound)));
	}

	#[tokio::test]
	async fn update_requires_existing_session() {
		let clock = ManualClock::default();
		let repo = repo(&clock);

		assert!(matches!(repo.update(session("ghost", &clock)).await, Err(Error::NotFound)));
		assert!(matches!(repo.create(session("", &clock)).await, Err(Error::InvalidId)));
	}

	#[test]
	fn state_uses_screaming_snake_case() {
		let payload = serde_json::to_string(&SessionState::RemoteAttached)
			.expect("SessionState should serialize to JSON.");

		assert_eq!(payload, "\"REMOTE_ATTACHED\"");
	}
}
