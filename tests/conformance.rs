// std
use std::{
	env, fs,
	path::PathBuf,
	process,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
};
// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE};
use time::{Duration, OffsetDateTime, macros};
// self
use oidc_store::{
	Driver, Error,
	client::{ClientCredentials, ClientIdentityRepo, ClientMetadata, ClientSeed},
	clock::{Clock, ManualClock},
	config::StoreConfig,
	crypto::{MAX_SECRET_LEN, MIN_HASH_COST},
	key::{PrivateKey, PrivateKeySet, PrivateKeySetRepo},
	refresh::RefreshTokenRepo,
	session::{Session, SessionKey, SessionKeyRepo, SessionRepo},
	url::Url,
	user::{User, UserFilter, UserRepo},
};

const CONCURRENCY: usize = 16;

/// Driver plus the snapshot file it owns, removed on drop.
struct Fixture {
	driver: Driver,
	snapshot: Option<PathBuf>,
}
impl Fixture {
	fn memory() -> Self {
		Self { driver: configure(Driver::memory()), snapshot: None }
	}

	fn file() -> Self {
		static NEXT: AtomicUsize = AtomicUsize::new(0);

		let path = env::temp_dir().join(format!(
			"oidc_store_conformance_{}_{}_{}.json",
			process::id(),
			NEXT.fetch_add(1, Ordering::Relaxed),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		));
		let driver = Driver::file(&path).expect("File driver should open a fresh snapshot.");

		Self { driver: configure(driver), snapshot: Some(path) }
	}
}
impl Drop for Fixture {
	fn drop(&mut self) {
		if let Some(path) = &self.snapshot {
			let _ = fs::remove_file(path);
		}
	}
}

fn configure(driver: Driver) -> Driver {
	driver
		.with_config(StoreConfig::default().with_bcrypt_cost(MIN_HASH_COST))
		.expect("Minimum bcrypt cost should be accepted.")
}

fn key_set(ids: &[&str]) -> PrivateKeySet {
	PrivateKeySet {
		keys: ids
			.iter()
			.map(|id| PrivateKey { id: (*id).into(), der: id.as_bytes().repeat(8) })
			.collect(),
		expires_at: macros::datetime!(2030-01-01 00:00 UTC),
	}
}

fn redirect() -> Url {
	Url::parse("https://app.example.com/callback").expect("Redirect fixture should parse.")
}

macro_rules! conformance_suite {
	($name:ident, $fixture:expr) => {
		mod $name {
			use super::*;

			fn fixture() -> Fixture {
				$fixture
			}

			#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
			async fn session_key_pops_exactly_once_under_contention() {
				let fixture = fixture();
				let repo = Arc::new(fixture.driver.new_session_key_repo());
				let key = SessionKey::generate("session-1");

				repo.push(key.clone(), Duration::minutes(5))
					.await
					.expect("Pushing a fresh session key should succeed.");

				let mut tasks = Vec::with_capacity(CONCURRENCY);

				for _ in 0..CONCURRENCY {
					let repo = repo.clone();
					let key = key.key.clone();

					tasks.push(tokio::spawn(async move { repo.pop(&key).await }));
				}

				let mut winners = 0;

				for task in tasks {
					match task.await.expect("Pop task should not panic.") {
						Ok(session_id) => {
							assert_eq!(session_id, "session-1");

							winners += 1;
						},
						Err(Error::InvalidSessionKey) => {},
						Err(e) => panic!("Unexpected pop failure: {e}"),
					}
				}

				assert_eq!(winners, 1);
			}

			#[tokio::test]
			async fn session_keys_expire() {
				let fixture = fixture();
				let clock = ManualClock::default();
				let repo = fixture.driver.new_session_key_repo_with_clock(Arc::new(clock.clone()));

				repo.push(SessionKey::new("k1", "s1"), Duration::minutes(1))
					.await
					.expect("Push should succeed.");
				clock.advance(Duration::minutes(1));

				assert!(matches!(repo.pop("k1").await, Err(Error::InvalidSessionKey)));
			}

			#[tokio::test]
			async fn sessions_expire_on_read() {
				let fixture = fixture();
				let clock = ManualClock::default();
				let repo = fixture.driver.new_session_repo_with_clock(Arc::new(clock.clone()));
				let now = clock.now();
				let session = Session::new("s1", "app", redirect(), now, now + Duration::minutes(5));

				repo.create(session.clone()).await.expect("Create should succeed.");

				assert_eq!(repo.get("s1").await.expect("Live session should load."), session);

				clock.advance(Duration::minutes(5));

				assert!(matches!(repo.get("s1").await, Err(Error::NotFound)));
				assert!(matches!(repo.update(session).await, Err(Error::NotFound)));
			}

			#[tokio::test]
			async fn refresh_token_round_trip_and_mismatches() {
				let fixture = fixture();
				let repo = fixture.driver.new_refresh_token_repo();
				let token = repo.create("user-1", "client-1").await.expect("Issue should succeed.");

				assert_eq!(
					repo.verify("client-1", &token).await.expect("Genuine token should verify."),
					"user-1"
				);
				assert!(matches!(
					repo.verify("client-2", &token).await,
					Err(Error::InvalidClientId)
				));

				let (id, payload) =
					token.split_once('/').expect("Token should contain a delimiter.");
				let forged = format!("{id}/{}", URL_SAFE.encode([0_u8; 64]));

				assert!(matches!(repo.verify("client-1", &forged).await, Err(Error::InvalidToken)));

				let mut flipped = URL_SAFE.decode(payload).expect("Issued payload should decode.");

				flipped[0] ^= 0x01;

				let flipped = format!("{id}/{}", URL_SAFE.encode(flipped));

				assert!(matches!(repo.verify("client-1", &flipped).await, Err(Error::InvalidToken)));
				assert_eq!(
					repo.verify("client-1", &token).await.expect("The genuine token stays valid."),
					"user-1"
				);
			}

			#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
			async fn refresh_revocation_is_one_shot() {
				let fixture = fixture();
				let repo = Arc::new(fixture.driver.new_refresh_token_repo());
				let token = repo.create("user-1", "client-1").await.expect("Issue should succeed.");
				let mut tasks = Vec::with_capacity(CONCURRENCY);

				for _ in 0..CONCURRENCY {
					let repo = repo.clone();
					let token = token.clone();

					tasks.push(tokio::spawn(async move { repo.revoke("user-1", &token).await }));
				}

				let mut revoked = 0;

				for task in tasks {
					match task.await.expect("Revoke task should not panic.") {
						Ok(()) => revoked += 1,
						Err(Error::InvalidToken) => {},
						Err(e) => panic!("Unexpected revoke failure: {e}"),
					}
				}

				assert_eq!(revoked, 1);
				assert!(matches!(repo.revoke("user-1", &token).await, Err(Error::InvalidToken)));
				assert!(matches!(repo.verify("client-1", &token).await, Err(Error::InvalidToken)));
			}

			#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
			async fn email_is_unique_across_concurrent_creates() {
				let fixture = fixture();
				let mut tasks = Vec::with_capacity(CONCURRENCY);

				for index in 0..CONCURRENCY {
					// Separate repositories still share the driver's guards and indexes.
					let repo = fixture.driver.new_user_repo();
					let user =
						User::new(format!("user-{index}"), "ada@example.com", OffsetDateTime::now_utc());

					tasks.push(tokio::spawn(async move { repo.create(user).await }));
				}

				let mut created = 0;

				for task in tasks {
					match task.await.expect("Create task should not panic.") {
						Ok(()) => created += 1,
						Err(Error::DuplicateEmail) => {},
						Err(e) => panic!("Unexpected create failure: {e}"),
					}
				}

				assert_eq!(created, 1);

				let repo = fixture.driver.new_user_repo();

				repo.create(User::new("other", "bob@example.com", OffsetDateTime::now_utc()))
					.await
					.expect("A distinct email should be accepted.");

				let mut clash = repo.get("other").await.expect("User should load.");

				clash.email = "ada@example.com".into();

				assert!(matches!(repo.update(clash).await, Err(Error::DuplicateEmail)));
			}

			#[tokio::test]
			async fn key_set_survives_secret_rotation() {
				let fixture = fixture();
				let (a, b, c) = ([0xA_u8; 32], [0xB_u8; 32], [0xC_u8; 32]);
				let with_a = fixture
					.driver
					.new_private_key_set_repo(false, [a])
					.expect("Secret A should be accepted.");

				assert!(matches!(with_a.get().await, Err(Error::NoKeys)));

				with_a.set(key_set(&["k1", "k0"])).await.expect("Sealing under A should succeed.");

				let rotated = fixture
					.driver
					.new_private_key_set_repo(false, [b, a])
					.expect("Secrets B and A should be accepted.");

				assert_eq!(
					rotated.get().await.expect("B then A should open a set sealed under A."),
					key_set(&["k1", "k0"])
				);

				let unrelated =
					fixture.driver.new_private_key_set_repo(false, [c]).expect("Secret C is valid.");

				assert!(matches!(unrelated.get().await, Err(Error::CannotDecryptKeys)));

				rotated.set(key_set(&["k2", "k1"])).await.expect("Sealing under B should succeed.");

				assert!(matches!(with_a.get().await, Err(Error::CannotDecryptKeys)));
			}

			#[tokio::test]
			async fn legacy_key_envelope_stays_readable() {
				let fixture = fixture();
				let secret = [0x5_u8; 32];
				let legacy = fixture
					.driver
					.new_private_key_set_repo(true, [secret])
					.expect("Secret should be accepted.");

				legacy.set(key_set(&["old"])).await.expect("Legacy sealing should succeed.");

				let current = fixture
					.driver
					.new_private_key_set_repo(false, [secret])
					.expect("Secret should be accepted.");

				assert_eq!(current.get().await.expect("Legacy blob should open."), key_set(&["old"]));
			}

			#[tokio::test]
			async fn user_listing_paginates() {
				let fixture = fixture();
				let repo = fixture.driver.new_user_repo();
				let start = macros::datetime!(2025-01-01 00:00 UTC);

				for index in 0..5 {
					repo.create(User::new(
						format!("user-{index}"),
						format!("user-{index}@example.com"),
						start + Duration::minutes(index),
					))
					.await
					.expect("Create should succeed.");
				}

				let mut sizes = Vec::new();
				let mut seen = Vec::new();
				let mut token = None::<String>;

				loop {
					let page = repo
						.list(UserFilter::default(), 2, token.as_deref())
						.await
						.expect("Listing should succeed.");

					sizes.push(page.users.len());
					seen.extend(page.users.into_iter().map(|user| user.id));

					match page.next_page_token {
						Some(next) => token = Some(next),
						None => break,
					}
				}

				assert_eq!(sizes, [2, 2, 1]);
				assert_eq!(seen, ["user-0", "user-1", "user-2", "user-3", "user-4"]);

				let first = repo
					.list(UserFilter::default(), 2, None)
					.await
					.expect("Listing should succeed.")
					.next_page_token
					.expect("Five users should need more than one page.");
				let mut tampered = first.into_bytes();

				tampered[0] = if tampered[0] == b'A' { b'B' } else { b'A' };

				let tampered = String::from_utf8(tampered).expect("Token should stay ASCII.");

				assert!(matches!(
					repo.list(UserFilter::default(), 2, Some(&tampered)).await,
					Err(Error::InvalidRequest { .. })
				));
			}

			#[tokio::test]
			async fn secrets_longer_than_hash_input_fail_closed() {
				let fixture = fixture();
				let secret = [7_u8; MAX_SECRET_LEN];
				let clients = fixture
					.driver
					.new_client_identity_repo_from_clients(vec![ClientSeed {
						credentials: ClientCredentials {
							id: "app".into(),
							secret: URL_SAFE.encode(secret),
						},
						metadata: ClientMetadata { redirect_urls: vec![redirect()], client_name: None },
						dex_admin: false,
					}])
					.await
					.expect("Seeding should succeed.");
				let mut longer = secret.to_vec();

				longer.push(7);

				assert!(
					clients
						.authenticate(&ClientCredentials {
							id: "app".into(),
							secret: URL_SAFE.encode(secret),
						})
						.await
						.expect("Authenticate should not error.")
				);
				assert!(
					!clients
						.authenticate(&ClientCredentials {
							id: "app".into(),
							secret: URL_SAFE.encode(&longer),
						})
						.await
						.expect("Authenticate should not error.")
				);

				let refresh = fixture.driver.new_refresh_token_repo();
				let token = refresh.create("user-1", "app").await.expect("Issue should succeed.");
				let (id, payload) =
					token.split_once('/').expect("Token should contain a delimiter.");
				let mut extended = URL_SAFE.decode(payload).expect("Issued payload should decode.");

				extended.resize(MAX_SECRET_LEN + 1, 0);

				assert!(matches!(
					refresh.verify("app", &format!("{id}/{}", URL_SAFE.encode(&extended))).await,
					Err(Error::InvalidToken)
				));
			}
		}
	};
}

conformance_suite!(memory, Fixture::memory());
conformance_suite!(file, Fixture::file());
