//! Signing key sets sealed at rest under rotating symmetric secrets.
//!
//! The whole set is stored as one encrypted blob. Writes seal under the first configured secret;
//! reads try each secret in order and keep the first that both decrypts and decodes. Prepending a
//! new secret therefore rotates keys without re-encrypting existing data.
//!
//! Two envelopes exist. The current one is `version ‖ nonce ‖ ciphertext` with associated data
//! binding the blob to its purpose. The legacy one is a bare `nonce ‖ ciphertext` and is written
//! only when the repository is constructed with `use_old_format`. Both are accepted on read.

// crates.io
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserializer, Serializer, de::Error as _};
// self
use crate::{
	_prelude::*,
	crypto::{self, KEY_SECRET_LEN, KeySecret, OpenError},
	error::ConfigError,
	obs::{self, RepoKind},
	store::{self, Backend, Document, RepoFuture, Table, WriteBatch},
};

const KEY_SET_ID: &str = "current";
const ENVELOPE_VERSION: u8 = 1;
const ENVELOPE_AAD: &[u8] = b"oidc-store/private-key-set/v1";

/// Private signing key in DER form.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKey {
	/// Key identifier published in the JWKS `kid`.
	pub id: String,
	/// PKCS#1 DER bytes, stored base64-encoded.
	#[serde(
		rename = "pkcs1",
		serialize_with = "serialize_der",
		deserialize_with = "deserialize_der"
	)]
	pub der: Vec<u8>,
}
impl Debug for PrivateKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PrivateKey").field("id", &self.id).field("der", &"<redacted>").finish()
	}
}

/// Ordered signing keys with a shared expiry; the first key is the active one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKeySet {
	/// Keys, active first.
	pub keys: Vec<PrivateKey>,
	/// Instant after which the set should be rotated.
	#[serde(with = "time::serde::rfc3339")]
	pub expires_at: OffsetDateTime,
}
impl PrivateKeySet {
	/// Returns the active key.
	pub fn active(&self) -> Option<&PrivateKey> {
		self.keys.first()
	}
}

#[derive(Serialize, Deserialize)]
struct SealedKeySet {
	blob: String,
}

/// Private key set persistence contract.
pub trait PrivateKeySetRepo
where
	Self: Send + Sync,
{
	/// Atomically replaces the stored key set.
	fn set(&self, key_set: PrivateKeySet) -> RepoFuture<'_, ()>;

	/// Loads the key set.
	///
	/// Fails with [`Error::NoKeys`] when nothing is stored and [`Error::CannotDecryptKeys`] when no
	/// configured secret opens it.
	fn get(&self) -> RepoFuture<'_, PrivateKeySet>;
}

/// [`PrivateKeySetRepo`] over any [`Backend`].
#[derive(Clone, Debug)]
pub struct BackendPrivateKeySetRepo {
	backend: Arc<dyn Backend>,
	use_old_format: bool,
	secrets: Vec<KeySecret>,
}
impl BackendPrivateKeySetRepo {
	/// Creates a repository; requires at least one secret of exactly 32 bytes.
	pub fn new<I, S>(
		backend: Arc<dyn Backend>,
		use_old_format: bool,
		secrets: I,
	) -> Result<Self, ConfigError>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<[u8]>,
	{
		let secrets = secrets
			.into_iter()
			.enumerate()
			.map(|(index, secret)| {
				KeySecret::try_from(secret.as_ref()).map_err(|actual| {
					ConfigError::InvalidKeySecret { index, expected: KEY_SECRET_LEN, actual }
				})
			})
			.collect::<Result<Vec<_>, _>>()?;

		if secrets.is_empty() {
			return Err(ConfigError::MissingKeySecrets);
		}

		Ok(Self { backend, use_old_format, secrets })
	}

	fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
		let secret = &self.secrets[0];

		if self.use_old_format {
			return Ok(crypto::seal(plaintext, &[], secret)?);
		}

		let mut sealed = vec![ENVELOPE_VERSION];

		sealed.extend(crypto::seal(plaintext, ENVELOPE_AAD, secret)?);

		Ok(sealed)
	}

	fn open(sealed: &[u8], secret: &KeySecret) -> Result<Vec<u8>, OpenError> {
		let current = match sealed.split_first() {
			Some((&ENVELOPE_VERSION, rest)) => crypto::open(rest, ENVELOPE_AAD, secret),
			_ => Err(OpenError::Malformed),
		};

		current.or_else(|_| crypto::open(sealed, &[], secret))
	}
}
impl PrivateKeySetRepo for BackendPrivateKeySetRepo {
	fn set(&self, key_set: PrivateKeySet) -> RepoFuture<'_, ()> {
		obs::observe(RepoKind::PrivateKeySet, "set", async move {
			let plaintext = serde_json::to_vec(&key_set)
				.map_err(|e| store::StoreError::Serialization { message: e.to_string() })?;
			let sealed = SealedKeySet { blob: STANDARD.encode(self.seal(&plaintext)?) };
			let batch =
				WriteBatch::new().put(Table::PrivateKeySet, KEY_SET_ID, Document::encode(&sealed)?);

			self.backend.commit(batch).await?;

			Ok(())
		})
	}

	fn get(&self) -> RepoFuture<'_, PrivateKeySet> {
		obs::observe(RepoKind::PrivateKeySet, "get", async move {
			let (_, sealed) =
				store::load::<SealedKeySet>(&*self.backend, Table::PrivateKeySet, KEY_SET_ID)
					.await?
					.ok_or(Error::NoKeys)?;
			let blob = STANDARD.decode(sealed.blob).map_err(|_| Error::CannotDecryptKeys)?;

			self.secrets
				.iter()
				.filter_map(|secret| Self::open(&blob, secret).ok())
				.find_map(|plaintext| serde_json::from_slice::<PrivateKeySet>(&plaintext).ok())
				.ok_or(Error::CannotDecryptKeys)
		})
	}
}

fn serialize_der<S>(der: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
	S: Serializer,
{
	serializer.serialize_str(&STANDARD.encode(der))
}

fn deserialize_der<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
	D: Deserializer<'de>,
{
	let encoded = String::deserialize(deserializer)?;

	STANDARD.decode(encoded).map_err(D::Error::custom)
}
