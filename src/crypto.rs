//! Secret codec: one-way bcrypt hashing for secrets at rest and ChaCha20-Poly1305 sealing for
//! reversible blobs such as signing key sets.
//!
//! bcrypt silently ignores input past [`MAX_SECRET_LEN`] bytes, so [`SecretHasher::hash`] refuses
//! longer secrets and [`SecretHash::matches`] treats them as a mismatch.

// crates.io
use chacha20poly1305::{
	ChaCha20Poly1305, KeyInit, Nonce,
	aead::{Aead, Payload},
};
use rand::Rng;
// self
use crate::{_prelude::*, error::ConfigError};

/// Longest secret bcrypt hashes without truncation.
pub const MAX_SECRET_LEN: usize = 72;
/// Cost used when no explicit bcrypt cost is configured.
pub const DEFAULT_HASH_COST: u32 = 10;
/// Lowest bcrypt cost accepted by [`SecretHasher::new`].
pub const MIN_HASH_COST: u32 = 4;
/// Highest bcrypt cost accepted by [`SecretHasher::new`].
pub const MAX_HASH_COST: u32 = 31;
/// Exact length of a [`KeySecret`].
pub const KEY_SECRET_LEN: usize = 32;

const NONCE_LEN: usize = 12;

/// Failures while producing new hashed or sealed material.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum CodecError {
	/// The secret is longer than bcrypt can hash faithfully.
	#[error("Secret exceeds {max} bytes.")]
	SecretTooLong {
		/// Maximum accepted length in bytes.
		max: usize,
	},
	/// The hashing primitive reported a failure.
	#[error("Hashing failed: {message}.")]
	Hash {
		/// Underlying failure description.
		message: String,
	},
	/// The AEAD primitive refused to seal the payload.
	#[error("Sealing failed.")]
	Seal,
}

/// Reasons a sealed blob cannot be opened under a given secret.
///
/// The two cases are kept apart so callers holding several candidate secrets can tell a blob that
/// is structurally broken from one sealed under a different secret.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ThisError)]
pub enum OpenError {
	/// The blob is too short or carries an unknown envelope.
	#[error("Sealed blob is malformed.")]
	Malformed,
	/// Authentication failed: wrong secret or tampered ciphertext.
	#[error("Sealed blob failed authentication.")]
	Unauthenticated,
}

/// bcrypt hash of a secret, safe to persist.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretHash(String);
impl SecretHash {
	/// Wraps an existing bcrypt hash string.
	pub fn from_encoded(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the encoded hash.
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Returns `true` when the hash is empty.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Checks `candidate` against the hash, failing closed.
	///
	/// Over-long candidates, malformed hashes, and mismatches all return `false`.
	pub fn matches(&self, candidate: &[u8]) -> bool {
		if candidate.len() > MAX_SECRET_LEN {
			return false;
		}

		bcrypt::verify(candidate, &self.0).unwrap_or(false)
	}
}
impl Debug for SecretHash {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("SecretHash").field(&"<redacted>").finish()
	}
}

/// bcrypt hasher with a fixed cost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SecretHasher {
	cost: u32,
}
impl SecretHasher {
	/// Creates a hasher after validating the cost.
	pub fn new(cost: u32) -> Result<Self, ConfigError> {
		if !(MIN_HASH_COST..=MAX_HASH_COST).contains(&cost) {
			return Err(ConfigError::InvalidHashCost {
				cost,
				min: MIN_HASH_COST,
				max: MAX_HASH_COST,
			});
		}

		Ok(Self { cost })
	}

	/// Returns the configured cost.
	pub fn cost(&self) -> u32 {
		self.cost
	}

	/// Hashes `secret`, refusing anything longer than [`MAX_SECRET_LEN`].
	pub fn hash(&self, secret: &[u8]) -> Result<SecretHash, CodecError> {
		if secret.len() > MAX_SECRET_LEN {
			return Err(CodecError::SecretTooLong { max: MAX_SECRET_LEN });
		}

		bcrypt::hash(secret, self.cost)
			.map(SecretHash)
			.map_err(|e| CodecError::Hash { message: e.to_string() })
	}
}
impl Default for SecretHasher {
	fn default() -> Self {
		Self { cost: DEFAULT_HASH_COST }
	}
}

/// 32-byte symmetric secret used to seal key sets.
#[derive(Clone, PartialEq, Eq)]
pub struct KeySecret([u8; KEY_SECRET_LEN]);
impl KeySecret {
	/// Generates a fresh random secret.
	pub fn generate() -> Self {
		let mut bytes = [0_u8; KEY_SECRET_LEN];

		rand::rng().fill(&mut bytes[..]);

		Self(bytes)
	}

	/// Returns the raw secret bytes.
	pub fn expose(&self) -> &[u8] {
		&self.0
	}
}
impl TryFrom<&[u8]> for KeySecret {
	type Error = usize;

	/// Fails with the supplied length when it is not exactly [`KEY_SECRET_LEN`].
	fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
		<[u8; KEY_SECRET_LEN]>::try_from(value).map(Self).map_err(|_| value.len())
	}
}
impl Debug for KeySecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("KeySecret").field(&"<redacted>").finish()
	}
}

/// Fills a new buffer of `len` bytes from the thread-local CSPRNG.
pub fn random_bytes(len: usize) -> Vec<u8> {
	let mut bytes = vec![0_u8; len];

	rand::rng().fill(&mut bytes[..]);

	bytes
}

/// Seals `plaintext` under `secret`, returning `nonce ‖ ciphertext`.
pub fn seal(plaintext: &[u8], aad: &[u8], secret: &KeySecret) -> Result<Vec<u8>, CodecError> {
	let cipher = ChaCha20Poly1305::new_from_slice(secret.expose()).map_err(|_| CodecError::Seal)?;
	let mut nonce = [0_u8; NONCE_LEN];

	rand::rng().fill(&mut nonce[..]);

	let ciphertext = cipher
		.encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
		.map_err(|_| CodecError::Seal)?;
	let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());

	sealed.extend_from_slice(&nonce);
	sealed.extend_from_slice(&ciphertext);

	Ok(sealed)
}

/// Opens a `nonce ‖ ciphertext` blob produced by [`seal`].
pub fn open(sealed: &[u8], aad: &[u8], secret: &KeySecret) -> Result<Vec<u8>, OpenError> {
	// Shorter than a nonce plus the 16-byte tag cannot be a sealed payload.
	if sealed.len() < NONCE_LEN + 16 {
		return Err(OpenError::Malformed);
	}

	let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
	let cipher =
		ChaCha20Poly1305::new_from_slice(secret.expose()).map_err(|_| OpenError::Malformed)?;

	cipher
		.decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
		.map_err(|_| OpenError::Unauthenticated)
}
