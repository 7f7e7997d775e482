//! Store-level error types shared across repositories, drivers, and backends.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Canonical error exposed by every repository operation.
///
/// Every variant except [`Error::Storage`], [`Error::Config`], and [`Error::Codec`] is a domain
/// outcome: an expected answer to a well-formed request that callers translate into protocol
/// responses. Only storage failures are worth retrying.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Backend I/O failure carrying no domain meaning.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Hashing or sealing primitive failed while producing new material.
	#[error(transparent)]
	Codec(#[from] crate::crypto::CodecError),

	/// The requested record does not exist (or has expired).
	#[error("Record not found.")]
	NotFound,
	/// An identifier is empty or otherwise unusable.
	#[error("Identifier is invalid.")]
	InvalidId,
	/// The email address failed format validation.
	#[error("Email address is invalid.")]
	InvalidEmail,
	/// A record with the same identifier already exists.
	#[error("A record with this identifier already exists.")]
	DuplicateId,
	/// Another user already owns the email address.
	#[error("Email address is already in use.")]
	DuplicateEmail,
	/// Another user already owns the remote identity.
	#[error("Remote identity is already linked to a user.")]
	DuplicateRemoteIdentity,
	/// The password material is empty or unusable.
	#[error("Password is invalid.")]
	InvalidPassword,
	/// The opaque token is malformed, unknown, or does not match its stored hash.
	#[error("Token is invalid.")]
	InvalidToken,
	/// The user identifier is missing or does not own the token.
	#[error("User identifier is invalid.")]
	InvalidUserId,
	/// The client identifier is missing or does not match the token.
	#[error("Client identifier is invalid.")]
	InvalidClientId,
	/// The session key is missing, stale, or expired.
	#[error("Session key is invalid.")]
	InvalidSessionKey,
	/// No signing key set has been stored yet.
	#[error("No keys have been stored.")]
	NoKeys,
	/// The stored key set could not be decrypted with any configured secret.
	#[error("Cannot decrypt keys.")]
	CannotDecryptKeys,
	/// The request carried malformed parameters (for example a corrupted page token).
	#[error("Request is invalid: {reason}.")]
	InvalidRequest {
		/// Human-readable reason.
		reason: String,
	},
}
impl Error {
	/// Returns `true` for backend failures, the only class eligible for caller-side retry.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Storage(_))
	}

	/// Returns `true` for expected domain outcomes that must not be reported as server errors.
	pub fn is_domain(&self) -> bool {
		!matches!(self, Self::Storage(_) | Self::Config(_) | Self::Codec(_))
	}

	pub(crate) fn invalid_request(reason: impl Into<String>) -> Self {
		Self::InvalidRequest { reason: reason.into() }
	}
}

/// Configuration and validation failures raised while constructing repositories or drivers.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// The private key set repository needs at least one secret.
	#[error("At least one key secret must be provided.")]
	MissingKeySecrets,
	/// A key secret has the wrong length.
	#[error("Key secret {index}: expected a {expected}-byte secret, got {actual} bytes.")]
	InvalidKeySecret {
		/// Position of the offending secret.
		index: usize,
		/// Required length in bytes.
		expected: usize,
		/// Supplied length in bytes.
		actual: usize,
	},
	/// The bcrypt cost lies outside the supported range.
	#[error("The bcrypt cost {cost} is outside {min}..={max}.")]
	InvalidHashCost {
		/// Supplied cost.
		cost: u32,
		/// Minimum supported cost.
		min: u32,
		/// Maximum supported cost.
		max: u32,
	},
	/// A generated-length setting must be positive and within bounds.
	#[error("The {setting} setting must be within 1..={max}, got {value}.")]
	OutOfRange {
		/// Name of the setting.
		setting: &'static str,
		/// Supplied value.
		value: usize,
		/// Maximum accepted value.
		max: usize,
	},
	/// A seeded client carries a secret that is not valid base64url.
	#[error("Seeded client `{client_id}` has an undecodable secret.")]
	UndecodableClientSecret {
		/// Client whose secret failed to decode.
		client_id: String,
	},
	/// A backend type is missing a setting it cannot open without.
	#[error("The {backend} backend requires `{setting}`.")]
	MissingBackendSetting {
		/// Backend type being configured.
		backend: &'static str,
		/// Name of the missing setting.
		setting: &'static str,
	},
	/// Backend configuration could not be parsed.
	#[error("Backend configuration is invalid.")]
	InvalidBackend(#[source] serde_path_to_error::Error<serde_json::Error>),
}
