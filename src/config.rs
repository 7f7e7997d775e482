//! Declarative configuration for drivers and the backends they open.

// std
use std::path::PathBuf;
// self
use crate::{
	_prelude::*,
	crypto::{self, SecretHasher},
	error::ConfigError,
	store::{Backend, FileBackend, MemoryBackend},
};

/// Default refresh-token payload length in bytes.
pub const DEFAULT_REFRESH_PAYLOAD_LEN: usize = 64;

/// Tunables shared by every repository a driver constructs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
	/// bcrypt cost applied to client secrets, refresh payloads, and passwords.
	pub bcrypt_cost: u32,
	/// Random payload length for newly issued refresh tokens.
	pub refresh_payload_len: usize,
}
impl StoreConfig {
	/// Overrides the bcrypt cost.
	pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
		self.bcrypt_cost = cost;

		self
	}

	/// Overrides the refresh-token payload length.
	pub fn with_refresh_payload_len(mut self, len: usize) -> Self {
		self.refresh_payload_len = len;

		self
	}

	/// Validates the settings and returns the hasher they describe.
	pub fn validate(&self) -> Result<SecretHasher, ConfigError> {
		if !(1..=crypto::MAX_SECRET_LEN).contains(&self.refresh_payload_len) {
			return Err(ConfigError::OutOfRange {
				setting: "refresh_payload_len",
				value: self.refresh_payload_len,
				max: crypto::MAX_SECRET_LEN,
			});
		}

		SecretHasher::new(self.bcrypt_cost)
	}
}
impl Default for StoreConfig {
	fn default() -> Self {
		Self {
			bcrypt_cost: crypto::DEFAULT_HASH_COST,
			refresh_payload_len: DEFAULT_REFRESH_PAYLOAD_LEN,
		}
	}
}

/// Which storage engine a driver should open.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(try_from = "RawBackendConfig")]
pub enum BackendConfig {
	/// In-process maps with native expiry.
	Memory,
	/// JSON snapshot persisted at `path`.
	File {
		/// Snapshot location; parent directories are created on open.
		path: PathBuf,
	},
}
impl BackendConfig {
	/// Parses a JSON backend description, reporting the failing field path on error.
	pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
		let mut de = serde_json::Deserializer::from_str(raw);

		serde_path_to_error::deserialize(&mut de).map_err(ConfigError::InvalidBackend)
	}

	/// Opens the configured backend.
	pub fn open(&self) -> Result<Arc<dyn Backend>> {
		Ok(match self {
			Self::Memory => Arc::new(MemoryBackend::default()),
			Self::File { path } => Arc::new(FileBackend::open(path.clone())?),
		})
	}
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum BackendKind {
	Memory,
	File,
}

/// Flat wire form of [`BackendConfig`].
///
/// Internally tagged enums buffer their content before decoding, which hides field paths from
/// `serde_path_to_error`; a plain struct keeps them.
#[derive(Debug, Deserialize)]
struct RawBackendConfig {
	#[serde(rename = "type")]
	kind: BackendKind,
	#[serde(default)]
	path: Option<PathBuf>,
}
impl TryFrom<RawBackendConfig> for BackendConfig {
	type Error = ConfigError;

	fn try_from(raw: RawBackendConfig) -> Result<Self, Self::Error> {
		match raw.kind {
			BackendKind::Memory => Ok(Self::Memory),
			BackendKind::File => raw
				.path
				.map(|path| Self::File { path })
				.ok_or(ConfigError::MissingBackendSetting { backend: "file", setting: "path" }),
		}
	}
}
