//! Token identifiers and the generator that mints them.
//!
//! An identifier is 12 bytes: big-endian unix seconds (4), a per-generator machine salt (3), the
//! low bits of the process id (2), and a wrapping counter (3). It is rendered as 24 lower-case hex
//! characters, so it never contains the token delimiter.

// std
use std::{
	ops::Deref,
	process,
	sync::atomic::{AtomicU32, Ordering},
};
// crates.io
use rand::Rng;
// self
use crate::_prelude::*;

/// Raw identifier length in bytes.
pub const TOKEN_ID_LEN: usize = 12;

const COUNTER_MASK: u32 = 0x00FF_FFFF;

/// Error returned when a string is not a well-formed token identifier.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum TokenIdError {
	/// The identifier was empty.
	#[error("Token identifier cannot be empty.")]
	Empty,
	/// The identifier contains characters outside lower-case hex.
	#[error("Token identifier must be lower-case hex.")]
	NotHex,
}

/// Validated token identifier.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenId(String);
impl TokenId {
	/// Validates an identifier received from the wire.
	pub fn new(value: impl AsRef<str>) -> Result<Self, TokenIdError> {
		let view = value.as_ref();

		validate(view)?;

		Ok(Self(view.to_owned()))
	}

	fn from_bytes(bytes: [u8; TOKEN_ID_LEN]) -> Self {
		Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
	}
}
impl Deref for TokenId {
	type Target = str;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
impl AsRef<str> for TokenId {
	fn as_ref(&self) -> &str {
		&self.0
	}
}
impl From<TokenId> for String {
	fn from(value: TokenId) -> Self {
		value.0
	}
}
impl TryFrom<String> for TokenId {
	type Error = TokenIdError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		validate(&value)?;

		Ok(Self(value))
	}
}
impl FromStr for TokenId {
	type Err = TokenIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}
impl Debug for TokenId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "TokenId({})", self.0)
	}
}
impl Display for TokenId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}

/// Mints unique, roughly time-ordered token identifiers.
///
/// Construct one per driver and share it; every repository that issues tokens draws from the same
/// counter.
#[derive(Debug)]
pub struct IdGenerator {
	machine: [u8; 3],
	pid: u16,
	counter: AtomicU32,
}
impl IdGenerator {
	/// Creates a generator with a random machine salt and counter seed.
	pub fn new() -> Self {
		let mut rng = rand::rng();
		let machine = rng.random::<[u8; 3]>();
		let counter = AtomicU32::new(rng.random::<u32>() & COUNTER_MASK);

		Self { machine, pid: process::id() as u16, counter }
	}

	/// Returns the next identifier.
	pub fn next_id(&self) -> TokenId {
		let seconds = OffsetDateTime::now_utc().unix_timestamp() as u32;
		let count = self.counter.fetch_add(1, Ordering::Relaxed) & COUNTER_MASK;
		let mut bytes = [0_u8; TOKEN_ID_LEN];

		bytes[..4].copy_from_slice(&seconds.to_be_bytes());
		bytes[4..7].copy_from_slice(&self.machine);
		bytes[7..9].copy_from_slice(&self.pid.to_be_bytes());
		bytes[9..].copy_from_slice(&count.to_be_bytes()[1..]);

		TokenId::from_bytes(bytes)
	}
}
impl Default for IdGenerator {
	fn default() -> Self {
		Self::new()
	}
}

fn validate(view: &str) -> Result<(), TokenIdError> {
	if view.is_empty() {
		return Err(TokenIdError::Empty);
	}
	if !view.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
		return Err(TokenIdError::NotHex);
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// std
	use std::collections::HashSet;
	// self
	use super::*;

	#[test]
	fn generated_ids_are_unique_hex() {
		let ids = IdGenerator::new();
		let minted = (0..1_000).map(|_| ids.next_id()).collect::<HashSet<_>>();

		assert_eq!(minted.len(), 1_000);

		for id in &minted {
			assert_eq!(id.len(), TOKEN_ID_LEN * 2);
			assert!(TokenId::new(id.as_ref()).is_ok(), "{id} should validate.");
		}
	}

	#[test]
	fn rejects_non_hex_identifiers() {
		assert_eq!(TokenId::new(""), Err(TokenIdError::Empty));
		assert_eq!(TokenId::new("ABCDEF"), Err(TokenIdError::NotHex));
		assert_eq!(TokenId::new("12/34"), Err(TokenIdError::NotHex));
		assert!(TokenId::new("0123456789abcdef").is_ok());
	}

	#[test]
	fn serde_round_trip_validates() {
		let parsed: Result<TokenId, _> = serde_json::from_str("\"zz\"");

		assert!(parsed.is_err());

		let id: TokenId = serde_json::from_str("\"00ff\"").expect("Hex id should deserialize.");

		assert_eq!(id.to_string(), "00ff");
	}
}
