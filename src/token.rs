//! Opaque `<id>/<payload>` tokens handed to clients.

// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE};
// self
use crate::{
	_prelude::*,
	crypto,
	id::{IdGenerator, TokenId},
};

/// Separator between the identifier and the encoded payload.
pub const TOKEN_DELIMITER: char = '/';

/// Secret payload bytes with redacted formatting.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSecret(Vec<u8>);
impl TokenSecret {
	/// Returns the raw secret bytes.
	pub fn expose(&self) -> &[u8] {
		&self.0
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}

/// Parsed or freshly issued opaque token.
///
/// Only the identifier is ever persisted in the clear. Any parse failure collapses into
/// [`Error::InvalidToken`] so malformed tokens cannot be told apart from unknown ones.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpaqueToken {
	id: TokenId,
	payload: TokenSecret,
}
impl OpaqueToken {
	/// Mints a new identifier and `payload_len` random payload bytes.
	pub fn issue(ids: &IdGenerator, payload_len: usize) -> Self {
		Self { id: ids.next_id(), payload: TokenSecret(crypto::random_bytes(payload_len)) }
	}

	/// Parses the wire form.
	pub fn parse(raw: &str) -> Result<Self> {
		let mut parts = raw.split(TOKEN_DELIMITER);
		let (Some(id), Some(payload), None) = (parts.next(), parts.next(), parts.next()) else {
			return Err(Error::InvalidToken);
		};
		let id = TokenId::new(id).map_err(|_| Error::InvalidToken)?;
		let payload = URL_SAFE.decode(payload).map_err(|_| Error::InvalidToken)?;

		if payload.is_empty() {
			return Err(Error::InvalidToken);
		}

		Ok(Self { id, payload: TokenSecret(payload) })
	}

	/// Identifier used as the storage key.
	pub fn id(&self) -> &TokenId {
		&self.id
	}

	/// Secret payload; persist only its hash.
	pub fn payload(&self) -> &TokenSecret {
		&self.payload
	}

	/// Renders the wire form handed to the client.
	pub fn encode(&self) -> String {
		format!("{}{TOKEN_DELIMITER}{}", self.id, URL_SAFE.encode(self.payload.expose()))
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn issued_tokens_parse_back() {
		let ids = IdGenerator::new();
		let token = OpaqueToken::issue(&ids, 64);
		let wire = token.encode();

		assert_eq!(wire.matches(TOKEN_DELIMITER).count(), 1);
		assert_eq!(OpaqueToken::parse(&wire).expect("Issued token should parse."), token);
	}

	#[test]
	fn malformed_tokens_are_invalid() {
		for raw in [
			"",
			"/",
			"abc",
			"abc/",
			"/cGF5bG9hZA==",
			"abc/cGF5bG9hZA==/extra",
			"ABC/cGF5bG9hZA==",
			"abc/not base64!",
			"xyz/cGF5bG9hZA==",
		] {
			assert!(
				matches!(OpaqueToken::parse(raw), Err(Error::InvalidToken)),
				"{raw:?} should be rejected."
			);
		}
	}

	#[test]
	fn payload_is_redacted_in_debug() {
		let token = OpaqueToken::issue(&IdGenerator::new(), 8);

		assert!(format!("{token:?}").contains("<redacted>"));
	}
}
