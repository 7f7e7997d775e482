//! Continuation tokens for user listings.
//!
//! A token is `base64url(json) "." base64url(sha256(json))`, both without padding. The cursor
//! carries the filter and page size it was issued for, so a resumed listing cannot drift.
//!
//! The digest is unkeyed: it catches corrupted or truncated tokens, not deliberately re-encoded
//! ones. A hand-built cursor can only page through listings its caller may already request.

// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, user::UserFilter};

/// Position within a filtered user listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
	/// Filter the listing was started with.
	pub filter: UserFilter,
	/// Page size the listing was started with.
	pub max_results: usize,
	/// Number of matching users already returned.
	pub offset: usize,
}
impl PageCursor {
	/// Renders the cursor as an opaque token.
	pub fn encode(&self) -> Result<String> {
		let json = serde_json::to_vec(self).map_err(|e| Error::invalid_request(e.to_string()))?;

		Ok(format!("{}.{}", URL_SAFE_NO_PAD.encode(&json), fingerprint(&json)))
	}

	/// Parses a token produced by [`PageCursor::encode`].
	///
	/// Corrupted or truncated tokens are [`Error::InvalidRequest`].
	pub fn decode(token: &str) -> Result<Self> {
		let (body, digest) =
			token.split_once('.').ok_or_else(|| Error::invalid_request("malformed page token"))?;
		let json = URL_SAFE_NO_PAD
			.decode(body)
			.map_err(|_| Error::invalid_request("malformed page token"))?;

		if fingerprint(&json) != digest {
			return Err(Error::invalid_request("page token fingerprint mismatch"));
		}

		let cursor: Self = serde_json::from_slice(&json)
			.map_err(|_| Error::invalid_request("malformed page token"))?;

		if cursor.max_results == 0 {
			return Err(Error::invalid_request("page token has no page size"));
		}

		Ok(cursor)
	}
}

fn fingerprint(json: &[u8]) -> String {
	let mut hasher = Sha256::new();

	hasher.update(json);

	URL_SAFE_NO_PAD.encode(hasher.finalize())
}
