//! Optional observability helpers for repository operations.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `oidc_store.op` with the `repo` and `op`
//!   fields, plus `debug` events for rejected requests and `warn` events for storage failures.
//! - Enable `metrics` to increment the `oidc_store_op_total` counter for every completed
//!   operation, labeled by `repo`, `op`, and `outcome`.

mod metrics;
mod tracing;

pub use self::metrics::*;
pub use self::tracing::*;

// self
use crate::{_prelude::*, store::RepoFuture};

/// Repository kinds observed by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RepoKind {
	/// Session records.
	Session,
	/// One-time session keys.
	SessionKey,
	/// Refresh tokens.
	RefreshToken,
	/// Client identities.
	ClientIdentity,
	/// Encrypted signing key sets.
	PrivateKeySet,
	/// Users and remote identities.
	User,
	/// Password material.
	PasswordInfo,
	/// Connector configurations.
	ConnectorConfig,
	/// Driver lifecycle (migrations, garbage collection).
	Driver,
}
impl RepoKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			RepoKind::Session => "session",
			RepoKind::SessionKey => "session_key",
			RepoKind::RefreshToken => "refresh_token",
			RepoKind::ClientIdentity => "client_identity",
			RepoKind::PrivateKeySet => "private_key_set",
			RepoKind::User => "user",
			RepoKind::PasswordInfo => "password_info",
			RepoKind::ConnectorConfig => "connector_config",
			RepoKind::Driver => "driver",
		}
	}
}
impl Display for RepoKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// The operation completed.
	Success,
	/// The operation returned a domain error.
	Rejected,
	/// The operation failed for storage, configuration, or codec reasons.
	Failure,
}
impl OpOutcome {
	/// Classifies a repository result.
	pub fn of<T>(result: &Result<T>) -> Self {
		match result {
			Ok(_) => OpOutcome::Success,
			Err(e) if e.is_domain() => OpOutcome::Rejected,
			Err(_) => OpOutcome::Failure,
		}
	}

	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Success => "success",
			OpOutcome::Rejected => "rejected",
			OpOutcome::Failure => "failure",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Wraps a repository operation in its span and records the outcome once it completes.
pub(crate) fn observe<'a, T, Fut>(kind: RepoKind, op: &'static str, fut: Fut) -> RepoFuture<'a, T>
where
	T: Send + 'a,
	Fut: Future<Output = Result<T>> + Send + 'a,
{
	let span = StoreSpan::new(kind, op);

	Box::pin(span.instrument(async move {
		let result = fut.await;
		let outcome = OpOutcome::of(&result);

		if let Err(e) = &result {
			match outcome {
				OpOutcome::Rejected => log_rejection(kind, op, e),
				_ => log_failure(kind, op, e),
			}
		}

		record_op_outcome(kind, op, outcome);

		result
	}))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::StoreError;

	#[test]
	fn outcomes_follow_error_class() {
		assert_eq!(OpOutcome::of(&Ok::<_, Error>(())), OpOutcome::Success);
		assert_eq!(OpOutcome::of::<()>(&Err(Error::NotFound)), OpOutcome::Rejected);
		assert_eq!(
			OpOutcome::of::<()>(&Err(StoreError::Backend { message: "io".into() }.into())),
			OpOutcome::Failure
		);
	}

	#[tokio::test]
	async fn observe_passes_results_through() {
		let value = observe(RepoKind::Session, "get", async { Ok(7) }).await;

		assert_eq!(value.expect("Observed future should succeed."), 7);

		let err = observe::<(), _>(RepoKind::User, "get", async { Err(Error::NotFound) }).await;

		assert!(matches!(err, Err(Error::NotFound)));
	}
}
