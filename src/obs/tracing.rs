// self
use crate::{_prelude::*, obs::RepoKind};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedOp<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedOp<F> = F;

/// A span builder used by repository operations.
#[derive(Clone, Debug)]
pub struct StoreSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl StoreSpan {
	/// Creates a new span tagged with the provided repository kind + operation.
	pub fn new(kind: RepoKind, op: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::debug_span!("oidc_store.op", repo = kind.as_str(), op);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, op);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedOp<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Emits a `debug` event for an expected domain outcome.
pub(crate) fn log_rejection(kind: RepoKind, op: &'static str, error: &Error) {
	#[cfg(feature = "tracing")]
	{
		tracing::debug!(repo = kind.as_str(), op, error = %error, "Repository request rejected.");
	}

	#[cfg(not(feature = "tracing"))]
	{
		let _ = (kind, op, error);
	}
}

/// Emits a `warn` event for a storage, configuration, or codec failure.
pub(crate) fn log_failure(kind: RepoKind, op: &'static str, error: &Error) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(repo = kind.as_str(), op, error = %error, "Repository operation failed.");
	}

	#[cfg(not(feature = "tracing"))]
	{
		let _ = (kind, op, error);
	}
}

/// Emits an `info` event after a garbage-collection pass removed documents.
pub(crate) fn log_purge(backend: &'static str, purged: usize) {
	#[cfg(feature = "tracing")]
	{
		tracing::info!(backend, purged, "Purged expired documents.");
	}

	#[cfg(not(feature = "tracing"))]
	{
		let _ = (backend, purged);
	}
}

/// Emits an `info` event after migrations were applied.
pub(crate) fn log_migrations(backend: &'static str, applied: usize) {
	#[cfg(feature = "tracing")]
	{
		tracing::info!(backend, applied, "Applied schema migrations.");
	}

	#[cfg(not(feature = "tracing"))]
	{
		let _ = (backend, applied);
	}
}
