// self
use crate::obs::{OpOutcome, RepoKind};

/// Records an operation outcome via the global metrics recorder (when enabled).
pub fn record_op_outcome(kind: RepoKind, op: &'static str, outcome: OpOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"oidc_store_op_total",
			"repo" => kind.as_str(),
			"op" => op,
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, op, outcome);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn record_op_outcome_noop_without_recorder() {
		record_op_outcome(RepoKind::SessionKey, "pop", OpOutcome::Rejected);
	}
}
