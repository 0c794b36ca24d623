//! Workload classes.
//!
//! The spammer produces four kinds of traffic. Each kind is always
//! supported; there are no placeholder variants that fail at runtime.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A class of synthetic traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadKind {
	/// Plain value transfer to a destination address.
	Send,
	/// ABI-encoded call against a deployed contract.
	Call,
	/// Contract creation carrying init code.
	Deploy,
	/// Value transfer carrying blobs in a sidecar.
	Blob,
}

impl WorkloadKind {
	/// Name used in logs and configuration sections.
	pub fn as_str(&self) -> &'static str {
		match self {
			WorkloadKind::Send => "send",
			WorkloadKind::Call => "call",
			WorkloadKind::Deploy => "deploy",
			WorkloadKind::Blob => "blob",
		}
	}
}

impl fmt::Display for WorkloadKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_kind_names_match_serde() {
		for kind in [
			WorkloadKind::Send,
			WorkloadKind::Call,
			WorkloadKind::Deploy,
			WorkloadKind::Blob,
		] {
			let encoded = serde_json::to_string(&kind).unwrap();
			assert_eq!(encoded, format!("\"{}\"", kind.as_str()));
		}
	}
}
