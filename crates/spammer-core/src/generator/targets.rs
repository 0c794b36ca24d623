//! Destination and contract selection for generated transactions.

use super::GeneratorError;
use alloy_primitives::Address;
use rand::Rng;
use std::path::Path;
use std::sync::Arc;

/// Where transfers and blob transactions are sent.
#[derive(Debug, Clone)]
pub enum DestinationSource {
	/// A fixed list, walked round-robin by transaction index.
	Listed(Arc<Vec<Address>>),
	/// Synthetic addresses `seed.create(index)`, reproducible across runs.
	Derived { seed: Address },
}

impl DestinationSource {
	/// Uses `listed` when it is non-empty, otherwise derives from `seed`.
	pub fn new(listed: Vec<Address>, seed: Option<Address>) -> Self {
		if listed.is_empty() {
			Self::Derived {
				seed: seed.unwrap_or(Address::ZERO),
			}
		} else {
			Self::Listed(Arc::new(listed))
		}
	}

	/// Destination of the `index`-th transaction of a worker.
	pub fn pick(&self, index: u64) -> Address {
		match self {
			Self::Listed(list) => list[(index % list.len() as u64) as usize],
			Self::Derived { seed } => seed.create(index),
		}
	}
}

/// Contracts the call workload targets.
#[derive(Debug, Clone, Default)]
pub struct ContractPool {
	contracts: Arc<Vec<Address>>,
}

impl ContractPool {
	pub fn new(contracts: Vec<Address>) -> Self {
		Self {
			contracts: Arc::new(contracts),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.contracts.is_empty()
	}

	/// Picks a contract uniformly at random.
	pub fn pick(&self) -> Option<Address> {
		match self.contracts.len() {
			0 => None,
			1 => Some(self.contracts[0]),
			n => Some(self.contracts[rand::thread_rng().gen_range(0..n)]),
		}
	}
}

/// Reads destination addresses from a file, one per line.
///
/// Blank lines and lines starting with `#` are skipped.
pub async fn load_destinations(path: &Path) -> Result<Vec<Address>, GeneratorError> {
	let content = tokio::fs::read_to_string(path)
		.await
		.map_err(|e| GeneratorError::Destinations(format!("{}: {}", path.display(), e)))?;

	content
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty() && !line.starts_with('#'))
		.map(|line| {
			line.parse::<Address>().map_err(|e| {
				GeneratorError::Destinations(format!("{}: '{}': {}", path.display(), line, e))
			})
		})
		.collect()
}
