//! Transaction delivery types for the spammer.
//!
//! This module defines the values exchanged with the RPC endpoint once a
//! signed transaction leaves the pipeline: its hash and, when the node has
//! included it, its receipt.

use alloy_primitives::B256;
use std::fmt;

/// Hash of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TransactionHash(pub B256);

impl TransactionHash {
	/// Returns the hash as a 0x-prefixed lowercase hex string.
	pub fn to_hex(&self) -> String {
		format!("{:#x}", self.0)
	}
}

impl From<B256> for TransactionHash {
	fn from(hash: B256) -> Self {
		Self(hash)
	}
}

impl fmt::Display for TransactionHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_hex())
	}
}

/// Transaction receipt containing execution details.
///
/// Only the fields the pending-transaction watcher reports on are kept.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TransactionReceipt {
	/// The hash of the transaction.
	pub hash: TransactionHash,
	/// The block number where the transaction was included.
	pub block_number: u64,
	/// Whether the transaction executed successfully.
	pub success: bool,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_hash_hex_formatting() {
		let hash = TransactionHash(B256::repeat_byte(0xab));
		let hex = hash.to_hex();
		assert!(hex.starts_with("0xabab"));
		assert_eq!(hex.len(), 66);
		assert_eq!(hash.to_string(), hex);
	}
}
