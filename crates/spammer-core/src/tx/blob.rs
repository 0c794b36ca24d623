//! Blob sidecar construction.

use super::BuilderError;
use alloy_eips::eip4844::{Blob, BlobTransactionSidecar};

/// Most blobs a single transaction may carry.
pub const MAX_BLOBS: usize = 6;

/// Builds a sidecar of `count` synthetic blobs with commitments and proofs.
///
/// Blob `i` is zero except for its first byte, which is `i + 1`, so every
/// blob in the sidecar is distinct. Commitments are computed with the
/// Ethereum trusted setup, which is expensive: build once and clone.
pub fn build_sidecar(count: usize) -> Result<BlobTransactionSidecar, BuilderError> {
	if count == 0 || count > MAX_BLOBS {
		return Err(BuilderError::Blob(format!(
			"blob count must be between 1 and {}, got {}",
			MAX_BLOBS, count
		)));
	}

	let blobs = (0..count)
		.map(|i| {
			let mut blob = Blob::default();
			blob[0] = i as u8 + 1;
			blob
		})
		.collect::<Vec<_>>();

	BlobTransactionSidecar::try_from_blobs(blobs).map_err(|e| BuilderError::Blob(e.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_sidecar_shape() {
		let sidecar = build_sidecar(3).unwrap();
		assert_eq!(sidecar.blobs.len(), 3);
		assert_eq!(sidecar.commitments.len(), 3);
		assert_eq!(sidecar.proofs.len(), 3);
		assert_eq!(sidecar.blobs[2][0], 3);

		let hashes: Vec<_> = sidecar.versioned_hashes().collect();
		assert_eq!(hashes.len(), 3);
		assert_ne!(hashes[0], hashes[1]);
	}

	#[test]
	fn test_count_bounds() {
		assert!(build_sidecar(0).is_err());
		assert!(build_sidecar(MAX_BLOBS + 1).is_err());
	}
}
