//! Key utilities: address and contract derivation, key generation.

use alloy_primitives::Address;
use spammer_account::implementations::key_dir::write_key_file;
use spammer_account::SenderAccount;
use spammer_types::SecretString;
use std::path::{Path, PathBuf};

/// Reads a private key given inline or as a file.
pub async fn load_key(
	key: Option<String>,
	key_file: Option<PathBuf>,
) -> Result<SenderAccount, Box<dyn std::error::Error>> {
	let key = match (key, key_file) {
		(Some(key), _) => SecretString::from(key),
		(None, Some(path)) => SecretString::from(
			tokio::fs::read_to_string(&path)
				.await
				.map_err(|e| format!("{}: {}", path.display(), e))?
				.trim(),
		),
		(None, None) => return Err("either --key or --key-file is required".into()),
	};
	Ok(SenderAccount::from_private_key(&key, None)?)
}

/// Address of the contract `sender` creates with `nonce`.
pub fn derive_contract(sender: Address, nonce: u64) -> Address {
	sender.create(nonce)
}

/// Writes `count` fresh keys into `dir` and returns their addresses.
pub async fn generate_keys(
	dir: &Path,
	count: usize,
) -> Result<Vec<(Address, PathBuf)>, Box<dyn std::error::Error>> {
	let mut written = Vec::with_capacity(count);
	for _ in 0..count {
		let account = SenderAccount::random();
		let path = write_key_file(dir, &account).await?;
		tracing::debug!(address = %account.address(), path = %path.display(), "Wrote key");
		written.push((account.address(), path));
	}
	Ok(written)
}
