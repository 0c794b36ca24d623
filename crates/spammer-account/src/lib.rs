//! Account management module for the transaction spammer.
//!
//! This module provides the sender accounts a run signs with. Accounts come
//! from a pluggable source (inline keys or a directory of key files), are
//! returned in a deterministic order, and sign through a [`ChainSigner`] bound
//! to the run's chain id.

use alloy_consensus::{SignableTransaction, Signed, Transaction};
use alloy_primitives::{Address, Signature};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use spammer_types::{without_0x_prefix, ConfigSchema, ImplementationRegistry, SecretString};
use std::fmt;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod key_dir;
	pub mod local;
}

/// Errors that can occur during account operations.
#[derive(Debug, Error)]
pub enum AccountError {
	/// Error that occurs when signing operations fail.
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	/// Error that occurs when a cryptographic key is invalid or malformed.
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	/// Error that occurs when interacting with the account implementation.
	#[error("Implementation error: {0}")]
	Implementation(String),
}

/// A sender: its address, its signing key and an optional configured nonce.
///
/// Accounts are created once at startup and held for the whole run. The key
/// never leaves this type except through [`SenderAccount::export_key`].
#[derive(Clone)]
pub struct SenderAccount {
	address: Address,
	signer: PrivateKeySigner,
	starting_nonce: Option<u64>,
}

impl SenderAccount {
	/// Builds an account from a hex private key.
	pub fn from_private_key(
		key: &SecretString,
		starting_nonce: Option<u64>,
	) -> Result<Self, AccountError> {
		let signer: PrivateKeySigner = key.with_exposed(|k| {
			without_0x_prefix(k.trim())
				.parse()
				.map_err(|e| AccountError::InvalidKey(format!("{}", e)))
		})?;
		Ok(Self::from_signer(signer, starting_nonce))
	}

	/// Generates an account with a fresh random key.
	pub fn random() -> Self {
		Self::from_signer(PrivateKeySigner::random(), None)
	}

	fn from_signer(signer: PrivateKeySigner, starting_nonce: Option<u64>) -> Self {
		Self {
			address: signer.address(),
			signer,
			starting_nonce,
		}
	}

	/// The sender address.
	pub fn address(&self) -> Address {
		self.address
	}

	/// Nonce configured for this account, if any.
	pub fn starting_nonce(&self) -> Option<u64> {
		self.starting_nonce
	}

	/// Exports the private key as 0x-prefixed hex.
	pub fn export_key(&self) -> SecretString {
		SecretString::new(format!("0x{}", hex::encode(self.signer.to_bytes())))
	}
}

impl fmt::Debug for SenderAccount {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SenderAccount")
			.field("address", &self.address)
			.field("starting_nonce", &self.starting_nonce)
			.finish()
	}
}

/// Signs transactions for one chain.
///
/// The transaction variant decides the signature payload; the signer only
/// checks the chain id and signs the hash with the owning sender's key.
#[derive(Debug, Clone, Copy)]
pub struct ChainSigner {
	chain_id: u64,
}

impl ChainSigner {
	pub fn new(chain_id: u64) -> Self {
		Self { chain_id }
	}

	pub fn chain_id(&self) -> u64 {
		self.chain_id
	}

	/// Signs `tx` with `account`'s key.
	///
	/// Fails if the transaction is bound to a different chain.
	pub fn sign<T>(&self, tx: T, account: &SenderAccount) -> Result<Signed<T>, AccountError>
	where
		T: SignableTransaction<Signature>,
	{
		if tx.chain_id() != Some(self.chain_id) {
			return Err(AccountError::SigningFailed(format!(
				"transaction chain id {:?} does not match signer chain id {}",
				tx.chain_id(),
				self.chain_id
			)));
		}

		let signature = account
			.signer
			.sign_hash_sync(&tx.signature_hash())
			.map_err(|e| AccountError::SigningFailed(e.to_string()))?;
		Ok(tx.into_signed(signature))
	}
}

/// Trait defining the interface for account sources.
#[async_trait]
pub trait AccountInterface: Send + Sync {
	/// Returns the configuration schema for this account implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Loads the sender accounts in a deterministic order.
	async fn load_accounts(&self) -> Result<Vec<SenderAccount>, AccountError>;
}

/// Type alias for account factory functions.
pub type AccountFactory = fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>;

/// Registry trait for account implementations.
pub trait AccountRegistry: ImplementationRegistry<Factory = AccountFactory> {}

/// Get all registered account implementations.
///
/// Returns a vector of (name, factory) tuples for all available account implementations.
pub fn get_all_implementations() -> Vec<(&'static str, AccountFactory)> {
	use implementations::{key_dir, local};

	vec![
		(local::Registry::NAME, local::Registry::factory()),
		(key_dir::Registry::NAME, key_dir::Registry::factory()),
	]
}

/// Service that manages the sender accounts.
pub struct AccountService {
	/// The underlying account source.
	implementation: Box<dyn AccountInterface>,
}

impl AccountService {
	/// Creates a new AccountService with the specified implementation.
	pub fn new(implementation: Box<dyn AccountInterface>) -> Self {
		Self { implementation }
	}

	/// Loads the sender accounts.
	///
	/// A run needs at least one sender, so an empty source is an error.
	pub async fn accounts(&self) -> Result<Vec<SenderAccount>, AccountError> {
		let accounts = self.implementation.load_accounts().await?;
		if accounts.is_empty() {
			return Err(AccountError::Implementation(
				"Account source returned no accounts".into(),
			));
		}
		tracing::info!(count = accounts.len(), "Loaded sender accounts");
		Ok(accounts)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_consensus::TxEip1559;
	use alloy_primitives::{TxKind, U256};

	pub(crate) const KEY: &str =
		"0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
	pub(crate) const KEY_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

	fn transfer(chain_id: u64) -> TxEip1559 {
		TxEip1559 {
			chain_id,
			nonce: 7,
			gas_limit: 21_000,
			max_fee_per_gas: 2,
			max_priority_fee_per_gas: 1,
			to: TxKind::Call(Address::with_last_byte(1)),
			value: U256::from(1),
			..Default::default()
		}
	}

	#[test]
	fn test_address_from_key() {
		let account = SenderAccount::from_private_key(&SecretString::from(KEY), Some(3)).unwrap();
		assert_eq!(account.address(), KEY_ADDRESS.parse::<Address>().unwrap());
		assert_eq!(account.starting_nonce(), Some(3));
	}

	#[test]
	fn test_invalid_key_rejected() {
		let result = SenderAccount::from_private_key(&SecretString::from("0x1234"), None);
		assert!(matches!(result, Err(AccountError::InvalidKey(_))));
	}

	#[test]
	fn test_export_round_trip() {
		let account = SenderAccount::random();
		let restored = SenderAccount::from_private_key(&account.export_key(), None).unwrap();
		assert_eq!(restored.address(), account.address());
	}

	#[test]
	fn test_debug_hides_key() {
		let account = SenderAccount::from_private_key(&SecretString::from(KEY), None).unwrap();
		let debug = format!("{:?}", account);
		assert!(!debug.contains("ac0974"));
	}

	#[test]
	fn test_sign_recovers_sender() {
		let account = SenderAccount::from_private_key(&SecretString::from(KEY), None).unwrap();
		let signer = ChainSigner::new(1337);

		let tx = transfer(1337);
		let hash = tx.signature_hash();
		let signed = signer.sign(tx, &account).unwrap();

		let recovered = signed
			.signature()
			.recover_address_from_prehash(&hash)
			.unwrap();
		assert_eq!(recovered, account.address());
	}

	#[test]
	fn test_sign_rejects_other_chain() {
		let account = SenderAccount::random();
		let signer = ChainSigner::new(1337);

		let result = signer.sign(transfer(1), &account);
		assert!(matches!(result, Err(AccountError::SigningFailed(_))));
	}
}
