//! Transaction delivery module for the transaction spammer.
//!
//! This module hands signed transactions to the node under test and reads back
//! what the watcher and the nonce initialisation need: receipts and the
//! pending nonce of a sender. The pipeline never builds JSON-RPC requests
//! itself; it only talks to a [`DeliveryInterface`].

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use spammer_types::{
	truncate_id, ConfigSchema, ImplementationRegistry, TransactionHash, TransactionReceipt,
};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
	pub mod memory;
}

/// Errors that can occur during transaction delivery operations.
#[derive(Debug, Error)]
pub enum DeliveryError {
	/// Error that occurs during network communication.
	#[error("Network error: {0}")]
	Network(String),
	/// Error that occurs when the endpoint rejects a transaction.
	#[error("Transaction failed: {0}")]
	TransactionFailed(String),
	/// Error in the delivery configuration.
	#[error("Invalid configuration: {0}")]
	Configuration(String),
}

/// Trait defining the interface for transaction delivery endpoints.
///
/// Implementations receive fully signed, EIP-2718 encoded transactions and
/// never sign anything themselves.
#[async_trait]
pub trait DeliveryInterface: Send + Sync {
	/// Returns the configuration schema for this delivery implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Submits a raw signed transaction and returns its hash.
	async fn submit_raw(&self, raw: &Bytes) -> Result<TransactionHash, DeliveryError>;

	/// Retrieves the receipt for a transaction if it has been included.
	///
	/// `Ok(None)` means the endpoint does not know of an inclusion yet.
	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError>;

	/// Returns the nonce of `address` including pending transactions.
	async fn get_pending_nonce(&self, address: Address) -> Result<u64, DeliveryError>;
}

/// Type alias for delivery factory functions.
pub type DeliveryFactory = fn(&toml::Value) -> Result<Box<dyn DeliveryInterface>, DeliveryError>;

/// Registry trait for delivery implementations.
pub trait DeliveryRegistry: ImplementationRegistry<Factory = DeliveryFactory> {}

/// Get all registered delivery implementations.
///
/// Returns a vector of (name, factory) tuples for all available delivery implementations.
pub fn get_all_implementations() -> Vec<(&'static str, DeliveryFactory)> {
	use implementations::{evm::alloy, memory};

	vec![
		(alloy::Registry::NAME, alloy::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// Service that forwards pipeline traffic to the configured endpoint.
pub struct DeliveryService {
	/// The underlying delivery implementation.
	implementation: Box<dyn DeliveryInterface>,
}

impl DeliveryService {
	/// Creates a new DeliveryService with the specified implementation.
	pub fn new(implementation: Box<dyn DeliveryInterface>) -> Self {
		Self { implementation }
	}

	/// Submits a raw signed transaction.
	pub async fn submit(&self, raw: &Bytes) -> Result<TransactionHash, DeliveryError> {
		let hash = self.implementation.submit_raw(raw).await?;
		tracing::trace!(tx_hash = %truncate_id(&hash.to_hex()), "Submitted transaction");
		Ok(hash)
	}

	/// Polls once for the receipt of `hash`.
	pub async fn receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		self.implementation.get_receipt(hash).await
	}

	/// Fetches the pending nonce of `address`.
	pub async fn pending_nonce(&self, address: Address) -> Result<u64, DeliveryError> {
		let nonce = self.implementation.get_pending_nonce(address).await?;
		tracing::debug!(sender = %address, nonce, "Fetched pending nonce");
		Ok(nonce)
	}
}
