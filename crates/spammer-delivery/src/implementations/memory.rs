//! In-process delivery endpoint.
//!
//! Records every submitted transaction in a [`MemoryLedger`] instead of
//! sending it anywhere. Used for dry runs and by the end-to-end tests, which
//! hold a clone of the ledger handle to inspect what the pipeline produced.

use crate::{DeliveryError, DeliveryFactory, DeliveryInterface, DeliveryRegistry};
use alloy_consensus::TxEnvelope;
use alloy_eips::eip2718::Decodable2718;
use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use spammer_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, TransactionHash,
	TransactionReceipt, ValidationError,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Everything the memory endpoint has seen.
#[derive(Debug, Default)]
pub struct MemoryLedger {
	accepted: Vec<Bytes>,
	rejected: Vec<Bytes>,
	positions: HashMap<B256, usize>,
	polls: HashMap<B256, u64>,
}

impl MemoryLedger {
	/// Raw transactions in the order they were accepted.
	pub fn accepted(&self) -> &[Bytes] {
		&self.accepted
	}

	/// Raw transactions that were rejected.
	pub fn rejected(&self) -> &[Bytes] {
		&self.rejected
	}

	/// Decodes the accepted transactions.
	pub fn decoded(&self) -> Vec<TxEnvelope> {
		self.accepted
			.iter()
			.filter_map(|raw| TxEnvelope::decode_2718(&mut raw.as_ref()).ok())
			.collect()
	}
}

/// Shared handle on a ledger.
pub type SharedLedger = Arc<RwLock<MemoryLedger>>;

/// Behaviour knobs of the memory endpoint.
#[derive(Debug, Clone, Default)]
pub struct MemoryOptions {
	/// Reject every n-th submission, counting from one.
	pub reject_every: Option<u64>,
	/// Pending nonce reported for every address.
	pub initial_nonce: u64,
	/// Receipt polls answered with "not yet" before a receipt is returned.
	pub receipt_after: u64,
}

/// Delivery implementation that records instead of sending.
pub struct MemoryDelivery {
	ledger: SharedLedger,
	options: MemoryOptions,
}

impl MemoryDelivery {
	pub fn new(options: MemoryOptions) -> Self {
		Self::with_ledger(SharedLedger::default(), options)
	}

	/// Creates an endpoint writing into an existing ledger.
	pub fn with_ledger(ledger: SharedLedger, options: MemoryOptions) -> Self {
		Self { ledger, options }
	}

	/// Returns a handle on the ledger.
	pub fn ledger(&self) -> SharedLedger {
		self.ledger.clone()
	}

	fn options_from_config(config: &toml::Value) -> MemoryOptions {
		let int = |key: &str| {
			config
				.get(key)
				.and_then(|v| v.as_integer())
				.map(|v| v as u64)
		};
		MemoryOptions {
			reject_every: int("reject_every").filter(|n| *n > 0),
			initial_nonce: int("initial_nonce").unwrap_or(0),
			receipt_after: int("receipt_after").unwrap_or(0),
		}
	}
}

#[async_trait]
impl DeliveryInterface for MemoryDelivery {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryDeliverySchema)
	}

	async fn submit_raw(&self, raw: &Bytes) -> Result<TransactionHash, DeliveryError> {
		let envelope = TxEnvelope::decode_2718(&mut raw.as_ref()).map_err(|e| {
			DeliveryError::TransactionFailed(format!("Undecodable transaction: {}", e))
		})?;
		let hash = *envelope.tx_hash();

		let mut ledger = self.ledger.write().await;
		let attempt = (ledger.accepted.len() + ledger.rejected.len()) as u64 + 1;
		if let Some(every) = self.options.reject_every {
			if attempt % every == 0 {
				ledger.rejected.push(raw.clone());
				return Err(DeliveryError::TransactionFailed(format!(
					"submission {} rejected",
					attempt
				)));
			}
		}

		let position = ledger.accepted.len();
		ledger.accepted.push(raw.clone());
		ledger.positions.insert(hash, position);
		Ok(TransactionHash(hash))
	}

	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		let mut ledger = self.ledger.write().await;
		let Some(position) = ledger.positions.get(&hash.0).copied() else {
			return Ok(None);
		};

		let polls = ledger.polls.entry(hash.0).or_insert(0);
		*polls += 1;
		if *polls <= self.options.receipt_after {
			return Ok(None);
		}

		Ok(Some(TransactionReceipt {
			hash: *hash,
			block_number: position as u64 + 1,
			success: true,
		}))
	}

	async fn get_pending_nonce(&self, _address: Address) -> Result<u64, DeliveryError> {
		Ok(self.options.initial_nonce)
	}
}

/// Configuration schema for MemoryDelivery.
pub struct MemoryDeliverySchema;

impl ConfigSchema for MemoryDeliverySchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let non_negative = || FieldType::Integer {
			min: Some(0),
			max: None,
		};
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("reject_every", non_negative()),
				Field::new("initial_nonce", non_negative()),
				Field::new("receipt_after", non_negative()),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create a memory delivery endpoint.
///
/// Configuration parameters:
/// - `reject_every`: reject every n-th submission (optional)
/// - `initial_nonce`: pending nonce reported for all senders (default 0)
/// - `receipt_after`: polls before a receipt is reported (default 0)
pub fn create_delivery(config: &toml::Value) -> Result<Box<dyn DeliveryInterface>, DeliveryError> {
	MemoryDeliverySchema
		.validate(config)
		.map_err(|e| DeliveryError::Configuration(e.to_string()))?;

	Ok(Box::new(MemoryDelivery::new(
		MemoryDelivery::options_from_config(config),
	)))
}

/// Registry for the memory delivery implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = DeliveryFactory;

	fn factory() -> Self::Factory {
		create_delivery
	}
}

impl DeliveryRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_consensus::{SignableTransaction, TxEip1559};
	use alloy_eips::eip2718::Encodable2718;
	use alloy_primitives::{TxKind, U256};
	use alloy_signer::SignerSync;
	use alloy_signer_local::PrivateKeySigner;

	fn raw_transfer(nonce: u64) -> Bytes {
		let signer = PrivateKeySigner::random();
		let tx = TxEip1559 {
			chain_id: 1337,
			nonce,
			gas_limit: 21_000,
			max_fee_per_gas: 2,
			max_priority_fee_per_gas: 1,
			to: TxKind::Call(Address::with_last_byte(9)),
			value: U256::from(1),
			..Default::default()
		};
		let signature = signer.sign_hash_sync(&tx.signature_hash()).unwrap();
		let envelope = TxEnvelope::Eip1559(tx.into_signed(signature));
		Bytes::from(envelope.encoded_2718())
	}

	#[tokio::test]
	async fn test_records_in_order() {
		let delivery = MemoryDelivery::new(MemoryOptions::default());
		let first = raw_transfer(0);
		let second = raw_transfer(1);

		delivery.submit_raw(&first).await.unwrap();
		delivery.submit_raw(&second).await.unwrap();

		let ledger = delivery.ledger();
		let ledger = ledger.read().await;
		assert_eq!(ledger.accepted(), &[first, second]);
		assert_eq!(ledger.decoded().len(), 2);
	}

	#[tokio::test]
	async fn test_rejects_garbage() {
		let delivery = MemoryDelivery::new(MemoryOptions::default());
		let result = delivery.submit_raw(&Bytes::from_static(b"\x02garbage")).await;
		assert!(matches!(result, Err(DeliveryError::TransactionFailed(_))));
	}

	#[tokio::test]
	async fn test_reject_every() {
		let delivery = MemoryDelivery::new(MemoryOptions {
			reject_every: Some(2),
			..Default::default()
		});

		assert!(delivery.submit_raw(&raw_transfer(0)).await.is_ok());
		assert!(delivery.submit_raw(&raw_transfer(1)).await.is_err());
		assert!(delivery.submit_raw(&raw_transfer(2)).await.is_ok());

		let ledger = delivery.ledger();
		let ledger = ledger.read().await;
		assert_eq!(ledger.accepted().len(), 2);
		assert_eq!(ledger.rejected().len(), 1);
	}

	#[tokio::test]
	async fn test_receipt_after_polls() {
		let delivery = MemoryDelivery::new(MemoryOptions {
			receipt_after: 2,
			..Default::default()
		});
		let hash = delivery.submit_raw(&raw_transfer(0)).await.unwrap();

		assert!(delivery.get_receipt(&hash).await.unwrap().is_none());
		assert!(delivery.get_receipt(&hash).await.unwrap().is_none());
		let receipt = delivery.get_receipt(&hash).await.unwrap().unwrap();
		assert_eq!(receipt.block_number, 1);
		assert!(receipt.success);

		let unknown = TransactionHash(B256::repeat_byte(1));
		assert!(delivery.get_receipt(&unknown).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_factory_options() {
		let config: toml::Value = toml::from_str("initial_nonce = 7").unwrap();
		let delivery = create_delivery(&config).unwrap();
		assert_eq!(
			delivery.get_pending_nonce(Address::ZERO).await.unwrap(),
			7
		);
	}
}
