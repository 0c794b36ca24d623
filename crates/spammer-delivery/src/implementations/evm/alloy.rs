//! JSON-RPC delivery for EVM nodes using the Alloy library.
//!
//! Transactions arrive already signed, so the provider is a bare
//! [`RootProvider`] over HTTP without wallet or filler layers.

use crate::{DeliveryError, DeliveryFactory, DeliveryInterface, DeliveryRegistry};
use alloy_network::{Ethereum, ReceiptResponse};
use alloy_primitives::{Address, Bytes};
use alloy_provider::{Provider, RootProvider};
use async_trait::async_trait;
use spammer_types::{
	truncate_id, ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, TransactionHash,
	TransactionReceipt, ValidationError,
};

/// Alloy-based EVM delivery implementation.
pub struct AlloyDelivery {
	provider: RootProvider<Ethereum>,
	url: String,
}

impl AlloyDelivery {
	/// Creates a delivery endpoint for `rpc_url`.
	///
	/// A bare `host:port` is treated as plain HTTP.
	pub fn new(rpc_url: &str) -> Result<Self, DeliveryError> {
		let normalized = normalize_rpc_url(rpc_url);
		let url: reqwest::Url = normalized.parse().map_err(|e| {
			DeliveryError::Configuration(format!("Invalid RPC URL '{}': {}", normalized, e))
		})?;

		Ok(Self {
			provider: RootProvider::new_http(url),
			url: normalized,
		})
	}
}

/// Prepends `http://` to URLs given without a scheme.
pub fn normalize_rpc_url(rpc_url: &str) -> String {
	let trimmed = rpc_url.trim();
	if trimmed.contains("://") {
		trimmed.to_string()
	} else {
		format!("http://{}", trimmed)
	}
}

#[async_trait]
impl DeliveryInterface for AlloyDelivery {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(AlloyDeliverySchema)
	}

	async fn submit_raw(&self, raw: &Bytes) -> Result<TransactionHash, DeliveryError> {
		let pending = self
			.provider
			.send_raw_transaction(raw)
			.await
			.map_err(|e| DeliveryError::TransactionFailed(e.to_string()))?;

		Ok(TransactionHash(*pending.tx_hash()))
	}

	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		let receipt = self
			.provider
			.get_transaction_receipt(hash.0)
			.await
			.map_err(|e| {
				DeliveryError::Network(format!(
					"Failed to get receipt for {}: {}",
					truncate_id(&hash.to_hex()),
					e
				))
			})?;

		Ok(receipt.map(|receipt| TransactionReceipt {
			hash: TransactionHash(receipt.transaction_hash()),
			block_number: receipt.block_number().unwrap_or(0),
			success: receipt.status(),
		}))
	}

	async fn get_pending_nonce(&self, address: Address) -> Result<u64, DeliveryError> {
		self.provider
			.get_transaction_count(address)
			.pending()
			.await
			.map_err(|e| {
				DeliveryError::Network(format!(
					"Failed to get pending nonce from {}: {}",
					self.url, e
				))
			})
	}
}

/// Configuration schema for the Alloy delivery endpoint.
pub struct AlloyDeliverySchema;

impl ConfigSchema for AlloyDeliverySchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![
				Field::new("rpc_url", FieldType::String).with_validator(|value| {
					match value.as_str() {
						Some(url) if url.trim().is_empty() => Err("rpc_url cannot be empty".into()),
						_ => Ok(()),
					}
				}),
			],
			vec![],
		);
		schema.validate(config)
	}
}

/// Factory function to create the Alloy delivery endpoint.
///
/// Configuration parameters:
/// - `rpc_url`: node JSON-RPC endpoint, `http(s)://...` or bare `host:port`
pub fn create_delivery(config: &toml::Value) -> Result<Box<dyn DeliveryInterface>, DeliveryError> {
	AlloyDeliverySchema
		.validate(config)
		.map_err(|e| DeliveryError::Configuration(e.to_string()))?;

	let rpc_url = config
		.get("rpc_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| DeliveryError::Configuration("rpc_url is required".into()))?;

	let delivery = AlloyDelivery::new(rpc_url)?;
	tracing::info!(rpc_url = %delivery.url, "Created RPC delivery");
	Ok(Box::new(delivery))
}

/// Registry for the Alloy delivery implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "evm_alloy";
	type Factory = DeliveryFactory;

	fn factory() -> Self::Factory {
		create_delivery
	}
}

impl DeliveryRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_bare_host_gets_scheme() {
		assert_eq!(normalize_rpc_url("localhost:8545"), "http://localhost:8545");
		assert_eq!(
			normalize_rpc_url(" https://rpc.example.org "),
			"https://rpc.example.org"
		);
	}

	#[test]
	fn test_factory_validates_config() {
		let missing: toml::Value = toml::from_str("other = 1").unwrap();
		assert!(matches!(
			create_delivery(&missing),
			Err(DeliveryError::Configuration(_))
		));

		let empty: toml::Value = toml::from_str(r#"rpc_url = "  ""#).unwrap();
		assert!(create_delivery(&empty).is_err());

		let ok: toml::Value = toml::from_str(r#"rpc_url = "127.0.0.1:8545""#).unwrap();
		assert!(create_delivery(&ok).is_ok());
	}
}
