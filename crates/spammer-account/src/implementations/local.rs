//! Accounts configured inline in the TOML file.
//!
//! Each entry of `keys` carries a private key and, optionally, the nonce the
//! sender starts at. Accounts are returned in the order they are listed.

use crate::{AccountError, AccountFactory, AccountInterface, AccountRegistry, SenderAccount};
use async_trait::async_trait;
use spammer_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, SecretString, ValidationError,
};

/// A private key with its optional starting nonce.
struct KeyEntry {
	private_key: SecretString,
	starting_nonce: Option<u64>,
}

/// Account source backed by keys in the configuration.
pub struct LocalAccounts {
	keys: Vec<KeyEntry>,
}

impl LocalAccounts {
	/// Parses the `keys` array of an already validated configuration.
	fn from_config(config: &toml::Value) -> Result<Self, AccountError> {
		let entries = config
			.get("keys")
			.and_then(|v| v.as_array())
			.ok_or_else(|| AccountError::Implementation("keys is required".into()))?;

		let mut keys = Vec::with_capacity(entries.len());
		for entry in entries {
			let private_key = entry
				.get("private_key")
				.and_then(|v| v.as_str())
				.ok_or_else(|| AccountError::Implementation("private_key is required".into()))?;
			let starting_nonce = entry
				.get("starting_nonce")
				.and_then(|v| v.as_integer())
				.map(|n| n as u64);
			keys.push(KeyEntry {
				private_key: SecretString::from(private_key),
				starting_nonce,
			});
		}

		Ok(Self { keys })
	}
}

#[async_trait]
impl AccountInterface for LocalAccounts {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LocalAccountsSchema)
	}

	async fn load_accounts(&self) -> Result<Vec<SenderAccount>, AccountError> {
		self.keys
			.iter()
			.map(|entry| SenderAccount::from_private_key(&entry.private_key, entry.starting_nonce))
			.collect()
	}
}

/// Configuration schema for LocalAccounts.
pub struct LocalAccountsSchema;

impl LocalAccountsSchema {
	fn key_schema() -> Schema {
		Schema::new(
			vec![Field::new("private_key", FieldType::Hex { bytes: Some(32) })],
			vec![Field::new(
				"starting_nonce",
				FieldType::Integer {
					min: Some(0),
					max: None,
				},
			)],
		)
	}
}

impl ConfigSchema for LocalAccountsSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new(
				"keys",
				FieldType::Array(Box::new(FieldType::Table(Self::key_schema()))),
			)
			.with_validator(|value| match value.as_array() {
				Some(keys) if keys.is_empty() => Err("At least one key is required".into()),
				_ => Ok(()),
			})],
			vec![],
		);
		schema.validate(config)
	}
}

/// Factory function to create the local account source from configuration.
///
/// Configuration parameters:
/// - `keys`: array of `{ private_key, starting_nonce? }` tables
pub fn create_account(config: &toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> {
	LocalAccountsSchema
		.validate(config)
		.map_err(|e| AccountError::Implementation(format!("Invalid configuration: {}", e)))?;

	Ok(Box::new(LocalAccounts::from_config(config)?))
}

/// Registry for the local account implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "local";
	type Factory = AccountFactory;

	fn factory() -> Self::Factory {
		create_account
	}
}

impl AccountRegistry for Registry {}
