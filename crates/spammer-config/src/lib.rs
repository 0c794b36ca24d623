//! Configuration module for the transaction spammer.
//!
//! This module provides the structures that describe a load-generation run:
//! which accounts send, which endpoint receives, where deployed contract
//! addresses are recorded, and the cadence, count and fee parameters of each
//! workload class. Configuration is read from TOML and validated before any
//! worker starts.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files:
//! - Use `include = ["accounts.toml", "workloads.toml"]` to include other files
//! - Each top-level section must be unique across all files (no duplicates allowed)
//!
//! ## Environment Variables
//!
//! Any value may reference `${NAME}` or `${NAME:-default}`.

mod loader;

use regex::Regex;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use spammer_types::{without_0x_prefix, Address};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message, drop the echoed input
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for a spammer run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Run-wide settings.
	pub spammer: SpammerConfig,
	/// Source of the sender accounts.
	pub account: AccountConfig,
	/// RPC endpoint that receives the signed transactions.
	pub delivery: DeliveryConfig,
	/// Sink for deployed contract addresses.
	pub storage: StorageConfig,
	/// Pending-transaction watcher settings.
	#[serde(default)]
	pub watcher: WatcherConfig,
	/// Contracts deployed before any other workload starts.
	pub deployment: Option<DeploymentConfig>,
	/// Value transfer workload.
	pub send: Option<SendConfig>,
	/// Contract call workload.
	pub call: Option<CallConfig>,
	/// Blob transaction workload.
	pub blob: Option<BlobConfig>,
}

/// Run-wide settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpammerConfig {
	/// Identifier used in logs.
	pub id: String,
	/// Chain id every transaction is signed for.
	pub chain_id: u64,
	/// Whether a rejected submission stops the whole run.
	#[serde(default = "default_stop_on_send_error")]
	pub stop_on_send_error: bool,
	/// Capacity of the channel between generators and the submission stage.
	#[serde(default = "default_channel_capacity")]
	pub channel_capacity: usize,
	/// Delay before generation starts, after deployments.
	#[serde(default)]
	pub start_delay_ms: u64,
	/// Where each sender's first nonce comes from.
	#[serde(default)]
	pub nonce_source: NonceSource,
}

/// Returns the default stop-on-send-error policy.
///
/// A rejected transaction usually means every later nonce from the same
/// sender will be rejected too, so the run stops by default.
fn default_stop_on_send_error() -> bool {
	true
}

/// Returns the default generator-to-submission channel capacity.
fn default_channel_capacity() -> usize {
	1024
}

/// Where the initial nonce of each sender comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NonceSource {
	/// Fetched once per sender from the endpoint's pending view. An explicit
	/// `starting_nonce` on the account still wins.
	#[default]
	Pending,
	/// Taken from each account's `starting_nonce`; a missing value is an error.
	Config,
}

/// Configuration for the account source.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	/// Which implementation to use.
	pub primary: String,
	/// Map of account implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for the delivery endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
	/// Which implementation to use.
	pub primary: String,
	/// Map of delivery implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for the deployment log sink.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for the pending-transaction watcher.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatcherConfig {
	/// Whether the watcher runs at all.
	#[serde(default = "default_watcher_enabled")]
	pub enabled: bool,
	/// Every n-th submitted transaction is polled for a receipt.
	#[serde(default = "default_sample_rate")]
	pub sample_rate: u64,
	/// First delay between receipt polls.
	#[serde(default = "default_initial_backoff_ms")]
	pub initial_backoff_ms: u64,
	/// Upper bound of the delay between receipt polls.
	#[serde(default = "default_max_backoff_ms")]
	pub max_backoff_ms: u64,
	/// Time after which a sampled transaction is given up on.
	#[serde(default = "default_max_elapsed_ms")]
	pub max_elapsed_ms: u64,
	/// Capacity of the queue between submission and the watcher.
	#[serde(default = "default_queue_capacity")]
	pub queue_capacity: usize,
}

fn default_watcher_enabled() -> bool {
	true
}

fn default_sample_rate() -> u64 {
	10
}

fn default_initial_backoff_ms() -> u64 {
	1
}

fn default_max_backoff_ms() -> u64 {
	5_000
}

fn default_max_elapsed_ms() -> u64 {
	120_000
}

fn default_queue_capacity() -> usize {
	1000
}

impl Default for WatcherConfig {
	fn default() -> Self {
		Self {
			enabled: default_watcher_enabled(),
			sample_rate: default_sample_rate(),
			initial_backoff_ms: default_initial_backoff_ms(),
			max_backoff_ms: default_max_backoff_ms(),
			max_elapsed_ms: default_max_elapsed_ms(),
			queue_capacity: default_queue_capacity(),
		}
	}
}

/// Configuration for the contract deployment phase.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeploymentConfig {
	/// Number of deployment rounds; each round deploys once per sender.
	pub number: u64,
	/// Init code as a hex string.
	pub hex_data: String,
	/// Gas limit of each deployment.
	pub gas_limit: u64,
	/// Fee cap in wei.
	#[serde(deserialize_with = "deserialize_wei")]
	pub max_fee_per_gas: u128,
	/// Priority fee in wei.
	#[serde(deserialize_with = "deserialize_wei")]
	pub max_priority_fee_per_gas: u128,
	/// Value sent with each deployment.
	#[serde(default, deserialize_with = "deserialize_wei")]
	pub value: u128,
	/// Pause between deployment rounds.
	#[serde(default = "default_deployment_interval_ms")]
	pub interval_ms: u64,
}

/// Returns the default pause between deployment rounds.
///
/// Gives the previous round time to be mined before the next one is sent.
fn default_deployment_interval_ms() -> u64 {
	15_000
}

impl DeploymentConfig {
	/// Decodes the configured init code.
	pub fn init_code(&self) -> Result<Vec<u8>, ConfigError> {
		hex::decode(without_0x_prefix(self.hex_data.trim())).map_err(|e| {
			ConfigError::Validation(format!("deployment.hex_data is not valid hex: {}", e))
		})
	}
}

/// Configuration for the value transfer workload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SendConfig {
	/// Delay between two transactions of the same sender.
	#[serde(default)]
	pub frequency_ms: u64,
	/// Transactions per sender; zero disables the workload.
	pub total_number: u64,
	/// Value of each transfer in wei.
	#[serde(default, deserialize_with = "deserialize_wei")]
	pub amount: u128,
	/// Gas limit of each transfer.
	#[serde(default = "default_transfer_gas_limit")]
	pub gas_limit: u64,
	/// Fee cap in wei.
	#[serde(deserialize_with = "deserialize_wei")]
	pub max_fee_per_gas: u128,
	/// Priority fee in wei.
	#[serde(deserialize_with = "deserialize_wei")]
	pub max_priority_fee_per_gas: u128,
	/// Explicit destinations, used round-robin.
	#[serde(default)]
	pub destinations: Vec<Address>,
	/// File with one destination address per line.
	pub destination_file: Option<PathBuf>,
	/// Seed for derived destinations when no list is given.
	pub destination_seed: Option<Address>,
}

/// Returns the gas limit of a plain transfer.
fn default_transfer_gas_limit() -> u64 {
	21_000
}

/// Configuration for the contract call workload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallConfig {
	/// Delay between two calls of the same sender.
	#[serde(default)]
	pub frequency_ms: u64,
	/// Calls per sender; zero disables the workload.
	pub total_number: u64,
	/// Value sent with each call in wei.
	#[serde(default, deserialize_with = "deserialize_wei")]
	pub amount: u128,
	/// Gas limit of each call.
	pub gas_limit: u64,
	/// Fee cap in wei.
	#[serde(deserialize_with = "deserialize_wei")]
	pub max_fee_per_gas: u128,
	/// Priority fee in wei.
	#[serde(deserialize_with = "deserialize_wei")]
	pub max_priority_fee_per_gas: u128,
	/// Path to the contract's JSON ABI.
	pub abi_path: PathBuf,
	/// Method to call.
	pub method_name: String,
	/// Argument templates. `{contract}`, `{sender}` and `{index}` are
	/// substituted per call.
	#[serde(default = "default_call_args")]
	pub args: Vec<String>,
	/// Explicit contract pool. Defaults to the deployed contracts.
	#[serde(default)]
	pub contracts: Vec<Address>,
}

/// Returns the default call arguments: the target contract and the call index.
fn default_call_args() -> Vec<String> {
	vec!["{contract}".to_string(), "{index}".to_string()]
}

/// Configuration for the blob transaction workload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BlobConfig {
	/// Delay between two blob transactions of the same sender.
	#[serde(default)]
	pub frequency_ms: u64,
	/// Blob transactions per sender; zero disables the workload.
	pub total_number: u64,
	/// Number of blobs attached to each transaction.
	#[serde(default = "default_blob_count")]
	pub blob_count: usize,
	/// Blob fee cap in wei.
	#[serde(deserialize_with = "deserialize_wei")]
	pub max_fee_per_blob_gas: u128,
	/// Value of each transaction in wei.
	#[serde(default, deserialize_with = "deserialize_wei")]
	pub amount: u128,
	/// Gas limit of each transaction.
	#[serde(default = "default_transfer_gas_limit")]
	pub gas_limit: u64,
	/// Fee cap in wei.
	#[serde(deserialize_with = "deserialize_wei")]
	pub max_fee_per_gas: u128,
	/// Priority fee in wei.
	#[serde(deserialize_with = "deserialize_wei")]
	pub max_priority_fee_per_gas: u128,
	/// Explicit destinations, used round-robin.
	#[serde(default)]
	pub destinations: Vec<Address>,
	/// File with one destination address per line.
	pub destination_file: Option<PathBuf>,
	/// Seed for derived destinations when no list is given.
	pub destination_seed: Option<Address>,
}

fn default_blob_count() -> usize {
	1
}

/// Most blobs a single transaction may carry.
pub const MAX_BLOBS_PER_TX: usize = 6;

/// Deserializes a wei amount from a TOML integer or a decimal string.
///
/// TOML integers stop at `i64::MAX`, so larger amounts are written as strings.
pub fn deserialize_wei<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
	D: Deserializer<'de>,
{
	struct WeiVisitor;

	impl Visitor<'_> for WeiVisitor {
		type Value = u128;

		fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
			f.write_str("a non-negative integer or a decimal string")
		}

		fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
			u128::try_from(v).map_err(|_| E::custom(format!("negative amount {}", v)))
		}

		fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
			Ok(v as u128)
		}

		fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
			v.trim()
				.parse::<u128>()
				.map_err(|e| E::custom(format!("invalid amount '{}': {}", v, e)))
		}
	}

	deserializer.deserialize_any(WeiVisitor)
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB to prevent ReDoS attacks.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last = 0;

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match std::env::var(var_name.as_str()) {
			Ok(v) => v,
			Err(_) => match cap.get(2) {
				Some(default) => default.as_str().to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name.as_str()
					)));
				},
			},
		};

		result.push_str(&input[last..full_match.start()]);
		result.push_str(&value);
		last = full_match.end();
	}
	result.push_str(&input[last..]);

	Ok(result)
}

fn require(condition: bool, message: impl Into<String>) -> Result<(), ConfigError> {
	if condition {
		Ok(())
	} else {
		Err(ConfigError::Validation(message.into()))
	}
}

fn validate_implementations(
	section: &str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
) -> Result<(), ConfigError> {
	require(
		!implementations.is_empty(),
		format!("At least one {} implementation must be configured", section),
	)?;
	require(
		!primary.is_empty(),
		format!("{} primary implementation cannot be empty", section),
	)?;
	require(
		implementations.contains_key(primary),
		format!(
			"Primary {} '{}' not found in implementations",
			section, primary
		),
	)
}

fn validate_fees(
	section: &str,
	gas_limit: u64,
	max_fee_per_gas: u128,
	max_priority_fee_per_gas: u128,
) -> Result<(), ConfigError> {
	require(
		gas_limit > 0,
		format!("{}.gas_limit must be greater than 0", section),
	)?;
	require(
		max_priority_fee_per_gas <= max_fee_per_gas,
		format!(
			"{}.max_priority_fee_per_gas ({}) exceeds max_fee_per_gas ({})",
			section, max_priority_fee_per_gas, max_fee_per_gas
		),
	)
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	///
	/// Each top-level section must be unique across all configuration files.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// Returns true if the deployment phase will deploy at least one contract.
	pub fn deploys_contracts(&self) -> bool {
		self.deployment.as_ref().is_some_and(|d| d.number > 0)
	}

	/// Validates the configuration to ensure all required fields are properly set.
	///
	/// Beyond field presence this checks that primaries point at configured
	/// implementations, that fee caps are consistent, that a call workload
	/// has contracts to target, and that at least one workload is enabled.
	fn validate(&self) -> Result<(), ConfigError> {
		require(!self.spammer.id.is_empty(), "Spammer ID cannot be empty")?;
		require(self.spammer.chain_id > 0, "spammer.chain_id must be greater than 0")?;
		require(
			self.spammer.channel_capacity > 0,
			"spammer.channel_capacity must be greater than 0",
		)?;

		validate_implementations(
			"account",
			&self.account.primary,
			&self.account.implementations,
		)?;
		validate_implementations(
			"delivery",
			&self.delivery.primary,
			&self.delivery.implementations,
		)?;
		validate_implementations(
			"storage",
			&self.storage.primary,
			&self.storage.implementations,
		)?;

		let watcher = &self.watcher;
		require(watcher.sample_rate > 0, "watcher.sample_rate must be greater than 0")?;
		require(
			watcher.initial_backoff_ms > 0,
			"watcher.initial_backoff_ms must be greater than 0",
		)?;
		require(
			watcher.max_backoff_ms >= watcher.initial_backoff_ms,
			"watcher.max_backoff_ms must not be below initial_backoff_ms",
		)?;
		require(
			watcher.queue_capacity > 0,
			"watcher.queue_capacity must be greater than 0",
		)?;

		let mut enabled = false;

		if let Some(deployment) = &self.deployment {
			if deployment.number > 0 {
				enabled = true;
				validate_fees(
					"deployment",
					deployment.gas_limit,
					deployment.max_fee_per_gas,
					deployment.max_priority_fee_per_gas,
				)?;
				require(
					!deployment.init_code()?.is_empty(),
					"deployment.hex_data cannot be empty",
				)?;
			}
		}

		if let Some(send) = &self.send {
			if send.total_number > 0 {
				enabled = true;
				validate_fees(
					"send",
					send.gas_limit,
					send.max_fee_per_gas,
					send.max_priority_fee_per_gas,
				)?;
			}
		}

		if let Some(call) = &self.call {
			if call.total_number > 0 {
				enabled = true;
				validate_fees(
					"call",
					call.gas_limit,
					call.max_fee_per_gas,
					call.max_priority_fee_per_gas,
				)?;
				require(
					!call.method_name.is_empty(),
					"call.method_name cannot be empty",
				)?;
				require(
					!call.abi_path.as_os_str().is_empty(),
					"call.abi_path cannot be empty",
				)?;
				require(
					!call.contracts.is_empty() || self.deploys_contracts(),
					"call workload needs call.contracts or a deployment section",
				)?;
			}
		}

		if let Some(blob) = &self.blob {
			if blob.total_number > 0 {
				enabled = true;
				validate_fees(
					"blob",
					blob.gas_limit,
					blob.max_fee_per_gas,
					blob.max_priority_fee_per_gas,
				)?;
				require(
					(1..=MAX_BLOBS_PER_TX).contains(&blob.blob_count),
					format!("blob.blob_count must be between 1 and {}", MAX_BLOBS_PER_TX),
				)?;
				require(
					blob.max_fee_per_blob_gas > 0,
					"blob.max_fee_per_blob_gas must be greater than 0",
				)?;
			}
		}

		require(
			enabled,
			"No workload configured: enable deployment, send, call or blob",
		)
	}
}

/// Parses configuration from a TOML string.
///
/// Environment variables are resolved first and the result is validated.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
