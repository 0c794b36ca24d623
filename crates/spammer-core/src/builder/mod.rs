//! Builder pattern for constructing spammer engines.
//!
//! Composes a [`SpammerEngine`] from the configuration and factory functions
//! for the pluggable account, delivery and storage implementations, then
//! prepares everything a run needs before it starts: the sender accounts,
//! the deployment plan and one immutable [`WorkloadSpec`] per enabled
//! workload.

use crate::deployer::{Deployer, DeploymentPlan};
use crate::engine::{RunState, SpammerEngine};
use crate::generator::targets::{load_destinations, ContractPool, DestinationSource};
use crate::generator::{tick_interval, Payload, WorkloadSpec};
use crate::tx::abi::{CallEncoder, JsonAbiEncoder};
use crate::tx::{blob, GasParams, TransactionBuilder};
use crate::SpammerError;
use alloy_primitives::{Address, Bytes, U256};
use spammer_account::{AccountError, AccountInterface, AccountService, ChainSigner};
use spammer_config::{BlobConfig, CallConfig, Config, SendConfig};
use spammer_delivery::{DeliveryError, DeliveryInterface, DeliveryService};
use spammer_storage::{StorageError, StorageInterface, StorageService};
use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Container for all factory functions needed to build a SpammerEngine.
///
/// Each factory takes the implementation's TOML table and returns the
/// implementation, validating the table on the way.
pub struct SpammerFactories<AF, DF, SF> {
	pub account_factories: HashMap<String, AF>,
	pub delivery_factories: HashMap<String, DF>,
	pub storage_factories: HashMap<String, SF>,
}

/// Builder for constructing a SpammerEngine with pluggable implementations.
pub struct SpammerBuilder {
	config: Config,
}

impl SpammerBuilder {
	/// Creates a new SpammerBuilder with the given configuration.
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Builds the SpammerEngine using factories for each component type.
	pub async fn build<AF, DF, SF>(
		self,
		factories: SpammerFactories<AF, DF, SF>,
	) -> Result<SpammerEngine, SpammerError>
	where
		AF: Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>,
		DF: Fn(&toml::Value) -> Result<Box<dyn DeliveryInterface>, DeliveryError>,
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
	{
		let config = self.config;

		let storage = Arc::new(StorageService::new(load_primary(
			"storage",
			&config.storage.primary,
			&config.storage.implementations,
			&factories.storage_factories,
		)?));
		let delivery = Arc::new(DeliveryService::new(load_primary(
			"delivery",
			&config.delivery.primary,
			&config.delivery.implementations,
			&factories.delivery_factories,
		)?));
		let account = AccountService::new(load_primary(
			"account",
			&config.account.primary,
			&config.account.implementations,
			&factories.account_factories,
		)?);

		let accounts = account.accounts().await.map_err(|e| {
			tracing::error!(component = "account", error = %e, "Failed to load accounts");
			SpammerError::Config(format!("Failed to load accounts: {}", e))
		})?;

		let builder = Arc::new(TransactionBuilder::new(ChainSigner::new(
			config.spammer.chain_id,
		)));

		let deployment = match &config.deployment {
			Some(deployment) if deployment.number > 0 => {
				let init_code = deployment
					.init_code()
					.map_err(|e| SpammerError::Config(e.to_string()))?;
				Some(DeploymentPlan {
					rounds: deployment.number,
					init_code: Bytes::from(init_code),
					gas: GasParams {
						gas_limit: deployment.gas_limit,
						max_fee_per_gas: deployment.max_fee_per_gas,
						max_priority_fee_per_gas: deployment.max_priority_fee_per_gas,
					},
					value: U256::from(deployment.value),
					interval: Duration::from_millis(deployment.interval_ms),
				})
			},
			_ => None,
		};

		let mut workloads = Vec::new();
		if let Some(send) = config.send.as_ref().filter(|s| s.total_number > 0) {
			workloads.push(send_workload(send).await?);
		}
		if let Some(call) = config.call.as_ref().filter(|c| c.total_number > 0) {
			workloads.push(call_workload(call).await?);
		}
		if let Some(blob) = config.blob.as_ref().filter(|b| b.total_number > 0) {
			workloads.push(blob_workload(blob).await?);
		}

		for spec in &workloads {
			tracing::info!(
				component = "workload",
				kind = %spec.kind(),
				total_number = spec.total_number,
				frequency_ms = spec.frequency.as_millis() as u64,
				"Loaded"
			);
		}

		let (state, _) = watch::channel(RunState::NotStarted);
		Ok(SpammerEngine {
			settings: config.spammer,
			watcher: config.watcher,
			accounts,
			delivery: delivery.clone(),
			builder: builder.clone(),
			deployer: Deployer::new(delivery, storage, builder),
			deployment,
			workloads,
			shutdown: CancellationToken::new(),
			halt: CancellationToken::new(),
			state,
			started: AtomicBool::new(false),
		})
	}
}

/// Creates the configured implementations of one component and returns
/// the primary one.
fn load_primary<T, E, F>(
	component: &'static str,
	primary: &str,
	configs: &HashMap<String, toml::Value>,
	factories: &HashMap<String, F>,
) -> Result<Box<T>, SpammerError>
where
	T: ?Sized,
	E: Display,
	F: Fn(&toml::Value) -> Result<Box<T>, E>,
{
	let mut loaded = HashMap::new();
	for (name, config) in configs {
		let Some(factory) = factories.get(name) else {
			tracing::warn!(component, implementation = %name, "No factory registered, skipping");
			continue;
		};
		match factory(config) {
			Ok(implementation) => {
				// Validation already happened in the factory
				let is_primary = name == primary;
				tracing::info!(component, implementation = %name, enabled = %is_primary, "Loaded");
				loaded.insert(name.clone(), implementation);
			},
			Err(e) => {
				tracing::error!(
					component,
					implementation = %name,
					error = %e,
					"Failed to create implementation"
				);
				return Err(SpammerError::Config(format!(
					"Failed to create {} implementation '{}': {}",
					component, name, e
				)));
			},
		}
	}

	loaded.remove(primary).ok_or_else(|| {
		SpammerError::Config(format!(
			"Primary {} '{}' failed to load or has no registered factory",
			component, primary
		))
	})
}

async fn destinations(
	listed: &[Address],
	file: Option<&Path>,
	seed: Option<Address>,
) -> Result<DestinationSource, SpammerError> {
	let mut addresses = listed.to_vec();
	if let Some(path) = file {
		let loaded = load_destinations(path)
			.await
			.map_err(|e| SpammerError::Config(e.to_string()))?;
		tracing::info!(path = %path.display(), count = loaded.len(), "Loaded destinations");
		addresses.extend(loaded);
	}
	Ok(DestinationSource::new(addresses, seed))
}

async fn send_workload(send: &SendConfig) -> Result<WorkloadSpec, SpammerError> {
	Ok(WorkloadSpec {
		frequency: tick_interval(send.frequency_ms),
		total_number: send.total_number,
		gas: GasParams {
			gas_limit: send.gas_limit,
			max_fee_per_gas: send.max_fee_per_gas,
			max_priority_fee_per_gas: send.max_priority_fee_per_gas,
		},
		value: U256::from(send.amount),
		payload: Payload::Transfer {
			destinations: destinations(
				&send.destinations,
				send.destination_file.as_deref(),
				send.destination_seed,
			)
			.await?,
		},
	})
}

async fn call_workload(call: &CallConfig) -> Result<WorkloadSpec, SpammerError> {
	let encoder = JsonAbiEncoder::from_file(&call.abi_path)
		.await
		.map_err(|e| SpammerError::Config(format!("{}: {}", call.abi_path.display(), e)))?;
	if !encoder.has_method(&call.method_name) {
		return Err(SpammerError::Config(format!(
			"Method '{}' not found in {}",
			call.method_name,
			call.abi_path.display()
		)));
	}

	Ok(WorkloadSpec {
		frequency: tick_interval(call.frequency_ms),
		total_number: call.total_number,
		gas: GasParams {
			gas_limit: call.gas_limit,
			max_fee_per_gas: call.max_fee_per_gas,
			max_priority_fee_per_gas: call.max_priority_fee_per_gas,
		},
		value: U256::from(call.amount),
		payload: Payload::Call {
			contracts: ContractPool::new(call.contracts.clone()),
			encoder: Arc::new(encoder),
			method: call.method_name.clone(),
			args: call.args.clone(),
		},
	})
}

async fn blob_workload(blob: &BlobConfig) -> Result<WorkloadSpec, SpammerError> {
	let sidecar = blob::build_sidecar(blob.blob_count)
		.map_err(|e| SpammerError::Config(format!("blob: {}", e)))?;

	Ok(WorkloadSpec {
		frequency: tick_interval(blob.frequency_ms),
		total_number: blob.total_number,
		gas: GasParams {
			gas_limit: blob.gas_limit,
			max_fee_per_gas: blob.max_fee_per_gas,
			max_priority_fee_per_gas: blob.max_priority_fee_per_gas,
		},
		value: U256::from(blob.amount),
		payload: Payload::Blob {
			destinations: destinations(
				&blob.destinations,
				blob.destination_file.as_deref(),
				blob.destination_seed,
			)
			.await?,
			sidecar,
			max_fee_per_blob_gas: blob.max_fee_per_blob_gas,
		},
	})
}
