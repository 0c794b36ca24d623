//! Contract deployment phase.
//!
//! Runs before any workload starts. Each round deploys the configured init
//! code once from every sender, then waits for the round interval. The
//! contract address is derived from sender and nonce, so nothing waits for a
//! receipt. Every deployed address is appended to the sender's deployment
//! log; a failed write is reported but does not stop the run.

use crate::nonce::NonceRegistry;
use crate::tx::{GasParams, TransactionBuilder, TransactionRequest};
use crate::{PipelineError, SpammerError, Stage};
use alloy_primitives::{Address, Bytes, U256};
use spammer_account::SenderAccount;
use spammer_delivery::DeliveryService;
use spammer_storage::StorageService;
use spammer_types::truncate_id;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// What the deployment phase sends.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
	/// Number of rounds. Each round deploys once per sender.
	pub rounds: u64,
	pub init_code: Bytes,
	pub gas: GasParams,
	pub value: U256,
	/// Pause between two rounds.
	pub interval: Duration,
}

/// Sends deployment transactions and records the resulting addresses.
pub struct Deployer {
	delivery: Arc<DeliveryService>,
	storage: Arc<StorageService>,
	builder: Arc<TransactionBuilder>,
}

impl Deployer {
	pub fn new(
		delivery: Arc<DeliveryService>,
		storage: Arc<StorageService>,
		builder: Arc<TransactionBuilder>,
	) -> Self {
		Self {
			delivery,
			storage,
			builder,
		}
	}

	/// Runs every round of `plan` and returns the deployed addresses in
	/// submission order.
	///
	/// Any build or submission failure is fatal. Cancellation stops between
	/// two deployments and returns what was deployed so far.
	#[instrument(skip_all, fields(rounds = plan.rounds, senders = accounts.len()))]
	pub async fn deploy(
		&self,
		plan: &DeploymentPlan,
		accounts: &[SenderAccount],
		nonces: &NonceRegistry,
		errors: &mpsc::UnboundedSender<PipelineError>,
		cancel: &CancellationToken,
	) -> Result<Vec<Address>, SpammerError> {
		let mut deployed = Vec::new();

		'rounds: for round in 0..plan.rounds {
			if round > 0 {
				tokio::select! {
					biased;
					_ = cancel.cancelled() => break 'rounds,
					_ = tokio::time::sleep(plan.interval) => {}
				}
			}

			for account in accounts {
				if cancel.is_cancelled() {
					break 'rounds;
				}
				let contract = self.deploy_one(plan, account, nonces).await?;

				if let Err(e) = self
					.storage
					.record_deployment(account.address(), contract)
					.await
				{
					tracing::warn!(contract = %contract, error = %e, "Failed to record deployment");
					let _ = errors.send(PipelineError::local(
						Stage::Persistence,
						format!("recording {}: {}", contract, e),
					));
				}
				deployed.push(contract);
			}

			tracing::info!(round = round + 1, deployed = deployed.len(), "Deployment round complete");
		}

		Ok(deployed)
	}

	async fn deploy_one(
		&self,
		plan: &DeploymentPlan,
		account: &SenderAccount,
		nonces: &NonceRegistry,
	) -> Result<Address, SpammerError> {
		let sender = account.address();
		self.builder
			.validate(&plan.gas, None)
			.map_err(|e| SpammerError::Deployment(e.to_string()))?;
		let nonce = nonces.claim(&sender).ok_or_else(|| {
			SpammerError::Deployment(format!("No nonce counter for sender {}", sender))
		})?;

		let request = TransactionRequest {
			sender,
			nonce,
			to: None,
			value: plan.value,
			gas: plan.gas,
			input: plan.init_code.clone(),
			blob: None,
		};
		let tx = self
			.builder
			.build(request, account)
			.map_err(|e| SpammerError::Deployment(e.to_string()))?;
		let contract = tx.contract_address.ok_or_else(|| {
			SpammerError::Deployment("Deployment produced no contract address".into())
		})?;

		self.delivery
			.submit(&tx.raw)
			.await
			.map_err(|e| SpammerError::Deployment(format!("{} nonce {}: {}", sender, nonce, e)))?;

		tracing::info!(
			sender = %sender,
			nonce,
			tx_hash = %truncate_id(&tx.hash.to_string()),
			contract = %contract,
			"Deployed contract"
		);
		Ok(contract)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use spammer_account::ChainSigner;
	use spammer_delivery::implementations::memory::{MemoryDelivery, MemoryOptions, SharedLedger};
	use spammer_storage::implementations::memory::MemoryStorage;
	use spammer_storage::{StorageError, StorageInterface};
	use spammer_types::ConfigSchema;

	fn plan(rounds: u64) -> DeploymentPlan {
		DeploymentPlan {
			rounds,
			init_code: Bytes::from_static(&[0x60, 0x80, 0x60, 0x40, 0x52]),
			gas: GasParams {
				gas_limit: 500_000,
				max_fee_per_gas: 10,
				max_priority_fee_per_gas: 1,
			},
			value: U256::ZERO,
			interval: Duration::from_millis(5),
		}
	}

	fn deployer(
		options: MemoryOptions,
		storage: Box<dyn StorageInterface>,
	) -> (Deployer, SharedLedger, Arc<StorageService>) {
		let delivery = MemoryDelivery::new(options);
		let ledger = delivery.ledger();
		let storage = Arc::new(StorageService::new(storage));
		let deployer = Deployer::new(
			Arc::new(DeliveryService::new(Box::new(delivery))),
			storage.clone(),
			Arc::new(TransactionBuilder::new(ChainSigner::new(1337))),
		);
		(deployer, ledger, storage)
	}

	#[tokio::test]
	async fn test_rounds_per_sender() {
		let (deployer, ledger, storage) =
			deployer(MemoryOptions::default(), Box::new(MemoryStorage::new()));
		let alice = SenderAccount::random();
		let bob = SenderAccount::random();
		let nonces = NonceRegistry::from_initial([(alice.address(), 4), (bob.address(), 0)]);
		let (err_tx, mut err_rx) = mpsc::unbounded_channel();

		let deployed = deployer
			.deploy(
				&plan(2),
				&[alice.clone(), bob.clone()],
				&nonces,
				&err_tx,
				&CancellationToken::new(),
			)
			.await
			.unwrap();

		assert_eq!(
			deployed,
			vec![
				alice.address().create(4),
				bob.address().create(0),
				alice.address().create(5),
				bob.address().create(1),
			]
		);
		assert_eq!(ledger.read().await.accepted().len(), 4);
		assert_eq!(
			storage.deployments(alice.address()).await.unwrap(),
			vec![alice.address().create(4), alice.address().create(5)]
		);
		assert_eq!(nonces.claim(&alice.address()), Some(6));
		assert!(err_rx.try_recv().is_err());
	}

	#[tokio::test]
	async fn test_rejected_deployment_is_fatal() {
		let (deployer, _, _) = deployer(
			MemoryOptions {
				reject_every: Some(1),
				..Default::default()
			},
			Box::new(MemoryStorage::new()),
		);
		let account = SenderAccount::random();
		let nonces = NonceRegistry::from_initial([(account.address(), 0)]);
		let (err_tx, _err_rx) = mpsc::unbounded_channel();

		let result = deployer
			.deploy(&plan(1), &[account], &nonces, &err_tx, &CancellationToken::new())
			.await;
		assert!(matches!(result, Err(SpammerError::Deployment(_))));
	}

	struct FailingStorage;

	#[async_trait::async_trait]
	impl StorageInterface for FailingStorage {
		async fn append_line(&self, _log: &str, _line: &str) -> Result<(), StorageError> {
			Err(StorageError::Backend("disk full".into()))
		}

		async fn read_lines(&self, _log: &str) -> Result<Vec<String>, StorageError> {
			Ok(Vec::new())
		}

		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			unimplemented!()
		}
	}

	#[tokio::test]
	async fn test_persistence_failure_is_reported() {
		let (deployer, _, _) = deployer(MemoryOptions::default(), Box::new(FailingStorage));
		let account = SenderAccount::random();
		let nonces = NonceRegistry::from_initial([(account.address(), 0)]);
		let (err_tx, mut err_rx) = mpsc::unbounded_channel();

		let deployed = deployer
			.deploy(&plan(1), &[account], &nonces, &err_tx, &CancellationToken::new())
			.await
			.unwrap();
		assert_eq!(deployed.len(), 1);

		let error = err_rx.try_recv().unwrap();
		assert_eq!(error.stage, Stage::Persistence);
		assert!(!error.fatal);
	}

	#[tokio::test]
	async fn test_cancelled_before_start() {
		let (deployer, ledger, _) =
			deployer(MemoryOptions::default(), Box::new(MemoryStorage::new()));
		let account = SenderAccount::random();
		let nonces = NonceRegistry::from_initial([(account.address(), 0)]);
		let (err_tx, _err_rx) = mpsc::unbounded_channel();
		let cancel = CancellationToken::new();
		cancel.cancel();

		let deployed = deployer
			.deploy(&plan(3), &[account], &nonces, &err_tx, &cancel)
			.await
			.unwrap();
		assert!(deployed.is_empty());
		assert!(ledger.read().await.accepted().is_empty());
	}
}
