//! Orchestration of a spammer run.
//!
//! The engine initialises nonces, runs the deployment phase and then starts
//! the pipeline: the watcher, the submission stage and one generator worker
//! per sender and workload, all connected by channels. It collects errors
//! from every stage on one channel and owns the shutdown order:
//!
//! 1. the shutdown token cancels every generator
//! 2. the submission stage drains what is already queued
//! 3. the watcher is stopped
//!
//! The shutdown token is cancelled at most once no matter how many stages
//! or signals request it. The halt token additionally stops the submission
//! stage without draining.

pub mod lifecycle;

use crate::deployer::{Deployer, DeploymentPlan};
use crate::generator::{GeneratorWorker, Payload, WorkloadSpec};
use crate::monitoring::{PendingWatcher, WatcherOutcome};
use crate::sender::{SubmissionStage, WatchFeed};
use crate::tx::TransactionBuilder;
use crate::{PipelineError, SpammerError, Stage};
use alloy_primitives::Address;
use spammer_account::SenderAccount;
use spammer_config::{SpammerConfig, WatcherConfig};
use spammer_delivery::DeliveryService;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Phase of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunState {
	#[default]
	NotStarted,
	/// Nonce initialisation and contract deployment.
	Deploying,
	/// Generators, submission and watcher are active.
	Running,
	/// Generators are stopped, queued transactions are being submitted.
	Draining,
	Done,
}

impl fmt::Display for RunState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			RunState::NotStarted => "not_started",
			RunState::Deploying => "deploying",
			RunState::Running => "running",
			RunState::Draining => "draining",
			RunState::Done => "done",
		};
		f.write_str(name)
	}
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
	/// Deployed contract addresses in submission order.
	pub deployed: Vec<Address>,
	/// Transactions handed to the submission stage by generators.
	pub generated: u64,
	/// Transactions accepted by the endpoint, deployments excluded.
	pub submitted: u64,
	pub generation_errors: u64,
	pub submission_errors: u64,
	pub persistence_errors: u64,
	/// Sampled transactions the watcher saw confirmed.
	pub confirmed: u64,
	pub final_state: RunState,
}

/// Counts pipeline errors and remembers the first fatal one.
#[derive(Debug, Default)]
struct ErrorTally {
	fatal: Option<PipelineError>,
}

impl ErrorTally {
	/// Records `error` in `report`. Returns true for the first fatal error.
	fn record(&mut self, report: &mut RunReport, error: PipelineError) -> bool {
		match error.stage {
			Stage::Generation => report.generation_errors += 1,
			Stage::Submission => report.submission_errors += 1,
			Stage::Persistence => report.persistence_errors += 1,
			Stage::Deployment => {},
		}
		if !error.fatal {
			tracing::debug!(error = %error, "Pipeline error");
			return false;
		}
		if self.fatal.is_some() {
			return false;
		}
		tracing::error!(error = %error, "Fatal pipeline error, stopping");
		self.fatal = Some(error);
		true
	}

	fn into_result(self) -> Result<(), SpammerError> {
		match self.fatal {
			None => Ok(()),
			Some(error) if error.stage == Stage::Submission => {
				Err(SpammerError::Submission(error.message))
			},
			Some(error) => Err(SpammerError::Service(error.to_string())),
		}
	}
}

/// Main engine that runs the load-generation pipeline.
pub struct SpammerEngine {
	pub(crate) settings: SpammerConfig,
	pub(crate) watcher: WatcherConfig,
	/// Senders in account-source order.
	pub(crate) accounts: Vec<SenderAccount>,
	pub(crate) delivery: Arc<DeliveryService>,
	pub(crate) builder: Arc<TransactionBuilder>,
	pub(crate) deployer: Deployer,
	pub(crate) deployment: Option<DeploymentPlan>,
	pub(crate) workloads: Vec<WorkloadSpec>,
	pub(crate) shutdown: CancellationToken,
	pub(crate) halt: CancellationToken,
	pub(crate) state: watch::Sender<RunState>,
	pub(crate) started: AtomicBool,
}

impl SpammerEngine {
	/// Runs the whole pipeline once.
	///
	/// Returns the report of the run, or the error that stopped it. An
	/// engine can only be run once.
	#[instrument(skip_all, fields(spammer_id = %self.settings.id))]
	pub async fn run(&self) -> Result<RunReport, SpammerError> {
		if self.started.swap(true, Ordering::SeqCst) {
			return Err(SpammerError::Service("Engine has already been run".into()));
		}

		let mut report = RunReport::default();
		let mut tally = ErrorTally::default();
		let result = self.execute(&mut report, &mut tally).await;

		self.set_state(RunState::Done);
		report.final_state = RunState::Done;
		result?;
		tally.into_result()?;

		tracing::info!(
			deployed = report.deployed.len(),
			generated = report.generated,
			submitted = report.submitted,
			generation_errors = report.generation_errors,
			submission_errors = report.submission_errors,
			persistence_errors = report.persistence_errors,
			confirmed = report.confirmed,
			"Run complete"
		);
		Ok(report)
	}

	async fn execute(&self, report: &mut RunReport, tally: &mut ErrorTally) -> Result<(), SpammerError> {
		let (err_tx, mut err_rx) = mpsc::unbounded_channel();

		self.set_state(RunState::Deploying);
		let nonces = self.initialize_nonces().await?;
		if let Some(plan) = &self.deployment {
			report.deployed = self
				.deployer
				.deploy(plan, &self.accounts, &nonces, &err_tx, &self.shutdown)
				.await?;
		}
		while let Ok(error) = err_rx.try_recv() {
			tally.record(report, error);
		}

		if self.shutdown.is_cancelled() {
			tracing::info!("Shutdown requested before generation started");
			return Ok(());
		}

		let start_delay = Duration::from_millis(self.settings.start_delay_ms);
		if !start_delay.is_zero() {
			tracing::info!(delay_ms = self.settings.start_delay_ms, "Waiting before generation");
			tokio::select! {
				biased;
				_ = self.shutdown.cancelled() => return Ok(()),
				_ = tokio::time::sleep(start_delay) => {}
			}
		}

		let workloads = self.resolve_workloads(&report.deployed)?;

		self.set_state(RunState::Running);
		let (tx_out, tx_in) = mpsc::channel(self.settings.channel_capacity.max(1));

		let watcher_stop = CancellationToken::new();
		let (feed, watcher) = if self.watcher.enabled {
			let (watch_tx, watch_rx) = mpsc::channel(self.watcher.queue_capacity.max(1));
			let watcher = PendingWatcher::new(self.delivery.clone(), (&self.watcher).into());
			let handle = tokio::spawn(watcher.run(watch_rx, watcher_stop.clone()));
			let feed = WatchFeed {
				tx: watch_tx,
				sample_rate: self.watcher.sample_rate,
			};
			(Some(feed), Some(handle))
		} else {
			(None, None)
		};

		let stage = SubmissionStage::new(
			self.delivery.clone(),
			self.settings.stop_on_send_error,
			feed,
		);
		let mut submission = tokio::spawn(stage.run(tx_in, err_tx.clone(), self.halt.clone()));

		let mut workers = JoinSet::new();
		for spec in &workloads {
			for account in &self.accounts {
				let handle = nonces.handle(&account.address()).ok_or_else(|| {
					SpammerError::Service(format!("No nonce counter for sender {}", account.address()))
				})?;
				let worker =
					GeneratorWorker::new(account.clone(), handle, spec.clone(), self.builder.clone());
				workers.spawn(worker.run(tx_out.clone(), err_tx.clone(), self.shutdown.clone()));
			}
		}
		tracing::info!(
			workers = workers.len(),
			workloads = workloads.len(),
			senders = self.accounts.len(),
			"Generation started"
		);
		drop(tx_out);
		drop(err_tx);

		let mut draining = false;
		loop {
			tokio::select! {
				biased;
				Some(error) = err_rx.recv() => {
					if tally.record(report, error) {
						self.shutdown.cancel();
						self.halt.cancel();
					}
				}
				_ = self.shutdown.cancelled(), if !draining => {
					draining = true;
					self.set_state(RunState::Draining);
					tracing::info!("Shutdown requested, stopping generators");
				}
				joined = workers.join_next() => match joined {
					Some(Ok(outcome)) => report.generated += outcome.emitted,
					Some(Err(e)) => {
						tracing::error!(error = %e, "Generator task failed");
						tally.record(report, PipelineError::local(Stage::Generation, e.to_string()));
					}
					None => break,
				},
			}
		}

		self.set_state(RunState::Draining);
		let submitted = loop {
			tokio::select! {
				biased;
				Some(error) = err_rx.recv() => {
					if tally.record(report, error) {
						self.shutdown.cancel();
						self.halt.cancel();
					}
				}
				joined = &mut submission => break joined,
			}
		};
		let outcome = submitted.map_err(|e| SpammerError::Service(format!("Submission task failed: {}", e)))?;
		report.submitted = outcome.submitted;

		// A requested shutdown abandons outstanding polls; a natural end
		// lets the watcher finish its queue.
		if self.shutdown.is_cancelled() {
			watcher_stop.cancel();
		}
		if let Some(handle) = watcher {
			let watched: WatcherOutcome = handle
				.await
				.map_err(|e| SpammerError::Service(format!("Watcher task failed: {}", e)))?;
			report.confirmed = watched.confirmed;
		}

		while let Ok(error) = err_rx.try_recv() {
			tally.record(report, error);
		}
		Ok(())
	}

	/// Binds call workloads to the deployed contracts and shares every
	/// workload between its workers.
	fn resolve_workloads(&self, deployed: &[Address]) -> Result<Vec<Arc<WorkloadSpec>>, SpammerError> {
		self.workloads
			.iter()
			.cloned()
			.map(|spec| {
				let spec = spec.with_deployed_contracts(deployed);
				if let Payload::Call { contracts, .. } = &spec.payload {
					if contracts.is_empty() {
						return Err(SpammerError::Generation(
							"Call workload has no contracts to target".into(),
						));
					}
				}
				Ok(Arc::new(spec))
			})
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::builder::{SpammerBuilder, SpammerFactories};
	use crate::tx::abi::tests::STORE_ABI;
	use alloy_consensus::{Transaction, TxEnvelope};
	use alloy_primitives::keccak256;
	use spammer_account::{AccountFactory, SenderAccount};
	use spammer_config::Config;
	use spammer_delivery::implementations::memory::{MemoryDelivery, MemoryOptions, SharedLedger};
	use spammer_delivery::{DeliveryError, DeliveryInterface};
	use spammer_storage::implementations::memory::{MemoryStorage, SharedLogs};
	use spammer_storage::{deployment_log, StorageError, StorageInterface};
	use spammer_types::SecretString;
	use spammer_types::ConfigSchema;
	use std::collections::HashMap;
	use std::str::FromStr;
	use std::sync::Mutex;
	use tempfile::TempDir;

	const ALICE: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
	const BOB: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

	type DeliveryFn = Box<dyn Fn(&toml::Value) -> Result<Box<dyn DeliveryInterface>, DeliveryError>>;
	type StorageFn = Box<dyn Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>>;

	struct Harness {
		engine: SpammerEngine,
		ledger: SharedLedger,
		logs: SharedLogs,
		/// Accepted transaction count seen by each deployment log append.
		appends: Arc<Mutex<Vec<usize>>>,
	}

	/// Memory storage that notes how many transactions the endpoint had
	/// accepted whenever a line is appended.
	struct SnapshotStorage {
		inner: MemoryStorage,
		ledger: SharedLedger,
		appends: Arc<Mutex<Vec<usize>>>,
	}

	#[async_trait::async_trait]
	impl StorageInterface for SnapshotStorage {
		async fn append_line(&self, log: &str, line: &str) -> Result<(), StorageError> {
			let accepted = self.ledger.read().await.accepted().len();
			self.appends.lock().unwrap().push(accepted);
			self.inner.append_line(log, line).await
		}

		async fn read_lines(&self, log: &str) -> Result<Vec<String>, StorageError> {
			self.inner.read_lines(log).await
		}

		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			self.inner.config_schema()
		}
	}

	impl Harness {
		async fn new(config: &str, options: MemoryOptions) -> Self {
			let config = Config::from_str(config).unwrap();
			let ledger = SharedLedger::default();
			let logs = SharedLogs::default();

			let delivery_ledger = ledger.clone();
			let delivery: DeliveryFn = Box::new(move |_| {
				Ok(Box::new(MemoryDelivery::with_ledger(
					delivery_ledger.clone(),
					options.clone(),
				)))
			});
			let appends = Arc::new(Mutex::new(Vec::new()));
			let storage_logs = logs.clone();
			let storage_ledger = ledger.clone();
			let storage_appends = appends.clone();
			let storage: StorageFn = Box::new(move |_| {
				Ok(Box::new(SnapshotStorage {
					inner: MemoryStorage::with_logs(storage_logs.clone()),
					ledger: storage_ledger.clone(),
					appends: storage_appends.clone(),
				}))
			});

			let factories = SpammerFactories {
				account_factories: spammer_account::get_all_implementations()
					.into_iter()
					.map(|(name, factory)| (name.to_string(), factory))
					.collect::<HashMap<String, AccountFactory>>(),
				delivery_factories: HashMap::from([("memory".to_string(), delivery)]),
				storage_factories: HashMap::from([("memory".to_string(), storage)]),
			};
			let engine = SpammerBuilder::new(config).build(factories).await.unwrap();

			Self {
				engine,
				ledger,
				logs,
				appends,
			}
		}

		async fn submitted(&self) -> Vec<TxEnvelope> {
			self.ledger.read().await.decoded()
		}
	}

	fn address_of(key: &str) -> Address {
		SenderAccount::from_private_key(&SecretString::from(key), None)
			.unwrap()
			.address()
	}

	fn config(spammer: &str, keys: &str, workloads: &str) -> String {
		format!(
			r#"
[spammer]
id = "engine-test"
chain_id = 1337
{spammer}

[account]
primary = "local"
[account.implementations.local]
keys = {keys}

[delivery]
primary = "memory"
[delivery.implementations.memory]

[storage]
primary = "memory"
[storage.implementations.memory]

{workloads}
"#
		)
	}

	fn abi_file(dir: &TempDir) -> String {
		let path = dir.path().join("store.json");
		std::fs::write(&path, STORE_ABI).unwrap();
		path.display().to_string()
	}

	#[tokio::test]
	async fn test_single_sender_round_robin_transfers() {
		let harness = Harness::new(
			&config(
				"",
				&format!(r#"[{{ private_key = "{ALICE}" }}]"#),
				r#"
[send]
frequency_ms = 1
total_number = 3
amount = 1
max_fee_per_gas = 10
max_priority_fee_per_gas = 1
destinations = [
	"0x00000000000000000000000000000000000000d1",
	"0x00000000000000000000000000000000000000d2",
	"0x00000000000000000000000000000000000000d3",
]
"#,
			),
			MemoryOptions::default(),
		)
		.await;
		let mut state = harness.engine.state();

		let report = harness.engine.run().await.unwrap();
		assert_eq!(report.generated, 3);
		assert_eq!(report.submitted, 3);
		assert_eq!(report.confirmed, 1);
		assert_eq!(report.final_state, RunState::Done);
		assert_eq!(*state.borrow_and_update(), RunState::Done);

		let txs = harness.submitted().await;
		assert_eq!(txs.iter().map(|tx| tx.nonce()).collect::<Vec<_>>(), vec![0, 1, 2]);
		assert_eq!(
			txs.iter().map(|tx| tx.to()).collect::<Vec<_>>(),
			vec![
				Some(Address::with_last_byte(0xd1)),
				Some(Address::with_last_byte(0xd2)),
				Some(Address::with_last_byte(0xd3)),
			]
		);
	}

	#[tokio::test]
	async fn test_two_senders_call_configured_contract() {
		let dir = TempDir::new().unwrap();
		let contract = Address::with_last_byte(0xcc);
		let harness = Harness::new(
			&config(
				r#"nonce_source = "config""#,
				&format!(
					r#"[{{ private_key = "{ALICE}", starting_nonce = 5 }}, {{ private_key = "{BOB}", starting_nonce = 9 }}]"#
				),
				&format!(
					r#"
[call]
frequency_ms = 1
total_number = 2
gas_limit = 100000
max_fee_per_gas = 10
max_priority_fee_per_gas = 1
abi_path = "{}"
method_name = "put"
contracts = ["{:#x}"]
"#,
					abi_file(&dir),
					contract
				),
			),
			MemoryOptions::default(),
		)
		.await;

		let report = harness.engine.run().await.unwrap();
		assert_eq!(report.submitted, 4);

		let txs = harness.submitted().await;
		assert_eq!(txs.len(), 4);
		let selector = &keccak256("put(address,uint256)")[..4];
		for tx in &txs {
			assert_eq!(tx.to(), Some(contract));
			assert_eq!(&tx.input()[..4], selector);
		}

		let mut nonces: Vec<u64> = txs.iter().map(|tx| tx.nonce()).collect();
		nonces.sort_unstable();
		assert_eq!(nonces, vec![5, 6, 9, 10]);
	}

	#[tokio::test]
	async fn test_deployment_precedes_calls() {
		let dir = TempDir::new().unwrap();
		let harness = Harness::new(
			&config(
				"",
				&format!(r#"[{{ private_key = "{ALICE}" }}]"#),
				&format!(
					r#"
[deployment]
number = 1
hex_data = "0x6080604052"
gas_limit = 500000
max_fee_per_gas = 10
max_priority_fee_per_gas = 1

[call]
frequency_ms = 1
total_number = 2
gas_limit = 100000
max_fee_per_gas = 10
max_priority_fee_per_gas = 1
abi_path = "{}"
method_name = "put"
"#,
					abi_file(&dir)
				),
			),
			MemoryOptions {
				initial_nonce: 3,
				..Default::default()
			},
		)
		.await;
		let sender = address_of(ALICE);
		let contract = sender.create(3);

		let report = harness.engine.run().await.unwrap();
		assert_eq!(report.deployed, vec![contract]);
		assert_eq!(report.submitted, 2);

		let txs = harness.submitted().await;
		assert_eq!(txs.len(), 3);
		assert!(txs[0].kind().is_create());
		assert_eq!(txs[0].nonce(), 3);
		for (i, call) in txs[1..].iter().enumerate() {
			assert_eq!(call.to(), Some(contract));
			assert_eq!(call.nonce(), 4 + i as u64);
		}

		let logs = harness.logs.read().await;
		assert_eq!(
			logs.get(&deployment_log(sender)),
			Some(&vec![format!("{:#x}", contract)])
		);
		// the address was logged while only the deployment had been accepted
		assert_eq!(*harness.appends.lock().unwrap(), vec![1]);
	}

	#[tokio::test]
	async fn test_rejections_counted_when_not_fatal() {
		let harness = Harness::new(
			&config(
				"stop_on_send_error = false",
				&format!(r#"[{{ private_key = "{ALICE}" }}]"#),
				r#"
[send]
frequency_ms = 1
total_number = 3
max_fee_per_gas = 10
max_priority_fee_per_gas = 1
"#,
			),
			MemoryOptions {
				reject_every: Some(2),
				..Default::default()
			},
		)
		.await;

		let report = harness.engine.run().await.unwrap();
		assert_eq!(report.generated, 3);
		assert_eq!(report.submitted, 2);
		assert_eq!(report.submission_errors, 1);
		assert_eq!(report.final_state, RunState::Done);
		assert_eq!(harness.ledger.read().await.rejected().len(), 1);
	}

	#[tokio::test]
	async fn test_rejection_stops_run() {
		let harness = Harness::new(
			&config(
				"",
				&format!(r#"[{{ private_key = "{ALICE}" }}]"#),
				r#"
[send]
frequency_ms = 1
total_number = 50
max_fee_per_gas = 10
max_priority_fee_per_gas = 1
"#,
			),
			MemoryOptions {
				reject_every: Some(2),
				..Default::default()
			},
		)
		.await;
		let state = harness.engine.state();

		let result = harness.engine.run().await;
		assert!(matches!(result, Err(SpammerError::Submission(_))));
		assert_eq!(*state.borrow(), RunState::Done);
		assert_eq!(harness.ledger.read().await.accepted().len(), 1);
		assert!(harness.engine.shutdown_token().is_cancelled());
	}

	#[tokio::test]
	async fn test_shutdown_before_run() {
		let harness = Harness::new(
			&config(
				"",
				&format!(r#"[{{ private_key = "{ALICE}" }}]"#),
				r#"
[send]
total_number = 5
max_fee_per_gas = 10
max_priority_fee_per_gas = 1
"#,
			),
			MemoryOptions::default(),
		)
		.await;
		harness.engine.request_shutdown();
		harness.engine.request_shutdown();

		let report = harness.engine.run().await.unwrap();
		assert_eq!(report.generated, 0);
		assert_eq!(report.final_state, RunState::Done);
		assert!(harness.submitted().await.is_empty());
	}

	#[tokio::test]
	async fn test_shutdown_drains_queued_transactions() {
		let harness = Harness::new(
			&config(
				"",
				&format!(r#"[{{ private_key = "{ALICE}" }}]"#),
				r#"
[send]
frequency_ms = 2
total_number = 100000
max_fee_per_gas = 10
max_priority_fee_per_gas = 1
"#,
			),
			MemoryOptions::default(),
		)
		.await;
		let shutdown = harness.engine.shutdown_token();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(50)).await;
			shutdown.cancel();
		});

		let report = harness.engine.run().await.unwrap();
		assert!(report.generated < 100000);
		assert_eq!(report.submitted, report.generated);
		assert_eq!(harness.submitted().await.len() as u64, report.generated);
	}

	#[tokio::test]
	async fn test_config_nonce_source_requires_starting_nonce() {
		let harness = Harness::new(
			&config(
				r#"nonce_source = "config""#,
				&format!(r#"[{{ private_key = "{ALICE}" }}]"#),
				r#"
[send]
total_number = 1
max_fee_per_gas = 10
max_priority_fee_per_gas = 1
"#,
			),
			MemoryOptions::default(),
		)
		.await;

		assert!(matches!(
			harness.engine.run().await,
			Err(SpammerError::Config(_))
		));
	}

	#[tokio::test]
	async fn test_engine_runs_once() {
		let harness = Harness::new(
			&config(
				"",
				&format!(r#"[{{ private_key = "{ALICE}" }}]"#),
				r#"
[send]
frequency_ms = 1
total_number = 1
max_fee_per_gas = 10
max_priority_fee_per_gas = 1
"#,
			),
			MemoryOptions::default(),
		)
		.await;

		assert!(harness.engine.run().await.is_ok());
		assert!(matches!(
			harness.engine.run().await,
			Err(SpammerError::Service(_))
		));
	}
}
