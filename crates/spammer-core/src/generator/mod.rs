//! Generator workers.
//!
//! One worker runs per (sender, workload) pair. On every tick it prepares the
//! payload, claims the sender's next nonce, signs, and hands the transaction
//! to the submission stage over the shared bounded channel. Ticks of one
//! worker never overlap: a tick that fires while the worker is still blocked
//! on the channel is delayed, not queued.
//!
//! A transaction that cannot be built is reported on the error channel and
//! skipped; the worker carries on with the next tick. The payload is
//! prepared before the nonce is claimed, so a bad argument or an empty
//! contract pool does not leave a nonce gap.

pub mod targets;

use crate::nonce::NonceHandle;
use crate::tx::abi::CallEncoder;
use crate::tx::{
	BlobParams, BuilderError, GasParams, SignedTransaction, TransactionBuilder, TransactionRequest,
};
use crate::{PipelineError, Stage};
use alloy_eips::eip4844::BlobTransactionSidecar;
use alloy_primitives::{Address, Bytes, U256};
use spammer_account::SenderAccount;
use spammer_types::{truncate_id, WorkloadKind};
use std::sync::Arc;
use std::time::Duration;
use targets::{ContractPool, DestinationSource};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Errors that can occur while generating one transaction.
#[derive(Debug, Error)]
pub enum GeneratorError {
	/// The transaction could not be built.
	#[error("Build error: {0}")]
	Build(#[from] BuilderError),
	/// The call workload has no contract to target.
	#[error("No contract available for calls")]
	NoContracts,
	/// Destination addresses could not be loaded.
	#[error("Destination error: {0}")]
	Destinations(String),
}

/// What a workload puts into each transaction.
#[derive(Clone)]
pub enum Payload {
	Transfer {
		destinations: DestinationSource,
	},
	Call {
		contracts: ContractPool,
		encoder: Arc<dyn CallEncoder>,
		method: String,
		/// Argument templates with `{contract}`, `{sender}` and `{index}`
		/// placeholders.
		args: Vec<String>,
	},
	Blob {
		destinations: DestinationSource,
		sidecar: BlobTransactionSidecar,
		max_fee_per_blob_gas: u128,
	},
}

/// Immutable description of one workload class.
#[derive(Clone)]
pub struct WorkloadSpec {
	/// Delay between two ticks of a worker.
	pub frequency: Duration,
	/// Transactions each worker attempts.
	pub total_number: u64,
	pub gas: GasParams,
	pub value: U256,
	pub payload: Payload,
}

impl WorkloadSpec {
	pub fn kind(&self) -> WorkloadKind {
		match self.payload {
			Payload::Transfer { .. } => WorkloadKind::Send,
			Payload::Call { .. } => WorkloadKind::Call,
			Payload::Blob { .. } => WorkloadKind::Blob,
		}
	}

	/// Fills an empty call contract pool with the deployed contracts.
	pub fn with_deployed_contracts(mut self, deployed: &[Address]) -> Self {
		if let Payload::Call { contracts, .. } = &mut self.payload {
			if contracts.is_empty() {
				*contracts = ContractPool::new(deployed.to_vec());
			}
		}
		self
	}
}

/// Shortest tick period a worker runs at.
const MIN_TICK: Duration = Duration::from_millis(1);

/// Tick period for a configured frequency. Zero becomes one millisecond.
pub fn tick_interval(frequency_ms: u64) -> Duration {
	Duration::from_millis(frequency_ms).max(MIN_TICK)
}

/// Result of a worker run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOutcome {
	pub sender: Address,
	pub kind: WorkloadKind,
	/// Transactions handed to the submission stage.
	pub emitted: u64,
	/// Transactions that could not be built.
	pub failed: u64,
	/// True if the worker stopped before its last tick.
	pub cancelled: bool,
}

/// Produces the transactions of one workload for one sender.
pub struct GeneratorWorker {
	account: SenderAccount,
	nonce: NonceHandle,
	spec: Arc<WorkloadSpec>,
	builder: Arc<TransactionBuilder>,
}

impl GeneratorWorker {
	pub fn new(
		account: SenderAccount,
		nonce: NonceHandle,
		spec: Arc<WorkloadSpec>,
		builder: Arc<TransactionBuilder>,
	) -> Self {
		Self {
			account,
			nonce,
			spec,
			builder,
		}
	}

	/// Runs until the workload is exhausted, `cancel` fires, or the
	/// submission stage goes away.
	#[instrument(skip_all, fields(sender = %truncate_id(&self.account.address().to_string()), kind = %self.spec.kind()))]
	pub async fn run(
		self,
		tx_out: mpsc::Sender<SignedTransaction>,
		errors: mpsc::UnboundedSender<PipelineError>,
		cancel: CancellationToken,
	) -> WorkerOutcome {
		let mut outcome = WorkerOutcome {
			sender: self.account.address(),
			kind: self.spec.kind(),
			emitted: 0,
			failed: 0,
			cancelled: false,
		};

		let period = self.spec.frequency.max(MIN_TICK);
		let mut ticker = interval_at(Instant::now() + period, period);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		for index in 0..self.spec.total_number {
			tokio::select! {
				biased;
				_ = cancel.cancelled() => {
					outcome.cancelled = true;
					break;
				}
				_ = ticker.tick() => {}
			}

			let tx = match self.generate(index) {
				Ok(tx) => tx,
				Err(e) => {
					outcome.failed += 1;
					tracing::warn!(index, error = %e, "Failed to generate transaction");
					let _ = errors.send(PipelineError::local(
						Stage::Generation,
						format!("{} #{} from {}: {}", outcome.kind, index, outcome.sender, e),
					));
					continue;
				},
			};
			let nonce = tx.nonce;

			tokio::select! {
				biased;
				_ = cancel.cancelled() => {
					outcome.cancelled = true;
					break;
				}
				sent = tx_out.send(tx) => {
					if sent.is_err() {
						tracing::debug!("Submission stage closed");
						outcome.cancelled = true;
						break;
					}
					outcome.emitted += 1;
					tracing::trace!(index, nonce, "Emitted transaction");
				}
			}
		}

		tracing::info!(
			emitted = outcome.emitted,
			failed = outcome.failed,
			cancelled = outcome.cancelled,
			"Generator finished"
		);
		outcome
	}

	fn generate(&self, index: u64) -> Result<SignedTransaction, GeneratorError> {
		let sender = self.account.address();
		let (to, input, blob) = match &self.spec.payload {
			Payload::Transfer { destinations } => (destinations.pick(index), Bytes::new(), None),
			Payload::Call {
				contracts,
				encoder,
				method,
				args,
			} => {
				let contract = contracts.pick().ok_or(GeneratorError::NoContracts)?;
				let args = render_args(args, contract, sender, index);
				(contract, encoder.encode_call(method, &args)?, None)
			},
			Payload::Blob {
				destinations,
				sidecar,
				max_fee_per_blob_gas,
			} => (
				destinations.pick(index),
				Bytes::new(),
				Some(BlobParams {
					sidecar: sidecar.clone(),
					max_fee_per_blob_gas: *max_fee_per_blob_gas,
				}),
			),
		};

		self.builder.validate(&self.spec.gas, blob.as_ref())?;

		let request = TransactionRequest {
			sender,
			nonce: self.nonce.claim(),
			to: Some(to),
			value: self.spec.value,
			gas: self.spec.gas,
			input,
			blob,
		};
		Ok(self.builder.build(request, &self.account)?)
	}
}

/// Substitutes the per-call placeholders in argument templates.
fn render_args(templates: &[String], contract: Address, sender: Address, index: u64) -> Vec<String> {
	templates
		.iter()
		.map(|template| {
			template
				.replace("{contract}", &format!("{:#x}", contract))
				.replace("{sender}", &format!("{:#x}", sender))
				.replace("{index}", &index.to_string())
		})
		.collect()
}
