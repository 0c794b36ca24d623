//! Submission stage.
//!
//! A single task drains the transaction channel and hands each transaction
//! to the delivery endpoint in the order it was received. A rejection is
//! reported on the error channel; with `stop_on_error` it is fatal and the
//! stage stops, which closes the channel and unblocks every generator.
//! A sample of accepted transactions is forwarded to the pending watcher.

use crate::tx::SignedTransaction;
use crate::{PipelineError, Stage};
use alloy_primitives::Address;
use spammer_delivery::DeliveryService;
use spammer_types::{truncate_id, TransactionHash, WorkloadKind};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// An accepted transaction handed to the watcher.
#[derive(Debug, Clone)]
pub struct Submitted {
	pub hash: TransactionHash,
	pub kind: WorkloadKind,
	pub sender: Address,
	pub nonce: u64,
	pub submitted_at: Instant,
}

/// Where sampled transactions go.
pub struct WatchFeed {
	pub tx: mpsc::Sender<Submitted>,
	/// Every n-th accepted transaction is forwarded, starting with the first.
	pub sample_rate: u64,
}

/// Counters of a finished submission stage.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionOutcome {
	pub submitted: u64,
	pub failed: u64,
	/// Transactions forwarded to the watcher.
	pub sampled: u64,
	/// True if the stage stopped before the channel was drained.
	pub halted: bool,
}

pub struct SubmissionStage {
	delivery: Arc<DeliveryService>,
	stop_on_error: bool,
	feed: Option<WatchFeed>,
}

impl SubmissionStage {
	pub fn new(delivery: Arc<DeliveryService>, stop_on_error: bool, feed: Option<WatchFeed>) -> Self {
		Self {
			delivery,
			stop_on_error,
			feed,
		}
	}

	/// Submits until the channel is closed and empty, a fatal rejection
	/// occurs, or `halt` fires.
	#[instrument(skip_all, fields(stop_on_error = self.stop_on_error))]
	pub async fn run(
		self,
		mut rx: mpsc::Receiver<SignedTransaction>,
		errors: mpsc::UnboundedSender<PipelineError>,
		halt: CancellationToken,
	) -> SubmissionOutcome {
		let mut outcome = SubmissionOutcome::default();

		loop {
			let tx = tokio::select! {
				biased;
				_ = halt.cancelled() => {
					outcome.halted = true;
					break;
				}
				next = rx.recv() => match next {
					Some(tx) => tx,
					None => break,
				},
			};

			match self.delivery.submit(&tx.raw).await {
				Ok(hash) => {
					outcome.submitted += 1;
					self.forward(&mut outcome, hash, &tx);
				},
				Err(e) => {
					outcome.failed += 1;
					tracing::warn!(
						sender = %tx.sender,
						nonce = tx.nonce,
						kind = %tx.kind,
						error = %e,
						"Submission rejected"
					);
					let _ = errors.send(PipelineError {
						stage: Stage::Submission,
						message: format!("{} nonce {}: {}", tx.sender, tx.nonce, e),
						fatal: self.stop_on_error,
					});
					if self.stop_on_error {
						outcome.halted = true;
						break;
					}
				},
			}
		}

		tracing::info!(
			submitted = outcome.submitted,
			failed = outcome.failed,
			halted = outcome.halted,
			"Submission finished"
		);
		outcome
	}

	fn forward(&self, outcome: &mut SubmissionOutcome, hash: TransactionHash, tx: &SignedTransaction) {
		let Some(feed) = &self.feed else {
			return;
		};
		if (outcome.submitted - 1) % feed.sample_rate.max(1) != 0 {
			return;
		}

		let submitted = Submitted {
			hash,
			kind: tx.kind,
			sender: tx.sender,
			nonce: tx.nonce,
			submitted_at: Instant::now(),
		};
		match feed.tx.try_send(submitted) {
			Ok(()) => outcome.sampled += 1,
			Err(TrySendError::Full(dropped)) => {
				tracing::debug!(tx_hash = %truncate_id(&dropped.hash.to_hex()), "Watcher queue full, sample dropped");
			},
			Err(TrySendError::Closed(_)) => {},
		}
	}
}
