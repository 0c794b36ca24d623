//! Pending-transaction watcher.
//!
//! Takes sampled transactions off its queue one at a time and polls the
//! endpoint for each receipt with exponential backoff, doubling the delay
//! from `initial_backoff` up to `max_backoff` and giving up after
//! `max_elapsed`. Every confirmation logs the running totals together with a
//! throughput estimate scaled by the sample rate.

use crate::sender::Submitted;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use spammer_config::WatcherConfig;
use spammer_delivery::{DeliveryError, DeliveryService};
use spammer_types::{truncate_id, TransactionHash, TransactionReceipt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Why a receipt could not be obtained.
#[derive(Debug, Error)]
pub enum WatchError {
	#[error("Transaction not yet included")]
	Pending,
	#[error(transparent)]
	Delivery(#[from] DeliveryError),
}

/// Polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherSettings {
	pub sample_rate: u64,
	pub initial_backoff: Duration,
	pub max_backoff: Duration,
	pub max_elapsed: Duration,
}

impl From<&WatcherConfig> for WatcherSettings {
	fn from(config: &WatcherConfig) -> Self {
		Self {
			sample_rate: config.sample_rate.max(1),
			initial_backoff: Duration::from_millis(config.initial_backoff_ms),
			max_backoff: Duration::from_millis(config.max_backoff_ms),
			max_elapsed: Duration::from_millis(config.max_elapsed_ms),
		}
	}
}

/// Counters of a finished watcher.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WatcherOutcome {
	pub confirmed: u64,
	pub reverted: u64,
	/// Transactions given up on after `max_elapsed`.
	pub timed_out: u64,
}

pub struct PendingWatcher {
	delivery: Arc<DeliveryService>,
	settings: WatcherSettings,
}

impl PendingWatcher {
	pub fn new(delivery: Arc<DeliveryService>, settings: WatcherSettings) -> Self {
		Self { delivery, settings }
	}

	/// Watches until the queue is closed and empty or `stop` fires. A
	/// transaction still being polled when `stop` fires is abandoned.
	#[instrument(skip_all, fields(sample_rate = self.settings.sample_rate))]
	pub async fn run(self, mut rx: mpsc::Receiver<Submitted>, stop: CancellationToken) -> WatcherOutcome {
		let mut outcome = WatcherOutcome::default();
		let started = Instant::now();

		loop {
			let submitted = tokio::select! {
				biased;
				_ = stop.cancelled() => break,
				next = rx.recv() => match next {
					Some(submitted) => submitted,
					None => break,
				},
			};

			let result = tokio::select! {
				biased;
				_ = stop.cancelled() => break,
				result = self.await_receipt(submitted.hash) => result,
			};

			match result {
				Ok(receipt) if receipt.success => {
					outcome.confirmed += 1;
					let elapsed = started.elapsed();
					tracing::info!(
						confirmed = outcome.confirmed,
						block = receipt.block_number,
						latency_ms = submitted.submitted_at.elapsed().as_millis() as u64,
						elapsed_secs = elapsed.as_secs(),
						tps = %format!("{:.2}", self.estimate_tps(outcome.confirmed, elapsed)),
						pending = rx.len(),
						"Confirmed"
					);
				},
				Ok(receipt) => {
					outcome.reverted += 1;
					tracing::warn!(
						tx_hash = %truncate_id(&receipt.hash.to_hex()),
						sender = %submitted.sender,
						nonce = submitted.nonce,
						"Transaction reverted"
					);
				},
				Err(e) => {
					outcome.timed_out += 1;
					tracing::warn!(
						tx_hash = %truncate_id(&submitted.hash.to_hex()),
						sender = %submitted.sender,
						nonce = submitted.nonce,
						error = %e,
						"Gave up waiting for receipt"
					);
				},
			}
		}

		tracing::info!(
			confirmed = outcome.confirmed,
			reverted = outcome.reverted,
			timed_out = outcome.timed_out,
			"Watcher stopped"
		);
		outcome
	}

	/// Polls until a receipt is returned or the backoff budget runs out.
	async fn await_receipt(&self, hash: TransactionHash) -> Result<TransactionReceipt, WatchError> {
		let delivery = self.delivery.clone();
		backoff::future::retry(self.backoff(), || {
			let delivery = delivery.clone();
			async move {
				match delivery.receipt(&hash).await {
					Ok(Some(receipt)) => Ok(receipt),
					Ok(None) => Err(backoff::Error::transient(WatchError::Pending)),
					Err(e) => {
						tracing::debug!(error = %e, "Receipt poll failed");
						Err(backoff::Error::transient(WatchError::Delivery(e)))
					},
				}
			}
		})
		.await
	}

	fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoffBuilder::new()
			.with_initial_interval(self.settings.initial_backoff)
			.with_max_interval(self.settings.max_backoff)
			.with_multiplier(2.0)
			.with_randomization_factor(0.0)
			.with_max_elapsed_time(Some(self.settings.max_elapsed))
			.build()
	}

	/// Confirmed transactions per second, scaled back up by the sample rate.
	fn estimate_tps(&self, confirmed: u64, elapsed: Duration) -> f64 {
		let secs = elapsed.as_secs_f64();
		if secs <= f64::EPSILON {
			return 0.0;
		}
		(confirmed * self.settings.sample_rate) as f64 / secs
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_primitives::{Address, B256};
	use spammer_delivery::implementations::memory::{MemoryDelivery, MemoryOptions};
	use spammer_types::WorkloadKind;

	fn settings(max_elapsed_ms: u64) -> WatcherSettings {
		WatcherSettings {
			sample_rate: 1,
			initial_backoff: Duration::from_millis(1),
			max_backoff: Duration::from_millis(4),
			max_elapsed: Duration::from_millis(max_elapsed_ms),
		}
	}

	fn submitted(hash: TransactionHash) -> Submitted {
		Submitted {
			hash,
			kind: WorkloadKind::Send,
			sender: Address::with_last_byte(1),
			nonce: 0,
			submitted_at: Instant::now(),
		}
	}

	async fn delivery_with_one_tx(receipt_after: u64) -> (Arc<DeliveryService>, TransactionHash) {
		use crate::tx::{GasParams, TransactionBuilder, TransactionRequest};
		use alloy_primitives::{Bytes, U256};
		use spammer_account::{ChainSigner, SenderAccount};

		let account = SenderAccount::random();
		let tx = TransactionBuilder::new(ChainSigner::new(1337))
			.build(
				TransactionRequest {
					sender: account.address(),
					nonce: 0,
					to: Some(Address::with_last_byte(2)),
					value: U256::ZERO,
					gas: GasParams {
						gas_limit: 21_000,
						max_fee_per_gas: 2,
						max_priority_fee_per_gas: 1,
					},
					input: Bytes::new(),
					blob: None,
				},
				&account,
			)
			.unwrap();

		let delivery = Arc::new(DeliveryService::new(Box::new(MemoryDelivery::new(
			MemoryOptions {
				receipt_after,
				..Default::default()
			},
		))));
		let hash = delivery.submit(&tx.raw).await.unwrap();
		(delivery, hash)
	}

	#[tokio::test]
	async fn test_confirms_after_backoff() {
		let (delivery, hash) = delivery_with_one_tx(3).await;
		let (tx, rx) = mpsc::channel(4);
		tx.send(submitted(hash)).await.unwrap();
		drop(tx);

		let outcome = PendingWatcher::new(delivery, settings(5_000))
			.run(rx, CancellationToken::new())
			.await;
		assert_eq!(outcome.confirmed, 1);
		assert_eq!(outcome.timed_out, 0);
	}

	#[tokio::test]
	async fn test_gives_up_after_max_elapsed() {
		let (delivery, _) = delivery_with_one_tx(0).await;
		let unknown = TransactionHash(B256::repeat_byte(0x42));
		let (tx, rx) = mpsc::channel(4);
		tx.send(submitted(unknown)).await.unwrap();
		drop(tx);

		let outcome = PendingWatcher::new(delivery, settings(20))
			.run(rx, CancellationToken::new())
			.await;
		assert_eq!(outcome.confirmed, 0);
		assert_eq!(outcome.timed_out, 1);
	}

	#[tokio::test]
	async fn test_stop_abandons_pending_poll() {
		let (delivery, _) = delivery_with_one_tx(0).await;
		let unknown = TransactionHash(B256::repeat_byte(0x42));
		let (tx, rx) = mpsc::channel(4);
		tx.send(submitted(unknown)).await.unwrap();
		let stop = CancellationToken::new();

		let handle = tokio::spawn(PendingWatcher::new(delivery, settings(60_000)).run(rx, stop.clone()));
		tokio::time::sleep(Duration::from_millis(20)).await;
		stop.cancel();

		let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(outcome, WatcherOutcome::default());
		drop(tx);
	}

	#[test]
	fn test_tps_scaled_by_sample_rate() {
		let delivery = Arc::new(DeliveryService::new(Box::new(MemoryDelivery::new(
			MemoryOptions::default(),
		))));
		let watcher = PendingWatcher::new(
			delivery,
			WatcherSettings {
				sample_rate: 10,
				..settings(1)
			},
		);
		assert_eq!(watcher.estimate_tps(5, Duration::from_secs(10)), 5.0);
		assert_eq!(watcher.estimate_tps(5, Duration::ZERO), 0.0);
	}
}
