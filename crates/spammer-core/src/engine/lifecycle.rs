//! Lifecycle management for the spammer engine.
//!
//! Nonce initialisation before the run, the observable run state, and the
//! tokens through which callers request shutdown.

use super::{RunState, SpammerEngine};
use crate::nonce::NonceRegistry;
use crate::SpammerError;
use spammer_config::NonceSource;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

impl SpammerEngine {
	/// Determines the first nonce of every sender.
	///
	/// An account's explicit starting nonce always wins. Otherwise the
	/// configured source decides: the endpoint's pending nonce, fetched once,
	/// or an error when starting nonces were required.
	pub(crate) async fn initialize_nonces(&self) -> Result<NonceRegistry, SpammerError> {
		let mut initial = Vec::with_capacity(self.accounts.len());

		for account in &self.accounts {
			let sender = account.address();
			let nonce = match (account.starting_nonce(), self.settings.nonce_source) {
				(Some(nonce), _) => nonce,
				(None, NonceSource::Config) => {
					return Err(SpammerError::Config(format!(
						"Account {} has no starting_nonce and nonce_source is \"config\"",
						sender
					)))
				},
				(None, NonceSource::Pending) => {
					self.delivery.pending_nonce(sender).await.map_err(|e| {
						SpammerError::Service(format!("Failed to fetch nonce of {}: {}", sender, e))
					})?
				},
			};
			tracing::info!(sender = %sender, nonce, "Initialized nonce");
			initial.push((sender, nonce));
		}

		Ok(NonceRegistry::from_initial(initial))
	}

	/// Subscribes to run state changes.
	pub fn state(&self) -> watch::Receiver<RunState> {
		self.state.subscribe()
	}

	pub(crate) fn set_state(&self, next: RunState) {
		let previous = self.state.send_replace(next);
		if previous != next {
			tracing::debug!(from = %previous, to = %next, "Run state changed");
		}
	}

	/// Stops generation and lets the submission stage drain.
	///
	/// Safe to call any number of times, from any task.
	pub fn request_shutdown(&self) {
		if !self.shutdown.is_cancelled() {
			tracing::info!("Shutdown requested");
		}
		self.shutdown.cancel();
	}

	/// Stops generation and submission immediately, dropping queued
	/// transactions.
	pub fn halt(&self) {
		if !self.halt.is_cancelled() {
			tracing::warn!("Halt requested, queued transactions are dropped");
		}
		self.shutdown.cancel();
		self.halt.cancel();
	}

	/// Token cancelled when shutdown is requested.
	pub fn shutdown_token(&self) -> CancellationToken {
		self.shutdown.clone()
	}
}
