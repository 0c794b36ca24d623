//! Per-sender nonce counters.
//!
//! Every sender gets one atomic counter, seeded once before any worker starts.
//! Workers never read or write the counter directly: they hold a
//! [`NonceHandle`] whose only mutating operation is [`NonceHandle::claim`].
//! Several workers bound to the same sender share the counter, so the nonces
//! a sender hands out form one gap-free sequence across all of them.

use alloy_primitives::Address;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Owns the nonce counter of every sender in the run.
#[derive(Debug, Default)]
pub struct NonceRegistry {
	counters: HashMap<Address, Arc<AtomicU64>>,
}

impl NonceRegistry {
	/// Seeds the registry with each sender's first nonce.
	///
	/// If a sender appears more than once, the first entry wins.
	pub fn from_initial(initial: impl IntoIterator<Item = (Address, u64)>) -> Self {
		let mut counters = HashMap::new();
		for (sender, nonce) in initial {
			counters
				.entry(sender)
				.or_insert_with(|| Arc::new(AtomicU64::new(nonce)));
		}
		Self { counters }
	}

	/// Returns the claim handle for `sender`.
	pub fn handle(&self, sender: &Address) -> Option<NonceHandle> {
		self.counters.get(sender).map(|next| NonceHandle {
			sender: *sender,
			next: next.clone(),
		})
	}

	/// Claims the next nonce of `sender`.
	pub fn claim(&self, sender: &Address) -> Option<u64> {
		self.counters
			.get(sender)
			.map(|next| next.fetch_add(1, Ordering::SeqCst))
	}
}

/// Claim-only access to one sender's counter.
#[derive(Debug, Clone)]
pub struct NonceHandle {
	sender: Address,
	next: Arc<AtomicU64>,
}

impl NonceHandle {
	/// Returns the next unused nonce and advances the counter.
	pub fn claim(&self) -> u64 {
		self.next.fetch_add(1, Ordering::SeqCst)
	}

	/// The nonce the next claim will return.
	pub fn peek(&self) -> u64 {
		self.next.load(Ordering::SeqCst)
	}

	pub fn sender(&self) -> Address {
		self.sender
	}
}
