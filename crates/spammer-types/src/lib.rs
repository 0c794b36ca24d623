//! Common types module for the transaction spammer.
//!
//! This module defines the data types shared by every spammer component:
//! secrets, configuration schemas, implementation registries, delivery
//! receipts and the workload classes the generator knows how to produce.

/// Transaction delivery types for blockchain interactions.
pub mod delivery;
/// Registry trait implemented by every pluggable implementation.
pub mod registry;
/// Redacting string wrapper for private keys.
pub mod secret_string;
/// Utility functions for hex formatting.
pub mod utils;
/// Configuration validation types for ensuring type-safe configurations.
pub mod validation;
/// Workload classes produced by the generator.
pub mod workload;

pub use alloy_primitives::{Address, Bytes, B256, U256};
pub use delivery::*;
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use utils::{truncate_id, without_0x_prefix};
pub use validation::*;
pub use workload::WorkloadKind;
