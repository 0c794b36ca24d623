//! Storage module for the transaction spammer.
//!
//! This module persists what a run produces that outlives it, which today is
//! the address of every deployed contract. Storage is append-only: a log is a
//! named sequence of lines, one record per line.

use alloy_primitives::Address;
use async_trait::async_trait;
use spammer_types::{ConfigSchema, ImplementationRegistry};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs when a stored record cannot be parsed.
	#[error("Corrupt record in {log}: {line}")]
	Corrupt { log: String, line: String },
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait defining the low-level interface for storage backends.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Appends one line to `log`, creating the log if needed.
	async fn append_line(&self, log: &str, line: &str) -> Result<(), StorageError>;

	/// Reads all lines of `log`. A log that was never written is empty.
	async fn read_lines(&self, log: &str) -> Result<Vec<String>, StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations.
///
/// Returns a vector of (name, factory) tuples for all available storage implementations.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// Name of the log holding the contracts deployed by `sender`.
pub fn deployment_log(sender: Address) -> String {
	format!("{:#x}", sender)
}

/// High-level storage service with typed records.
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Records a contract deployed by `sender`.
	pub async fn record_deployment(
		&self,
		sender: Address,
		contract: Address,
	) -> Result<(), StorageError> {
		self.backend
			.append_line(&deployment_log(sender), &format!("{:#x}", contract))
			.await?;
		tracing::debug!(sender = %sender, contract = %contract, "Recorded deployment");
		Ok(())
	}

	/// Returns the contracts recorded for `sender`, oldest first.
	pub async fn deployments(&self, sender: Address) -> Result<Vec<Address>, StorageError> {
		let log = deployment_log(sender);
		self.backend
			.read_lines(&log)
			.await?
			.into_iter()
			.filter(|line| !line.trim().is_empty())
			.map(|line| {
				line.trim().parse::<Address>().map_err(|_| StorageError::Corrupt {
					log: log.clone(),
					line,
				})
			})
			.collect()
	}
}
