//! In-memory storage backend.
//!
//! Logs live in a map for the lifetime of the process. Useful for dry runs
//! and tests, which can keep a handle on the map through [`MemoryStorage::logs`].

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use spammer_types::{ConfigSchema, ImplementationRegistry, Schema, ValidationError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared map from log name to its lines.
pub type SharedLogs = Arc<RwLock<HashMap<String, Vec<String>>>>;

/// In-memory storage implementation.
pub struct MemoryStorage {
	/// The in-memory logs protected by a read-write lock.
	logs: SharedLogs,
}

impl MemoryStorage {
	/// Creates a new MemoryStorage instance.
	pub fn new() -> Self {
		Self::with_logs(SharedLogs::default())
	}

	/// Creates a backend writing into an existing map.
	pub fn with_logs(logs: SharedLogs) -> Self {
		Self { logs }
	}

	/// Returns a handle on the stored logs.
	pub fn logs(&self) -> SharedLogs {
		self.logs.clone()
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn append_line(&self, log: &str, line: &str) -> Result<(), StorageError> {
		let mut logs = self.logs.write().await;
		logs.entry(log.to_string())
			.or_default()
			.push(line.to_string());
		Ok(())
	}

	async fn read_lines(&self, log: &str) -> Result<Vec<String>, StorageError> {
		let logs = self.logs.read().await;
		Ok(logs.get(log).cloned().unwrap_or_default())
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStorageSchema)
	}
}

/// Configuration schema for MemoryStorage.
pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		// No configuration
		Schema::new(vec![], vec![]).validate(config)
	}
}

/// Factory function to create a memory storage backend from configuration.
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	MemoryStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;
	Ok(Box::new(MemoryStorage::new()))
}

/// Registry for the memory storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_append_and_read() {
		let storage = MemoryStorage::new();

		storage.append_line("a", "first").await.unwrap();
		storage.append_line("a", "second").await.unwrap();
		storage.append_line("b", "other").await.unwrap();

		assert_eq!(storage.read_lines("a").await.unwrap(), vec!["first", "second"]);
		assert_eq!(storage.read_lines("b").await.unwrap(), vec!["other"]);
		assert!(storage.read_lines("missing").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_shared_handle_sees_writes() {
		let storage = MemoryStorage::new();
		let logs = storage.logs();

		storage.append_line("log", "line").await.unwrap();
		assert_eq!(logs.read().await.get("log").map(Vec::len), Some(1));
	}
}
