//! File-based storage backend.
//!
//! Each log is a text file under the configured directory, opened in append
//! mode for every write so concurrent runs never truncate each other's
//! records.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use spammer_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError,
};
use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// File-based storage implementation.
pub struct FileStorage {
	/// Directory holding one file per log.
	base_path: PathBuf,
}

impl FileStorage {
	/// Creates a new FileStorage rooted at `base_path`.
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	/// Converts a log name to a filesystem-safe file path.
	fn log_path(&self, log: &str) -> PathBuf {
		let safe_name = log.replace(['/', '\\', ':'], "_");
		self.base_path.join(format!("{}.txt", safe_name))
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn append_line(&self, log: &str, line: &str) -> Result<(), StorageError> {
		fs::create_dir_all(&self.base_path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		let path = self.log_path(log);
		let mut file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(&path)
			.await
			.map_err(|e| StorageError::Backend(format!("{}: {}", path.display(), e)))?;

		file.write_all(format!("{}\n", line).as_bytes())
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		file.flush()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}

	async fn read_lines(&self, log: &str) -> Result<Vec<String>, StorageError> {
		match fs::read_to_string(self.log_path(log)).await {
			Ok(content) => Ok(content.lines().map(str::to_string).collect()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(vec![], vec![Field::new("path", FieldType::String)]);
		schema.validate(config)
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `path`: directory for the log files (default: "./data/contracts")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let path = config
		.get("path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/contracts");

	Ok(Box::new(FileStorage::new(PathBuf::from(path))))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}
