//! Accounts read from a directory of key files.
//!
//! Every regular file in the directory holds one hex private key. Files are
//! read in file name order so the sender order is stable across runs. Hidden
//! files are skipped.

use crate::{AccountError, AccountFactory, AccountInterface, AccountRegistry, SenderAccount};
use async_trait::async_trait;
use spammer_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, SecretString, ValidationError,
};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Account source backed by a key directory.
pub struct KeyDirAccounts {
	path: PathBuf,
}

impl KeyDirAccounts {
	pub fn new(path: PathBuf) -> Self {
		Self { path }
	}

	async fn key_files(&self) -> Result<Vec<PathBuf>, AccountError> {
		let mut entries = fs::read_dir(&self.path).await.map_err(|e| {
			AccountError::Implementation(format!(
				"Cannot read key directory {}: {}",
				self.path.display(),
				e
			))
		})?;

		let mut files = Vec::new();
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| AccountError::Implementation(e.to_string()))?
		{
			let hidden = entry.file_name().to_string_lossy().starts_with('.');
			let is_file = entry
				.file_type()
				.await
				.map(|t| t.is_file())
				.unwrap_or(false);
			if is_file && !hidden {
				files.push(entry.path());
			}
		}
		files.sort();
		Ok(files)
	}
}

#[async_trait]
impl AccountInterface for KeyDirAccounts {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(KeyDirAccountsSchema)
	}

	async fn load_accounts(&self) -> Result<Vec<SenderAccount>, AccountError> {
		let mut accounts = Vec::new();
		for file in self.key_files().await? {
			let content = fs::read_to_string(&file)
				.await
				.map_err(|e| AccountError::Implementation(e.to_string()))?;
			let account = SenderAccount::from_private_key(&SecretString::new(content), None)
				.map_err(|e| {
					AccountError::InvalidKey(format!("{}: {}", file.display(), e))
				})?;
			tracing::debug!(file = %file.display(), address = %account.address(), "Loaded key");
			accounts.push(account);
		}
		Ok(accounts)
	}
}

/// Writes a freshly generated account's key into `dir`.
///
/// The file is named after the account address, so a later load returns keys
/// in address order.
pub async fn write_key_file(dir: &Path, account: &SenderAccount) -> Result<PathBuf, AccountError> {
	fs::create_dir_all(dir)
		.await
		.map_err(|e| AccountError::Implementation(e.to_string()))?;

	let path = dir.join(format!("{:#x}.key", account.address()));
	let content = account.export_key().with_exposed(|k| format!("{}\n", k));
	fs::write(&path, content)
		.await
		.map_err(|e| AccountError::Implementation(e.to_string()))?;
	Ok(path)
}

/// Configuration schema for KeyDirAccounts.
pub struct KeyDirAccountsSchema;

impl ConfigSchema for KeyDirAccountsSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(vec![Field::new("path", FieldType::String)], vec![]);
		schema.validate(config)
	}
}

/// Factory function to create a key directory account source.
///
/// Configuration parameters:
/// - `path`: directory holding one key per file
pub fn create_account(config: &toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> {
	KeyDirAccountsSchema
		.validate(config)
		.map_err(|e| AccountError::Implementation(format!("Invalid configuration: {}", e)))?;

	let path = config
		.get("path")
		.and_then(|v| v.as_str())
		.ok_or_else(|| AccountError::Implementation("path is required".into()))?;

	Ok(Box::new(KeyDirAccounts::new(PathBuf::from(path))))
}

/// Registry for the key directory account implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "key_dir";
	type Factory = AccountFactory;

	fn factory() -> Self::Factory {
		create_account
	}
}

impl AccountRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_files_loaded_in_name_order() {
		let dir = TempDir::new().unwrap();
		std::fs::write(
			dir.path().join("b.key"),
			"0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d\n",
		)
		.unwrap();
		std::fs::write(
			dir.path().join("a.key"),
			"ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
		)
		.unwrap();
		std::fs::write(dir.path().join(".ignored"), "garbage").unwrap();

		let accounts = KeyDirAccounts::new(dir.path().to_path_buf())
			.load_accounts()
			.await
			.unwrap();

		assert_eq!(accounts.len(), 2);
		assert_eq!(
			format!("{:#x}", accounts[0].address()),
			"0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
		);
		assert_eq!(
			format!("{:#x}", accounts[1].address()),
			"0x70997970c51812dc3a010c7d01b50e0d17dc79c8"
		);
	}

	#[tokio::test]
	async fn test_bad_key_names_file() {
		let dir = TempDir::new().unwrap();
		std::fs::write(dir.path().join("broken.key"), "not a key").unwrap();

		let err = KeyDirAccounts::new(dir.path().to_path_buf())
			.load_accounts()
			.await
			.unwrap_err();
		assert!(err.to_string().contains("broken.key"));
	}

	#[tokio::test]
	async fn test_write_then_load() {
		let dir = TempDir::new().unwrap();
		let account = SenderAccount::random();
		let path = write_key_file(dir.path(), &account).await.unwrap();
		assert!(path.exists());

		let config: toml::Value =
			toml::from_str(&format!("path = {:?}", dir.path().display().to_string())).unwrap();
		let accounts = create_account(&config)
			.unwrap()
			.load_accounts()
			.await
			.unwrap();
		assert_eq!(accounts.len(), 1);
		assert_eq!(accounts[0].address(), account.address());
	}
}
