//! Registry trait for self-registering implementations.
//!
//! Every account source, delivery endpoint and storage backend exposes a
//! `Registry` struct so the service can discover it by configuration name.

/// Base trait for implementation registries.
///
/// The `NAME` is the key used under `implementations` in the TOML
/// configuration, for example `delivery.implementations.evm_alloy` or
/// `account.implementations.key_dir`.
pub trait ImplementationRegistry {
	/// The name used in configuration files to reference this implementation.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Get the factory function for this implementation.
	fn factory() -> Self::Factory;
}
