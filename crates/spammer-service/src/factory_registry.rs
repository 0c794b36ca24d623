//! Factory registry for spammer implementations.
//!
//! Collects the factories every implementation crate exposes and picks the
//! ones a configuration names, so that an unknown implementation is
//! reported with the list of available ones before anything is built.

use spammer_account::AccountFactory;
use spammer_config::Config;
use spammer_core::{SpammerBuilder, SpammerEngine, SpammerFactories};
use spammer_delivery::DeliveryFactory;
use spammer_storage::StorageFactory;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Registry for all implementation factories.
pub struct FactoryRegistry {
	pub account: HashMap<String, AccountFactory>,
	pub delivery: HashMap<String, DeliveryFactory>,
	pub storage: HashMap<String, StorageFactory>,
}

impl FactoryRegistry {
	/// Creates a registry holding every known implementation.
	fn with_all_implementations() -> Self {
		let mut registry = Self {
			account: HashMap::new(),
			delivery: HashMap::new(),
			storage: HashMap::new(),
		};

		for (name, factory) in spammer_account::get_all_implementations() {
			tracing::debug!("Registering account implementation: {}", name);
			registry.account.insert(name.to_string(), factory);
		}
		for (name, factory) in spammer_delivery::get_all_implementations() {
			tracing::debug!("Registering delivery implementation: {}", name);
			registry.delivery.insert(name.to_string(), factory);
		}
		for (name, factory) in spammer_storage::get_all_implementations() {
			tracing::debug!("Registering storage implementation: {}", name);
			registry.storage.insert(name.to_string(), factory);
		}

		registry
	}
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

/// Get the global factory registry
pub fn get_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(FactoryRegistry::with_all_implementations)
}

/// Picks the factories for the implementations a config section names.
fn select<F: Copy>(
	available: &HashMap<String, F>,
	configured: &HashMap<String, toml::Value>,
	component: &str,
) -> Result<HashMap<String, F>, String> {
	let mut factories = HashMap::new();
	for name in configured.keys() {
		match available.get(name) {
			Some(factory) => {
				factories.insert(name.clone(), *factory);
			},
			None => {
				let mut names: Vec<_> = available.keys().cloned().collect();
				names.sort();
				return Err(format!(
					"Unknown {} implementation '{}'. Available: [{}]",
					component,
					name,
					names.join(", ")
				));
			},
		}
	}
	Ok(factories)
}

/// Builds the engine using the registry and config.
pub async fn build_spammer_from_config(
	config: Config,
) -> Result<SpammerEngine, Box<dyn std::error::Error>> {
	let registry = get_registry();

	let factories = SpammerFactories {
		account_factories: select(&registry.account, &config.account.implementations, "account")?,
		delivery_factories: select(
			&registry.delivery,
			&config.delivery.implementations,
			"delivery",
		)?,
		storage_factories: select(&registry.storage, &config.storage.implementations, "storage")?,
	};

	Ok(SpammerBuilder::new(config).build(factories).await?)
}
