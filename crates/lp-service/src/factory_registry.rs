//! Registry of account and node implementations.
//!
//! Every implementation a crate exports through `get_all_implementations` is
//! registered here once; configuration then picks among them by name.

use lp_account::AccountFactory;
use lp_chain::ChainFactory;
use lp_config::Config;
use lp_core::builder::{ClientBuilder, ClientFactories};
use lp_core::ProtocolClient;
use std::collections::HashMap;
use std::sync::OnceLock;

pub struct FactoryRegistry {
	pub account: HashMap<String, AccountFactory>,
	pub chain: HashMap<String, ChainFactory>,
}

impl FactoryRegistry {
	pub fn new() -> Self {
		Self {
			account: HashMap::new(),
			chain: HashMap::new(),
		}
	}

	pub fn register_account(&mut self, name: impl Into<String>, factory: AccountFactory) {
		self.account.insert(name.into(), factory);
	}

	pub fn register_chain(&mut self, name: impl Into<String>, factory: ChainFactory) {
		self.chain.insert(name.into(), factory);
	}
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

pub fn get_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(|| {
		let mut registry = FactoryRegistry::new();

		for (name, factory) in lp_account::get_all_implementations() {
			tracing::debug!("Registering account implementation: {}", name);
			registry.register_account(name, factory);
		}

		for (name, factory) in lp_chain::get_all_implementations() {
			tracing::debug!("Registering chain implementation: {}", name);
			registry.register_chain(name, factory);
		}

		registry
	})
}

/// Picks the factory for every configured implementation, failing on names
/// nothing registered.
macro_rules! build_factories {
	($registry:expr, $config_impls:expr, $registry_field:ident, $type_name:literal) => {{
		let mut factories = HashMap::new();
		for name in $config_impls.keys() {
			if let Some(factory) = $registry.$registry_field.get(name) {
				factories.insert(name.clone(), *factory);
			} else {
				let mut available: Vec<_> = $registry.$registry_field.keys().cloned().collect();
				available.sort();
				return Err(format!(
					"Unknown {} implementation '{}'. Available: [{}]",
					$type_name,
					name,
					available.join(", ")
				)
				.into());
			}
		}
		factories
	}};
}

/// Builds a connected client from configuration.
pub async fn build_client_from_config(
	config: Config,
) -> Result<ProtocolClient, Box<dyn std::error::Error>> {
	let registry = get_registry();

	let account_factories =
		build_factories!(registry, config.account.implementations, account, "account");
	let chain_factories = build_factories!(registry, config.chain.implementations, chain, "chain");

	let client = ClientBuilder::new(config)
		.build(ClientFactories {
			account_factories,
			chain_factories,
		})
		.await?;
	Ok(client)
}
