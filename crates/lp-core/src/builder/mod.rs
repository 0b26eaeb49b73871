//! Builder for constructing a protocol client from configuration.
//!
//! The account and node connection are created through factory functions
//! keyed by implementation name, so the binary can register the production
//! backends and tests can substitute their own.

use crate::{ClientError, ProtocolClient, Timeouts};
use alloy::signers::local::PrivateKeySigner;
use lp_account::{AccountError, AccountInterface, AccountService};
use lp_chain::{ChainError, ChainGateway, ChainService};
use lp_config::Config;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error(transparent)]
	Client(#[from] ClientError),
}

/// Factory functions for every pluggable component.
pub struct ClientFactories<AF, CF> {
	pub account_factories: HashMap<String, AF>,
	pub chain_factories: HashMap<String, CF>,
}

/// Builds a [`ProtocolClient`] from configuration and registered factories.
pub struct ClientBuilder {
	config: Config,
}

impl ClientBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Creates the primary account and node connection, then resolves the
	/// contract bindings.
	pub async fn build<AF, CF>(
		self,
		factories: ClientFactories<AF, CF>,
	) -> Result<ProtocolClient, BuilderError>
	where
		AF: Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>,
		CF: Fn(&toml::Value, Arc<PrivateKeySigner>) -> Result<Box<dyn ChainGateway>, ChainError>,
	{
		let account_name = self.config.account.primary.as_str();
		let account_config = self
			.config
			.account
			.implementations
			.get(account_name)
			.ok_or_else(|| {
				BuilderError::Config(format!(
					"Primary account '{}' has no configuration",
					account_name
				))
			})?;
		let account_factory = factories.account_factories.get(account_name).ok_or_else(|| {
			BuilderError::Config(format!("Unknown account implementation '{}'", account_name))
		})?;
		let account = match account_factory(account_config) {
			Ok(implementation) => {
				tracing::info!(component = "account", implementation = %account_name, "Loaded");
				Arc::new(AccountService::new(implementation))
			},
			Err(e) => {
				tracing::error!(
					component = "account",
					implementation = %account_name,
					error = %e,
					"Failed to create account implementation"
				);
				return Err(BuilderError::Config(format!(
					"Failed to create account implementation '{}': {}",
					account_name, e
				)));
			},
		};

		let chain_name = self.config.chain.primary.as_str();
		let chain_config = self
			.config
			.chain
			.implementations
			.get(chain_name)
			.ok_or_else(|| {
				BuilderError::Config(format!("Primary chain '{}' has no configuration", chain_name))
			})?;
		let chain_factory = factories.chain_factories.get(chain_name).ok_or_else(|| {
			BuilderError::Config(format!("Unknown chain implementation '{}'", chain_name))
		})?;
		let gateway = match chain_factory(chain_config, account.transaction_signer()) {
			Ok(implementation) => {
				tracing::info!(component = "chain", implementation = %chain_name, "Loaded");
				implementation
			},
			Err(e) => {
				tracing::error!(
					component = "chain",
					implementation = %chain_name,
					error = %e,
					"Failed to create chain implementation"
				);
				return Err(BuilderError::Config(format!(
					"Failed to create chain implementation '{}': {}",
					chain_name, e
				)));
			},
		};
		let chain = ChainService::new(
			Arc::from(gateway),
			Duration::from_secs(self.config.chain.rpc_timeout_seconds),
		);

		let client = ProtocolClient::new(
			chain,
			account,
			self.config.protocol.protocol_address,
			self.config.protocol.token_address,
			Timeouts::from(&self.config.timeouts),
		)
		.await?;

		Ok(client)
	}
}
