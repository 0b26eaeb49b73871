//! Builder for test configurations.

use crate::{AccountConfig, ChainConfig, Config, ProtocolConfig, TimeoutsConfig};
use alloy::primitives::Address;
use std::collections::HashMap;

/// Well-known development key (first anvil account).
pub const DEV_PRIVATE_KEY: &str =
	"0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Builds a valid [`Config`] with a local private-key account and an alloy
/// gateway pointed at a local node.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	rpc_url: String,
	private_key: String,
	protocol_address: Address,
	token_address: Address,
	timeouts: TimeoutsConfig,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigBuilder {
	pub fn new() -> Self {
		Self {
			rpc_url: "ws://localhost:8546".to_string(),
			private_key: DEV_PRIVATE_KEY.to_string(),
			protocol_address: Address::repeat_byte(0x10),
			token_address: Address::repeat_byte(0x11),
			timeouts: TimeoutsConfig::default(),
		}
	}

	pub fn rpc_url(mut self, rpc_url: impl Into<String>) -> Self {
		self.rpc_url = rpc_url.into();
		self
	}

	pub fn private_key(mut self, private_key: impl Into<String>) -> Self {
		self.private_key = private_key.into();
		self
	}

	pub fn protocol(mut self, protocol_address: Address, token_address: Address) -> Self {
		self.protocol_address = protocol_address;
		self.token_address = token_address;
		self
	}

	pub fn timeouts(mut self, timeouts: TimeoutsConfig) -> Self {
		self.timeouts = timeouts;
		self
	}

	pub fn build(self) -> Config {
		let mut chain_impl = toml::map::Map::new();
		chain_impl.insert("rpc_url".to_string(), toml::Value::String(self.rpc_url));

		let mut account_impl = toml::map::Map::new();
		account_impl.insert(
			"private_key".to_string(),
			toml::Value::String(self.private_key),
		);

		Config {
			chain: ChainConfig {
				primary: "alloy".to_string(),
				rpc_timeout_seconds: 10,
				implementations: HashMap::from([(
					"alloy".to_string(),
					toml::Value::Table(chain_impl),
				)]),
			},
			account: AccountConfig {
				primary: "local".to_string(),
				implementations: HashMap::from([(
					"local".to_string(),
					toml::Value::Table(account_impl),
				)]),
			},
			protocol: ProtocolConfig {
				protocol_address: self.protocol_address,
				token_address: self.token_address,
			},
			timeouts: self.timeouts,
		}
	}
}
