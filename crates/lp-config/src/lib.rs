//! Configuration for the protocol client.
//!
//! Configuration is read from a TOML file. `${VAR}` and `${VAR:-default}`
//! references are substituted from the environment before parsing, so key
//! material and endpoints can stay out of the file itself. The parsed
//! configuration is validated before it is handed to anyone.
//!
//! ```toml
//! [chain]
//! primary = "alloy"
//! rpc_timeout_seconds = 10
//! [chain.implementations.alloy]
//! rpc_url = "ws://localhost:8546"
//!
//! [account]
//! primary = "local"
//! [account.implementations.local]
//! keystore_path = "/data/keystore/key.json"
//! password = "${LP_PASSWORD}"
//!
//! [protocol]
//! protocol_address = "0x..."
//! token_address = "0x..."
//!
//! [timeouts]
//! confirmation_timeout_seconds = 300
//! event_timeout_seconds = 30
//! ```

use alloy::primitives::Address;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[cfg(any(test, feature = "testing"))]
pub mod builders {
	pub mod config;
}

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Configuration error: {0}")]
	Parse(String),
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// The message alone; the default rendering dumps the whole input.
		ConfigError::Parse(err.message().to_string())
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Node connection.
	pub chain: ChainConfig,
	/// The account every transaction is signed with.
	pub account: AccountConfig,
	/// Root contract addresses.
	pub protocol: ProtocolConfig,
	/// Bounded waits.
	#[serde(default)]
	pub timeouts: TimeoutsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
	/// Which gateway implementation to connect with.
	pub primary: String,
	/// Per-request deadline for every RPC call.
	#[serde(default = "default_rpc_timeout_seconds")]
	pub rpc_timeout_seconds: u64,
	/// Gateway implementation name to its raw configuration.
	pub implementations: HashMap<String, toml::Value>,
}

fn default_rpc_timeout_seconds() -> u64 {
	10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Account implementation name to its raw configuration.
	pub implementations: HashMap<String, toml::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolConfig {
	/// Root contract holding the manager registry.
	pub protocol_address: Address,
	/// Protocol token.
	pub token_address: Address,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TimeoutsConfig {
	/// How long to wait for a submitted transaction to be mined.
	#[serde(default = "default_confirmation_timeout_seconds")]
	pub confirmation_timeout_seconds: u64,
	/// How long to wait for an expected event.
	#[serde(default = "default_event_timeout_seconds")]
	pub event_timeout_seconds: u64,
	/// Upper bound of the receipt polling interval.
	#[serde(default = "default_poll_interval_ms")]
	pub poll_interval_ms: u64,
	/// First receipt polling interval; doubled up to `poll_interval_ms`.
	#[serde(default = "default_initial_poll_interval_ms")]
	pub initial_poll_interval_ms: u64,
}

impl Default for TimeoutsConfig {
	fn default() -> Self {
		Self {
			confirmation_timeout_seconds: default_confirmation_timeout_seconds(),
			event_timeout_seconds: default_event_timeout_seconds(),
			poll_interval_ms: default_poll_interval_ms(),
			initial_poll_interval_ms: default_initial_poll_interval_ms(),
		}
	}
}

impl TimeoutsConfig {
	pub fn confirmation_timeout(&self) -> Duration {
		Duration::from_secs(self.confirmation_timeout_seconds)
	}

	pub fn event_timeout(&self) -> Duration {
		Duration::from_secs(self.event_timeout_seconds)
	}

	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}

	pub fn initial_poll_interval(&self) -> Duration {
		Duration::from_millis(self.initial_poll_interval_ms)
	}
}

fn default_confirmation_timeout_seconds() -> u64 {
	300
}

fn default_event_timeout_seconds() -> u64 {
	30
}

fn default_poll_interval_ms() -> u64 {
	1000
}

fn default_initial_poll_interval_ms() -> u64 {
	250
}

/// Resolves environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of `VAR_NAME`, or with `default`
/// for `${VAR_NAME:-default}` when the variable is unset.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	// Bounded input keeps the regex scan cheap.
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last = 0;

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match (std::env::var(var_name.as_str()), cap.get(2)) {
			(Ok(value), _) => value,
			(Err(_), Some(default)) => default.as_str().to_string(),
			(Err(_), None) => {
				return Err(ConfigError::Validation(format!(
					"Environment variable '{}' not found",
					var_name.as_str()
				)))
			},
		};

		result.push_str(&input[last..full_match.start()]);
		result.push_str(&value);
		last = full_match.end();
	}
	result.push_str(&input[last..]);

	Ok(result)
}

impl Config {
	/// Loads, resolves and validates a configuration file.
	pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let content = tokio::fs::read_to_string(path).await.map_err(|e| {
			ConfigError::Io(std::io::Error::new(
				e.kind(),
				format!("Cannot read {}: {}", path.display(), e),
			))
		})?;
		content.parse()
	}

	/// Checks cross-field constraints serde cannot express.
	///
	/// Implementation tables are validated later by the implementation they
	/// configure, against its own schema.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.chain.primary.is_empty() {
			return Err(ConfigError::Validation(
				"Chain primary implementation cannot be empty".into(),
			));
		}
		if !self.chain.implementations.contains_key(&self.chain.primary) {
			return Err(ConfigError::Validation(format!(
				"Primary chain implementation '{}' not found in implementations",
				self.chain.primary
			)));
		}
		if self.chain.rpc_timeout_seconds == 0 || self.chain.rpc_timeout_seconds > 300 {
			return Err(ConfigError::Validation(
				"rpc_timeout_seconds must be between 1 and 300".into(),
			));
		}

		if self.account.primary.is_empty() {
			return Err(ConfigError::Validation(
				"Account primary implementation cannot be empty".into(),
			));
		}
		if !self
			.account
			.implementations
			.contains_key(&self.account.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary account '{}' not found in implementations",
				self.account.primary
			)));
		}

		if self.protocol.protocol_address.is_zero() {
			return Err(ConfigError::Validation(
				"protocol_address cannot be the zero address".into(),
			));
		}
		if self.protocol.token_address.is_zero() {
			return Err(ConfigError::Validation(
				"token_address cannot be the zero address".into(),
			));
		}
		if self.protocol.protocol_address == self.protocol.token_address {
			return Err(ConfigError::Validation(
				"protocol_address and token_address must differ".into(),
			));
		}

		let timeouts = &self.timeouts;
		if timeouts.confirmation_timeout_seconds == 0 {
			return Err(ConfigError::Validation(
				"confirmation_timeout_seconds must be greater than 0".into(),
			));
		}
		if timeouts.event_timeout_seconds == 0 {
			return Err(ConfigError::Validation(
				"event_timeout_seconds must be greater than 0".into(),
			));
		}
		if timeouts.poll_interval_ms == 0 || timeouts.initial_poll_interval_ms == 0 {
			return Err(ConfigError::Validation(
				"Polling intervals must be greater than 0".into(),
			));
		}
		if timeouts.initial_poll_interval_ms > timeouts.poll_interval_ms {
			return Err(ConfigError::Validation(format!(
				"initial_poll_interval_ms ({}) cannot exceed poll_interval_ms ({})",
				timeouts.initial_poll_interval_ms, timeouts.poll_interval_ms
			)));
		}
		if timeouts.poll_interval() >= timeouts.confirmation_timeout() {
			return Err(ConfigError::Validation(
				"poll_interval_ms must be shorter than the confirmation timeout".into(),
			));
		}

		Ok(())
	}
}

/// Parses a TOML string, resolving environment variables and validating the
/// result.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
