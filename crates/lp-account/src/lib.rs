//! Account management for the protocol client.
//!
//! An account is an address plus the ability to sign with its key. Every
//! transaction the client submits is signed by exactly this account. The key
//! is loaded once and shared by reference with the node connection, never
//! copied.

use alloy::primitives::{Address, Bytes, B256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use std::sync::Arc;
use lp_types::{ConfigSchema, ImplementationRegistry};
use thiserror::Error;

pub mod implementations {
	pub mod local;
}

/// Errors that can occur during account operations.
#[derive(Debug, Error)]
pub enum AccountError {
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	#[error("Keystore error: {0}")]
	Keystore(String),
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),
}

/// Interface implemented by every account backend.
#[async_trait]
pub trait AccountInterface: Send + Sync {
	/// Schema for this backend's `[account.implementations.<name>]` table.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	fn address(&self) -> Address;

	/// Signs `message` under the EIP-191 personal-message prefix.
	async fn sign_message(&self, message: &[u8]) -> Result<Bytes, AccountError>;

	/// Returns a shared handle to the signer used on the node connection.
	fn transaction_signer(&self) -> Arc<PrivateKeySigner>;
}

/// Factory signature every account backend provides.
pub type AccountFactory = fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>;

pub trait AccountRegistry: ImplementationRegistry<Factory = AccountFactory> {}

/// All registered account backends as (config name, factory) pairs.
pub fn get_all_implementations() -> Vec<(&'static str, AccountFactory)> {
	use implementations::local;

	vec![(local::Registry::NAME, local::Registry::factory())]
}

/// The client's account.
pub struct AccountService {
	implementation: Box<dyn AccountInterface>,
}

impl AccountService {
	/// Wraps an account backend.
	pub fn new(implementation: Box<dyn AccountInterface>) -> Self {
		Self { implementation }
	}

	pub fn address(&self) -> Address {
		self.implementation.address()
	}

	/// Signs a 32-byte segment hash for a broadcaster.
	///
	/// The message is the raw hash under the personal-message prefix, i.e.
	/// keccak256("\x19Ethereum Signed Message:\n32" || hash).
	pub async fn sign_segment_hash(&self, hash: B256) -> Result<Bytes, AccountError> {
		self.implementation
			.sign_message(hash.as_slice())
			.await
			.inspect_err(|e| tracing::error!(error = %e, "Error signing segment hash"))
	}

	/// Shared handle to the account key for signing transactions.
	pub fn transaction_signer(&self) -> Arc<PrivateKeySigner> {
		self.implementation.transaction_signer()
	}
}
