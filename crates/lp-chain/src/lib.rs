//! Access to the blockchain node.
//!
//! The gateway is deliberately thin: fetch the latest block, fetch a receipt,
//! dispatch a signed transaction, run a read-only call and open a log
//! subscription. Retries, confirmation and classification live above it.

use alloy::primitives::{Address, Bytes, B256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use lp_types::{
	ConfigSchema, ImplementationRegistry, LogFilter, LogSubscription, PendingTransaction,
	Transaction, TransactionReceipt,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
	#[cfg(any(test, feature = "testing"))]
	pub mod simulated;
}

/// Errors reported by the node or the transport to it.
#[derive(Debug, Error)]
pub enum ChainError {
	#[error("Network error: {0}")]
	Network(String),
	/// The node refused the transaction at dispatch time.
	#[error("Transaction rejected: {0}")]
	Rejected(String),
	#[error("Subscription failed: {0}")]
	Subscription(String),
	#[error("Call failed: {0}")]
	Call(String),
	#[error("RPC request timed out after {0:?}")]
	Timeout(Duration),
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),
}

/// Interface implemented by node connections.
#[async_trait]
pub trait ChainGateway: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	async fn get_block_number(&self) -> Result<u64, ChainError>;

	/// Returns `Ok(None)` while the transaction is not mined.
	async fn get_receipt(&self, hash: &B256) -> Result<Option<TransactionReceipt>, ChainError>;

	/// Signs and dispatches a transaction, estimating a gas limit if none is
	/// set. Nonce assignment is the gateway's job.
	async fn submit(&self, tx: Transaction) -> Result<PendingTransaction, ChainError>;

	/// Executes a read-only call against the latest block.
	async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError>;

	async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogSubscription, ChainError>;
}

/// Factory signature every gateway implementation provides.
pub type ChainFactory =
	fn(&toml::Value, Arc<PrivateKeySigner>) -> Result<Box<dyn ChainGateway>, ChainError>;

pub trait ChainRegistry: ImplementationRegistry<Factory = ChainFactory> {}

/// All registered gateway implementations as (config name, factory) pairs.
pub fn get_all_implementations() -> Vec<(&'static str, ChainFactory)> {
	use implementations::evm::alloy;

	vec![(alloy::Registry::NAME, alloy::Registry::factory())]
}

/// Node access with a per-request deadline.
///
/// Every call made through the service is bounded by `rpc_timeout`; a
/// request that does not answer in time fails with [`ChainError::Timeout`].
#[derive(Clone)]
pub struct ChainService {
	gateway: Arc<dyn ChainGateway>,
	rpc_timeout: Duration,
}

impl ChainService {
	/// Wraps `gateway`, bounding every request by `rpc_timeout`.
	pub fn new(gateway: Arc<dyn ChainGateway>, rpc_timeout: Duration) -> Self {
		Self {
			gateway,
			rpc_timeout,
		}
	}

	async fn bounded<T, F>(&self, request: F) -> Result<T, ChainError>
	where
		F: Future<Output = Result<T, ChainError>>,
	{
		tokio::time::timeout(self.rpc_timeout, request)
			.await
			.map_err(|_| ChainError::Timeout(self.rpc_timeout))?
	}

	/// Latest block number.
	pub async fn block_number(&self) -> Result<u64, ChainError> {
		self.bounded(self.gateway.get_block_number()).await
	}

	/// Receipt of `hash`, or `None` while it is pending.
	pub async fn receipt(&self, hash: &B256) -> Result<Option<TransactionReceipt>, ChainError> {
		self.bounded(self.gateway.get_receipt(hash)).await
	}

	/// Signs and dispatches `tx`.
	pub async fn submit(&self, tx: Transaction) -> Result<PendingTransaction, ChainError> {
		self.bounded(self.gateway.submit(tx)).await
	}

	/// Read-only call against the latest block.
	pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
		self.bounded(self.gateway.call(to, data)).await
	}

	/// Opens a subscription for logs matching `filter`.
	pub async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogSubscription, ChainError> {
		self.bounded(self.gateway.subscribe_logs(filter)).await
	}
}
