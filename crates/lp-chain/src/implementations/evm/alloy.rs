//! Alloy-backed node connection.
//!
//! Uses a single provider carrying the account's wallet, so transactions are
//! signed and nonce-filled at dispatch. Log subscriptions need a pubsub
//! transport: connect with a `ws://` or `wss://` URL to use them.

use crate::{ChainError, ChainFactory, ChainGateway};
use alloy::consensus::{Eip658Value, TxReceipt};
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::future::Future;
use lp_types::{
	truncate_id, ChainLog, ConfigSchema, Field, FieldType, LogFilter, LogSubscription,
	PendingTransaction, Schema, Transaction, TransactionReceipt, ValidationError,
};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;

pub struct AlloyGateway {
	provider: DynProvider,
	/// Account the provider's wallet signs for.
	from: Address,
}

impl AlloyGateway {
	/// Connects to `rpc_url` with a wallet that shares the account's `signer`.
	pub async fn connect(rpc_url: &str, signer: Arc<PrivateKeySigner>) -> Result<Self, ChainError> {
		let from = signer.address();
		let wallet = EthereumWallet::new(signer);

		let provider = ProviderBuilder::new()
			.wallet(wallet)
			.connect(rpc_url)
			.await
			.map_err(|e| ChainError::Network(format!("Failed to connect to {}: {}", rpc_url, e)))?;

		tracing::info!(rpc_url = %rpc_url, account = %from, "Connected to node");

		Ok(Self {
			provider: provider.erased(),
			from,
		})
	}
}

fn convert_log(log: &Log) -> ChainLog {
	ChainLog {
		address: log.address(),
		topics: log.topics().to_vec(),
		data: log.data().data.clone(),
		block_number: log.block_number,
		transaction_hash: log.transaction_hash,
		removed: log.removed,
	}
}

pub struct AlloyGatewaySchema;

impl AlloyGatewaySchema {
	pub fn validate_config(config: &toml::Value) -> Result<(), ValidationError> {
		AlloyGatewaySchema.validate(config)
	}
}

impl ConfigSchema for AlloyGatewaySchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new(
				"rpc_url",
				FieldType::Url(&["ws", "wss", "http", "https"]),
			)],
			vec![],
		);
		schema.validate(config)
	}
}

#[async_trait]
impl ChainGateway for AlloyGateway {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(AlloyGatewaySchema)
	}

	async fn get_block_number(&self) -> Result<u64, ChainError> {
		self.provider
			.get_block_number()
			.await
			.map_err(|e| ChainError::Network(format!("Failed to get block number: {}", e)))
	}

	async fn get_receipt(&self, hash: &B256) -> Result<Option<TransactionReceipt>, ChainError> {
		let receipt = self
			.provider
			.get_transaction_receipt(*hash)
			.await
			.map_err(|e| ChainError::Network(format!("Failed to get receipt: {}", e)))?;

		Ok(receipt.map(|receipt| {
			// Pre-Byzantium receipts carry a state root instead of a status.
			let status = match receipt.inner.status_or_post_state() {
				Eip658Value::Eip658(success) => Some(success),
				Eip658Value::PostState(_) => None,
			};

			TransactionReceipt {
				transaction_hash: receipt.transaction_hash,
				block_number: receipt.block_number.unwrap_or_default(),
				gas_used: receipt.gas_used,
				status,
				logs: receipt.inner.logs().iter().map(convert_log).collect(),
			}
		}))
	}

	async fn submit(&self, tx: Transaction) -> Result<PendingTransaction, ChainError> {
		let mut request = TransactionRequest::default()
			.with_from(self.from)
			.with_to(tx.to)
			.with_input(tx.data)
			.with_value(tx.value);

		let gas_limit = match tx.gas_limit {
			Some(limit) => limit,
			None => self
				.provider
				.estimate_gas(request.clone())
				.await
				.map_err(|e| ChainError::Rejected(format!("Gas estimation failed: {}", e)))?,
		};
		request.set_gas_limit(gas_limit);

		let pending = self
			.provider
			.send_transaction(request)
			.await
			.map_err(|e| ChainError::Rejected(format!("Failed to send transaction: {}", e)))?;

		let hash = *pending.tx_hash();
		tracing::debug!(tx_hash = %truncate_id(&hash.to_string()), gas_limit, "Dispatched transaction");

		Ok(PendingTransaction {
			hash,
			gas_limit,
			submitted_at: SystemTime::now(),
		})
	}

	async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
		let request = TransactionRequest::default().with_to(to).with_input(data);

		self.provider
			.call(request)
			.await
			.map_err(|e| ChainError::Call(format!("Call to {} failed: {}", to, e)))
	}

	async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogSubscription, ChainError> {
		let rpc_filter = Filter::new()
			.address(filter.address)
			.event_signature(filter.event_signature)
			.topic1(filter.account_topic());

		let subscription = self
			.provider
			.subscribe_logs(&rpc_filter)
			.await
			.map_err(|e| ChainError::Subscription(e.to_string()))?;

		let id = *subscription.local_id();
		let provider = self.provider.clone();
		let (sender, receiver) = mpsc::unbounded_channel();
		tokio::spawn(forward_logs(subscription.into_stream(), sender, move || async move {
			match provider.unsubscribe(id).await {
				Ok(()) => tracing::debug!(subscription = %truncate_id(&id.to_string()), "Released log subscription"),
				Err(e) => tracing::warn!(
					subscription = %truncate_id(&id.to_string()),
					error = %e,
					"Failed to release log subscription"
				),
			}
		}));

		Ok(LogSubscription::new(receiver))
	}
}

/// Pumps node logs into `sender` until the consumer releases its end or the
/// node stream ends, then runs `release` once.
async fn forward_logs<S, R, F>(logs: S, sender: mpsc::UnboundedSender<ChainLog>, release: R)
where
	S: Stream<Item = Log>,
	R: FnOnce() -> F,
	F: Future<Output = ()>,
{
	let mut logs = std::pin::pin!(logs);
	loop {
		tokio::select! {
			_ = sender.closed() => break,
			next = logs.next() => match next {
				Some(log) => {
					if sender.send(convert_log(&log)).is_err() {
						break;
					}
				},
				None => break,
			},
		}
	}
	release().await;
}

/// Builds an alloy gateway from its config table.
///
/// Configuration:
/// - `rpc_url` (required): node endpoint; ws(s) for subscriptions, http(s)
///   for read-only use.
pub fn create_alloy_gateway(
	config: &toml::Value,
	signer: Arc<PrivateKeySigner>,
) -> Result<Box<dyn ChainGateway>, ChainError> {
	AlloyGatewaySchema::validate_config(config)
		.map_err(|e| ChainError::InvalidConfig(e.to_string()))?;

	let rpc_url = config
		.get("rpc_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| ChainError::InvalidConfig("rpc_url is required".to_string()))?;

	let gateway = tokio::task::block_in_place(|| {
		tokio::runtime::Handle::current().block_on(AlloyGateway::connect(rpc_url, signer))
	})?;

	Ok(Box::new(gateway))
}

pub struct Registry;

impl lp_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "alloy";
	type Factory = ChainFactory;

	fn factory() -> Self::Factory {
		create_alloy_gateway
	}
}

impl crate::ChainRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	fn counting_release(counter: &Arc<AtomicUsize>) -> impl FnOnce() -> std::future::Ready<()> {
		let counter = counter.clone();
		move || {
			counter.fetch_add(1, Ordering::SeqCst);
			std::future::ready(())
		}
	}

	#[tokio::test]
	async fn test_consumer_release_unsubscribes_once() {
		let (node, logs) = futures::channel::mpsc::unbounded::<Log>();
		let (sender, receiver) = mpsc::unbounded_channel();
		let released = Arc::new(AtomicUsize::new(0));
		let forwarder = tokio::spawn(forward_logs(logs, sender, counting_release(&released)));

		let mut subscription = LogSubscription::new(receiver);
		node.unbounded_send(Log::default()).unwrap();
		assert!(subscription.recv().await.is_some());
		assert_eq!(released.load(Ordering::SeqCst), 0);

		subscription.unsubscribe();
		forwarder.await.unwrap();
		assert_eq!(released.load(Ordering::SeqCst), 1);
		assert!(node.is_closed());
	}

	#[tokio::test]
	async fn test_dropped_subscription_is_released() {
		let (_node, logs) = futures::channel::mpsc::unbounded::<Log>();
		let (sender, receiver) = mpsc::unbounded_channel();
		let released = Arc::new(AtomicUsize::new(0));
		let forwarder = tokio::spawn(forward_logs(logs, sender, counting_release(&released)));

		drop(LogSubscription::new(receiver));
		forwarder.await.unwrap();
		assert_eq!(released.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_node_stream_end_closes_subscription() {
		let (node, logs) = futures::channel::mpsc::unbounded::<Log>();
		let (sender, receiver) = mpsc::unbounded_channel();
		let released = Arc::new(AtomicUsize::new(0));
		let forwarder = tokio::spawn(forward_logs(logs, sender, counting_release(&released)));

		let mut subscription = LogSubscription::new(receiver);
		drop(node);
		assert!(subscription.recv().await.is_none());
		forwarder.await.unwrap();
		assert_eq!(released.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn test_schema_accepts_ws_and_http() {
		let ws: toml::Value = toml::from_str("rpc_url = \"ws://localhost:8546\"").unwrap();
		let http: toml::Value = toml::from_str("rpc_url = \"https://rpc.example\"").unwrap();
		let bad: toml::Value = toml::from_str("rpc_url = \"localhost:8546\"").unwrap();

		assert!(AlloyGatewaySchema::validate_config(&ws).is_ok());
		assert!(AlloyGatewaySchema::validate_config(&http).is_ok());
		assert!(AlloyGatewaySchema::validate_config(&bad).is_err());
	}

	#[test]
	fn test_factory_rejects_missing_url() {
		let config: toml::Value = toml::from_str("other = 1").unwrap();
		let result = create_alloy_gateway(&config, Arc::new(PrivateKeySigner::random()));
		assert!(matches!(result, Err(ChainError::InvalidConfig(_))));
	}
}
