//! Scripted in-memory node for tests.
//!
//! Transactions are "mined" according to receipt rules keyed by function
//! selector, logs can be emitted when a transaction with a given selector is
//! dispatched, and read calls answer from a response table. Every
//! interaction is recorded so tests can assert on what reached the node and
//! in which order.

use crate::{ChainError, ChainGateway};
use alloy::primitives::{keccak256, Address, Bytes, B256};
use async_trait::async_trait;
use lp_types::{
	ChainLog, ConfigSchema, LogFilter, LogSubscription, PendingTransaction, Schema, Transaction,
	TransactionReceipt, ValidationError,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;

/// Gas limit assigned to transactions submitted without one.
pub const SIMULATED_GAS_LIMIT: u64 = 200_000;

/// How the simulated node answers receipt requests for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptRule {
	/// Mined on the first poll with the given gas usage and status field.
	Mined { gas_used: u64, status: Option<bool> },
	/// Mined on the first poll, consuming the whole gas limit, no status.
	ExhaustGas,
	/// Mined only after this many unanswered polls.
	MinedAfter { polls: u32, gas_used: u64 },
	/// Answered with a mined receipt that names a different transaction.
	ForeignHash,
	/// Never mined.
	Never,
}

/// Interaction recorded by the simulated node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
	Submitted { selector: [u8; 4], hash: B256 },
	Subscribed { event_signature: B256 },
}

/// Log emitted when a matching transaction is dispatched.
#[derive(Debug, Clone)]
pub struct ScriptedLog {
	pub address: Address,
	pub event_signature: B256,
	pub account: Address,
	/// Indexed topics following the account topic.
	pub indexed: Vec<B256>,
	pub removed: bool,
}

#[derive(Default)]
struct State {
	block_number: u64,
	submitted: Vec<(Transaction, PendingTransaction)>,
	interactions: Vec<Interaction>,
	receipt_rules: HashMap<[u8; 4], ReceiptRule>,
	default_rule: Option<ReceiptRule>,
	receipt_polls: HashMap<B256, u32>,
	rejections: HashMap<[u8; 4], String>,
	emissions: HashMap<[u8; 4], Vec<ScriptedLog>>,
	call_responses: HashMap<(Address, [u8; 4]), Result<Bytes, String>>,
	exact_call_responses: HashMap<(Address, Bytes), Result<Bytes, String>>,
	subscriptions: Vec<(LogFilter, mpsc::UnboundedSender<ChainLog>)>,
	fail_subscriptions: bool,
	dispatch_delay: Option<Duration>,
	dispatches_in_flight: usize,
	max_dispatches_in_flight: usize,
}

pub struct SimulatedChain {
	state: Mutex<State>,
}

impl Default for SimulatedChain {
	fn default() -> Self {
		Self::new()
	}
}

fn selector_of(data: &[u8]) -> [u8; 4] {
	let mut selector = [0u8; 4];
	let n = data.len().min(4);
	selector[..n].copy_from_slice(&data[..n]);
	selector
}

impl SimulatedChain {
	pub fn new() -> Self {
		Self {
			state: Mutex::new(State {
				block_number: 100,
				..Default::default()
			}),
		}
	}

	fn state(&self) -> std::sync::MutexGuard<'_, State> {
		self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	/// Sets the rule for transactions without a selector-specific rule.
	pub fn set_default_receipt_rule(&self, rule: ReceiptRule) {
		self.state().default_rule = Some(rule);
	}

	pub fn set_receipt_rule(&self, selector: [u8; 4], rule: ReceiptRule) {
		self.state().receipt_rules.insert(selector, rule);
	}

	/// Makes dispatch of transactions with this selector fail.
	pub fn reject_submissions(&self, selector: [u8; 4], reason: &str) {
		self.state().rejections.insert(selector, reason.to_string());
	}

	/// Emits `log` to matching subscribers whenever a transaction with this
	/// selector is dispatched. Multiple logs are emitted in order.
	pub fn emit_on_submit(&self, selector: [u8; 4], log: ScriptedLog) {
		self.state().emissions.entry(selector).or_default().push(log);
	}

	pub fn set_call_response(&self, to: Address, selector: [u8; 4], response: impl Into<Bytes>) {
		self.state()
			.call_responses
			.insert((to, selector), Ok(response.into()));
	}

	pub fn fail_call(&self, to: Address, selector: [u8; 4], reason: &str) {
		self.state()
			.call_responses
			.insert((to, selector), Err(reason.to_string()));
	}

	/// Answers a call with exactly this calldata. Takes precedence over
	/// selector-wide responses.
	pub fn set_exact_call_response(
		&self,
		to: Address,
		calldata: impl Into<Bytes>,
		response: impl Into<Bytes>,
	) {
		self.state()
			.exact_call_responses
			.insert((to, calldata.into()), Ok(response.into()));
	}

	pub fn fail_exact_call(&self, to: Address, calldata: impl Into<Bytes>, reason: &str) {
		self.state()
			.exact_call_responses
			.insert((to, calldata.into()), Err(reason.to_string()));
	}

	pub fn fail_subscriptions(&self) {
		self.state().fail_subscriptions = true;
	}

	/// Makes every dispatch pause between picking its nonce and recording
	/// the transaction, as a node round-trip would.
	pub fn set_dispatch_delay(&self, delay: Duration) {
		self.state().dispatch_delay = Some(delay);
	}

	/// Highest number of dispatches that were in progress at the same time.
	pub fn max_concurrent_dispatches(&self) -> usize {
		self.state().max_dispatches_in_flight
	}

	pub fn set_block_number(&self, block_number: u64) {
		self.state().block_number = block_number;
	}

	/// Delivers a log to every open subscription whose filter matches it.
	pub fn emit(&self, log: ChainLog) {
		let mut state = self.state();
		state.subscriptions.retain(|(_, sender)| !sender.is_closed());
		for (filter, sender) in &state.subscriptions {
			if filter.matches(&log) {
				let _ = sender.send(log.clone());
			}
		}
	}

	/// Transactions dispatched so far, in order.
	pub fn submitted(&self) -> Vec<Transaction> {
		self.state()
			.submitted
			.iter()
			.map(|(tx, _)| tx.clone())
			.collect()
	}

	pub fn submission_count(&self, selector: [u8; 4]) -> usize {
		self.state()
			.submitted
			.iter()
			.filter(|(tx, _)| selector_of(&tx.data) == selector)
			.count()
	}

	pub fn interactions(&self) -> Vec<Interaction> {
		self.state().interactions.clone()
	}

	pub fn receipt_polls(&self, hash: &B256) -> u32 {
		self.state().receipt_polls.get(hash).copied().unwrap_or(0)
	}

	/// Subscriptions whose consumer has not released them yet.
	pub fn open_subscriptions(&self) -> usize {
		self.state()
			.subscriptions
			.iter()
			.filter(|(_, sender)| !sender.is_closed())
			.count()
	}
}

struct SimulatedSchema;

impl ConfigSchema for SimulatedSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

#[async_trait]
impl ChainGateway for SimulatedChain {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(SimulatedSchema)
	}

	async fn get_block_number(&self) -> Result<u64, ChainError> {
		Ok(self.state().block_number)
	}

	async fn get_receipt(&self, hash: &B256) -> Result<Option<TransactionReceipt>, ChainError> {
		let mut state = self.state();
		let polls = {
			let polls = state.receipt_polls.entry(*hash).or_default();
			*polls += 1;
			*polls
		};

		let Some((tx, pending)) = state
			.submitted
			.iter()
			.find(|(_, pending)| pending.hash == *hash)
			.cloned()
		else {
			return Ok(None);
		};

		let rule = state
			.receipt_rules
			.get(&selector_of(&tx.data))
			.copied()
			.or(state.default_rule)
			.unwrap_or(ReceiptRule::Mined {
				gas_used: 21_000,
				status: None,
			});

		let mut transaction_hash = pending.hash;
		let (gas_used, status) = match rule {
			ReceiptRule::Mined { gas_used, status } => (gas_used, status),
			ReceiptRule::ForeignHash => {
				transaction_hash = keccak256(pending.hash);
				(21_000, None)
			},
			ReceiptRule::ExhaustGas => (pending.gas_limit, None),
			ReceiptRule::MinedAfter { polls: needed, gas_used } if polls > needed => {
				(gas_used, None)
			},
			ReceiptRule::MinedAfter { .. } | ReceiptRule::Never => return Ok(None),
		};

		state.block_number += 1;
		Ok(Some(TransactionReceipt {
			transaction_hash,
			block_number: state.block_number,
			gas_used,
			status,
			logs: vec![],
		}))
	}

	async fn submit(&self, tx: Transaction) -> Result<PendingTransaction, ChainError> {
		let selector = selector_of(&tx.data);
		let (nonce, delay) = {
			let mut state = self.state();
			if let Some(reason) = state.rejections.get(&selector) {
				return Err(ChainError::Rejected(reason.clone()));
			}
			state.dispatches_in_flight += 1;
			state.max_dispatches_in_flight = state
				.max_dispatches_in_flight
				.max(state.dispatches_in_flight);
			(state.submitted.len() as u64, state.dispatch_delay)
		};

		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}

		let emissions = {
			let mut state = self.state();
			state.dispatches_in_flight -= 1;

			let mut preimage = tx.data.to_vec();
			preimage.extend_from_slice(&nonce.to_be_bytes());
			let pending = PendingTransaction {
				hash: keccak256(&preimage),
				gas_limit: tx.gas_limit.unwrap_or(SIMULATED_GAS_LIMIT),
				submitted_at: SystemTime::now(),
			};

			state.interactions.push(Interaction::Submitted {
				selector,
				hash: pending.hash,
			});
			state.submitted.push((tx, pending.clone()));
			let emissions = state.emissions.get(&selector).cloned().unwrap_or_default();
			(pending, emissions)
		};

		let (pending, logs) = emissions;
		let block_number = self.state().block_number;
		for scripted in logs {
			let mut topics = vec![scripted.event_signature, scripted.account.into_word()];
			topics.extend(scripted.indexed);
			self.emit(ChainLog {
				address: scripted.address,
				topics,
				data: Bytes::new(),
				block_number: Some(block_number),
				transaction_hash: Some(pending.hash),
				removed: scripted.removed,
			});
		}

		Ok(pending)
	}

	async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
		let state = self.state();
		let response = state
			.exact_call_responses
			.get(&(to, data.clone()))
			.or_else(|| state.call_responses.get(&(to, selector_of(&data))));

		match response {
			Some(Ok(response)) => Ok(response.clone()),
			Some(Err(reason)) => Err(ChainError::Call(reason.clone())),
			None => Err(ChainError::Call(format!(
				"no scripted response for {} selector {}",
				to,
				alloy::hex::encode(selector_of(&data))
			))),
		}
	}

	async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogSubscription, ChainError> {
		let mut state = self.state();
		if state.fail_subscriptions {
			return Err(ChainError::Subscription("filter not supported".to_string()));
		}

		let (sender, receiver) = mpsc::unbounded_channel();
		state.subscriptions.push((filter.clone(), sender));
		state.interactions.push(Interaction::Subscribed {
			event_signature: filter.event_signature,
		});
		Ok(LogSubscription::new(receiver))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const SELECTOR: [u8; 4] = [0xaa, 0xbb, 0xcc, 0xdd];

	fn tx() -> Transaction {
		Transaction::call(Address::repeat_byte(1), SELECTOR.to_vec())
	}

	#[tokio::test]
	async fn test_default_rule_mines_immediately() {
		let chain = SimulatedChain::new();
		let pending = chain.submit(tx()).await.unwrap();

		let receipt = chain.get_receipt(&pending.hash).await.unwrap().unwrap();
		assert_eq!(receipt.transaction_hash, pending.hash);
		assert!(receipt.gas_used < pending.gas_limit);
		assert_eq!(chain.submission_count(SELECTOR), 1);
	}

	#[tokio::test]
	async fn test_mined_after_polls() {
		let chain = SimulatedChain::new();
		chain.set_receipt_rule(
			SELECTOR,
			ReceiptRule::MinedAfter {
				polls: 2,
				gas_used: 50_000,
			},
		);
		let pending = chain.submit(tx()).await.unwrap();

		assert!(chain.get_receipt(&pending.hash).await.unwrap().is_none());
		assert!(chain.get_receipt(&pending.hash).await.unwrap().is_none());
		assert!(chain.get_receipt(&pending.hash).await.unwrap().is_some());
		assert_eq!(chain.receipt_polls(&pending.hash), 3);
	}

	#[tokio::test]
	async fn test_emissions_reach_open_subscriptions_only() {
		let chain = SimulatedChain::new();
		let account = Address::repeat_byte(9);
		let filter = LogFilter::new(Address::repeat_byte(2), B256::repeat_byte(3), account);
		chain.emit_on_submit(
			SELECTOR,
			ScriptedLog {
				address: filter.address,
				event_signature: filter.event_signature,
				account,
				indexed: vec![],
				removed: false,
			},
		);

		let mut subscription = chain.subscribe_logs(&filter).await.unwrap();
		chain.submit(tx()).await.unwrap();
		let log = subscription.recv().await.unwrap();
		assert!(filter.matches(&log));

		subscription.unsubscribe();
		assert_eq!(chain.open_subscriptions(), 0);
	}

	#[tokio::test]
	async fn test_rejected_submission_is_not_recorded() {
		let chain = SimulatedChain::new();
		chain.reject_submissions(SELECTOR, "nonce too low");

		let result = chain.submit(tx()).await;
		assert!(matches!(result, Err(ChainError::Rejected(ref r)) if r == "nonce too low"));
		assert!(chain.submitted().is_empty());
	}

	#[tokio::test]
	async fn test_foreign_hash_receipt() {
		let chain = SimulatedChain::new();
		chain.set_receipt_rule(SELECTOR, ReceiptRule::ForeignHash);
		let pending = chain.submit(tx()).await.unwrap();

		let receipt = chain.get_receipt(&pending.hash).await.unwrap().unwrap();
		assert_ne!(receipt.transaction_hash, pending.hash);
	}

	#[tokio::test(start_paused = true)]
	async fn test_overlapping_dispatches_reuse_a_nonce() {
		let chain = std::sync::Arc::new(SimulatedChain::new());
		chain.set_dispatch_delay(Duration::from_millis(100));

		let first = tokio::spawn({
			let chain = chain.clone();
			async move { chain.submit(tx()).await.unwrap() }
		});
		let second = tokio::spawn({
			let chain = chain.clone();
			async move { chain.submit(tx()).await.unwrap() }
		});
		let (first, second) = (first.await.unwrap(), second.await.unwrap());

		assert_eq!(chain.max_concurrent_dispatches(), 2);
		assert_eq!(first.hash, second.hash);
	}
}
