//! Transaction dispatch and confirmation.
//!
//! A transaction goes through two phases. Dispatch signs and hands it to the
//! node; a rejection there is final. Confirmation then polls for the receipt
//! with a growing interval until it appears or the confirmation budget runs
//! out, and classifies what it finds.

use crate::{ClientError, Timeouts};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use dashmap::DashMap;
use lp_chain::ChainService;
use lp_types::{
	truncate_id, Address, PendingTransaction, Transaction, TransactionOutcome, TransactionReceipt,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::instrument;

#[derive(Clone)]
pub struct TransactionOrchestrator {
	chain: ChainService,
	account: Address,
	/// Per-account dispatch locks. Nonces are assigned at dispatch, so two
	/// concurrent dispatches from one account must not interleave.
	submission_locks: Arc<DashMap<Address, Arc<Mutex<()>>>>,
	timeouts: Timeouts,
}

impl TransactionOrchestrator {
	/// Orchestrates transactions signed by `account`.
	pub fn new(chain: ChainService, account: Address, timeouts: Timeouts) -> Self {
		Self {
			chain,
			account,
			submission_locks: Arc::new(DashMap::new()),
			timeouts,
		}
	}

	/// Account whose dispatches are serialised here.
	pub fn account(&self) -> Address {
		self.account
	}

	fn submission_lock(&self) -> Arc<Mutex<()>> {
		self.submission_locks
			.entry(self.account)
			.or_insert_with(|| Arc::new(Mutex::new(())))
			.clone()
	}

	/// Dispatches and confirms a transaction.
	pub async fn submit(&self, tx: Transaction) -> Result<TransactionReceipt, ClientError> {
		let pending = self.dispatch(tx).await?;
		self.confirm(&pending).await
	}

	/// Signs and dispatches a transaction without waiting for it to be mined.
	#[instrument(skip_all, fields(account = %self.account, to = %tx.to))]
	pub async fn dispatch(&self, tx: Transaction) -> Result<PendingTransaction, ClientError> {
		let lock = self.submission_lock();
		let _guard = lock.lock().await;

		match self.chain.submit(tx).await {
			Ok(pending) => {
				tracing::info!(
					tx_hash = %truncate_id(&pending.hash.to_string()),
					gas_limit = pending.gas_limit,
					"Submitted transaction"
				);
				Ok(pending)
			},
			Err(e) => {
				tracing::error!(error = %e, "Transaction rejected at dispatch");
				Err(ClientError::Submission(e.to_string()))
			},
		}
	}

	/// Polls for the receipt of `pending` until it is mined or the
	/// confirmation timeout elapses.
	///
	/// Failed receipt reads are retried within the same budget. The wait
	/// ends no later than the deadline, even if a read is in flight.
	#[instrument(skip_all, fields(tx_hash = %truncate_id(&pending.hash.to_string())))]
	pub async fn confirm(
		&self,
		pending: &PendingTransaction,
	) -> Result<TransactionReceipt, ClientError> {
		let timeout = self.timeouts.confirmation;
		let deadline = Instant::now() + timeout;
		let mut backoff = ExponentialBackoffBuilder::new()
			.with_initial_interval(self.timeouts.initial_poll_interval)
			.with_multiplier(2.0)
			.with_randomization_factor(0.0)
			.with_max_interval(self.timeouts.poll_interval)
			.with_max_elapsed_time(None)
			.build();
		let mut last_error = None;

		loop {
			match tokio::time::timeout_at(deadline, self.chain.receipt(&pending.hash)).await {
				Err(_) => break,
				Ok(Ok(Some(receipt))) if receipt.transaction_hash == pending.hash => {
					return classify(pending, receipt);
				},
				Ok(Ok(Some(receipt))) => {
					tracing::warn!(
						receipt_hash = %receipt.transaction_hash,
						"Ignoring receipt for a different transaction"
					);
				},
				Ok(Ok(None)) => {
					tracing::debug!("Receipt not available yet");
				},
				Ok(Err(e)) => {
					tracing::warn!(error = %e, "Receipt read failed, retrying");
					last_error = Some(e.to_string());
				},
			}

			let now = Instant::now();
			if now >= deadline {
				break;
			}
			let delay = backoff
				.next_backoff()
				.unwrap_or(self.timeouts.poll_interval)
				.min(deadline - now);
			tokio::time::sleep(delay).await;
		}

		tracing::warn!(timeout_secs = timeout.as_secs(), "Timed out waiting for receipt");
		Err(ClientError::ConfirmationTimeout {
			hash: pending.hash,
			timeout,
			last_error,
		})
	}
}

fn classify(
	pending: &PendingTransaction,
	receipt: TransactionReceipt,
) -> Result<TransactionReceipt, ClientError> {
	match receipt.outcome(pending) {
		TransactionOutcome::Confirmed => {
			tracing::info!(
				block_number = receipt.block_number,
				gas_used = receipt.gas_used,
				"Transaction confirmed"
			);
			Ok(receipt)
		},
		TransactionOutcome::Reverted => {
			tracing::warn!(
				block_number = receipt.block_number,
				gas_used = receipt.gas_used,
				gas_limit = pending.gas_limit,
				explicit_status = receipt.status.is_some(),
				"Transaction reverted"
			);
			Err(ClientError::OnChainRevert {
				hash: pending.hash,
				block_number: receipt.block_number,
				gas_used: receipt.gas_used,
			})
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use lp_chain::implementations::simulated::{ReceiptRule, SimulatedChain, SIMULATED_GAS_LIMIT};
	use std::time::Duration;

	const SELECTOR: [u8; 4] = [0x01, 0x02, 0x03, 0x04];

	fn orchestrator(chain: &Arc<SimulatedChain>, confirmation: Duration) -> TransactionOrchestrator {
		TransactionOrchestrator::new(
			ChainService::new(chain.clone(), Duration::from_secs(5)),
			Address::repeat_byte(0xaa),
			Timeouts {
				confirmation,
				..Timeouts::default()
			},
		)
	}

	fn tx() -> Transaction {
		Transaction::call(Address::repeat_byte(0x01), SELECTOR.to_vec())
	}

	#[tokio::test(start_paused = true)]
	async fn test_never_mined_times_out_within_one_poll_interval() {
		for secs in [1u64, 7, 30] {
			let chain = Arc::new(SimulatedChain::new());
			chain.set_receipt_rule(SELECTOR, ReceiptRule::Never);
			let timeout = Duration::from_secs(secs);
			let orchestrator = orchestrator(&chain, timeout);

			let started = Instant::now();
			let result = orchestrator.submit(tx()).await;
			let elapsed = started.elapsed();

			assert!(matches!(
				result,
				Err(ClientError::ConfirmationTimeout { timeout: t, .. }) if t == timeout
			));
			assert!(elapsed >= timeout, "returned early after {:?}", elapsed);
			assert!(elapsed <= timeout + Timeouts::default().poll_interval);
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_gas_equal_to_limit_is_revert() {
		let chain = Arc::new(SimulatedChain::new());
		chain.set_receipt_rule(SELECTOR, ReceiptRule::ExhaustGas);

		let result = orchestrator(&chain, Duration::from_secs(60)).submit(tx()).await;
		assert!(matches!(
			result,
			Err(ClientError::OnChainRevert { gas_used, .. }) if gas_used == SIMULATED_GAS_LIMIT
		));
	}

	#[tokio::test(start_paused = true)]
	async fn test_gas_below_limit_is_confirmed() {
		let chain = Arc::new(SimulatedChain::new());
		chain.set_receipt_rule(
			SELECTOR,
			ReceiptRule::Mined {
				gas_used: SIMULATED_GAS_LIMIT - 1,
				status: None,
			},
		);

		let receipt = orchestrator(&chain, Duration::from_secs(60))
			.submit(tx())
			.await
			.unwrap();
		assert_eq!(receipt.gas_used, SIMULATED_GAS_LIMIT - 1);
		assert!(receipt.block_number > 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_explicit_failure_status_is_revert() {
		let chain = Arc::new(SimulatedChain::new());
		chain.set_receipt_rule(
			SELECTOR,
			ReceiptRule::Mined {
				gas_used: 30_000,
				status: Some(false),
			},
		);

		let result = orchestrator(&chain, Duration::from_secs(60)).submit(tx()).await;
		assert!(matches!(result, Err(ClientError::OnChainRevert { .. })));
	}

	#[tokio::test(start_paused = true)]
	async fn test_dispatch_failure_is_not_retried() {
		let chain = Arc::new(SimulatedChain::new());
		chain.reject_submissions(SELECTOR, "insufficient funds for gas");

		let result = orchestrator(&chain, Duration::from_secs(60)).submit(tx()).await;
		assert!(matches!(result, Err(ClientError::Submission(ref m)) if m.contains("insufficient funds")));
		assert!(chain.submitted().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn test_polling_backs_off_to_poll_interval() {
		let chain = Arc::new(SimulatedChain::new());
		chain.set_receipt_rule(
			SELECTOR,
			ReceiptRule::MinedAfter {
				polls: 5,
				gas_used: 50_000,
			},
		);
		let orchestrator = orchestrator(&chain, Duration::from_secs(60));

		let started = Instant::now();
		let receipt = orchestrator.submit(tx()).await.unwrap();

		// Sleeps of 250ms, 500ms, then 1s each, five of them before the
		// sixth poll succeeds.
		let expected = Duration::from_millis(250 + 500 + 1000 * 3);
		assert!(started.elapsed() >= expected);
		assert!(started.elapsed() < expected + Duration::from_millis(10));
		assert_eq!(chain.receipt_polls(&receipt.transaction_hash), 6);
	}

	#[tokio::test(start_paused = true)]
	async fn test_receipt_for_another_hash_is_ignored() {
		let chain = Arc::new(SimulatedChain::new());
		chain.set_receipt_rule(SELECTOR, ReceiptRule::ForeignHash);
		let orchestrator = orchestrator(&chain, Duration::from_secs(5));

		let started = Instant::now();
		let pending = orchestrator.dispatch(tx()).await.unwrap();
		let result = orchestrator.confirm(&pending).await;

		assert!(matches!(
			result,
			Err(ClientError::ConfirmationTimeout { hash, last_error: None, .. }) if hash == pending.hash
		));
		assert!(started.elapsed() >= Duration::from_secs(5));
		assert!(chain.receipt_polls(&pending.hash) > 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_concurrent_dispatches_are_serialised() {
		let chain = Arc::new(SimulatedChain::new());
		chain.set_dispatch_delay(Duration::from_millis(100));
		let orchestrator = orchestrator(&chain, Duration::from_secs(60));

		let started = Instant::now();
		let handles: Vec<_> = (0..8)
			.map(|_| {
				let orchestrator = orchestrator.clone();
				tokio::spawn(async move { orchestrator.dispatch(tx()).await })
			})
			.collect();
		let mut hashes = Vec::new();
		for handle in handles {
			hashes.push(handle.await.unwrap().unwrap().hash);
		}

		assert_eq!(chain.max_concurrent_dispatches(), 1);
		assert_eq!(started.elapsed(), Duration::from_millis(800));
		hashes.sort();
		hashes.dedup();
		assert_eq!(hashes.len(), 8);
		assert_eq!(chain.submission_count(SELECTOR), 8);
	}
}
