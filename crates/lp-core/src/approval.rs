//! Allowance-then-spend sequencing.

use crate::{ClientError, EventWatcher, TransactionOrchestrator};
use lp_contracts::abi::ILivepeerToken;
use lp_contracts::ContractRegistry;
use lp_types::{
	left_pad_address, truncate_id, Address, ContractRole, Transaction, TransactionReceipt, U256,
};
use std::sync::Arc;
use tracing::instrument;

/// Runs a token-spending transaction behind an allowance grant.
///
/// The spending transaction is dispatched only after the `Approval` event of
/// this very grant (same transaction hash and spender) has been observed and
/// was not retracted. Approvals from other transactions of the account are
/// ignored. If the
/// grant cannot be dispatched or its event does not show up in time, the
/// spending transaction is never sent.
#[derive(Clone)]
pub struct ApprovalChain {
	registry: Arc<ContractRegistry>,
	orchestrator: TransactionOrchestrator,
	watcher: EventWatcher,
	account: Address,
}

impl ApprovalChain {
	/// All collaborators must act for `account`.
	pub fn new(
		registry: Arc<ContractRegistry>,
		orchestrator: TransactionOrchestrator,
		watcher: EventWatcher,
		account: Address,
	) -> Self {
		Self {
			registry,
			orchestrator,
			watcher,
			account,
		}
	}

	/// Grants `spender` an allowance of `amount`, then submits and confirms
	/// `action`.
	#[instrument(skip_all, fields(spender = %spender, amount = %amount))]
	pub async fn spend_with_approval(
		&self,
		spender: Address,
		amount: U256,
		action: Transaction,
	) -> Result<TransactionReceipt, ClientError> {
		// Subscribe first so the grant event cannot slip past us.
		let filter = self.registry.approval_filter(self.account);
		let subscription = self.watcher.subscribe(&filter).await?;

		let approve = self.registry.transaction(
			ContractRole::Token,
			ILivepeerToken::approveCall {
				spender,
				value: amount,
			},
		);
		// The event is the signal here, not the receipt.
		let grant = self.orchestrator.dispatch(approve).await?;

		let grant_hash = grant.hash;
		let spender_topic = left_pad_address(&spender);
		let event = EventWatcher::wait_for(subscription, self.watcher.timeout(), move |log| {
			log.transaction_hash == Some(grant_hash) && log.topics.get(2) == Some(&spender_topic)
		})
		.await
			.inspect_err(|e| {
				tracing::warn!(
					approve_tx = %truncate_id(&grant.hash.to_string()),
					error = %e,
					"Allowance grant not observed, dropping dependent transaction"
				)
			})?;
		tracing::info!(
			block_number = ?event.block_number,
			"Allowance granted"
		);

		self.orchestrator.submit(action).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::Timeouts;
	use alloy::sol_types::{SolCall, SolEvent};
	use lp_chain::implementations::simulated::{Interaction, ScriptedLog, SimulatedChain};
	use lp_chain::ChainService;
	use lp_contracts::abi::IBondingManager;
	use lp_contracts::testing::Deployment;
	use lp_types::{Bytes, ChainLog, B256};
	use std::time::Duration;
	use tokio::time::Instant;

	const ACCOUNT: Address = Address::new([0xaa; 20]);

	async fn approval_chain(chain: &Arc<SimulatedChain>) -> (ApprovalChain, Deployment) {
		let deployment = Deployment::scripted(chain);
		let service = ChainService::new(chain.clone(), Duration::from_secs(5));
		let registry = Arc::new(
			ContractRegistry::connect(service.clone(), deployment.protocol, deployment.token)
				.await
				.unwrap(),
		);
		let orchestrator = TransactionOrchestrator::new(service.clone(), ACCOUNT, Timeouts::default());
		let watcher = EventWatcher::new(service, Duration::from_secs(30));
		(
			ApprovalChain::new(registry, orchestrator, watcher, ACCOUNT),
			deployment,
		)
	}

	fn bond(deployment: &Deployment) -> Transaction {
		Transaction::call(
			deployment.bonding_manager,
			IBondingManager::bondCall {
				amount: U256::from(1000),
				to: Address::repeat_byte(0xbb),
			}
			.abi_encode(),
		)
	}

	fn grant(chain: &SimulatedChain, deployment: &Deployment, removed: bool) {
		chain.emit_on_submit(
			ILivepeerToken::approveCall::SELECTOR,
			ScriptedLog {
				address: deployment.token,
				event_signature: ILivepeerToken::Approval::SIGNATURE_HASH,
				account: ACCOUNT,
				indexed: vec![left_pad_address(&deployment.bonding_manager)],
				removed,
			},
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_action_follows_observed_grant() {
		let chain = Arc::new(SimulatedChain::new());
		let (approvals, deployment) = approval_chain(&chain).await;
		grant(&chain, &deployment, true);
		grant(&chain, &deployment, false);

		let receipt = approvals
			.spend_with_approval(deployment.bonding_manager, U256::from(1000), bond(&deployment))
			.await
			.unwrap();
		assert!(receipt.block_number > 0);

		let interactions = chain.interactions();
		let selectors: Vec<_> = interactions
			.iter()
			.filter_map(|i| match i {
				Interaction::Submitted { selector, .. } => Some(*selector),
				_ => None,
			})
			.collect();
		assert_eq!(
			selectors,
			vec![
				ILivepeerToken::approveCall::SELECTOR,
				IBondingManager::bondCall::SELECTOR
			]
		);
		assert!(matches!(interactions[0], Interaction::Subscribed { .. }));
		assert_eq!(chain.open_subscriptions(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_missing_grant_event_never_dispatches_action() {
		let chain = Arc::new(SimulatedChain::new());
		let (approvals, deployment) = approval_chain(&chain).await;

		let started = Instant::now();
		let result = approvals
			.spend_with_approval(deployment.bonding_manager, U256::from(1000), bond(&deployment))
			.await;

		assert!(matches!(result, Err(ClientError::EventTimeout(d)) if d == Duration::from_secs(30)));
		assert_eq!(started.elapsed(), Duration::from_secs(30));
		assert_eq!(chain.submission_count(ILivepeerToken::approveCall::SELECTOR), 1);
		assert_eq!(chain.submission_count(IBondingManager::bondCall::SELECTOR), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_rejected_grant_surfaces_submission_error() {
		let chain = Arc::new(SimulatedChain::new());
		let (approvals, deployment) = approval_chain(&chain).await;
		chain.reject_submissions(ILivepeerToken::approveCall::SELECTOR, "nonce too low");

		let result = approvals
			.spend_with_approval(deployment.bonding_manager, U256::from(1000), bond(&deployment))
			.await;

		assert!(matches!(result, Err(ClientError::Submission(_))));
		assert_eq!(chain.submission_count(IBondingManager::bondCall::SELECTOR), 0);
		assert_eq!(chain.open_subscriptions(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_foreign_approval_does_not_release_action() {
		let chain = Arc::new(SimulatedChain::new());
		let (approvals, deployment) = approval_chain(&chain).await;

		let emitter = chain.clone();
		let token = deployment.token;
		let bonding_manager = deployment.bonding_manager;
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_secs(1)).await;
			// Another spender, another transaction.
			emitter.emit(approval_log(token, Address::repeat_byte(0x99), B256::repeat_byte(0xee)));
			// Our spender, but granted by a different transaction.
			emitter.emit(approval_log(token, bonding_manager, B256::repeat_byte(0xef)));
		});

		let started = Instant::now();
		let result = approvals
			.spend_with_approval(deployment.bonding_manager, U256::from(1000), bond(&deployment))
			.await;

		assert!(matches!(result, Err(ClientError::EventTimeout(_))));
		assert_eq!(started.elapsed(), Duration::from_secs(30));
		assert_eq!(chain.submission_count(IBondingManager::bondCall::SELECTOR), 0);
		assert_eq!(chain.open_subscriptions(), 0);
	}

	fn approval_log(token: Address, spender: Address, transaction_hash: B256) -> ChainLog {
		ChainLog {
			address: token,
			topics: vec![
				ILivepeerToken::Approval::SIGNATURE_HASH,
				left_pad_address(&ACCOUNT),
				left_pad_address(&spender),
			],
			data: Bytes::new(),
			block_number: Some(101),
			transaction_hash: Some(transaction_hash),
			removed: false,
		}
	}
}
