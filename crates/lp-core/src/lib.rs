//! Client-side orchestration for the protocol.
//!
//! Everything the protocol does happens on chain; this crate turns the
//! node's coarse primitives (dispatch a transaction, poll for a receipt,
//! subscribe to a log filter) into operations with one unambiguous outcome
//! each:
//!
//! - [`TransactionOrchestrator`] dispatches and confirms transactions.
//! - [`EventWatcher`] waits for the first durable log on a filter.
//! - [`ApprovalChain`] sequences an allowance grant before a spend.
//! - [`JobLifecycleManager`] is the public operation surface.
//! - [`ProtocolParameterCache`] reads protocol timing constants.

use alloy::sol_types::SolCall;
use lp_account::AccountService;
use lp_chain::ChainService;
use lp_contracts::{ContractError, ContractRegistry};
use lp_types::{Address, ContractRole, B256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod approval;
pub mod builder;
pub mod events;
pub mod handle;
pub mod lifecycle;
pub mod params;
pub mod transaction;
pub mod transcoder;

pub use approval::ApprovalChain;
pub use events::EventWatcher;
pub use handle::OperationHandle;
pub use lifecycle::JobLifecycleManager;
pub use params::ProtocolParameterCache;
pub use transaction::TransactionOrchestrator;
pub use transcoder::{Segment, SubmittedClaim, TranscodeError, TranscodedSegment, Transcoder};

/// Terminal failure of a client operation.
#[derive(Debug, Error)]
pub enum ClientError {
	/// The node refused the transaction at dispatch. Never retried.
	#[error("Transaction rejected at dispatch: {0}")]
	Submission(String),
	/// No receipt arrived within the confirmation budget. The transaction may
	/// still be mined later.
	#[error("Transaction {hash} not mined within {timeout:?}")]
	ConfirmationTimeout {
		hash: B256,
		timeout: Duration,
		/// Last receipt read failure, if the node was erroring.
		last_error: Option<String>,
	},
	/// The transaction was mined but failed, either by an explicit status or
	/// by consuming its whole gas limit.
	#[error("Transaction {hash} reverted in block {block_number} (gas used {gas_used})")]
	OnChainRevert {
		hash: B256,
		block_number: u64,
		gas_used: u64,
	},
	/// A log subscription could not be opened or was closed by the node.
	#[error("Subscription failed: {0}")]
	Subscription(String),
	/// No durable matching event arrived in time. Retracted logs do not
	/// extend the wait.
	#[error("No matching event within {0:?}")]
	EventTimeout(Duration),
	/// The operation's task panicked, or a step gave up for good.
	#[error("Unrecoverable process error: {0}")]
	UnrecoverableProcess(String),
	/// A read-only contract call failed.
	#[error("Read failed: {0}")]
	Read(String),
	#[error("Signing failed: {0}")]
	Signing(String),
	/// The caller's arguments were rejected before anything was sent.
	#[error("Invalid request: {0}")]
	InvalidRequest(String),
	/// Binding resolution or decoding of contract data failed.
	#[error("Contract error: {0}")]
	Contract(#[from] ContractError),
	/// The caller stopped waiting. Anything already dispatched stays
	/// dispatched.
	#[error("Operation cancelled")]
	Cancelled,
}

/// Runs a read-only contract call, surfacing any failure as
/// [`ClientError::Read`].
pub(crate) async fn read_contract<C: SolCall>(
	registry: &ContractRegistry,
	role: ContractRole,
	call: C,
) -> Result<C::Return, ClientError> {
	registry.read(role, call).await.map_err(|e| {
		tracing::error!(contract = %role, function = C::SIGNATURE, error = %e, "Read failed");
		ClientError::Read(e.to_string())
	})
}

/// Bounded waits used by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
	/// Budget for a dispatched transaction to be mined.
	pub confirmation: Duration,
	/// Budget for an awaited event to show up.
	pub event: Duration,
	/// Upper bound of the receipt polling interval.
	pub poll_interval: Duration,
	/// First receipt polling interval; doubled up to `poll_interval`.
	pub initial_poll_interval: Duration,
}

impl Default for Timeouts {
	fn default() -> Self {
		Self {
			confirmation: Duration::from_secs(300),
			event: Duration::from_secs(30),
			poll_interval: Duration::from_secs(1),
			initial_poll_interval: Duration::from_millis(250),
		}
	}
}

impl From<&lp_config::TimeoutsConfig> for Timeouts {
	fn from(config: &lp_config::TimeoutsConfig) -> Self {
		Self {
			confirmation: config.confirmation_timeout(),
			event: config.event_timeout(),
			poll_interval: config.poll_interval(),
			initial_poll_interval: config.initial_poll_interval(),
		}
	}
}

/// A connected client: the lifecycle operations plus the parameter reads.
pub struct ProtocolClient {
	lifecycle: JobLifecycleManager,
	params: ProtocolParameterCache,
}

impl ProtocolClient {
	/// Resolves the contract bindings and wires the client together.
	pub async fn new(
		chain: ChainService,
		account: Arc<AccountService>,
		protocol: Address,
		token: Address,
		timeouts: Timeouts,
	) -> Result<Self, ClientError> {
		let registry = Arc::new(ContractRegistry::connect(chain.clone(), protocol, token).await?);

		let orchestrator = TransactionOrchestrator::new(chain.clone(), account.address(), timeouts);
		let chain_for_reads = chain.clone();
		let watcher = EventWatcher::new(chain, timeouts.event);
		let approvals = ApprovalChain::new(
			registry.clone(),
			orchestrator.clone(),
			watcher.clone(),
			account.address(),
		);

		tracing::info!(account = %account.address(), "Client ready");

		Ok(Self {
			lifecycle: JobLifecycleManager::new(
				registry.clone(),
				chain_for_reads,
				orchestrator,
				watcher,
				approvals,
				account,
			),
			params: ProtocolParameterCache::new(registry),
		})
	}

	/// Write operations, event waits and state reads.
	pub fn lifecycle(&self) -> &JobLifecycleManager {
		&self.lifecycle
	}

	/// Protocol timing parameters.
	pub fn params(&self) -> &ProtocolParameterCache {
		&self.params
	}

	/// Address of the configured account.
	pub fn address(&self) -> Address {
		self.lifecycle.address()
	}
}
