//! The public operation surface.
//!
//! Every state-changing protocol action is one method returning an
//! [`OperationHandle`] that resolves to the confirmed receipt or a single
//! [`ClientError`]. Job and claim state is held by the contracts; nothing
//! here keeps a local copy of it.

use crate::{read_contract, ApprovalChain, ClientError, EventWatcher, OperationHandle, TransactionOrchestrator};
use alloy::sol_types::SolCall;
use lp_account::AccountService;
use lp_chain::ChainService;
use lp_contracts::abi::{IBondingManager, IJobsManager, ILivepeerToken, IRoundsManager};
use lp_contracts::{decode_new_job, BindingSet, ContractRegistry};
use lp_types::{
	Address, Bytes, ChainLog, ClaimDescriptor, ClaimStatus, ContractRole, JobCreated, JobDescriptor,
	LogSubscription, RoundInfo, SegmentRange, SegmentVerification, Transaction,
	TranscoderInfo, TranscoderStatus, TransactionReceipt, B256, U256,
};
use std::sync::Arc;
use tracing::Instrument;

/// Every protocol operation of one account.
#[derive(Clone)]
pub struct JobLifecycleManager {
	registry: Arc<ContractRegistry>,
	chain: ChainService,
	orchestrator: TransactionOrchestrator,
	watcher: EventWatcher,
	approvals: ApprovalChain,
	account: Arc<AccountService>,
}

impl JobLifecycleManager {
	/// Assembles the manager from its collaborators. All of them must act for
	/// the same account.
	pub fn new(
		registry: Arc<ContractRegistry>,
		chain: ChainService,
		orchestrator: TransactionOrchestrator,
		watcher: EventWatcher,
		approvals: ApprovalChain,
		account: Arc<AccountService>,
	) -> Self {
		Self {
			registry,
			chain,
			orchestrator,
			watcher,
			approvals,
			account,
		}
	}

	/// Address of the account every operation acts for.
	pub fn address(&self) -> Address {
		self.account.address()
	}

	/// Re-resolves every contract role. On failure the current bindings stay
	/// in place.
	pub async fn refresh_bindings(&self) -> Result<Arc<BindingSet>, ClientError> {
		Ok(self.registry.resolve().await?)
	}

	fn submit<C: SolCall>(
		&self,
		operation: &'static str,
		role: ContractRole,
		call: C,
	) -> OperationHandle<TransactionReceipt> {
		let tx = self.registry.transaction(role, call);
		let orchestrator = self.orchestrator.clone();
		OperationHandle::spawn(
			async move { orchestrator.submit(tx).await }
				.instrument(tracing::info_span!("operation", kind = operation)),
		)
	}

	fn spend<C: SolCall>(
		&self,
		operation: &'static str,
		spender: ContractRole,
		amount: U256,
		call: C,
	) -> OperationHandle<TransactionReceipt> {
		let spender = self.registry.address(spender);
		let action = Transaction::call(spender, call.abi_encode());
		let approvals = self.approvals.clone();
		OperationHandle::spawn(
			async move { approvals.spend_with_approval(spender, amount, action).await }
				.instrument(tracing::info_span!("operation", kind = operation)),
		)
	}

	/// Starts the current round. Reverts if it is already initialised.
	pub fn initialize_round(&self) -> OperationHandle<TransactionReceipt> {
		self.submit(
			"initialize_round",
			ContractRole::RoundsManager,
			IRoundsManager::initializeRoundCall {},
		)
	}

	/// Mints the round reward for the account as an active transcoder.
	pub fn reward(&self) -> OperationHandle<TransactionReceipt> {
		self.submit(
			"reward",
			ContractRole::BondingManager,
			IBondingManager::rewardCall {},
		)
	}

	/// Registers the account as a transcoder with the given terms.
	pub fn transcoder(
		&self,
		block_reward_cut: u8,
		fee_share: u8,
		price_per_segment: U256,
	) -> OperationHandle<TransactionReceipt> {
		self.submit(
			"transcoder",
			ContractRole::BondingManager,
			IBondingManager::transcoderCall {
				blockRewardCut: block_reward_cut,
				feeShare: fee_share,
				pricePerSegment: price_per_segment,
			},
		)
	}

	/// Bonds `amount` tokens to `to`, granting the bonding manager an
	/// allowance first.
	pub fn bond(&self, amount: U256, to: Address) -> OperationHandle<TransactionReceipt> {
		self.spend(
			"bond",
			ContractRole::BondingManager,
			amount,
			IBondingManager::bondCall { amount, to },
		)
	}

	/// Deposits `amount` tokens into the jobs manager, granting it an
	/// allowance first.
	pub fn deposit(&self, amount: U256) -> OperationHandle<TransactionReceipt> {
		self.spend(
			"deposit",
			ContractRole::JobsManager,
			amount,
			IJobsManager::depositCall { amount },
		)
	}

	/// Creates a job for `stream_id`, paying at most `max_price_per_segment`.
	pub fn job(
		&self,
		stream_id: impl Into<String>,
		transcoding_options: impl Into<String>,
		max_price_per_segment: U256,
	) -> OperationHandle<TransactionReceipt> {
		self.submit(
			"job",
			ContractRole::JobsManager,
			IJobsManager::jobCall {
				streamId: stream_id.into(),
				transcodingOptions: transcoding_options.into(),
				maxPricePerSegment: max_price_per_segment,
			},
		)
	}

	/// Claims the segments in `segment_range` of `job_id` under the Merkle
	/// root of their transcode receipts.
	pub fn claim_work(
		&self,
		job_id: U256,
		segment_range: SegmentRange,
		claim_root: B256,
	) -> OperationHandle<TransactionReceipt> {
		self.submit(
			"claim_work",
			ContractRole::JobsManager,
			IJobsManager::claimWorkCall {
				jobId: job_id,
				segmentRange: segment_range.as_array(),
				claimRoot: claim_root,
			},
		)
	}

	/// Submits one segment of a claim for verification.
	pub fn verify(
		&self,
		job_id: U256,
		claim_id: U256,
		segment: SegmentVerification,
	) -> OperationHandle<TransactionReceipt> {
		self.submit(
			"verify",
			ContractRole::JobsManager,
			IJobsManager::verifyCall {
				jobId: job_id,
				claimId: claim_id,
				segmentNumber: segment.segment_number,
				dataHash: segment.data_hash,
				transcodedDataHash: segment.transcoded_data_hash,
				broadcasterSig: segment.broadcaster_sig,
				proof: segment.proof,
			},
		)
	}

	/// Pays out the fees of a claim once its slashing period is over.
	pub fn distribute_fees(&self, job_id: U256, claim_id: U256) -> OperationHandle<TransactionReceipt> {
		self.submit(
			"distribute_fees",
			ContractRole::JobsManager,
			IJobsManager::distributeFeesCall {
				jobId: job_id,
				claimId: claim_id,
			},
		)
	}

	/// Transfers `amount` tokens from the account to `to`.
	pub fn transfer(&self, to: Address, amount: U256) -> OperationHandle<TransactionReceipt> {
		self.submit(
			"transfer",
			ContractRole::Token,
			ILivepeerToken::transferCall { to, value: amount },
		)
	}

	/// Opens the `NewJob` subscription for jobs assigned to this account.
	///
	/// Open it before the job can be created, then hand it to
	/// [`watch_new_job`](Self::watch_new_job).
	pub async fn subscribe_to_new_jobs(&self) -> Result<LogSubscription, ClientError> {
		let filter = self.registry.new_job_filter(self.address());
		self.watcher.subscribe(&filter).await
	}

	/// Waits on `subscription` for the first durable job announcement, then
	/// releases it.
	pub fn watch_new_job(&self, subscription: LogSubscription) -> OperationHandle<JobCreated> {
		let timeout = self.watcher.timeout();
		OperationHandle::spawn(
			async move {
				let log = EventWatcher::wait(subscription, timeout).await?;
				assigned_job(&log)
			}
			.instrument(tracing::info_span!("operation", kind = "watch_new_job")),
		)
	}

	/// Waits for the next durable job announcement on a subscription the
	/// caller keeps open across calls, so announcements arriving back to back
	/// are all delivered.
	pub async fn next_new_job(
		&self,
		subscription: &mut LogSubscription,
	) -> Result<JobCreated, ClientError> {
		let log = EventWatcher::next(subscription, self.watcher.timeout(), |_| true).await?;
		assigned_job(&log)
	}

	/// Signs a segment hash with the account key under the personal-message
	/// prefix.
	pub async fn sign_segment_hash(&self, hash: B256) -> Result<Bytes, ClientError> {
		self.account
			.sign_segment_hash(hash)
			.await
			.map_err(|e| ClientError::Signing(e.to_string()))
	}

	/// Current round, its start block and the latest block, read fresh.
	pub async fn round_info(&self) -> Result<RoundInfo, ClientError> {
		let current_round = read_contract(
			&self.registry,
			ContractRole::RoundsManager,
			IRoundsManager::currentRoundCall {},
		)
		.await?;
		let current_round_start_block = read_contract(
			&self.registry,
			ContractRole::RoundsManager,
			IRoundsManager::currentRoundStartBlockCall {},
		)
		.await?;
		let latest_block = self.chain.block_number().await.map_err(|e| {
			tracing::error!(error = %e, "Failed to read block number");
			ClientError::Read(e.to_string())
		})?;

		Ok(RoundInfo {
			current_round,
			current_round_start_block,
			latest_block,
		})
	}

	/// Whether the current round has been initialised.
	pub async fn current_round_initialized(&self) -> Result<bool, ClientError> {
		read_contract(
			&self.registry,
			ContractRole::RoundsManager,
			IRoundsManager::currentRoundInitializedCall {},
		)
		.await
	}

	/// Whether the account is in the active transcoder set this round.
	pub async fn is_active_transcoder(&self) -> Result<bool, ClientError> {
		read_contract(
			&self.registry,
			ContractRole::BondingManager,
			IBondingManager::isActiveTranscoderCall {
				transcoder: self.address(),
			},
		)
		.await
	}

	/// Total stake bonded to this account as a transcoder.
	pub async fn transcoder_stake(&self) -> Result<U256, ClientError> {
		read_contract(
			&self.registry,
			ContractRole::BondingManager,
			IBondingManager::transcoderTotalStakeCall {
				transcoder: self.address(),
			},
		)
		.await
	}

	/// Token balance of the account.
	pub async fn token_balance(&self) -> Result<U256, ClientError> {
		read_contract(
			&self.registry,
			ContractRole::Token,
			ILivepeerToken::balanceOfCall {
				owner: self.address(),
			},
		)
		.await
	}

	/// Registered terms and pending terms of the account as a transcoder.
	pub async fn transcoder_info(&self) -> Result<TranscoderInfo, ClientError> {
		let info = read_contract(
			&self.registry,
			ContractRole::BondingManager,
			IBondingManager::transcodersCall {
				transcoder: self.address(),
			},
		)
		.await?;

		Ok(TranscoderInfo {
			last_reward_round: info.lastRewardRound,
			bonded_amount: info.bondedAmount,
			block_reward_cut: info.blockRewardCut,
			fee_share: info.feeShare,
			price_per_segment: info.pricePerSegment,
		})
	}

	/// Amount the account has bonded to itself.
	pub async fn transcoder_bond(&self) -> Result<U256, ClientError> {
		Ok(self.transcoder_info().await?.bonded_amount)
	}

	/// Last round in which the account called reward.
	pub async fn last_reward_round(&self) -> Result<U256, ClientError> {
		Ok(self.transcoder_info().await?.last_reward_round)
	}

	/// Registration status of the account as a transcoder.
	pub async fn transcoder_status(&self) -> Result<TranscoderStatus, ClientError> {
		let status = read_contract(
			&self.registry,
			ContractRole::BondingManager,
			IBondingManager::transcoderStatusCall {
				transcoder: self.address(),
			},
		)
		.await?;
		Ok(TranscoderStatus::from(status))
	}

	/// Stake of the account as a delegator, including pending rewards.
	pub async fn delegator_stake(&self) -> Result<U256, ClientError> {
		read_contract(
			&self.registry,
			ContractRole::BondingManager,
			IBondingManager::delegatorStakeCall {
				delegator: self.address(),
			},
		)
		.await
	}

	/// Reads a job as recorded by the jobs manager.
	pub async fn get_job(&self, job_id: U256) -> Result<JobDescriptor, ClientError> {
		let job = read_contract(
			&self.registry,
			ContractRole::JobsManager,
			IJobsManager::jobsCall { jobId: job_id },
		)
		.await?;

		Ok(JobDescriptor {
			job_id: job.id,
			stream_id: job.streamId,
			transcoding_options: job.transcodingOptions,
			max_price_per_segment: job.maxPricePerSegment,
			price_per_segment: job.pricePerSegment,
			broadcaster: job.broadcasterAddress,
			transcoder: job.transcoderAddress,
			end_block: job.endBlock,
			escrow: job.escrow,
		})
	}

	/// Reads one claim of a job as recorded by the jobs manager.
	pub async fn get_claim(&self, job_id: U256, claim_id: U256) -> Result<ClaimDescriptor, ClientError> {
		let claim = read_contract(
			&self.registry,
			ContractRole::JobsManager,
			IJobsManager::getClaimCall {
				jobId: job_id,
				claimId: claim_id,
			},
		)
		.await?;

		Ok(ClaimDescriptor {
			job_id,
			claim_id,
			segment_range: SegmentRange {
				start: claim.segmentRange[0],
				end: claim.segmentRange[1],
			},
			claim_root: claim.claimRoot,
			claim_block: claim.claimBlock,
			end_verification_block: claim.endVerificationBlock,
			end_slashing_block: claim.endSlashingBlock,
			status: ClaimStatus::from(claim.status),
		})
	}
}

fn assigned_job(log: &ChainLog) -> Result<JobCreated, ClientError> {
	let job = decode_new_job(log)?;
	tracing::info!(
		job_id = %job.job_id,
		stream_id = %job.stream_id,
		broadcaster = %job.broadcaster,
		"New job assigned"
	);
	Ok(job)
}
