//! Protocol timing constants.

use crate::{read_contract, ClientError};
use lp_contracts::abi::{IBondingManager, IJobsManager, IRoundsManager};
use lp_contracts::ContractRegistry;
use lp_types::{ContractRole, ProtocolTimeParams, U256};
use std::sync::Arc;
use tracing::instrument;

/// Read path for the protocol's timing constants.
///
/// Nothing is stored: governance can change any of these at any time, so
/// each accessor reads the current value from the contracts.
#[derive(Clone)]
pub struct ProtocolParameterCache {
	registry: Arc<ContractRegistry>,
}

impl ProtocolParameterCache {
	pub fn new(registry: Arc<ContractRegistry>) -> Self {
		Self { registry }
	}

	/// Round length, in blocks.
	pub async fn round_length(&self) -> Result<U256, ClientError> {
		read_contract(
			&self.registry,
			ContractRole::RoundsManager,
			IRoundsManager::roundLengthCall {},
		)
		.await
	}

	/// Blocks after creation during which a job accepts claims.
	pub async fn job_ending_period(&self) -> Result<U256, ClientError> {
		read_contract(
			&self.registry,
			ContractRole::JobsManager,
			IJobsManager::jobEndingPeriodCall {},
		)
		.await
	}

	/// Blocks after a claim during which segments can be verified.
	pub async fn verification_period(&self) -> Result<U256, ClientError> {
		read_contract(
			&self.registry,
			ContractRole::JobsManager,
			IJobsManager::verificationPeriodCall {},
		)
		.await
	}

	/// Blocks after verification during which a claim can be slashed.
	pub async fn slashing_period(&self) -> Result<U256, ClientError> {
		read_contract(
			&self.registry,
			ContractRole::JobsManager,
			IJobsManager::slashingPeriodCall {},
		)
		.await
	}

	/// Unbonding period, in rounds.
	pub async fn unbonding_period(&self) -> Result<u64, ClientError> {
		read_contract(
			&self.registry,
			ContractRole::BondingManager,
			IBondingManager::unbondingPeriodCall {},
		)
		.await
	}

	/// Reads every timing constant. Fails on the first read that fails.
	#[instrument(skip_all)]
	pub async fn time_params(&self) -> Result<ProtocolTimeParams, ClientError> {
		let params = ProtocolTimeParams {
			round_length: self.round_length().await?,
			job_ending_period: self.job_ending_period().await?,
			verification_period: self.verification_period().await?,
			slashing_period: self.slashing_period().await?,
			unbonding_period: self.unbonding_period().await?,
		};
		tracing::debug!(?params, "Read protocol time params");
		Ok(params)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::lifecycle::tests::harness;
	use alloy::sol_types::{SolCall, SolValue};

	fn script(harness: &crate::lifecycle::tests::Harness, round_length: u64) {
		let d = harness.deployment;
		let chain = &harness.chain;
		chain.set_call_response(
			d.rounds_manager,
			IRoundsManager::roundLengthCall::SELECTOR,
			U256::from(round_length).abi_encode(),
		);
		chain.set_call_response(
			d.jobs_manager,
			IJobsManager::jobEndingPeriodCall::SELECTOR,
			U256::from(100).abi_encode(),
		);
		chain.set_call_response(
			d.jobs_manager,
			IJobsManager::verificationPeriodCall::SELECTOR,
			U256::from(50).abi_encode(),
		);
		chain.set_call_response(
			d.jobs_manager,
			IJobsManager::slashingPeriodCall::SELECTOR,
			U256::from(25).abi_encode(),
		);
		chain.set_call_response(
			d.bonding_manager,
			IBondingManager::unbondingPeriodCall::SELECTOR,
			IBondingManager::unbondingPeriodCall::abi_encode_returns(&2u64),
		);
	}

	#[tokio::test]
	async fn test_time_params() {
		let harness = harness().await;
		script(&harness, 20);
		let params = ProtocolParameterCache::new(harness.registry.clone());

		let time = params.time_params().await.unwrap();
		assert_eq!(
			time,
			ProtocolTimeParams {
				round_length: U256::from(20),
				job_ending_period: U256::from(100),
				verification_period: U256::from(50),
				slashing_period: U256::from(25),
				unbonding_period: 2,
			}
		);
	}

	#[tokio::test]
	async fn test_every_read_is_live() {
		let harness = harness().await;
		script(&harness, 20);
		let params = ProtocolParameterCache::new(harness.registry.clone());

		assert_eq!(params.round_length().await.unwrap(), U256::from(20));
		script(&harness, 40);
		assert_eq!(params.round_length().await.unwrap(), U256::from(40));
	}

	#[tokio::test]
	async fn test_failed_read_is_surfaced() {
		let harness = harness().await;
		script(&harness, 20);
		harness.chain.fail_call(
			harness.deployment.jobs_manager,
			IJobsManager::slashingPeriodCall::SELECTOR,
			"header not found",
		);
		let params = ProtocolParameterCache::new(harness.registry.clone());

		assert!(matches!(params.time_params().await, Err(ClientError::Read(_))));
		assert_eq!(params.verification_period().await.unwrap(), U256::from(50));
	}
}
