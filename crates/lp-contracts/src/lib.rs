//! Protocol contract bindings.
//!
//! The protocol root contract keeps a registry from role hash to manager
//! address. [`ContractRegistry`] resolves every manager role through it and
//! publishes the result as one immutable [`BindingSet`]; re-resolution
//! replaces the whole set or nothing.

use alloy::primitives::{Address, Bytes};
use alloy::sol_types::{SolCall, SolEvent};
use arc_swap::ArcSwap;
use lp_chain::{ChainError, ChainService};
use lp_types::{ChainLog, ContractRole, JobCreated, LogFilter, Transaction};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

pub mod abi;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use abi::{IJobsManager, ILivepeerProtocol, ILivepeerToken};

#[derive(Debug, Error)]
pub enum ContractError {
	#[error("Registry lookup for {role} failed: {source}")]
	Lookup {
		role: ContractRole,
		#[source]
		source: ChainError,
	},
	#[error("{0} is not registered with the protocol")]
	Unregistered(ContractRole),
	#[error("Call to {role} failed: {source}")]
	Call {
		role: ContractRole,
		#[source]
		source: ChainError,
	},
	#[error("Failed to decode {what}: {message}")]
	Decode { what: String, message: String },
}

/// A role bound to the address it currently lives at.
///
/// The ABI half of the binding is the role's typed interface in [`abi`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractBinding {
	pub role: ContractRole,
	pub address: Address,
}

/// One complete resolution of every contract role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSet {
	pub protocol: ContractBinding,
	pub token: ContractBinding,
	pub bonding_manager: ContractBinding,
	pub jobs_manager: ContractBinding,
	pub rounds_manager: ContractBinding,
}

impl BindingSet {
	pub fn get(&self, role: ContractRole) -> &ContractBinding {
		match role {
			ContractRole::Protocol => &self.protocol,
			ContractRole::Token => &self.token,
			ContractRole::BondingManager => &self.bonding_manager,
			ContractRole::JobsManager => &self.jobs_manager,
			ContractRole::RoundsManager => &self.rounds_manager,
		}
	}

	pub fn address(&self, role: ContractRole) -> Address {
		self.get(role).address
	}
}

/// Resolves and holds the active contract bindings.
pub struct ContractRegistry {
	chain: ChainService,
	protocol: Address,
	token: Address,
	bindings: ArcSwap<BindingSet>,
	/// Serialises re-resolution so concurrent refreshes publish in order.
	resolving: Mutex<()>,
}

impl ContractRegistry {
	/// Resolves every role against `protocol` and builds the registry.
	///
	/// `protocol` and `token` are fixed singletons; the manager roles are
	/// looked up in the protocol registry.
	pub async fn connect(
		chain: ChainService,
		protocol: Address,
		token: Address,
	) -> Result<Self, ContractError> {
		let bindings = lookup(&chain, protocol, token).await?;
		log_bindings(&bindings);

		Ok(Self {
			chain,
			protocol,
			token,
			bindings: ArcSwap::from_pointee(bindings),
			resolving: Mutex::new(()),
		})
	}

	/// Re-resolves every role and swaps the new set in.
	///
	/// If any single lookup fails the previous set stays active and the error
	/// is returned.
	pub async fn resolve(&self) -> Result<Arc<BindingSet>, ContractError> {
		let _guard = self.resolving.lock().await;

		let bindings = Arc::new(lookup(&self.chain, self.protocol, self.token).await?);
		self.bindings.store(bindings.clone());
		log_bindings(&bindings);

		Ok(bindings)
	}

	/// The active binding set.
	pub fn bindings(&self) -> Arc<BindingSet> {
		self.bindings.load_full()
	}

	/// Address currently bound to `role`.
	pub fn address(&self, role: ContractRole) -> Address {
		self.bindings.load().address(role)
	}

	/// Encodes `call` as a transaction to the contract holding `role`.
	pub fn transaction<C: SolCall>(&self, role: ContractRole, call: C) -> Transaction {
		Transaction::call(self.address(role), call.abi_encode())
	}

	/// Runs a read-only call against the contract holding `role` and decodes
	/// its return value.
	pub async fn read<C: SolCall>(
		&self,
		role: ContractRole,
		call: C,
	) -> Result<C::Return, ContractError> {
		let data = self
			.chain
			.call(self.address(role), Bytes::from(call.abi_encode()))
			.await
			.map_err(|source| ContractError::Call { role, source })?;

		C::abi_decode_returns(&data).map_err(|e| ContractError::Decode {
			what: format!("{}::{}", role, C::SIGNATURE),
			message: e.to_string(),
		})
	}

	/// Filter for the token's `Approval` events granted by `owner`.
	pub fn approval_filter(&self, owner: Address) -> LogFilter {
		LogFilter::new(
			self.address(ContractRole::Token),
			ILivepeerToken::Approval::SIGNATURE_HASH,
			owner,
		)
	}

	/// Filter for `NewJob` events assigning work to `transcoder`.
	pub fn new_job_filter(&self, transcoder: Address) -> LogFilter {
		LogFilter::new(
			self.address(ContractRole::JobsManager),
			IJobsManager::NewJob::SIGNATURE_HASH,
			transcoder,
		)
	}
}

/// Decodes a `NewJob` log.
pub fn decode_new_job(log: &ChainLog) -> Result<JobCreated, ContractError> {
	let event = IJobsManager::NewJob::decode_raw_log(log.topics.iter().copied(), &log.data)
		.map_err(|e| ContractError::Decode {
			what: IJobsManager::NewJob::SIGNATURE.to_string(),
			message: e.to_string(),
		})?;

	Ok(JobCreated {
		transcoder: event.transcoder,
		broadcaster: event.broadcaster,
		job_id: event.jobId,
		stream_id: event.streamId,
		transcoding_options: event.transcodingOptions,
	})
}

async fn lookup(
	chain: &ChainService,
	protocol: Address,
	token: Address,
) -> Result<BindingSet, ContractError> {
	Ok(BindingSet {
		protocol: ContractBinding {
			role: ContractRole::Protocol,
			address: protocol,
		},
		token: ContractBinding {
			role: ContractRole::Token,
			address: token,
		},
		bonding_manager: lookup_role(chain, protocol, ContractRole::BondingManager).await?,
		jobs_manager: lookup_role(chain, protocol, ContractRole::JobsManager).await?,
		rounds_manager: lookup_role(chain, protocol, ContractRole::RoundsManager).await?,
	})
}

async fn lookup_role(
	chain: &ChainService,
	protocol: Address,
	role: ContractRole,
) -> Result<ContractBinding, ContractError> {
	let call = ILivepeerProtocol::registryCall {
		key: role.role_hash(),
	};
	let data = chain
		.call(protocol, Bytes::from(call.abi_encode()))
		.await
		.map_err(|source| ContractError::Lookup { role, source })?;

	let address =
		ILivepeerProtocol::registryCall::abi_decode_returns(&data).map_err(|e| {
			ContractError::Decode {
				what: format!("registry entry for {}", role),
				message: e.to_string(),
			}
		})?;

	if address.is_zero() {
		return Err(ContractError::Unregistered(role));
	}

	Ok(ContractBinding { role, address })
}

fn log_bindings(bindings: &BindingSet) {
	tracing::info!(
		protocol = %bindings.protocol.address,
		token = %bindings.token.address,
		bonding_manager = %bindings.bonding_manager.address,
		jobs_manager = %bindings.jobs_manager.address,
		rounds_manager = %bindings.rounds_manager.address,
		"Resolved contract bindings"
	);
}
