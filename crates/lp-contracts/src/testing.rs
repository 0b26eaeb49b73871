//! A scripted protocol deployment on the simulated node.

use crate::abi::ILivepeerProtocol;
use alloy::primitives::{Address, Bytes};
use alloy::sol_types::{SolCall, SolValue};
use lp_chain::implementations::simulated::SimulatedChain;
use lp_types::ContractRole;

/// Addresses of a protocol deployment whose registry answers on a
/// [`SimulatedChain`].
#[derive(Debug, Clone, Copy)]
pub struct Deployment {
	pub protocol: Address,
	pub token: Address,
	pub bonding_manager: Address,
	pub jobs_manager: Address,
	pub rounds_manager: Address,
}

impl Deployment {
	/// Scripts registry answers for every manager role.
	pub fn scripted(chain: &SimulatedChain) -> Self {
		let deployment = Self {
			protocol: Address::repeat_byte(0x10),
			token: Address::repeat_byte(0x11),
			bonding_manager: Address::repeat_byte(0x12),
			jobs_manager: Address::repeat_byte(0x13),
			rounds_manager: Address::repeat_byte(0x14),
		};

		for role in ContractRole::REGISTERED {
			Self::register(chain, deployment.protocol, role, deployment.address(role));
		}
		deployment
	}

	pub fn address(&self, role: ContractRole) -> Address {
		match role {
			ContractRole::Protocol => self.protocol,
			ContractRole::Token => self.token,
			ContractRole::BondingManager => self.bonding_manager,
			ContractRole::JobsManager => self.jobs_manager,
			ContractRole::RoundsManager => self.rounds_manager,
		}
	}

	/// Points the registry entry for `role` at `address`.
	pub fn register(chain: &SimulatedChain, protocol: Address, role: ContractRole, address: Address) {
		chain.set_exact_call_response(
			protocol,
			Self::registry_calldata(role),
			address.abi_encode(),
		);
	}

	pub fn registry_calldata(role: ContractRole) -> Bytes {
		ILivepeerProtocol::registryCall {
			key: role.role_hash(),
		}
		.abi_encode()
		.into()
	}
}
