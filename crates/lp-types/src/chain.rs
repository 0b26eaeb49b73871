//! Transaction and receipt types.
//!
//! These mirror what a node exposes at the RPC boundary, stripped down to the
//! fields the client actually reasons about.

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// An unsigned transaction request.
///
/// The signing account is not part of the request; the gateway signs with the
/// key it was constructed with. A `gas_limit` of `None` lets the gateway
/// estimate one before dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
	/// Contract (or account) receiving the call.
	pub to: Address,
	/// ABI-encoded call data.
	pub data: Bytes,
	/// Native value attached to the call.
	pub value: U256,
	/// Gas limit, estimated by the gateway when absent.
	pub gas_limit: Option<u64>,
}

impl Transaction {
	/// Creates a zero-value contract call with an estimated gas limit.
	pub fn call(to: Address, data: impl Into<Bytes>) -> Self {
		Self {
			to,
			data: data.into(),
			value: U256::ZERO,
			gas_limit: None,
		}
	}

	/// Pins the gas limit instead of letting the gateway estimate it.
	pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
		self.gas_limit = Some(gas_limit);
		self
	}
}

/// A transaction accepted by the node but not yet known to be mined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
	pub hash: B256,
	/// The gas limit the transaction was actually signed with.
	pub gas_limit: u64,
	pub submitted_at: SystemTime,
}

/// A log entry emitted by a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLog {
	pub address: Address,
	pub topics: Vec<B256>,
	pub data: Bytes,
	pub block_number: Option<u64>,
	pub transaction_hash: Option<B256>,
	/// Set when a chain reorganisation retracted this log.
	pub removed: bool,
}

/// Receipt of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
	pub transaction_hash: B256,
	pub block_number: u64,
	pub gas_used: u64,
	/// Explicit execution status, when the node reports one.
	pub status: Option<bool>,
	pub logs: Vec<ChainLog>,
}

/// Final classification of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionOutcome {
	Confirmed,
	Reverted,
}

impl TransactionReceipt {
	/// Classifies this receipt against the transaction it belongs to.
	///
	/// An explicit status field wins. Without one, a transaction that consumed
	/// exactly its gas limit is taken to have thrown.
	pub fn outcome(&self, pending: &PendingTransaction) -> TransactionOutcome {
		let succeeded = match self.status {
			Some(status) => status,
			None => self.gas_used != pending.gas_limit,
		};

		if succeeded {
			TransactionOutcome::Confirmed
		} else {
			TransactionOutcome::Reverted
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn pending(gas_limit: u64) -> PendingTransaction {
		PendingTransaction {
			hash: B256::repeat_byte(0x11),
			gas_limit,
			submitted_at: SystemTime::now(),
		}
	}

	fn receipt(gas_used: u64, status: Option<bool>) -> TransactionReceipt {
		TransactionReceipt {
			transaction_hash: B256::repeat_byte(0x11),
			block_number: 7,
			gas_used,
			status,
			logs: vec![],
		}
	}

	#[test]
	fn test_gas_heuristic_without_status() {
		assert_eq!(
			receipt(100_000, None).outcome(&pending(100_000)),
			TransactionOutcome::Reverted
		);
		assert_eq!(
			receipt(42_000, None).outcome(&pending(100_000)),
			TransactionOutcome::Confirmed
		);
	}

	#[test]
	fn test_explicit_status_overrides_gas_heuristic() {
		// All gas burned but the node says it succeeded.
		assert_eq!(
			receipt(100_000, Some(true)).outcome(&pending(100_000)),
			TransactionOutcome::Confirmed
		);
		assert_eq!(
			receipt(21_000, Some(false)).outcome(&pending(100_000)),
			TransactionOutcome::Reverted
		);
	}

	#[test]
	fn test_call_builder() {
		let tx = Transaction::call(Address::repeat_byte(1), vec![0xde, 0xad]).with_gas_limit(90_000);
		assert_eq!(tx.gas_limit, Some(90_000));
		assert_eq!(tx.value, U256::ZERO);
		assert_eq!(tx.data.as_ref(), &[0xde, 0xad]);
	}
}
