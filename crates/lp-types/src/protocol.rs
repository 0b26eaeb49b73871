//! Protocol-level snapshots.
//!
//! Everything here is a point-in-time copy of on-chain state. None of it is
//! authoritative: the contracts are the only source of truth and these values
//! are re-read on every request.

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a protocol contract.
///
/// `Protocol` and `Token` are fixed singletons supplied by configuration; the
/// manager roles are looked up in the protocol registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContractRole {
	Protocol,
	Token,
	BondingManager,
	JobsManager,
	RoundsManager,
}

impl ContractRole {
	/// Roles resolved through the registry, in resolution order.
	pub const REGISTERED: [ContractRole; 3] = [
		ContractRole::BondingManager,
		ContractRole::JobsManager,
		ContractRole::RoundsManager,
	];

	pub fn name(&self) -> &'static str {
		match self {
			ContractRole::Protocol => "LivepeerProtocol",
			ContractRole::Token => "LivepeerToken",
			ContractRole::BondingManager => "BondingManager",
			ContractRole::JobsManager => "JobsManager",
			ContractRole::RoundsManager => "RoundsManager",
		}
	}

	/// Registry key: keccak256 of the UTF-8 role name.
	pub fn role_hash(&self) -> B256 {
		keccak256(self.name().as_bytes())
	}
}

impl fmt::Display for ContractRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

/// Round state at one instant. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundInfo {
	pub current_round: U256,
	pub current_round_start_block: U256,
	pub latest_block: u64,
}

/// Protocol timing constants, in blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolTimeParams {
	pub round_length: U256,
	pub job_ending_period: U256,
	pub verification_period: U256,
	pub slashing_period: U256,
	/// Unbonding period, in rounds.
	pub unbonding_period: u64,
}

/// A job as stored by the jobs manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
	pub job_id: U256,
	pub stream_id: String,
	pub transcoding_options: String,
	pub max_price_per_segment: U256,
	pub price_per_segment: U256,
	pub broadcaster: Address,
	pub transcoder: Address,
	pub end_block: U256,
	pub escrow: U256,
}

/// Inclusive range of segment sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRange {
	pub start: U256,
	pub end: U256,
}

impl SegmentRange {
	pub fn new(start: u64, end: u64) -> Self {
		Self {
			start: U256::from(start),
			end: U256::from(end),
		}
	}

	pub fn as_array(&self) -> [U256; 2] {
		[self.start, self.end]
	}
}

/// Claim status as encoded by the jobs manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimStatus {
	Pending,
	Slashed,
	Complete,
	Unknown(u8),
}

impl From<u8> for ClaimStatus {
	fn from(value: u8) -> Self {
		match value {
			0 => ClaimStatus::Pending,
			1 => ClaimStatus::Slashed,
			2 => ClaimStatus::Complete,
			other => ClaimStatus::Unknown(other),
		}
	}
}

/// A claim over a batch of transcoded segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimDescriptor {
	pub job_id: U256,
	pub claim_id: U256,
	pub segment_range: SegmentRange,
	pub claim_root: B256,
	pub claim_block: U256,
	pub end_verification_block: U256,
	pub end_slashing_block: U256,
	pub status: ClaimStatus,
}

/// Evidence a broadcaster-signed segment was transcoded as claimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentVerification {
	pub segment_number: U256,
	/// Hash of the source segment data.
	pub data_hash: String,
	/// Hash of the transcoded segment data.
	pub transcoded_data_hash: String,
	/// Broadcaster's signature over the segment hash.
	pub broadcaster_sig: Bytes,
	/// Merkle proof of the segment against the claim root.
	pub proof: Bytes,
}

/// Registration status of a transcoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranscoderStatus {
	NotRegistered,
	Registered,
	Resigned,
	Unknown(u8),
}

impl From<u8> for TranscoderStatus {
	fn from(value: u8) -> Self {
		match value {
			0 => TranscoderStatus::NotRegistered,
			1 => TranscoderStatus::Registered,
			2 => TranscoderStatus::Resigned,
			other => TranscoderStatus::Unknown(other),
		}
	}
}

/// Transcoder bookkeeping held by the bonding manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscoderInfo {
	pub last_reward_round: U256,
	pub bonded_amount: U256,
	pub block_reward_cut: u8,
	pub fee_share: u8,
	pub price_per_segment: U256,
}

/// A job announcement decoded from a `NewJob` log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCreated {
	pub transcoder: Address,
	pub broadcaster: Address,
	pub job_id: U256,
	pub stream_id: String,
	pub transcoding_options: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_role_hash_is_keccak_of_name() {
		assert_eq!(
			ContractRole::BondingManager.role_hash(),
			keccak256(b"BondingManager")
		);
		assert_ne!(
			ContractRole::JobsManager.role_hash(),
			ContractRole::RoundsManager.role_hash()
		);
	}

	#[test]
	fn test_status_decoding() {
		assert_eq!(ClaimStatus::from(2), ClaimStatus::Complete);
		assert_eq!(ClaimStatus::from(9), ClaimStatus::Unknown(9));
		assert_eq!(TranscoderStatus::from(1), TranscoderStatus::Registered);
	}
}
