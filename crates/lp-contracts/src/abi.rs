//! Protocol contract ABIs.
//!
//! Only the functions and events the client uses are declared.

use alloy::sol;

sol! {
	/// Root contract mapping role hashes to manager addresses.
	interface ILivepeerProtocol {
		function registry(bytes32 key) external view returns (address);
	}

	interface ILivepeerToken {
		event Approval(address indexed owner, address indexed spender, uint256 value);

		function approve(address spender, uint256 value) external returns (bool);
		function transfer(address to, uint256 value) external returns (bool);
		function balanceOf(address owner) external view returns (uint256);
	}

	interface IBondingManager {
		function transcoder(uint8 blockRewardCut, uint8 feeShare, uint256 pricePerSegment) external;
		function bond(uint256 amount, address to) external;
		function reward() external;

		function isActiveTranscoder(address transcoder) external view returns (bool);
		function transcoderTotalStake(address transcoder) external view returns (uint256);
		function transcoderStatus(address transcoder) external view returns (uint8);
		function delegatorStake(address delegator) external view returns (uint256);
		function unbondingPeriod() external view returns (uint64);
		function transcoders(address transcoder) external view returns (
			uint256 lastRewardRound,
			uint256 bondedAmount,
			uint8 blockRewardCut,
			uint8 feeShare,
			uint256 pricePerSegment
		);
	}

	interface IJobsManager {
		/// Emitted when a broadcaster creates a job assigned to `transcoder`.
		event NewJob(
			address indexed transcoder,
			address indexed broadcaster,
			uint256 jobId,
			string streamId,
			string transcodingOptions
		);

		function job(string streamId, string transcodingOptions, uint256 maxPricePerSegment) external;
		function deposit(uint256 amount) external;
		function claimWork(uint256 jobId, uint256[2] segmentRange, bytes32 claimRoot) external;
		function verify(
			uint256 jobId,
			uint256 claimId,
			uint256 segmentNumber,
			string dataHash,
			string transcodedDataHash,
			bytes broadcasterSig,
			bytes proof
		) external;
		function distributeFees(uint256 jobId, uint256 claimId) external;

		function jobEndingPeriod() external view returns (uint256);
		function verificationPeriod() external view returns (uint256);
		function slashingPeriod() external view returns (uint256);
		function jobs(uint256 jobId) external view returns (
			uint256 id,
			string streamId,
			string transcodingOptions,
			uint256 maxPricePerSegment,
			uint256 pricePerSegment,
			address broadcasterAddress,
			address transcoderAddress,
			uint256 endBlock,
			uint256 escrow
		);
		function getClaim(uint256 jobId, uint256 claimId) external view returns (
			uint256[2] segmentRange,
			bytes32 claimRoot,
			uint256 claimBlock,
			uint256 endVerificationBlock,
			uint256 endSlashingBlock,
			uint8 status
		);
	}

	interface IRoundsManager {
		function initializeRound() external;

		function currentRound() external view returns (uint256);
		function currentRoundStartBlock() external view returns (uint256);
		function currentRoundInitialized() external view returns (bool);
		function roundLength() external view returns (uint256);
	}
}
