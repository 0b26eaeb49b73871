//! Transcoding boundary and work claims.
//!
//! A [`Transcoder`] turns a source segment into its transcoded rendition.
//! Its failures are classified: a retryable failure is retried a bounded
//! number of times, an unrecoverable one ends the claim. Either way the
//! failure comes back as a value; no claim is submitted for a batch with a
//! failed segment.

use crate::{ClientError, JobLifecycleManager, OperationHandle};
use alloy::primitives::keccak256;
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use lp_types::{Bytes, SegmentRange, SegmentVerification, TransactionReceipt, B256, U256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::Instrument;

/// Attempts per segment before a retryable failure is given up on.
pub const MAX_TRANSCODE_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum TranscodeError {
	#[error("Transcoding failed, retryable: {0}")]
	Retryable(String),
	#[error("Transcoding failed: {0}")]
	Unrecoverable(String),
}

#[async_trait]
pub trait Transcoder: Send + Sync {
	async fn transcode(&self, segment: &Segment) -> Result<Bytes, TranscodeError>;
}

/// A source segment of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
	pub sequence_number: u64,
	pub data: Bytes,
}

/// Hashes of one segment before and after transcoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodedSegment {
	pub sequence_number: u64,
	pub data_hash: B256,
	pub transcoded_data_hash: B256,
}

impl TranscodedSegment {
	/// Leaf committed to in the claim root:
	/// keccak256(sequence number as uint256 || data hash || transcoded hash).
	pub fn leaf(&self) -> B256 {
		let mut packed = Vec::with_capacity(96);
		packed.extend_from_slice(&U256::from(self.sequence_number).to_be_bytes::<32>());
		packed.extend_from_slice(self.data_hash.as_slice());
		packed.extend_from_slice(self.transcoded_data_hash.as_slice());
		keccak256(packed)
	}

	/// Verification evidence for this segment.
	pub fn verification(&self, broadcaster_sig: Bytes, proof: &[B256]) -> SegmentVerification {
		SegmentVerification {
			segment_number: U256::from(self.sequence_number),
			data_hash: self.data_hash.to_string(),
			transcoded_data_hash: self.transcoded_data_hash.to_string(),
			broadcaster_sig,
			proof: proof
				.iter()
				.flat_map(|node| node.as_slice().iter().copied())
				.collect::<Vec<u8>>()
				.into(),
		}
	}
}

/// A claim that was submitted and confirmed.
#[derive(Debug, Clone)]
pub struct SubmittedClaim {
	pub receipt: TransactionReceipt,
	pub claim_root: B256,
	pub segment_range: SegmentRange,
	pub segments: Vec<TranscodedSegment>,
}

impl SubmittedClaim {
	/// Merkle proof for the segment with `sequence_number`, if it is part of
	/// this claim.
	pub fn proof(&self, sequence_number: u64) -> Option<Vec<B256>> {
		let index = self
			.segments
			.iter()
			.position(|s| s.sequence_number == sequence_number)?;
		let leaves: Vec<B256> = self.segments.iter().map(TranscodedSegment::leaf).collect();
		Some(merkle_proof(&leaves, index))
	}
}

fn hash_pair(a: B256, b: B256) -> B256 {
	let (first, second) = if a <= b { (a, b) } else { (b, a) };
	let mut packed = [0u8; 64];
	packed[..32].copy_from_slice(first.as_slice());
	packed[32..].copy_from_slice(second.as_slice());
	keccak256(packed)
}

fn next_level(level: &[B256]) -> Vec<B256> {
	level
		.chunks(2)
		.map(|pair| match pair {
			[a, b] => hash_pair(*a, *b),
			[odd] => *odd,
			_ => B256::ZERO,
		})
		.collect()
}

/// Root of a sorted-pair keccak Merkle tree. An unpaired node is promoted to
/// the next level unchanged.
pub fn merkle_root(leaves: &[B256]) -> B256 {
	if leaves.is_empty() {
		return B256::ZERO;
	}
	let mut level = leaves.to_vec();
	while level.len() > 1 {
		level = next_level(&level);
	}
	level[0]
}

/// Sibling path from the leaf at `index` to the root.
pub fn merkle_proof(leaves: &[B256], mut index: usize) -> Vec<B256> {
	let mut proof = Vec::new();
	let mut level = leaves.to_vec();
	while level.len() > 1 {
		let sibling = index ^ 1;
		if sibling < level.len() {
			proof.push(level[sibling]);
		}
		level = next_level(&level);
		index /= 2;
	}
	proof
}

/// Folds a proof back up to a root.
pub fn verify_merkle_proof(leaf: B256, proof: &[B256], root: B256) -> bool {
	proof.iter().fold(leaf, |node, sibling| hash_pair(node, *sibling)) == root
}

async fn transcode_with_retry(
	transcoder: &dyn Transcoder,
	segment: &Segment,
) -> Result<TranscodedSegment, ClientError> {
	let mut backoff = ExponentialBackoffBuilder::new()
		.with_initial_interval(Duration::from_millis(500))
		.with_multiplier(2.0)
		.with_randomization_factor(0.0)
		.with_max_elapsed_time(None)
		.build();
	let mut attempt = 1;

	loop {
		match transcoder.transcode(segment).await {
			Ok(output) => {
				return Ok(TranscodedSegment {
					sequence_number: segment.sequence_number,
					data_hash: keccak256(&segment.data),
					transcoded_data_hash: keccak256(&output),
				})
			},
			Err(TranscodeError::Retryable(reason)) if attempt < MAX_TRANSCODE_ATTEMPTS => {
				tracing::warn!(
					segment = segment.sequence_number,
					attempt,
					reason = %reason,
					"Transcoding failed, retrying"
				);
				attempt += 1;
				let delay = backoff.next_backoff().unwrap_or(Duration::from_secs(1));
				tokio::time::sleep(delay).await;
			},
			Err(e) => {
				tracing::error!(segment = segment.sequence_number, error = %e, "Giving up on segment");
				return Err(ClientError::UnrecoverableProcess(format!(
					"segment {}: {}",
					segment.sequence_number, e
				)));
			},
		}
	}
}

fn claimed_range(segments: &[Segment]) -> Result<SegmentRange, ClientError> {
	let (first, last) = match (segments.first(), segments.last()) {
		(Some(first), Some(last)) => (first.sequence_number, last.sequence_number),
		_ => return Err(ClientError::InvalidRequest("no segments to claim".to_string())),
	};
	let contiguous = segments
		.windows(2)
		.all(|w| w[0].sequence_number.checked_add(1) == Some(w[1].sequence_number));
	if !contiguous {
		return Err(ClientError::InvalidRequest(
			"segments must be contiguous and in order".to_string(),
		));
	}
	Ok(SegmentRange::new(first, last))
}

impl JobLifecycleManager {
	/// Transcodes `segments`, commits to them in a Merkle root and submits
	/// the claim for `job_id`.
	///
	/// Nothing is submitted unless every segment transcodes.
	pub fn claim_transcoded_segments(
		&self,
		transcoder: Arc<dyn Transcoder>,
		job_id: U256,
		segments: Vec<Segment>,
	) -> OperationHandle<SubmittedClaim> {
		let manager = self.clone();
		OperationHandle::spawn(
			async move {
				let segment_range = claimed_range(&segments)?;

				let mut transcoded = Vec::with_capacity(segments.len());
				for segment in &segments {
					transcoded.push(transcode_with_retry(transcoder.as_ref(), segment).await?);
				}

				let leaves: Vec<B256> = transcoded.iter().map(TranscodedSegment::leaf).collect();
				let claim_root = merkle_root(&leaves);
				tracing::info!(
					job_id = %job_id,
					start = %segment_range.start,
					end = %segment_range.end,
					claim_root = %claim_root,
					"Claiming transcoded segments"
				);

				let receipt = manager.claim_work(job_id, segment_range, claim_root).await?;
				Ok(SubmittedClaim {
					receipt,
					claim_root,
					segment_range,
					segments: transcoded,
				})
			}
			.instrument(tracing::info_span!("operation", kind = "claim_transcoded_segments")),
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::lifecycle::tests::harness;
	use alloy::sol_types::SolCall;
	use lp_contracts::abi::IJobsManager;
	use std::collections::VecDeque;
	use std::sync::Mutex;
	use tokio::time::Instant;

	/// Answers from a script, then echoes the input reversed.
	struct ScriptedTranscoder {
		script: Mutex<VecDeque<Result<Bytes, TranscodeError>>>,
		calls: Mutex<u32>,
	}

	impl ScriptedTranscoder {
		fn new(script: Vec<Result<Bytes, TranscodeError>>) -> Arc<Self> {
			Arc::new(Self {
				script: Mutex::new(script.into()),
				calls: Mutex::new(0),
			})
		}

		fn calls(&self) -> u32 {
			*self.calls.lock().unwrap()
		}
	}

	#[async_trait]
	impl Transcoder for ScriptedTranscoder {
		async fn transcode(&self, segment: &Segment) -> Result<Bytes, TranscodeError> {
			*self.calls.lock().unwrap() += 1;
			let scripted = self.script.lock().unwrap().pop_front();
			scripted.unwrap_or_else(|| {
				let mut output = segment.data.to_vec();
				output.reverse();
				Ok(output.into())
			})
		}
	}

	fn segments(range: std::ops::RangeInclusive<u64>) -> Vec<Segment> {
		range
			.map(|n| Segment {
				sequence_number: n,
				data: Bytes::from(vec![n as u8; 16]),
			})
			.collect()
	}

	fn leaves(n: u8) -> Vec<B256> {
		(0..n).map(|i| keccak256([i])).collect()
	}

	#[test]
	fn test_merkle_proofs_fold_to_root() {
		for n in [1u8, 2, 3, 5, 8] {
			let leaves = leaves(n);
			let root = merkle_root(&leaves);
			for (i, leaf) in leaves.iter().enumerate() {
				let proof = merkle_proof(&leaves, i);
				assert!(verify_merkle_proof(*leaf, &proof, root), "n={} i={}", n, i);
			}
		}
	}

	#[test]
	fn test_single_leaf_is_root() {
		let leaves = leaves(1);
		assert_eq!(merkle_root(&leaves), leaves[0]);
		assert!(merkle_proof(&leaves, 0).is_empty());
	}

	#[test]
	fn test_tampered_leaf_fails_proof() {
		let leaves = leaves(4);
		let root = merkle_root(&leaves);
		let proof = merkle_proof(&leaves, 2);
		assert!(!verify_merkle_proof(keccak256(b"forged"), &proof, root));
	}

	#[tokio::test(start_paused = true)]
	async fn test_claim_submits_root_over_transcoded_segments() {
		let harness = harness().await;
		let transcoder = ScriptedTranscoder::new(vec![]);

		let claim = harness
			.manager
			.claim_transcoded_segments(transcoder.clone(), U256::from(9), segments(4..=7))
			.await
			.unwrap();

		assert_eq!(claim.segment_range, SegmentRange::new(4, 7));
		assert_eq!(claim.segments.len(), 4);
		assert_eq!(transcoder.calls(), 4);

		let submitted = harness.chain.submitted();
		assert_eq!(submitted.len(), 1);
		let call = IJobsManager::claimWorkCall::abi_decode(&submitted[0].data).unwrap();
		assert_eq!(call.jobId, U256::from(9));
		assert_eq!(call.claimRoot, claim.claim_root);

		let segment = claim.segments[2];
		let proof = claim.proof(6).unwrap();
		assert!(verify_merkle_proof(segment.leaf(), &proof, claim.claim_root));
		assert!(claim.proof(8).is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn test_retryable_failure_is_retried() {
		let harness = harness().await;
		let transcoder = ScriptedTranscoder::new(vec![
			Err(TranscodeError::Retryable("gpu busy".into())),
			Err(TranscodeError::Retryable("gpu busy".into())),
		]);

		let started = Instant::now();
		harness
			.manager
			.claim_transcoded_segments(transcoder.clone(), U256::from(1), segments(0..=0))
			.await
			.unwrap();

		assert_eq!(transcoder.calls(), 3);
		assert_eq!(started.elapsed(), Duration::from_millis(500 + 1000));
	}

	#[tokio::test(start_paused = true)]
	async fn test_exhausted_retries_submit_nothing() {
		let harness = harness().await;
		let transcoder = ScriptedTranscoder::new(
			(0..MAX_TRANSCODE_ATTEMPTS)
				.map(|_| Err(TranscodeError::Retryable("gpu busy".into())))
				.collect(),
		);

		let result = harness
			.manager
			.claim_transcoded_segments(transcoder.clone(), U256::from(1), segments(0..=1))
			.await;

		assert!(matches!(result, Err(ClientError::UnrecoverableProcess(_))));
		assert_eq!(transcoder.calls(), MAX_TRANSCODE_ATTEMPTS);
		assert!(harness.chain.submitted().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn test_unrecoverable_failure_submits_nothing() {
		let harness = harness().await;
		let transcoder = ScriptedTranscoder::new(vec![
			Ok(Bytes::from_static(b"ok")),
			Err(TranscodeError::Unrecoverable("corrupt input".into())),
		]);

		let result = harness
			.manager
			.claim_transcoded_segments(transcoder.clone(), U256::from(1), segments(0..=3))
			.await;

		assert!(matches!(
			result,
			Err(ClientError::UnrecoverableProcess(ref m)) if m.contains("corrupt input")
		));
		assert_eq!(transcoder.calls(), 2);
		assert!(harness.chain.submitted().is_empty());
	}

	#[tokio::test]
	async fn test_gaps_in_segments_are_rejected() {
		let harness = harness().await;
		let mut batch = segments(0..=3);
		batch.remove(1);

		let result = harness
			.manager
			.claim_transcoded_segments(ScriptedTranscoder::new(vec![]), U256::from(1), batch)
			.await;
		assert!(matches!(result, Err(ClientError::InvalidRequest(_))));

		let result = harness
			.manager
			.claim_transcoded_segments(ScriptedTranscoder::new(vec![]), U256::from(1), vec![])
			.await;
		assert!(matches!(result, Err(ClientError::InvalidRequest(_))));
	}

	#[test]
	fn test_sequence_numbers_do_not_wrap() {
		let batch = vec![
			Segment {
				sequence_number: u64::MAX,
				data: Bytes::from_static(b"last"),
			},
			Segment {
				sequence_number: 0,
				data: Bytes::from_static(b"first"),
			},
		];
		assert!(matches!(claimed_range(&batch), Err(ClientError::InvalidRequest(_))));

		let single = &batch[..1];
		let range = claimed_range(single).unwrap();
		assert_eq!(range, SegmentRange::new(u64::MAX, u64::MAX));
	}

	#[test]
	fn test_verification_evidence_from_segment() {
		let segment = TranscodedSegment {
			sequence_number: 3,
			data_hash: B256::repeat_byte(0x01),
			transcoded_data_hash: B256::repeat_byte(0x02),
		};
		let proof = vec![B256::repeat_byte(0x03), B256::repeat_byte(0x04)];

		let evidence = segment.verification(Bytes::from_static(&[0xaa; 65]), &proof);
		assert_eq!(evidence.segment_number, U256::from(3));
		assert_eq!(evidence.data_hash, format!("0x{}", "01".repeat(32)));
		assert_eq!(evidence.proof.len(), 64);
	}
}
