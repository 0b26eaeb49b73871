//! Account-scoped log filters and the subscriptions opened on them.

use crate::{utils::left_pad_address, ChainLog};
use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Filter selecting one event of one contract, scoped to one account.
///
/// The account is matched against the first indexed topic, left-padded to
/// 32 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
	pub address: Address,
	/// Event signature hash (topic 0).
	pub event_signature: B256,
	/// Account expected in topic 1.
	pub account: Address,
}

impl LogFilter {
	pub fn new(address: Address, event_signature: B256, account: Address) -> Self {
		Self {
			address,
			event_signature,
			account,
		}
	}

	/// Topic 1 as it appears on-chain.
	pub fn account_topic(&self) -> B256 {
		left_pad_address(&self.account)
	}

	/// Returns true if `log` was emitted by the filtered contract and event
	/// for the filtered account.
	pub fn matches(&self, log: &ChainLog) -> bool {
		log.address == self.address
			&& log.topics.first() == Some(&self.event_signature)
			&& log.topics.get(1) == Some(&self.account_topic())
	}
}

/// A live, one-shot log subscription.
///
/// Logs arrive on an internal channel fed by whatever transport opened the
/// subscription. The subscription is released when [`unsubscribe`] is called
/// or when it is dropped, whichever comes first; release happens once. The
/// transport sees the channel close and drops its side of the subscription.
///
/// [`unsubscribe`]: LogSubscription::unsubscribe
#[derive(Debug)]
pub struct LogSubscription {
	logs: mpsc::UnboundedReceiver<ChainLog>,
	released: bool,
}

impl LogSubscription {
	/// Wraps a receiving channel. Closing the channel is how the producer
	/// side learns the subscription was released.
	pub fn new(logs: mpsc::UnboundedReceiver<ChainLog>) -> Self {
		Self {
			logs,
			released: false,
		}
	}

	/// Waits for the next log. Returns `None` once the producer is gone.
	pub async fn recv(&mut self) -> Option<ChainLog> {
		self.logs.recv().await
	}

	/// Releases the subscription.
	pub fn unsubscribe(mut self) {
		self.release();
	}

	fn release(&mut self) {
		if self.released {
			return;
		}
		self.released = true;
		self.logs.close();
	}
}

impl Drop for LogSubscription {
	fn drop(&mut self) {
		self.release();
	}
}
