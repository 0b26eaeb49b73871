//! Waiting for contract events.

use crate::ClientError;
use lp_chain::ChainService;
use lp_types::{ChainLog, LogFilter, LogSubscription};
use std::time::Duration;
use tokio::time::Instant;
use tracing::instrument;

/// Waits for the first durable log on an account-scoped filter.
///
/// Logs retracted by a reorganisation are skipped. The timeout covers the
/// whole wait: a skipped log does not restart it.
#[derive(Clone)]
pub struct EventWatcher {
	chain: ChainService,
	timeout: Duration,
}

impl EventWatcher {
	/// `timeout` is the default wait used by callers that do not pass one.
	pub fn new(chain: ChainService, timeout: Duration) -> Self {
		Self { chain, timeout }
	}

	/// The configured event timeout.
	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	/// Opens a subscription on `filter` without waiting on it yet.
	pub async fn subscribe(&self, filter: &LogFilter) -> Result<LogSubscription, ClientError> {
		self.chain.subscribe_logs(filter).await.map_err(|e| {
			tracing::error!(address = %filter.address, error = %e, "Failed to open log subscription");
			ClientError::Subscription(e.to_string())
		})
	}

	/// Subscribes to `filter` and waits for the first durable log.
	pub async fn watch(&self, filter: &LogFilter, timeout: Duration) -> Result<ChainLog, ClientError> {
		let subscription = self.subscribe(filter).await?;
		Self::wait(subscription, timeout).await
	}

	/// Waits on an already-open subscription. The subscription is released
	/// before this returns, whatever the outcome.
	pub async fn wait(subscription: LogSubscription, timeout: Duration) -> Result<ChainLog, ClientError> {
		Self::wait_for(subscription, timeout, |_| true).await
	}

	/// Like [`wait`](Self::wait), but only a durable log that `accept`
	/// approves ends the wait. Rejected logs are skipped under the same
	/// deadline.
	pub async fn wait_for<F>(
		mut subscription: LogSubscription,
		timeout: Duration,
		accept: F,
	) -> Result<ChainLog, ClientError>
	where
		F: Fn(&ChainLog) -> bool + Send,
	{
		let outcome = Self::next(&mut subscription, timeout, accept).await;
		subscription.unsubscribe();
		outcome
	}

	/// Waits for the next durable log `accept` approves on a subscription
	/// the caller keeps. Logs already consumed are gone; the rest stay
	/// queued for the following call.
	#[instrument(skip_all, fields(timeout_secs = timeout.as_secs()))]
	pub async fn next<F>(
		subscription: &mut LogSubscription,
		timeout: Duration,
		accept: F,
	) -> Result<ChainLog, ClientError>
	where
		F: Fn(&ChainLog) -> bool + Send,
	{
		let deadline = Instant::now() + timeout;

		loop {
			match tokio::time::timeout_at(deadline, subscription.recv()).await {
				Ok(Some(log)) if log.removed => {
					tracing::warn!(
						block_number = ?log.block_number,
						tx_hash = ?log.transaction_hash,
						"Skipping retracted log"
					);
				},
				Ok(Some(log)) if !accept(&log) => {
					tracing::debug!(tx_hash = ?log.transaction_hash, "Skipping unrelated log");
				},
				Ok(Some(log)) => return Ok(log),
				Ok(None) => {
					return Err(ClientError::Subscription(
						"subscription closed before a matching event arrived".to_string(),
					))
				},
				Err(_) => {
					tracing::warn!("Timed out waiting for event");
					return Err(ClientError::EventTimeout(timeout));
				},
			}
		}
	}
}
