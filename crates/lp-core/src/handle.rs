//! Handles to operations running in the background.

use crate::ClientError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

/// A background operation that resolves exactly once, to either a value or a
/// [`ClientError`].
///
/// The operation starts running as soon as the handle is created; awaiting
/// the handle only collects the outcome. Dropping the handle detaches the
/// operation, it keeps running to completion.
#[must_use = "the outcome of the operation is only observable through the handle"]
#[derive(Debug)]
pub struct OperationHandle<T> {
	task: JoinHandle<Result<T, ClientError>>,
}

impl<T: Send + 'static> OperationHandle<T> {
	/// Runs `operation` on the runtime and returns a handle to its outcome.
	pub fn spawn<F>(operation: F) -> Self
	where
		F: Future<Output = Result<T, ClientError>> + Send + 'static,
	{
		Self {
			task: tokio::spawn(operation),
		}
	}
}

impl<T> OperationHandle<T> {
	/// Stops the local wait. The handle then resolves to
	/// [`ClientError::Cancelled`] unless the operation already finished.
	///
	/// A transaction that was already dispatched is not revoked; only the
	/// polling or event wait is abandoned and its subscription released.
	pub fn cancel(&self) {
		self.task.abort();
	}

	/// Whether the operation has settled, successfully or not.
	pub fn is_finished(&self) -> bool {
		self.task.is_finished()
	}
}

impl<T> Future for OperationHandle<T> {
	type Output = Result<T, ClientError>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.task).poll(cx) {
			Poll::Pending => Poll::Pending,
			Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
			Poll::Ready(Err(e)) if e.is_cancelled() => Poll::Ready(Err(ClientError::Cancelled)),
			Poll::Ready(Err(e)) => {
				tracing::error!(error = %e, "Operation task failed");
				Poll::Ready(Err(ClientError::UnrecoverableProcess(format!(
					"operation task failed: {}",
					e
				))))
			},
		}
	}
}
