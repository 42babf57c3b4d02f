use std::future::Future;

use tokio::task::{JoinError, JoinSet};

use crate::TaskClass;

/// Fan-out group of classified tasks.
///
/// Members are spawned on the caller's runtime when there is one, otherwise
/// on the shared fallback runtime.
#[derive(Debug)]
pub struct WorkerJoinSet<T> {
	class: TaskClass,
	inner: JoinSet<T>,
}

impl<T> WorkerJoinSet<T>
where
	T: Send + 'static,
{
	pub fn new(class: TaskClass) -> Self {
		Self { class, inner: JoinSet::new() }
	}

	/// Members not yet joined.
	pub fn len(&self) -> usize {
		self.inner.len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	pub fn spawn<F>(&mut self, fut: F)
	where
		F: Future<Output = T> + Send + 'static,
	{
		tracing::trace!(worker_class = self.class.as_str(), pending = self.inner.len(), "worker.join_set.spawn");
		self.inner.spawn_on(fut, &crate::spawn::runtime_handle());
	}

	pub async fn join_next(&mut self) -> Option<Result<T, JoinError>> {
		self.inner.join_next().await
	}

	/// Drains the set. Outcomes come back in completion order, panics and
	/// cancellations included.
	pub async fn join_all(mut self) -> Vec<Result<T, JoinError>> {
		let mut outcomes = Vec::with_capacity(self.inner.len());
		while let Some(joined) = self.inner.join_next().await {
			outcomes.push(joined);
		}
		outcomes
	}

	pub fn abort_all(&mut self) {
		self.inner.abort_all();
	}
}
