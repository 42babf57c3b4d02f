use std::fmt::Display;
use std::future::Future;
use std::sync::OnceLock;

use tokio::task::{JoinError, JoinHandle};

use crate::{GenerationToken, TaskClass};

pub(crate) fn runtime_handle() -> tokio::runtime::Handle {
	if let Ok(handle) = tokio::runtime::Handle::try_current() {
		return handle;
	}

	static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name("purse-worker-global")
			.build()
			.expect("failed to build purse-worker global tokio runtime")
	});
	runtime.handle().clone()
}

/// Spawns an async task with shared worker classification metadata.
pub fn spawn<F>(class: TaskClass, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), "worker.spawn");
	runtime_handle().spawn(fut)
}

/// Spawns fire-and-forget work whose failure is logged rather than returned.
///
/// The task stops early when `token` is cancelled. Errors end at the `warn`
/// log; the returned handle only reports completion.
pub fn spawn_detached<F, E>(class: TaskClass, name: &'static str, token: GenerationToken, fut: F) -> JoinHandle<()>
where
	F: Future<Output = Result<(), E>> + Send + 'static,
	E: Display + Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), task = name, generation = token.generation(), "worker.spawn_detached");
	runtime_handle().spawn(async move {
		tokio::select! {
			biased;
			_ = token.cancelled() => {
				tracing::debug!(task = name, generation = token.generation(), "detached task cancelled");
			}
			result = fut => {
				if let Err(error) = result {
					tracing::warn!(task = name, worker_class = class.as_str(), %error, "detached task failed");
				}
			}
		}
	})
}

/// Extracts the panic message from a join error, if the task panicked.
///
/// Returns `None` for cancelled tasks.
pub fn join_error_panic_message(err: JoinError) -> Option<String> {
	let payload = err.try_into_panic().ok()?;
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		return Some((*msg).to_string());
	}
	if let Some(msg) = payload.downcast_ref::<String>() {
		return Some(msg.clone());
	}
	Some("non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicUsize, Ordering};

	use tokio_util::sync::CancellationToken;

	use super::*;

	#[tokio::test]
	async fn detached_failure_is_swallowed() {
		let token = GenerationToken::new(1, CancellationToken::new());
		let handle = spawn_detached(TaskClass::Background, "failing", token, async { Err::<(), _>("boom") });
		assert!(handle.await.is_ok());
	}

	#[tokio::test]
	async fn detached_task_skips_work_after_cancel() {
		let ran = Arc::new(AtomicUsize::new(0));
		let token = GenerationToken::new(1, CancellationToken::new());
		token.cancel();

		let ran_clone = Arc::clone(&ran);
		let handle = spawn_detached(TaskClass::Background, "cancelled", token, async move {
			ran_clone.fetch_add(1, Ordering::SeqCst);
			Ok::<(), String>(())
		});
		handle.await.unwrap();
		assert_eq!(ran.load(Ordering::SeqCst), 0);
	}
}
