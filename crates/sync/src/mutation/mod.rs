//! Mutation orchestration.
//!
//! A [`Mutation`] wraps one remote write with the cache bookkeeping around
//! it:
//!
//! ```text
//! mutate(input) ─► optimistic patch (sync) ─► gateway call
//!                                              │
//!                       ok ◄───────────────────┴──────────────► err
//!                        │                                        │
//!        invalidate(invalidation_keys) once          rollback own patches
//!                        │                                 invalidate stale keys
//!                        │                                        │
//!                   on_success                                on_error
//! ```
//!
//! The pipeline runs as its own task, so a caller dropping the returned
//! future does not leave the cache half-updated. Concurrent calls are
//! independent; the observable state tracks the most recent call only.

mod descriptor;
mod factory;
pub mod optimistic;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use purse_query::{OptimisticTx, QueryClient, QueryFilter};
use purse_worker::{TaskClass, join_error_panic_message};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use self::descriptor::MutationDescriptor;
pub use self::factory::{UpdateArgs, create_mutation, delete_mutation, update_mutation};
use crate::error::{GatewayResult, MutationError};


type RunFn<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, GatewayResult<O>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationStatus {
	#[default]
	Idle,
	Pending,
	Success,
	Error,
}

/// Observable state of the latest call.
#[derive(Debug, Clone)]
pub struct MutationState<O> {
	pub status: MutationStatus,
	pub data: Option<O>,
	pub error: Option<MutationError>,
}

impl<O> Default for MutationState<O> {
	fn default() -> Self {
		Self {
			status: MutationStatus::Idle,
			data: None,
			error: None,
		}
	}
}

struct Inner<I, O> {
	name: String,
	client: QueryClient,
	run: RunFn<I, O>,
	descriptor: MutationDescriptor<I, O>,
	state: Mutex<MutationState<O>>,
	latest: AtomicU64,
}

/// Handle to one remote write operation. Cheap to clone.
pub struct Mutation<I, O> {
	inner: Arc<Inner<I, O>>,
}

impl<I, O> Clone for Mutation<I, O> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<I, O> std::fmt::Debug for Mutation<I, O> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Mutation")
			.field("name", &self.inner.name)
			.field("status", &self.inner.state.lock().status)
			.finish_non_exhaustive()
	}
}

impl<I, O> Mutation<I, O>
where
	I: Clone + Send + Sync + 'static,
	O: Clone + Send + Sync + 'static,
{
	pub fn new(
		name: impl Into<String>,
		client: QueryClient,
		run: impl Fn(I) -> BoxFuture<'static, GatewayResult<O>> + Send + Sync + 'static,
		descriptor: MutationDescriptor<I, O>,
	) -> Self {
		Self {
			inner: Arc::new(Inner {
				name: name.into(),
				client,
				run: Arc::new(run),
				descriptor,
				state: Mutex::new(MutationState::default()),
				latest: AtomicU64::new(0),
			}),
		}
	}

	pub fn name(&self) -> &str {
		&self.inner.name
	}

	/// Fire-and-forget variant of [`Mutation::mutate_async`].
	///
	/// The outcome is only visible through the state accessors and the
	/// descriptor callbacks.
	pub fn mutate(&self, input: I) {
		let (_, handle) = self.start(input);
		let name = self.inner.name.clone();
		drop(purse_worker::spawn(TaskClass::Background, async move {
			match handle.await {
				Ok(Ok(_)) => {}
				Ok(Err(error)) => debug!(mutation = %name, %error, "mutation.detached.failed"),
				Err(error) => warn!(mutation = %name, %error, "mutation.detached.aborted"),
			}
		}));
	}

	/// Runs the mutation and resolves with the server response.
	pub async fn mutate_async(&self, input: I) -> Result<O, MutationError> {
		let (call, handle) = self.start(input);
		match handle.await {
			Ok(outcome) => outcome,
			Err(error) => {
				let reason = join_error_panic_message(error).unwrap_or_else(|| "cancelled".to_string());
				let error = MutationError::Aborted(reason);
				self.inner.finish(call, Err(error.clone()));
				Err(error)
			}
		}
	}

	/// Applies the optimistic patch and spawns the rest of the pipeline.
	fn start(&self, input: I) -> (u64, JoinHandle<Result<O, MutationError>>) {
		let call = self.inner.latest.fetch_add(1, Ordering::SeqCst) + 1;
		{
			let mut state = self.inner.state.lock();
			state.status = MutationStatus::Pending;
			state.error = None;
		}

		let mut tx = self.inner.client.begin_optimistic();
		if let Some(patch) = &self.inner.descriptor.optimistic_patch {
			patch(&input, &mut tx);
		}
		debug!(mutation = %self.inner.name, call, patched = tx.keys().count(), "mutation.start");

		let inner = Arc::clone(&self.inner);
		(call, purse_worker::spawn(TaskClass::Interactive, inner.execute(call, input, tx)))
	}

	pub fn state(&self) -> MutationState<O> {
		self.inner.state.lock().clone()
	}

	pub fn status(&self) -> MutationStatus {
		self.inner.state.lock().status
	}

	pub fn data(&self) -> Option<O> {
		self.inner.state.lock().data.clone()
	}

	pub fn error(&self) -> Option<MutationError> {
		self.inner.state.lock().error.clone()
	}

	pub fn is_idle(&self) -> bool {
		self.status() == MutationStatus::Idle
	}

	pub fn is_pending(&self) -> bool {
		self.status() == MutationStatus::Pending
	}

	pub fn is_success(&self) -> bool {
		self.status() == MutationStatus::Success
	}

	pub fn is_error(&self) -> bool {
		self.status() == MutationStatus::Error
	}

	/// Returns to idle. Calls still in flight no longer update the state.
	pub fn reset(&self) {
		self.inner.latest.fetch_add(1, Ordering::SeqCst);
		*self.inner.state.lock() = MutationState::default();
	}
}

impl<I, O> Inner<I, O>
where
	I: Clone + Send + Sync + 'static,
	O: Clone + Send + Sync + 'static,
{
	async fn execute(self: Arc<Self>, call: u64, input: I, tx: OptimisticTx) -> Result<O, MutationError> {
		match (self.run)(input.clone()).await {
			Ok(output) => {
				tx.commit();
				let filters = dedup_filters((self.descriptor.invalidation_keys)(&input, &output));
				let report = self.client.invalidate_all(&filters).await;
				debug!(
					mutation = %self.name,
					call,
					invalidated = report.invalidated.len(),
					refetched = report.refetched,
					"mutation.success"
				);
				if let Some(on_success) = &self.descriptor.on_success {
					on_success(&input, &output);
				}
				self.finish(call, Ok(output.clone()));
				Ok(output)
			}
			Err(error) => {
				let rollback = tx.rollback();
				if !rollback.stale.is_empty() {
					let stale: Vec<QueryFilter> = rollback.stale.iter().cloned().map(QueryFilter::exact).collect();
					self.client.invalidate_all(&stale).await;
				}
				let error = MutationError::from(error);
				warn!(
					mutation = %self.name,
					call,
					restored = rollback.restored,
					inverted = rollback.inverted,
					stale = rollback.stale.len(),
					%error,
					"mutation.failed"
				);
				if let Some(on_error) = &self.descriptor.on_error {
					on_error(&input, &error);
				}
				self.finish(call, Err(error.clone()));
				Err(error)
			}
		}
	}

	fn finish(&self, call: u64, outcome: Result<O, MutationError>) {
		if self.latest.load(Ordering::SeqCst) != call {
			debug!(mutation = %self.name, call, "mutation.state.superseded");
			return;
		}
		let mut state = self.state.lock();
		match outcome {
			Ok(output) => {
				state.status = MutationStatus::Success;
				state.data = Some(output);
				state.error = None;
			}
			Err(error) => {
				state.status = MutationStatus::Error;
				state.error = Some(error);
			}
		}
	}
}

fn dedup_filters(filters: Vec<QueryFilter>) -> Vec<QueryFilter> {
	let mut unique: Vec<QueryFilter> = Vec::with_capacity(filters.len());
	for filter in filters {
		if !unique.contains(&filter) {
			unique.push(filter);
		}
	}
	unique
}
