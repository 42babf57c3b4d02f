use std::sync::Arc;

use purse_query::{OptimisticTx, QueryFilter};

use super::{UpdateArgs, optimistic};
use crate::error::MutationError;
use crate::keys;
use crate::model::{Entity, Patchable};

type InvalidateFn<I, O> = Arc<dyn Fn(&I, &O) -> Vec<QueryFilter> + Send + Sync>;
type PatchFn<I> = Arc<dyn Fn(&I, &mut OptimisticTx) + Send + Sync>;
type SuccessFn<I, O> = Arc<dyn Fn(&I, &O) + Send + Sync>;
type ErrorFn<I> = Arc<dyn Fn(&I, &MutationError) + Send + Sync>;

/// Cache behaviour around one mutation.
///
/// The default invalidates nothing and patches nothing; see the `*_defaults`
/// constructors for the per-operation defaults used by the factories.
pub struct MutationDescriptor<I, O> {
	pub(super) invalidation_keys: InvalidateFn<I, O>,
	pub(super) optimistic_patch: Option<PatchFn<I>>,
	pub(super) on_success: Option<SuccessFn<I, O>>,
	pub(super) on_error: Option<ErrorFn<I>>,
}

impl<I, O> Clone for MutationDescriptor<I, O> {
	fn clone(&self) -> Self {
		Self {
			invalidation_keys: Arc::clone(&self.invalidation_keys),
			optimistic_patch: self.optimistic_patch.clone(),
			on_success: self.on_success.clone(),
			on_error: self.on_error.clone(),
		}
	}
}

impl<I: 'static, O: 'static> Default for MutationDescriptor<I, O> {
	fn default() -> Self {
		Self {
			invalidation_keys: Arc::new(|_, _| Vec::new()),
			optimistic_patch: None,
			on_success: None,
			on_error: None,
		}
	}
}

impl<I: 'static, O: 'static> MutationDescriptor<I, O> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Filters invalidated after a successful call.
	pub fn invalidates(mut self, f: impl Fn(&I, &O) -> Vec<QueryFilter> + Send + Sync + 'static) -> Self {
		self.invalidation_keys = Arc::new(f);
		self
	}

	/// Patch applied to the cache before the remote call starts.
	pub fn optimistic(mut self, f: impl Fn(&I, &mut OptimisticTx) + Send + Sync + 'static) -> Self {
		self.optimistic_patch = Some(Arc::new(f));
		self
	}

	pub fn on_success(mut self, f: impl Fn(&I, &O) + Send + Sync + 'static) -> Self {
		self.on_success = Some(Arc::new(f));
		self
	}

	pub fn on_error(mut self, f: impl Fn(&I, &MutationError) + Send + Sync + 'static) -> Self {
		self.on_error = Some(Arc::new(f));
		self
	}

	pub fn has_optimistic_patch(&self) -> bool {
		self.optimistic_patch.is_some()
	}
}

impl<I: 'static, E: Entity> MutationDescriptor<I, E> {
	/// Create: invalidates every list of `E`.
	pub fn create_defaults() -> Self {
		Self::new().invalidates(|_, _| vec![keys::lists_filter(E::KIND)])
	}

	/// Update: invalidates every list of `E` and the updated record's detail.
	pub fn update_defaults() -> Self {
		Self::new().invalidates(|_, updated: &E| vec![keys::lists_filter(E::KIND), keys::detail_filter(E::KIND, updated.id())])
	}

	/// Shows a temporary record in the cached lists while the create runs.
	///
	/// `build` receives the input and a fresh `temp-` id.
	pub fn with_optimistic_insert(self, build: impl Fn(&I, String) -> E + Send + Sync + 'static) -> Self {
		self.optimistic(move |input, tx| {
			let temp = build(input, optimistic::temp_id());
			let profile_id = temp.profile_id().map(str::to_owned);
			optimistic::insert_temp(tx, profile_id.as_deref(), temp);
		})
	}
}

impl<E: Patchable> MutationDescriptor<UpdateArgs<E::Patch>, E> {
	/// Applies the patch to cached copies of the record while the update runs.
	pub fn with_optimistic_update(self) -> Self {
		self.optimistic(|args: &UpdateArgs<E::Patch>, tx| {
			optimistic::patch_by_id::<E, _>(tx, &args.id, |record| record.apply_patch(&args.patch));
		})
	}
}

impl MutationDescriptor<String, ()> {
	/// Delete: removes the record from cached lists up front, then
	/// invalidates every list of `E` and the record's detail.
	pub fn delete_defaults<E: Entity>() -> Self {
		Self::new()
			.optimistic(|id: &String, tx| {
				optimistic::remove_by_id::<E>(tx, id);
			})
			.invalidates(|id: &String, _| vec![keys::lists_filter(E::KIND), keys::detail_filter(E::KIND, id)])
	}
}
