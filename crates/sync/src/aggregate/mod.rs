//! Multi-scope list aggregation.
//!
//! A [`ScopedQuery`] turns one parameterized list query into one cache entry
//! per selected profile and merges whatever those entries currently hold.
//! Each profile's entry is keyed `base_key + [profile_id]`, so selecting or
//! deselecting a profile never invalidates the others.
//!
//! Merging is partial: a failed source contributes no items and no total,
//! and the first failure (in selection order) is reported next to the data
//! of the sources that succeeded.

use std::any::Any;
use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexSet;
use parking_lot::Mutex;
use purse_query::{CacheEvent, FetchStatus, Fetcher, ObserverGuard, QueryClient, QueryError, QueryKey};
use purse_worker::{TaskClass, WorkerJoinSet};
use tracing::{debug, trace};

use crate::error::{AggregationError, GatewayResult};
use crate::gateway::EntityGateway;
use crate::keys;
use crate::model::{Entity, ListPage, ListParams, ProfileId};

#[cfg(test)]
mod tests;

type KeyFn<P> = Arc<dyn Fn(&P) -> QueryKey + Send + Sync>;
type FetchFn<P, R> = Arc<dyn Fn(P) -> BoxFuture<'static, GatewayResult<R>> + Send + Sync>;
type ItemsFn<R, T> = Arc<dyn Fn(&R) -> Vec<T> + Send + Sync>;
type TotalFn<R> = Arc<dyn Fn(&R) -> u64 + Send + Sync>;
type ScopeFn<P> = Arc<dyn Fn(&P, &str) -> P + Send + Sync>;

/// How to fetch and read one source of a fan-out.
///
/// `P` is the params type, `R` the raw response cached per profile and `T`
/// the merged item type.
pub struct FanOutConfig<P, R, T> {
	key: KeyFn<P>,
	fetch: FetchFn<P, R>,
	items: ItemsFn<R, T>,
	total: TotalFn<R>,
	scope_params: Option<ScopeFn<P>>,
}

impl<P, R, T> Clone for FanOutConfig<P, R, T> {
	fn clone(&self) -> Self {
		Self {
			key: Arc::clone(&self.key),
			fetch: Arc::clone(&self.fetch),
			items: Arc::clone(&self.items),
			total: Arc::clone(&self.total),
			scope_params: self.scope_params.clone(),
		}
	}
}

impl<P, R, T> FanOutConfig<P, R, T> {
	pub fn new(
		key: impl Fn(&P) -> QueryKey + Send + Sync + 'static,
		fetch: impl Fn(P) -> BoxFuture<'static, GatewayResult<R>> + Send + Sync + 'static,
		items: impl Fn(&R) -> Vec<T> + Send + Sync + 'static,
		total: impl Fn(&R) -> u64 + Send + Sync + 'static,
	) -> Self {
		Self {
			key: Arc::new(key),
			fetch: Arc::new(fetch),
			items: Arc::new(items),
			total: Arc::new(total),
			scope_params: None,
		}
	}

	/// Injects the profile id into the params of each source.
	///
	/// Without it every source issues the same request and only the cache
	/// key tells them apart.
	pub fn with_scope_params(mut self, scope: impl Fn(&P, &str) -> P + Send + Sync + 'static) -> Self {
		self.scope_params = Some(Arc::new(scope));
		self
	}
}

impl<E: Entity> FanOutConfig<ListParams, ListPage<E>, E> {
	/// Fan-out over a gateway's `list`, cached under [`keys::list`].
	pub fn for_gateway<G: EntityGateway<E>>(gateway: Arc<G>) -> Self {
		let native_scope = gateway.native_scope();
		let config = Self::new(
			|params: &ListParams| keys::list(E::KIND, params),
			move |params: ListParams| {
				let gateway = Arc::clone(&gateway);
				Box::pin(async move { gateway.list(&params).await })
			},
			|page: &ListPage<E>| page.items.clone(),
			|page: &ListPage<E>| page.total,
		);
		if native_scope {
			config.with_scope_params(|params, profile_id| params.clone().with_profile(profile_id))
		} else {
			config
		}
	}
}

/// One per-profile source of a fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor<P> {
	pub profile_id: ProfileId,
	pub params: P,
	pub cache_key: QueryKey,
}

/// Merged view over every selected profile.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedResult<T> {
	/// Items in profile iteration order, then source order.
	pub items: Vec<T>,
	/// Sum of the reported totals of sources that succeeded.
	pub total: u64,
	/// Any source is fetching for the first time.
	pub is_loading: bool,
	/// Any source is fetching, including background refetches.
	pub is_fetching: bool,
	pub error: Option<AggregationError>,
}

impl<T> Default for AggregatedResult<T> {
	fn default() -> Self {
		Self {
			items: Vec::new(),
			total: 0,
			is_loading: false,
			is_fetching: false,
			error: None,
		}
	}
}

impl<T> AggregatedResult<T> {
	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}
}

/// Parameterized list query fanned out over a profile selection.
pub struct ScopedQuery<P, R, T> {
	client: QueryClient,
	config: FanOutConfig<P, R, T>,
	params: Mutex<P>,
	observers: Mutex<Vec<ObserverGuard>>,
}

impl<P, R, T> std::fmt::Debug for ScopedQuery<P, R, T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ScopedQuery").field("observed", &self.observers.lock().len()).finish_non_exhaustive()
	}
}

impl<P, R, T> ScopedQuery<P, R, T>
where
	P: Clone + Send + Sync + 'static,
	R: Any + Send + Sync,
	T: Clone,
{
	pub fn new(client: QueryClient, config: FanOutConfig<P, R, T>, params: P) -> Self {
		Self {
			client,
			config,
			params: Mutex::new(params),
			observers: Mutex::new(Vec::new()),
		}
	}

	pub fn params(&self) -> P {
		self.params.lock().clone()
	}

	/// Replaces the base params. Takes effect on the next `load`.
	pub fn set_params(&self, params: P) {
		*self.params.lock() = params;
	}

	/// One descriptor per distinct profile id, in first-seen order.
	pub fn descriptors(&self, profile_ids: &[ProfileId]) -> Vec<QueryDescriptor<P>> {
		let base = self.params();
		let unique: IndexSet<&ProfileId> = profile_ids.iter().collect();
		unique
			.into_iter()
			.map(|profile_id| {
				let params = match &self.config.scope_params {
					Some(scope) => scope(&base, profile_id),
					None => base.clone(),
				};
				let cache_key = (self.config.key)(&params).with_scope(profile_id.as_str());
				QueryDescriptor {
					profile_id: profile_id.clone(),
					params,
					cache_key,
				}
			})
			.collect()
	}

	/// Merges what the cache currently holds for `profile_ids`.
	pub fn result(&self, profile_ids: &[ProfileId]) -> AggregatedResult<T> {
		let mut merged = AggregatedResult::default();
		let mut failed = 0;
		let mut first_failure: Option<(ProfileId, QueryError)> = None;

		for descriptor in self.descriptors(profile_ids) {
			let Some(state) = self.client.state(&descriptor.cache_key) else {
				continue;
			};
			if state.status == FetchStatus::Fetching {
				merged.is_fetching = true;
			}
			merged.is_loading |= state.is_loading();
			if let Some(error) = state.error {
				failed += 1;
				if first_failure.is_none() {
					first_failure = Some((descriptor.profile_id, error));
				}
				continue;
			}
			if let Some(response) = self.client.get_data::<R>(&descriptor.cache_key) {
				merged.items.extend((self.config.items)(&response));
				merged.total += (self.config.total)(&response);
			}
		}

		merged.error = first_failure.map(|(profile_id, source)| AggregationError {
			profile_id,
			source,
			failed_sources: failed,
		});
		merged
	}

	/// Observes every source and fetches the stale or missing ones
	/// concurrently, then returns the merged result.
	///
	/// Sources for profiles no longer in `profile_ids` stop being observed
	/// and become eligible for garbage collection. An empty selection issues
	/// no request.
	pub async fn load(&self, profile_ids: &[ProfileId]) -> AggregatedResult<T> {
		self.run(profile_ids, false).await
	}

	/// Like [`ScopedQuery::load`] but refetches every source. Cached data
	/// stays visible until the new responses land.
	pub async fn refetch(&self, profile_ids: &[ProfileId]) -> AggregatedResult<T> {
		self.run(profile_ids, true).await
	}

	async fn run(&self, profile_ids: &[ProfileId], force: bool) -> AggregatedResult<T> {
		let descriptors = self.descriptors(profile_ids);
		self.rebind(&descriptors);

		let mut set = WorkerJoinSet::new(TaskClass::Interactive);
		for descriptor in descriptors {
			let client = self.client.clone();
			let fetcher = self.fetcher(descriptor.params);
			let key = descriptor.cache_key;
			set.spawn(async move {
				let outcome = if force {
					client.fetch::<R>(key.clone(), fetcher).await
				} else {
					client.ensure::<R>(key.clone(), fetcher).await
				};
				if let Err(error) = &outcome {
					debug!(%key, %error, "aggregate.source.failed");
				}
			});
		}
		let sources = set.len();
		let _ = set.join_all().await;
		trace!(sources, force, "aggregate.run");

		self.result(profile_ids)
	}

	/// Whether `event` concerns one of the sources for `profile_ids`.
	pub fn affected_by(&self, event: &CacheEvent, profile_ids: &[ProfileId]) -> bool {
		let key = match event {
			CacheEvent::FetchStarted(key)
			| CacheEvent::Updated(key)
			| CacheEvent::Failed(key)
			| CacheEvent::Invalidated(key)
			| CacheEvent::Removed(key) => key,
		};
		self.descriptors(profile_ids).iter().any(|d| &d.cache_key == key)
	}

	/// Stops observing every source.
	pub fn release(&self) {
		self.observers.lock().clear();
	}

	fn rebind(&self, descriptors: &[QueryDescriptor<P>]) {
		let guards: Vec<ObserverGuard> = descriptors.iter().map(|d| self.client.observe(d.cache_key.clone())).collect();
		// New guards are taken before the old ones drop so shared keys never
		// reach zero observers in between.
		let previous = std::mem::replace(&mut *self.observers.lock(), guards);
		drop(previous);
	}

	fn fetcher(&self, params: P) -> Fetcher {
		let fetch = Arc::clone(&self.config.fetch);
		Fetcher::new(move || fetch(params.clone()))
	}
}
