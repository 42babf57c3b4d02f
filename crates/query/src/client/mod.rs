//! Shared query cache and fetch orchestration.
//!
//! # Fetch lifecycle
//!
//! ```text
//! fetch(key) ──► in flight? ── yes ──► join shared future
//!                    │
//!                    no ──► generation = clock.next()
//!                           spawn fetcher ──► settle(key, generation)
//! ```
//!
//! A fetch only writes back when the entry still exists and still carries
//! the generation that issued it. Evicting a key (scope removal, sign-out)
//! therefore discards every fetch already in flight for it.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Instant;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use purse_worker::{GenerationClock, TaskClass, WorkerJoinSet, join_error_panic_message};
use tokio::sync::broadcast;

use crate::optimistic::{OptimisticTx, Revert};
use crate::{CacheConfig, QueryError, QueryFilter, QueryKey, Result};


pub(crate) type AnyData = Arc<dyn Any + Send + Sync>;
type FetchOutcome = Result<AnyData>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

/// Type-erased query function registered with a cache entry.
///
/// Invalidation re-runs the last fetcher registered for a key, so an entry
/// keeps refreshing while anything observes it.
#[derive(Clone)]
pub struct Fetcher(Arc<dyn Fn() -> BoxFuture<'static, FetchOutcome> + Send + Sync>);

impl Fetcher {
	pub fn new<F, Fut, T, E>(f: F) -> Self
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
		T: Send + Sync + 'static,
		E: std::error::Error + Send + Sync + 'static,
	{
		Self(Arc::new(move || {
			let fut = f();
			async move {
				match fut.await {
					Ok(value) => Ok(Arc::new(value) as AnyData),
					Err(error) => Err(QueryError::source_error(error)),
				}
			}
			.boxed()
		}))
	}

	fn run(&self) -> BoxFuture<'static, FetchOutcome> {
		(self.0)()
	}
}

impl std::fmt::Debug for Fetcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("Fetcher")
	}
}

/// Notifications published for every cache mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
	FetchStarted(QueryKey),
	Updated(QueryKey),
	Failed(QueryKey),
	Invalidated(QueryKey),
	Removed(QueryKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
	Idle,
	Fetching,
}

/// Point-in-time view of one cache entry.
#[derive(Debug, Clone)]
pub struct QueryState {
	pub status: FetchStatus,
	pub has_data: bool,
	pub error: Option<QueryError>,
	pub is_stale: bool,
	pub observers: usize,
	pub updated_at: Option<Instant>,
}

impl QueryState {
	/// True while the first fetch for this entry has not produced data yet.
	pub fn is_loading(&self) -> bool {
		self.status == FetchStatus::Fetching && !self.has_data
	}
}

/// Outcome of [`QueryClient::invalidate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidateReport {
	pub invalidated: Vec<QueryKey>,
	pub refetched: usize,
}

/// How [`QueryClient::revert_write`] dealt with one entry.
pub(crate) enum Reverted {
	Restored,
	Inverted,
	Stale,
	Gone,
}

struct InFlight {
	generation: u64,
	future: SharedFetch,
}

struct Entry {
	data: Option<AnyData>,
	error: Option<QueryError>,
	updated_at: Option<Instant>,
	invalidated: bool,
	observers: usize,
	unobserved_since: Option<Instant>,
	version: u64,
	/// Identifies this entry among every entry ever created under its key.
	epoch: u64,
	fetch: Option<InFlight>,
	fetcher: Option<Fetcher>,
}

impl Entry {
	fn new(now: Instant, epoch: u64) -> Self {
		Self {
			data: None,
			error: None,
			updated_at: None,
			invalidated: false,
			observers: 0,
			unobserved_since: Some(now),
			version: 0,
			epoch,
			fetch: None,
			fetcher: None,
		}
	}

	fn is_stale(&self, now: Instant, config: &CacheConfig) -> bool {
		self.invalidated
			|| match self.updated_at {
				Some(at) => now.saturating_duration_since(at) >= config.stale_time(),
				None => true,
			}
	}

	fn state(&self, now: Instant, config: &CacheConfig) -> QueryState {
		QueryState {
			status: if self.fetch.is_some() { FetchStatus::Fetching } else { FetchStatus::Idle },
			has_data: self.data.is_some(),
			error: self.error.clone(),
			is_stale: self.is_stale(now, config),
			observers: self.observers,
			updated_at: self.updated_at,
		}
	}
}

struct Inner {
	entries: Mutex<HashMap<QueryKey, Entry>>,
	config: CacheConfig,
	clock: GenerationClock,
	events: broadcast::Sender<CacheEvent>,
}

impl Inner {
	fn emit(&self, event: CacheEvent) {
		let _ = self.events.send(event);
	}
}

/// Cheaply cloneable handle to the shared query cache.
#[derive(Clone)]
pub struct QueryClient {
	inner: Arc<Inner>,
}

impl std::fmt::Debug for QueryClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("QueryClient")
			.field("entries", &self.inner.entries.lock().len())
			.field("config", &self.inner.config)
			.finish()
	}
}

impl Default for QueryClient {
	fn default() -> Self {
		Self::new(CacheConfig::default())
	}
}

impl QueryClient {
	pub fn new(config: CacheConfig) -> Self {
		let (events, _) = broadcast::channel(config.event_capacity.max(1));
		Self {
			inner: Arc::new(Inner {
				entries: Mutex::new(HashMap::new()),
				config,
				clock: GenerationClock::new(),
				events,
			}),
		}
	}

	pub fn config(&self) -> &CacheConfig {
		&self.inner.config
	}

	/// Subscribes to cache events.
	pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
		self.inner.events.subscribe()
	}

	/// Returns cached data for `key` when present and of type `T`.
	pub fn get_data<T>(&self, key: &QueryKey) -> Option<Arc<T>>
	where
		T: Any + Send + Sync,
	{
		let data = self.inner.entries.lock().get(key)?.data.clone()?;
		data.downcast::<T>().ok()
	}

	/// Replaces the data of `key`, creating the entry if needed.
	pub fn set_data<T>(&self, key: QueryKey, value: T)
	where
		T: Any + Send + Sync,
	{
		let now = Instant::now();
		{
			let mut entries = self.inner.entries.lock();
			let entry = entries.entry(key.clone()).or_insert_with(|| Entry::new(now, self.inner.clock.next()));
			entry.data = Some(Arc::new(value));
			entry.error = None;
			entry.updated_at = Some(now);
			entry.version = entry.version.wrapping_add(1);
		}
		self.inner.emit(CacheEvent::Updated(key));
	}

	/// Applies `f` to a copy of every matching entry holding a `T`.
	///
	/// Returns the keys that were rewritten.
	pub fn update_data<T, F>(&self, filter: &QueryFilter, f: F) -> Vec<QueryKey>
	where
		T: Any + Clone + Send + Sync,
		F: FnMut(&mut T),
	{
		self.patch_entries::<T, F>(filter, f).into_iter().map(|(key, _, _)| key).collect()
	}

	/// Rewrites matching entries, returning `(key, prior, new_version)` per entry.
	pub(crate) fn patch_entries<T, F>(&self, filter: &QueryFilter, mut f: F) -> Vec<(QueryKey, AnyData, u64)>
	where
		T: Any + Clone + Send + Sync,
		F: FnMut(&mut T),
	{
		let mut touched = Vec::new();
		{
			let mut entries = self.inner.entries.lock();
			for (key, entry) in entries.iter_mut().filter(|(key, _)| filter.matches(key)) {
				let Some(prior) = entry.data.clone() else {
					continue;
				};
				let Some(current) = prior.downcast_ref::<T>() else {
					tracing::trace!(%key, expected = type_name::<T>(), "query.patch.skip_type");
					continue;
				};
				let mut next = current.clone();
				f(&mut next);
				entry.data = Some(Arc::new(next));
				entry.version = entry.version.wrapping_add(1);
				touched.push((key.clone(), prior, entry.version));
			}
		}
		for (key, _, _) in &touched {
			self.inner.emit(CacheEvent::Updated(key.clone()));
		}
		touched
	}

	/// Undoes an optimistic write to `key`.
	///
	/// `prior` comes back when nothing else wrote the entry after `version`.
	/// Otherwise `reverts` are applied newest first to the current data.
	pub(crate) fn revert_write(&self, key: &QueryKey, prior: AnyData, version: u64, reverts: Option<&[Revert]>) -> Reverted {
		let outcome = {
			let mut entries = self.inner.entries.lock();
			match entries.get_mut(key) {
				None => Reverted::Gone,
				Some(entry) if entry.version == version => {
					entry.data = Some(prior);
					entry.version = entry.version.wrapping_add(1);
					Reverted::Restored
				}
				Some(entry) => {
					let inverted = entry
						.data
						.as_ref()
						.zip(reverts)
						.and_then(|(data, reverts)| reverts.iter().rev().try_fold(Arc::clone(data), |data, revert| revert(&data)));
					match inverted {
						Some(data) => {
							entry.data = Some(data);
							entry.version = entry.version.wrapping_add(1);
							Reverted::Inverted
						}
						None => Reverted::Stale,
					}
				}
			}
		};
		match outcome {
			Reverted::Restored | Reverted::Inverted => self.inner.emit(CacheEvent::Updated(key.clone())),
			Reverted::Stale => tracing::debug!(%key, version, "query.revert.stale"),
			Reverted::Gone => tracing::trace!(%key, "query.revert.gone"),
		}
		outcome
	}

	/// Starts an optimistic transaction against this cache.
	pub fn begin_optimistic(&self) -> OptimisticTx {
		OptimisticTx::new(self.clone(), self.inner.clock.next())
	}

	pub fn state(&self, key: &QueryKey) -> Option<QueryState> {
		let now = Instant::now();
		self.inner.entries.lock().get(key).map(|entry| entry.state(now, &self.inner.config))
	}

	/// Returns every cached key matching `filter`.
	pub fn keys(&self, filter: &QueryFilter) -> Vec<QueryKey> {
		self.inner.entries.lock().keys().filter(|key| filter.matches(key)).cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.inner.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.entries.lock().is_empty()
	}

	/// Registers an observer for `key`; the entry counts as active while held.
	pub fn observe(&self, key: QueryKey) -> ObserverGuard {
		let now = Instant::now();
		let epoch = {
			let mut entries = self.inner.entries.lock();
			let entry = entries.entry(key.clone()).or_insert_with(|| Entry::new(now, self.inner.clock.next()));
			entry.observers += 1;
			entry.unobserved_since = None;
			entry.epoch
		};
		ObserverGuard {
			inner: Arc::downgrade(&self.inner),
			key,
			epoch,
		}
	}

	/// Runs `fetcher` for `key`, joining a fetch already in flight.
	pub async fn fetch<T>(&self, key: QueryKey, fetcher: Fetcher) -> Result<Arc<T>>
	where
		T: Any + Send + Sync,
	{
		let data = self.fetch_any(key.clone(), fetcher, false).await?;
		downcast(key, data)
	}

	/// Returns fresh cached data for `key`, fetching only when stale or missing.
	pub async fn ensure<T>(&self, key: QueryKey, fetcher: Fetcher) -> Result<Arc<T>>
	where
		T: Any + Send + Sync,
	{
		let cached = {
			let now = Instant::now();
			let mut entries = self.inner.entries.lock();
			let entry = entries.entry(key.clone()).or_insert_with(|| Entry::new(now, self.inner.clock.next()));
			entry.fetcher = Some(fetcher.clone());
			match &entry.data {
				Some(data) if entry.error.is_none() && entry.fetch.is_none() && !entry.is_stale(now, &self.inner.config) => Some(data.clone()),
				_ => None,
			}
		};
		match cached {
			Some(data) => downcast(key, data),
			None => self.fetch(key, fetcher).await,
		}
	}

	/// Starts (or joins) the fetch for `key`.
	///
	/// With `supersede`, a fetch already in flight is replaced: its result
	/// will be discarded on settle because the entry's generation moved on.
	fn fetch_any(&self, key: QueryKey, fetcher: Fetcher, supersede: bool) -> SharedFetch {
		let now = Instant::now();
		let mut entries = self.inner.entries.lock();
		let entry = entries.entry(key.clone()).or_insert_with(|| Entry::new(now, self.inner.clock.next()));
		entry.fetcher = Some(fetcher.clone());
		if let Some(in_flight) = &entry.fetch {
			if !supersede {
				tracing::trace!(%key, generation = in_flight.generation, "query.fetch.join");
				return in_flight.future.clone();
			}
			tracing::trace!(%key, generation = in_flight.generation, "query.fetch.supersede");
		}

		let generation = self.inner.clock.next();
		let client = self.clone();
		let task_key = key.clone();
		let handle = purse_worker::spawn(TaskClass::Background, async move {
			let outcome = match AssertUnwindSafe(fetcher.run()).catch_unwind().await {
				Ok(outcome) => outcome,
				Err(payload) => {
					let reason = payload
						.downcast_ref::<&'static str>()
						.map(|s| (*s).to_string())
						.or_else(|| payload.downcast_ref::<String>().cloned())
						.unwrap_or_else(|| "fetcher panicked".to_string());
					Err(QueryError::Aborted { key: task_key.clone(), reason })
				}
			};
			client.settle(&task_key, generation, &outcome);
			outcome
		});

		let join_key = key.clone();
		let future = async move {
			match handle.await {
				Ok(outcome) => outcome,
				Err(err) => Err(QueryError::Aborted {
					key: join_key,
					reason: join_error_panic_message(err).unwrap_or_else(|| "cancelled".to_string()),
				}),
			}
		}
		.boxed()
		.shared();

		entry.fetch = Some(InFlight {
			generation,
			future: future.clone(),
		});
		drop(entries);

		tracing::trace!(%key, generation, "query.fetch.start");
		self.inner.emit(CacheEvent::FetchStarted(key));
		future
	}

	fn settle(&self, key: &QueryKey, generation: u64, outcome: &FetchOutcome) {
		let event = {
			let mut entries = self.inner.entries.lock();
			let Some(entry) = entries.get_mut(key) else {
				tracing::trace!(%key, generation, "query.settle.evicted");
				return;
			};
			if entry.fetch.as_ref().map(|f| f.generation) != Some(generation) {
				tracing::trace!(%key, generation, "query.settle.superseded");
				return;
			}
			entry.fetch = None;
			match outcome {
				Ok(data) => {
					entry.data = Some(data.clone());
					entry.error = None;
					entry.updated_at = Some(Instant::now());
					entry.invalidated = false;
					entry.version = entry.version.wrapping_add(1);
					CacheEvent::Updated(key.clone())
				}
				Err(error) => {
					entry.error = Some(error.clone());
					CacheEvent::Failed(key.clone())
				}
			}
		};
		tracing::debug!(%key, generation, ok = outcome.is_ok(), "query.settle");
		self.inner.emit(event);
	}

	/// Marks matching entries stale and refetches the observed ones.
	///
	/// Resolves once every triggered refetch has settled. Refetch failures are
	/// recorded on their entries, not returned.
	pub async fn invalidate(&self, filter: &QueryFilter) -> InvalidateReport {
		self.invalidate_all(std::slice::from_ref(filter)).await
	}

	/// Like [`QueryClient::invalidate`] over the union of `filters`.
	///
	/// A key matched by several filters is invalidated and refetched once.
	/// Fetches already in flight for a matched key are superseded so their
	/// possibly outdated result is never written back.
	pub async fn invalidate_all(&self, filters: &[QueryFilter]) -> InvalidateReport {
		let (invalidated, refetch) = {
			let mut entries = self.inner.entries.lock();
			let mut invalidated = Vec::new();
			let mut refetch = Vec::new();
			for (key, entry) in entries.iter_mut().filter(|(key, _)| filters.iter().any(|f| f.matches(key))) {
				entry.invalidated = true;
				invalidated.push(key.clone());
				if entry.observers == 0 && entry.fetch.is_none() {
					continue;
				}
				if let Some(fetcher) = &entry.fetcher {
					refetch.push((key.clone(), fetcher.clone()));
				}
			}
			(invalidated, refetch)
		};

		for key in &invalidated {
			self.inner.emit(CacheEvent::Invalidated(key.clone()));
		}
		tracing::debug!(filters = filters.len(), invalidated = invalidated.len(), refetch = refetch.len(), "query.invalidate");

		let mut set = WorkerJoinSet::new(TaskClass::Background);
		for (key, fetcher) in refetch {
			let fut = self.fetch_any(key, fetcher, true);
			set.spawn(async move {
				let _ = fut.await;
			});
		}
		let refetched = set.join_all().await.len();

		InvalidateReport { invalidated, refetched }
	}

	/// Evicts every matching entry, discarding fetches in flight for them.
	pub fn remove(&self, filter: &QueryFilter) -> usize {
		let removed: Vec<QueryKey> = {
			let mut entries = self.inner.entries.lock();
			let keys: Vec<_> = entries.keys().filter(|key| filter.matches(key)).cloned().collect();
			for key in &keys {
				entries.remove(key);
			}
			keys
		};
		for key in &removed {
			self.inner.emit(CacheEvent::Removed(key.clone()));
		}
		removed.len()
	}

	/// Evicts every entry whose key carries the scope segment of `profile_id`.
	pub fn remove_scope(&self, profile_id: &str) -> usize {
		let removed = self.remove(&QueryFilter::prefix(QueryKey::new()).scoped(profile_id));
		tracing::debug!(profile_id, removed, "query.remove_scope");
		removed
	}

	/// Drops unobserved, idle entries older than the configured GC time.
	pub fn collect_garbage(&self) -> usize {
		let now = Instant::now();
		let gc_time = self.inner.config.gc_time();
		let removed: Vec<QueryKey> = {
			let mut entries = self.inner.entries.lock();
			let keys: Vec<_> = entries
				.iter()
				.filter(|(_, entry)| {
					entry.observers == 0
						&& entry.fetch.is_none()
						&& entry.unobserved_since.is_some_and(|since| now.saturating_duration_since(since) >= gc_time)
				})
				.map(|(key, _)| key.clone())
				.collect();
			for key in &keys {
				entries.remove(key);
			}
			keys
		};
		for key in &removed {
			self.inner.emit(CacheEvent::Removed(key.clone()));
		}
		removed.len()
	}

	/// Drops every entry.
	pub fn clear(&self) -> usize {
		self.remove(&QueryFilter::prefix(QueryKey::new()))
	}
}

fn downcast<T>(key: QueryKey, data: AnyData) -> Result<Arc<T>>
where
	T: Any + Send + Sync,
{
	data.downcast::<T>().map_err(|_| QueryError::TypeMismatch {
		key,
		expected: type_name::<T>(),
	})
}

/// Keeps a cache entry active; dropping it starts the entry's GC clock.
///
/// The guard is bound to the entry it registered with. Once that entry is
/// evicted, dropping the guard leaves any entry recreated under the same key
/// alone.
#[derive(Debug)]
pub struct ObserverGuard {
	inner: Weak<Inner>,
	key: QueryKey,
	epoch: u64,
}

impl ObserverGuard {
	pub fn key(&self) -> &QueryKey {
		&self.key
	}
}

impl Drop for ObserverGuard {
	fn drop(&mut self) {
		let Some(inner) = self.inner.upgrade() else {
			return;
		};
		let mut entries = inner.entries.lock();
		if let Some(entry) = entries.get_mut(&self.key).filter(|entry| entry.epoch == self.epoch) {
			entry.observers = entry.observers.saturating_sub(1);
			if entry.observers == 0 {
				entry.unobserved_since = Some(Instant::now());
			}
		}
	}
}
