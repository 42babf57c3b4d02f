//! In-memory gateways.
//!
//! Back the demo binary and the test suites. Every call is counted, list
//! failures can be injected per profile, and writes can be held at a gate so
//! tests can observe optimistic state before the "network" answers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::entities::{Account, NewAccount};
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{EntityGateway, ProfileGateway};
use crate::model::{Entity, ListPage, ListParams, NewProfile, Patchable, Profile, ProfileId, ProfilePatch};

/// Entities the in-memory store knows how to create and patch.
pub trait MemoryEntity: Patchable {
	type Create: Clone + Send + Sync + 'static;

	/// Prefix of generated ids.
	const ID_PREFIX: &'static str;

	fn from_create(id: String, input: Self::Create) -> Self;

	fn matches_search(&self, _query: &str) -> bool {
		true
	}

	fn validate(_input: &Self::Create) -> GatewayResult<()> {
		Ok(())
	}
}

impl MemoryEntity for Account {
	type Create = NewAccount;

	const ID_PREFIX: &'static str = "acc";

	fn from_create(id: String, input: NewAccount) -> Self {
		Self {
			id,
			profile_id: input.profile_id,
			name: input.name,
			currency: input.currency,
			balance: input.balance,
		}
	}

	fn matches_search(&self, query: &str) -> bool {
		self.name.to_lowercase().contains(&query.to_lowercase())
	}

	fn validate(input: &NewAccount) -> GatewayResult<()> {
		if input.name.trim().is_empty() {
			return Err(GatewayError::Validation("account name must not be empty".into()));
		}
		Ok(())
	}
}

impl MemoryEntity for Profile {
	type Create = NewProfile;

	const ID_PREFIX: &'static str = "prof";

	fn from_create(id: String, input: NewProfile) -> Self {
		Self {
			id,
			name: input.name,
			profile_type: input.profile_type,
			default_currency: input.default_currency,
			is_active: true,
		}
	}

	fn matches_search(&self, query: &str) -> bool {
		self.name.to_lowercase().contains(&query.to_lowercase())
	}

	fn validate(input: &NewProfile) -> GatewayResult<()> {
		if input.name.trim().is_empty() {
			return Err(GatewayError::Validation("profile name must not be empty".into()));
		}
		Ok(())
	}
}

/// Per-operation call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
	pub list: usize,
	pub get: usize,
	pub create: usize,
	pub update: usize,
	pub delete: usize,
	pub main_get: usize,
	pub main_set: usize,
}

#[derive(Default)]
struct Counters {
	list: AtomicUsize,
	get: AtomicUsize,
	create: AtomicUsize,
	update: AtomicUsize,
	delete: AtomicUsize,
	main_get: AtomicUsize,
	main_set: AtomicUsize,
}

impl Counters {
	fn bump(counter: &AtomicUsize) {
		counter.fetch_add(1, Ordering::SeqCst);
	}

	fn snapshot(&self) -> CallCounts {
		CallCounts {
			list: self.list.load(Ordering::SeqCst),
			get: self.get.load(Ordering::SeqCst),
			create: self.create.load(Ordering::SeqCst),
			update: self.update.load(Ordering::SeqCst),
			delete: self.delete.load(Ordering::SeqCst),
			main_get: self.main_get.load(Ordering::SeqCst),
			main_set: self.main_set.load(Ordering::SeqCst),
		}
	}
}

/// Open/closed gate awaited by gated operations.
struct Gate {
	closed: watch::Sender<bool>,
}

impl Gate {
	fn new() -> Self {
		Self {
			closed: watch::Sender::new(false),
		}
	}

	fn set_closed(&self, closed: bool) {
		self.closed.send_replace(closed);
	}

	async fn pass(&self) {
		let mut rx = self.closed.subscribe();
		// The sender lives as long as `self`, so this cannot observe a closed channel.
		let _ = rx.wait_for(|closed| !closed).await;
	}
}

/// In-memory [`EntityGateway`] over a vector of records.
pub struct MemoryEntities<E: MemoryEntity> {
	records: Mutex<Vec<E>>,
	next_id: AtomicU64,
	counts: Counters,
	failing_scopes: Mutex<HashSet<ProfileId>>,
	next_write_error: Mutex<Option<GatewayError>>,
	extra_totals: Mutex<Vec<(ProfileId, u64)>>,
	native_scope: bool,
	writes: Gate,
	lists: Gate,
}

impl<E: MemoryEntity> Default for MemoryEntities<E> {
	fn default() -> Self {
		Self::new()
	}
}

impl<E: MemoryEntity> MemoryEntities<E> {
	pub fn new() -> Self {
		Self {
			records: Mutex::new(Vec::new()),
			next_id: AtomicU64::new(1),
			counts: Counters::default(),
			failing_scopes: Mutex::new(HashSet::new()),
			next_write_error: Mutex::new(None),
			extra_totals: Mutex::new(Vec::new()),
			native_scope: true,
			writes: Gate::new(),
			lists: Gate::new(),
		}
	}

	pub fn with_records(records: impl IntoIterator<Item = E>) -> Self {
		let store = Self::new();
		store.records.lock().extend(records);
		store
	}

	/// Makes `list` ignore [`ListParams::profile_id`] and report it so.
	pub fn ignoring_scope(mut self) -> Self {
		self.native_scope = false;
		self
	}

	pub fn insert(&self, record: E) {
		self.records.lock().push(record);
	}

	pub fn records(&self) -> Vec<E> {
		self.records.lock().clone()
	}

	pub fn calls(&self) -> CallCounts {
		self.counts.snapshot()
	}

	/// Makes every `list` scoped to `profile_id` fail until cleared.
	pub fn fail_list_for(&self, profile_id: impl Into<ProfileId>) {
		self.failing_scopes.lock().insert(profile_id.into());
	}

	pub fn clear_failures(&self) {
		self.failing_scopes.lock().clear();
		*self.next_write_error.lock() = None;
	}

	/// Fails the next create, update or delete with `error`.
	pub fn fail_next_write(&self, error: GatewayError) {
		*self.next_write_error.lock() = Some(error);
	}

	/// Reports `extra` more records for `profile_id` than a page returns.
	pub fn set_extra_total(&self, profile_id: impl Into<ProfileId>, extra: u64) {
		let profile_id = profile_id.into();
		let mut totals = self.extra_totals.lock();
		totals.retain(|(id, _)| *id != profile_id);
		totals.push((profile_id, extra));
	}

	/// Holds writes until [`MemoryEntities::resume_writes`].
	pub fn pause_writes(&self) {
		self.writes.set_closed(true);
	}

	pub fn resume_writes(&self) {
		self.writes.set_closed(false);
	}

	/// Holds list calls until [`MemoryEntities::resume_lists`].
	pub fn pause_lists(&self) {
		self.lists.set_closed(true);
	}

	pub fn resume_lists(&self) {
		self.lists.set_closed(false);
	}

	fn take_write_error(&self) -> GatewayResult<()> {
		match self.next_write_error.lock().take() {
			Some(error) => Err(error),
			None => Ok(()),
		}
	}

	fn not_found(id: &str) -> GatewayError {
		GatewayError::NotFound {
			kind: E::KIND,
			id: id.to_string(),
		}
	}

	fn list_now(&self, params: &ListParams) -> GatewayResult<ListPage<E>> {
		let scope = params.profile_id.as_deref().filter(|_| self.native_scope);
		if let Some(scope) = scope {
			if self.failing_scopes.lock().contains(scope) {
				return Err(GatewayError::Transport(format!("list for profile `{scope}` failed")));
			}
		}

		let matching: Vec<E> = self
			.records
			.lock()
			.iter()
			.filter(|r| scope.is_none_or(|scope| r.profile_id() == Some(scope)))
			.filter(|r| params.search.as_deref().is_none_or(|q| r.matches_search(q)))
			.cloned()
			.collect();

		let extra = scope
			.and_then(|scope| self.extra_totals.lock().iter().find(|(id, _)| id == scope).map(|(_, extra)| *extra))
			.unwrap_or(0);
		let total = matching.len() as u64 + extra;
		let page = params.page.max(1) as usize;
		let size = params.page_size.max(1) as usize;
		let items = matching.into_iter().skip((page - 1) * size).take(size).collect();
		Ok(ListPage::new(items, total))
	}
}

#[async_trait]
impl<E: MemoryEntity> EntityGateway<E> for MemoryEntities<E> {
	type Create = E::Create;
	type Patch = E::Patch;

	async fn list(&self, params: &ListParams) -> GatewayResult<ListPage<E>> {
		Counters::bump(&self.counts.list);
		self.lists.pass().await;
		self.list_now(params)
	}

	async fn get(&self, id: &str) -> GatewayResult<E> {
		Counters::bump(&self.counts.get);
		self.records.lock().iter().find(|r| r.id() == id).cloned().ok_or_else(|| Self::not_found(id))
	}

	async fn create(&self, input: E::Create) -> GatewayResult<E> {
		Counters::bump(&self.counts.create);
		self.writes.pass().await;
		self.take_write_error()?;
		E::validate(&input)?;
		let id = format!("{}-{}", E::ID_PREFIX, self.next_id.fetch_add(1, Ordering::SeqCst));
		let record = E::from_create(id, input);
		self.records.lock().push(record.clone());
		Ok(record)
	}

	async fn update(&self, id: &str, patch: E::Patch) -> GatewayResult<E> {
		Counters::bump(&self.counts.update);
		self.writes.pass().await;
		self.take_write_error()?;
		let mut records = self.records.lock();
		let record = records.iter_mut().find(|r| r.id() == id).ok_or_else(|| Self::not_found(id))?;
		record.apply_patch(&patch);
		Ok(record.clone())
	}

	async fn delete(&self, id: &str) -> GatewayResult<()> {
		Counters::bump(&self.counts.delete);
		self.writes.pass().await;
		self.take_write_error()?;
		let mut records = self.records.lock();
		let before = records.len();
		records.retain(|r| r.id() != id);
		if records.len() == before {
			return Err(Self::not_found(id));
		}
		Ok(())
	}

	fn native_scope(&self) -> bool {
		self.native_scope
	}
}

/// In-memory [`ProfileGateway`].
pub struct MemoryProfiles {
	profiles: MemoryEntities<Profile>,
	main: Mutex<Option<ProfileId>>,
	fail_set_main: Mutex<Option<GatewayError>>,
	main_writes: Gate,
}

impl Default for MemoryProfiles {
	fn default() -> Self {
		Self::new(Vec::new(), None)
	}
}

impl MemoryProfiles {
	pub fn new(profiles: Vec<Profile>, main: Option<&str>) -> Self {
		Self {
			profiles: MemoryEntities::with_records(profiles),
			main: Mutex::new(main.map(str::to_owned)),
			fail_set_main: Mutex::new(None),
			main_writes: Gate::new(),
		}
	}

	/// Underlying profile store, for failure injection and inspection.
	pub fn store(&self) -> &MemoryEntities<Profile> {
		&self.profiles
	}

	pub fn calls(&self) -> CallCounts {
		self.profiles.calls()
	}

	pub fn stored_main(&self) -> Option<ProfileId> {
		self.main.lock().clone()
	}

	/// Fails every `set_main_profile` with `error` until cleared with `None`.
	pub fn fail_set_main(&self, error: Option<GatewayError>) {
		*self.fail_set_main.lock() = error;
	}

	/// Holds `set_main_profile` calls until [`MemoryProfiles::resume_main_writes`].
	pub fn pause_main_writes(&self) {
		self.main_writes.set_closed(true);
	}

	pub fn resume_main_writes(&self) {
		self.main_writes.set_closed(false);
	}
}

#[async_trait]
impl EntityGateway<Profile> for MemoryProfiles {
	type Create = NewProfile;
	type Patch = ProfilePatch;

	async fn list(&self, params: &ListParams) -> GatewayResult<ListPage<Profile>> {
		self.profiles.list(params).await
	}

	async fn get(&self, id: &str) -> GatewayResult<Profile> {
		self.profiles.get(id).await
	}

	async fn create(&self, input: NewProfile) -> GatewayResult<Profile> {
		self.profiles.create(input).await
	}

	async fn update(&self, id: &str, patch: ProfilePatch) -> GatewayResult<Profile> {
		self.profiles.update(id, patch).await
	}

	async fn delete(&self, id: &str) -> GatewayResult<()> {
		self.profiles.delete(id).await?;
		let mut main = self.main.lock();
		if main.as_deref() == Some(id) {
			*main = None;
		}
		Ok(())
	}

	fn native_scope(&self) -> bool {
		false
	}
}

#[async_trait]
impl ProfileGateway for MemoryProfiles {
	async fn main_profile(&self) -> GatewayResult<Option<ProfileId>> {
		Counters::bump(&self.profiles.counts.main_get);
		Ok(self.main.lock().clone())
	}

	async fn set_main_profile(&self, id: &str) -> GatewayResult<()> {
		Counters::bump(&self.profiles.counts.main_set);
		self.main_writes.pass().await;
		if let Some(error) = self.fail_set_main.lock().clone() {
			return Err(error);
		}
		if !self.profiles.records.lock().iter().any(|p| p.id == id) {
			return Err(GatewayError::NotFound {
				kind: Profile::KIND,
				id: id.to_string(),
			});
		}
		*self.main.lock() = Some(id.to_string());
		Ok(())
	}
}
