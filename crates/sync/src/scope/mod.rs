//! Profile scope controller.
//!
//! Owns the selected profile set and the main profile, drives the bootstrap
//! state machine in [`resolve`] and keeps the query cache consistent with
//! the selection: deselected scopes are evicted, and the full profile set and
//! main preference live in the cache under [`keys::profile_set`] and
//! [`keys::main_profile`].
//!
//! Backend reconciliation of a locally chosen main profile runs detached and
//! never blocks or fails a transition; [`ScopeController::settle`] waits for
//! it.
//!
//! Every async operation remembers the session it started in. Results that
//! arrive after a sign-out are dropped with [`ScopeError::SignedOut`] and
//! never touch the snapshot or the cache.

mod resolve;

use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::Mutex;
use purse_query::{Fetcher, QueryClient};
use purse_worker::{GenerationClock, GenerationToken, TaskClass};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use self::resolve::{Resolution, ScopeEffect, ScopeInputs, ScopePhase, ScopeState, resolve, settled_phase};
use crate::config::ScopeConfig;
use crate::error::ScopeError;
use crate::gateway::ProfileGateway;
use crate::keys;
use crate::model::{EntityKind, ListParams, NewProfile, Profile, ProfileId};

/// Page size used to load the full profile set.
const PROFILE_PAGE_SIZE: u32 = 500;

/// Published view of the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSnapshot {
	pub phase: ScopePhase,
	pub state: ScopeState,
	/// Full profile set, active and inactive.
	pub profiles: Vec<Profile>,
}

impl ScopeSnapshot {
	pub fn profile(&self, id: &str) -> Option<&Profile> {
		self.profiles.iter().find(|p| p.id == id)
	}

	pub fn is_ready(&self) -> bool {
		self.phase == ScopePhase::Ready
	}
}

struct Session {
	token: GenerationToken,
	detached: Vec<JoinHandle<()>>,
}

/// Owner of profile selection for one signed-in session.
pub struct ScopeController<G: ProfileGateway> {
	gateway: Arc<G>,
	client: QueryClient,
	config: ScopeConfig,
	snapshot: Mutex<ScopeSnapshot>,
	published: watch::Sender<ScopeSnapshot>,
	sessions: GenerationClock,
	session: Mutex<Session>,
}

impl<G: ProfileGateway> std::fmt::Debug for ScopeController<G> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ScopeController").field("snapshot", &*self.snapshot.lock()).finish_non_exhaustive()
	}
}

impl<G: ProfileGateway> ScopeController<G> {
	pub fn new(gateway: Arc<G>, client: QueryClient, config: ScopeConfig) -> Self {
		let sessions = GenerationClock::new();
		let token = GenerationToken::root(sessions.next());
		Self {
			gateway,
			client,
			config,
			snapshot: Mutex::new(ScopeSnapshot::default()),
			published: watch::Sender::new(ScopeSnapshot::default()),
			sessions,
			session: Mutex::new(Session {
				token,
				detached: Vec::new(),
			}),
		}
	}

	pub fn client(&self) -> &QueryClient {
		&self.client
	}

	pub fn gateway(&self) -> &Arc<G> {
		&self.gateway
	}

	pub fn snapshot(&self) -> ScopeSnapshot {
		self.snapshot.lock().clone()
	}

	/// Receives a new snapshot after every transition.
	pub fn subscribe(&self) -> watch::Receiver<ScopeSnapshot> {
		self.published.subscribe()
	}

	pub fn phase(&self) -> ScopePhase {
		self.snapshot.lock().phase
	}

	pub fn state(&self) -> ScopeState {
		self.snapshot.lock().state.clone()
	}

	pub fn profiles(&self) -> Vec<Profile> {
		self.snapshot.lock().profiles.clone()
	}

	pub fn active_profile_ids(&self) -> IndexSet<ProfileId> {
		self.snapshot.lock().state.active_profile_ids.clone()
	}

	/// Selected ids as a vector, in selection order.
	pub fn active_profile_list(&self) -> Vec<ProfileId> {
		self.snapshot.lock().state.active_profile_ids.iter().cloned().collect()
	}

	pub fn main_profile_id(&self) -> Option<ProfileId> {
		self.snapshot.lock().state.main_profile_id.clone()
	}

	/// Main profile, or [`ScopeError::NoMainProfile`] when none resolved yet.
	pub fn require_main_profile(&self) -> Result<ProfileId, ScopeError> {
		self.main_profile_id().ok_or(ScopeError::NoMainProfile)
	}

	pub fn requires_creation(&self) -> bool {
		self.snapshot.lock().state.requires_creation
	}

	pub fn is_initialized(&self) -> bool {
		self.snapshot.lock().state.initialized
	}

	/// Loads profiles and the main preference, then resolves the scope.
	///
	/// Leaves the controller in [`ScopePhase::Loading`] when loading fails
	/// before the first successful bootstrap.
	pub async fn bootstrap(&self) -> Result<ScopeSnapshot, ScopeError> {
		let generation = self.session_generation();
		self.mark_loading();
		let (profiles, main) = tokio::join!(self.load_profiles(), self.load_main());
		let profiles = profiles?;
		let main = main?;
		self.apply_loaded(generation, &profiles, main.as_deref())
	}

	/// Reloads profiles and the main preference.
	///
	/// Once initialized, a reload never passes through the loading phase, so
	/// the creation gate cannot flash while it runs.
	pub async fn refresh(&self) -> Result<ScopeSnapshot, ScopeError> {
		self.bootstrap().await
	}

	fn mark_loading(&self) {
		let snapshot = {
			let mut current = self.snapshot.lock();
			let res = resolve(
				&current.state,
				ScopeInputs {
					is_loading: true,
					profiles: &current.profiles,
					main_profile: None,
				},
			);
			if res.phase == current.phase {
				return;
			}
			debug!(from = ?current.phase, to = ?res.phase, "scope.phase");
			current.phase = res.phase;
			current.clone()
		};
		self.publish(snapshot);
	}

	async fn load_profiles(&self) -> Result<Vec<Profile>, ScopeError> {
		let gateway = Arc::clone(&self.gateway);
		let fetcher = Fetcher::new(move || {
			let gateway = Arc::clone(&gateway);
			async move {
				let page = gateway.list(&ListParams::default().with_page_size(PROFILE_PAGE_SIZE)).await?;
				Ok::<_, crate::error::GatewayError>(page.items)
			}
		});
		let profiles = self.client.fetch::<Vec<Profile>>(keys::profile_set(), fetcher).await?;
		Ok(profiles.as_ref().clone())
	}

	async fn load_main(&self) -> Result<Option<ProfileId>, ScopeError> {
		let gateway = Arc::clone(&self.gateway);
		let fetcher = Fetcher::new(move || {
			let gateway = Arc::clone(&gateway);
			async move { gateway.main_profile().await }
		});
		let main = self.client.fetch::<Option<ProfileId>>(keys::main_profile(), fetcher).await?;
		Ok(main.as_ref().clone())
	}

	/// Resolves against freshly loaded inputs and runs the resulting effects.
	fn apply_loaded(&self, generation: u64, profiles: &[Profile], main: Option<&str>) -> Result<ScopeSnapshot, ScopeError> {
		let (snapshot, effects) = {
			let mut current = self.snapshot.lock();
			self.in_session(generation, |_| ())?;
			let res = resolve(
				&current.state,
				ScopeInputs {
					is_loading: false,
					profiles,
					main_profile: main,
				},
			);
			if let Some(via) = res.via {
				debug!(from = ?current.phase, via = ?via, to = ?res.phase, "scope.phase");
			} else if res.phase != current.phase {
				debug!(from = ?current.phase, to = ?res.phase, "scope.phase");
			}
			let dropped = removed_ids(&current.state.active_profile_ids, &res.state.active_profile_ids);
			current.phase = res.phase;
			current.state = res.state;
			current.profiles = profiles.to_vec();
			self.evict(&dropped);
			self.publish(current.clone());
			(current.clone(), res.effects)
		};

		for effect in effects {
			self.run_effect(generation, effect)?;
		}
		Ok(snapshot)
	}

	fn run_effect(&self, generation: u64, effect: ScopeEffect) -> Result<(), ScopeError> {
		match effect {
			ScopeEffect::PersistMain(id) => self.in_session(generation, |session| {
				info!(profile_id = %id, "scope.main.picked");
				self.client.set_data(keys::main_profile(), Some(id.clone()));
				if self.config.persist_main_on_bootstrap {
					self.persist_main(session, id);
				}
			}),
		}
	}

	fn session_generation(&self) -> u64 {
		self.session.lock().token.generation()
	}

	/// Runs `f` under the session lock if the session that issued
	/// `generation` is still current.
	///
	/// Sign-out swaps the session and clears the cache under the same lock,
	/// so cache writes made by `f` cannot outlive the session.
	fn in_session<T>(&self, generation: u64, f: impl FnOnce(&mut Session) -> T) -> Result<T, ScopeError> {
		let mut session = self.session.lock();
		let current = session.token.generation();
		if current != generation {
			debug!(generation, current, "scope.session.stale");
			return Err(ScopeError::SignedOut);
		}
		Ok(f(&mut session))
	}

	/// Reconciles the backend main preference without blocking the caller.
	fn persist_main(&self, session: &mut Session, id: ProfileId) {
		let gateway = Arc::clone(&self.gateway);
		let token = session.token.child();
		let handle = purse_worker::spawn_detached(TaskClass::Background, "scope.persist_main", token, async move {
			gateway.set_main_profile(&id).await?;
			debug!(profile_id = %id, "scope.main.persisted");
			Ok::<_, crate::error::GatewayError>(())
		});
		session.detached.retain(|h| !h.is_finished());
		session.detached.push(handle);
	}

	/// Waits for every detached reconciliation started so far.
	pub async fn settle(&self) {
		let handles = std::mem::take(&mut self.session.lock().detached);
		for handle in handles {
			let _ = handle.await;
		}
	}

	/// Makes `id` the main profile, locally and in the backend.
	///
	/// Seeds the selection with `id` when nothing is selected.
	pub async fn set_main_profile(&self, id: &str) -> Result<(), ScopeError> {
		if self.snapshot.lock().profile(id).is_none() {
			return Err(ScopeError::NotFound(id.to_string()));
		}
		let generation = self.session_generation();
		self.gateway.set_main_profile(id).await?;

		{
			let mut current = self.snapshot.lock();
			self.in_session(generation, |_| self.client.set_data(keys::main_profile(), Some(id.to_string())))?;
			current.state.main_profile_id = Some(id.to_string());
			if current.state.active_profile_ids.is_empty() {
				current.state.active_profile_ids.insert(id.to_string());
			}
			self.publish(current.clone());
		}
		info!(profile_id = id, "scope.main.set");
		Ok(())
	}

	/// Replaces the selection.
	///
	/// Ids outside the full profile set are dropped silently, duplicates
	/// collapse. Scopes leaving the selection are evicted from the cache.
	/// Returns the applied selection.
	pub fn set_active_profiles<I, S>(&self, ids: I) -> IndexSet<ProfileId>
	where
		I: IntoIterator<Item = S>,
		S: Into<ProfileId>,
	{
		let (snapshot, dropped) = {
			let mut current = self.snapshot.lock();
			let next: IndexSet<ProfileId> = ids.into_iter().map(Into::into).filter(|id| current.profile(id).is_some()).collect();
			let dropped = removed_ids(&current.state.active_profile_ids, &next);
			current.state.active_profile_ids = next;
			(current.clone(), dropped)
		};
		debug!(selected = snapshot.state.active_profile_ids.len(), evicted = dropped.len(), "scope.selection");
		self.evict(&dropped);
		let applied = snapshot.state.active_profile_ids.clone();
		self.publish(snapshot);
		applied
	}

	/// Adds or removes `id` from the selection.
	///
	/// The last selected profile cannot be deselected.
	pub fn toggle_profile_selection(&self, id: &str) -> IndexSet<ProfileId> {
		let mut next = self.active_profile_ids();
		if next.contains(id) {
			if next.len() == 1 {
				debug!(profile_id = id, "scope.selection.keep_last");
				return next;
			}
			next.shift_remove(id);
		} else {
			next.insert(id.to_string());
		}
		self.set_active_profiles(next)
	}

	/// Creates the first profile and leaves the creation gate in one step.
	///
	/// On failure the gate stays open and the state is untouched.
	pub async fn create_first_profile(&self, input: NewProfile) -> Result<Profile, ScopeError> {
		if !self.requires_creation() {
			return Err(ScopeError::CreationNotRequired);
		}
		let generation = self.session_generation();
		let profile = self.gateway.create(input).await?;
		let id = profile.id.clone();

		{
			let mut current = self.snapshot.lock();
			self.in_session(generation, |session| {
				current.profiles.retain(|p| p.id != id);
				current.profiles.push(profile.clone());
				current.state = ScopeState {
					active_profile_ids: IndexSet::from([id.clone()]),
					main_profile_id: Some(id.clone()),
					initialized: true,
					requires_creation: false,
				};
				self.client.set_data(keys::profile_set(), current.profiles.clone());
				self.client.set_data(keys::main_profile(), Some(id.clone()));
				self.persist_main(session, id.clone());
			})?;
			debug!(from = ?current.phase, to = ?ScopePhase::Ready, "scope.phase");
			current.phase = ScopePhase::Ready;
			self.publish(current.clone());
		}
		info!(profile_id = %id, "scope.profile.created_first");
		Ok(profile)
	}

	/// Deletes a profile and re-resolves the scope without it.
	///
	/// Deleting the main profile picks a new one; deleting the last active
	/// profile reopens the creation gate.
	pub async fn delete_profile(&self, id: &str) -> Result<ScopeSnapshot, ScopeError> {
		{
			let current = self.snapshot.lock();
			if !current.state.initialized {
				return Err(ScopeError::NotInitialized);
			}
			if current.profile(id).is_none() {
				return Err(ScopeError::NotFound(id.to_string()));
			}
		}
		let generation = self.session_generation();
		self.gateway.delete(id).await?;

		let (profiles, main) = {
			let mut current = self.snapshot.lock();
			self.in_session(generation, |_| {
				current.profiles.retain(|p| p.id != id);
				if current.state.main_profile_id.as_deref() == Some(id) {
					current.state.main_profile_id = None;
				}
				self.client.remove_scope(id);
				self.client.remove(&keys::detail_filter(EntityKind::Profiles, id));
				self.client.set_data(keys::profile_set(), current.profiles.clone());
				self.client.set_data(keys::main_profile(), current.state.main_profile_id.clone());
				(current.profiles.clone(), current.state.main_profile_id.clone())
			})?
		};
		info!(profile_id = id, "scope.profile.deleted");

		self.apply_loaded(generation, &profiles, main.as_deref())
	}

	/// Ends the session: cancels detached work, clears the cache and resets
	/// to [`ScopePhase::Uninitialized`].
	pub fn sign_out(&self) {
		let cleared = {
			let mut session = self.session.lock();
			session.token.cancel();
			for handle in session.detached.drain(..) {
				handle.abort();
			}
			session.token = GenerationToken::root(self.sessions.next());
			self.client.clear()
		};
		{
			let mut current = self.snapshot.lock();
			*current = ScopeSnapshot::default();
			self.publish(current.clone());
		}
		info!(cleared, "scope.sign_out");
	}

	fn evict(&self, dropped: &[ProfileId]) {
		for id in dropped {
			let removed = self.client.remove_scope(id);
			if removed > 0 {
				debug!(profile_id = %id, removed, "scope.evict");
			}
		}
	}

	fn publish(&self, snapshot: ScopeSnapshot) {
		self.published.send_replace(snapshot);
	}
}

fn removed_ids(before: &IndexSet<ProfileId>, after: &IndexSet<ProfileId>) -> Vec<ProfileId> {
	before.iter().filter(|id| !after.contains(*id)).cloned().collect()
}

impl<G: ProfileGateway> Drop for ScopeController<G> {
	fn drop(&mut self) {
		let session = self.session.get_mut();
		session.token.cancel();
		let pending = session.detached.iter().filter(|h| !h.is_finished()).count();
		if pending > 0 {
			warn!(pending, "scope.drop.detached_cancelled");
		}
	}
}
