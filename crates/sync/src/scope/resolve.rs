//! Pure bootstrap state machine.
//!
//! ```text
//! Uninitialized ──► Loading ──┬──► NoProfiles ◄──────────┐
//!                             ├──► HasProfilesNoMain ──┐ │ (active set empties
//!                             └──► Ready ◄─────────────┘ │  after init)
//!                                    └───────────────────┘
//! ```
//!
//! [`resolve`] is a function of the current state and the loaded inputs
//! only. Feeding its output back in with the same inputs yields the same
//! state and no effects, so repeated evaluation never repeats side effects.

use indexmap::IndexSet;

use crate::model::{Profile, ProfileId};

/// Controller phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScopePhase {
	#[default]
	Uninitialized,
	Loading,
	/// No active profile exists; the creation gate must be shown.
	NoProfiles,
	/// Profiles exist but the backend has no main profile. Transient.
	HasProfilesNoMain,
	Ready,
}

/// Scope selection owned by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeState {
	/// Profiles selected for aggregation, in selection order.
	pub active_profile_ids: IndexSet<ProfileId>,
	/// Always an element of the full profile set when set.
	pub main_profile_id: Option<ProfileId>,
	pub initialized: bool,
	/// True iff the full profile set holds no active profile.
	pub requires_creation: bool,
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeEffect {
	/// Reconcile the locally chosen main profile with the backend.
	PersistMain(ProfileId),
}

/// Inputs of one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct ScopeInputs<'a> {
	pub is_loading: bool,
	pub profiles: &'a [Profile],
	/// Main profile reported by the backend.
	pub main_profile: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
	pub phase: ScopePhase,
	pub state: ScopeState,
	pub effects: Vec<ScopeEffect>,
	/// Intermediate phase passed through, if any.
	pub via: Option<ScopePhase>,
}

/// Phase implied by a settled state.
pub fn settled_phase(state: &ScopeState) -> ScopePhase {
	match (state.initialized, state.requires_creation) {
		(false, _) => ScopePhase::Uninitialized,
		(true, true) => ScopePhase::NoProfiles,
		(true, false) => ScopePhase::Ready,
	}
}

/// Evaluates the state machine.
pub fn resolve(current: &ScopeState, inputs: ScopeInputs<'_>) -> Resolution {
	if inputs.is_loading {
		let phase = if current.initialized { settled_phase(current) } else { ScopePhase::Loading };
		return Resolution {
			phase,
			state: current.clone(),
			effects: Vec::new(),
			via: None,
		};
	}

	let known = |id: &str| inputs.profiles.iter().any(|p| p.id == id);
	let selection: IndexSet<ProfileId> = current.active_profile_ids.iter().filter(|id| known(id)).cloned().collect();
	let first_active = inputs.profiles.iter().find(|p| p.is_active);

	let main = inputs
		.main_profile
		.filter(|id| known(id))
		.or_else(|| current.main_profile_id.as_deref().filter(|id| known(id)))
		.map(str::to_owned);

	let Some(first_active) = first_active else {
		return Resolution {
			phase: ScopePhase::NoProfiles,
			state: ScopeState {
				active_profile_ids: selection,
				main_profile_id: main,
				initialized: true,
				requires_creation: true,
			},
			effects: Vec::new(),
			via: None,
		};
	};

	let (main, effects, via) = match main {
		Some(main) => (main, Vec::new(), None),
		None => {
			let picked = first_active.id.clone();
			(picked.clone(), vec![ScopeEffect::PersistMain(picked)], Some(ScopePhase::HasProfilesNoMain))
		}
	};

	let active_profile_ids = if selection.is_empty() { IndexSet::from([main.clone()]) } else { selection };

	Resolution {
		phase: ScopePhase::Ready,
		state: ScopeState {
			active_profile_ids,
			main_profile_id: Some(main),
			initialized: true,
			requires_creation: false,
		},
		effects,
		via,
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use proptest::prelude::*;

	use super::*;
	use crate::model::ProfileType;

	fn profile(id: &str, active: bool) -> Profile {
		Profile {
			id: id.to_string(),
			name: id.to_uppercase(),
			profile_type: ProfileType::Personal,
			default_currency: "EUR".to_string(),
			is_active: active,
		}
	}

	fn loaded<'a>(profiles: &'a [Profile], main: Option<&'a str>) -> ScopeInputs<'a> {
		ScopeInputs {
			is_loading: false,
			profiles,
			main_profile: main,
		}
	}

	#[test]
	fn loading_before_init_stays_loading() {
		let res = resolve(
			&ScopeState::default(),
			ScopeInputs {
				is_loading: true,
				profiles: &[],
				main_profile: None,
			},
		);
		assert_eq!(res.phase, ScopePhase::Loading);
		assert!(!res.state.requires_creation);
		assert!(res.effects.is_empty());
	}

	#[test]
	fn refetch_after_init_does_not_flash_gate() {
		let profiles = [profile("a", true)];
		let ready = resolve(&ScopeState::default(), loaded(&profiles, Some("a"))).state;
		let res = resolve(
			&ready,
			ScopeInputs {
				is_loading: true,
				profiles: &[],
				main_profile: None,
			},
		);
		assert_eq!(res.phase, ScopePhase::Ready);
		assert_eq!(res.state, ready);
	}

	#[test]
	fn only_inactive_profiles_require_creation() {
		let profiles = [profile("a", false)];
		let res = resolve(&ScopeState::default(), loaded(&profiles, None));
		assert_eq!(res.phase, ScopePhase::NoProfiles);
		assert!(res.state.requires_creation);
		assert!(res.state.initialized);
		assert!(res.effects.is_empty());
	}

	#[test]
	fn missing_main_picks_first_active_once() {
		let profiles = [profile("b", false), profile("a", true), profile("c", true)];
		let first = resolve(&ScopeState::default(), loaded(&profiles, None));
		assert_eq!(first.phase, ScopePhase::Ready);
		assert_eq!(first.via, Some(ScopePhase::HasProfilesNoMain));
		assert_eq!(first.state.main_profile_id.as_deref(), Some("a"));
		assert_eq!(first.state.active_profile_ids, IndexSet::from(["a".to_string()]));
		assert_eq!(first.effects, vec![ScopeEffect::PersistMain("a".into())]);

		let again = resolve(&first.state, loaded(&profiles, None));
		assert_eq!(again.state, first.state);
		assert!(again.effects.is_empty());
	}

	#[test]
	fn backend_main_seeds_selection_unless_populated() {
		let profiles = [profile("a", true), profile("b", true)];
		let fresh = resolve(&ScopeState::default(), loaded(&profiles, Some("b")));
		assert_eq!(fresh.state.active_profile_ids, IndexSet::from(["b".to_string()]));

		let populated = ScopeState {
			active_profile_ids: IndexSet::from(["a".to_string(), "ghost".to_string()]),
			..ScopeState::default()
		};
		let res = resolve(&populated, loaded(&profiles, Some("b")));
		assert_eq!(res.state.active_profile_ids, IndexSet::from(["a".to_string()]));
		assert_eq!(res.state.main_profile_id.as_deref(), Some("b"));
	}

	#[test]
	fn unknown_backend_main_is_ignored() {
		let profiles = [profile("a", true)];
		let res = resolve(&ScopeState::default(), loaded(&profiles, Some("deleted")));
		assert_eq!(res.state.main_profile_id.as_deref(), Some("a"));
		assert_eq!(res.effects.len(), 1);
	}

	fn arb_profiles() -> impl Strategy<Value = Vec<Profile>> {
		prop::collection::vec(("[a-e]", any::<bool>()), 0..6).prop_map(|raw| {
			let mut seen = std::collections::HashSet::new();
			raw.into_iter().filter(|(id, _)| seen.insert(id.clone())).map(|(id, active)| profile(&id, active)).collect()
		})
	}

	proptest! {
		#[test]
		fn requires_creation_iff_no_active_profile(
			profiles in arb_profiles(),
			main in proptest::option::of("[a-f]"),
			selected in prop::collection::vec("[a-f]", 0..4),
		) {
			let current = ScopeState {
				active_profile_ids: selected.into_iter().collect(),
				..ScopeState::default()
			};
			let res = resolve(&current, loaded(&profiles, main.as_deref()));
			let any_active = profiles.iter().any(|p| p.is_active);
			prop_assert_eq!(res.state.requires_creation, !any_active);
			if let Some(main) = &res.state.main_profile_id {
				prop_assert!(profiles.iter().any(|p| &p.id == main));
			}
			for id in &res.state.active_profile_ids {
				prop_assert!(profiles.iter().any(|p| &p.id == id));
			}

			let again = resolve(&res.state, loaded(&profiles, main.as_deref()));
			prop_assert_eq!(again.state, res.state);
			prop_assert!(again.effects.is_empty());
		}
	}
}
