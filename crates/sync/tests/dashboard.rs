//! End-to-end flows over the in-memory gateways: bootstrap a scope, fan a
//! list out over the selected profiles and mutate through the shared cache.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use purse_query::QueryClient;
use purse_sync::entities::{Account, NewAccount};
use purse_sync::memory::{MemoryEntities, MemoryProfiles};
use purse_sync::model::ProfileType;
use purse_sync::mutation::{create_mutation, optimistic};
use purse_sync::{FanOutConfig, ListPage, ListParams, MutationDescriptor, Profile, ScopeConfig, ScopeController, ScopePhase, ScopedQuery};

fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn profile(id: &str) -> Profile {
	Profile {
		id: id.to_string(),
		name: id.to_uppercase(),
		profile_type: ProfileType::Personal,
		default_currency: "EUR".to_string(),
		is_active: true,
	}
}

fn account(id: &str, profile: &str) -> Account {
	Account {
		id: id.to_string(),
		profile_id: profile.to_string(),
		name: format!("Account {id}"),
		currency: "EUR".to_string(),
		balance: 1_000,
	}
}

struct Dashboard {
	scope: ScopeController<MemoryProfiles>,
	accounts: Arc<MemoryEntities<Account>>,
	list: ScopedQuery<ListParams, ListPage<Account>, Account>,
}

async fn dashboard(profiles: &[&str], accounts: Vec<Account>) -> Dashboard {
	init_tracing();
	let client = QueryClient::default();
	let gateway = Arc::new(MemoryProfiles::new(profiles.iter().map(|id| profile(id)).collect(), profiles.first().copied()));
	let scope = ScopeController::new(gateway, client.clone(), ScopeConfig::default());
	scope.bootstrap().await.unwrap();
	scope.set_active_profiles(profiles.iter().copied());

	let accounts = Arc::new(MemoryEntities::with_records(accounts));
	let list = ScopedQuery::new(client, FanOutConfig::for_gateway(Arc::clone(&accounts)), ListParams::default());
	Dashboard { scope, accounts, list }
}

fn item_ids(items: &[Account]) -> Vec<&str> {
	items.iter().map(|a| a.id.as_str()).collect()
}

#[tokio::test]
async fn merged_totals_follow_reported_counts() {
	let d = dashboard(&["p1", "p2"], vec![account("x", "p1"), account("y", "p1"), account("z", "p2")]).await;
	d.accounts.set_extra_total("p1", 3);

	let result = d.list.load(&d.scope.active_profile_list()).await;
	assert_eq!(d.scope.phase(), ScopePhase::Ready);
	assert_eq!(item_ids(&result.items), vec!["x", "y", "z"]);
	assert_eq!(result.total, 6);
	assert!(result.error.is_none());
}

#[tokio::test]
async fn one_failing_profile_keeps_the_others() {
	let d = dashboard(&["p1", "p2", "p3"], vec![account("a", "p1"), account("b", "p2"), account("c", "p3")]).await;
	d.accounts.fail_list_for("p2");

	let result = d.list.load(&d.scope.active_profile_list()).await;
	assert_eq!(item_ids(&result.items), vec!["a", "c"]);
	assert_eq!(result.total, 2);
	assert_eq!(result.error.map(|e| e.profile_id), Some("p2".to_string()));
}

#[tokio::test]
async fn deselected_profile_in_flight_is_never_merged() {
	let d = dashboard(&["p1", "p2"], vec![account("a", "p1"), account("b", "p2")]).await;

	d.accounts.pause_lists();
	let selection = d.scope.active_profile_list();
	let pending = d.list.load(&selection);
	let narrow = async {
		tokio::task::yield_now().await;
		d.scope.toggle_profile_selection("p2");
		d.accounts.resume_lists();
	};
	tokio::join!(pending, narrow);

	let narrowed = d.scope.active_profile_list();
	assert_eq!(narrowed, vec!["p1".to_string()]);
	let result = d.list.result(&narrowed);
	assert_eq!(item_ids(&result.items), vec!["a"]);

	let p2_key = d.list.descriptors(&["p2".to_string()])[0].cache_key.clone();
	assert!(d.scope.client().get_data::<ListPage<Account>>(&p2_key).is_none());
}

#[tokio::test]
async fn optimistic_create_shows_in_merged_list_until_refetch() {
	let d = dashboard(&["p1", "p2"], vec![account("a", "p1"), account("b", "p2")]).await;
	let selection = d.scope.active_profile_list();
	d.list.load(&selection).await;

	let descriptor = MutationDescriptor::<NewAccount, Account>::create_defaults().with_optimistic_insert(|input: &NewAccount, temp_id| Account {
		id: temp_id,
		profile_id: input.profile_id.clone(),
		name: input.name.clone(),
		currency: input.currency.clone(),
		balance: input.balance,
	});
	let create = create_mutation(d.scope.client().clone(), Arc::clone(&d.accounts), descriptor);

	d.accounts.pause_writes();
	let pending = create.mutate_async(NewAccount {
		profile_id: "p2".to_string(),
		name: "Travel fund".to_string(),
		currency: "EUR".to_string(),
		balance: 0,
	});
	let check = async {
		let during = d.list.result(&selection);
		assert_eq!(during.items.len(), 3);
		assert_eq!(during.total, 3);
		assert!(optimistic::is_temp_id(&during.items[2].id));
		assert_eq!(during.items[2].name, "Travel fund");
		d.accounts.resume_writes();
	};
	let (created, ()) = tokio::join!(pending, check);
	let created = created.unwrap();

	let after = d.list.result(&selection);
	assert_eq!(item_ids(&after.items), vec!["a", "b", created.id.as_str()]);
	assert!(after.items.iter().all(|a| !optimistic::is_temp_id(&a.id)));
	assert_eq!(after.total, 3);
}

#[tokio::test]
async fn sign_out_drops_every_cached_list() {
	let d = dashboard(&["p1"], vec![account("a", "p1")]).await;
	let selection = d.scope.active_profile_list();
	d.list.load(&selection).await;
	assert!(!d.list.result(&selection).is_empty());

	d.list.release();
	d.scope.sign_out();
	assert_eq!(d.scope.phase(), ScopePhase::Uninitialized);
	assert!(d.list.result(&selection).is_empty());
	assert!(d.scope.active_profile_list().is_empty());
}
