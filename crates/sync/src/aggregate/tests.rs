use pretty_assertions::assert_eq;

use super::*;
use crate::entities::Account;
use crate::error::GatewayError;
use crate::memory::MemoryEntities;

fn account(id: &str, profile: &str) -> Account {
	Account {
		id: id.to_string(),
		profile_id: profile.to_string(),
		name: format!("Account {id}"),
		currency: "EUR".to_string(),
		balance: 100,
	}
}

fn ids(items: &[&str]) -> Vec<ProfileId> {
	items.iter().map(|s| s.to_string()).collect()
}

fn setup(store: MemoryEntities<Account>) -> (Arc<MemoryEntities<Account>>, ScopedQuery<ListParams, ListPage<Account>, Account>) {
	let store = Arc::new(store);
	let query = ScopedQuery::new(QueryClient::default(), FanOutConfig::for_gateway(Arc::clone(&store)), ListParams::default());
	(store, query)
}

#[tokio::test]
async fn empty_selection_issues_no_requests() {
	let (store, query) = setup(MemoryEntities::with_records([account("x", "p1")]));
	let result = query.load(&[]).await;
	assert_eq!(result, AggregatedResult::default());
	assert!(!result.is_loading);
	assert_eq!(store.calls().list, 0);
}

#[tokio::test]
async fn totals_sum_reported_counts() {
	let (store, query) = setup(MemoryEntities::with_records([account("x", "p1"), account("y", "p1"), account("z", "p2")]));
	store.set_extra_total("p1", 3);

	let result = query.load(&ids(&["p1", "p2"])).await;
	let item_ids: Vec<&str> = result.items.iter().map(|a| a.id.as_str()).collect();
	assert_eq!(item_ids, vec!["x", "y", "z"]);
	assert_eq!(result.total, 6);
	assert!(result.error.is_none());
	assert!(!result.is_loading);
}

#[tokio::test]
async fn duplicate_ids_do_not_double_count() {
	let (store, query) = setup(MemoryEntities::with_records([account("x", "p1"), account("z", "p2")]));
	let deduped = query.load(&ids(&["p1", "p2"])).await;
	let duplicated = query.load(&ids(&["p1", "p2", "p1", "p2"])).await;
	assert_eq!(duplicated, deduped);
	assert_eq!(store.calls().list, 2);
}

#[tokio::test]
async fn failed_source_degrades_to_partial_result() {
	let (store, query) = setup(MemoryEntities::with_records([account("a", "p1"), account("b", "p2"), account("c", "p3")]));
	store.fail_list_for("p2");

	let result = query.load(&ids(&["p1", "p2", "p3"])).await;
	let item_ids: Vec<&str> = result.items.iter().map(|a| a.id.as_str()).collect();
	assert_eq!(item_ids, vec!["a", "c"]);
	assert_eq!(result.total, 2);
	let error = result.error.unwrap();
	assert_eq!(error.profile_id, "p2");
	assert_eq!(error.failed_sources, 1);
	assert!(matches!(error.gateway_error(), Some(GatewayError::Transport(_))));
}

#[tokio::test]
async fn first_failure_follows_selection_order() {
	let (store, query) = setup(MemoryEntities::new());
	store.fail_list_for("p1");
	store.fail_list_for("p3");

	let result = query.load(&ids(&["p3", "p2", "p1"])).await;
	let error = result.error.unwrap();
	assert_eq!(error.profile_id, "p3");
	assert_eq!(error.failed_sources, 2);
}

#[tokio::test]
async fn unscoped_endpoint_still_gets_one_entry_per_profile() {
	let (store, query) = setup(MemoryEntities::with_records([account("x", "p1")]).ignoring_scope());
	let descriptors = query.descriptors(&ids(&["p1", "p2"]));
	assert_eq!(descriptors[0].params, ListParams::default());
	assert_ne!(descriptors[0].cache_key, descriptors[1].cache_key);
	assert_eq!(descriptors[1].cache_key.scope(), Some("p2"));

	let result = query.load(&ids(&["p1", "p2"])).await;
	assert_eq!(result.items.len(), 2);
	assert_eq!(store.calls().list, 2);
}

#[tokio::test]
async fn removed_profile_is_not_merged() {
	let (_store, query) = setup(MemoryEntities::with_records([account("x", "p1"), account("z", "p2")]));
	query.load(&ids(&["p1", "p2"])).await;

	let narrowed = query.load(&ids(&["p1"])).await;
	assert_eq!(narrowed.items.len(), 1);
	let p2 = &query.descriptors(&ids(&["p2"]))[0].cache_key;
	assert_eq!(query.client.state(p2).unwrap().observers, 0);
}

#[tokio::test]
async fn cached_sources_are_not_refetched_by_load() {
	let (store, query) = setup(MemoryEntities::with_records([account("x", "p1")]));
	query.load(&ids(&["p1"])).await;
	query.load(&ids(&["p1"])).await;
	assert_eq!(store.calls().list, 1);

	query.refetch(&ids(&["p1"])).await;
	assert_eq!(store.calls().list, 2);
}

#[tokio::test]
async fn refetch_keeps_stale_items_visible() {
	let (store, query) = setup(MemoryEntities::with_records([account("x", "p1")]));
	let selection = ids(&["p1"]);
	query.load(&selection).await;

	store.insert(account("y", "p1"));
	store.pause_lists();
	let pending = query.refetch(&selection);
	let check = async {
		for _ in 0..10 {
			if query.result(&selection).is_fetching {
				break;
			}
			tokio::task::yield_now().await;
		}
		let during = query.result(&selection);
		assert_eq!(during.items.len(), 1);
		assert!(during.is_fetching);
		assert!(!during.is_loading);
		store.resume_lists();
	};
	let (after, ()) = tokio::join!(pending, check);
	assert_eq!(after.items.len(), 2);
	assert!(!after.is_fetching);
}

#[tokio::test]
async fn events_are_matched_to_current_sources() {
	let (_store, query) = setup(MemoryEntities::new());
	let selection = ids(&["p1"]);
	let key = query.descriptors(&selection)[0].cache_key.clone();
	assert!(query.affected_by(&CacheEvent::Updated(key.clone()), &selection));
	assert!(!query.affected_by(&CacheEvent::Updated(key), &ids(&["p2"])));
}

mod properties {
	use proptest::prelude::*;

	use super::*;

	const PROFILES: [&str; 4] = ["p1", "p2", "p3", "p4"];

	fn block_on<F: std::future::Future>(fut: F) -> F::Output {
		tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(fut)
	}

	proptest! {
		#![proptest_config(ProptestConfig::with_cases(48))]

		#[test]
		fn total_sums_exactly_the_successful_sources(
			selection in prop::collection::vec(0..PROFILES.len(), 0..8),
			records in prop::collection::vec(0..PROFILES.len(), 0..10),
			extras in prop::collection::vec(0u64..5, PROFILES.len()),
			failing in prop::collection::vec(any::<bool>(), PROFILES.len()),
		) {
			let store = MemoryEntities::with_records(
				records.iter().enumerate().map(|(n, &p)| account(&format!("r{n}"), PROFILES[p])),
			);
			for (p, extra) in extras.iter().enumerate() {
				store.set_extra_total(PROFILES[p], *extra);
			}
			for (p, fails) in failing.iter().enumerate() {
				if *fails {
					store.fail_list_for(PROFILES[p]);
				}
			}
			let (store, query) = setup(store);
			let selected: Vec<ProfileId> = selection.iter().map(|&p| PROFILES[p].to_string()).collect();
			let result = block_on(query.load(&selected));

			let distinct: IndexSet<usize> = selection.iter().copied().collect();
			let expected_total: u64 = distinct
				.iter()
				.filter(|&&p| !failing[p])
				.map(|&p| records.iter().filter(|&&r| r == p).count() as u64 + extras[p])
				.sum();
			let failed = distinct.iter().filter(|&&p| failing[p]).count();

			prop_assert_eq!(result.total, expected_total);
			prop_assert_eq!(result.error.as_ref().map(|e| e.failed_sources), (failed > 0).then_some(failed));
			let only_healthy_selected = result.items.iter().all(|a| {
				let p = PROFILES.iter().position(|id| *id == a.profile_id).unwrap();
				distinct.contains(&p) && !failing[p]
			});
			prop_assert!(only_healthy_selected, "items from unselected or failing profiles: {:?}", result.items);
			prop_assert_eq!(store.calls().list, distinct.len());
		}
	}
}
