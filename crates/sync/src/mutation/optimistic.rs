//! Optimistic patches over cached list pages.
//!
//! All helpers go through an [`OptimisticTx`]. Inserts and removals register
//! an inverse with each patch, so a failed mutation undoes only its own
//! change even when a concurrent mutation or a refetch wrote the same list
//! since. Field patches have no inverse; contested entries come back from
//! the rollback as stale.

use std::sync::Arc;

use parking_lot::Mutex;
use purse_query::{OptimisticTx, QueryFilter, QueryKey};
use uuid::Uuid;

use crate::keys;
use crate::model::{Entity, ListPage};

const TEMP_PREFIX: &str = "temp-";

/// A fresh id for a record that does not exist remotely yet.
pub fn temp_id() -> String {
	format!("{TEMP_PREFIX}{}", Uuid::new_v4())
}

pub fn is_temp_id(id: &str) -> bool {
	id.starts_with(TEMP_PREFIX)
}

/// Appends `item` to the cached lists of `E`, bumping their totals.
///
/// With a `profile_id`, only that profile's lists are patched; otherwise
/// every cached list of `E` is. Returns the number of patched lists.
pub fn insert_temp<E: Entity>(tx: &mut OptimisticTx, profile_id: Option<&str>, item: E) -> usize {
	let filter = match profile_id {
		Some(profile_id) => keys::lists_filter(E::KIND).scoped(profile_id),
		None => keys::lists_filter(E::KIND),
	};
	let temp = item.id().to_string();
	tx.update_reversible::<ListPage<E>, _, _>(
		&filter,
		|page| {
			page.items.push(item.clone());
			page.total += 1;
		},
		move |page| {
			if drop_record(page, &temp) {
				page.total = page.total.saturating_sub(1);
			}
		},
	)
}

/// Removes the record `id` from every cached list of `E`.
///
/// Rolling back puts the record back where it was in each list that held
/// it, unless the list holds it again by then.
pub fn remove_by_id<E: Entity>(tx: &mut OptimisticTx, id: &str) -> usize {
	let client = tx.client().clone();
	let holding: Vec<QueryKey> = client
		.keys(&keys::lists_filter(E::KIND))
		.into_iter()
		.filter(|key| {
			client
				.get_data::<ListPage<E>>(key)
				.is_some_and(|page| page.items.iter().any(|item| item.id() == id))
		})
		.collect();
	holding.iter().map(|key| remove_from::<E>(tx, key, id)).sum()
}

fn remove_from<E: Entity>(tx: &mut OptimisticTx, key: &QueryKey, id: &str) -> usize {
	let removed: Arc<Mutex<Option<(usize, E)>>> = Arc::default();
	let captured = Arc::clone(&removed);
	let owned = id.to_string();
	tx.update_reversible::<ListPage<E>, _, _>(
		&QueryFilter::exact(key.clone()),
		|page| {
			if let Some(index) = page.items.iter().position(|item| item.id() == id) {
				let record = page.items.remove(index);
				page.total = page.total.saturating_sub(1);
				*captured.lock() = Some((index, record));
			}
		},
		move |page| {
			let Some((index, record)) = removed.lock().clone() else {
				return;
			};
			if page.items.iter().all(|item| item.id() != owned) {
				page.items.insert(index.min(page.items.len()), record);
				page.total += 1;
			}
		},
	)
}

/// Applies `f` to every cached copy of record `id`, in lists and detail.
pub fn patch_by_id<E, F>(tx: &mut OptimisticTx, id: &str, f: F) -> usize
where
	E: Entity,
	F: Fn(&mut E),
{
	let in_lists = tx.update::<ListPage<E>, _>(&keys::lists_filter(E::KIND), |page| {
		for item in page.items.iter_mut().filter(|item| item.id() == id) {
			f(item);
		}
	});
	in_lists + tx.update::<E, _>(&keys::detail_filter(E::KIND, id), |record| f(record))
}

fn drop_record<E: Entity>(page: &mut ListPage<E>, id: &str) -> bool {
	let before = page.items.len();
	page.items.retain(|item| item.id() != id);
	page.items.len() != before
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use purse_query::QueryClient;

	use super::*;
	use crate::entities::Account;
	use crate::model::ListParams;

	fn account(id: &str, profile: &str) -> Account {
		Account {
			id: id.into(),
			profile_id: profile.into(),
			name: "Cash".into(),
			currency: "EUR".into(),
			balance: 0,
		}
	}

	fn list_key(profile: &str) -> purse_query::QueryKey {
		keys::list(Account::KIND, &ListParams::default().with_profile(profile)).with_scope(profile)
	}

	#[test]
	fn insert_targets_the_owning_profile() {
		let client = QueryClient::default();
		client.set_data(list_key("p1"), ListPage::new(vec![account("a", "p1")], 4));
		client.set_data(list_key("p2"), ListPage::new(vec![account("b", "p2")], 1));

		let mut tx = client.begin_optimistic();
		let temp = account(&temp_id(), "p1");
		assert_eq!(insert_temp(&mut tx, Some("p1"), temp.clone()), 1);

		let p1 = client.get_data::<ListPage<Account>>(&list_key("p1")).unwrap();
		assert_eq!(p1.items.last(), Some(&temp));
		assert_eq!(p1.total, 5);
		assert!(is_temp_id(&temp.id));
		assert_eq!(client.get_data::<ListPage<Account>>(&list_key("p2")).unwrap().items.len(), 1);

		assert_eq!(tx.rollback().restored, 1);
		assert_eq!(client.get_data::<ListPage<Account>>(&list_key("p1")).unwrap().total, 4);
	}

	#[test]
	fn rollback_after_refetch_removes_only_the_temp_record() {
		let client = QueryClient::default();
		client.set_data(list_key("p1"), ListPage::new(vec![account("a", "p1")], 1));

		let mut tx = client.begin_optimistic();
		let temp = account(&temp_id(), "p1");
		insert_temp(&mut tx, Some("p1"), temp.clone());
		let mut refetched = client.get_data::<ListPage<Account>>(&list_key("p1")).unwrap().as_ref().clone();
		refetched.items.push(account("b", "p1"));
		refetched.total += 1;
		client.set_data(list_key("p1"), refetched);

		let report = tx.rollback();
		assert_eq!(report.inverted, 1);
		let page = client.get_data::<ListPage<Account>>(&list_key("p1")).unwrap();
		assert_eq!(page.items, vec![account("a", "p1"), account("b", "p1")]);
		assert_eq!(page.total, 2);
	}

	#[test]
	fn failed_remove_puts_the_record_back_in_place() {
		let client = QueryClient::default();
		client.set_data(list_key("p1"), ListPage::new(vec![account("a", "p1"), account("b", "p1"), account("c", "p1")], 3));

		let mut removal = client.begin_optimistic();
		remove_by_id::<Account>(&mut removal, "b");
		let mut insertion = client.begin_optimistic();
		let temp = account(&temp_id(), "p1");
		insert_temp(&mut insertion, Some("p1"), temp.clone());

		assert_eq!(removal.rollback().inverted, 1);
		let page = client.get_data::<ListPage<Account>>(&list_key("p1")).unwrap();
		assert_eq!(page.items, vec![account("a", "p1"), account("b", "p1"), account("c", "p1"), temp]);
		assert_eq!(page.total, 4);
	}

	#[test]
	fn remove_leaves_lists_without_the_record_untouched() {
		let client = QueryClient::default();
		client.set_data(list_key("p1"), ListPage::new(vec![account("a", "p1")], 1));
		client.set_data(list_key("p2"), ListPage::new(vec![account("b", "p2")], 1));

		let mut removal = client.begin_optimistic();
		assert_eq!(remove_by_id::<Account>(&mut removal, "a"), 1);
		client.set_data(list_key("p2"), ListPage::new(vec![account("c", "p2")], 1));

		assert_eq!(removal.rollback().restored, 1);
		assert_eq!(client.get_data::<ListPage<Account>>(&list_key("p2")).unwrap().items, vec![account("c", "p2")]);
	}

	#[test]
	fn remove_adjusts_totals() {
		let client = QueryClient::default();
		client.set_data(list_key("p1"), ListPage::new(vec![account("a", "p1"), account("b", "p1")], 2));

		let mut tx = client.begin_optimistic();
		remove_by_id::<Account>(&mut tx, "a");
		tx.commit();

		let page = client.get_data::<ListPage<Account>>(&list_key("p1")).unwrap();
		assert_eq!(page.items, vec![account("b", "p1")]);
		assert_eq!(page.total, 1);
	}

	#[test]
	fn patch_reaches_lists_and_detail() {
		let client = QueryClient::default();
		client.set_data(list_key("p1"), ListPage::new(vec![account("a", "p1")], 1));
		client.set_data(keys::detail(Account::KIND, "a"), account("a", "p1"));

		let mut tx = client.begin_optimistic();
		let patched = patch_by_id::<Account, _>(&mut tx, "a", |a| a.balance = 42);
		assert_eq!(patched, 2);
		assert_eq!(client.get_data::<Account>(&keys::detail(Account::KIND, "a")).unwrap().balance, 42);
		assert_eq!(client.get_data::<ListPage<Account>>(&list_key("p1")).unwrap().items[0].balance, 42);

		let mut rename = client.begin_optimistic();
		patch_by_id::<Account, _>(&mut rename, "a", |a| a.name = "Savings".into());
		let report = tx.rollback();
		assert_eq!(report.stale.len(), 2);
		assert_eq!(client.get_data::<Account>(&keys::detail(Account::KIND, "a")).unwrap().name, "Savings");
	}
}
