use std::any::Any;
use std::sync::Arc;

use crate::client::{AnyData, Reverted};
use crate::{QueryClient, QueryFilter, QueryKey};

/// Type-erased inverse of one patch.
pub(crate) type Revert = Arc<dyn Fn(&AnyData) -> Option<AnyData> + Send + Sync>;

struct Write {
	key: QueryKey,
	prior: AnyData,
	version: u64,
	/// Inverses of every patch applied to `key`, in patch order. `None` once
	/// a patch without an inverse touched the key.
	reverts: Option<Vec<Revert>>,
}

/// Outcome of [`OptimisticTx::rollback`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rollback {
	/// Entries nobody wrote since the patch, reset to their prior data.
	pub restored: usize,
	/// Entries written since the patch, reverted by applying the inverses to
	/// their current data.
	pub inverted: usize,
	/// Entries written since the patch that could not be reverted in place.
	pub stale: Vec<QueryKey>,
}

/// Speculative cache patch that can be reverted.
///
/// Every entry the transaction touches remembers the data it held before the
/// first patch and the version of the latest patch. On rollback an entry
/// nobody wrote since gets its prior data back. An entry written in the
/// meantime (a refetch, another transaction) keeps that write and only has
/// this transaction's patches undone, through the inverses registered with
/// [`OptimisticTx::update_reversible`]. Entries without inverses are
/// reported as stale.
pub struct OptimisticTx {
	client: QueryClient,
	id: u64,
	writes: Vec<Write>,
}

impl OptimisticTx {
	pub(crate) fn new(client: QueryClient, id: u64) -> Self {
		Self {
			client,
			id,
			writes: Vec::new(),
		}
	}

	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn client(&self) -> &QueryClient {
		&self.client
	}

	/// Returns the keys patched so far.
	pub fn keys(&self) -> impl Iterator<Item = &QueryKey> {
		self.writes.iter().map(|w| &w.key)
	}

	pub fn is_empty(&self) -> bool {
		self.writes.is_empty()
	}

	/// Patches every matching entry holding a `T`, returning how many changed.
	///
	/// Entries patched this way can only be reset wholesale on rollback.
	pub fn update<T, F>(&mut self, filter: &QueryFilter, f: F) -> usize
	where
		T: Any + Clone + Send + Sync,
		F: FnMut(&mut T),
	{
		self.record(filter, f, None)
	}

	/// Like [`OptimisticTx::update`], with `revert` undoing `f` on whatever
	/// the entry holds at rollback time.
	pub fn update_reversible<T, F, R>(&mut self, filter: &QueryFilter, f: F, revert: R) -> usize
	where
		T: Any + Clone + Send + Sync,
		F: FnMut(&mut T),
		R: Fn(&mut T) + Send + Sync + 'static,
	{
		let revert: Revert = Arc::new(move |data: &AnyData| {
			let mut next = data.downcast_ref::<T>()?.clone();
			revert(&mut next);
			Some(Arc::new(next) as AnyData)
		});
		self.record(filter, f, Some(revert))
	}

	fn record<T, F>(&mut self, filter: &QueryFilter, f: F, revert: Option<Revert>) -> usize
	where
		T: Any + Clone + Send + Sync,
		F: FnMut(&mut T),
	{
		let touched = self.client.patch_entries::<T, F>(filter, f);
		let count = touched.len();
		for (key, prior, version) in touched {
			match self.writes.iter_mut().find(|w| w.key == key) {
				Some(existing) => {
					existing.version = version;
					match (&mut existing.reverts, &revert) {
						(Some(reverts), Some(revert)) => reverts.push(Arc::clone(revert)),
						(reverts, _) => *reverts = None,
					}
				}
				None => self.writes.push(Write {
					key,
					prior,
					version,
					reverts: revert.as_ref().map(|revert| vec![Arc::clone(revert)]),
				}),
			}
		}
		tracing::trace!(tx = self.id, %filter, count, reversible = revert.is_some(), "query.optimistic.update");
		count
	}

	/// Reverts every patched entry still in the cache.
	pub fn rollback(self) -> Rollback {
		let Self { client, id, writes } = self;
		let mut report = Rollback::default();
		for write in writes.into_iter().rev() {
			match client.revert_write(&write.key, write.prior, write.version, write.reverts.as_deref()) {
				Reverted::Restored => report.restored += 1,
				Reverted::Inverted => report.inverted += 1,
				Reverted::Stale => report.stale.push(write.key),
				Reverted::Gone => {}
			}
		}
		tracing::debug!(
			tx = id,
			restored = report.restored,
			inverted = report.inverted,
			stale = report.stale.len(),
			"query.optimistic.rollback"
		);
		report
	}

	/// Keeps the patches; the next refetch of each key replaces them.
	pub fn commit(self) {
		tracing::trace!(tx = self.id, writes = self.writes.len(), "query.optimistic.commit");
	}
}

impl std::fmt::Debug for OptimisticTx {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("OptimisticTx")
			.field("id", &self.id)
			.field("keys", &self.writes.iter().map(|w| w.key.to_string()).collect::<Vec<_>>())
			.finish()
	}
}
