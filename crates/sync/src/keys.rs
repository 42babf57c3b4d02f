//! Cache key builders shared by queries and invalidation.

use purse_query::{QueryFilter, QueryKey};

use crate::model::{EntityKind, ListParams};

/// Every key of `kind`.
pub fn all(kind: EntityKind) -> QueryKey {
	QueryKey::new().with(kind.as_str())
}

/// Every list key of `kind`, across params and scopes.
pub fn lists(kind: EntityKind) -> QueryKey {
	all(kind).with("list")
}

pub fn list(kind: EntityKind, params: &ListParams) -> QueryKey {
	lists(kind).with_serialized(params)
}

pub fn detail(kind: EntityKind, id: &str) -> QueryKey {
	all(kind).with("detail").with(id)
}

/// The full, unscoped profile set used by the scope controller.
pub fn profile_set() -> QueryKey {
	all(EntityKind::Profiles).with("all")
}

/// The backend's main-profile preference.
pub fn main_profile() -> QueryKey {
	all(EntityKind::Profiles).with("main")
}

pub fn lists_filter(kind: EntityKind) -> QueryFilter {
	QueryFilter::prefix(lists(kind))
}

pub fn detail_filter(kind: EntityKind, id: &str) -> QueryFilter {
	QueryFilter::exact(detail(kind, id))
}
