//! Plain data shared between the gateway, the cache and the UI.

use serde::{Deserialize, Serialize};

/// Identifier of a financial profile.
pub type ProfileId = String;

/// Kinds of remote entities synchronized by this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
	Profiles,
	Accounts,
	Budgets,
	Assets,
	Categories,
	Imports,
	RecurringTransactions,
}

impl EntityKind {
	/// Stable name used as the first cache key segment.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Profiles => "profiles",
			Self::Accounts => "accounts",
			Self::Budgets => "budgets",
			Self::Assets => "assets",
			Self::Categories => "categories",
			Self::Imports => "imports",
			Self::RecurringTransactions => "recurring_transactions",
		}
	}
}

impl std::fmt::Display for EntityKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A remote record addressable by id.
///
/// Implementors name their id field through [`Entity::id`]; the generic
/// factories never look at field names.
pub trait Entity: Clone + Send + Sync + 'static {
	const KIND: EntityKind;

	fn id(&self) -> &str;

	/// Profile the record belongs to, if it is profile-scoped.
	fn profile_id(&self) -> Option<&str> {
		None
	}
}

/// Records that can apply their own partial update locally.
pub trait Patchable: Entity {
	type Patch: Clone + Send + Sync + 'static;

	fn apply_patch(&mut self, patch: &Self::Patch);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileType {
	#[default]
	Personal,
	Family,
	Business,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
	pub id: ProfileId,
	pub name: String,
	#[serde(rename = "type")]
	pub profile_type: ProfileType,
	pub default_currency: String,
	pub is_active: bool,
}

impl Entity for Profile {
	const KIND: EntityKind = EntityKind::Profiles;

	fn id(&self) -> &str {
		&self.id
	}
}

impl Patchable for Profile {
	type Patch = ProfilePatch;

	fn apply_patch(&mut self, patch: &ProfilePatch) {
		if let Some(name) = &patch.name {
			self.name = name.clone();
		}
		if let Some(profile_type) = patch.profile_type {
			self.profile_type = profile_type;
		}
		if let Some(currency) = &patch.default_currency {
			self.default_currency = currency.clone();
		}
		if let Some(active) = patch.is_active {
			self.is_active = active;
		}
	}
}

/// Input for creating a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProfile {
	pub name: String,
	#[serde(rename = "type")]
	pub profile_type: ProfileType,
	pub default_currency: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(rename = "type", skip_serializing_if = "Option::is_none")]
	pub profile_type: Option<ProfileType>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub default_currency: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub is_active: Option<bool>,
}

/// Parameters of a list request.
///
/// Serialised into the cache key, so two requests share a cache entry only
/// when every field matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub profile_id: Option<ProfileId>,
	pub page: u32,
	pub page_size: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub search: Option<String>,
	#[serde(skip_serializing_if = "std::collections::BTreeMap::is_empty")]
	pub filters: std::collections::BTreeMap<String, String>,
}

impl Default for ListParams {
	fn default() -> Self {
		Self {
			profile_id: None,
			page: 1,
			page_size: 50,
			search: None,
			filters: Default::default(),
		}
	}
}

impl ListParams {
	pub fn with_page_size(mut self, page_size: u32) -> Self {
		self.page_size = page_size;
		self
	}

	pub fn with_profile(mut self, profile_id: impl Into<ProfileId>) -> Self {
		self.profile_id = Some(profile_id.into());
		self
	}

	pub fn with_search(mut self, search: impl Into<String>) -> Self {
		self.search = Some(search.into());
		self
	}

	pub fn with_filter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.filters.insert(name.into(), value.into());
		self
	}
}

/// One page of a list response.
///
/// `total` is the server-side count and may exceed `items.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPage<T> {
	pub items: Vec<T>,
	pub total: u64,
}

impl<T> Default for ListPage<T> {
	fn default() -> Self {
		Self { items: Vec::new(), total: 0 }
	}
}

impl<T> ListPage<T> {
	pub fn new(items: Vec<T>, total: u64) -> Self {
		Self { items, total }
	}
}
