//! Concrete entity types synchronized through the generic factories.

use serde::{Deserialize, Serialize};

use crate::model::{Entity, EntityKind, Patchable, ProfileId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
	pub id: String,
	pub profile_id: ProfileId,
	pub name: String,
	pub currency: String,
	/// Balance in minor units (cents).
	pub balance: i64,
}

impl Entity for Account {
	const KIND: EntityKind = EntityKind::Accounts;

	fn id(&self) -> &str {
		&self.id
	}

	fn profile_id(&self) -> Option<&str> {
		Some(&self.profile_id)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
	pub profile_id: ProfileId,
	pub name: String,
	pub currency: String,
	#[serde(default)]
	pub balance: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPatch {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub balance: Option<i64>,
}

impl Patchable for Account {
	type Patch = AccountPatch;

	fn apply_patch(&mut self, patch: &AccountPatch) {
		if let Some(name) = &patch.name {
			self.name = name.clone();
		}
		if let Some(balance) = patch.balance {
			self.balance = balance;
		}
	}
}
