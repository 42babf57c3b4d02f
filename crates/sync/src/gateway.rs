//! Remote gateway seams.
//!
//! One adapter per entity kind implements [`EntityGateway`]; the generic
//! aggregation and mutation factories only ever talk to this trait.

use async_trait::async_trait;

use crate::error::GatewayResult;
use crate::model::{Entity, ListPage, ListParams, NewProfile, Profile, ProfileId, ProfilePatch};

/// Typed CRUD access to one entity kind.
#[async_trait]
pub trait EntityGateway<E: Entity>: Send + Sync + 'static {
	/// Creation input.
	type Create: Clone + Send + Sync + 'static;
	/// Partial update input.
	type Patch: Clone + Send + Sync + 'static;

	async fn list(&self, params: &ListParams) -> GatewayResult<ListPage<E>>;

	async fn get(&self, id: &str) -> GatewayResult<E>;

	async fn create(&self, input: Self::Create) -> GatewayResult<E>;

	async fn update(&self, id: &str, patch: Self::Patch) -> GatewayResult<E>;

	async fn delete(&self, id: &str) -> GatewayResult<()>;

	/// Whether `list` honours [`ListParams::profile_id`].
	///
	/// Endpoints without native scoping still get one cache entry per profile;
	/// the profile id is only carried in the cache key.
	fn native_scope(&self) -> bool {
		true
	}
}

/// Profile access plus the main-profile preference.
#[async_trait]
pub trait ProfileGateway: EntityGateway<Profile, Create = NewProfile, Patch = ProfilePatch> {
	/// Main profile stored by the backend, if any.
	async fn main_profile(&self) -> GatewayResult<Option<ProfileId>>;

	async fn set_main_profile(&self, id: &str) -> GatewayResult<()>;
}
