use std::sync::Arc;

use futures::FutureExt;
use purse_query::QueryClient;
use serde::{Deserialize, Serialize};

use super::{Mutation, MutationDescriptor};
use crate::gateway::EntityGateway;
use crate::model::Entity;

/// Input of an update mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateArgs<P> {
	pub id: String,
	pub patch: P,
}

impl<P> UpdateArgs<P> {
	pub fn new(id: impl Into<String>, patch: P) -> Self {
		Self { id: id.into(), patch }
	}
}

/// Create mutation over `gateway.create`.
pub fn create_mutation<E, G>(client: QueryClient, gateway: Arc<G>, descriptor: MutationDescriptor<G::Create, E>) -> Mutation<G::Create, E>
where
	E: Entity,
	G: EntityGateway<E>,
{
	let run = move |input: G::Create| {
		let gateway = Arc::clone(&gateway);
		async move { gateway.create(input).await }.boxed()
	};
	Mutation::new(format!("{}.create", E::KIND), client, run, descriptor)
}

/// Update mutation over `gateway.update`.
pub fn update_mutation<E, G>(
	client: QueryClient,
	gateway: Arc<G>,
	descriptor: MutationDescriptor<UpdateArgs<G::Patch>, E>,
) -> Mutation<UpdateArgs<G::Patch>, E>
where
	E: Entity,
	G: EntityGateway<E>,
{
	let run = move |args: UpdateArgs<G::Patch>| {
		let gateway = Arc::clone(&gateway);
		async move { gateway.update(&args.id, args.patch).await }.boxed()
	};
	Mutation::new(format!("{}.update", E::KIND), client, run, descriptor)
}

/// Delete mutation over `gateway.delete`, keyed by record id.
pub fn delete_mutation<E, G>(client: QueryClient, gateway: Arc<G>, descriptor: MutationDescriptor<String, ()>) -> Mutation<String, ()>
where
	E: Entity,
	G: EntityGateway<E>,
{
	let run = move |id: String| {
		let gateway = Arc::clone(&gateway);
		async move { gateway.delete(&id).await }.boxed()
	};
	Mutation::new(format!("{}.delete", E::KIND), client, run, descriptor)
}
