#![cfg_attr(test, allow(unused_crate_dependencies))]
//! Client-side entity synchronization for the purse dashboard.
//!
//! * [`scope`] decides which profiles are in view and which one is main.
//! * [`aggregate`] fans list queries out over the selected profiles and
//!   merges the results.
//! * [`mutation`] wraps remote writes with optimistic patches and cache
//!   invalidation.
//! * [`crud`] layers modal state on top of three mutations.
//!
//! Everything shares one [`purse_query::QueryClient`]; remote access goes
//! through the [`gateway`] traits.

pub mod aggregate;
pub mod config;
pub mod crud;
pub mod entities;
pub mod error;
pub mod gateway;
pub mod keys;
pub mod memory;
pub mod model;
pub mod mutation;
pub mod scope;

pub use aggregate::{AggregatedResult, FanOutConfig, QueryDescriptor, ScopedQuery};
pub use config::{ConfigError, ScopeConfig, SyncConfig};
pub use crud::{AlwaysConfirm, ConfirmDelete, ConfirmError, ConfirmWith, CrudController, CrudUiState, DeleteOutcome};
pub use error::{AggregationError, GatewayError, GatewayResult, MutationError, ScopeError};
pub use gateway::{EntityGateway, ProfileGateway};
pub use model::{Entity, EntityKind, ListPage, ListParams, Patchable, Profile, ProfileId};
pub use mutation::{Mutation, MutationDescriptor, MutationState, MutationStatus, UpdateArgs};
pub use scope::{ScopeController, ScopePhase, ScopeSnapshot, ScopeState};
