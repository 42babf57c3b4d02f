//! Error taxonomy of the synchronization layer.
//!
//! A declined delete confirmation is not an error; see
//! [`crate::crud::DeleteOutcome::Declined`].

use purse_query::QueryError;

use crate::model::{EntityKind, ProfileId};

/// Failure reported by a remote gateway. Opaque to this layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum GatewayError {
	#[error("transport error: {0}")]
	Transport(String),
	#[error("validation failed: {0}")]
	Validation(String),
	#[error("{kind} `{id}` not found")]
	NotFound { kind: EntityKind, id: String },
	#[error("unexpected response: {0}")]
	Response(String),
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Failures of the scope controller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScopeError {
	/// The id is not part of the full profile set.
	#[error("profile `{0}` not found")]
	NotFound(ProfileId),
	/// `create_first_profile` was called while profiles already exist.
	#[error("a first profile can only be created while no active profile exists")]
	CreationNotRequired,
	/// No main profile could be resolved.
	#[error("no main profile is available")]
	NoMainProfile,
	/// The controller has not completed its bootstrap.
	#[error("scope controller is not initialized")]
	NotInitialized,
	/// The session ended while the request was in flight; its result was dropped.
	#[error("session ended while the request was in flight")]
	SignedOut,
	#[error(transparent)]
	Gateway(#[from] GatewayError),
	#[error("profile query failed: {0}")]
	Query(#[from] QueryError),
}

/// One or more fan-out sources failed.
///
/// Carries the first failure in profile iteration order; partial items are
/// still returned next to it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("query for profile `{profile_id}` failed: {source}")]
pub struct AggregationError {
	pub profile_id: ProfileId,
	pub source: QueryError,
	/// Number of sources that failed in the same pass.
	pub failed_sources: usize,
}

impl PartialEq for AggregationError {
	fn eq(&self, other: &Self) -> bool {
		self.profile_id == other.profile_id
			&& self.failed_sources == other.failed_sources
			&& self.source.to_string() == other.source.to_string()
	}
}

impl AggregationError {
	/// Returns the gateway error behind the first failure, if that is what it was.
	pub fn gateway_error(&self) -> Option<&GatewayError> {
		self.source.downcast_ref::<GatewayError>()
	}
}

/// Failure of a single create/update/delete call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MutationError {
	#[error(transparent)]
	Gateway(#[from] GatewayError),
	#[error("mutation task aborted: {0}")]
	Aborted(String),
	#[error("nothing is selected for update")]
	NothingSelected,
}

impl MutationError {
	pub fn gateway_error(&self) -> Option<&GatewayError> {
		match self {
			Self::Gateway(err) => Some(err),
			_ => None,
		}
	}
}
