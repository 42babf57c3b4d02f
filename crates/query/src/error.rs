use std::error::Error as StdError;
use std::sync::Arc;

use crate::QueryKey;

/// Result alias for query operations.
pub type Result<T, E = QueryError> = std::result::Result<T, E>;

/// Failure of a cached query.
///
/// Fetch errors are opaque to the cache; the original error is kept behind an
/// `Arc` so one failure can be handed to every caller joined on the fetch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
	/// The fetcher returned an error.
	#[error("{0}")]
	Source(Arc<dyn StdError + Send + Sync>),
	/// Cached data exists but holds a different type than requested.
	#[error("cached data for {key} is not a `{expected}`")]
	TypeMismatch { key: QueryKey, expected: &'static str },
	/// The fetch task died before producing a result.
	#[error("query task for {key} aborted: {reason}")]
	Aborted { key: QueryKey, reason: String },
}

impl QueryError {
	pub fn source_error<E>(error: E) -> Self
	where
		E: StdError + Send + Sync + 'static,
	{
		Self::Source(Arc::new(error))
	}

	/// Returns the fetcher's error if it has type `E`.
	pub fn downcast_ref<E>(&self) -> Option<&E>
	where
		E: StdError + 'static,
	{
		match self {
			Self::Source(inner) => inner.downcast_ref::<E>(),
			_ => None,
		}
	}
}
