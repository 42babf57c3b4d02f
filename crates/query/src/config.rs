use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lifetimes and buffer sizes for the query cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
	/// Age after which cached data is refetched by [`crate::QueryClient::ensure`].
	pub stale_time_ms: u64,
	/// How long an unobserved entry survives before garbage collection.
	pub gc_time_ms: u64,
	/// Capacity of the cache event broadcast channel.
	pub event_capacity: usize,
}

impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			stale_time_ms: 30_000,
			gc_time_ms: 300_000,
			event_capacity: 256,
		}
	}
}

impl CacheConfig {
	pub fn stale_time(&self) -> Duration {
		Duration::from_millis(self.stale_time_ms)
	}

	pub fn gc_time(&self) -> Duration {
		Duration::from_millis(self.gc_time_ms)
	}
}
