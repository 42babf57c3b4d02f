#![cfg_attr(test, allow(unused_crate_dependencies))]
//! Keyed query cache used by the synchronization layer.
//!
//! [`QueryClient`] is the single shared mutable resource of the layer: every
//! read goes through [`QueryClient::fetch`]/[`QueryClient::ensure`] and every
//! write is either an [`OptimisticTx`] patch or the settlement of a fetch
//! triggered by [`QueryClient::invalidate`].
//!
//! # Keys
//!
//! ```text
//! ["accounts", "list", {"page":1,...}, {"scope":"profile-a"}]
//!  └─ kind ──┘└ op ─┘ └── params ───┘ └────── scope ──────┘
//! ```
//!
//! Filters match by prefix and optionally by the tagged scope segment, so
//! invalidating `["accounts", "list"]` reaches every per-profile page.

mod client;
mod config;
mod error;
mod key;
mod optimistic;

pub use client::{CacheEvent, FetchStatus, Fetcher, InvalidateReport, ObserverGuard, QueryClient, QueryState};
pub use config::CacheConfig;
pub use error::{QueryError, Result};
pub use key::{QueryFilter, QueryKey};
pub use optimistic::{OptimisticTx, Rollback};
