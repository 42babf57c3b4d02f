//! Layer configuration loaded from TOML.

use std::path::{Path, PathBuf};

use purse_query::CacheConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// Error parsing TOML syntax or types.
	#[error("TOML parse error: {0}")]
	Parse(#[from] toml::de::Error),

	/// A value parsed but is out of range.
	#[error("invalid configuration: {0}")]
	Invalid(String),
}

/// Scope controller behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
	/// Persist the locally picked main profile to the backend during bootstrap.
	pub persist_main_on_bootstrap: bool,
}

impl Default for ScopeConfig {
	fn default() -> Self {
		Self {
			persist_main_on_bootstrap: true,
		}
	}
}

/// Top-level configuration of the synchronization layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
	/// Page size used for list queries that do not specify one.
	pub page_size: u32,
	pub cache: CacheConfig,
	pub scope: ScopeConfig,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			page_size: 50,
			cache: CacheConfig::default(),
			scope: ScopeConfig::default(),
		}
	}
}

impl SyncConfig {
	pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(src)?;
		config.validate()?;
		Ok(config)
	}

	/// Loads `path`, falling back to defaults when the file does not exist.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		match std::fs::read_to_string(path) {
			Ok(src) => Self::from_toml_str(&src),
			Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
				tracing::debug!(path = %path.display(), "no config file, using defaults");
				Ok(Self::default())
			}
			Err(error) => Err(ConfigError::Io {
				path: path.to_path_buf(),
				error,
			}),
		}
	}

	/// `<config dir>/purse/sync.toml`, if the platform has a config dir.
	pub fn default_path() -> Option<PathBuf> {
		dirs::config_dir().map(|dir| dir.join("purse").join("sync.toml"))
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.page_size == 0 {
			return Err(ConfigError::Invalid("page_size must be positive".into()));
		}
		if self.cache.gc_time_ms < self.cache.stale_time_ms {
			return Err(ConfigError::Invalid(format!(
				"cache.gc_time_ms ({}) must not be shorter than cache.stale_time_ms ({})",
				self.cache.gc_time_ms, self.cache.stale_time_ms
			)));
		}
		Ok(())
	}
}
