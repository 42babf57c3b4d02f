use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field name of the tagged segment carrying a profile scope.
const SCOPE_TAG: &str = "scope";

/// Ordered, JSON-valued cache key.
///
/// Keys compare segment by segment. Keys produced by scoped fan-out end with
/// a tagged `{"scope": <profile id>}` segment, see [`QueryKey::with_scope`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey {
	segments: Vec<Value>,
}

impl QueryKey {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns this key extended by one segment.
	pub fn with(mut self, segment: impl Into<Value>) -> Self {
		self.segments.push(segment.into());
		self
	}

	/// Appends a serialisable segment (typically a params struct).
	pub fn try_with_serialized<T: Serialize>(self, segment: &T) -> Result<Self, serde_json::Error> {
		Ok(self.with(serde_json::to_value(segment)?))
	}

	/// Like [`QueryKey::try_with_serialized`], but a segment that fails to
	/// serialise is logged and stored as `null`.
	pub fn with_serialized<T: Serialize>(self, segment: &T) -> Self {
		match serde_json::to_value(segment) {
			Ok(value) => self.with(value),
			Err(error) => {
				tracing::warn!(segment = std::any::type_name::<T>(), %error, "query.key.serialize_failed");
				self.with(Value::Null)
			}
		}
	}

	/// Appends the scope segment for `profile_id`.
	pub fn with_scope(self, profile_id: impl Into<String>) -> Self {
		let mut tag = serde_json::Map::new();
		tag.insert(SCOPE_TAG.to_string(), Value::String(profile_id.into()));
		self.with(Value::Object(tag))
	}

	pub fn segments(&self) -> &[Value] {
		&self.segments
	}

	pub fn len(&self) -> usize {
		self.segments.len()
	}

	pub fn is_empty(&self) -> bool {
		self.segments.is_empty()
	}

	pub fn starts_with(&self, prefix: &QueryKey) -> bool {
		self.segments.starts_with(&prefix.segments)
	}

	/// Profile scope of the key, if it ends with a scope segment.
	pub fn scope(&self) -> Option<&str> {
		let tag = self.segments.last()?.as_object()?;
		if tag.len() != 1 {
			return None;
		}
		tag.get(SCOPE_TAG)?.as_str()
	}
}

impl Hash for QueryKey {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.segments.len().hash(state);
		for segment in &self.segments {
			hash_value(segment, state);
		}
	}
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
	match value {
		Value::Null => 0u8.hash(state),
		Value::Bool(b) => {
			1u8.hash(state);
			b.hash(state);
		}
		Value::Number(n) => {
			2u8.hash(state);
			n.to_string().hash(state);
		}
		Value::String(s) => {
			3u8.hash(state);
			s.hash(state);
		}
		Value::Array(items) => {
			4u8.hash(state);
			items.len().hash(state);
			for item in items {
				hash_value(item, state);
			}
		}
		Value::Object(map) => {
			5u8.hash(state);
			map.len().hash(state);
			for (k, v) in map {
				k.hash(state);
				hash_value(v, state);
			}
		}
	}
}

impl fmt::Display for QueryKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("[")?;
		for (idx, segment) in self.segments.iter().enumerate() {
			if idx > 0 {
				f.write_str(",")?;
			}
			write!(f, "{segment}")?;
		}
		f.write_str("]")
	}
}

impl<const N: usize> From<[&str; N]> for QueryKey {
	fn from(segments: [&str; N]) -> Self {
		Self {
			segments: segments.iter().map(|s| Value::String((*s).to_string())).collect(),
		}
	}
}

impl FromIterator<Value> for QueryKey {
	fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
		Self {
			segments: iter.into_iter().collect(),
		}
	}
}

/// Selects cache entries for invalidation, patching and eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFilter {
	prefix: QueryKey,
	scope: Option<String>,
	exact: bool,
}

impl QueryFilter {
	/// Matches every key starting with `prefix`.
	pub fn prefix(prefix: impl Into<QueryKey>) -> Self {
		Self {
			prefix: prefix.into(),
			scope: None,
			exact: false,
		}
	}

	/// Matches only `key` itself.
	pub fn exact(key: impl Into<QueryKey>) -> Self {
		Self {
			prefix: key.into(),
			scope: None,
			exact: true,
		}
	}

	/// Restricts the filter to keys whose scope segment is `profile_id`.
	pub fn scoped(mut self, profile_id: impl Into<String>) -> Self {
		self.scope = Some(profile_id.into());
		self
	}

	pub fn key(&self) -> &QueryKey {
		&self.prefix
	}

	pub fn matches(&self, key: &QueryKey) -> bool {
		let shape = if self.exact { key == &self.prefix } else { key.starts_with(&self.prefix) };
		shape && self.scope.as_deref().is_none_or(|scope| key.scope() == Some(scope))
	}
}

impl From<QueryKey> for QueryFilter {
	fn from(key: QueryKey) -> Self {
		Self::prefix(key)
	}
}

impl fmt::Display for QueryFilter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.prefix)?;
		if self.exact {
			f.write_str("(exact)")?;
		}
		if let Some(scope) = &self.scope {
			write!(f, "@{scope}")?;
		}
		Ok(())
	}
}
