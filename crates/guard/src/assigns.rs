//! Instance state and the reserved error state slot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved assigns key holding the serialized [`ErrorState`].
///
/// User code may read it; writes through [`Assigns::put`] and
/// [`Assigns::remove`] are refused.
pub const GUARD_STATE_KEY: &str = "__ward_guard__";

/// Per-instance degraded marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorState {
	pub degraded: bool,
}

/// Persisted state of one component instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assigns {
	values: BTreeMap<String, Value>,
}

impl Assigns {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.values.get(key)
	}

	/// Reads a string value.
	pub fn get_str(&self, key: &str) -> Option<&str> {
		self.get(key).and_then(Value::as_str)
	}

	/// Reads an integer value.
	pub fn get_i64(&self, key: &str) -> Option<i64> {
		self.get(key).and_then(Value::as_i64)
	}

	/// Stores a value. Writes to [`GUARD_STATE_KEY`] are dropped.
	pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
		let key = key.into();
		if key == GUARD_STATE_KEY {
			tracing::warn!(key = GUARD_STATE_KEY, "ward.assigns.reserved_write");
			return self;
		}
		self.values.insert(key, value.into());
		self
	}

	/// Removes a value. The reserved key cannot be removed.
	pub fn remove(&mut self, key: &str) -> Option<Value> {
		if key == GUARD_STATE_KEY {
			tracing::warn!(key = GUARD_STATE_KEY, "ward.assigns.reserved_write");
			return None;
		}
		self.values.remove(key)
	}

	pub fn contains(&self, key: &str) -> bool {
		self.values.contains_key(key)
	}

	/// Iterates user entries, skipping the reserved slot.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
		self.values.iter().filter(|(k, _)| k.as_str() != GUARD_STATE_KEY).map(|(k, v)| (k.as_str(), v))
	}

	/// Returns the error state; absent or malformed slots read as healthy.
	pub fn error_state(&self) -> ErrorState {
		self.values
			.get(GUARD_STATE_KEY)
			.and_then(|v| serde_json::from_value(v.clone()).ok())
			.unwrap_or_default()
	}

	pub fn is_degraded(&self) -> bool {
		self.error_state().degraded
	}

	pub(crate) fn set_error_state(&mut self, state: ErrorState) {
		let value = serde_json::json!({ "degraded": state.degraded });
		self.values.insert(GUARD_STATE_KEY.to_string(), value);
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn reserved_key_is_read_only_for_users() {
		let mut assigns = Assigns::new();
		assigns.put(GUARD_STATE_KEY, json!({ "degraded": true }));
		assert!(!assigns.is_degraded());
		assert!(!assigns.contains(GUARD_STATE_KEY));

		assigns.set_error_state(ErrorState { degraded: true });
		assert_eq!(assigns.remove(GUARD_STATE_KEY), None);
		assert!(assigns.is_degraded());
		assert_eq!(assigns.get(GUARD_STATE_KEY), Some(&json!({ "degraded": true })));
	}

	#[test]
	fn iter_skips_reserved_slot() {
		let mut assigns = Assigns::new();
		assigns.put("count", 1).put("name", "ok");
		assigns.set_error_state(ErrorState { degraded: true });
		let keys: Vec<_> = assigns.iter().map(|(k, _)| k).collect();
		assert_eq!(keys, ["count", "name"]);
	}
}
