//! Integrator-facing guard configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::GuardError;

/// How `produce_output` is protected on healthy instances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderGuard {
	/// Catch failures raised while `produce_output` runs; deferred parts stay
	/// uncovered.
	#[default]
	BestEffort,
	/// Only the degraded check applies; failures reach the host.
	Passthrough,
	/// Wrap every output in an eager evaluation boundary.
	Eager,
}

/// Whether a degraded instance may ever be reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReset {
	#[default]
	Never,
	/// The host may clear the flag and re-run `initialize` on request.
	Explicit,
}

pub const DEFAULT_NOTICE_MESSAGE: &str = "Something went wrong. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardConfig {
	pub render: RenderGuard,
	pub degraded_reset: DegradedReset,
	pub notice_message: String,
}

impl Default for GuardConfig {
	fn default() -> Self {
		Self {
			render: RenderGuard::default(),
			degraded_reset: DegradedReset::default(),
			notice_message: DEFAULT_NOTICE_MESSAGE.to_string(),
		}
	}
}

impl GuardConfig {
	pub fn from_toml_str(text: &str) -> Result<Self, GuardError> {
		Ok(toml::from_str(text)?)
	}

	pub fn load(path: &Path) -> Result<Self, GuardError> {
		Self::from_toml_str(&std::fs::read_to_string(path)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_document_yields_defaults() {
		assert_eq!(GuardConfig::from_toml_str("").expect("parse"), GuardConfig::default());
	}

	#[test]
	fn parses_all_fields() {
		let cfg = GuardConfig::from_toml_str(
			r#"
			render = "eager"
			degraded_reset = "explicit"
			notice_message = "Oops"
			"#,
		)
		.expect("parse");
		assert_eq!(cfg.render, RenderGuard::Eager);
		assert_eq!(cfg.degraded_reset, DegradedReset::Explicit);
		assert_eq!(cfg.notice_message, "Oops");
	}

	#[test]
	fn rejects_unknown_fields() {
		assert!(matches!(GuardConfig::from_toml_str("retry = true"), Err(GuardError::Config(_))));
	}
}
