//! Runtime configuration file.
//!
//! ```toml
//! [guard]
//! render = "eager"
//! degraded_reset = "explicit"
//!
//! [session]
//! inbox_capacity = 64
//! max_restarts = 3
//! restart_backoff_ms = 50
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ward_guard::GuardConfig;

use crate::RuntimeError;
use crate::supervisor::RestartPolicy;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
	pub guard: GuardConfig,
	pub session: SessionConfig,
}

/// Per-session sizing and supervision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
	/// Bounded inbox size; senders wait for space, crash notices are dropped when full.
	pub inbox_capacity: usize,
	pub event_buffer: usize,
	/// Remounts allowed after faults. Zero disables supervision restarts.
	pub max_restarts: usize,
	pub restart_backoff_ms: u64,
	/// Crash records retained by the journal.
	pub journal_capacity: usize,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			inbox_capacity: 64,
			event_buffer: 64,
			max_restarts: 3,
			restart_backoff_ms: 50,
			journal_capacity: 256,
		}
	}
}

impl SessionConfig {
	pub fn restart_policy(&self) -> RestartPolicy {
		if self.max_restarts == 0 {
			return RestartPolicy::Never;
		}
		RestartPolicy::OnFailure {
			max_restarts: self.max_restarts,
			backoff: Duration::from_millis(self.restart_backoff_ms),
		}
	}
}

impl RuntimeConfig {
	/// Loads the configuration file. A missing file yields defaults.
	pub fn load(path: &Path) -> Result<Self, RuntimeError> {
		let text = match std::fs::read_to_string(path) {
			Ok(text) => text,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
				tracing::debug!(path = %path.display(), "ward.config.default");
				return Ok(Self::default());
			}
			Err(err) => return Err(err.into()),
		};
		let config = toml::from_str(&text).map_err(|source| RuntimeError::Config {
			path: path.to_path_buf(),
			source,
		})?;
		tracing::debug!(path = %path.display(), "ward.config.loaded");
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use pretty_assertions::assert_eq;
	use ward_guard::{DegradedReset, RenderGuard};

	use super::*;

	#[test]
	fn missing_file_yields_defaults() {
		let dir = tempfile::tempdir().expect("tempdir");
		let config = RuntimeConfig::load(&dir.path().join("ward.toml")).expect("load");
		assert_eq!(config, RuntimeConfig::default());
	}

	#[test]
	fn partial_tables_keep_defaults() {
		let mut file = tempfile::NamedTempFile::new().expect("tempfile");
		writeln!(file, "[guard]\nrender = \"eager\"\n\n[session]\nmax_restarts = 0").expect("write");

		let config = RuntimeConfig::load(file.path()).expect("load");
		assert_eq!(config.guard.render, RenderGuard::Eager);
		assert_eq!(config.guard.degraded_reset, DegradedReset::Never);
		assert_eq!(config.session.inbox_capacity, 64);
		assert!(matches!(config.session.restart_policy(), RestartPolicy::Never));
	}

	#[test]
	fn unknown_keys_are_rejected() {
		let mut file = tempfile::NamedTempFile::new().expect("tempfile");
		writeln!(file, "[session]\nworkers = 4").expect("write");
		let err = RuntimeConfig::load(file.path()).expect_err("unknown key");
		assert!(matches!(err, RuntimeError::Config { .. }));
	}
}
