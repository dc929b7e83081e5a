use std::path::PathBuf;

use thiserror::Error;

use crate::component::ComponentId;

/// Errors raised by the guard itself, never by guarded callbacks.
#[derive(Error, Debug)]
pub enum GuardError {
	/// The target's revision content could not be read.
	#[error("cannot fingerprint {id}: reading {path:?} failed: {source}")]
	Fingerprint {
		id: ComponentId,
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	/// Degraded reset was requested while the reset policy is `never`.
	#[error("degraded reset is disabled for {id}")]
	ResetDisabled { id: ComponentId },
	/// Configuration text failed to parse.
	#[error("invalid guard configuration: {0}")]
	Config(#[from] toml::de::Error),
	/// Configuration file could not be read.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}
