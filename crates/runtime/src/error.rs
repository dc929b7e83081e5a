use std::path::PathBuf;

use thiserror::Error;
use ward_guard::{ComponentId, GuardError};

/// Errors surfaced by the session host.
#[derive(Error, Debug)]
pub enum RuntimeError {
	#[error("component {0} is not registered")]
	UnknownComponent(ComponentId),
	#[error("no child {0:?} is mounted")]
	UnknownChild(String),
	/// `mount_child` named an id already holding another component type.
	#[error("child {child:?} is a {mounted}, not a {requested}")]
	ChildMismatch {
		child: String,
		mounted: ComponentId,
		requested: ComponentId,
	},
	/// The session's inbox is closed; it was shut down or exhausted its restarts.
	#[error("session {0} is closed")]
	SessionClosed(String),
	/// The session generation ended before answering the request.
	#[error("session {0} was interrupted before replying")]
	Interrupted(String),
	/// A failure escaped every guard and ended the session generation.
	#[error("session {session} faulted: {message}")]
	HostFault { session: String, message: String },
	/// A failure escaped a child's guards; the child was remounted or
	/// unmounted and the session kept running.
	#[error("child {child:?} of session {session} faulted: {message}")]
	ChildFault { session: String, child: String, message: String },
	#[error("invalid runtime configuration in {path:?}: {source}")]
	Config {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	Guard(#[from] GuardError),
	#[error("sessions must be spawned from within a Tokio runtime")]
	NoRuntime,
	#[error("failed to install tracing subscriber: {0}")]
	Logging(String),
}
