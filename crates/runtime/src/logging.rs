use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::RuntimeError;
use crate::journal::CrashJournal;

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "WARD_LOG";

const DEFAULT_FILTER: &str = "ward_guard=info,ward_runtime=info";

/// Installs the global subscriber: formatted output filtered by [`LOG_ENV`],
/// plus `journal` when given.
pub fn init(journal: Option<CrashJournal>) -> Result<(), RuntimeError> {
	let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
	tracing_subscriber::registry()
		.with(filter)
		.with(tracing_subscriber::fmt::layer().with_target(true))
		.with(journal)
		.try_init()
		.map_err(|err| RuntimeError::Logging(err.to_string()))
}
