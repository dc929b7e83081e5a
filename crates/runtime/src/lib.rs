//! Supervised session host for guarded components.
//!
//! * [`ComponentRegistry`] protects component types as they are registered
//!   and proxies third-party types on lookup.
//! * [`spawn_session`] runs a root instance and its children in one actor
//!   with a bounded inbox. Crash notices from any hosted instance come back
//!   through that inbox to the root.
//! * A failure that escapes the root's guards ends the session generation;
//!   the supervisor remounts it per [`RestartPolicy`]. One that escapes a
//!   child's guards only remounts that child, under the same budget.
//! * [`logging::init`] and [`CrashJournal`] carry the crash log.

mod config;
mod error;
mod handle;
mod inbox;
mod instance;
pub mod journal;
pub mod logging;
mod registry;
mod session;
mod supervisor;

pub use config::{RuntimeConfig, SessionConfig};
pub use error::RuntimeError;
pub use handle::SessionHandle;
pub use journal::{CrashJournal, CrashRecord};
pub use registry::ComponentRegistry;
pub use session::{Frame, SessionEvent, SessionSpec, Target, spawn_session};
pub use supervisor::{RestartPolicy, SessionExit, SessionExitKind};
