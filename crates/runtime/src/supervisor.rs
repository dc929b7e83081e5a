//! Session supervision.
//!
//! Each session runs as a sequence of generations. A generation ends with a
//! [`SessionExit`]; failures that escaped the component guards (`HostFault`,
//! `Panicked`) remount the session under [`RestartPolicy::OnFailure`], every
//! other exit is final.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use ward_guard::crash::panic_message;

use crate::session::SessionEvent;

/// Exit classification of one session generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SessionExitKind {
	/// Stopped on request after draining queued commands.
	Stopped,
	InboxClosed,
	Cancelled,
	/// A failure escaped the guards and was reported by the host.
	HostFault,
	/// The generation task unwound.
	Panicked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionExit {
	kind: SessionExitKind,
	message: Option<String>,
}

impl SessionExit {
	pub(crate) fn new(kind: SessionExitKind) -> Self {
		Self { kind, message: None }
	}

	pub(crate) fn with_message(kind: SessionExitKind, message: impl Into<String>) -> Self {
		Self {
			kind,
			message: Some(message.into()),
		}
	}

	pub fn kind(&self) -> SessionExitKind {
		self.kind
	}

	pub fn message(&self) -> Option<&str> {
		self.message.as_deref()
	}

	pub fn is_failure(&self) -> bool {
		matches!(self.kind, SessionExitKind::HostFault | SessionExitKind::Panicked)
	}
}

/// Remount policy applied after failed generations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartPolicy {
	Never,
	OnFailure { max_restarts: usize, backoff: Duration },
}

impl RestartPolicy {
	/// Whether one more remount fits after `restarts` so far.
	pub(crate) fn allows(&self, restarts: usize) -> bool {
		match self {
			Self::Never => false,
			Self::OnFailure { max_restarts, .. } => restarts < *max_restarts,
		}
	}

	fn restart_delay(&self, exit: &SessionExit, restarts: usize) -> Option<Duration> {
		match self {
			Self::Never => None,
			Self::OnFailure { backoff, .. } => (exit.is_failure() && self.allows(restarts)).then_some(*backoff),
		}
	}
}

/// One mounted generation of a session.
#[derive(Debug, Clone)]
pub(crate) struct Generation {
	/// Starts at 1 and increases on every remount.
	pub number: u64,
	/// Child of the session token; cancelled with the session.
	pub cancel: CancellationToken,
}

/// Counters shared between the supervisor task and the session handle.
#[derive(Debug, Default)]
pub(crate) struct SupervisorState {
	generation: AtomicU64,
	restarts: AtomicUsize,
	last_exit: Mutex<Option<SessionExit>>,
}

impl SupervisorState {
	pub fn generation(&self) -> u64 {
		self.generation.load(Ordering::Acquire)
	}

	pub fn restarts(&self) -> usize {
		self.restarts.load(Ordering::Acquire)
	}

	pub fn last_exit(&self) -> Option<SessionExit> {
		self.last_exit.lock().clone()
	}

	fn record(&self, exit: SessionExit) {
		*self.last_exit.lock() = Some(exit);
	}
}

pub(crate) struct Supervised<F, D> {
	pub name: Arc<str>,
	pub policy: RestartPolicy,
	pub cancel: CancellationToken,
	pub state: Arc<SupervisorState>,
	pub events: broadcast::Sender<SessionEvent>,
	/// Runs one generation to completion.
	pub mount: F,
	/// Called once after the final generation.
	pub on_finish: D,
}

/// Spawns the supervision loop. Must be called from within a Tokio runtime.
pub(crate) fn spawn_supervisor<F, Fut, D>(spec: Supervised<F, D>) -> JoinHandle<()>
where
	F: FnMut(Generation) -> Fut + Send + 'static,
	Fut: Future<Output = SessionExit> + Send + 'static,
	D: FnOnce() + Send + 'static,
{
	let Supervised {
		name,
		policy,
		cancel,
		state,
		events,
		mut mount,
		on_finish,
	} = spec;

	tokio::spawn(async move {
		let mut restarts = 0usize;
		loop {
			if cancel.is_cancelled() {
				state.record(SessionExit::new(SessionExitKind::Cancelled));
				break;
			}

			let generation = state.generation.fetch_add(1, Ordering::AcqRel) + 1;
			let mounted = mount(Generation {
				number: generation,
				cancel: cancel.child_token(),
			});
			let exit = match tokio::spawn(mounted).await {
				Ok(exit) => exit,
				Err(err) if err.is_panic() => SessionExit::with_message(SessionExitKind::Panicked, panic_message(err.into_panic().as_ref())),
				Err(err) if err.is_cancelled() => SessionExit::new(SessionExitKind::Cancelled),
				Err(err) => SessionExit::with_message(SessionExitKind::HostFault, err.to_string()),
			};

			tracing::debug!(
				session = %name,
				generation,
				restarts,
				kind = ?exit.kind(),
				detail = exit.message().unwrap_or_default(),
				"ward.session.exit"
			);
			state.record(exit.clone());
			let _ = events.send(SessionEvent::Exited {
				generation,
				exit: exit.clone(),
			});

			if cancel.is_cancelled() {
				break;
			}
			let Some(backoff) = policy.restart_delay(&exit, restarts) else {
				if exit.is_failure() {
					tracing::warn!(session = %name, generation, restarts, "ward.session.gave_up");
				}
				break;
			};

			restarts += 1;
			state.restarts.store(restarts, Ordering::Release);
			tracing::info!(session = %name, generation, restarts, "ward.session.remount");
			if backoff > Duration::ZERO {
				tokio::select! {
					_ = cancel.cancelled() => break,
					_ = tokio::time::sleep(backoff) => {}
				}
			}
		}
		on_finish();
	})
}
