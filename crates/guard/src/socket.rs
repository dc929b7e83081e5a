//! Per-instance handle passed to mutating callbacks.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::Assigns;
use crate::notice::{CrashNotice, NoticeSink};

/// Identity of one running component instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
	/// Allocates a process-unique instance id.
	pub fn next() -> Self {
		static NEXT: AtomicU64 = AtomicU64::new(1);
		Self(NEXT.fetch_add(1, Ordering::Relaxed))
	}

	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for InstanceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "i{}", self.0)
	}
}

/// Severity of a transient user-visible notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashLevel {
	Info,
	Error,
}

/// Transient notice shown once and then discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flash {
	pub level: FlashLevel,
	pub message: String,
}

/// The actor that receives crash notices for an instance.
///
/// For top-level instances this is the session itself; for children it is
/// the session one hop up.
#[derive(Clone)]
pub struct Owner {
	label: Arc<str>,
	sink: Option<Arc<dyn NoticeSink>>,
}

impl Owner {
	pub fn new(label: impl Into<Arc<str>>, sink: Arc<dyn NoticeSink>) -> Self {
		Self {
			label: label.into(),
			sink: Some(sink),
		}
	}

	/// Owner with no inbox; notices are logged and dropped.
	pub fn detached() -> Self {
		Self {
			label: Arc::from("detached"),
			sink: None,
		}
	}

	pub fn label(&self) -> &str {
		&self.label
	}

	/// Sends one notice without blocking. Returns whether it was accepted.
	pub fn notify(&self, notice: CrashNotice) -> bool {
		let Some(sink) = &self.sink else {
			tracing::debug!(owner = %self.label, "ward.guard.notice_detached");
			return false;
		};
		match sink.deliver(notice) {
			Ok(()) => true,
			Err(reason) => {
				tracing::warn!(owner = %self.label, %reason, "ward.guard.notice_dropped");
				false
			}
		}
	}
}

impl fmt::Debug for Owner {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Owner")
			.field("label", &self.label)
			.field("attached", &self.sink.is_some())
			.finish()
	}
}

/// Mutable handle over one instance's state.
#[derive(Debug, Clone)]
pub struct Socket {
	id: InstanceId,
	assigns: Assigns,
	flash: Vec<Flash>,
	owner: Owner,
	crashes: u64,
}

/// Committed state captured before a guarded callback runs.
pub(crate) struct Checkpoint {
	assigns: Assigns,
	flash: Vec<Flash>,
}

impl Socket {
	pub fn new(owner: Owner) -> Self {
		Self {
			id: InstanceId::next(),
			assigns: Assigns::new(),
			flash: Vec::new(),
			owner,
			crashes: 0,
		}
	}

	pub fn id(&self) -> InstanceId {
		self.id
	}

	pub fn assigns(&self) -> &Assigns {
		&self.assigns
	}

	pub fn assigns_mut(&mut self) -> &mut Assigns {
		&mut self.assigns
	}

	/// Shorthand for `assigns_mut().put(..)`.
	pub fn assign(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> &mut Self {
		self.assigns.put(key, value);
		self
	}

	pub fn owner(&self) -> &Owner {
		&self.owner
	}

	pub fn put_flash(&mut self, level: FlashLevel, message: impl Into<String>) {
		self.flash.push(Flash {
			level,
			message: message.into(),
		});
	}

	pub fn flash(&self) -> &[Flash] {
		&self.flash
	}

	/// Drains pending notices; the host calls this once per output pass.
	pub fn take_flash(&mut self) -> Vec<Flash> {
		std::mem::take(&mut self.flash)
	}

	/// Number of failures the guard has caught and recovered on this socket.
	///
	/// Guarded callbacks always report success, so hosts compare this before
	/// and after a call to learn whether its input was rejected.
	pub fn crash_count(&self) -> u64 {
		self.crashes
	}

	pub(crate) fn record_crash(&mut self) {
		self.crashes += 1;
	}

	pub(crate) fn checkpoint(&self) -> Checkpoint {
		Checkpoint {
			assigns: self.assigns.clone(),
			flash: self.flash.clone(),
		}
	}

	pub(crate) fn restore(&mut self, checkpoint: Checkpoint) {
		self.assigns = checkpoint.assigns;
		self.flash = checkpoint.flash;
	}
}
