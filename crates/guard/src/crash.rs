//! Crash classification and the recovery policy table.
//!
//! | Callback | Kind | Recovery |
//! |---|---|---|
//! | `initialize`, `initialize_child` | [`CrashKind::InitializeCrash`] | [`Recovery::MarkDegraded`] |
//! | `refresh`, `receive_event`, `receive_message`, `params_changed` | [`CrashKind::TransientCallbackCrash`] | [`Recovery::RollbackAndNotify`] |
//! | `produce_output` | [`CrashKind::RenderBoundaryCrash`] | [`Recovery::RenderFallback`] |
//!
//! [`CrashKind::UnprotectedDeferredCrash`] has no row: failures in deferred
//! output outside an [`crate::EagerBoundary`] are never caught here.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe, catch_unwind};
use std::sync::Once;

use crate::callback::{Callback, CallbackResult};
use crate::component::ComponentId;
use crate::socket::InstanceId;

/// Failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrashKind {
	InitializeCrash,
	TransientCallbackCrash,
	RenderBoundaryCrash,
	UnprotectedDeferredCrash,
}

/// Action applied after a crash has been logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recovery {
	RenderFallback,
	MarkDegraded,
	RollbackAndNotify,
}

/// Maps a callback kind to its crash classification.
pub const fn classify(callback: Callback) -> CrashKind {
	match callback {
		Callback::Initialize | Callback::InitializeChild => CrashKind::InitializeCrash,
		Callback::Refresh | Callback::ReceiveEvent | Callback::ReceiveMessage | Callback::ParamsChanged => CrashKind::TransientCallbackCrash,
		Callback::ProduceOutput => CrashKind::RenderBoundaryCrash,
	}
}

/// The recovery policy table.
pub const fn recovery_for(callback: Callback) -> Recovery {
	match classify(callback) {
		CrashKind::InitializeCrash => Recovery::MarkDegraded,
		CrashKind::TransientCallbackCrash => Recovery::RollbackAndNotify,
		CrashKind::RenderBoundaryCrash | CrashKind::UnprotectedDeferredCrash => Recovery::RenderFallback,
	}
}

/// How a guarded call failed.
#[derive(Debug)]
pub enum Failure {
	Error(anyhow::Error),
	Panic { message: String, backtrace: Backtrace },
}

impl Failure {
	pub fn description(&self) -> String {
		match self {
			Self::Error(err) => format!("{err:#}"),
			Self::Panic { message, .. } => format!("panic: {message}"),
		}
	}

	pub fn backtrace(&self) -> String {
		let bt = match self {
			Self::Error(err) => err.backtrace(),
			Self::Panic { backtrace, .. } => backtrace,
		};
		match bt.status() {
			BacktraceStatus::Captured => bt.to_string(),
			_ => "<backtrace disabled; set RUST_BACKTRACE=1>".to_string(),
		}
	}
}

impl fmt::Display for Failure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.description())
	}
}

/// Extracts a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&'static str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"non-string panic payload".to_string()
	}
}

thread_local! {
	/// Number of [`catch`] frames active on this thread.
	static GUARDED: Cell<usize> = const { Cell::new(0) };
	/// Stack captured by the panic hook for the innermost [`catch`].
	static PANIC_TRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// Chains a hook in front of the current panic hook that records the stack
/// of panics raised under [`catch`]. Panics elsewhere only pay a counter read.
fn install_panic_hook() {
	static HOOK: Once = Once::new();
	HOOK.call_once(|| {
		let previous = panic::take_hook();
		panic::set_hook(Box::new(move |info| {
			if GUARDED.with(Cell::get) > 0 {
				PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(Backtrace::force_capture()));
			}
			previous(info);
		}));
	});
}

/// Marks the current thread as running guarded code until dropped.
struct GuardedScope;

impl GuardedScope {
	fn enter() -> Self {
		GUARDED.with(|depth| depth.set(depth.get() + 1));
		Self
	}
}

impl Drop for GuardedScope {
	fn drop(&mut self) {
		GUARDED.with(|depth| depth.set(depth.get().saturating_sub(1)));
	}
}

/// Runs `f`, converting both `Err` returns and panics into [`Failure`].
///
/// A panic's backtrace is the stack at the panic site, not at this catch.
pub fn catch<T>(f: impl FnOnce() -> CallbackResult<T>) -> Result<T, Failure> {
	install_panic_hook();
	let outcome = {
		let _scope = GuardedScope::enter();
		catch_unwind(AssertUnwindSafe(f))
	};
	match outcome {
		Ok(Ok(value)) => Ok(value),
		Ok(Err(err)) => Err(Failure::Error(err)),
		Err(payload) => Err(Failure::Panic {
			message: panic_message(payload.as_ref()),
			backtrace: PANIC_TRACE.with(|slot| slot.borrow_mut().take()).unwrap_or_else(Backtrace::capture),
		}),
	}
}

/// A caught crash with its diagnostic context.
#[derive(Debug)]
pub struct Crash<'a> {
	pub component: &'a ComponentId,
	pub instance: Option<InstanceId>,
	pub callback: Callback,
	pub kind: CrashKind,
	pub recovery: Recovery,
	pub failure: &'a Failure,
}

impl<'a> Crash<'a> {
	/// Classifies a failure of `callback` through the policy table.
	pub fn classify(component: &'a ComponentId, instance: Option<InstanceId>, callback: Callback, failure: &'a Failure) -> Self {
		Self {
			component,
			instance,
			callback,
			kind: classify(callback),
			recovery: recovery_for(callback),
			failure,
		}
	}

	/// Crash caught by an eager evaluation boundary.
	pub fn boundary(component: &'a ComponentId, failure: &'a Failure) -> Self {
		Self {
			component,
			instance: None,
			callback: Callback::ProduceOutput,
			kind: CrashKind::RenderBoundaryCrash,
			recovery: Recovery::RenderFallback,
			failure,
		}
	}

	/// Emits the crash record. Always called before recovery is applied.
	pub fn log(&self) {
		let instance = self.instance.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string());
		tracing::error!(
			component = %self.component,
			instance = %instance,
			callback = %self.callback,
			kind = ?self.kind,
			recovery = ?self.recovery,
			error = %self.failure.description(),
			backtrace = %self.failure.backtrace(),
			"ward.guard.crash"
		);
	}
}
