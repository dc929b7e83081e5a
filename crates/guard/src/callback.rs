//! Lifecycle callback kinds and hook slots.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::notice::CrashNotice;
use crate::output::Node;
use crate::socket::Socket;
use crate::Assigns;

/// Parameters handed to `initialize`, `refresh` and `params_changed`.
pub type Params = serde_json::Map<String, Value>;

/// Result type returned by user callbacks.
pub type CallbackResult<T = ()> = anyhow::Result<T>;

pub type InitializeFn = Arc<dyn Fn(&Params, &mut Socket) -> CallbackResult + Send + Sync>;
pub type InitializeChildFn = Arc<dyn Fn(&mut Socket) -> CallbackResult + Send + Sync>;
pub type RefreshFn = Arc<dyn Fn(&Params, &mut Socket) -> CallbackResult + Send + Sync>;
pub type ReceiveEventFn = Arc<dyn Fn(&str, &Value, &mut Socket) -> CallbackResult + Send + Sync>;
pub type ReceiveMessageFn = Arc<dyn Fn(&Value, &mut Socket) -> CallbackResult + Send + Sync>;
pub type ParamsChangedFn = Arc<dyn Fn(&Params, &str, &mut Socket) -> CallbackResult + Send + Sync>;
pub type ProduceOutputFn = Arc<dyn Fn(&Assigns) -> CallbackResult<Node> + Send + Sync>;
pub type NoticeFn = Arc<dyn Fn(&CrashNotice, &mut Socket) -> CallbackResult + Send + Sync>;

/// One lifecycle method the host may dispatch into a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Callback {
	/// Top-level creation.
	Initialize,
	/// Creation of a child owned by another instance.
	InitializeChild,
	/// External update pushed into a child.
	Refresh,
	/// User interaction event.
	ReceiveEvent,
	/// Out-of-band message addressed to the instance.
	ReceiveMessage,
	/// Navigation parameters changed.
	ParamsChanged,
	/// Output construction.
	ProduceOutput,
}

bitflags::bitflags! {
	/// A set of declared lifecycle callbacks.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct CallbackSet: u8 {
		const INITIALIZE = 1 << 0;
		const INITIALIZE_CHILD = 1 << 1;
		const REFRESH = 1 << 2;
		const RECEIVE_EVENT = 1 << 3;
		const RECEIVE_MESSAGE = 1 << 4;
		const PARAMS_CHANGED = 1 << 5;
		const PRODUCE_OUTPUT = 1 << 6;
	}
}

impl Callback {
	pub const ALL: [Callback; 7] = [
		Self::Initialize,
		Self::InitializeChild,
		Self::Refresh,
		Self::ReceiveEvent,
		Self::ReceiveMessage,
		Self::ParamsChanged,
		Self::ProduceOutput,
	];

	/// Returns the bitflag for this callback.
	pub const fn as_set(self) -> CallbackSet {
		match self {
			Self::Initialize => CallbackSet::INITIALIZE,
			Self::InitializeChild => CallbackSet::INITIALIZE_CHILD,
			Self::Refresh => CallbackSet::REFRESH,
			Self::ReceiveEvent => CallbackSet::RECEIVE_EVENT,
			Self::ReceiveMessage => CallbackSet::RECEIVE_MESSAGE,
			Self::ParamsChanged => CallbackSet::PARAMS_CHANGED,
			Self::ProduceOutput => CallbackSet::PRODUCE_OUTPUT,
		}
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Initialize => "initialize",
			Self::InitializeChild => "initialize_child",
			Self::Refresh => "refresh",
			Self::ReceiveEvent => "receive_event",
			Self::ReceiveMessage => "receive_message",
			Self::ParamsChanged => "params_changed",
			Self::ProduceOutput => "produce_output",
		}
	}
}

impl fmt::Display for Callback {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// How an instance came into being; a degraded reset re-runs the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Creation {
	/// Mounted by the host through `initialize`.
	Root,
	/// Mounted under a parent through `initialize_child`.
	Child,
}

impl Creation {
	pub const fn callback(self) -> Callback {
		match self {
			Self::Root => Callback::Initialize,
			Self::Child => Callback::InitializeChild,
		}
	}
}

impl CallbackSet {
	/// Iterates the callbacks contained in this set, in declaration order.
	pub fn callbacks(self) -> impl Iterator<Item = Callback> {
		Callback::ALL.into_iter().filter(move |cb| self.contains(cb.as_set()))
	}
}

/// Hook table for one component type.
///
/// Every slot is optional. A populated lifecycle slot is a declared method;
/// `notice` is the owner-side handler for crash notifications and is not
/// part of the declared set.
#[derive(Clone, Default)]
pub struct Hooks {
	pub initialize: Option<InitializeFn>,
	pub initialize_child: Option<InitializeChildFn>,
	pub refresh: Option<RefreshFn>,
	pub receive_event: Option<ReceiveEventFn>,
	pub receive_message: Option<ReceiveMessageFn>,
	pub params_changed: Option<ParamsChangedFn>,
	pub produce_output: Option<ProduceOutputFn>,
	pub notice: Option<NoticeFn>,
}

impl Hooks {
	/// Returns the set of lifecycle callbacks present in this table.
	pub fn declared(&self) -> CallbackSet {
		let mut set = CallbackSet::empty();
		set.set(CallbackSet::INITIALIZE, self.initialize.is_some());
		set.set(CallbackSet::INITIALIZE_CHILD, self.initialize_child.is_some());
		set.set(CallbackSet::REFRESH, self.refresh.is_some());
		set.set(CallbackSet::RECEIVE_EVENT, self.receive_event.is_some());
		set.set(CallbackSet::RECEIVE_MESSAGE, self.receive_message.is_some());
		set.set(CallbackSet::PARAMS_CHANGED, self.params_changed.is_some());
		set.set(CallbackSet::PRODUCE_OUTPUT, self.produce_output.is_some());
		set
	}
}

impl fmt::Debug for Hooks {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Hooks")
			.field("declared", &self.declared())
			.field("notice", &self.notice.is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn declared_reflects_populated_slots() {
		let initialize: InitializeFn = Arc::new(|_: &Params, _: &mut Socket| -> CallbackResult { Ok(()) });
		let receive_event: ReceiveEventFn = Arc::new(|_: &str, _: &Value, _: &mut Socket| -> CallbackResult { Ok(()) });
		let notice: NoticeFn = Arc::new(|_: &CrashNotice, _: &mut Socket| -> CallbackResult { Ok(()) });
		let hooks = Hooks {
			initialize: Some(initialize),
			receive_event: Some(receive_event),
			notice: Some(notice),
			..Hooks::default()
		};
		assert_eq!(hooks.declared(), CallbackSet::INITIALIZE | CallbackSet::RECEIVE_EVENT);
	}

	#[test]
	fn callbacks_iterates_in_declaration_order() {
		let set = CallbackSet::PRODUCE_OUTPUT | CallbackSet::INITIALIZE | CallbackSet::REFRESH;
		let names: Vec<_> = set.callbacks().map(Callback::as_str).collect();
		assert_eq!(names, ["initialize", "refresh", "produce_output"]);
	}
}
