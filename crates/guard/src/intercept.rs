//! Callback interceptor generator.
//!
//! [`protect`] turns a component type into an equivalent one whose declared
//! callbacks are replaced by guarded versions. Undeclared callbacks stay
//! undeclared. The guarded callbacks keep the original signatures and always
//! report success to the host; recovery follows [`crate::crash::recovery_for`].

use std::sync::Arc;

use crate::boundary::EagerBoundary;
use crate::callback::{
	Callback, CallbackResult, Creation, Hooks, InitializeChildFn, InitializeFn, NoticeFn, ParamsChangedFn, ProduceOutputFn, ReceiveEventFn,
	ReceiveMessageFn, RefreshFn,
};
use crate::component::{ComponentDef, ComponentId};
use crate::config::{DegradedReset, GuardConfig, RenderGuard};
use crate::crash::{Crash, catch};
use crate::notice::{CrashNotice, default_notice_handler};
use crate::output::Node;
use crate::socket::Socket;
use crate::{Assigns, ErrorState, GuardError, Params};

/// Whether a transient failure notifies the owner.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Notify {
	Owner,
	Suppressed,
}

/// Runs `f` against the socket; on failure restores the committed state and marks the instance degraded.
fn guard_initialize(id: &ComponentId, callback: Callback, socket: &mut Socket, f: impl FnOnce(&mut Socket) -> CallbackResult) {
	let checkpoint = socket.checkpoint();
	if let Err(failure) = catch(|| f(socket)) {
		Crash::classify(id, Some(socket.id()), callback, &failure).log();
		socket.restore(checkpoint);
		socket.record_crash();
		socket.assigns_mut().set_error_state(ErrorState { degraded: true });
	}
}

/// Runs `f` against the socket; on failure restores the committed state and notifies the owner once.
fn guard_transient(
	id: &ComponentId,
	callback: Callback,
	notice: &str,
	notify: Notify,
	socket: &mut Socket,
	f: impl FnOnce(&mut Socket) -> CallbackResult,
) {
	let checkpoint = socket.checkpoint();
	if let Err(failure) = catch(|| f(socket)) {
		Crash::classify(id, Some(socket.id()), callback, &failure).log();
		socket.restore(checkpoint);
		socket.record_crash();
		if notify == Notify::Owner {
			socket.owner().notify(CrashNotice::new(notice));
		}
	}
}

fn guard_output(id: &ComponentId, render: RenderGuard, assigns: &Assigns, f: &ProduceOutputFn) -> CallbackResult<Node> {
	if assigns.is_degraded() {
		return Ok(Node::fallback());
	}
	match render {
		RenderGuard::Passthrough => f(assigns),
		RenderGuard::BestEffort => match catch(|| f(assigns)) {
			Ok(node) => Ok(node),
			Err(failure) => {
				Crash::classify(id, None, Callback::ProduceOutput, &failure).log();
				Ok(Node::fallback())
			}
		},
		RenderGuard::Eager => Ok(EagerBoundary::new(id.clone()).render(|| f(assigns))),
	}
}

/// Builds the guarded equivalent of `def`.
///
/// Already guarded types are returned unchanged. A notice handler is always
/// installed: the type's own when it defines one, otherwise
/// [`default_notice_handler`].
pub fn protect(def: &ComponentDef, config: &GuardConfig) -> ComponentDef {
	if def.is_guarded() {
		return def.clone();
	}
	let id = def.id();
	let source = def.hooks();
	let notice: Arc<str> = Arc::from(config.notice_message.as_str());

	let initialize = source.initialize.clone().map(|orig| -> InitializeFn {
		let id = id.clone();
		Arc::new(move |params: &Params, socket: &mut Socket| -> CallbackResult {
			guard_initialize(&id, Callback::Initialize, socket, |s| orig(params, s));
			Ok(())
		})
	});

	let initialize_child = source.initialize_child.clone().map(|orig| -> InitializeChildFn {
		let id = id.clone();
		Arc::new(move |socket: &mut Socket| -> CallbackResult {
			guard_initialize(&id, Callback::InitializeChild, socket, |s| orig(s));
			Ok(())
		})
	});

	let refresh = source.refresh.clone().map(|orig| -> RefreshFn {
		let (id, notice) = (id.clone(), Arc::clone(&notice));
		Arc::new(move |params: &Params, socket: &mut Socket| -> CallbackResult {
			guard_transient(&id, Callback::Refresh, &notice, Notify::Owner, socket, |s| orig(params, s));
			Ok(())
		})
	});

	let receive_event = source.receive_event.clone().map(|orig| -> ReceiveEventFn {
		let (id, notice) = (id.clone(), Arc::clone(&notice));
		Arc::new(move |event: &str, payload: &serde_json::Value, socket: &mut Socket| -> CallbackResult {
			guard_transient(&id, Callback::ReceiveEvent, &notice, Notify::Owner, socket, |s| orig(event, payload, s));
			Ok(())
		})
	});

	let receive_message = source.receive_message.clone().map(|orig| -> ReceiveMessageFn {
		let (id, notice) = (id.clone(), Arc::clone(&notice));
		Arc::new(move |message: &serde_json::Value, socket: &mut Socket| -> CallbackResult {
			guard_transient(&id, Callback::ReceiveMessage, &notice, Notify::Owner, socket, |s| orig(message, s));
			Ok(())
		})
	});

	let params_changed = source.params_changed.clone().map(|orig| -> ParamsChangedFn {
		let (id, notice) = (id.clone(), Arc::clone(&notice));
		Arc::new(move |params: &Params, uri: &str, socket: &mut Socket| -> CallbackResult {
			guard_transient(&id, Callback::ParamsChanged, &notice, Notify::Owner, socket, |s| orig(params, uri, s));
			Ok(())
		})
	});

	let produce_output = source.produce_output.clone().map(|orig| -> ProduceOutputFn {
		let (id, render) = (id.clone(), config.render);
		Arc::new(move |assigns: &Assigns| guard_output(&id, render, assigns, &orig))
	});

	// A failing notice handler must not produce another notice.
	let notice_handler: NoticeFn = {
		let orig = source.notice.clone().unwrap_or_else(default_notice_handler);
		let (id, notice) = (id.clone(), Arc::clone(&notice));
		Arc::new(move |crash_notice: &CrashNotice, socket: &mut Socket| -> CallbackResult {
			guard_transient(&id, Callback::ReceiveMessage, &notice, Notify::Suppressed, socket, |s| orig(crash_notice, s));
			Ok(())
		})
	};

	let hooks = Hooks {
		initialize,
		initialize_child,
		refresh,
		receive_event,
		receive_message,
		params_changed,
		produce_output,
		notice: Some(notice_handler),
	};
	tracing::trace!(component = %id, declared = ?hooks.declared(), "ward.guard.protect");
	ComponentDef::from_parts(id.clone(), def.revision().clone(), hooks, true)
}

/// Clears a degraded instance and re-runs the callback it was created with.
///
/// Only permitted under [`DegradedReset::Explicit`]; the guard never clears
/// the flag on its own. Returns whether the instance is healthy afterwards.
pub fn reset_degraded(
	def: &ComponentDef,
	creation: Creation,
	params: &Params,
	socket: &mut Socket,
	config: &GuardConfig,
) -> Result<bool, GuardError> {
	if config.degraded_reset == DegradedReset::Never {
		return Err(GuardError::ResetDisabled { id: def.id().clone() });
	}
	if !socket.assigns().is_degraded() {
		return Ok(true);
	}
	socket.assigns_mut().set_error_state(ErrorState::default());
	let hooks = def.hooks();
	match creation {
		Creation::Root => {
			if let Some(init) = &hooks.initialize {
				guard_initialize(def.id(), Callback::Initialize, socket, |s| init(params, s));
			}
		}
		Creation::Child => {
			if let Some(init) = &hooks.initialize_child {
				guard_initialize(def.id(), Callback::InitializeChild, socket, |s| init(s));
			}
		}
	}
	tracing::info!(
		component = %def.id(),
		instance = %socket.id(),
		via = %creation.callback(),
		degraded = socket.assigns().is_degraded(),
		"ward.guard.reset"
	);
	Ok(!socket.assigns().is_degraded())
}

#[cfg(test)]
mod tests;
