//! Dynamic proxy factory.
//!
//! Retrofits protection onto component types the integrator does not
//! control, at the point where they are instantiated by reference.
//!
//! # Resolution
//!
//! 1. A guarded target is returned unchanged.
//! 2. The target's current fingerprint is computed.
//! 3. A cached proxy built from that fingerprint is reused.
//! 4. Otherwise a proxy is synthesized: one forwarding hook per callback the
//!    target actually declares, then [`crate::protect`] over the result. The
//!    new entry replaces whatever the cache held for the target.
//!
//! Synthesis is a pure function of the target definition, so racing callers
//! may each build a proxy without coordination; none waits on another.
//!
//! A target that declares no callbacks gets an empty proxy: nothing to
//! forward, but it still carries the protection marker and the default
//! notice handler. Fingerprint failures are returned to the caller; the
//! unprotected target is never handed back in their place.

use std::sync::Arc;

use serde_json::Value;

mod cache;

pub use cache::{ProxyCache, ProxyEntry};

use crate::callback::{
	CallbackResult, Hooks, InitializeChildFn, InitializeFn, NoticeFn, ParamsChangedFn, ProduceOutputFn, ReceiveEventFn, ReceiveMessageFn,
	RefreshFn,
};
use crate::component::{ComponentDef, Revision};
use crate::config::GuardConfig;
use crate::intercept::protect;
use crate::notice::CrashNotice;
use crate::socket::Socket;
use crate::{Assigns, GuardError, Params};

#[derive(Debug, Clone)]
pub struct ProxyFactory {
	cache: Arc<ProxyCache>,
	config: GuardConfig,
}

impl ProxyFactory {
	/// Creates a factory backed by the process-wide cache.
	pub fn new(config: GuardConfig) -> Self {
		Self::with_cache(Arc::clone(ProxyCache::global()), config)
	}

	pub fn with_cache(cache: Arc<ProxyCache>, config: GuardConfig) -> Self {
		Self { cache, config }
	}

	pub fn cache(&self) -> &Arc<ProxyCache> {
		&self.cache
	}

	/// Returns a guarded stand-in for `target`.
	pub fn resolve(&self, target: &Arc<ComponentDef>) -> Result<Arc<ComponentDef>, GuardError> {
		if target.is_guarded() {
			return Ok(Arc::clone(target));
		}
		let id = target.id();
		let fingerprint = target.fingerprint()?;
		if let Some(proxy) = self.cache.lookup(id, fingerprint) {
			tracing::trace!(component = %id, %fingerprint, "ward.proxy.hit");
			return Ok(proxy);
		}

		let proxy = Arc::new(protect(&synthesize(target), &self.config));
		let superseded = self.cache.publish(
			id.clone(),
			Arc::new(ProxyEntry {
				fingerprint,
				proxy: Arc::clone(&proxy),
			}),
		);
		tracing::debug!(
			component = %id,
			%fingerprint,
			declared = ?proxy.declared(),
			superseded = superseded.map(|prev| prev.fingerprint.to_string()),
			"ward.proxy.synthesized"
		);
		Ok(proxy)
	}
}

/// Builds an unguarded type that forwards every declared callback to `target`.
fn synthesize(target: &ComponentDef) -> ComponentDef {
	let hooks = target.hooks();

	let forward = Hooks {
		initialize: hooks.initialize.as_ref().map(|f| -> InitializeFn {
			let f = Arc::clone(f);
			Arc::new(move |params: &Params, socket: &mut Socket| -> CallbackResult { f(params, socket) })
		}),
		initialize_child: hooks.initialize_child.as_ref().map(|f| -> InitializeChildFn {
			let f = Arc::clone(f);
			Arc::new(move |socket: &mut Socket| -> CallbackResult { f(socket) })
		}),
		refresh: hooks.refresh.as_ref().map(|f| -> RefreshFn {
			let f = Arc::clone(f);
			Arc::new(move |params: &Params, socket: &mut Socket| -> CallbackResult { f(params, socket) })
		}),
		receive_event: hooks.receive_event.as_ref().map(|f| -> ReceiveEventFn {
			let f = Arc::clone(f);
			Arc::new(move |event: &str, payload: &Value, socket: &mut Socket| -> CallbackResult { f(event, payload, socket) })
		}),
		receive_message: hooks.receive_message.as_ref().map(|f| -> ReceiveMessageFn {
			let f = Arc::clone(f);
			Arc::new(move |message: &Value, socket: &mut Socket| -> CallbackResult { f(message, socket) })
		}),
		params_changed: hooks.params_changed.as_ref().map(|f| -> ParamsChangedFn {
			let f = Arc::clone(f);
			Arc::new(move |params: &Params, uri: &str, socket: &mut Socket| -> CallbackResult { f(params, uri, socket) })
		}),
		produce_output: hooks.produce_output.as_ref().map(|f| -> ProduceOutputFn {
			let f = Arc::clone(f);
			Arc::new(move |assigns: &Assigns| f(assigns))
		}),
		notice: hooks.notice.as_ref().map(|f| -> NoticeFn {
			let f = Arc::clone(f);
			Arc::new(move |notice: &CrashNotice, socket: &mut Socket| -> CallbackResult { f(notice, socket) })
		}),
	};

	let revision = Revision::Static(format!("proxy:{}", target.id()).into());
	ComponentDef::from_parts(target.id().clone(), revision, forward, false)
}

#[cfg(test)]
mod tests;
