//! One hosted component instance.
//!
//! Callbacks are invoked exactly as the host would invoke any component: the
//! definitions handed in are already guarded, so an `Err` coming back from
//! one of them means a failure escaped protection.

use std::sync::Arc;

use serde_json::Value;
use ward_guard::{
	Assigns, ComponentDef, ComponentId, Creation, Delivery, Flash, GuardConfig, GuardError, Node, Owner, Params, Socket, reset_degraded,
};

pub(crate) struct Instance {
	def: Arc<ComponentDef>,
	creation: Creation,
	socket: Socket,
	/// Params of the last update the component accepted.
	params: Params,
}

impl Instance {
	/// Mounts a top-level instance through `initialize`.
	pub fn mount_root(def: Arc<ComponentDef>, params: Params, owner: Owner) -> anyhow::Result<Self> {
		let mut socket = Socket::new(owner);
		if let Some(init) = &def.hooks().initialize {
			init(&params, &mut socket)?;
		}
		tracing::debug!(component = %def.id(), instance = %socket.id(), degraded = socket.assigns().is_degraded(), "ward.instance.mount");
		Ok(Self {
			def,
			creation: Creation::Root,
			socket,
			params,
		})
	}

	/// Mounts a child through `initialize_child`, then pushes `params` through `refresh`.
	pub fn mount_child(def: Arc<ComponentDef>, params: Params, owner: Owner) -> anyhow::Result<Self> {
		let mut socket = Socket::new(owner);
		if let Some(init) = &def.hooks().initialize_child {
			init(&mut socket)?;
		}
		let mut child = Self {
			def,
			creation: Creation::Child,
			socket,
			params: Params::new(),
		};
		child.refresh(params)?;
		tracing::debug!(component = %child.def.id(), instance = %child.socket.id(), degraded = child.is_degraded(), "ward.instance.mount_child");
		Ok(child)
	}

	pub fn component(&self) -> &ComponentId {
		self.def.id()
	}

	pub fn params(&self) -> &Params {
		&self.params
	}

	pub fn assigns(&self) -> &Assigns {
		self.socket.assigns()
	}

	pub fn is_degraded(&self) -> bool {
		self.socket.assigns().is_degraded()
	}

	pub fn take_flash(&mut self) -> Vec<Flash> {
		self.socket.take_flash()
	}

	/// Returns whether the component declares `receive_event`.
	pub fn event(&mut self, event: &str, payload: &Value) -> anyhow::Result<bool> {
		let Some(handler) = &self.def.hooks().receive_event else {
			tracing::debug!(component = %self.def.id(), event, "ward.instance.event_unhandled");
			return Ok(false);
		};
		handler(event, payload, &mut self.socket)?;
		Ok(true)
	}

	pub fn message(&mut self, message: &Value) -> anyhow::Result<Delivery> {
		self.def.deliver_message(message, &mut self.socket)
	}

	pub fn params_changed(&mut self, params: Params, uri: &str) -> anyhow::Result<bool> {
		let Some(handler) = &self.def.hooks().params_changed else {
			self.params = params;
			return Ok(false);
		};
		let crashes = self.socket.crash_count();
		handler(&params, uri, &mut self.socket)?;
		self.commit(params, crashes);
		Ok(true)
	}

	pub fn refresh(&mut self, params: Params) -> anyhow::Result<bool> {
		let Some(handler) = &self.def.hooks().refresh else {
			self.params = params;
			return Ok(false);
		};
		let crashes = self.socket.crash_count();
		handler(&params, &mut self.socket)?;
		self.commit(params, crashes);
		Ok(true)
	}

	/// Keeps `params` only if the guard recorded no crash since `crashes`.
	fn commit(&mut self, params: Params, crashes: u64) {
		if self.socket.crash_count() == crashes {
			self.params = params;
		} else {
			tracing::debug!(component = %self.def.id(), instance = %self.socket.id(), "ward.instance.params_rejected");
		}
	}

	/// Calls `produce_output`; an instance without one renders nothing.
	pub fn output(&self) -> anyhow::Result<Node> {
		match &self.def.hooks().produce_output {
			Some(render) => render(self.socket.assigns()),
			None => Ok(Node::Fragment(Vec::new())),
		}
	}

	/// Clears the degraded flag and re-runs creation the way the instance was
	/// mounted, with the last accepted params. A child is refreshed afterwards,
	/// as on mount; an `Err` from that refresh escaped the guard.
	pub fn reset(&mut self, config: &GuardConfig) -> Result<anyhow::Result<bool>, GuardError> {
		let healthy = reset_degraded(&self.def, self.creation, &self.params, &mut self.socket, config)?;
		if !healthy || self.creation == Creation::Root {
			return Ok(Ok(healthy));
		}
		let params = self.params.clone();
		Ok(self.refresh(params).map(|_| !self.is_degraded()))
	}
}
