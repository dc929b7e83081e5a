//! Component type definitions.

use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use xxhash_rust::xxh3::Xxh3;

use crate::GuardError;
use crate::callback::{CallbackResult, CallbackSet, Hooks, Params};
use crate::notice::CrashNotice;
use crate::output::Node;
use crate::socket::Socket;
use crate::Assigns;

/// Stable identity of a component type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(Arc<str>);

impl ComponentId {
	pub fn new(id: impl Into<Arc<str>>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ComponentId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ComponentId {
	fn from(id: &str) -> Self {
		Self::new(id)
	}
}

/// Content a fingerprint is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Revision {
	/// Revision string baked into the definition.
	Static(Cow<'static, str>),
	/// Raw definition bytes.
	Bytes(Arc<[u8]>),
	/// Definition loaded from a file; hashed on every fingerprint.
	File(PathBuf),
}

impl Default for Revision {
	fn default() -> Self {
		Self::Static(Cow::Borrowed(""))
	}
}

/// Content identity of a component type at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for Fingerprint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:016x}", self.0)
	}
}

/// Outcome of routing one owner message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
	/// Routed to the notice slot.
	Notice,
	/// Routed to `receive_message`.
	Message,
	/// No slot accepts this message.
	Unhandled,
}

/// A component type: identity, revision and lifecycle hooks.
#[derive(Debug, Clone)]
pub struct ComponentDef {
	id: ComponentId,
	revision: Revision,
	hooks: Hooks,
	guarded: bool,
}

impl ComponentDef {
	pub fn builder(id: impl Into<ComponentId>) -> ComponentBuilder {
		ComponentBuilder {
			def: ComponentDef {
				id: id.into(),
				revision: Revision::default(),
				hooks: Hooks::default(),
				guarded: false,
			},
		}
	}

	pub(crate) fn from_parts(id: ComponentId, revision: Revision, hooks: Hooks, guarded: bool) -> Self {
		Self { id, revision, hooks, guarded }
	}

	pub fn id(&self) -> &ComponentId {
		&self.id
	}

	pub fn revision(&self) -> &Revision {
		&self.revision
	}

	pub fn hooks(&self) -> &Hooks {
		&self.hooks
	}

	/// Lifecycle callbacks this type declares.
	pub fn declared(&self) -> CallbackSet {
		self.hooks.declared()
	}

	/// Whether this definition carries the protection marker.
	pub fn is_guarded(&self) -> bool {
		self.guarded
	}

	/// Computes the current content fingerprint.
	///
	/// Covers the identity, the revision content and the declared callback
	/// set, so redefining a type with a different method set changes it even
	/// when the revision does not.
	pub fn fingerprint(&self) -> Result<Fingerprint, GuardError> {
		let mut hasher = Xxh3::new();
		hasher.update(self.id.as_str().as_bytes());
		hasher.update(&[0]);
		match &self.revision {
			Revision::Static(rev) => {
				hasher.update(b"s");
				hasher.update(rev.as_bytes());
			}
			Revision::Bytes(bytes) => {
				hasher.update(b"b");
				hasher.update(bytes);
			}
			Revision::File(path) => {
				let bytes = std::fs::read(path).map_err(|source| GuardError::Fingerprint {
					id: self.id.clone(),
					path: path.clone(),
					source,
				})?;
				hasher.update(b"f");
				hasher.update(&bytes);
			}
		}
		hasher.update(&[0, self.declared().bits()]);
		Ok(Fingerprint(hasher.digest()))
	}

	/// Routes a raw owner message.
	///
	/// Messages of the exact notice shape go to the notice slot; everything
	/// else goes to `receive_message` when declared.
	pub fn deliver_message(&self, message: &Value, socket: &mut Socket) -> CallbackResult<Delivery> {
		if let Some(notice) = CrashNotice::from_value(message)
			&& let Some(handler) = &self.hooks.notice
		{
			handler(&notice, socket)?;
			return Ok(Delivery::Notice);
		}
		match &self.hooks.receive_message {
			Some(handler) => {
				handler(message, socket)?;
				Ok(Delivery::Message)
			}
			None => {
				tracing::debug!(component = %self.id, "ward.component.message_unhandled");
				Ok(Delivery::Unhandled)
			}
		}
	}
}

/// Builder for [`ComponentDef`].
pub struct ComponentBuilder {
	def: ComponentDef,
}

impl ComponentBuilder {
	#[must_use]
	pub fn revision(mut self, revision: Revision) -> Self {
		self.def.revision = revision;
		self
	}

	#[must_use]
	pub fn initialize(mut self, f: impl Fn(&Params, &mut Socket) -> CallbackResult + Send + Sync + 'static) -> Self {
		self.def.hooks.initialize = Some(Arc::new(f));
		self
	}

	#[must_use]
	pub fn initialize_child(mut self, f: impl Fn(&mut Socket) -> CallbackResult + Send + Sync + 'static) -> Self {
		self.def.hooks.initialize_child = Some(Arc::new(f));
		self
	}

	#[must_use]
	pub fn refresh(mut self, f: impl Fn(&Params, &mut Socket) -> CallbackResult + Send + Sync + 'static) -> Self {
		self.def.hooks.refresh = Some(Arc::new(f));
		self
	}

	#[must_use]
	pub fn receive_event(mut self, f: impl Fn(&str, &Value, &mut Socket) -> CallbackResult + Send + Sync + 'static) -> Self {
		self.def.hooks.receive_event = Some(Arc::new(f));
		self
	}

	#[must_use]
	pub fn receive_message(mut self, f: impl Fn(&Value, &mut Socket) -> CallbackResult + Send + Sync + 'static) -> Self {
		self.def.hooks.receive_message = Some(Arc::new(f));
		self
	}

	#[must_use]
	pub fn params_changed(mut self, f: impl Fn(&Params, &str, &mut Socket) -> CallbackResult + Send + Sync + 'static) -> Self {
		self.def.hooks.params_changed = Some(Arc::new(f));
		self
	}

	#[must_use]
	pub fn produce_output(mut self, f: impl Fn(&Assigns) -> CallbackResult<Node> + Send + Sync + 'static) -> Self {
		self.def.hooks.produce_output = Some(Arc::new(f));
		self
	}

	/// Owner-side handler for crash notices.
	#[must_use]
	pub fn handle_notice(mut self, f: impl Fn(&CrashNotice, &mut Socket) -> CallbackResult + Send + Sync + 'static) -> Self {
		self.def.hooks.notice = Some(Arc::new(f));
		self
	}

	pub fn build(self) -> ComponentDef {
		self.def
	}
}
