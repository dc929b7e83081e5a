//! Session actor.
//!
//! A session owns one root instance and any number of keyed children, all
//! driven from a single inbox. The session is the owner of every instance it
//! hosts: crash notices raised by the root or by a child are queued on the
//! session inbox and routed to the root's notice slot on the next turn.
//!
//! Rendering is where the host evaluates lazy output. A deferred part that
//! fails there was never covered by a guard. When the failure is the root's,
//! the generation ends with a `HostFault` (or `Panicked`) exit and the
//! supervisor decides whether to remount. When it is a child's, only that
//! child is torn down: it is remounted from its last accepted params within
//! the session's restart budget, or unmounted once the budget is spent, and
//! the root keeps its committed state.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use ward_guard::{Assigns, ComponentId, CrashKind, CrashNotice, Failure, Flash, Node, NoticeDropped, Owner, Params, catch, evaluate};

use crate::RuntimeError;
use crate::config::SessionConfig;
use crate::handle::SessionHandle;
use crate::inbox::{InboxReceiver, InboxSendError, InboxSender, inbox};
use crate::instance::Instance;
use crate::registry::ComponentRegistry;
use crate::supervisor::{Generation, RestartPolicy, SessionExit, SessionExitKind, Supervised, SupervisorState, spawn_supervisor};

/// Lifecycle events broadcast to [`SessionHandle::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
	Mounted { generation: u64, degraded: bool },
	/// A failure escaped a child's guards. The root kept running; the child
	/// was remounted, or unmounted when `remounted` is false.
	ChildFaulted { generation: u64, child: String, remounted: bool },
	Exited { generation: u64, exit: SessionExit },
}

/// Instance addressed by a session request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
	Root,
	Child(String),
}

impl Target {
	pub fn child(id: impl Into<String>) -> Self {
		Self::Child(id.into())
	}
}

/// One rendered pass of the whole session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
	pub markup: String,
	/// Flash drained from every instance during this pass.
	pub flash: Vec<Flash>,
	pub degraded: bool,
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T, RuntimeError>>;

pub(crate) enum Command {
	Event { target: Target, event: String, payload: Value, reply: Reply<bool> },
	Message(Value),
	ParamsChanged { params: Params, uri: String, reply: Reply<bool> },
	MountChild { id: String, component: ComponentId, params: Params, reply: Reply<()> },
	RefreshChild { id: String, params: Params, reply: Reply<bool> },
	Render { reply: Reply<Frame> },
	Inspect { target: Target, reply: Reply<Assigns> },
	Reset { target: Target, reply: Reply<bool> },
	/// Ends the generation once every command queued before it has run.
	Stop,
}

/// Everything needed to start a session.
pub struct SessionSpec {
	name: String,
	registry: Arc<ComponentRegistry>,
	root: ComponentId,
	params: Params,
	config: SessionConfig,
}

impl SessionSpec {
	pub fn new(name: impl Into<String>, registry: Arc<ComponentRegistry>, root: impl Into<ComponentId>) -> Self {
		Self {
			name: name.into(),
			registry,
			root: root.into(),
			params: Params::new(),
			config: SessionConfig::default(),
		}
	}

	#[must_use]
	pub fn params(mut self, params: Params) -> Self {
		self.params = params;
		self
	}

	#[must_use]
	pub fn config(mut self, config: SessionConfig) -> Self {
		self.config = config;
		self
	}
}

/// Immutable state shared by every generation of one session.
struct SessionContext {
	name: Arc<str>,
	registry: Arc<ComponentRegistry>,
	root: ComponentId,
	params: Params,
	/// Restart budget applied to each child on its own.
	policy: RestartPolicy,
	events: broadcast::Sender<SessionEvent>,
	tx: InboxSender<Command>,
}

impl SessionContext {
	/// Owner handle given to every hosted instance.
	fn owner(&self) -> Owner {
		let tx = self.tx.clone();
		Owner::new(
			Arc::clone(&self.name),
			Arc::new(move |notice: CrashNotice| -> Result<(), NoticeDropped> {
				tx.try_send(Command::Message(notice.to_value())).map_err(|err| match err {
					InboxSendError::Closed => NoticeDropped::Closed,
					InboxSendError::Full => NoticeDropped::Full,
				})
			}),
		)
	}

	fn host_fault(&self, err: &anyhow::Error) -> (SessionExit, RuntimeError) {
		let message = format!("{err:#}");
		tracing::error!(
			session = %self.name,
			kind = ?CrashKind::UnprotectedDeferredCrash,
			error = %message,
			"ward.session.host_fault"
		);
		let exit = SessionExit::with_message(SessionExitKind::HostFault, message.clone());
		let err = RuntimeError::HostFault {
			session: self.name.to_string(),
			message,
		};
		(exit, err)
	}

	/// Sends the reply; an escaped root failure also ends the generation.
	fn finish<T>(&self, reply: Reply<T>, outcome: Result<anyhow::Result<T>, RuntimeError>) -> Result<(), SessionExit> {
		match outcome {
			Ok(Ok(value)) => {
				let _ = reply.send(Ok(value));
				Ok(())
			}
			Ok(Err(err)) => {
				let (exit, err) = self.host_fault(&err);
				let _ = reply.send(Err(err));
				Err(exit)
			}
			Err(err) => {
				let _ = reply.send(Err(err));
				Ok(())
			}
		}
	}
}

/// A mounted child and the remounts it has used.
struct Child {
	instance: Instance,
	restarts: usize,
}

/// One mounted generation.
struct SessionActor {
	ctx: Arc<SessionContext>,
	generation: u64,
	root: Instance,
	children: BTreeMap<String, Child>,
}

impl SessionActor {
	fn mount(ctx: Arc<SessionContext>, generation: u64) -> Result<Self, anyhow::Error> {
		let def = ctx.registry.get(&ctx.root)?;
		let root = Instance::mount_root(def, ctx.params.clone(), ctx.owner())?;
		Ok(Self {
			ctx,
			generation,
			root,
			children: BTreeMap::new(),
		})
	}

	fn child_mut(&mut self, id: &str) -> Result<&mut Instance, RuntimeError> {
		self.children
			.get_mut(id)
			.map(|child| &mut child.instance)
			.ok_or_else(|| RuntimeError::UnknownChild(id.to_string()))
	}

	fn target_mut(&mut self, target: &Target) -> Result<&mut Instance, RuntimeError> {
		match target {
			Target::Root => Ok(&mut self.root),
			Target::Child(id) => self.child_mut(id),
		}
	}

	/// Keeps a child's escaped failure inside the child.
	fn isolate<T>(&mut self, target: &Target, outcome: anyhow::Result<T>) -> Result<anyhow::Result<T>, RuntimeError> {
		match (target, outcome) {
			(Target::Child(id), Err(err)) => Err(self.child_fault(id, &Failure::Error(err))),
			(_, outcome) => Ok(outcome),
		}
	}

	/// Logs a failure that escaped a child's guards, then remounts or unmounts the child.
	fn child_fault(&mut self, id: &str, failure: &Failure) -> RuntimeError {
		let message = failure.description();
		let component = self.children.get(id).map(|child| child.instance.component().to_string());
		tracing::error!(
			session = %self.ctx.name,
			component = component.as_deref().unwrap_or("-"),
			child = id,
			kind = ?CrashKind::UnprotectedDeferredCrash,
			error = %message,
			backtrace = %failure.backtrace(),
			"ward.session.host_fault"
		);
		let remounted = match self.children.remove(id) {
			Some(child) => self.remount_child(id, child),
			None => false,
		};
		let _ = self.ctx.events.send(SessionEvent::ChildFaulted {
			generation: self.generation,
			child: id.to_string(),
			remounted,
		});
		RuntimeError::ChildFault {
			session: self.ctx.name.to_string(),
			child: id.to_string(),
			message,
		}
	}

	/// Mounts a fresh instance from the child's last accepted params.
	fn remount_child(&mut self, id: &str, child: Child) -> bool {
		if !self.ctx.policy.allows(child.restarts) {
			tracing::warn!(session = %self.ctx.name, child = id, restarts = child.restarts, "ward.session.child_gave_up");
			return false;
		}
		let params = child.instance.params().clone();
		let remounted = self
			.ctx
			.registry
			.get(child.instance.component())
			.map_err(anyhow::Error::from)
			.and_then(|def| Instance::mount_child(def, params, self.ctx.owner()));
		match remounted {
			Ok(instance) => {
				let restarts = child.restarts + 1;
				tracing::info!(session = %self.ctx.name, child = id, restarts, "ward.session.child_remount");
				self.children.insert(id.to_string(), Child { instance, restarts });
				true
			}
			Err(err) => {
				tracing::warn!(session = %self.ctx.name, child = id, error = %format!("{err:#}"), "ward.session.child_gave_up");
				false
			}
		}
	}

	/// Mounts a child under `id`; an id already mounted with the same type is refreshed instead.
	fn mount_child(&mut self, id: String, component: ComponentId, params: Params) -> Result<anyhow::Result<()>, RuntimeError> {
		let target = Target::Child(id.clone());
		let outcome = match self.children.entry(id) {
			Entry::Occupied(mut slot) => {
				let mounted = slot.get().instance.component();
				if *mounted != component {
					return Err(RuntimeError::ChildMismatch {
						child: slot.key().clone(),
						mounted: mounted.clone(),
						requested: component,
					});
				}
				slot.get_mut().instance.refresh(params).map(drop)
			}
			Entry::Vacant(slot) => {
				let def = self.ctx.registry.get(&component)?;
				Instance::mount_child(def, params, self.ctx.owner()).map(|instance| {
					slot.insert(Child { instance, restarts: 0 });
				})
			}
		};
		self.isolate(&target, outcome)
	}

	fn handle(&mut self, cmd: Command) -> Result<(), SessionExit> {
		let ctx = Arc::clone(&self.ctx);
		match cmd {
			Command::Event {
				target,
				event,
				payload,
				reply,
			} => {
				let outcome = self.target_mut(&target).map(|inst| inst.event(&event, &payload));
				let outcome = outcome.and_then(|outcome| self.isolate(&target, outcome));
				ctx.finish(reply, outcome)
			}
			Command::Message(message) => match self.root.message(&message) {
				Ok(delivery) => {
					tracing::trace!(session = %ctx.name, ?delivery, "ward.session.message");
					Ok(())
				}
				Err(err) => Err(ctx.host_fault(&err).0),
			},
			Command::ParamsChanged { params, uri, reply } => {
				let outcome = self.root.params_changed(params, &uri);
				ctx.finish(reply, Ok(outcome))
			}
			Command::MountChild {
				id,
				component,
				params,
				reply,
			} => {
				let outcome = self.mount_child(id, component, params);
				ctx.finish(reply, outcome)
			}
			Command::RefreshChild { id, params, reply } => {
				let target = Target::Child(id);
				let outcome = self.target_mut(&target).map(|inst| inst.refresh(params));
				let outcome = outcome.and_then(|outcome| self.isolate(&target, outcome));
				ctx.finish(reply, outcome)
			}
			Command::Render { reply } => {
				let outcome = self.render();
				ctx.finish(reply, outcome)
			}
			Command::Inspect { target, reply } => {
				let outcome = self.target_mut(&target).map(|inst| Ok(inst.assigns().clone()));
				ctx.finish(reply, outcome)
			}
			Command::Reset { target, reply } => {
				let config = ctx.registry.config();
				let outcome = self.target_mut(&target).and_then(|inst| Ok(inst.reset(config)?));
				let outcome = outcome.and_then(|outcome| self.isolate(&target, outcome));
				ctx.finish(reply, outcome)
			}
			Command::Stop => Err(SessionExit::new(SessionExitKind::Stopped)),
		}
	}

	/// Host-side render: protected output construction, then full evaluation.
	///
	/// A root failure comes back as the inner `Err` and ends the generation; a
	/// child failure, panics included, is contained by [`Self::child_fault`].
	fn render(&mut self) -> Result<anyhow::Result<Frame>, RuntimeError> {
		let root = match self.root.output().and_then(evaluate) {
			Ok(node) => node,
			Err(err) => return Ok(Err(err)),
		};
		let mut parts = vec![root];
		let mut faulted = Vec::new();
		for (id, child) in &self.children {
			match catch(|| child.instance.output().and_then(evaluate)) {
				Ok(node) => parts.push(Node::element("section", [node]).attr("data-ward-child", id.as_str())),
				Err(failure) => faulted.push((id.clone(), failure)),
			}
		}
		let mut first = None;
		for (id, failure) in faulted {
			let err = self.child_fault(&id, &failure);
			first.get_or_insert(err);
		}
		if let Some(err) = first {
			return Err(err);
		}

		let mut flash = self.root.take_flash();
		for child in self.children.values_mut() {
			flash.extend(child.instance.take_flash());
		}
		Ok(Ok(Frame {
			markup: Node::fragment(parts).to_string(),
			flash,
			degraded: self.root.is_degraded(),
		}))
	}
}

/// Runs one generation until it exits.
async fn run_generation(ctx: Arc<SessionContext>, rx: InboxReceiver<Command>, generation: Generation) -> SessionExit {
	let mut actor = match SessionActor::mount(Arc::clone(&ctx), generation.number) {
		Ok(actor) => actor,
		Err(err) => return ctx.host_fault(&err).0,
	};
	tracing::debug!(session = %ctx.name, generation = generation.number, component = %actor.root.component(), "ward.session.mounted");
	let _ = ctx.events.send(SessionEvent::Mounted {
		generation: generation.number,
		degraded: actor.root.is_degraded(),
	});

	loop {
		let cmd = tokio::select! {
			biased;
			_ = generation.cancel.cancelled() => return SessionExit::new(SessionExitKind::Cancelled),
			msg = rx.recv() => match msg {
				Some(cmd) => cmd,
				None => return SessionExit::new(SessionExitKind::InboxClosed),
			},
		};
		if let Err(exit) = actor.handle(cmd) {
			return exit;
		}
	}
}

/// Starts a supervised session. Must be called from within a Tokio runtime.
///
/// The root component is resolved before anything is spawned, so an unknown
/// or unresolvable root is reported here.
pub fn spawn_session(spec: SessionSpec) -> Result<SessionHandle, RuntimeError> {
	tokio::runtime::Handle::try_current().map_err(|_| RuntimeError::NoRuntime)?;
	spec.registry.get(&spec.root)?;

	let SessionSpec {
		name,
		registry,
		root,
		params,
		config,
	} = spec;
	let name: Arc<str> = Arc::from(name);
	let (tx, rx) = inbox(config.inbox_capacity);
	let (events, _) = broadcast::channel(config.event_buffer.max(1));
	let cancel = CancellationToken::new();
	let state = Arc::new(SupervisorState::default());

	let ctx = Arc::new(SessionContext {
		name: Arc::clone(&name),
		registry,
		root,
		params,
		policy: config.restart_policy(),
		events: events.clone(),
		tx: tx.clone(),
	});
	let closing = rx.clone();
	let join = spawn_supervisor(Supervised {
		name: Arc::clone(&name),
		policy: config.restart_policy(),
		cancel: cancel.clone(),
		state: Arc::clone(&state),
		events: events.clone(),
		mount: move |generation| run_generation(Arc::clone(&ctx), rx.clone(), generation),
		on_finish: move || {
			let dropped = closing.close_and_discard();
			tracing::debug!(dropped, "ward.session.closed");
		},
	});
	tracing::info!(session = %name, "ward.session.spawn");

	Ok(SessionHandle::new(name, tx, events, cancel, state, join))
}
