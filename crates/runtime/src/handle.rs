use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use ward_guard::{Assigns, ComponentId, Params};

use crate::RuntimeError;
use crate::inbox::InboxSender;
use crate::session::{Command, Frame, Reply, SessionEvent, Target};
use crate::supervisor::{SessionExit, SupervisorState};

/// Client side of one supervised session.
///
/// Requests queue behind each other in the session inbox and wait for
/// capacity when it is full. Dropping the handle cancels the session.
pub struct SessionHandle {
	name: Arc<str>,
	tx: InboxSender<Command>,
	events: broadcast::Sender<SessionEvent>,
	cancel: CancellationToken,
	state: Arc<SupervisorState>,
	join: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SessionHandle {
	fn drop(&mut self) {
		self.cancel.cancel();
		self.tx.close();
	}
}

impl SessionHandle {
	pub(crate) fn new(
		name: Arc<str>,
		tx: InboxSender<Command>,
		events: broadcast::Sender<SessionEvent>,
		cancel: CancellationToken,
		state: Arc<SupervisorState>,
		join: JoinHandle<()>,
	) -> Self {
		Self {
			name,
			tx,
			events,
			cancel,
			state,
			join: Mutex::new(Some(join)),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Current generation; increases on every remount.
	pub fn generation(&self) -> u64 {
		self.state.generation()
	}

	pub fn restart_count(&self) -> usize {
		self.state.restarts()
	}

	pub fn last_exit(&self) -> Option<SessionExit> {
		self.state.last_exit()
	}

	pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
		self.events.subscribe()
	}

	async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, RuntimeError> {
		let (reply, response) = oneshot::channel();
		self.tx
			.send(build(reply))
			.await
			.map_err(|_| RuntimeError::SessionClosed(self.name.to_string()))?;
		response.await.map_err(|_| RuntimeError::Interrupted(self.name.to_string()))?
	}

	/// Sends a user event to the root. Returns whether the root handles events.
	pub async fn dispatch_event(&self, event: impl Into<String>, payload: Value) -> Result<bool, RuntimeError> {
		self.event(Target::Root, event.into(), payload).await
	}

	/// Sends a user event to a mounted child.
	pub async fn child_event(&self, child: impl Into<String>, event: impl Into<String>, payload: Value) -> Result<bool, RuntimeError> {
		self.event(Target::child(child), event.into(), payload).await
	}

	async fn event(&self, target: Target, event: String, payload: Value) -> Result<bool, RuntimeError> {
		self.request(|reply| Command::Event {
			target,
			event,
			payload,
			reply,
		})
		.await
	}

	/// Queues an out-of-band message for the root.
	pub async fn send_message(&self, message: Value) -> Result<(), RuntimeError> {
		self.tx
			.send(Command::Message(message))
			.await
			.map_err(|_| RuntimeError::SessionClosed(self.name.to_string()))
	}

	/// Navigation: hands new params and the URI to the root.
	pub async fn change_params(&self, params: Params, uri: impl Into<String>) -> Result<bool, RuntimeError> {
		let uri = uri.into();
		self.request(|reply| Command::ParamsChanged { params, uri, reply }).await
	}

	/// Mounts a child under `id`.
	///
	/// When `id` is already mounted with the same component type the child is
	/// refreshed with `params` instead. A different type is refused with
	/// [`RuntimeError::ChildMismatch`] and the mounted child is left alone.
	pub async fn mount_child(&self, id: impl Into<String>, component: impl Into<ComponentId>, params: Params) -> Result<(), RuntimeError> {
		let (id, component) = (id.into(), component.into());
		self.request(|reply| Command::MountChild {
			id,
			component,
			params,
			reply,
		})
		.await
	}

	pub async fn refresh_child(&self, id: impl Into<String>, params: Params) -> Result<bool, RuntimeError> {
		let id = id.into();
		self.request(|reply| Command::RefreshChild { id, params, reply }).await
	}

	/// Renders the root followed by every child, in child id order.
	pub async fn render(&self) -> Result<Frame, RuntimeError> {
		self.request(|reply| Command::Render { reply }).await
	}

	/// Snapshot of an instance's assigns.
	pub async fn inspect(&self, target: Target) -> Result<Assigns, RuntimeError> {
		self.request(|reply| Command::Inspect { target, reply }).await
	}

	/// Requests an explicit degraded reset; refused unless the guard config allows it.
	pub async fn reset_degraded(&self, target: Target) -> Result<bool, RuntimeError> {
		self.request(|reply| Command::Reset { target, reply }).await
	}

	/// Stops the session once every request queued before this call has been
	/// handled. The generation exits as `Stopped` and is not remounted.
	pub async fn stop(&self) -> Result<Option<SessionExit>, RuntimeError> {
		self.tx
			.send(Command::Stop)
			.await
			.map_err(|_| RuntimeError::SessionClosed(self.name.to_string()))?;
		Ok(self.finished().await)
	}

	/// Cancels the session and waits for supervision to wind down.
	pub async fn shutdown(&self) -> Option<SessionExit> {
		self.cancel.cancel();
		self.tx.close();
		self.finished().await
	}

	async fn finished(&self) -> Option<SessionExit> {
		let join = self.join.lock().take();
		if let Some(join) = join
			&& let Err(err) = join.await
		{
			tracing::warn!(session = %self.name, error = %err, "ward.session.join_failed");
		}
		self.state.last_exit()
	}
}
