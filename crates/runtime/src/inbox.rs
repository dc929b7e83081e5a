//! Bounded session inbox.
//!
//! FIFO with backpressure: [`InboxSender::send`] waits for capacity and
//! never drops. [`InboxSender::try_send`] is the non-blocking path used for
//! crash notices raised from inside the session's own callbacks, where
//! waiting on the session's inbox would deadlock.

use std::collections::VecDeque;
use std::fmt;
use std::pin::pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Inbox send error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxSendError {
	Closed,
	/// Queue is full and the non-blocking path was used.
	Full,
}

impl fmt::Display for InboxSendError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Closed => f.write_str("inbox closed"),
			Self::Full => f.write_str("inbox full"),
		}
	}
}

impl std::error::Error for InboxSendError {}

struct InboxState<T> {
	queue: VecDeque<T>,
	closed: bool,
}

struct InboxInner<T> {
	capacity: usize,
	state: Mutex<InboxState<T>>,
	notify_recv: Notify,
	notify_send: Notify,
}

pub(crate) struct InboxSender<T> {
	inner: Arc<InboxInner<T>>,
}

pub(crate) struct InboxReceiver<T> {
	inner: Arc<InboxInner<T>>,
}

impl<T> Clone for InboxSender<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<T> Clone for InboxReceiver<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

/// Creates a bounded inbox. A zero capacity is raised to one.
pub(crate) fn inbox<T>(capacity: usize) -> (InboxSender<T>, InboxReceiver<T>) {
	let capacity = capacity.max(1);
	let inner = Arc::new(InboxInner {
		capacity,
		state: Mutex::new(InboxState {
			queue: VecDeque::with_capacity(capacity),
			closed: false,
		}),
		notify_recv: Notify::new(),
		notify_send: Notify::new(),
	});
	(InboxSender { inner: Arc::clone(&inner) }, InboxReceiver { inner })
}

impl<T> InboxSender<T> {
	/// Closes the inbox. Receivers drain queued items, then get `None`.
	pub fn close(&self) {
		self.inner.state.lock().closed = true;
		self.inner.notify_recv.notify_waiters();
		self.inner.notify_send.notify_waiters();
	}

	/// Non-blocking enqueue.
	pub fn try_send(&self, msg: T) -> Result<(), InboxSendError> {
		self.push(msg).map_err(|(err, _)| err)
	}

	/// Enqueues, waiting for capacity.
	pub async fn send(&self, mut msg: T) -> Result<(), InboxSendError> {
		loop {
			// Register before checking capacity so a concurrent recv cannot slip between.
			let mut notified = pin!(self.inner.notify_send.notified());
			notified.as_mut().enable();

			match self.push(msg) {
				Ok(()) => return Ok(()),
				Err((InboxSendError::Full, returned)) => msg = returned,
				Err((err, _)) => return Err(err),
			}
			notified.await;
		}
	}

	fn push(&self, msg: T) -> Result<(), (InboxSendError, T)> {
		let mut state = self.inner.state.lock();
		if state.closed {
			return Err((InboxSendError::Closed, msg));
		}
		if state.queue.len() >= self.inner.capacity {
			return Err((InboxSendError::Full, msg));
		}
		state.queue.push_back(msg);
		drop(state);
		self.inner.notify_recv.notify_one();
		Ok(())
	}
}

impl<T> InboxReceiver<T> {
	/// Closes the inbox and drops everything still queued. Returns how many items were dropped.
	pub fn close_and_discard(&self) -> usize {
		let discarded = {
			let mut state = self.inner.state.lock();
			state.closed = true;
			std::mem::take(&mut state.queue)
		};
		self.inner.notify_recv.notify_waiters();
		self.inner.notify_send.notify_waiters();
		discarded.len()
	}

	/// Receives one message. Returns `None` once the inbox is closed and drained.
	pub async fn recv(&self) -> Option<T> {
		loop {
			let mut notified = pin!(self.inner.notify_recv.notified());
			notified.as_mut().enable();

			{
				let mut state = self.inner.state.lock();
				if let Some(msg) = state.queue.pop_front() {
					drop(state);
					self.inner.notify_send.notify_one();
					return Some(msg);
				}
				if state.closed {
					return None;
				}
			}
			notified.await;
		}
	}
}
