//! In-memory crash journal.
//!
//! [`CrashJournal`] is a tracing layer that keeps the most recent crash
//! records in a bounded ring buffer, oldest evicted first. Cloning the
//! journal shares the buffer, so one clone can be installed as a layer while
//! another is kept for reading.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Event names retained by the journal.
const JOURNALED: [&str; 2] = ["ward.guard.crash", "ward.session.host_fault"];

/// One retained crash event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrashRecord {
	pub event: String,
	pub component: String,
	pub instance: String,
	pub callback: String,
	pub kind: String,
	pub recovery: String,
	pub error: String,
	pub backtrace: String,
}

#[derive(Clone)]
pub struct CrashJournal {
	capacity: usize,
	records: Arc<Mutex<VecDeque<CrashRecord>>>,
}

impl CrashJournal {
	pub fn new(capacity: usize) -> Self {
		let capacity = capacity.max(1);
		Self {
			capacity,
			records: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
		}
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// Returns retained records, oldest first.
	pub fn records(&self) -> Vec<CrashRecord> {
		self.records.lock().iter().cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.records.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn clear(&self) {
		self.records.lock().clear();
	}

	fn push(&self, record: CrashRecord) {
		let mut records = self.records.lock();
		if records.len() == self.capacity {
			records.pop_front();
		}
		records.push_back(record);
	}
}

impl fmt::Debug for CrashJournal {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CrashJournal")
			.field("capacity", &self.capacity)
			.field("len", &self.len())
			.finish()
	}
}

impl Visit for CrashRecord {
	fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
		self.record_str(field, &format!("{value:?}"));
	}

	fn record_str(&mut self, field: &Field, value: &str) {
		let slot = match field.name() {
			"message" => &mut self.event,
			"component" | "session" => &mut self.component,
			"instance" | "child" => &mut self.instance,
			"callback" => &mut self.callback,
			"kind" => &mut self.kind,
			"recovery" => &mut self.recovery,
			"error" => &mut self.error,
			"backtrace" => &mut self.backtrace,
			_ => return,
		};
		*slot = value.to_string();
	}
}

impl<S: Subscriber> Layer<S> for CrashJournal {
	fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
		if *event.metadata().level() != Level::ERROR {
			return;
		}
		let mut record = CrashRecord::default();
		event.record(&mut record);
		if JOURNALED.contains(&record.event.as_str()) {
			self.push(record);
		}
	}
}
