//! Crash notifications sent to the owning session.
//!
//! A notice is a fixed two-field tagged value, `{"tag": NOTICE_TAG,
//! "message": <text>}`, delivered at most once and without blocking. The
//! owner either handles it through its own notice hook or, by default, turns
//! it into a transient error flash.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::callback::{CallbackResult, NoticeFn};
use crate::socket::{FlashLevel, Socket};

/// Tag identifying crash notices among ordinary owner messages.
pub const NOTICE_TAG: &str = "ward_crash";

/// Notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrashNotice {
	tag: String,
	message: String,
}

impl CrashNotice {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			tag: NOTICE_TAG.to_string(),
			message: message.into(),
		}
	}

	pub fn message(&self) -> &str {
		&self.message
	}

	/// Encodes the notice as an owner message.
	pub fn to_value(&self) -> Value {
		serde_json::json!({ "tag": self.tag, "message": self.message })
	}

	/// Matches a raw owner message against the exact notice shape.
	pub fn from_value(value: &Value) -> Option<Self> {
		let notice: Self = serde_json::from_value(value.clone()).ok()?;
		(notice.tag == NOTICE_TAG).then_some(notice)
	}
}

/// Reason a notice did not reach its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeDropped {
	/// The owner's inbox is closed.
	Closed,
	/// The owner's inbox is full.
	Full,
}

impl fmt::Display for NoticeDropped {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Closed => f.write_str("owner inbox closed"),
			Self::Full => f.write_str("owner inbox full"),
		}
	}
}

/// Non-blocking delivery port into an owner's inbox.
pub trait NoticeSink: Send + Sync + 'static {
	fn deliver(&self, notice: CrashNotice) -> Result<(), NoticeDropped>;
}

impl<F> NoticeSink for F
where
	F: Fn(CrashNotice) -> Result<(), NoticeDropped> + Send + Sync + 'static,
{
	fn deliver(&self, notice: CrashNotice) -> Result<(), NoticeDropped> {
		self(notice)
	}
}

/// Handler installed alongside protection when the owner defines none.
pub fn default_notice_handler() -> NoticeFn {
	Arc::new(|notice: &CrashNotice, socket: &mut Socket| -> CallbackResult {
		socket.put_flash(FlashLevel::Error, notice.message());
		Ok(())
	})
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn matches_exact_shape_only() {
		let notice = CrashNotice::new("boom");
		assert_eq!(CrashNotice::from_value(&notice.to_value()), Some(notice));

		assert_eq!(CrashNotice::from_value(&json!({ "tag": "other", "message": "x" })), None);
		assert_eq!(CrashNotice::from_value(&json!({ "tag": NOTICE_TAG })), None);
		assert_eq!(CrashNotice::from_value(&json!({ "tag": NOTICE_TAG, "message": "x", "extra": 1 })), None);
		assert_eq!(CrashNotice::from_value(&json!("ward_crash")), None);
	}
}
