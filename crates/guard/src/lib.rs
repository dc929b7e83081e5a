//! Crash resilience for session-owned UI components.
//!
//! A component type is a [`ComponentDef`]: an identity, a revision and a
//! table of optional lifecycle hooks. [`protect`] rewrites that table so every
//! failure inside a declared callback is caught, logged and recovered from
//! according to a fixed per-callback policy, instead of taking the owning
//! session down with it:
//!
//! * creation failures mark the instance degraded and it renders the fallback
//!   visual for the rest of its life;
//! * failures in updates, events and messages roll state back to the last
//!   committed snapshot and send one [`CrashNotice`] to the owner;
//! * output failures render the fallback for that pass only.
//!
//! [`ProxyFactory`] retrofits the same protection onto third-party types,
//! caching one proxy per content [`Fingerprint`]. [`EagerBoundary`] closes the
//! remaining gap: failures inside lazily constructed output that would
//! otherwise only surface after the guard has returned.

mod assigns;
mod boundary;
mod callback;
mod component;
mod config;
pub mod crash;
mod error;
mod intercept;
mod notice;
pub mod output;
mod proxy;
mod socket;

pub use assigns::{Assigns, ErrorState, GUARD_STATE_KEY};
pub use boundary::EagerBoundary;
pub use callback::{
	Callback, CallbackResult, CallbackSet, Creation, Hooks, InitializeChildFn, InitializeFn, NoticeFn, Params, ParamsChangedFn, ProduceOutputFn,
	ReceiveEventFn, ReceiveMessageFn, RefreshFn,
};
pub use component::{ComponentBuilder, ComponentDef, ComponentId, Delivery, Fingerprint, Revision};
pub use config::{DEFAULT_NOTICE_MESSAGE, DegradedReset, GuardConfig, RenderGuard};
pub use crash::{Crash, CrashKind, Failure, Recovery, catch, classify, recovery_for};
pub use error::GuardError;
pub use intercept::{protect, reset_degraded};
pub use notice::{CrashNotice, NOTICE_TAG, NoticeDropped, NoticeSink, default_notice_handler};
pub use output::{Node, evaluate};
pub use proxy::{ProxyCache, ProxyEntry, ProxyFactory};
pub use socket::{Flash, FlashLevel, InstanceId, Owner, Socket};
