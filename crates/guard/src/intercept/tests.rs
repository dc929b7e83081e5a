use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use super::*;
use crate::callback::{CallbackSet, Creation};
use crate::component::Delivery;
use crate::config::DEFAULT_NOTICE_MESSAGE;
use crate::notice::NoticeDropped;
use crate::output::evaluate;
use crate::socket::{Flash, FlashLevel, Owner};

/// Records `message`, `callback` and `backtrace` of every event.
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<Fields>>>);

#[derive(Clone, Default)]
struct Fields {
	message: String,
	callback: String,
	backtrace: String,
}

impl Visit for Fields {
	fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
		match field.name() {
			"message" => self.message = format!("{value:?}"),
			"callback" => self.callback = format!("{value:?}"),
			"backtrace" => self.backtrace = format!("{value:?}"),
			_ => {}
		}
	}
}

impl<S: Subscriber> Layer<S> for Capture {
	fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
		let mut fields = Fields::default();
		event.record(&mut fields);
		self.0.lock().expect("capture lock").push(fields);
	}
}

impl Capture {
	fn crash_events(&self) -> Vec<Fields> {
		let events = self.0.lock().expect("capture lock");
		events.iter().filter(|e| e.message == "ward.guard.crash").cloned().collect()
	}

	fn crashes(&self) -> Vec<String> {
		self.crash_events().into_iter().map(|e| e.callback).collect()
	}
}

fn captured<R>(f: impl FnOnce() -> R) -> (R, Capture) {
	let capture = Capture::default();
	let subscriber = tracing_subscriber::registry().with(capture.clone());
	let out = tracing::subscriber::with_default(subscriber, f);
	(out, capture)
}

type Inbox = Arc<Mutex<Vec<CrashNotice>>>;

fn recording_owner() -> (Owner, Inbox) {
	let inbox: Inbox = Arc::default();
	let sink = Arc::clone(&inbox);
	let owner = Owner::new(
		"session",
		Arc::new(move |notice: CrashNotice| -> Result<(), NoticeDropped> {
			sink.lock().expect("inbox lock").push(notice);
			Ok(())
		}),
	);
	(owner, inbox)
}

fn guarded(def: ComponentDef) -> ComponentDef {
	protect(&def, &GuardConfig::default())
}

fn send_event(def: &ComponentDef, socket: &mut Socket, event: &str) {
	let f = def.hooks().receive_event.as_ref().expect("receive_event declared");
	f(event, &json!({}), socket).expect("guarded callbacks report success");
}

fn render(def: &ComponentDef, socket: &Socket) -> CallbackResult<Node> {
	let f = def.hooks().produce_output.as_ref().expect("produce_output declared");
	f(socket.assigns())
}

fn counter() -> ComponentDef {
	ComponentDef::builder("counter")
		.receive_event(|event, _, socket| {
			let count = socket.assigns().get_i64("count").unwrap_or(0);
			socket.assign("count", count + 1);
			socket.put_flash(FlashLevel::Info, "incremented");
			match event {
				"explode" => anyhow::bail!("counter overflow"),
				"panic" => panic!("counter invariant broken"),
				_ => Ok(()),
			}
		})
		.produce_output(|assigns| Ok(Node::text(assigns.get_i64("count").unwrap_or(0).to_string())))
		.build()
}

#[test]
fn transient_error_rolls_back_and_notifies_once() {
	let def = guarded(counter());
	let (owner, inbox) = recording_owner();
	let mut socket = Socket::new(owner);

	send_event(&def, &mut socket, "inc");
	let committed = socket.assigns().clone();
	let committed_flash = socket.flash().to_vec();

	send_event(&def, &mut socket, "explode");
	assert_eq!(socket.assigns(), &committed);
	assert_eq!(socket.flash(), committed_flash.as_slice());
	assert_eq!(*inbox.lock().expect("inbox lock"), vec![CrashNotice::new(DEFAULT_NOTICE_MESSAGE)]);
}

#[test]
fn transient_panic_rolls_back_and_notifies_once() {
	let def = guarded(counter());
	let (owner, inbox) = recording_owner();
	let mut socket = Socket::new(owner);

	send_event(&def, &mut socket, "inc");
	send_event(&def, &mut socket, "panic");

	assert_eq!(socket.assigns().get_i64("count"), Some(1));
	assert_eq!(socket.flash().len(), 1);
	assert_eq!(inbox.lock().expect("inbox lock").len(), 1);
	assert!(!socket.assigns().is_degraded());
}

#[inline(never)]
fn corrupt_tally(socket: &mut Socket) {
	socket.assign("tally", "garbage");
	panic!("tally corrupted");
}

#[test]
fn logged_backtrace_names_the_panicking_function() {
	let def = guarded(
		ComponentDef::builder("tally")
			.receive_event(|_, _, socket| {
				corrupt_tally(socket);
				Ok(())
			})
			.build(),
	);
	let mut socket = Socket::new(Owner::detached());

	let ((), capture) = captured(|| send_event(&def, &mut socket, "tick"));
	let crashes = capture.crash_events();
	assert_eq!(crashes.len(), 1);
	assert!(crashes[0].backtrace.contains("corrupt_tally"), "{}", crashes[0].backtrace);
	assert_eq!(socket.assigns().get("tally"), None);
	assert_eq!(socket.crash_count(), 1);
}

#[test]
fn refresh_failure_keeps_last_commit() {
	let def = guarded(
		ComponentDef::builder("badge")
			.refresh(|params, socket| {
				let value = params.get("value").and_then(Value::as_str).unwrap_or_default().to_string();
				socket.assign("value", value.clone());
				if value == "X" {
					anyhow::bail!("unsupported value {value}");
				}
				Ok(())
			})
			.build(),
	);
	let (owner, inbox) = recording_owner();
	let mut socket = Socket::new(owner);
	let refresh = def.hooks().refresh.clone().expect("refresh declared");

	let mut params = Params::new();
	params.insert("value".into(), json!("S0"));
	refresh(&params, &mut socket).expect("guarded callbacks report success");
	params.insert("value".into(), json!("X"));
	refresh(&params, &mut socket).expect("guarded callbacks report success");

	assert_eq!(socket.assigns().get_str("value"), Some("S0"));
	let notices = inbox.lock().expect("inbox lock");
	assert_eq!(notices.len(), 1);
	assert_eq!(notices[0].to_value(), json!({ "tag": "ward_crash", "message": DEFAULT_NOTICE_MESSAGE }));
}

#[test]
fn every_transient_callback_notifies() {
	let def = guarded(
		ComponentDef::builder("flaky")
			.receive_message(|_, _| anyhow::bail!("message"))
			.params_changed(|_, _, _| anyhow::bail!("params"))
			.build(),
	);
	let (owner, inbox) = recording_owner();
	let mut socket = Socket::new(owner);

	let ((), capture) = captured(|| {
		def.deliver_message(&json!({ "kind": "ping" }), &mut socket).expect("guarded");
		let changed = def.hooks().params_changed.as_ref().expect("declared");
		changed(&Params::new(), "/items?page=2", &mut socket).expect("guarded");
	});

	assert_eq!(inbox.lock().expect("inbox lock").len(), 2);
	assert_eq!(capture.crashes(), ["receive_message", "params_changed"]);
}

#[test]
fn full_owner_inbox_drops_notice_without_failing() {
	let def = guarded(counter());
	let owner = Owner::new("session", Arc::new(|_: CrashNotice| -> Result<(), NoticeDropped> { Err(NoticeDropped::Full) }));
	let mut socket = Socket::new(owner);

	send_event(&def, &mut socket, "explode");
	assert_eq!(socket.assigns().get_i64("count"), None);
}

#[test]
fn initialize_failure_degrades_for_good() {
	let renders = Arc::new(AtomicUsize::new(0));
	let seen = Arc::clone(&renders);
	let def = guarded(
		ComponentDef::builder("profile")
			.initialize(|_, socket| {
				socket.assign("user", "ada");
				anyhow::bail!("profile service unavailable")
			})
			.produce_output(move |assigns| {
				seen.fetch_add(1, Ordering::SeqCst);
				Ok(Node::text(assigns.get_str("user").unwrap_or_default()))
			})
			.build(),
	);
	let mut socket = Socket::new(Owner::detached());
	let init = def.hooks().initialize.clone().expect("declared");
	init(&Params::new(), &mut socket).expect("guarded callbacks report success");

	assert!(socket.assigns().is_degraded());
	assert_eq!(socket.assigns().get("user"), None);

	for name in ["grace", "linus", "barbara"] {
		socket.assign("user", name);
		assert!(render(&def, &socket).expect("render").is_fallback());
	}
	assert_eq!(renders.load(Ordering::SeqCst), 0);
}

#[test]
fn initialize_child_failure_degrades() {
	let def = guarded(
		ComponentDef::builder("row")
			.initialize_child(|_| panic!("missing row id"))
			.produce_output(|_| Ok(Node::text("row")))
			.build(),
	);
	let (owner, inbox) = recording_owner();
	let mut socket = Socket::new(owner);
	let init = def.hooks().initialize_child.clone().expect("declared");
	init(&mut socket).expect("guarded callbacks report success");

	assert!(socket.assigns().is_degraded());
	assert!(render(&def, &socket).expect("render").is_fallback());
	assert!(inbox.lock().expect("inbox lock").is_empty());
}

#[test]
fn undeclared_callbacks_stay_undeclared() {
	let def = guarded(ComponentDef::builder("static").produce_output(|_| Ok(Node::text("hi"))).build());
	assert_eq!(def.declared(), CallbackSet::PRODUCE_OUTPUT);
	assert!(def.hooks().initialize.is_none());
	assert!(def.hooks().receive_event.is_none());
	assert!(def.hooks().notice.is_some());
}

#[test]
fn protect_is_idempotent() {
	let once = guarded(counter());
	let twice = guarded(once.clone());
	assert!(twice.is_guarded());
	assert_eq!(once.declared(), twice.declared());
	let a = once.hooks().receive_event.as_ref().expect("declared");
	let b = twice.hooks().receive_event.as_ref().expect("declared");
	assert!(Arc::ptr_eq(a, b));

	let mut socket = Socket::new(Owner::detached());
	let ((), capture) = captured(|| send_event(&twice, &mut socket, "explode"));
	assert_eq!(capture.crashes().len(), 1);
}

#[test]
fn default_notice_handler_flashes_error() {
	let def = guarded(ComponentDef::builder("page").produce_output(|_| Ok(Node::text("page"))).build());
	let mut socket = Socket::new(Owner::detached());

	let routed = def.deliver_message(&CrashNotice::new("Chart failed").to_value(), &mut socket).expect("deliver");
	assert_eq!(routed, Delivery::Notice);
	assert_eq!(
		socket.take_flash(),
		vec![Flash {
			level: FlashLevel::Error,
			message: "Chart failed".to_string(),
		}]
	);
}

#[test]
fn custom_notice_handler_replaces_default() {
	let def = guarded(
		ComponentDef::builder("page")
			.handle_notice(|notice, socket| {
				socket.assign("banner", notice.message());
				Ok(())
			})
			.build(),
	);
	let mut socket = Socket::new(Owner::detached());

	def.deliver_message(&CrashNotice::new("Chart failed").to_value(), &mut socket).expect("deliver");
	assert_eq!(socket.assigns().get_str("banner"), Some("Chart failed"));
	assert!(socket.flash().is_empty());
}

#[test]
fn failing_notice_handler_is_logged_not_renotified() {
	let def = guarded(
		ComponentDef::builder("page")
			.handle_notice(|_, socket| {
				socket.assign("banner", "half-written");
				anyhow::bail!("banner template missing")
			})
			.build(),
	);
	let (owner, inbox) = recording_owner();
	let mut socket = Socket::new(owner);

	let (routed, capture) = captured(|| def.deliver_message(&CrashNotice::new("x").to_value(), &mut socket));
	assert_eq!(routed.expect("guarded"), Delivery::Notice);
	assert_eq!(socket.assigns().get("banner"), None);
	assert!(inbox.lock().expect("inbox lock").is_empty());
	assert_eq!(capture.crashes(), ["receive_message"]);
}

fn lazy_failure() -> ComponentDef {
	ComponentDef::builder("report")
		.produce_output(|assigns| {
			if assigns.contains("broken") {
				anyhow::bail!("report template failed");
			}
			Ok(Node::element("table", [Node::deferred(|| anyhow::bail!("row formatter failed"))]))
		})
		.build()
}

#[test]
fn best_effort_catches_direct_render_failures_only() {
	let def = guarded(lazy_failure());
	let mut socket = Socket::new(Owner::detached());

	socket.assign("broken", true);
	assert!(render(&def, &socket).expect("render").is_fallback());
	assert!(!socket.assigns().is_degraded());

	socket.assigns_mut().remove("broken");
	let tree = render(&def, &socket).expect("construction succeeds");
	assert!(!tree.is_resolved());
	assert!(evaluate(tree).is_err());
}

#[test]
fn passthrough_lets_render_failures_reach_host() {
	let config = GuardConfig {
		render: RenderGuard::Passthrough,
		..GuardConfig::default()
	};
	let def = protect(&lazy_failure(), &config);
	let mut socket = Socket::new(Owner::detached());
	socket.assign("broken", true);

	let err = render(&def, &socket).expect_err("passthrough");
	assert_eq!(err.to_string(), "report template failed");
}

#[test]
fn eager_mode_covers_deferred_failures() {
	let config = GuardConfig {
		render: RenderGuard::Eager,
		..GuardConfig::default()
	};
	let def = protect(&lazy_failure(), &config);
	let socket = Socket::new(Owner::detached());

	let (out, capture) = captured(|| render(&def, &socket).expect("render"));
	assert!(out.is_fallback());
	assert_eq!(capture.crashes(), ["produce_output"]);
}

fn flaky_init(healthy: Arc<AtomicBool>) -> ComponentDef {
	ComponentDef::builder("feed")
		.initialize(move |_, socket| {
			if !healthy.load(Ordering::SeqCst) {
				anyhow::bail!("feed offline");
			}
			socket.assign("items", json!([]));
			Ok(())
		})
		.build()
}

#[test]
fn reset_is_refused_by_default() {
	let config = GuardConfig::default();
	let def = protect(&flaky_init(Arc::new(AtomicBool::new(false))), &config);
	let mut socket = Socket::new(Owner::detached());
	let init = def.hooks().initialize.clone().expect("declared");
	init(&Params::new(), &mut socket).expect("guarded");

	let err = reset_degraded(&def, Creation::Root, &Params::new(), &mut socket, &config).expect_err("never policy");
	assert!(matches!(err, GuardError::ResetDisabled { .. }));
	assert!(socket.assigns().is_degraded());
}

#[test]
fn explicit_reset_reruns_initialize() {
	let config = GuardConfig {
		degraded_reset: DegradedReset::Explicit,
		..GuardConfig::default()
	};
	let healthy = Arc::new(AtomicBool::new(false));
	let def = protect(&flaky_init(Arc::clone(&healthy)), &config);
	let mut socket = Socket::new(Owner::detached());
	let init = def.hooks().initialize.clone().expect("declared");
	init(&Params::new(), &mut socket).expect("guarded");
	assert!(socket.assigns().is_degraded());

	assert!(!reset_degraded(&def, Creation::Root, &Params::new(), &mut socket, &config).expect("reset"));
	assert!(socket.assigns().is_degraded());

	healthy.store(true, Ordering::SeqCst);
	assert!(reset_degraded(&def, Creation::Root, &Params::new(), &mut socket, &config).expect("reset"));
	assert!(!socket.assigns().is_degraded());
	assert_eq!(socket.assigns().get("items"), Some(&json!([])));
}

#[test]
fn child_reset_reruns_initialize_child() {
	let config = GuardConfig {
		degraded_reset: DegradedReset::Explicit,
		..GuardConfig::default()
	};
	let healthy = Arc::new(AtomicBool::new(false));
	let flag = Arc::clone(&healthy);
	let def = protect(
		&ComponentDef::builder("row")
			.initialize(|_, socket| {
				socket.assign("via", "initialize");
				Ok(())
			})
			.initialize_child(move |socket| {
				if !flag.load(Ordering::SeqCst) {
					anyhow::bail!("row source offline");
				}
				socket.assign("via", "initialize_child");
				Ok(())
			})
			.build(),
		&config,
	);
	let mut socket = Socket::new(Owner::detached());
	let init = def.hooks().initialize_child.clone().expect("declared");
	init(&mut socket).expect("guarded");
	assert!(socket.assigns().is_degraded());

	healthy.store(true, Ordering::SeqCst);
	assert!(reset_degraded(&def, Creation::Child, &Params::new(), &mut socket, &config).expect("reset"));
	assert_eq!(socket.assigns().get_str("via"), Some("initialize_child"));
}
