use std::io::Write;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::callback::CallbackSet;
use crate::output::Node;
use crate::socket::Owner;

fn factory() -> ProxyFactory {
	ProxyFactory::with_cache(Arc::new(ProxyCache::new()), GuardConfig::default())
}

fn chart() -> Arc<ComponentDef> {
	Arc::new(
		ComponentDef::builder("vendor.chart")
			.revision(Revision::Static("1.4.2".into()))
			.initialize(|params, socket| {
				let series = params.get("series").cloned().unwrap_or(json!([]));
				socket.assign("series", series);
				Ok(())
			})
			.receive_event(|event, _, socket| {
				socket.assign("last_event", event);
				Ok(())
			})
			.build(),
	)
}

#[test]
fn guarded_target_passes_through() {
	let factory = factory();
	let guarded = Arc::new(protect(&chart(), &GuardConfig::default()));
	let resolved = factory.resolve(&guarded).expect("resolve");
	assert!(Arc::ptr_eq(&resolved, &guarded));
	assert!(factory.cache().is_empty());
}

#[test]
fn proxy_declares_exactly_the_target_methods() {
	let proxy = factory().resolve(&chart()).expect("resolve");
	assert!(proxy.is_guarded());
	assert_eq!(proxy.declared(), CallbackSet::INITIALIZE | CallbackSet::RECEIVE_EVENT);
	assert!(proxy.hooks().produce_output.is_none());
	assert!(proxy.hooks().notice.is_some());
}

#[test]
fn resolve_is_idempotent_while_fingerprint_holds() {
	let factory = factory();
	let target = chart();
	let first = factory.resolve(&target).expect("resolve");
	let second = factory.resolve(&target).expect("resolve");
	assert!(Arc::ptr_eq(&first, &second));
	assert_eq!(factory.cache().len(), 1);
}

#[test]
fn proxy_forwards_to_target() {
	let proxy = factory().resolve(&chart()).expect("resolve");
	let mut socket = Socket::new(Owner::detached());
	let mut params = Params::new();
	params.insert("series".into(), json!([1, 2, 3]));

	let init = proxy.hooks().initialize.clone().expect("declared");
	init(&params, &mut socket).expect("guarded callbacks report success");
	let event = proxy.hooks().receive_event.clone().expect("declared");
	event("zoom", &json!({}), &mut socket).expect("guarded callbacks report success");

	assert_eq!(socket.assigns().get("series"), Some(&json!([1, 2, 3])));
	assert_eq!(socket.assigns().get_str("last_event"), Some("zoom"));
}

#[test]
fn proxy_applies_recovery_policy() {
	let target = Arc::new(
		ComponentDef::builder("vendor.map")
			.initialize(|_, _| anyhow::bail!("tile server unreachable"))
			.produce_output(|_| Ok(Node::text("map")))
			.build(),
	);
	let proxy = factory().resolve(&target).expect("resolve");
	let mut socket = Socket::new(Owner::detached());

	let init = proxy.hooks().initialize.clone().expect("declared");
	init(&Params::new(), &mut socket).expect("guarded callbacks report success");
	assert!(socket.assigns().is_degraded());

	let render = proxy.hooks().produce_output.clone().expect("declared");
	assert!(render(socket.assigns()).expect("render").is_fallback());
}

#[test]
fn content_change_supersedes_cached_proxy() {
	let mut file = tempfile::NamedTempFile::new().expect("tempfile");
	write!(file, "v1").expect("write");
	let target = Arc::new(
		ComponentDef::builder("vendor.table")
			.revision(Revision::File(file.path().to_path_buf()))
			.initialize(|_, _| Ok(()))
			.build(),
	);
	let factory = factory();

	let first = factory.resolve(&target).expect("resolve");
	let fp_before = factory.cache().get(target.id()).expect("cached").fingerprint;

	write!(file, "v2").expect("write");
	let second = factory.resolve(&target).expect("resolve");
	let fp_after = factory.cache().get(target.id()).expect("cached").fingerprint;

	assert!(!Arc::ptr_eq(&first, &second));
	assert_ne!(fp_before, fp_after);
	assert_eq!(factory.cache().len(), 1);
}

#[test]
fn redefined_method_set_yields_matching_proxy() {
	let factory = factory();
	let before = factory.resolve(&chart()).expect("resolve");

	let redefined = Arc::new(
		ComponentDef::builder("vendor.chart")
			.revision(Revision::Static("1.4.2".into()))
			.initialize(|_, _| Ok(()))
			.refresh(|_, _| Ok(()))
			.build(),
	);
	let after = factory.resolve(&redefined).expect("resolve");

	assert_eq!(before.declared(), CallbackSet::INITIALIZE | CallbackSet::RECEIVE_EVENT);
	assert_eq!(after.declared(), CallbackSet::INITIALIZE | CallbackSet::REFRESH);
	let cached = factory.cache().get(redefined.id()).expect("cached");
	assert!(Arc::ptr_eq(&cached.proxy, &after));
}

#[test]
fn fingerprint_failure_is_reported() {
	let factory = factory();
	let target = Arc::new(
		ComponentDef::builder("vendor.gone")
			.revision(Revision::File("/nonexistent/ward/vendor.def".into()))
			.initialize(|_, _| Ok(()))
			.build(),
	);
	let err = factory.resolve(&target).expect_err("unreadable revision");
	assert!(matches!(err, GuardError::Fingerprint { .. }));
	assert!(factory.cache().is_empty());
}

#[test]
fn empty_target_gets_an_empty_proxy() {
	let factory = factory();
	let target = Arc::new(ComponentDef::builder("vendor.empty").build());
	let proxy = factory.resolve(&target).expect("nothing to forward is still a proxy");
	assert!(proxy.is_guarded());
	assert!(proxy.declared().is_empty());
	assert!(proxy.hooks().notice.is_some());
	assert_eq!(factory.cache().len(), 1);
	assert!(Arc::ptr_eq(&proxy, &factory.resolve(&target).expect("cached")));
}

#[test]
fn concurrent_resolution_converges() {
	let factory = factory();
	let target = chart();

	let proxies: Vec<_> = std::thread::scope(|scope| {
		let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| factory.resolve(&target).expect("resolve"))).collect();
		handles.into_iter().map(|h| h.join().expect("thread")).collect()
	});

	assert_eq!(factory.cache().len(), 1);
	for proxy in &proxies {
		assert!(proxy.is_guarded());
		assert_eq!(proxy.declared(), target.declared());
	}
	let settled = factory.resolve(&target).expect("resolve");
	let cached = factory.cache().get(target.id()).expect("cached");
	assert!(Arc::ptr_eq(&settled, &cached.proxy));
}
