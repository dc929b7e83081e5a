//! Component type registry.
//!
//! Owned types are protected once, at registration. Foreign types are kept
//! as given and resolved through the proxy factory on every lookup, so a
//! changed definition is picked up the next time it is instantiated.

use std::sync::Arc;

use arc_swap::ArcSwap;
use rustc_hash::FxHashMap;
use ward_guard::{ComponentDef, ComponentId, GuardConfig, ProxyCache, ProxyFactory, protect};

use crate::RuntimeError;

#[derive(Debug, Clone)]
enum Entry {
	Owned(Arc<ComponentDef>),
	Foreign(Arc<ComponentDef>),
}

type EntryMap = FxHashMap<ComponentId, Entry>;

#[derive(Debug)]
pub struct ComponentRegistry {
	config: GuardConfig,
	proxies: ProxyFactory,
	entries: ArcSwap<EntryMap>,
}

impl ComponentRegistry {
	/// Creates a registry whose proxies live in the process-wide cache.
	pub fn new(config: GuardConfig) -> Self {
		let proxies = ProxyFactory::new(config.clone());
		Self::with_proxies(config, proxies)
	}

	/// Creates a registry with a private proxy cache.
	pub fn isolated(config: GuardConfig) -> Self {
		let proxies = ProxyFactory::with_cache(Arc::new(ProxyCache::new()), config.clone());
		Self::with_proxies(config, proxies)
	}

	fn with_proxies(config: GuardConfig, proxies: ProxyFactory) -> Self {
		Self {
			config,
			proxies,
			entries: ArcSwap::default(),
		}
	}

	pub fn config(&self) -> &GuardConfig {
		&self.config
	}

	pub fn proxies(&self) -> &ProxyFactory {
		&self.proxies
	}

	/// Protects and registers an owned component type, replacing any previous entry.
	pub fn register(&self, def: ComponentDef) -> Arc<ComponentDef> {
		let guarded = Arc::new(protect(&def, &self.config));
		tracing::debug!(component = %guarded.id(), declared = ?guarded.declared(), "ward.registry.register");
		self.publish(guarded.id().clone(), Entry::Owned(Arc::clone(&guarded)));
		guarded
	}

	/// Registers a third-party component type, instantiated through a proxy.
	///
	/// The proxy is resolved once up front so an unreadable definition is
	/// rejected here rather than at mount time.
	pub fn register_foreign(&self, def: impl Into<Arc<ComponentDef>>) -> Result<Arc<ComponentDef>, RuntimeError> {
		let target = def.into();
		let proxy = self.proxies.resolve(&target)?;
		tracing::debug!(component = %target.id(), declared = ?proxy.declared(), "ward.registry.register_foreign");
		self.publish(target.id().clone(), Entry::Foreign(target));
		Ok(proxy)
	}

	/// Returns the guarded definition to instantiate for `id`.
	pub fn get(&self, id: &ComponentId) -> Result<Arc<ComponentDef>, RuntimeError> {
		let entries = self.entries.load();
		match entries.get(id) {
			Some(Entry::Owned(def)) => Ok(Arc::clone(def)),
			Some(Entry::Foreign(target)) => Ok(self.proxies.resolve(target)?),
			None => Err(RuntimeError::UnknownComponent(id.clone())),
		}
	}

	/// Registered identities, sorted.
	pub fn ids(&self) -> Vec<ComponentId> {
		let mut ids: Vec<_> = self.entries.load().keys().cloned().collect();
		ids.sort();
		ids
	}

	fn publish(&self, id: ComponentId, entry: Entry) {
		self.entries.rcu(|current| {
			let mut next = EntryMap::clone(current);
			next.insert(id.clone(), entry.clone());
			next
		});
	}
}
