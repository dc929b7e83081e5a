//! Process-lifetime proxy cache.
//!
//! * Readers are wait-free: one `ArcSwap` load plus an immutable map lookup.
//! * Writers publish a copied map with `rcu`; concurrent publishers retry
//!   from the latest map, so entries for other identities are never lost.
//! * Two writers racing on the same identity resolve as last writer wins.
//!   Both built their proxy from the same definition, so either result is
//!   correct.

use std::sync::{Arc, LazyLock};

use arc_swap::ArcSwap;
use rustc_hash::FxHashMap;

use crate::component::{ComponentDef, ComponentId, Fingerprint};

/// One cached proxy, valid while the target's fingerprint still matches.
#[derive(Debug)]
pub struct ProxyEntry {
	pub fingerprint: Fingerprint,
	pub proxy: Arc<ComponentDef>,
}

type ProxyMap = FxHashMap<ComponentId, Arc<ProxyEntry>>;

#[derive(Default)]
pub struct ProxyCache {
	entries: ArcSwap<ProxyMap>,
}

static GLOBAL: LazyLock<Arc<ProxyCache>> = LazyLock::new(|| Arc::new(ProxyCache::new()));

impl ProxyCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// The shared cache used by [`super::ProxyFactory::new`].
	pub fn global() -> &'static Arc<ProxyCache> {
		&GLOBAL
	}

	/// Returns the current entry for `id`, stale or not.
	pub fn get(&self, id: &ComponentId) -> Option<Arc<ProxyEntry>> {
		self.entries.load().get(id).cloned()
	}

	/// Returns the cached proxy only if it was built from `fingerprint`.
	pub fn lookup(&self, id: &ComponentId, fingerprint: Fingerprint) -> Option<Arc<ComponentDef>> {
		self.get(id).filter(|entry| entry.fingerprint == fingerprint).map(|entry| Arc::clone(&entry.proxy))
	}

	/// Stores `entry` for `id`, returning the entry it superseded.
	pub fn publish(&self, id: ComponentId, entry: Arc<ProxyEntry>) -> Option<Arc<ProxyEntry>> {
		let previous = self.entries.rcu(|current| {
			let mut next = ProxyMap::clone(current);
			next.insert(id.clone(), Arc::clone(&entry));
			next
		});
		previous.get(&id).cloned()
	}

	pub fn len(&self) -> usize {
		self.entries.load().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl std::fmt::Debug for ProxyCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ProxyCache").field("entries", &self.len()).finish()
	}
}
