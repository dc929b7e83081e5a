//! Eager evaluation boundary.
//!
//! Wraps lazily constructed output and forces the whole subtree inside a
//! protected region, so a failure in any deferred part surfaces before the
//! boundary returns. On failure the boundary's entire output becomes the
//! fallback visual; no partial subtree escapes.
//!
//! A boundary catch is local to one evaluation pass. It never touches the
//! instance's error state, and the next pass evaluates from scratch.
//!
//! Forcing evaluation means the host always receives a fully resolved
//! replacement for the wrapped subtree and cannot diff or skip unchanged
//! deferred parts within it. Keep boundaries as narrow as practical.

use crate::callback::CallbackResult;
use crate::component::ComponentId;
use crate::crash::{Crash, catch};
use crate::output::{Node, evaluate};

#[derive(Debug, Clone)]
pub struct EagerBoundary {
	scope: ComponentId,
}

impl EagerBoundary {
	/// Creates a boundary; `scope` names it in crash logs.
	pub fn new(scope: impl Into<ComponentId>) -> Self {
		Self { scope: scope.into() }
	}

	/// Builds and fully evaluates a subtree, substituting the fallback on any failure.
	pub fn render(&self, build: impl FnOnce() -> CallbackResult<Node>) -> Node {
		match catch(|| evaluate(build()?)) {
			Ok(node) => node,
			Err(failure) => {
				Crash::boundary(&self.scope, &failure).log();
				Node::fallback()
			}
		}
	}

	/// Fully evaluates an already constructed tree.
	pub fn wrap(&self, node: Node) -> Node {
		self.render(|| Ok(node))
	}
}

#[cfg(test)]
mod tests {
	use std::panic::{AssertUnwindSafe, catch_unwind};
	use std::sync::Arc;
	use std::sync::atomic::{AtomicBool, Ordering};

	use super::*;

	fn nested_failing_tree() -> Node {
		Node::element(
			"section",
			[
				Node::text("header"),
				Node::deferred(|| {
					Ok(Node::element(
						"ul",
						[Node::deferred(|| Ok(Node::deferred(|| anyhow::bail!("row 3 has no title"))))],
					))
				}),
			],
		)
	}

	#[test]
	fn success_matches_unwrapped_evaluation() {
		let tree = Node::element("p", [Node::deferred(|| Ok(Node::text("hello")))]);
		let direct = evaluate(tree.clone()).expect("evaluates");
		assert_eq!(EagerBoundary::new("greeting").wrap(tree), direct);
	}

	#[test]
	fn deep_deferred_failure_yields_fallback() {
		let out = EagerBoundary::new("list").wrap(nested_failing_tree());
		assert!(out.is_fallback());
	}

	#[test]
	fn same_tree_without_boundary_escapes() {
		// Construction succeeds; the failure only appears when the host evaluates.
		let tree = nested_failing_tree();
		let err = evaluate(tree).expect_err("deferred failure reaches the host");
		assert_eq!(err.to_string(), "row 3 has no title");
	}

	#[test]
	fn deferred_panic_is_contained_only_by_boundary() {
		let tree = Node::fragment([Node::deferred(|| panic!("index out of range"))]);

		let out = EagerBoundary::new("table").wrap(tree.clone());
		assert!(out.is_fallback());

		let escaped = catch_unwind(AssertUnwindSafe(|| evaluate(tree)));
		assert!(escaped.is_err(), "unbounded evaluation must unwind");
	}

	#[test]
	fn later_pass_can_succeed() {
		let broken = Arc::new(AtomicBool::new(true));
		let flag = Arc::clone(&broken);
		let tree = Node::deferred(move || {
			if flag.load(Ordering::SeqCst) {
				anyhow::bail!("transient");
			}
			Ok(Node::text("recovered"))
		});
		let boundary = EagerBoundary::new("flaky");

		assert!(boundary.wrap(tree.clone()).is_fallback());
		broken.store(false, Ordering::SeqCst);
		assert_eq!(boundary.wrap(tree), Node::text("recovered"));
	}
}
