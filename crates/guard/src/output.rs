//! Output tree produced by `produce_output`.
//!
//! Output is lazy: a [`Node::Deferred`] part is only constructed when the
//! host calls [`evaluate`], which happens after `produce_output` has already
//! returned. Failures inside deferred parts therefore escape any interception
//! of `produce_output` itself; only [`crate::EagerBoundary`] covers them.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::callback::CallbackResult;

/// Lazily constructed subtree.
#[derive(Clone)]
pub struct Deferred(Arc<dyn Fn() -> CallbackResult<Node> + Send + Sync>);

impl Deferred {
	pub fn new(build: impl Fn() -> CallbackResult<Node> + Send + Sync + 'static) -> Self {
		Self(Arc::new(build))
	}

	/// Constructs the subtree one level deep.
	pub fn force(&self) -> CallbackResult<Node> {
		(self.0)()
	}
}

impl fmt::Debug for Deferred {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("Deferred(..)")
	}
}

impl PartialEq for Deferred {
	fn eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.0, &other.0)
	}
}

/// Element node.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
	pub tag: Cow<'static, str>,
	pub attrs: Vec<(Cow<'static, str>, String)>,
	pub children: Vec<Node>,
}

/// One node of an output tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
	Text(String),
	Element(Element),
	Fragment(Vec<Node>),
	Deferred(Deferred),
}

const FALLBACK_CLASS: &str = "ward-fallback";
const FALLBACK_TEXT: &str = "This section could not be displayed.";

impl Node {
	pub fn text(text: impl Into<String>) -> Self {
		Self::Text(text.into())
	}

	pub fn element(tag: impl Into<Cow<'static, str>>, children: impl IntoIterator<Item = Node>) -> Self {
		Self::Element(Element {
			tag: tag.into(),
			attrs: Vec::new(),
			children: children.into_iter().collect(),
		})
	}

	pub fn fragment(children: impl IntoIterator<Item = Node>) -> Self {
		Self::Fragment(children.into_iter().collect())
	}

	pub fn deferred(build: impl Fn() -> CallbackResult<Node> + Send + Sync + 'static) -> Self {
		Self::Deferred(Deferred::new(build))
	}

	/// Adds an attribute; no-op on non-element nodes.
	#[must_use]
	pub fn attr(mut self, name: impl Into<Cow<'static, str>>, value: impl Into<String>) -> Self {
		if let Self::Element(el) = &mut self {
			el.attrs.push((name.into(), value.into()));
		}
		self
	}

	/// The fixed, static, non-interactive fallback visual.
	pub fn fallback() -> Self {
		Self::element("div", [Self::text(FALLBACK_TEXT)])
			.attr("class", FALLBACK_CLASS)
			.attr("role", "status")
	}

	pub fn is_fallback(&self) -> bool {
		*self == Self::fallback()
	}

	/// Returns `true` when no deferred part remains anywhere in the tree.
	pub fn is_resolved(&self) -> bool {
		match self {
			Self::Text(_) => true,
			Self::Element(el) => el.children.iter().all(Self::is_resolved),
			Self::Fragment(children) => children.iter().all(Self::is_resolved),
			Self::Deferred(_) => false,
		}
	}
}

/// Host-side evaluation of a lazy tree.
///
/// Forces every deferred part recursively. Errors are returned as-is and
/// panics unwind through the caller; nothing here recovers.
pub fn evaluate(node: Node) -> CallbackResult<Node> {
	match node {
		Node::Text(_) => Ok(node),
		Node::Element(mut el) => {
			el.children = el.children.into_iter().map(evaluate).collect::<CallbackResult<_>>()?;
			Ok(Node::Element(el))
		}
		Node::Fragment(children) => Ok(Node::Fragment(children.into_iter().map(evaluate).collect::<CallbackResult<_>>()?)),
		Node::Deferred(deferred) => evaluate(deferred.force()?),
	}
}

fn escape(text: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
	for ch in text.chars() {
		match ch {
			'&' => f.write_str("&amp;")?,
			'<' => f.write_str("&lt;")?,
			'>' => f.write_str("&gt;")?,
			'"' => f.write_str("&quot;")?,
			_ => fmt::Write::write_char(f, ch)?,
		}
	}
	Ok(())
}

impl fmt::Display for Node {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Text(text) => escape(text, f),
			Self::Element(el) => {
				write!(f, "<{}", el.tag)?;
				for (name, value) in &el.attrs {
					write!(f, " {name}=\"")?;
					escape(value, f)?;
					f.write_str("\"")?;
				}
				f.write_str(">")?;
				for child in &el.children {
					fmt::Display::fmt(child, f)?;
				}
				write!(f, "</{}>", el.tag)
			}
			Self::Fragment(children) => children.iter().try_for_each(|child| fmt::Display::fmt(child, f)),
			Self::Deferred(_) => f.write_str("<!--deferred-->"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fallback_markup_is_static() {
		assert_eq!(
			Node::fallback().to_string(),
			"<div class=\"ward-fallback\" role=\"status\">This section could not be displayed.</div>"
		);
	}

	#[test]
	fn evaluate_resolves_nested_deferred_parts() {
		let tree = Node::element(
			"ul",
			[Node::deferred(|| Ok(Node::element("li", [Node::deferred(|| Ok(Node::text("a < b")))])))],
		);
		assert!(!tree.is_resolved());

		let resolved = evaluate(tree).expect("evaluates");
		assert!(resolved.is_resolved());
		assert_eq!(resolved.to_string(), "<ul><li>a &lt; b</li></ul>");
	}

	#[test]
	fn evaluate_surfaces_deferred_errors() {
		let tree = Node::fragment([Node::text("ok"), Node::deferred(|| anyhow::bail!("late failure"))]);
		let err = evaluate(tree).expect_err("deferred part fails");
		assert_eq!(err.to_string(), "late failure");
	}
}
