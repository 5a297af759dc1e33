//! Page-context abstraction the agent works against.
//!
//! Element lookups return owned snapshots. Any access may fail (the page
//! navigated, a node was detached mid-read) and callers treat failure as
//! "nothing there" rather than aborting.

use std::collections::BTreeMap;
use std::pin::Pin;

use chorus_core::Result;
use futures::Stream;

/// Opaque handle to a node, stable while the node is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// Snapshot of one element at query time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub node: NodeId,
    /// Document-order key. Only meaningful within one extraction pass.
    pub position: usize,
    pub tag: String,
    pub classes: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    /// Text content of the element and its descendants.
    pub text: String,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    /// Trimmed text, or `None` when the element is visually empty.
    pub fn content(&self) -> Option<&str> {
        let text = self.text.trim();
        (!text.is_empty()).then_some(text)
    }
}

/// One notification that the document changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationBatch {
    /// Number of underlying mutation records coalesced into this batch.
    pub records: usize,
}

/// Lazy, unbounded sequence of document-changed notifications.
pub type MutationStream = Pin<Box<dyn Stream<Item = MutationBatch> + Send>>;

/// Read access to the live document.
pub trait Document: Send + Sync {
    /// All elements matching a CSS selector.
    fn query_all(&self, selector: &str) -> Result<Vec<Element>>;

    /// Direct element children of `parent`, in document order.
    fn children(&self, parent: &Element) -> Result<Vec<Element>>;

    fn exists(&self, selector: &str) -> Result<bool> {
        Ok(!self.query_all(selector)?.is_empty())
    }

    fn query_first(&self, selector: &str) -> Result<Option<Element>> {
        let mut found = self.query_all(selector)?;
        found.sort_by_key(|e| e.position);
        Ok(found.into_iter().next())
    }
}

/// A document the agent can also type into and observe.
pub trait Page: Document {
    /// Replace the value of the first element matching `selector`.
    /// Returns `false` when nothing matches.
    fn set_input(&self, selector: &str, text: &str) -> Result<bool>;

    /// Click the first element matching `selector`.
    /// Returns `false` when nothing matches or the control is disabled.
    fn click(&self, selector: &str) -> Result<bool>;

    /// Dispatch an Enter key-press on the first element matching `selector`.
    fn press_enter(&self, selector: &str) -> Result<()>;

    /// Subscribe to document mutations. Each call yields an independent
    /// stream starting from the moment of subscription.
    fn mutations(&self) -> MutationStream;
}
