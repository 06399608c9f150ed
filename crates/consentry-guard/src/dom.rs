//! Document abstraction for script interception.
//!
//! The script engine never touches a concrete DOM. It sees inserted
//! [`ScriptElement`] snapshots in [`MutationBatch`]es and writes changes back
//! through a [`DocumentHost`]. [`MemoryDocument`] is the in-process host.

use crate::{GuardError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// MIME types a browser executes as classic or module script
const EXECUTABLE_TYPES: &[&str] = &[
    "text/javascript",
    "application/javascript",
    "application/ecmascript",
    "application/x-javascript",
    "text/ecmascript",
    "module",
];

/// Opaque handle of a document node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Snapshot of an element: tag, ordered attributes and inline text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptElement {
    pub tag: String,
    attributes: Vec<(String, String)>,
    pub text: Option<String>,
}

impl ScriptElement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attributes: Vec::new(),
            text: None,
        }
    }

    /// A `<script>` element
    pub fn script() -> Self {
        Self::new("script")
    }

    /// External script with the given `src`
    pub fn external(src: impl Into<String>) -> Self {
        Self::script().with_attr("src", src)
    }

    /// Inline script with the given body
    pub fn inline(text: impl Into<String>) -> Self {
        Self::script().with_text(text)
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Attribute names are case-insensitive
    pub fn attr(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.attributes
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// Set an attribute, keeping its position if it already exists
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        let index = self.attributes.iter().position(|(n, _)| *n == name)?;
        Some(self.attributes.remove(index).1)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn src(&self) -> Option<&str> {
        self.attr("src").filter(|s| !s.trim().is_empty())
    }

    pub fn script_type(&self) -> Option<&str> {
        self.attr("type")
    }

    /// Non-empty inline body
    pub fn inline_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }

    pub fn is_script(&self) -> bool {
        self.tag == "script"
    }

    /// Whether a browser would run this script as inserted
    pub fn is_executable(&self) -> bool {
        if !self.is_script() {
            return false;
        }
        match self.script_type().map(str::trim) {
            None | Some("") => true,
            Some(t) => {
                let t = t.to_ascii_lowercase();
                EXECUTABLE_TYPES.contains(&t.as_str())
            }
        }
    }
}

/// The document the script engine writes back to
pub trait DocumentHost: Send + Sync {
    /// Apply attribute/text changes to an existing node in place
    fn update(&self, node: NodeId, element: &ScriptElement) -> Result<()>;

    /// Replace a node with a freshly created element at the same position,
    /// returning the new node's id
    fn replace(&self, node: NodeId, element: ScriptElement) -> Result<NodeId>;
}

/// A node reported as inserted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertedNode {
    pub node: NodeId,
    pub element: ScriptElement,
}

/// One batch of insertions, delivered after the fact
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationBatch {
    pub inserted: Vec<InsertedNode>,
}

impl MutationBatch {
    pub fn new(inserted: Vec<InsertedNode>) -> Self {
        Self { inserted }
    }

    pub fn single(node: InsertedNode) -> Self {
        Self {
            inserted: vec![node],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty()
    }
}

/// Ordered in-memory document
#[derive(Debug, Default)]
pub struct MemoryDocument {
    nodes: RwLock<Vec<(NodeId, ScriptElement)>>,
    next_id: AtomicU64,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self) -> NodeId {
        NodeId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Append an element, returning the insertion to report
    pub fn insert(&self, element: ScriptElement) -> InsertedNode {
        let node = self.allocate();
        self.nodes.write().push((node, element.clone()));
        InsertedNode { node, element }
    }

    /// Append several elements as one mutation batch
    pub fn insert_batch(&self, elements: impl IntoIterator<Item = ScriptElement>) -> MutationBatch {
        MutationBatch::new(elements.into_iter().map(|e| self.insert(e)).collect())
    }

    pub fn get(&self, node: NodeId) -> Option<ScriptElement> {
        self.nodes
            .read()
            .iter()
            .find(|(id, _)| *id == node)
            .map(|(_, e)| e.clone())
    }

    /// Document-order snapshot
    pub fn nodes(&self) -> Vec<(NodeId, ScriptElement)> {
        self.nodes.read().clone()
    }

    pub fn position(&self, node: NodeId) -> Option<usize> {
        self.nodes.read().iter().position(|(id, _)| *id == node)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl DocumentHost for MemoryDocument {
    fn update(&self, node: NodeId, element: &ScriptElement) -> Result<()> {
        let mut nodes = self.nodes.write();
        let slot = nodes
            .iter_mut()
            .find(|(id, _)| *id == node)
            .ok_or(GuardError::UnknownNode(node.0))?;
        slot.1 = element.clone();
        Ok(())
    }

    fn replace(&self, node: NodeId, element: ScriptElement) -> Result<NodeId> {
        let fresh = self.allocate();
        let mut nodes = self.nodes.write();
        let slot = nodes
            .iter_mut()
            .find(|(id, _)| *id == node)
            .ok_or(GuardError::UnknownNode(node.0))?;
        *slot = (fresh, element);
        Ok(fresh)
    }
}
