// src/dag/node.rs

use std::fmt;
use std::sync::Arc;

use crate::image::ImageRef;

/// Index of a node inside its owning [`Graph`](super::Graph).
///
/// Nodes refer to each other only through these ids; the graph owns every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A graph node: identity, optional payload, and its adjacency.
///
/// A node without payload is a placeholder for an image that has been
/// referenced but not defined yet.
#[derive(Debug, Clone)]
pub struct Node<T> {
    id: NodeId,
    key: ImageRef,
    item: Option<Arc<T>>,
    parents: Vec<NodeId>,
    children: Vec<NodeId>,
}

impl<T> Node<T> {
    pub(crate) fn new(id: NodeId, key: ImageRef) -> Self {
        Self {
            id,
            key,
            item: None,
            parents: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn key(&self) -> &ImageRef {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn version(&self) -> &str {
        &self.key.version
    }

    pub fn item(&self) -> Option<&Arc<T>> {
        self.item.as_ref()
    }

    pub fn is_defined(&self) -> bool {
        self.item.is_some()
    }

    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub(crate) fn set_item(&mut self, item: Arc<T>) {
        self.item = Some(item);
    }

    pub(crate) fn push_parent(&mut self, parent: NodeId) -> bool {
        if self.parents.contains(&parent) {
            return false;
        }
        self.parents.push(parent);
        true
    }

    pub(crate) fn push_child(&mut self, child: NodeId) -> bool {
        if self.children.contains(&child) {
            return false;
        }
        self.children.push(child);
        true
    }
}
