// src/dag/graph.rs

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::ImageDefinition;
use crate::dag::node::{Node, NodeId};
use crate::image::ImageRef;

/// The image dependency graph produced by [`GraphBuilder`](super::GraphBuilder).
pub type ImageGraph = Graph<ImageDefinition>;

/// Node arena keyed by `name:version`.
///
/// Edges run parent -> child. The graph itself does not enforce acyclicity;
/// the builder checks every insertion before committing it and exposes a
/// final sweep through [`Graph::has_cycles`].
#[derive(Debug, Clone)]
pub struct Graph<T> {
    nodes: Vec<Node<T>>,
    index: HashMap<ImageRef, NodeId>,
}

impl<T> Default for Graph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Graph<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Insert a payload-less node, or return the existing one for `key`.
    pub(crate) fn insert_node(&mut self, key: ImageRef) -> NodeId {
        if let Some(id) = self.index.get(&key) {
            return *id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(id, key.clone()));
        self.index.insert(key, id);
        id
    }

    pub(crate) fn set_item(&mut self, id: NodeId, item: Arc<T>) {
        self.nodes[id.0].set_item(item);
    }

    /// Add a parent -> child edge on both ends. Repeated edges are ignored.
    pub(crate) fn add_relationship(&mut self, parent: NodeId, child: NodeId) {
        if self.nodes[parent.0].push_child(child) {
            self.nodes[child.0].push_parent(parent);
        }
    }

    /// Node by id. Ids are only handed out by this graph.
    pub fn node(&self, id: NodeId) -> &Node<T> {
        &self.nodes[id.0]
    }

    /// Id for `key`, including placeholders that have no payload yet.
    pub fn lookup(&self, key: &ImageRef) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    /// Defined node for `name:version`.
    pub fn get_node(&self, name: &str, version: &str) -> Option<&Node<T>> {
        let id = self.lookup(&ImageRef::new(name, version))?;
        let node = self.node(id);
        node.is_defined().then_some(node)
    }

    pub fn exists(&self, name: &str, version: &str) -> bool {
        self.get_node(name, version).is_some()
    }

    /// All defined versions of `name`, sorted.
    pub fn versions_of(&self, name: &str) -> Vec<&str> {
        let mut versions: Vec<&str> = self
            .nodes()
            .filter(|n| n.name() == name)
            .map(|n| n.version())
            .collect();
        versions.sort_unstable();
        versions
    }

    /// Defined nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node<T>> {
        self.nodes.iter().filter(|n| n.is_defined())
    }

    /// Placeholder nodes that were referenced but never defined.
    pub fn undefined_nodes(&self) -> impl Iterator<Item = &Node<T>> {
        self.nodes.iter().filter(|n| !n.is_defined())
    }

    /// Defined nodes without parents.
    pub fn roots(&self) -> impl Iterator<Item = &Node<T>> {
        self.nodes().filter(|n| n.parents().is_empty())
    }

    pub fn parents_of(&self, id: NodeId) -> impl Iterator<Item = &Node<T>> {
        self.node(id).parents().iter().map(|p| self.node(*p))
    }

    pub fn children_of(&self, id: NodeId) -> impl Iterator<Item = &Node<T>> {
        self.node(id).children().iter().map(|c| self.node(*c))
    }

    /// Number of defined nodes.
    pub fn len(&self) -> usize {
        self.nodes().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every parent -> child edge by key, sorted.
    pub fn edges(&self) -> Vec<(ImageRef, ImageRef)> {
        let mut edges: Vec<(ImageRef, ImageRef)> = self
            .nodes
            .iter()
            .flat_map(|n| {
                n.children()
                    .iter()
                    .map(move |c| (n.key().clone(), self.node(*c).key().clone()))
            })
            .collect();
        edges.sort();
        edges
    }

    pub fn has_cycles(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// A node that sits on a cycle, if any.
    pub fn find_cycle(&self) -> Option<&ImageRef> {
        let mut graph: DiGraphMap<NodeId, ()> = DiGraphMap::new();

        for node in &self.nodes {
            graph.add_node(node.id());
        }
        for node in &self.nodes {
            for child in node.children() {
                graph.add_edge(node.id(), *child, ());
            }
        }

        // A topological sort fails exactly when there is a cycle.
        match toposort(&graph, None) {
            Ok(_order) => None,
            Err(cycle) => Some(self.node(cycle.node_id()).key()),
        }
    }

    /// Whether walking child edges from `start` hits any of `targets`.
    pub(crate) fn reaches_any(
        &self,
        start: impl IntoIterator<Item = NodeId>,
        targets: &HashSet<NodeId>,
    ) -> bool {
        let mut stack: Vec<NodeId> = start.into_iter().collect();
        let mut visited: HashSet<NodeId> = HashSet::new();

        while let Some(id) = stack.pop() {
            if targets.contains(&id) {
                return true;
            }
            if !visited.insert(id) {
                continue;
            }
            stack.extend(self.node(id).children().iter().copied());
        }

        false
    }
}
