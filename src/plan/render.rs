// src/plan/render.rs

use std::collections::HashMap;
use std::sync::Arc;

use crate::dag::{ImageGraph, NodeId};
use crate::errors::{BuildGraphError, Result};
use crate::image::Image;

/// Renders graph nodes into [`Image`]s, memoising every ancestor on the way.
///
/// An image inherits from its primary parent: the first defined parent in
/// `name:version` order. Images without parents render standalone.
pub struct Renderer<'g> {
    graph: &'g ImageGraph,
    rendered: HashMap<NodeId, Arc<Image>>,
}

impl<'g> Renderer<'g> {
    pub fn new(graph: &'g ImageGraph) -> Self {
        Self {
            graph,
            rendered: HashMap::new(),
        }
    }

    pub fn render(&mut self, id: NodeId) -> Result<Arc<Image>> {
        if let Some(image) = self.rendered.get(&id) {
            return Ok(Arc::clone(image));
        }

        let node = self.graph.node(id);
        let definition = node.item().ok_or_else(|| {
            BuildGraphError::ImageNotFound(format!("'{}' is referenced but not defined", node.key()))
        })?;

        let parent = match self.primary_parent(id) {
            Some(parent_id) => Some(self.render(parent_id)?),
            None => None,
        };

        let image = Arc::new(Image::render(
            node.key().clone(),
            definition,
            parent.as_deref(),
        ));
        self.rendered.insert(id, Arc::clone(&image));
        Ok(image)
    }

    fn primary_parent(&self, id: NodeId) -> Option<NodeId> {
        self.graph
            .parents_of(id)
            .filter(|p| p.is_defined())
            .min_by(|a, b| a.key().cmp(b.key()))
            .map(|p| p.id())
    }
}
