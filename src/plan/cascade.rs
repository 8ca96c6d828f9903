// src/plan/cascade.rs

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::dag::{ImageGraph, NodeId};
use crate::errors::Result;
use crate::plan::render::Renderer;
use crate::plan::{Plan, Planner, Step, find_images};
use crate::types::{CascadeDepth, PlanKind};

/// Builds the requested versions and their descendants.
///
/// Each generation below a requested image costs one unit of the depth
/// budget. A descendant reachable along several paths gets a single step and
/// keeps the largest budget it was reached with. Once membership is known,
/// every graph edge between two planned steps is wired, so a step always
/// waits for all of its planned parents.
pub struct CascadePlan<'g> {
    graph: &'g ImageGraph,
    depth: CascadeDepth,
}

impl<'g> CascadePlan<'g> {
    pub fn new(graph: &'g ImageGraph, depth: CascadeDepth) -> Self {
        Self { graph, depth }
    }

    /// Planned nodes in breadth-first order.
    fn members(&self, roots: Vec<NodeId>) -> Vec<NodeId> {
        let mut order: Vec<NodeId> = Vec::new();
        let mut budget: HashMap<NodeId, CascadeDepth> = HashMap::new();
        let mut queue: VecDeque<(NodeId, CascadeDepth)> = VecDeque::new();

        for root in roots {
            if budget.insert(root, self.depth).is_none() {
                order.push(root);
            }
            queue.push_back((root, self.depth));
        }

        while let Some((id, depth)) = queue.pop_front() {
            if !depth.allows_descent() {
                continue;
            }
            let next = depth.decrement();

            let mut children: Vec<_> = self.graph.children_of(id).filter(|c| c.is_defined()).collect();
            children.sort_by(|a, b| a.key().cmp(b.key()));

            for child in children {
                let child_id = child.id();
                match budget.get(&child_id) {
                    None => {
                        order.push(child_id);
                    }
                    Some(seen) if next.exceeds(*seen) => {}
                    Some(_) => continue,
                }
                budget.insert(child_id, next);
                queue.push_back((child_id, next));
            }
        }

        order
    }
}

impl Planner for CascadePlan<'_> {
    fn kind(&self) -> PlanKind {
        PlanKind::Cascade(self.depth)
    }

    fn plan(&self, name: &str, versions: &[String]) -> Result<Plan> {
        let roots = find_images(self.graph, name, versions)?;
        let members = self.members(roots);

        let mut renderer = Renderer::new(self.graph);
        let mut plan = Plan::new();
        let mut index: HashMap<NodeId, usize> = HashMap::new();
        for id in &members {
            let idx = plan.push(Step::new(renderer.render(*id)?));
            index.insert(*id, idx);
        }

        let mut wired: HashSet<(usize, usize)> = HashSet::new();
        for id in &members {
            let parent_idx = index[id];
            for child in self.graph.node(*id).children() {
                if let Some(child_idx) = index.get(child) {
                    if wired.insert((parent_idx, *child_idx)) {
                        plan.connect(parent_idx, *child_idx)?;
                    }
                }
            }
        }

        debug!(
            image = name,
            depth = %self.depth,
            steps = plan.len(),
            edges = wired.len(),
            "cascade plan built"
        );
        Ok(plan)
    }
}
