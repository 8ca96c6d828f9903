// src/plan/single.rs

use crate::dag::ImageGraph;
use crate::errors::Result;
use crate::plan::render::Renderer;
use crate::plan::{Plan, Planner, Step, find_images};
use crate::types::PlanKind;

/// Builds exactly the requested versions. Steps are never wired together,
/// even when one requested version is a child of another.
pub struct SinglePlan<'g> {
    graph: &'g ImageGraph,
}

impl<'g> SinglePlan<'g> {
    pub fn new(graph: &'g ImageGraph) -> Self {
        Self { graph }
    }
}

impl Planner for SinglePlan<'_> {
    fn kind(&self) -> PlanKind {
        PlanKind::Single
    }

    fn plan(&self, name: &str, versions: &[String]) -> Result<Plan> {
        let mut renderer = Renderer::new(self.graph);
        let mut plan = Plan::new();
        for id in find_images(self.graph, name, versions)? {
            plan.push(Step::new(renderer.render(id)?));
        }
        Ok(plan)
    }
}
