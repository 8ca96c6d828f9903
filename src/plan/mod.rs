// src/plan/mod.rs

//! Turning a build request into wired build steps.
//!
//! - [`step`] holds [`Step`], its fan-in [`Gate`] and [`StepOutcome`].
//! - [`single`] plans exactly the requested versions.
//! - [`cascade`] also plans descendants down to a depth budget.
//! - [`render`] resolves inheritance from parent images.

pub mod cascade;
pub mod render;
pub mod single;
pub mod step;

use std::collections::HashSet;

use crate::dag::{ImageGraph, NodeId};
use crate::errors::{BuildGraphError, Result};
use crate::image::ImageRef;
use crate::types::PlanKind;

pub use cascade::CascadePlan;
pub use single::SinglePlan;
pub use step::{Gate, GateResult, Step, StepOutcome};

/// Ordered build steps with their parent/child wiring.
///
/// The order only makes logs and dry-run output deterministic; execution
/// order comes entirely from the wiring.
#[derive(Debug, Default)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step and return its index.
    pub fn push(&mut self, step: Step) -> usize {
        self.steps.push(step);
        self.steps.len() - 1
    }

    /// Make `child` wait for `parent`.
    ///
    /// The child gets one more inbound signal to count and the parent one
    /// more subscriber to notify.
    pub fn connect(&mut self, parent: usize, child: usize) -> Result<()> {
        if parent == child || parent >= self.steps.len() || child >= self.steps.len() {
            return Err(BuildGraphError::PlanError(format!(
                "cannot wire step {parent} to step {child}"
            )));
        }
        let tx = self.steps[child].add_parent();
        self.steps[parent].subscribe(tx);
        self.steps[parent].push_child(child);
        Ok(())
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<Step> {
        self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn position(&self, id: &ImageRef) -> Option<usize> {
        self.steps.iter().position(|s| s.id() == id)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.label()).collect()
    }
}

/// Strategy that turns `(name, versions)` into a [`Plan`].
pub trait Planner: Send + Sync {
    fn kind(&self) -> PlanKind;

    /// Plan a build of `name`; empty `versions` means every defined version.
    fn plan(&self, name: &str, versions: &[String]) -> Result<Plan>;
}

/// Picks the planner for a [`PlanKind`].
pub struct PlanFactory;

impl PlanFactory {
    pub fn planner<'g>(kind: PlanKind, graph: &'g ImageGraph) -> Box<dyn Planner + 'g> {
        match kind {
            PlanKind::Single => Box::new(SinglePlan::new(graph)),
            PlanKind::Cascade(depth) => Box::new(CascadePlan::new(graph, depth)),
        }
    }
}

/// Resolve the requested versions of `name` to graph nodes.
///
/// Every missing version is reported at once.
pub(crate) fn find_images(graph: &ImageGraph, name: &str, versions: &[String]) -> Result<Vec<NodeId>> {
    if versions.is_empty() {
        let all = graph.versions_of(name);
        if all.is_empty() {
            return Err(BuildGraphError::ImageNotFound(format!(
                "no versions of '{name}' are defined"
            )));
        }
        return Ok(all
            .into_iter()
            .filter_map(|v| graph.get_node(name, v).map(|n| n.id()))
            .collect());
    }

    let mut seen = HashSet::new();
    let mut found = Vec::new();
    let mut missing = Vec::new();
    for version in versions {
        if !seen.insert(version.as_str()) {
            continue;
        }
        match graph.get_node(name, version) {
            Some(node) => found.push(node.id()),
            None => missing.push(ImageRef::new(name, version.clone()).to_string()),
        }
    }

    if missing.is_empty() {
        Ok(found)
    } else {
        Err(BuildGraphError::ImageNotFound(missing.join(", ")))
    }
}
