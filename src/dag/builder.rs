// src/dag/builder.rs

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::anyhow;
use tracing::{debug, trace};

use crate::config::model::ImageDefinition;
use crate::dag::graph::ImageGraph;
use crate::dag::node::NodeId;
use crate::errors::{BuildGraphError, OrphanReference, Result};
use crate::image::ImageRef;

/// Placeholders for referenced-but-undefined images: name -> version -> node.
type PendingTable = HashMap<String, HashMap<String, NodeId>>;

#[derive(Debug, Default)]
struct BuilderState {
    graph: ImageGraph,
    pending: PendingTable,
}

/// Incrementally assembles an [`ImageGraph`] from image definitions.
///
/// Definitions may arrive in any order and from several threads. A parent or
/// child that is referenced before it is defined gets a placeholder node,
/// which is promoted in place once the real definition is added. Every
/// insertion is checked for cycles before anything is committed, so a
/// rejected call leaves the graph exactly as it was.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    state: RwLock<BuilderState>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the definition of `name:version`.
    pub fn add_image(&self, name: &str, version: &str, definition: ImageDefinition) -> Result<NodeId> {
        validate_identity(name, version)?;
        let key = ImageRef::new(name, version);

        let parents = collect_refs(&key, "parent", &definition.parents)?;
        let children = collect_refs(&key, "child", &definition.children)?;

        let mut state = self.write()?;

        let existing = state.graph.lookup(&key);
        if let Some(id) = existing {
            if state.graph.node(id).is_defined() {
                return Err(BuildGraphError::DuplicateNode(key.to_string()));
            }
        }

        check_insertion(&state.graph, &key, existing, &parents, &children)?;

        // Nothing below can fail.
        let id = match state.take_pending(&key) {
            Some(id) => {
                debug!(image = %key, node = %id, "promoting pending image");
                id
            }
            None => state.graph.insert_node(key.clone()),
        };
        state.graph.set_item(id, Arc::new(definition));

        for parent in &parents {
            let parent_id = state.resolve(parent);
            state.graph.add_relationship(parent_id, id);
        }
        for child in &children {
            let child_id = state.resolve(child);
            state.graph.add_relationship(id, child_id);
        }

        debug!(
            image = %key,
            parents = parents.len(),
            children = children.len(),
            "image added to graph"
        );
        Ok(id)
    }

    /// Whether `name:version` has been defined (placeholders do not count).
    pub fn exists(&self, name: &str, version: &str) -> Result<bool> {
        Ok(self.read()?.graph.exists(name, version))
    }

    /// Whether `name:version` is referenced but not yet defined.
    pub fn is_pending(&self, name: &str, version: &str) -> Result<bool> {
        let state = self.read()?;
        Ok(state
            .pending
            .get(name)
            .is_some_and(|versions| versions.contains_key(version)))
    }

    /// Every reference still waiting for a definition, sorted.
    pub fn pending_references(&self) -> Result<Vec<ImageRef>> {
        let state = self.read()?;
        let mut refs: Vec<ImageRef> = state
            .pending
            .iter()
            .flat_map(|(name, versions)| versions.keys().map(move |v| ImageRef::new(name.clone(), v.clone())))
            .collect();
        refs.sort();
        Ok(refs)
    }

    /// Number of defined images.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.graph.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Final acyclicity sweep over the whole graph.
    pub fn validate(&self) -> Result<()> {
        let state = self.read()?;
        match state.graph.find_cycle() {
            Some(on_cycle) => Err(BuildGraphError::CycleDetected(format!(
                "'{on_cycle}' is part of a dependency cycle"
            ))),
            None => Ok(()),
        }
    }

    /// Fail with every reference that never received a definition.
    pub fn check_orphans(&self) -> Result<()> {
        let state = self.read()?;
        let orphans = state.orphans();
        if orphans.is_empty() {
            Ok(())
        } else {
            Err(BuildGraphError::OrphanReference(orphans))
        }
    }

    /// Finish the load phase: validate, check for orphans, hand out the graph.
    pub fn build(self) -> Result<ImageGraph> {
        self.validate()?;
        self.check_orphans()?;

        let state = self
            .state
            .into_inner()
            .map_err(|_| BuildGraphError::Other(anyhow!("graph builder lock poisoned")))?;
        trace!(images = state.graph.len(), "graph built");
        Ok(state.graph)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BuilderState>> {
        self.state
            .read()
            .map_err(|_| BuildGraphError::Other(anyhow!("graph builder lock poisoned")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BuilderState>> {
        self.state
            .write()
            .map_err(|_| BuildGraphError::Other(anyhow!("graph builder lock poisoned")))
    }
}

impl BuilderState {
    fn take_pending(&mut self, key: &ImageRef) -> Option<NodeId> {
        let versions = self.pending.get_mut(&key.name)?;
        let id = versions.remove(&key.version);
        if versions.is_empty() {
            self.pending.remove(&key.name);
        }
        id
    }

    /// Node for a reference: pending placeholder, committed node, or a new placeholder.
    fn resolve(&mut self, key: &ImageRef) -> NodeId {
        if let Some(id) = self
            .pending
            .get(&key.name)
            .and_then(|versions| versions.get(&key.version))
        {
            return *id;
        }
        if let Some(id) = self.graph.lookup(key) {
            return id;
        }

        let id = self.graph.insert_node(key.clone());
        self.pending
            .entry(key.name.clone())
            .or_default()
            .insert(key.version.clone(), id);
        trace!(image = %key, node = %id, "pending reference created");
        id
    }

    fn orphans(&self) -> Vec<OrphanReference> {
        let mut orphans: Vec<OrphanReference> = self
            .pending
            .values()
            .flat_map(|versions| versions.values())
            .map(|id| {
                let node = self.graph.node(*id);
                let mut referenced_by: Vec<String> = node
                    .parents()
                    .iter()
                    .chain(node.children())
                    .map(|other| self.graph.node(*other).key().to_string())
                    .collect();
                referenced_by.sort();
                referenced_by.dedup();
                OrphanReference {
                    image: node.key().to_string(),
                    referenced_by,
                }
            })
            .collect();
        orphans.sort_by(|a, b| a.image.cmp(&b.image));
        orphans
    }
}

fn validate_identity(name: &str, version: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(BuildGraphError::InvalidDefinition(
            "image name must not be empty".to_string(),
        ));
    }
    if version.trim().is_empty() {
        return Err(BuildGraphError::InvalidDefinition(format!(
            "image '{name}' has an empty version"
        )));
    }
    if name.contains(':') {
        return Err(BuildGraphError::InvalidDefinition(format!(
            "image name '{name}' must not contain ':'"
        )));
    }
    Ok(())
}

fn collect_refs(
    owner: &ImageRef,
    kind: &str,
    refs: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<ImageRef>> {
    let mut out = Vec::new();
    for (name, versions) in refs {
        if name.trim().is_empty() || name.contains(':') {
            return Err(BuildGraphError::InvalidDefinition(format!(
                "image '{owner}' has an invalid {kind} name '{name}'"
            )));
        }
        for version in versions {
            if version.trim().is_empty() {
                return Err(BuildGraphError::InvalidDefinition(format!(
                    "image '{owner}' references {kind} '{name}' with an empty version"
                )));
            }
            let key = ImageRef::new(name.clone(), version.clone());
            if !out.contains(&key) {
                out.push(key);
            }
        }
    }
    Ok(out)
}

/// Reject an insertion that would close a cycle.
///
/// The committed graph is acyclic and every new edge touches `key`, so a new
/// cycle has to leave `key` through one of its children and come back through
/// one of its parents.
fn check_insertion(
    graph: &ImageGraph,
    key: &ImageRef,
    existing: Option<NodeId>,
    parents: &[ImageRef],
    children: &[ImageRef],
) -> Result<()> {
    if let Some(self_ref) = parents.iter().chain(children).find(|r| *r == key) {
        return Err(BuildGraphError::CycleDetected(format!(
            "'{key}' references itself as '{self_ref}'"
        )));
    }
    if let Some(both) = parents.iter().find(|p| children.contains(p)) {
        return Err(BuildGraphError::CycleDetected(format!(
            "'{key}' declares '{both}' as both parent and child"
        )));
    }

    let mut upstream: HashSet<NodeId> = parents.iter().filter_map(|p| graph.lookup(p)).collect();
    let mut downstream: Vec<NodeId> = children.iter().filter_map(|c| graph.lookup(c)).collect();

    if let Some(id) = existing {
        upstream.extend(graph.node(id).parents().iter().copied());
        upstream.insert(id);
        downstream.extend(graph.node(id).children().iter().copied());
    }

    if graph.reaches_any(downstream, &upstream) {
        return Err(BuildGraphError::CycleDetected(format!(
            "adding '{key}' would close a dependency cycle"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(parents: &[(&str, &str)], children: &[(&str, &str)]) -> ImageDefinition {
        let mut d = ImageDefinition::default();
        for (n, v) in parents {
            d.parents.entry(n.to_string()).or_default().push(v.to_string());
        }
        for (n, v) in children {
            d.children.entry(n.to_string()).or_default().push(v.to_string());
        }
        d
    }

    #[test]
    fn rejects_invalid_identity() {
        let b = GraphBuilder::new();
        assert!(matches!(
            b.add_image("", "v1", def(&[], &[])),
            Err(BuildGraphError::InvalidDefinition(_))
        ));
        assert!(matches!(
            b.add_image("base", " ", def(&[], &[])),
            Err(BuildGraphError::InvalidDefinition(_))
        ));
        assert!(matches!(
            b.add_image("app", "v1", def(&[("base", "")], &[])),
            Err(BuildGraphError::InvalidDefinition(_))
        ));
        assert!(b.is_empty().unwrap());
    }

    #[test]
    fn rejects_duplicates() {
        let b = GraphBuilder::new();
        b.add_image("base", "v1", def(&[], &[])).unwrap();
        match b.add_image("base", "v1", def(&[], &[])) {
            Err(BuildGraphError::DuplicateNode(id)) => assert_eq!(id, "base:v1"),
            other => panic!("expected DuplicateNode, got {other:?}"),
        }
    }

    #[test]
    fn promotes_pending_node_in_place() {
        let b = GraphBuilder::new();
        b.add_image("app", "v1", def(&[("base", "v1")], &[])).unwrap();
        assert!(b.is_pending("base", "v1").unwrap());
        assert!(!b.exists("base", "v1").unwrap());

        let placeholder = {
            let state = b.read().unwrap();
            state.graph.lookup(&ImageRef::new("base", "v1")).unwrap()
        };
        let id = b.add_image("base", "v1", def(&[], &[])).unwrap();

        assert_eq!(id, placeholder);
        assert!(!b.is_pending("base", "v1").unwrap());
        assert!(b.pending_references().unwrap().is_empty());

        let g = b.build().unwrap();
        let app = g.get_node("app", "v1").unwrap();
        assert_eq!(app.parents(), &[id]);
    }

    #[test]
    fn insertion_order_does_not_change_edges() {
        let forward = GraphBuilder::new();
        forward.add_image("base", "v1", def(&[], &[])).unwrap();
        forward.add_image("mid", "v1", def(&[("base", "v1")], &[])).unwrap();
        forward.add_image("leaf", "v1", def(&[("mid", "v1")], &[])).unwrap();

        let backward = GraphBuilder::new();
        backward.add_image("leaf", "v1", def(&[("mid", "v1")], &[])).unwrap();
        backward.add_image("mid", "v1", def(&[("base", "v1")], &[])).unwrap();
        backward.add_image("base", "v1", def(&[], &[])).unwrap();

        let a = forward.build().unwrap();
        let b = backward.build().unwrap();
        assert_eq!(a.edges(), b.edges());
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn children_declared_on_parent_side_create_edges() {
        let b = GraphBuilder::new();
        b.add_image("base", "v1", def(&[], &[("app", "v1"), ("app", "v2")])).unwrap();
        b.add_image("app", "v1", def(&[("base", "v1")], &[])).unwrap();
        b.add_image("app", "v2", def(&[], &[])).unwrap();

        let g = b.build().unwrap();
        let base = g.get_node("base", "v1").unwrap();
        assert_eq!(base.children().len(), 2);
        assert_eq!(g.edges().len(), 2);
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let b = GraphBuilder::new();
        assert!(matches!(
            b.add_image("loop", "v1", def(&[("loop", "v1")], &[])),
            Err(BuildGraphError::CycleDetected(_))
        ));
        assert!(b.is_empty().unwrap());
        assert!(b.pending_references().unwrap().is_empty());
    }

    #[test]
    fn rejects_call_that_closes_cycle_and_rolls_back() {
        let b = GraphBuilder::new();
        b.add_image("a", "1", def(&[], &[("b", "1")])).unwrap();
        b.add_image("c", "1", def(&[("b", "1")], &[])).unwrap();
        let edges_before = b.read().unwrap().graph.edges();

        // b -> c already, and a -> b; defining b as a child of c closes the loop.
        match b.add_image("b", "1", def(&[("c", "1")], &[])) {
            Err(BuildGraphError::CycleDetected(msg)) => assert!(msg.contains("b:1")),
            other => panic!("expected CycleDetected, got {other:?}"),
        }

        assert!(!b.exists("b", "1").unwrap());
        assert!(b.is_pending("b", "1").unwrap());
        assert_eq!(b.read().unwrap().graph.edges(), edges_before);
        b.validate().unwrap();
    }

    #[test]
    fn multi_step_cycle_across_separate_roots() {
        let b = GraphBuilder::new();
        b.add_image("a", "1", def(&[], &[("b", "1")])).unwrap();
        b.add_image("b", "1", def(&[], &[("c", "1")])).unwrap();
        assert!(matches!(
            b.add_image("c", "1", def(&[], &[("a", "1")])),
            Err(BuildGraphError::CycleDetected(_))
        ));
        b.validate().unwrap();
    }

    #[test]
    fn orphans_are_all_reported() {
        let b = GraphBuilder::new();
        b.add_image("mid", "v1", def(&[("base", "v1")], &[("leaf", "v1")])).unwrap();
        b.add_image("mid", "v2", def(&[("base", "v1")], &[])).unwrap();

        match b.build() {
            Err(BuildGraphError::OrphanReference(orphans)) => {
                assert_eq!(orphans.len(), 2);
                assert_eq!(orphans[0].image, "base:v1");
                assert_eq!(orphans[0].referenced_by, vec!["mid:v1", "mid:v2"]);
                assert_eq!(orphans[1].image, "leaf:v1");
                assert_eq!(orphans[1].referenced_by, vec!["mid:v1"]);
            }
            other => panic!("expected OrphanReference, got {other:?}"),
        }
    }

    #[test]
    fn concurrent_inserts_share_one_builder() {
        let b = GraphBuilder::new();
        std::thread::scope(|s| {
            for i in 0..8 {
                let b = &b;
                s.spawn(move || {
                    b.add_image("app", &format!("v{i}"), def(&[("base", "v1")], &[]))
                        .unwrap();
                });
            }
            s.spawn(|| b.add_image("base", "v1", def(&[], &[])).unwrap());
        });

        let g = b.build().unwrap();
        assert_eq!(g.len(), 9);
        assert_eq!(g.get_node("base", "v1").unwrap().children().len(), 8);
    }

    #[test]
    fn poisoned_lock_is_reported() {
        let b = GraphBuilder::new();
        b.add_image("a", "1", def(&[], &[])).unwrap();
        std::thread::scope(|s| {
            let held = s.spawn(|| {
                let _guard = b.state.write().unwrap();
                panic!("writer died holding the lock");
            });
            assert!(held.join().is_err());
        });

        assert!(matches!(b.exists("a", "1"), Err(BuildGraphError::Other(_))));
        assert!(matches!(b.is_pending("a", "1"), Err(BuildGraphError::Other(_))));
        assert!(matches!(b.len(), Err(BuildGraphError::Other(_))));
        assert!(b.add_image("b", "1", def(&[], &[])).is_err());
    }
}
