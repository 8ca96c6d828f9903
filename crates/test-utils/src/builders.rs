#![allow(dead_code)]

use buildgraph::config::ImageDefinition;
use buildgraph::dag::{GraphBuilder, ImageGraph};

/// Builder for `ImageDefinition` to simplify test setup.
pub struct ImageDefinitionBuilder {
    def: ImageDefinition,
}

impl ImageDefinitionBuilder {
    pub fn new() -> Self {
        Self {
            def: ImageDefinition::default(),
        }
    }

    pub fn builder(mut self, name: &str) -> Self {
        self.def.builder = name.to_string();
        self
    }

    pub fn cmd(mut self, cmd: &str) -> Self {
        self.def.cmd = Some(cmd.to_string());
        self
    }

    /// Add a parent given as `name:version`.
    pub fn parent(mut self, id: &str) -> Self {
        let (name, version) = split(id);
        self.def.parents.entry(name).or_default().push(version);
        self
    }

    /// Add a child given as `name:version`.
    pub fn child(mut self, id: &str) -> Self {
        let (name, version) = split(id);
        self.def.children.entry(name).or_default().push(version);
        self
    }

    pub fn registry(mut self, host: &str) -> Self {
        self.def.registry = Some(host.to_string());
        self
    }

    pub fn namespace(mut self, ns: &str) -> Self {
        self.def.namespace = Some(ns.to_string());
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.def.tags.push(tag.to_string());
        self
    }

    pub fn var(mut self, key: &str, value: &str) -> Self {
        self.def.vars.insert(key.to_string(), value.to_string());
        self
    }

    pub fn persistent_var(mut self, key: &str, value: &str) -> Self {
        self.def
            .persistent_vars
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.def.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> ImageDefinition {
        self.def
    }
}

impl Default for ImageDefinitionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn split(id: &str) -> (String, String) {
    let (name, version) = id
        .split_once(':')
        .unwrap_or_else(|| panic!("expected name:version, got '{id}'"));
    (name.to_string(), version.to_string())
}

/// Adds images to a `GraphBuilder` and builds the graph, panicking on any error.
pub struct GraphFixture {
    builder: GraphBuilder,
}

impl GraphFixture {
    pub fn new() -> Self {
        Self {
            builder: GraphBuilder::new(),
        }
    }

    /// Add `id` (`name:version`) with parents given as `name:version`.
    pub fn image(self, id: &str, parents: &[&str]) -> Self {
        let def = parents
            .iter()
            .fold(ImageDefinitionBuilder::new(), |b, p| b.parent(p))
            .build();
        self.with_definition(id, def)
    }

    pub fn with_definition(self, id: &str, def: ImageDefinition) -> Self {
        let (name, version) = split(id);
        self.builder
            .add_image(&name, &version, def)
            .unwrap_or_else(|e| panic!("failed to add {id}: {e}"));
        self
    }

    pub fn builder(&self) -> &GraphBuilder {
        &self.builder
    }

    pub fn build(self) -> ImageGraph {
        self.builder.build().expect("fixture graph should be valid")
    }
}

impl Default for GraphFixture {
    fn default() -> Self {
        Self::new()
    }
}
