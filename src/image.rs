// src/image.rs

//! Image identities and the rendered image handed to build drivers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::config::model::ImageDefinition;
use crate::errors::BuildGraphError;

/// `name:version` key identifying one image definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageRef {
    pub name: String,
    pub version: String,
}

impl ImageRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// Parses `name:version`, splitting at the first `:`.
impl FromStr for ImageRef {
    type Err = BuildGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((name, version)) if !name.is_empty() && !version.is_empty() => {
                Ok(ImageRef::new(name, version))
            }
            _ => Err(BuildGraphError::InvalidDefinition(format!(
                "image reference '{s}' is not of the form name:version"
            ))),
        }
    }
}

/// Parent identity as seen by a rendered child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentImage {
    pub id: ImageRef,
    pub registry_host: Option<String>,
    pub registry_namespace: Option<String>,
}

/// A fully rendered image, ready to be wrapped in a build step.
///
/// Rendering only resolves inheritance (persistent vars and parent identity);
/// no string templating happens here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: ImageRef,
    pub builder: String,
    pub cmd: Option<String>,
    pub registry_host: Option<String>,
    pub registry_namespace: Option<String>,
    pub tags: Vec<String>,
    pub vars: BTreeMap<String, String>,
    pub persistent_vars: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub parent: Option<ParentImage>,
}

impl Image {
    /// Render `definition` for `id`, inheriting from an already rendered parent.
    ///
    /// Parent persistent vars only fill keys the image does not set itself.
    pub fn render(id: ImageRef, definition: &ImageDefinition, parent: Option<&Image>) -> Self {
        let mut persistent_vars = definition.persistent_vars.clone();
        if let Some(parent) = parent {
            for (k, v) in &parent.persistent_vars {
                persistent_vars.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }

        Self {
            id,
            builder: definition.builder.clone(),
            cmd: definition.cmd.clone(),
            registry_host: definition.registry.clone(),
            registry_namespace: definition.namespace.clone(),
            tags: definition.tags.clone(),
            vars: definition.vars.clone(),
            persistent_vars,
            labels: definition.labels.clone(),
            parent: parent.map(|p| ParentImage {
                id: p.id.clone(),
                registry_host: p.registry_host.clone(),
                registry_namespace: p.registry_namespace.clone(),
            }),
        }
    }
}
