// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::types::CascadeDepth;

/// Image definitions keyed by name, then version.
pub type ImageTable = BTreeMap<String, BTreeMap<String, ImageDefinition>>;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [engine]
/// workers = 2
///
/// [images.base.v1]
/// cmd = "docker build -t base:v1 base/"
///
/// [images.app.v1]
/// cmd = "docker build -t app:v1 app/"
/// parents = { base = ["v1"] }
/// ```
///
/// Definitions may live in several files; a parent or child may be declared
/// in a file that is read later.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    /// Engine settings from `[engine]`. Only one file may declare it.
    #[serde(default)]
    pub engine: Option<EngineSection>,

    /// All images from `[images.<name>.<version>]`.
    #[serde(default)]
    pub images: ImageTable,
}

/// Validated configuration file.
///
/// Only obtainable through `TryFrom<RawConfigFile>` (see `validate.rs`).
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub engine: Option<EngineSection>,
    pub images: ImageTable,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(engine: Option<EngineSection>, images: ImageTable) -> Self {
        Self { engine, images }
    }

    /// Number of `name:version` definitions in this file.
    pub fn definition_count(&self) -> usize {
        self.images.values().map(|versions| versions.len()).sum()
    }
}

/// `[engine]` section.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EngineSection {
    /// Number of builds allowed to execute at the same time.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Jobs that may wait in the dispatcher queue before enqueue blocks.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Depth used by `--cascade` when no explicit depth is given.
    /// Negative values mean unlimited.
    #[serde(default)]
    pub cascade_depth: CascadeDepth,
}

fn default_workers() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    8
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            cascade_depth: CascadeDepth::default(),
        }
    }
}

/// `[images.<name>.<version>]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ImageDefinition {
    /// Name of the build driver (`"shell"` or `"dry-run"`).
    #[serde(default = "default_builder")]
    pub builder: String,

    /// Command run by the shell driver.
    #[serde(default)]
    pub cmd: Option<String>,

    /// Registry host the image is pushed to.
    #[serde(default)]
    pub registry: Option<String>,

    /// Registry namespace the image is pushed to.
    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    /// Vars inherited by every descendant that does not override them.
    #[serde(default)]
    pub persistent_vars: BTreeMap<String, String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Images this one is built from: name -> versions.
    #[serde(default)]
    pub parents: BTreeMap<String, Vec<String>>,

    /// Images built from this one: name -> versions.
    #[serde(default)]
    pub children: BTreeMap<String, Vec<String>>,
}

fn default_builder() -> String {
    "shell".to_string()
}

impl Default for ImageDefinition {
    fn default() -> Self {
        Self {
            builder: default_builder(),
            cmd: None,
            registry: None,
            namespace: None,
            tags: Vec::new(),
            vars: BTreeMap::new(),
            persistent_vars: BTreeMap::new(),
            labels: BTreeMap::new(),
            parents: BTreeMap::new(),
            children: BTreeMap::new(),
        }
    }
}
