// src/config/mod.rs

//! Configuration: TOML model, loading and validation.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{LoadedConfig, load_and_validate, load_from_path, load_graph};
pub use model::{ConfigFile, EngineSection, ImageDefinition, RawConfigFile};
