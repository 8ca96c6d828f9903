// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use tracing::{debug, error, info};

use crate::config::model::{ConfigFile, EngineSection, RawConfigFile};
use crate::dag::{GraphBuilder, ImageGraph};
use crate::errors::{BuildGraphError, Result};

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and run per-file validation.
///
/// Graph-level problems (duplicates across files, cycles, orphans) are only
/// visible once every file is in; see [`load_graph`].
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Default config path: `Buildgraph.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Buildgraph.toml")
}

/// Engine settings and the finished image graph from a set of config files.
#[derive(Debug)]
pub struct LoadedConfig {
    pub engine: EngineSection,
    pub graph: ImageGraph,
}

/// Load every file in `paths` into one image graph.
///
/// Files are parsed on separate threads and their definitions inserted into
/// a shared [`GraphBuilder`] as soon as each file is parsed, so a definition
/// may reference an image from a file that has not been read yet. Once all
/// files are in, the graph is swept for cycles and orphan references.
pub fn load_graph<P>(paths: &[P]) -> Result<LoadedConfig>
where
    P: AsRef<Path> + Sync,
{
    if paths.is_empty() {
        return Err(BuildGraphError::ConfigError(
            "no configuration files given".to_string(),
        ));
    }

    let builder = GraphBuilder::new();

    let results: Vec<Result<ConfigFile>> = std::thread::scope(|s| {
        let handles: Vec<_> = paths
            .iter()
            .map(|path| {
                let builder = &builder;
                s.spawn(move || load_into(builder, path.as_ref()))
            })
            .collect();

        handles
            .into_iter()
            .map(|h| {
                h.join().unwrap_or_else(|_| {
                    Err(BuildGraphError::Other(anyhow!("config loader thread panicked")))
                })
            })
            .collect()
    });

    let mut engine: Option<(EngineSection, &Path)> = None;
    for (path, result) in paths.iter().zip(results) {
        let path = path.as_ref();
        let cfg = result?;

        if let Some(section) = cfg.engine {
            if let Some((_, first)) = engine {
                return Err(BuildGraphError::ConfigError(format!(
                    "[engine] is declared in both {} and {}",
                    first.display(),
                    path.display()
                )));
            }
            engine = Some((section, path));
        }
    }

    let graph = builder.build()?;
    info!(
        files = paths.len(),
        images = graph.len(),
        "image graph loaded"
    );

    Ok(LoadedConfig {
        engine: engine.map(|(section, _)| section).unwrap_or_default(),
        graph,
    })
}

fn load_into(builder: &GraphBuilder, path: &Path) -> Result<ConfigFile> {
    let cfg = load_and_validate(path).inspect_err(|e| {
        error!(path = %path.display(), error = %e, "failed to read config file");
    })?;

    for (name, versions) in &cfg.images {
        for (version, definition) in versions {
            builder
                .add_image(name, version, definition.clone())
                .inspect_err(|e| {
                    error!(path = %path.display(), image = %name, version = %version, error = %e, "rejected image definition");
                })?;
        }
    }

    debug!(
        path = %path.display(),
        definitions = cfg.definition_count(),
        "config file loaded"
    );
    Ok(cfg)
}
