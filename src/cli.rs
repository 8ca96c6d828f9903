// src/cli.rs

//! CLI argument parsing using `clap`.

use std::collections::BTreeMap;

use clap::{Parser, ValueEnum};

use crate::engine::BuildOptions;
use crate::errors::{BuildGraphError, Result};
use crate::types::CascadeDepth;

/// Command-line arguments for `buildgraph`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "buildgraph",
    disable_version_flag = true,
    about = "Build container images in parent/child dependency order.",
    long_about = None
)]
pub struct CliArgs {
    /// Image to build.
    #[arg(value_name = "IMAGE")]
    pub image: String,

    /// Path to the main config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Buildgraph.toml")]
    pub config: String,

    /// Additional files with image definitions. May be repeated.
    #[arg(long = "images", value_name = "PATH")]
    pub images: Vec<String>,

    /// Version to build. May be repeated; every version when omitted.
    #[arg(long = "version", short = 'V', value_name = "VERSION")]
    pub versions: Vec<String>,

    /// Also rebuild descendants of the image.
    #[arg(long)]
    pub cascade: bool,

    /// Generations to descend when cascading (negative or "unlimited" for no limit).
    ///
    /// Implies `--cascade`. Defaults to `[engine].cascade_depth`.
    #[arg(long, value_name = "N", allow_hyphen_values = true)]
    pub cascade_depth: Option<CascadeDepth>,

    /// Number of builds allowed to run at once. Overrides `[engine].workers`.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Build under a different image name. Not allowed with `--cascade`.
    #[arg(long, value_name = "NAME")]
    pub image_name: Option<String>,

    #[arg(long, value_name = "HOST")]
    pub registry_host: Option<String>,

    #[arg(long, value_name = "NAMESPACE")]
    pub registry_namespace: Option<String>,

    /// Extra tag. May be repeated.
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,

    /// Build variable as KEY=VALUE. May be repeated.
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    /// Variable inherited by descendants, as KEY=VALUE. May be repeated.
    #[arg(long = "persistent-var", value_name = "KEY=VALUE")]
    pub persistent_vars: Vec<String>,

    /// Image label as KEY=VALUE. May be repeated.
    #[arg(long = "label", value_name = "KEY=VALUE")]
    pub labels: Vec<String>,

    /// Push images after building them.
    #[arg(long)]
    pub push: bool,

    /// Pull the parent image before building.
    #[arg(long)]
    pub pull_parent: bool,

    /// Remove local images after building them.
    #[arg(long)]
    pub remove_after_build: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `BUILDGRAPH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load and plan, print the plan, but don't build anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl CliArgs {
    /// Every config file to load: `--config` first, then each `--images`.
    pub fn config_paths(&self) -> Vec<String> {
        std::iter::once(self.config.clone())
            .chain(self.images.iter().cloned())
            .collect()
    }

    /// Build options from the flags. `default_depth` applies to a bare `--cascade`.
    pub fn build_options(&self, default_depth: CascadeDepth) -> Result<BuildOptions> {
        let cascade = match (self.cascade, self.cascade_depth) {
            (_, Some(depth)) => Some(depth),
            (true, None) => Some(default_depth),
            (false, None) => None,
        };

        Ok(BuildOptions {
            image_name: self.image_name.clone(),
            registry_host: self.registry_host.clone(),
            registry_namespace: self.registry_namespace.clone(),
            tags: self.tags.clone(),
            vars: parse_pairs("--var", &self.vars)?,
            persistent_vars: parse_pairs("--persistent-var", &self.persistent_vars)?,
            labels: parse_pairs("--label", &self.labels)?,
            pull_parent_image: self.pull_parent,
            push_after_build: self.push,
            remove_after_build: self.remove_after_build,
            cascade,
            credentials: BTreeMap::new(),
        })
    }
}

fn parse_pairs(flag: &str, pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => {
                out.insert(k.trim().to_string(), v.to_string());
            }
            _ => {
                return Err(BuildGraphError::ConfigError(format!(
                    "{flag} expects KEY=VALUE, got '{pair}'"
                )));
            }
        }
    }
    Ok(out)
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
