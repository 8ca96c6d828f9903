// src/exec/driver.rs

//! Pluggable build drivers.
//!
//! The orchestrator never runs a build itself; it hands a rendered image and
//! the merged options to a [`BuildDriver`] picked by the image's `builder`
//! name. Production uses [`ShellDriver`](super::ShellDriver); tests register
//! a recording fake.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::errors::{BuildGraphError, Result};
use crate::image::{Image, ParentImage};

use super::dry_run::DryRunDriver;
use super::shell::ShellDriver;

pub type BuildFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Something that can build one image.
pub trait BuildDriver: Send + Sync {
    /// Name images use in `builder = "..."` to select this driver.
    fn name(&self) -> &str;

    /// Build `image`. Implementations should stop promptly once `ctx` is cancelled.
    fn build<'a>(
        &'a self,
        ctx: &'a CancellationToken,
        image: &'a Image,
        options: &'a BuildDriverOptions,
    ) -> BuildFuture<'a>;
}

/// Registry credentials handed to drivers untouched.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Per-step options after merging run options over the image's own values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildDriverOptions {
    pub image_name: String,
    pub image_version: String,
    pub registry_host: Option<String>,
    pub registry_namespace: Option<String>,
    pub tags: Vec<String>,
    pub vars: BTreeMap<String, String>,
    pub persistent_vars: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    /// `builder_<driver>_<namespace>_<name>_<version>`.
    pub builder_name: String,
    pub parent: Option<ParentImage>,
    pub pull_parent_image: bool,
    pub push_after_build: bool,
    pub remove_after_build: bool,
    pub pull_auth: Option<RegistryAuth>,
    pub push_auth: Option<RegistryAuth>,
}

impl BuildDriverOptions {
    /// Fully qualified reference for `tag`: `[registry/][namespace/]name:tag`.
    pub fn reference(&self, tag: &str) -> String {
        let mut out = String::new();
        if let Some(host) = &self.registry_host {
            out.push_str(host);
            out.push('/');
        }
        if let Some(ns) = &self.registry_namespace {
            out.push_str(ns);
            out.push('/');
        }
        out.push_str(&self.image_name);
        out.push(':');
        out.push_str(tag);
        out
    }
}

/// Build drivers by name.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn BuildDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `shell` and `dry-run` drivers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ShellDriver::new()));
        registry.register(Arc::new(DryRunDriver::new()));
        registry
    }

    /// Add `driver`, replacing any driver registered under the same name.
    pub fn register(&mut self, driver: Arc<dyn BuildDriver>) {
        self.drivers.insert(driver.name().to_string(), driver);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn BuildDriver>> {
        self.drivers.get(name).cloned().ok_or_else(|| {
            let mut known: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
            known.sort_unstable();
            BuildGraphError::ConfigError(format!(
                "unknown build driver '{name}' (known: {})",
                known.join(", ")
            ))
        })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}
