// src/engine/options.rs

use std::collections::BTreeMap;

use crate::errors::{BuildGraphError, Result};
use crate::exec::{BuildDriverOptions, RegistryAuth};
use crate::image::Image;
use crate::types::{CascadeDepth, PlanKind};

/// Options for one build invocation, shared by every step it plans.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Build under a different image name. Not allowed together with `cascade`.
    pub image_name: Option<String>,
    pub registry_host: Option<String>,
    pub registry_namespace: Option<String>,
    /// Extra tags, placed before the image's own tags.
    pub tags: Vec<String>,
    pub vars: BTreeMap<String, String>,
    pub persistent_vars: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub pull_parent_image: bool,
    pub push_after_build: bool,
    pub remove_after_build: bool,
    /// Rebuild descendants down to this depth.
    pub cascade: Option<CascadeDepth>,
    /// Registry host -> credentials.
    pub credentials: BTreeMap<String, RegistryAuth>,
}

impl BuildOptions {
    pub fn plan_kind(&self) -> PlanKind {
        match self.cascade {
            Some(depth) => PlanKind::Cascade(depth),
            None => PlanKind::Single,
        }
    }

    /// Reject option combinations that cannot be planned.
    pub fn check(&self) -> Result<()> {
        if self.cascade.is_some() && self.image_name.is_some() {
            return Err(BuildGraphError::PlanError(
                "an image name override cannot be combined with a cascade build".to_string(),
            ));
        }
        Ok(())
    }

    /// Merge these options over `image`'s own settings.
    ///
    /// Options win for vars, persistent vars and labels. Option tags come
    /// first, followed by the image's tags. Registry host and namespace fall
    /// back to the image's.
    pub fn for_image(&self, image: &Image) -> BuildDriverOptions {
        let image_name = self
            .image_name
            .clone()
            .unwrap_or_else(|| image.id.name.clone());
        let registry_host = self
            .registry_host
            .clone()
            .or_else(|| image.registry_host.clone());
        let registry_namespace = self
            .registry_namespace
            .clone()
            .or_else(|| image.registry_namespace.clone());

        let mut tags = self.tags.clone();
        for tag in &image.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }

        let builder_name = format!(
            "builder_{}_{}_{}_{}",
            image.builder,
            registry_namespace.as_deref().unwrap_or_default(),
            image_name,
            image.id.version
        );

        let pull_auth = if self.pull_parent_image {
            image
                .parent
                .as_ref()
                .and_then(|p| p.registry_host.as_ref())
                .and_then(|host| self.credentials.get(host))
                .cloned()
        } else {
            None
        };
        let push_auth = if self.push_after_build {
            registry_host
                .as_ref()
                .and_then(|host| self.credentials.get(host))
                .cloned()
        } else {
            None
        };

        BuildDriverOptions {
            image_name,
            image_version: image.id.version.clone(),
            registry_host,
            registry_namespace,
            tags,
            vars: merged(&image.vars, &self.vars),
            persistent_vars: merged(&image.persistent_vars, &self.persistent_vars),
            labels: merged(&image.labels, &self.labels),
            builder_name,
            parent: image.parent.clone(),
            pull_parent_image: self.pull_parent_image,
            push_after_build: self.push_after_build,
            remove_after_build: self.remove_after_build,
            pull_auth,
            push_auth,
        }
    }
}

fn merged(base: &BTreeMap<String, String>, over: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut out = base.clone();
    out.extend(over.iter().map(|(k, v)| (k.clone(), v.clone())));
    out
}
