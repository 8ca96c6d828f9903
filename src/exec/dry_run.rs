// src/exec/dry_run.rs

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::image::Image;

use super::driver::{BuildDriver, BuildDriverOptions, BuildFuture};

/// Logs what would be built and succeeds.
#[derive(Debug, Clone, Default)]
pub struct DryRunDriver;

impl DryRunDriver {
    pub const NAME: &'static str = "dry-run";

    pub fn new() -> Self {
        Self
    }
}

impl BuildDriver for DryRunDriver {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn build<'a>(
        &'a self,
        _ctx: &'a CancellationToken,
        image: &'a Image,
        options: &'a BuildDriverOptions,
    ) -> BuildFuture<'a> {
        Box::pin(async move {
            let tags: Vec<String> = options.tags.iter().map(|t| options.reference(t)).collect();
            info!(
                image = %image.id,
                builder = %options.builder_name,
                parent = ?options.parent.as_ref().map(|p| p.id.to_string()),
                ?tags,
                push = options.push_after_build,
                "dry-run build"
            );
            Ok(())
        })
    }
}
