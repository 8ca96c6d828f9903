// src/exec/command.rs

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::image::Image;

use super::driver::{BuildDriver, BuildDriverOptions, BuildFuture};

/// Unit of work a [`Job`](super::Job) runs.
pub trait Command: Send + Sync {
    fn execute<'a>(&'a self, ctx: &'a CancellationToken) -> BuildFuture<'a>;
}

/// Builds one image with one driver.
pub struct BuildCommand {
    driver: Arc<dyn BuildDriver>,
    image: Arc<Image>,
    options: BuildDriverOptions,
}

impl BuildCommand {
    pub fn new(driver: Arc<dyn BuildDriver>, image: Arc<Image>, options: BuildDriverOptions) -> Self {
        Self {
            driver,
            image,
            options,
        }
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn options(&self) -> &BuildDriverOptions {
        &self.options
    }
}

impl Command for BuildCommand {
    fn execute<'a>(&'a self, ctx: &'a CancellationToken) -> BuildFuture<'a> {
        self.driver.build(ctx, &self.image, &self.options)
    }
}
