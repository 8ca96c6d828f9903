// src/exec/shell.rs

//! Shell build driver.

use std::process::Stdio;

use anyhow::{Context, anyhow};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{BuildGraphError, Result};
use crate::image::Image;

use super::driver::{BuildDriver, BuildDriverOptions, BuildFuture};

/// Runs the image's `cmd` through the platform shell.
///
/// The command sees the merged build options as `BUILDGRAPH_*` environment
/// variables plus every var and persistent var verbatim. Stdout is logged
/// at info, stderr at debug. The process is killed when the build is
/// cancelled.
#[derive(Debug, Clone, Default)]
pub struct ShellDriver;

impl ShellDriver {
    pub const NAME: &'static str = "shell";

    pub fn new() -> Self {
        Self
    }
}

impl BuildDriver for ShellDriver {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn build<'a>(
        &'a self,
        ctx: &'a CancellationToken,
        image: &'a Image,
        options: &'a BuildDriverOptions,
    ) -> BuildFuture<'a> {
        Box::pin(run_shell(ctx, image, options))
    }
}

async fn run_shell(ctx: &CancellationToken, image: &Image, options: &BuildDriverOptions) -> Result<()> {
    let script = image.cmd.as_deref().ok_or_else(|| {
        BuildGraphError::InvalidDefinition(format!(
            "image '{}' uses the shell driver but has no `cmd`",
            image.id
        ))
    })?;

    info!(image = %image.id, cmd = %script, "starting build process");

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(script);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(script);
        c
    };

    cmd.envs(build_env(image, options))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning build process for '{}'", image.id))?;

    if let Some(stdout) = child.stdout.take() {
        let label = image.id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(image = %label, "{}", line);
            }
        });
    }

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = child.stderr.take() {
        let label = image.id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(image = %label, "stderr: {}", line);
            }
        });
    }

    tokio::select! {
        status_res = child.wait() => {
            let status = status_res
                .with_context(|| format!("waiting for build process of '{}'", image.id))?;
            let code = status.code().unwrap_or(-1);

            info!(
                image = %image.id,
                exit_code = code,
                success = status.success(),
                "build process exited"
            );

            if status.success() {
                Ok(())
            } else {
                Err(BuildGraphError::Other(anyhow!("build command exited with code {code}")))
            }
        }

        _ = ctx.cancelled() => {
            info!(image = %image.id, "build cancelled; killing process");
            if let Err(e) = child.kill().await {
                warn!(image = %image.id, error = %e, "failed to kill build process on cancellation");
            }
            Err(BuildGraphError::Cancelled)
        }
    }
}

/// Environment for the build process. Vars override persistent vars of the same name.
fn build_env(image: &Image, options: &BuildDriverOptions) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = vec![
        ("BUILDGRAPH_IMAGE_NAME".into(), options.image_name.clone()),
        ("BUILDGRAPH_IMAGE_VERSION".into(), options.image_version.clone()),
        ("BUILDGRAPH_IMAGE_ID".into(), image.id.to_string()),
        ("BUILDGRAPH_IMAGE_TAGS".into(), options.tags.join(",")),
        ("BUILDGRAPH_BUILDER_NAME".into(), options.builder_name.clone()),
        ("BUILDGRAPH_PUSH".into(), options.push_after_build.to_string()),
        ("BUILDGRAPH_PULL_PARENT".into(), options.pull_parent_image.to_string()),
        ("BUILDGRAPH_REMOVE_AFTER_BUILD".into(), options.remove_after_build.to_string()),
    ];

    if let Some(host) = &options.registry_host {
        env.push(("BUILDGRAPH_IMAGE_REGISTRY".into(), host.clone()));
    }
    if let Some(ns) = &options.registry_namespace {
        env.push(("BUILDGRAPH_IMAGE_NAMESPACE".into(), ns.clone()));
    }
    if let Some(parent) = &options.parent {
        env.push(("BUILDGRAPH_PARENT_NAME".into(), parent.id.name.clone()));
        env.push(("BUILDGRAPH_PARENT_VERSION".into(), parent.id.version.clone()));
    }
    if !options.labels.is_empty() {
        let labels: Vec<String> = options.labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
        env.push(("BUILDGRAPH_IMAGE_LABELS".into(), labels.join(",")));
    }

    env.extend(options.persistent_vars.iter().map(|(k, v)| (k.clone(), v.clone())));
    env.extend(options.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}
