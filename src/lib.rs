// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod image;
pub mod logging;
pub mod plan;
pub mod types;

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::{LoadedConfig, load_graph};
use crate::config::validate::validate_engine;
use crate::engine::{BuildOptions, BuildReport, BuildService};
use crate::exec::{Dispatcher, DriverRegistry};
use crate::plan::Plan;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading into the image graph
/// - planning (printed and returned early for `--dry-run`)
/// - dispatcher + build service
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let LoadedConfig { mut engine, graph } = load_graph(&args.config_paths())?;

    if let Some(workers) = args.workers {
        engine.workers = workers;
    }
    validate_engine(&engine)?;

    let options = args.build_options(engine.cascade_depth)?;
    let drivers = DriverRegistry::with_defaults();

    let dispatcher = Arc::new(Dispatcher::new(engine.workers, engine.queue_capacity)?);
    let service = BuildService::new(Arc::new(graph), drivers, Arc::clone(&dispatcher));

    if args.dry_run {
        let plan = service.plan(&args.image, &args.versions, &options)?;
        print_dry_run(&plan, &options);
        dispatcher.shutdown().await;
        return Ok(());
    }

    // Ctrl-C → cancel every queued and running build.
    let ctx = CancellationToken::new();
    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            warn!("interrupt received; cancelling build");
            ctx.cancel();
        });
    }

    info!(image = %args.image, versions = ?args.versions, "build requested");
    let result = service.build(&ctx, &args.image, &args.versions, &options).await;
    dispatcher.shutdown().await;

    let report = result?;
    print_summary(&report);
    Ok(())
}

/// Print the planned steps with their wiring.
fn print_dry_run(plan: &Plan, options: &BuildOptions) {
    println!("buildgraph dry-run");
    println!("  plan = {:?}", options.plan_kind());
    println!();

    println!("steps ({}):", plan.len());
    for step in plan.steps() {
        let image = step.image();
        println!("  - {}", step.label());
        println!("      builder: {}", image.builder);
        if let Some(cmd) = &image.cmd {
            println!("      cmd: {cmd}");
        }
        if let Some(parent) = &image.parent {
            println!("      parent: {}", parent.id);
        }
        if step.inbound() > 0 {
            println!("      waits for: {} parent step(s)", step.inbound());
        }
        if !step.children().is_empty() {
            let children: Vec<&str> = step
                .children()
                .iter()
                .map(|i| plan.steps()[*i].label())
                .collect();
            println!("      notifies: {}", children.join(", "));
        }
        let tags = options.for_image(image).tags;
        if !tags.is_empty() {
            println!("      tags: {}", tags.join(", "));
        }
    }

    debug!("dry-run complete (no execution)");
}

fn print_summary(report: &BuildReport) {
    println!("built {} image(s):", report.len());
    for step in report.steps() {
        println!("  - {} ({} ms)", step.image, step.elapsed.as_millis());
    }
}
