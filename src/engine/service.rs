// src/engine/service.rs

//! Build orchestration.
//!
//! Every step runs in its own task. A step waits on its gate, hands a job
//! to the dispatcher, waits for the result and publishes its outcome to the
//! steps subscribed to it. It then descends into its plan children, claiming
//! each child that no other parent has claimed yet, and joins them before
//! reporting its subtree. Descent happens whatever the outcome, so children
//! of a failed step resolve to `Skipped` instead of waiting forever.
//!
//! Failures never cancel siblings. Everything that went wrong is returned
//! together in one [`AggregateError`].

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dag::ImageGraph;
use crate::engine::options::BuildOptions;
use crate::errors::{AggregateError, BuildGraphError, Result};
use crate::exec::{BuildCommand, Dispatcher, DriverRegistry, Job};
use crate::image::{Image, ImageRef};
use crate::plan::{GateResult, Plan, PlanFactory, Step, StepOutcome};
use crate::types::BuildStage;

/// What happened to one step.
#[derive(Debug)]
pub struct StepReport {
    index: usize,
    pub image: ImageRef,
    pub outcome: StepOutcome,
    pub error: Option<BuildGraphError>,
    /// From the step's gate opening until its build result came back.
    /// Time spent waiting for parents is not counted; time in the dispatcher
    /// queue is. Zero for steps that never got past their gate.
    pub elapsed: Duration,
}

/// Per-step results of a build in which every step succeeded.
#[derive(Debug, Default)]
pub struct BuildReport {
    steps: Vec<StepReport>,
}

impl BuildReport {
    /// Reports in plan order.
    pub fn steps(&self) -> &[StepReport] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn outcome_of(&self, image: &ImageRef) -> Option<StepOutcome> {
        self.steps.iter().find(|r| &r.image == image).map(|r| r.outcome)
    }

    pub fn built(&self) -> Vec<&ImageRef> {
        self.steps
            .iter()
            .filter(|r| r.outcome.is_success())
            .map(|r| &r.image)
            .collect()
    }
}

/// Plans builds against an image graph and runs them on a dispatcher.
pub struct BuildService {
    graph: Arc<ImageGraph>,
    drivers: Arc<DriverRegistry>,
    dispatcher: Arc<Dispatcher>,
}

impl BuildService {
    pub fn new(graph: Arc<ImageGraph>, drivers: DriverRegistry, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            graph,
            drivers: Arc::new(drivers),
            dispatcher,
        }
    }

    pub fn graph(&self) -> &ImageGraph {
        &self.graph
    }

    /// Plan a build without running it.
    pub fn plan(&self, name: &str, versions: &[String], options: &BuildOptions) -> Result<Plan> {
        options.check()?;
        PlanFactory::planner(options.plan_kind(), &self.graph).plan(name, versions)
    }

    /// Build `name` at `versions` (every version when empty).
    ///
    /// Returns the per-step report when every step succeeded,
    /// [`BuildGraphError::Cancelled`] when `ctx` was cancelled and nothing
    /// failed, and [`BuildGraphError::Aggregate`] with every failure, skipped
    /// and cancelled step otherwise. Planning errors are returned before anything runs.
    pub async fn build(
        &self,
        ctx: &CancellationToken,
        name: &str,
        versions: &[String],
        options: &BuildOptions,
    ) -> Result<BuildReport> {
        let plan = self.plan(name, versions, options)?;
        info!(
            image = name,
            steps = plan.len(),
            plan = ?options.plan_kind(),
            workers = self.dispatcher.num_workers(),
            "starting build"
        );

        let steps = plan.into_steps();
        let top_level: Vec<usize> = steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_top_level())
            .map(|(i, _)| i)
            .collect();

        let exec = Arc::new(Execution {
            slots: steps.into_iter().map(|s| Mutex::new(Some(s))).collect(),
            ctx: ctx.clone(),
            options: options.clone(),
            drivers: Arc::clone(&self.drivers),
            dispatcher: Arc::clone(&self.dispatcher),
        });

        let handles = exec.spawn_claimed(&top_level);
        let mut reports = join_subtrees(handles).await;

        // Every step hangs off a top-level one, so nothing should be left.
        for (index, step) in exec.unclaimed() {
            warn!(image = %step.id(), "step was never reached");
            reports.push(StepReport {
                index,
                image: step.id().clone(),
                outcome: StepOutcome::Skipped,
                error: None,
                elapsed: Duration::ZERO,
            });
        }
        reports.sort_by_key(|r| r.index);

        summarize(ctx, reports)
    }
}

/// Fold step reports into the build result.
///
/// A cancellation is only reported as [`BuildGraphError::Cancelled`] when
/// nothing failed; otherwise the failures win and the cancelled steps are
/// listed alongside them.
fn summarize(ctx: &CancellationToken, reports: Vec<StepReport>) -> Result<BuildReport> {
    if reports.iter().all(|r| r.outcome.is_success()) {
        info!(steps = reports.len(), "build finished");
        return Ok(BuildReport { steps: reports });
    }

    let mut failures = Vec::new();
    let mut skipped = Vec::new();
    let mut cancelled = Vec::new();
    for report in reports {
        match report.outcome {
            StepOutcome::Failed => failures.push(report.error.unwrap_or_else(|| {
                BuildGraphError::build_failed(report.image.to_string(), BuildStage::Execute, "unknown error")
            })),
            StepOutcome::Skipped => skipped.push(report.image.to_string()),
            StepOutcome::Cancelled => cancelled.push(report.image.to_string()),
            StepOutcome::Succeeded => {}
        }
    }

    if failures.is_empty() && (!cancelled.is_empty() || ctx.is_cancelled()) {
        warn!(cancelled = cancelled.len(), skipped = skipped.len(), "build cancelled");
        return Err(BuildGraphError::Cancelled);
    }

    error!(
        failed = failures.len(),
        skipped = skipped.len(),
        cancelled = cancelled.len(),
        "build finished with errors"
    );
    Err(AggregateError::new(failures, skipped)
        .with_cancelled(cancelled)
        .into())
}

/// Shared state of one running build.
struct Execution {
    slots: Vec<Mutex<Option<Step>>>,
    ctx: CancellationToken,
    options: BuildOptions,
    drivers: Arc<DriverRegistry>,
    dispatcher: Arc<Dispatcher>,
}

type SubtreeFuture = Pin<Box<dyn Future<Output = Vec<StepReport>> + Send>>;

impl Execution {
    /// Take the step at `index`; only the first caller gets it.
    ///
    /// A slot is only ever locked for a `take`, so a poisoned one still holds
    /// a consistent value and is recovered.
    fn claim(&self, index: usize) -> Option<Step> {
        self.slots
            .get(index)?
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn unclaimed(&self) -> Vec<(usize, Step)> {
        (0..self.slots.len())
            .filter_map(|i| self.claim(i).map(|s| (i, s)))
            .collect()
    }

    /// Spawn a task for every step in `indices` not already claimed.
    fn spawn_claimed(self: &Arc<Self>, indices: &[usize]) -> Vec<(ImageRef, usize, JoinHandle<Vec<StepReport>>)> {
        indices
            .iter()
            .filter_map(|&index| {
                let step = self.claim(index)?;
                let image = step.id().clone();
                let handle = tokio::spawn(run_step(Arc::clone(self), index, step));
                Some((image, index, handle))
            })
            .collect()
    }

    /// Wait on the step's parents. `None` means the step may build.
    async fn open_gate(&self, step: &mut Step) -> Option<StepOutcome> {
        match step.wait(&self.ctx).await {
            GateResult::Open if self.ctx.is_cancelled() => Some(StepOutcome::Cancelled),
            GateResult::Open => None,
            GateResult::Skipped => {
                info!(image = %step.id(), "skipping build; a parent did not succeed");
                Some(StepOutcome::Skipped)
            }
            GateResult::Cancelled => Some(StepOutcome::Cancelled),
        }
    }

    async fn execute(
        &self,
        image: Arc<Image>,
        label: String,
    ) -> (StepOutcome, Option<BuildGraphError>) {
        let driver = match self.drivers.get(&image.builder) {
            Ok(driver) => driver,
            Err(e) => {
                return (
                    StepOutcome::Failed,
                    Some(BuildGraphError::build_failed(label, BuildStage::Dispatch, e)),
                );
            }
        };

        let options = self.options.for_image(&image);
        let command = BuildCommand::new(driver, Arc::clone(&image), options);
        let (job, handle) = Job::new(label.clone(), Box::new(command), self.ctx.clone());

        debug!(image = %image.id, builder = %image.builder, "queueing build");
        let queued = tokio::select! {
            biased;
            _ = self.ctx.cancelled() => return (StepOutcome::Cancelled, None),
            res = self.dispatcher.enqueue(job) => res,
        };
        if let Err(e) = queued {
            return (
                StepOutcome::Failed,
                Some(BuildGraphError::build_failed(label, BuildStage::Dispatch, e)),
            );
        }

        match handle.wait().await {
            Ok(()) => (StepOutcome::Succeeded, None),
            // A real failure stays a failure even if cancellation arrived since.
            Err(BuildGraphError::Cancelled) => (StepOutcome::Cancelled, None),
            Err(e) => (
                StepOutcome::Failed,
                Some(BuildGraphError::build_failed(label, BuildStage::Execute, e)),
            ),
        }
    }
}

fn run_step(exec: Arc<Execution>, index: usize, mut step: Step) -> SubtreeFuture {
    Box::pin(async move {
        let (outcome, error, elapsed) = match exec.open_gate(&mut step).await {
            Some(outcome) => (outcome, None, Duration::ZERO),
            None => {
                let started = Instant::now();
                let (outcome, error) = exec.execute(Arc::clone(step.image()), step.label().to_string()).await;
                (outcome, error, started.elapsed())
            }
        };

        match &error {
            Some(e) => warn!(image = %step.id(), error = %e, "build step failed"),
            None => info!(
                image = %step.id(),
                %outcome,
                elapsed_ms = elapsed.as_millis() as u64,
                "build step finished"
            ),
        }

        step.notify(outcome);

        let mut reports = vec![StepReport {
            index,
            image: step.id().clone(),
            outcome,
            error,
            elapsed,
        }];

        let children = exec.spawn_claimed(step.children());
        reports.extend(join_subtrees(children).await);
        reports
    })
}

async fn join_subtrees(handles: Vec<(ImageRef, usize, JoinHandle<Vec<StepReport>>)>) -> Vec<StepReport> {
    let mut reports = Vec::new();
    for (image, index, handle) in handles {
        match handle.await {
            Ok(subtree) => reports.extend(subtree),
            Err(e) => {
                error!(image = %image, error = %e, "build task aborted");
                reports.push(StepReport {
                    index,
                    error: Some(BuildGraphError::build_failed(
                        image.to_string(),
                        BuildStage::Execute,
                        anyhow!("build task aborted: {e}"),
                    )),
                    image,
                    outcome: StepOutcome::Failed,
                    elapsed: Duration::ZERO,
                });
            }
        }
    }
    reports
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::exec::{BuildDriver, BuildDriverOptions, BuildFuture};
    use crate::image::Image;
    use crate::plan::tests::graph;
    use crate::plan::{Planner, SinglePlan};
    use crate::types::CascadeDepth;

    /// Records build order and fails the images it is told to.
    #[derive(Default)]
    struct Recorder {
        built: StdMutex<Vec<String>>,
        fail: Vec<String>,
    }

    impl BuildDriver for Recorder {
        fn name(&self) -> &str {
            "shell"
        }

        fn build<'a>(
            &'a self,
            _ctx: &'a CancellationToken,
            image: &'a Image,
            _options: &'a BuildDriverOptions,
        ) -> BuildFuture<'a> {
            Box::pin(async move {
                let id = image.id.to_string();
                self.built.lock().unwrap().push(id.clone());
                if self.fail.contains(&id) {
                    Err(BuildGraphError::Other(anyhow!("driver refused {id}")))
                } else {
                    Ok(())
                }
            })
        }
    }

    fn service(g: ImageGraph, driver: Arc<Recorder>) -> BuildService {
        let mut drivers = DriverRegistry::new();
        drivers.register(driver);
        let dispatcher = Arc::new(Dispatcher::new(2, 4).unwrap());
        BuildService::new(Arc::new(g), drivers, dispatcher)
    }

    fn cascade() -> BuildOptions {
        BuildOptions {
            cascade: Some(CascadeDepth::Unlimited),
            ..Default::default()
        }
    }

    fn three_levels() -> ImageGraph {
        graph(&[
            ("leaf", "v1", "mid:v1"),
            ("mid", "v1", "base:v1"),
            ("base", "v1", ""),
        ])
    }

    #[tokio::test]
    async fn cascade_builds_in_causal_order() {
        let driver = Arc::new(Recorder::default());
        let svc = service(three_levels(), Arc::clone(&driver));

        let report = svc
            .build(&CancellationToken::new(), "base", &["v1".into()], &cascade())
            .await
            .unwrap();

        assert_eq!(report.len(), 3);
        assert_eq!(*driver.built.lock().unwrap(), vec!["base:v1", "mid:v1", "leaf:v1"]);
        assert_eq!(
            report.outcome_of(&ImageRef::new("leaf", "v1")),
            Some(StepOutcome::Succeeded)
        );
    }

    #[tokio::test]
    async fn failure_skips_descendants_and_names_only_the_failure() {
        let driver = Arc::new(Recorder {
            fail: vec!["mid:v1".into()],
            ..Default::default()
        });
        let svc = service(three_levels(), Arc::clone(&driver));

        let err = svc
            .build(&CancellationToken::new(), "base", &["v1".into()], &cascade())
            .await
            .unwrap_err();

        match err {
            BuildGraphError::Aggregate(agg) => {
                assert_eq!(agg.failed_images(), vec!["mid:v1"]);
                assert_eq!(agg.skipped(), &["leaf:v1".to_string()]);
                assert!(agg.to_string().contains("failed during execute"));
            }
            other => panic!("expected Aggregate, got {other:?}"),
        }
        assert_eq!(*driver.built.lock().unwrap(), vec!["base:v1", "mid:v1"]);
    }

    #[tokio::test]
    async fn unknown_driver_fails_at_dispatch() {
        let mut g_def = crate::config::model::ImageDefinition::default();
        g_def.builder = "ansible".into();
        let builder = crate::dag::GraphBuilder::new();
        builder.add_image("base", "v1", g_def).unwrap();
        let svc = service(builder.build().unwrap(), Arc::new(Recorder::default()));

        let err = svc
            .build(&CancellationToken::new(), "base", &[], &BuildOptions::default())
            .await
            .unwrap_err();
        match err {
            BuildGraphError::Aggregate(agg) => {
                assert!(agg.to_string().contains("failed during dispatch"), "{agg}");
            }
            other => panic!("expected Aggregate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn planning_errors_stop_before_any_build() {
        let driver = Arc::new(Recorder::default());
        let svc = service(three_levels(), Arc::clone(&driver));

        let err = svc
            .build(&CancellationToken::new(), "base", &["v9".into()], &BuildOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BuildGraphError::ImageNotFound(_)));

        let opts = BuildOptions {
            image_name: Some("renamed".into()),
            ..cascade()
        };
        let err = svc
            .build(&CancellationToken::new(), "base", &[], &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildGraphError::PlanError(_)));
        assert!(driver.built.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_token_builds_nothing() {
        let driver = Arc::new(Recorder::default());
        let svc = service(three_levels(), Arc::clone(&driver));
        let ctx = CancellationToken::new();
        ctx.cancel();

        let err = svc.build(&ctx, "base", &[], &cascade()).await.unwrap_err();
        assert!(matches!(err, BuildGraphError::Cancelled));
        assert!(driver.built.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn options_reach_the_driver() {
        struct Capture(StdMutex<BTreeMap<String, String>>);

        impl BuildDriver for Capture {
            fn name(&self) -> &str {
                "shell"
            }

            fn build<'a>(
                &'a self,
                _ctx: &'a CancellationToken,
                _image: &'a Image,
                options: &'a BuildDriverOptions,
            ) -> BuildFuture<'a> {
                Box::pin(async move {
                    *self.0.lock().unwrap() = options.vars.clone();
                    Ok(())
                })
            }
        }

        let capture = Arc::new(Capture(StdMutex::new(BTreeMap::new())));
        let mut drivers = DriverRegistry::new();
        drivers.register(capture.clone());
        let svc = BuildService::new(
            Arc::new(three_levels()),
            drivers,
            Arc::new(Dispatcher::new(1, 1).unwrap()),
        );

        let mut opts = BuildOptions::default();
        opts.vars.insert("RELEASE".into(), "1".into());
        svc.build(&CancellationToken::new(), "base", &[], &opts).await.unwrap();
        assert_eq!(capture.0.lock().unwrap().get("RELEASE").map(String::as_str), Some("1"));
    }

    fn report(index: usize, id: &str, outcome: StepOutcome, error: Option<BuildGraphError>) -> StepReport {
        StepReport {
            index,
            image: id.parse().unwrap(),
            outcome,
            error,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn failures_survive_a_cancellation() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let reports = vec![
            report(0, "base:v1", StepOutcome::Succeeded, None),
            report(
                1,
                "a:v1",
                StepOutcome::Failed,
                Some(BuildGraphError::build_failed("a:v1", BuildStage::Execute, "exit code 1")),
            ),
            report(2, "b:v1", StepOutcome::Cancelled, None),
            report(3, "c:v1", StepOutcome::Skipped, None),
        ];

        match summarize(&ctx, reports) {
            Err(BuildGraphError::Aggregate(agg)) => {
                assert_eq!(agg.failed_images(), vec!["a:v1"]);
                assert_eq!(agg.cancelled(), &["b:v1".to_string()]);
                assert_eq!(agg.skipped(), &["c:v1".to_string()]);
            }
            other => panic!("expected Aggregate, got {other:?}"),
        }
    }

    #[test]
    fn cancellation_without_failures_is_cancelled() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let reports = vec![
            report(0, "base:v1", StepOutcome::Succeeded, None),
            report(1, "a:v1", StepOutcome::Cancelled, None),
            report(2, "b:v1", StepOutcome::Skipped, None),
        ];
        assert!(matches!(summarize(&ctx, reports), Err(BuildGraphError::Cancelled)));
    }

    #[tokio::test]
    async fn poisoned_slot_is_still_claimed() {
        let g = three_levels();
        let plan = SinglePlan::new(&g).plan("base", &[]).unwrap();
        let slots: Vec<Mutex<Option<Step>>> =
            plan.into_steps().into_iter().map(|s| Mutex::new(Some(s))).collect();

        std::thread::scope(|scope| {
            let res = scope
                .spawn(|| {
                    let _guard = slots[0].lock().unwrap();
                    panic!("poison the slot");
                })
                .join();
            assert!(res.is_err());
        });
        assert!(slots[0].is_poisoned());

        let exec = Execution {
            slots,
            ctx: CancellationToken::new(),
            options: BuildOptions::default(),
            drivers: Arc::new(DriverRegistry::new()),
            dispatcher: Arc::new(Dispatcher::new(1, 1).unwrap()),
        };

        let step = exec.claim(0).expect("poisoned slot still yields its step");
        assert_eq!(step.label(), "base:v1");
        assert!(exec.claim(0).is_none());
        assert!(exec.unclaimed().is_empty());
        exec.dispatcher.shutdown().await;
    }
}
