use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use buildgraph::errors::BuildGraphError;
use buildgraph::exec::{BuildDriver, BuildDriverOptions, BuildFuture};
use buildgraph::image::Image;

/// A fake build driver that:
/// - records which images were started and finished, in order
/// - fails the images it was told to fail
/// - can hold an image until the test releases it
/// - tracks how many builds ran at the same time
pub struct RecordingDriver {
    name: String,
    fail: HashSet<String>,
    gates: HashMap<String, Arc<Notify>>,
    delay: Duration,
    started: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
    options: Mutex<HashMap<String, BuildDriverOptions>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl RecordingDriver {
    /// Registered under `shell`, the default builder of every image.
    pub fn new() -> Self {
        Self::named("shell")
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail: HashSet::new(),
            gates: HashMap::new(),
            delay: Duration::ZERO,
            started: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
            options: Mutex::new(HashMap::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    /// Fail the build of `id` (`name:version`).
    pub fn fail_on(mut self, id: &str) -> Self {
        self.fail.insert(id.to_string());
        self
    }

    /// Hold the build of `id` until [`RecordingDriver::release`] is called.
    pub fn hold(mut self, id: &str) -> Self {
        self.gates.insert(id.to_string(), Arc::new(Notify::new()));
        self
    }

    /// Keep every build busy for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Let a held build continue. Calling this before the build starts is fine.
    pub fn release(&self, id: &str) {
        if let Some(gate) = self.gates.get(id) {
            gate.notify_one();
        }
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }

    pub fn calls_for(&self, id: &str) -> usize {
        self.started().iter().filter(|s| *s == id).count()
    }

    pub fn options_for(&self, id: &str) -> Option<BuildDriverOptions> {
        self.options.lock().unwrap().get(id).cloned()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

impl Default for RecordingDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildDriver for RecordingDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn build<'a>(
        &'a self,
        ctx: &'a CancellationToken,
        image: &'a Image,
        options: &'a BuildDriverOptions,
    ) -> BuildFuture<'a> {
        Box::pin(async move {
            let id = image.id.to_string();
            self.started.lock().unwrap().push(id.clone());
            self.options
                .lock()
                .unwrap()
                .insert(id.clone(), options.clone());

            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);

            let held = match self.gates.get(&id) {
                Some(gate) => tokio::select! {
                    _ = gate.notified() => true,
                    _ = ctx.cancelled() => false,
                },
                None => true,
            };
            if held && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            self.running.fetch_sub(1, Ordering::SeqCst);
            if !held {
                return Err(BuildGraphError::Cancelled);
            }

            self.finished.lock().unwrap().push(id.clone());
            if self.fail.contains(&id) {
                Err(BuildGraphError::Other(anyhow!("build of {id} failed on purpose")))
            } else {
                Ok(())
            }
        })
    }
}
