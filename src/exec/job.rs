// src/exec/job.rs

use anyhow::anyhow;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::errors::{BuildGraphError, Result};

use super::command::Command;

/// A command queued for a worker, plus the channel its result goes out on.
pub struct Job {
    label: String,
    command: Box<dyn Command>,
    ctx: CancellationToken,
    done: oneshot::Sender<Result<()>>,
}

/// Caller side of a [`Job`]: resolves once a worker has run it.
#[derive(Debug)]
pub struct JobHandle {
    label: String,
    rx: oneshot::Receiver<Result<()>>,
}

impl Job {
    pub fn new(
        label: impl Into<String>,
        command: Box<dyn Command>,
        ctx: CancellationToken,
    ) -> (Job, JobHandle) {
        let label = label.into();
        let (done, rx) = oneshot::channel();
        let job = Job {
            label: label.clone(),
            command,
            ctx,
            done,
        };
        (job, JobHandle { label, rx })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run the command unless the job was cancelled while queued, and
    /// report the result to the handle.
    pub async fn execute(self) {
        let Job {
            label,
            command,
            ctx,
            done,
        } = self;

        let result = if ctx.is_cancelled() {
            debug!(job = %label, "job cancelled before it started");
            Err(BuildGraphError::Cancelled)
        } else {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => Err(BuildGraphError::Cancelled),
                res = command.execute(&ctx) => res,
            }
        };

        trace!(job = %label, ok = result.is_ok(), "job finished");
        if done.send(result).is_err() {
            debug!(job = %label, "job handle dropped before completion");
        }
    }
}

impl JobHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wait for the job's result.
    pub async fn wait(self) -> Result<()> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(BuildGraphError::Other(anyhow!(
                "job '{}' was dropped before it completed",
                self.label
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::driver::BuildFuture;

    struct Fixed(bool);

    impl Command for Fixed {
        fn execute<'a>(&'a self, _ctx: &'a CancellationToken) -> BuildFuture<'a> {
            let ok = self.0;
            Box::pin(async move {
                if ok {
                    Ok(())
                } else {
                    Err(BuildGraphError::Other(anyhow!("boom")))
                }
            })
        }
    }

    #[tokio::test]
    async fn result_reaches_handle() {
        let (job, handle) = Job::new("ok", Box::new(Fixed(true)), CancellationToken::new());
        job.execute().await;
        handle.wait().await.unwrap();

        let (job, handle) = Job::new("bad", Box::new(Fixed(false)), CancellationToken::new());
        job.execute().await;
        assert!(handle.wait().await.unwrap_err().to_string().contains("boom"));
    }

    #[tokio::test]
    async fn cancelled_job_never_runs() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let (job, handle) = Job::new("late", Box::new(Fixed(true)), ctx);
        job.execute().await;
        assert!(matches!(handle.wait().await, Err(BuildGraphError::Cancelled)));
    }

    #[tokio::test]
    async fn dropped_job_is_an_error() {
        let (job, handle) = Job::new("lost", Box::new(Fixed(true)), CancellationToken::new());
        drop(job);
        let err = handle.wait().await.unwrap_err();
        assert!(err.to_string().contains("lost"));
    }
}
