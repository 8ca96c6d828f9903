// src/exec/dispatcher.rs

use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{BuildGraphError, Result};

use super::job::Job;
use super::worker::Worker;

pub const DEFAULT_NUM_WORKERS: usize = 1;
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

/// Fixed-size worker pool behind a bounded job queue.
///
/// The worker count caps how many builds run at once, however many steps
/// are ready. [`Dispatcher::enqueue`] waits while the queue is full.
pub struct Dispatcher {
    tx: mpsc::Sender<Job>,
    workers: Mutex<JoinSet<()>>,
    num_workers: usize,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Spawn `num_workers` workers. Must be called inside a tokio runtime.
    pub fn new(num_workers: usize, queue_capacity: usize) -> Result<Self> {
        if num_workers == 0 {
            return Err(BuildGraphError::ConfigError(
                "dispatcher needs at least one worker".to_string(),
            ));
        }
        if queue_capacity == 0 {
            return Err(BuildGraphError::ConfigError(
                "dispatcher queue capacity must be >= 1".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(queue_capacity);
        let queue = Arc::new(Mutex::new(rx));
        let shutdown = CancellationToken::new();

        let mut workers = JoinSet::new();
        for id in 0..num_workers {
            let worker = Worker::new(id, Arc::clone(&queue), shutdown.clone());
            workers.spawn(worker.run());
        }
        debug!(num_workers, queue_capacity, "dispatcher started");

        Ok(Self {
            tx,
            workers: Mutex::new(workers),
            num_workers,
            shutdown,
        })
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Queue `job`, waiting for space if the queue is full.
    pub async fn enqueue(&self, job: Job) -> Result<()> {
        let label = job.label().to_string();
        self.tx.send(job).await.map_err(|_| {
            BuildGraphError::Other(anyhow!("dispatcher is shut down; cannot queue '{label}'"))
        })
    }

    /// Stop accepting jobs, let queued ones finish, and wait for every worker.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut workers = self.workers.lock().await;
        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "dispatcher worker ended abnormally");
            }
        }
        debug!("dispatcher stopped");
    }
}
