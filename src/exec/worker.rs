// src/exec/worker.rs

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::job::Job;

/// Pulls jobs off the shared queue and runs them one at a time.
pub struct Worker {
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<Job>>>,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(id: usize, queue: Arc<Mutex<mpsc::Receiver<Job>>>, shutdown: CancellationToken) -> Self {
        Self { id, queue, shutdown }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Run until the queue is closed and drained.
    ///
    /// On shutdown the queue is closed, so jobs already queued still run
    /// but no new ones are accepted.
    pub async fn run(self) {
        debug!(worker = self.id, "worker started");

        loop {
            let job = {
                let mut rx = self.queue.lock().await;
                tokio::select! {
                    biased;
                    job = rx.recv() => job,
                    _ = self.shutdown.cancelled() => {
                        rx.close();
                        rx.recv().await
                    }
                }
            };

            let Some(job) = job else {
                break;
            };

            info!(worker = self.id, job = %job.label(), "running job");
            job.execute().await;
        }

        debug!(worker = self.id, "worker stopped");
    }
}
