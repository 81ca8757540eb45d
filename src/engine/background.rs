// src/engine/background.rs

//! Single background worker for deferred jobs.
//!
//! The build phase enqueues work it does not want to wait on (registering a
//! freshly built project with source control, for instance). Jobs run one at
//! a time in FIFO order; [`BackgroundQueue::finish`] waits for all of them.

use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info_span};

use crate::errors::{BuildError, Result};
use crate::tools::BoxFuture;

struct Job {
    name: String,
    work: BoxFuture<'static, Result<()>>,
}

#[derive(Default)]
struct Worker {
    tx: Option<mpsc::UnboundedSender<Job>>,
    handle: Option<JoinHandle<Option<BuildError>>>,
    closed: bool,
}

#[derive(Default)]
pub struct BackgroundQueue {
    worker: Mutex<Worker>,
}

impl BackgroundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a job. The worker is started on first use.
    pub fn enqueue<F>(&self, name: impl Into<String>, work: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.closed {
            return Err(BuildError::ConfigError(format!(
                "background queue is closed; cannot run '{name}'"
            )));
        }

        if worker.tx.is_none() {
            let (tx, rx) = mpsc::unbounded_channel();
            worker.handle = Some(tokio::spawn(
                drain(rx).instrument(info_span!(parent: None, "background")),
            ));
            worker.tx = Some(tx);
        }

        debug!(job = %name, "queued background job");
        let job = Job {
            name,
            work: Box::pin(work),
        };
        if let Some(tx) = &worker.tx {
            tx.send(job).map_err(|_| {
                BuildError::ConfigError("background worker stopped unexpectedly".to_string())
            })?;
        }
        Ok(())
    }

    /// Stop accepting jobs and wait for every queued one. Returns the first
    /// failure, if any.
    pub async fn finish(&self) -> Result<()> {
        let handle = {
            let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
            worker.closed = true;
            worker.tx.take();
            worker.handle.take()
        };
        let Some(handle) = handle else {
            return Ok(());
        };

        match handle.await {
            Ok(None) => Ok(()),
            Ok(Some(err)) => Err(err),
            Err(join_err) => Err(BuildError::Other(anyhow::anyhow!(
                "background worker panicked: {join_err}"
            ))),
        }
    }
}

async fn drain(mut rx: mpsc::UnboundedReceiver<Job>) -> Option<BuildError> {
    let mut first_error = None;
    while let Some(job) = rx.recv().await {
        debug!(job = %job.name, "running background job");
        match job.work.await {
            Ok(()) => debug!(job = %job.name, "background job done"),
            Err(e) if e.is_interrupted() => debug!(job = %job.name, "background job interrupted"),
            Err(e) => {
                error!(job = %job.name, error = %e, "background job failed");
                first_error.get_or_insert(e);
            }
        }
    }
    first_error
}
