// src/engine/pool.rs

//! Fixed-capacity pool of reusable worker slots.
//!
//! Bounds how many fine-grained units of work (one compiler invocation per
//! translation file, for instance) run at once, independently of how many
//! tasks are running.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, trace};

use crate::errors::{BuildError, Result};

const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(10);

pub struct WorkerPool {
    slots: Vec<Option<JoinHandle<Result<()>>>>,
    retry_interval: Duration,
    first_error: Option<BuildError>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("capacity", &self.slots.len())
            .field("busy", &self.busy())
            .finish()
    }
}

impl WorkerPool {
    /// A pool with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity.max(1)).map(|_| None).collect(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            first_error: None,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots currently running work.
    pub fn busy(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.as_ref().is_some_and(|h| !h.is_finished()))
            .count()
    }

    /// Start `work` in the first idle slot, waiting for one to free up.
    pub async fn submit<F>(&mut self, work: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        loop {
            let idle = self
                .slots
                .iter()
                .position(|s| s.as_ref().is_none_or(|h| h.is_finished()));

            if let Some(index) = idle {
                if let Some(previous) = self.slots[index].take() {
                    let outcome = previous.await;
                    self.record(outcome);
                }
                trace!(slot = index, "starting work");
                self.slots[index] = Some(tokio::spawn(work.in_current_span()));
                return;
            }

            tokio::time::sleep(self.retry_interval).await;
        }
    }

    /// Wait for every slot. Returns the first failure seen since the last
    /// `join`, preferring a real failure over an interruption.
    pub async fn join(&mut self) -> Result<()> {
        for index in 0..self.slots.len() {
            if let Some(handle) = self.slots[index].take() {
                let outcome = handle.await;
                self.record(outcome);
            }
        }
        match self.first_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn record(&mut self, outcome: std::result::Result<Result<()>, tokio::task::JoinError>) {
        let err = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(join_err) => {
                error!(error = %join_err, "pooled work panicked");
                BuildError::Other(anyhow::anyhow!("pooled work panicked: {join_err}"))
            }
        };
        let replace = match &self.first_error {
            None => true,
            Some(existing) => existing.is_interrupted() && !err.is_interrupted(),
        };
        if replace {
            self.first_error = Some(err);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for handle in self.slots.iter_mut().filter_map(Option::take) {
            if !handle.is_finished() {
                debug!("aborting pooled work that was never joined");
                handle.abort();
            }
        }
    }
}
