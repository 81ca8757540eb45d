// src/engine/context.rs

//! Shared, read-only run context handed down to every task.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::engine::background::BackgroundQueue;
use crate::exec::Codepages;
use crate::exec::child::DEFAULT_POLL_INTERVAL;
use crate::types::{CleanFlags, PhaseSwitches};

/// The narrow slice of configuration the engine reads. Built once at
/// startup; never mutated during a run.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub phases: PhaseSwitches,
    pub clean: CleanFlags,
    pub max_jobs: usize,
    pub poll_interval: Duration,
    pub codepages: Codepages,
    /// Base directory for relative task paths.
    pub prefix: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            phases: PhaseSwitches::default(),
            clean: CleanFlags::NONE,
            max_jobs: 1,
            poll_interval: DEFAULT_POLL_INTERVAL,
            codepages: Codepages::default(),
            prefix: PathBuf::from("."),
        }
    }
}

struct Inner {
    config: CoreConfig,
    abort: CancellationToken,
    background: BackgroundQueue,
}

/// Cheap to clone; clones share the abort token and the background queue.
#[derive(Clone)]
pub struct RunContext {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("config", &self.inner.config)
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

impl RunContext {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                abort: CancellationToken::new(),
                background: BackgroundQueue::new(),
            }),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    pub fn phases(&self) -> PhaseSwitches {
        self.inner.config.phases
    }

    pub fn clean_flags(&self) -> CleanFlags {
        self.inner.config.clean
    }

    pub fn prefix(&self) -> &Path {
        &self.inner.config.prefix
    }

    pub fn background(&self) -> &BackgroundQueue {
        &self.inner.background
    }

    /// Fired when any task thread hits a fatal failure, or when the whole run
    /// is interrupted.
    pub fn abort_token(&self) -> &CancellationToken {
        &self.inner.abort
    }

    /// Ask the registry to interrupt everything.
    pub fn request_abort(&self) {
        self.inner.abort.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.abort.is_cancelled()
    }
}
