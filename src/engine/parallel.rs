// src/engine/parallel.rs

//! A task made of child tasks that run concurrently.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error};

use crate::engine::context::RunContext;
use crate::engine::task::{Task, TaskCore, TaskState};
use crate::errors::Result;
use crate::tools::BoxFuture;

#[derive(Debug, Clone, Copy)]
enum Phase {
    Fetch,
    Build,
    Full,
}

/// Runs each child on its own tokio task and joins all of them, even when one
/// fails. A failing child does not propagate its error to the caller; it asks
/// the registry (through the run context) to interrupt everything.
pub struct ParallelTaskGroup {
    core: TaskCore,
    children: Vec<Arc<dyn Task>>,
    /// Each spawned child with the context it reports failures to.
    handles: Mutex<Vec<(JoinHandle<()>, RunContext)>>,
}

impl std::fmt::Debug for ParallelTaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelTaskGroup")
            .field("core", &self.core)
            .field("children", &self.children.len())
            .finish()
    }
}

impl ParallelTaskGroup {
    /// Children are fixed at construction.
    pub fn new(names: Vec<String>, children: Vec<Arc<dyn Task>>) -> Self {
        Self {
            core: TaskCore::new(names, true),
            children,
            handles: Mutex::new(Vec::new()),
        }
    }

    fn spawn_children(&self, ctx: &RunContext, phase: Phase) -> Result<()> {
        self.core.check_interrupted()?;

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for child in &self.children {
            let child = Arc::clone(child);
            let child_ctx = ctx.clone();
            let ctx = ctx.clone();
            let span = child.core().span().clone();

            let handle = tokio::spawn(async move {
                let result = async {
                    match phase {
                        Phase::Fetch => {
                            child.fetch(&ctx).await?;
                            child.join().await
                        }
                        Phase::Build => {
                            child.build_and_install(&ctx).await?;
                            child.join().await
                        }
                        Phase::Full => child.run(&ctx).await,
                    }
                }
                .instrument(span.clone())
                .await;

                match result {
                    Ok(()) => {}
                    Err(e) if e.is_interrupted() => {
                        debug!(parent: &span, "bailing out");
                    }
                    Err(e) => {
                        error!(parent: &span, error = %e, "task failed");
                        ctx.request_abort();
                    }
                }
            });
            handles.push((handle, child_ctx));
        }
        debug!(
            parent: self.core.span(),
            ?phase,
            children = self.children.len(),
            "spawned children"
        );
        Ok(())
    }
}

impl Task for ParallelTaskGroup {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn enabled(&self) -> bool {
        true
    }

    fn children(&self) -> Vec<Arc<dyn Task>> {
        self.children.clone()
    }

    fn fetch<'a>(&'a self, ctx: &'a RunContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.core.enter(TaskState::Fetching)?;
            self.spawn_children(ctx, Phase::Fetch)
        })
    }

    fn build_and_install<'a>(&'a self, ctx: &'a RunContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.core.enter(TaskState::Building)?;
            self.spawn_children(ctx, Phase::Build)
        })
    }

    /// Each child runs all of its phases on its own.
    fn run<'a>(&'a self, ctx: &'a RunContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.spawn_children(ctx, Phase::Full)?;
            self.join().await?;
            self.core.finish();
            Ok(())
        })
    }

    /// Wait for every spawned child, whatever happened to the others.
    fn join(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let handles =
                std::mem::take(&mut *self.handles.lock().unwrap_or_else(|e| e.into_inner()));
            for (handle, ctx) in handles {
                if let Err(join_err) = handle.await {
                    error!(parent: self.core.span(), error = %join_err, "child task panicked");
                    ctx.request_abort();
                }
            }
            if self.core.state() == TaskState::Building {
                self.core.finish();
            }
            self.core.check_interrupted()
        })
    }

    fn interrupt(&self) {
        self.core.interrupt();
        for child in &self.children {
            child.interrupt();
        }
    }
}
