// src/engine/registry.rs

//! Owns the top-level tasks, finds them by name, runs them in order and
//! fans interrupts out to all of them.

use std::sync::{Arc, Mutex};

use globset::GlobBuilder;
use tracing::{debug, info, warn};

use crate::engine::context::RunContext;
use crate::engine::task::Task;
use crate::errors::{BuildError, Result};

pub struct TaskRegistry {
    top_level: Vec<Arc<dyn Task>>,
    /// Every task, children included, in declaration order.
    index: Vec<Arc<dyn Task>>,
    ctx: RunContext,
    interrupted: Mutex<bool>,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("top_level", &self.top_level.len())
            .field("tasks", &self.index.len())
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

impl TaskRegistry {
    pub fn new(ctx: RunContext) -> Self {
        Self {
            top_level: Vec::new(),
            index: Vec::new(),
            ctx,
            interrupted: Mutex::new(false),
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Register a top-level task. Names and aliases, including those of its
    /// children, must not collide (case-insensitively) with known ones.
    pub fn add(&mut self, task: Arc<dyn Task>) -> Result<()> {
        let mut incoming = Vec::new();
        collect(&task, &mut incoming);

        let mut seen: Vec<String> = self
            .index
            .iter()
            .flat_map(|t| t.names().iter().map(|n| n.to_lowercase()))
            .collect();
        for t in &incoming {
            for name in t.names() {
                let key = name.to_lowercase();
                if seen.contains(&key) {
                    return Err(BuildError::ConfigError(format!(
                        "duplicate task name '{name}'"
                    )));
                }
                seen.push(key);
            }
        }

        self.index.extend(incoming);
        self.top_level.push(task);
        Ok(())
    }

    pub fn tasks(&self) -> &[Arc<dyn Task>] {
        &self.top_level
    }

    pub fn all_tasks(&self) -> &[Arc<dyn Task>] {
        &self.index
    }

    /// Tasks whose name or alias matches a case-insensitive glob, in
    /// declaration order.
    pub fn find(&self, pattern: &str) -> Result<Vec<Arc<dyn Task>>> {
        let matcher = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .literal_separator(false)
            .build()
            .map_err(|e| BuildError::ConfigError(format!("invalid task pattern '{pattern}': {e}")))?
            .compile_matcher();

        let found: Vec<Arc<dyn Task>> = self
            .index
            .iter()
            .filter(|t| t.names().iter().any(|n| matcher.is_match(n)))
            .cloned()
            .collect();

        if found.is_empty() {
            return Err(BuildError::TaskNotFound(pattern.to_string()));
        }
        Ok(found)
    }

    /// Resolve several patterns, dropping repeats.
    pub fn select(&self, patterns: &[String]) -> Result<Vec<Arc<dyn Task>>> {
        if patterns.is_empty() {
            return Ok(self.top_level.clone());
        }
        let mut selected: Vec<Arc<dyn Task>> = Vec::new();
        for pattern in patterns {
            for task in self.find(pattern)? {
                if !selected.iter().any(|t| Arc::ptr_eq(t, &task)) {
                    selected.push(task);
                }
            }
        }
        Ok(selected)
    }

    pub async fn run_all(&self) -> Result<()> {
        let tasks = self.top_level.clone();
        self.run_tasks(&tasks).await
    }

    /// Run `tasks` one after the other, each through all of its phases.
    ///
    /// A fatal failure, whether returned by a task or reported through the
    /// run context by a parallel child, interrupts everything; the run then
    /// fails with that failure rather than with [`BuildError::Interrupted`].
    pub async fn run_tasks(&self, tasks: &[Arc<dyn Task>]) -> Result<()> {
        let abort = self.ctx.abort_token().clone();
        let run = self.run_sequence(tasks);
        tokio::pin!(run);

        let mut failed_elsewhere = false;
        let result = tokio::select! {
            result = &mut run => result,
            _ = abort.cancelled() => {
                if !self.is_interrupted() {
                    failed_elsewhere = true;
                    warn!("a task failed, interrupting the others");
                    self.interrupt_all();
                }
                run.await
            }
        };

        // A failed leaf stops whatever else is still running, deferred work
        // included, before the background queue is drained.
        if matches!(&result, Err(e) if !e.is_interrupted()) && !self.is_interrupted() {
            warn!("a task failed, interrupting the others");
            self.interrupt_all();
        }

        // The abort may have landed just as the last task finished.
        if self.ctx.is_aborted() && !self.is_interrupted() {
            failed_elsewhere = true;
        }

        let background = self.ctx.background().finish().await;

        let result = match result {
            Err(e) if !e.is_interrupted() => Err(e),
            _ if failed_elsewhere => Err(BuildError::Other(anyhow::anyhow!(
                "run aborted after a task failure"
            ))),
            other => other,
        };
        result.and(background)
    }

    async fn run_sequence(&self, tasks: &[Arc<dyn Task>]) -> Result<()> {
        for task in tasks {
            if self.is_interrupted() {
                return Err(BuildError::Interrupted);
            }
            debug!(task = %task.name(), "starting");
            task.fetch(&self.ctx).await?;
            task.join().await?;
            task.build_and_install(&self.ctx).await?;
            task.join().await?;
        }
        Ok(())
    }

    /// Interrupt every task. Callable from any thread; calling it again
    /// escalates running processes from a polite interrupt to a kill.
    pub fn interrupt_all(&self) {
        let again = {
            let mut flag = self.interrupted.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *flag, true)
        };
        if again {
            warn!("interrupted again, killing running processes");
        } else {
            info!("interrupting all tasks");
        }
        for task in &self.top_level {
            task.interrupt();
        }
        self.ctx.request_abort();
    }

    pub fn is_interrupted(&self) -> bool {
        *self.interrupted.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn collect(task: &Arc<dyn Task>, out: &mut Vec<Arc<dyn Task>>) {
    out.push(Arc::clone(task));
    for child in task.children() {
        collect(&child, out);
    }
}
