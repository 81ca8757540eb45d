// src/engine/task.rs

//! The task abstraction and the state every task shares.
//!
//! A task walks `NotStarted -> Cleaning -> Fetching -> Patching -> Building
//! -> Done`, skipping states its switches disable. Every transition first
//! checks the task's cancellation token, so an interrupt unwinds at the next
//! boundary as [`BuildError::Interrupted`].

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info_span, trace};

use crate::engine::context::RunContext;
use crate::errors::{BuildError, Result};
use crate::tools::{BoxFuture, Tool, ToolOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    NotStarted,
    Cleaning,
    Fetching,
    Patching,
    Building,
    Done,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::NotStarted => "not started",
            TaskState::Cleaning => "cleaning",
            TaskState::Fetching => "fetching",
            TaskState::Patching => "patching",
            TaskState::Building => "building",
            TaskState::Done => "done",
        };
        f.write_str(s)
    }
}

/// Identity, cancellation and the "currently running tool" slot of a task.
pub struct TaskCore {
    names: Vec<String>,
    enabled: bool,
    cancel: CancellationToken,
    running_tool: Mutex<Option<Arc<dyn Tool>>>,
    state: Mutex<TaskState>,
    span: Span,
}

impl fmt::Debug for TaskCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCore")
            .field("names", &self.names)
            .field("enabled", &self.enabled)
            .field("interrupted", &self.interrupted())
            .field("state", &self.state())
            .finish()
    }
}

impl TaskCore {
    /// `names[0]` is the primary name, the rest are aliases.
    pub fn new(names: Vec<String>, enabled: bool) -> Self {
        let primary = names.first().cloned().unwrap_or_default();
        Self {
            names,
            enabled,
            cancel: CancellationToken::new(),
            running_tool: Mutex::new(None),
            state: Mutex::new(TaskState::NotStarted),
            span: info_span!(parent: None, "task", name = %primary),
        }
    }

    pub fn name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or("")
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Logging context for everything this task runs.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Token cancelled when the task is interrupted. Processes started on
    /// behalf of the task hang child tokens off it.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn interrupted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn check_interrupted(&self) -> Result<()> {
        if self.interrupted() {
            return Err(BuildError::Interrupted);
        }
        Ok(())
    }

    /// Move to `state`, unless the task has been interrupted.
    pub fn enter(&self, state: TaskState) -> Result<()> {
        self.check_interrupted()?;
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
        debug!(parent: &self.span, %state, "state change");
        Ok(())
    }

    pub fn finish(&self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = TaskState::Done;
    }

    /// Interrupt whatever tool is running, then mark the task interrupted.
    ///
    /// Calling it again escalates: processes interrupted a second time kill
    /// their whole process group.
    pub fn interrupt(&self) {
        let tool = self
            .running_tool
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(tool) = tool {
            trace!(parent: &self.span, tool = %tool.name(), "interrupting tool");
            tool.interrupt();
        }
        self.cancel.cancel();
    }

    /// Run `tool` as this task's single active tool and return its result.
    pub async fn run_tool(&self, tool: Arc<dyn Tool>) -> Result<ToolOutput> {
        self.check_interrupted()?;

        let _slot = {
            let mut slot = self.running_tool.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(active) = slot.as_ref() {
                return Err(BuildError::ConfigError(format!(
                    "task '{}' is already running '{}'",
                    self.name(),
                    active.name()
                )));
            }
            *slot = Some(Arc::clone(&tool));
            RunningToolSlot { core: self }
        };

        // An interrupt that landed between the check and the record above
        // found no tool to forward to.
        if self.interrupted() {
            tool.interrupt();
        }

        tool.run().await?;
        Ok(tool.result())
    }
}

/// Clears the running-tool slot, including when the future is dropped.
struct RunningToolSlot<'a> {
    core: &'a TaskCore,
}

impl Drop for RunningToolSlot<'_> {
    fn drop(&mut self) {
        self.core
            .running_tool
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}

/// A unit of build work: a leaf task or a composite of tasks.
///
/// `fetch` and `build_and_install` may leave work running in the background
/// (a parallel group spawns its children); `join` waits for it.
pub trait Task: Send + Sync {
    fn core(&self) -> &TaskCore;

    fn name(&self) -> &str {
        self.core().name()
    }

    fn names(&self) -> &[String] {
        self.core().names()
    }

    fn enabled(&self) -> bool {
        self.core().enabled()
    }

    /// Direct sub-tasks, for lookup.
    fn children(&self) -> Vec<Arc<dyn Task>> {
        Vec::new()
    }

    fn fetch<'a>(&'a self, ctx: &'a RunContext) -> BoxFuture<'a, Result<()>>;

    fn build_and_install<'a>(&'a self, ctx: &'a RunContext) -> BoxFuture<'a, Result<()>>;

    fn join(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// All phases, in order.
    fn run<'a>(&'a self, ctx: &'a RunContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.fetch(ctx).await?;
            self.join().await?;
            self.build_and_install(ctx).await?;
            self.join().await
        })
    }

    fn interrupt(&self) {
        self.core().interrupt();
    }

    fn interrupted(&self) -> bool {
        self.core().interrupted()
    }
}

impl fmt::Debug for dyn Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("names", &self.names()).finish()
    }
}
