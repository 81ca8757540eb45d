use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use buildorch::engine::{RunContext, Task, TaskCore, TaskState};
use buildorch::errors::{BuildError, Result};
use buildorch::tools::{BoxFuture, Tool, ToolOutput};
use tokio_util::sync::CancellationToken;

/// Shared, ordered record of what fakes did.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeBehaviour {
    Succeed,
    /// Fail with `ToolFailed` and the given exit code.
    Fail(i32),
    /// Sleep, then succeed.
    Delay(Duration),
    /// Run until interrupted.
    Block,
}

/// A tool that does nothing real; counts runs and interrupts.
pub struct FakeTool {
    name: String,
    behaviour: FakeBehaviour,
    stop: CancellationToken,
    pub runs: AtomicUsize,
    pub interrupts: AtomicUsize,
}

impl FakeTool {
    pub fn new(name: &str, behaviour: FakeBehaviour) -> Self {
        Self {
            name: name.to_string(),
            behaviour,
            stop: CancellationToken::new(),
            runs: AtomicUsize::new(0),
            interrupts: AtomicUsize::new(0),
        }
    }
}

impl Tool for FakeTool {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn run(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.runs.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                FakeBehaviour::Succeed => Ok(()),
                FakeBehaviour::Fail(code) => Err(BuildError::ToolFailed {
                    command: self.name.clone(),
                    exit_code: Some(code),
                    stderr: String::new(),
                }),
                FakeBehaviour::Delay(d) => {
                    tokio::select! {
                        _ = tokio::time::sleep(d) => Ok(()),
                        _ = self.stop.cancelled() => Err(BuildError::Interrupted),
                    }
                }
                FakeBehaviour::Block => {
                    self.stop.cancelled().await;
                    Err(BuildError::Interrupted)
                }
            }
        })
    }

    fn interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        self.stop.cancel();
    }

    fn result(&self) -> ToolOutput {
        ToolOutput::Nothing
    }
}

/// A task that journals `<name>:fetch` and `<name>:build` and runs a
/// [`FakeTool`] with the given behaviour during its build phase.
pub struct RecordingTask {
    core: TaskCore,
    journal: Journal,
    build: FakeBehaviour,
}

impl RecordingTask {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self::with_build(name, journal, FakeBehaviour::Succeed)
    }

    pub fn with_build(name: &str, journal: &Journal, build: FakeBehaviour) -> Self {
        Self {
            core: TaskCore::new(vec![name.to_string()], true),
            journal: Arc::clone(journal),
            build,
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        let mut names = vec![self.core.name().to_string()];
        names.extend(aliases.iter().map(|a| a.to_string()));
        self.core = TaskCore::new(names, true);
        self
    }

    fn record(&self, what: &str) {
        self.journal
            .lock()
            .unwrap()
            .push(format!("{}:{what}", self.core.name()));
    }
}

impl Task for RecordingTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn fetch<'a>(&'a self, _ctx: &'a RunContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.core.enter(TaskState::Fetching)?;
            self.record("fetch");
            Ok(())
        })
    }

    fn build_and_install<'a>(&'a self, _ctx: &'a RunContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.core.enter(TaskState::Building)?;
            self.record("build");
            let tool = Arc::new(FakeTool::new(self.core.name(), self.build));
            let result = self.core.run_tool(tool).await;
            if result.is_ok() {
                self.record("done");
                self.core.finish();
            }
            result.map(|_| ())
        })
    }
}
