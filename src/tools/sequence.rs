// src/tools/sequence.rs

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::errors::{BuildError, Result};
use crate::exec::ChildProcess;

use super::{BoxFuture, Tool, ToolOutput};

/// Several processes run one after the other; the first failure stops the
/// sequence. The result is the exit code of the last step.
#[derive(Debug)]
pub struct CommandSequenceTool {
    name: String,
    steps: Vec<ChildProcess>,
    interrupted: AtomicBool,
    output: Mutex<ToolOutput>,
}

impl CommandSequenceTool {
    pub fn new(name: impl Into<String>, steps: Vec<ChildProcess>) -> Self {
        Self {
            name: name.into(),
            steps,
            interrupted: AtomicBool::new(false),
            output: Mutex::new(ToolOutput::Nothing),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Tool for CommandSequenceTool {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn run(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut last = ToolOutput::Nothing;
            for (i, step) in self.steps.iter().enumerate() {
                if self.interrupted.load(Ordering::SeqCst) {
                    return Err(BuildError::Interrupted);
                }
                debug!(tool = %self.name, step = i + 1, of = self.steps.len(), "running step");
                step.run()?;
                last = ToolOutput::ExitCode(step.join().await?);
            }
            *self.output.lock().unwrap_or_else(|e| e.into_inner()) = last;
            Ok(())
        })
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        // Steps not started yet refuse to spawn once interrupted.
        for step in &self.steps {
            step.interrupt();
        }
    }

    fn result(&self) -> ToolOutput {
        self.output.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
