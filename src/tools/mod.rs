// src/tools/mod.rs

//! Tools: one external operation each, run on behalf of a task.
//!
//! Every tool exposes the same capability set so a task can track whatever is
//! currently running and interrupt it from another thread:
//!
//! - [`ProcessRunningTool`] owns exactly one [`ChildProcess`](crate::exec::ChildProcess).
//! - [`CommandSequenceTool`] runs several processes one after the other.
//! - [`RetryingTool`] re-creates a process until it succeeds, with an
//!   optional fallback command.
//! - [`RemovePathsTool`] only touches the filesystem.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::errors::Result;

pub mod filesystem;
pub mod process_tool;
pub mod retry;
pub mod sequence;

pub use filesystem::{ArtifactGuard, RemovePathsTool};
pub use process_tool::ProcessRunningTool;
pub use retry::{RetryPolicy, RetryingTool};
pub use sequence::CommandSequenceTool;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a tool hands back to its task.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolOutput {
    /// Fire-and-forget tools.
    #[default]
    Nothing,
    Path(PathBuf),
    ExitCode(i32),
}

impl ToolOutput {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ToolOutput::ExitCode(code) => Some(*code),
            _ => None,
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ToolOutput::Path(path) => Some(path),
            _ => None,
        }
    }
}

/// A unit of external work.
///
/// `interrupt` must be idempotent and callable from any thread while `run` is
/// in progress on another.
pub trait Tool: Send + Sync {
    fn name(&self) -> String;

    /// Perform the work. Fails with [`BuildError::Interrupted`](crate::errors::BuildError::Interrupted)
    /// when stopped by [`interrupt`](Tool::interrupt).
    fn run(&self) -> BoxFuture<'_, Result<()>>;

    fn interrupt(&self);

    /// The value produced by the last successful `run`.
    fn result(&self) -> ToolOutput;
}
